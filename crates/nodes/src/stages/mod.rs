//! The five pipeline stages.
//!
//! Framing, survey design, and cohort selection are [`StageDefinition`]s run
//! by the generic [`TaskExecutor`]; distribution and analysis are handoffs to
//! external collaborators.
//!
//! [`StageDefinition`]: crate::StageDefinition
//! [`TaskExecutor`]: crate::TaskExecutor

pub mod cohort;
pub mod framing;
pub mod handoff;
pub mod models;
pub mod survey_design;

pub use cohort::CohortStage;
pub use framing::FramingStage;
pub use handoff::HandoffStage;
pub use models::{Cohort, CohortCriterion, HandoffRecord, Question, QuestionType, Survey, SurveySpec};
pub use survey_design::SurveyDesignStage;
