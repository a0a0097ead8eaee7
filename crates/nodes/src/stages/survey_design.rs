//! Survey design: specification → questionnaire.

use pipeline::{Schema, StageId, Violation};

use super::models::{check_questions, survey_schema, Survey, SurveySpec};
use crate::executor::StageDefinition;

const INSTRUCTIONS: &str = "\
You are a survey design expert. Write clear, unbiased survey questions that directly serve \
the goals of the specification. Use the question type that fits the data needed \
(multiple_choice for categorical answers with predefined options, text for open answers, \
rating for scales, boolean for yes/no), include demographic questions where the target \
audience calls for them, order the questions logically, and keep the length within the \
estimated completion time. Every multiple_choice question must list its options. \
Respond with a single JSON object matching the provided schema.";

#[derive(Debug, Clone)]
pub struct SurveyDesignStage {
    schema: Schema,
}

impl SurveyDesignStage {
    pub fn new() -> Self {
        Self {
            schema: survey_schema(),
        }
    }
}

impl Default for SurveyDesignStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageDefinition for SurveyDesignStage {
    type Input = SurveySpec;
    type Output = Survey;

    fn stage(&self) -> StageId {
        StageId::SurveyDesign
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn instructions(&self) -> &str {
        INSTRUCTIONS
    }

    fn render_input(&self, spec: &SurveySpec) -> String {
        let spec = serde_json::to_string_pretty(spec).unwrap_or_default();
        format!("Create the survey questions for this specification:\n\n{spec}")
    }

    fn check(&self, survey: &Survey) -> Vec<Violation> {
        let mut violations = check_questions(&survey.questions);
        if survey.questions.is_empty() {
            violations.push(Violation::rule("questions", "a survey needs at least one question"));
        }
        violations
    }
}
