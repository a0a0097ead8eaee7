//! Cohort selection: questionnaire → respondent criteria.

use pipeline::{Schema, StageId, Violation};

use super::models::{cohort_schema, Cohort, Survey};
use crate::executor::StageDefinition;

const INSTRUCTIONS: &str = "\
You select survey respondents. Given a survey, describe the cohort that should answer it: \
a short description, the attributes respondents must have together with the requirement \
for each, and the number of respondents to recruit. \
Respond with a single JSON object matching the provided schema.";

#[derive(Debug, Clone)]
pub struct CohortStage {
    schema: Schema,
}

impl CohortStage {
    pub fn new() -> Self {
        Self {
            schema: cohort_schema(),
        }
    }
}

impl Default for CohortStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageDefinition for CohortStage {
    type Input = Survey;
    type Output = Cohort;

    fn stage(&self) -> StageId {
        StageId::CohortSelection
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn instructions(&self) -> &str {
        INSTRUCTIONS
    }

    fn render_input(&self, survey: &Survey) -> String {
        let survey = serde_json::to_string_pretty(survey).unwrap_or_default();
        format!("Select the cohort for this survey:\n\n{survey}")
    }

    fn check(&self, cohort: &Cohort) -> Vec<Violation> {
        let mut violations = Vec::new();
        if cohort.criteria.is_empty() {
            violations.push(Violation::rule("criteria", "at least one criterion is required"));
        }
        if cohort.target_size == 0 {
            violations.push(Violation::rule("target_size", "must be at least 1"));
        }
        violations
    }
}
