//! Framing: research brief → survey specification.

use pipeline::{ResearchBrief, Schema, StageId, Violation};

use super::models::{check_questions, survey_spec_schema, SurveySpec};
use crate::executor::StageDefinition;

const INSTRUCTIONS: &str = "\
You are a survey specification expert. Analyse the research request and produce a \
specification that will guide the creation of the survey. Consider the purpose and goals \
of the survey, the target audience and its characteristics, appropriate question types \
and flow, the estimated completion time, and the number of responses required. \
Respond with a single JSON object matching the provided schema. Question types are \
multiple_choice, text, rating and boolean.";

#[derive(Debug, Clone)]
pub struct FramingStage {
    schema: Schema,
}

impl FramingStage {
    pub fn new() -> Self {
        Self {
            schema: survey_spec_schema(),
        }
    }
}

impl Default for FramingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl StageDefinition for FramingStage {
    type Input = ResearchBrief;
    type Output = SurveySpec;

    fn stage(&self) -> StageId {
        StageId::Framing
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn instructions(&self) -> &str {
        INSTRUCTIONS
    }

    fn render_input(&self, brief: &ResearchBrief) -> String {
        format!(
            "Create a survey specification for the following request.\n\nProject: {}\nResearch question: {}",
            brief.name, brief.question
        )
    }

    fn check(&self, spec: &SurveySpec) -> Vec<Violation> {
        let mut violations = check_questions(&spec.questions);
        if spec.required_responses == 0 {
            violations.push(Violation::rule("required_responses", "must be at least 1"));
        }
        violations
    }
}
