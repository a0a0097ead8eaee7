//! Stage payloads and their schemas.

use pipeline::{FieldType, Schema, Violation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    Text,
    Rating,
    Boolean,
}

impl QuestionType {
    pub const ALL: [QuestionType; 4] = [
        QuestionType::MultipleChoice,
        QuestionType::Text,
        QuestionType::Rating,
        QuestionType::Boolean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Text => "text",
            QuestionType::Rating => "rating",
            QuestionType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

fn required_by_default() -> bool {
    true
}

/// Framing output: what the survey is for and who it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveySpec {
    pub title: String,
    pub description: String,
    pub questions: Vec<Question>,
    pub target_audience: String,
    pub estimated_time: String,
    pub required_responses: u32,
}

/// Survey-design output: the questionnaire itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
    pub title: String,
    pub description: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortCriterion {
    pub attribute: String,
    pub requirement: String,
}

/// Cohort-selection output: who should receive the survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    pub description: String,
    pub criteria: Vec<CohortCriterion>,
    pub target_size: u32,
}

/// What a handoff stage passed to its external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub collaborator: String,
    /// Upstream payloads keyed by stage name, plus the research brief.
    pub upstream: Value,
    /// Reviewer notes from the latest revision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

pub fn question_schema() -> Schema {
    Schema::new()
        .required("text", FieldType::String)
        .required("type", FieldType::one_of(QuestionType::ALL.map(QuestionType::as_str)))
        .optional("options", FieldType::array_of(FieldType::String))
        .optional("required", FieldType::Boolean)
}

pub fn survey_spec_schema() -> Schema {
    Schema::new()
        .required("title", FieldType::String)
        .required("description", FieldType::String)
        .required("questions", FieldType::array_of(FieldType::Object(question_schema())))
        .required("target_audience", FieldType::String)
        .required("estimated_time", FieldType::String)
        .required("required_responses", FieldType::Count)
}

pub fn survey_schema() -> Schema {
    Schema::new()
        .required("title", FieldType::String)
        .required("description", FieldType::String)
        .required("questions", FieldType::array_of(FieldType::Object(question_schema())))
}

pub fn cohort_schema() -> Schema {
    let criterion = Schema::new()
        .required("attribute", FieldType::String)
        .required("requirement", FieldType::String);
    Schema::new()
        .required("description", FieldType::String)
        .required("criteria", FieldType::array_of(FieldType::Object(criterion)))
        .required("target_size", FieldType::Count)
}

/// Multiple-choice questions must offer at least one option.
pub fn check_questions(questions: &[Question]) -> Vec<Violation> {
    questions
        .iter()
        .enumerate()
        .filter(|(_, q)| {
            q.kind == QuestionType::MultipleChoice
                && q.options.as_ref().is_none_or(|options| options.is_empty())
        })
        .map(|(i, _)| {
            Violation::rule(
                format!("questions[{i}].options"),
                "multiple_choice questions need at least one option",
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn question_type_uses_the_wire_name() {
        let q: Question = serde_json::from_value(json!({
            "text": "How many days do you work remotely?",
            "type": "multiple_choice",
            "options": ["0", "1-2", "3+"]
        }))
        .unwrap();
        assert_eq!(q.kind, QuestionType::MultipleChoice);
        assert!(q.required, "required defaults to true");
        assert_eq!(serde_json::to_value(&q).unwrap()["type"], "multiple_choice");
    }

    #[test]
    fn choice_questions_without_options_are_flagged() {
        let questions = vec![
            Question {
                text: "Do you like it?".into(),
                kind: QuestionType::Boolean,
                options: None,
                required: true,
            },
            Question {
                text: "Pick one".into(),
                kind: QuestionType::MultipleChoice,
                options: Some(vec![]),
                required: true,
            },
        ];
        let violations = check_questions(&questions);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "questions[1].options");
    }

    #[test]
    fn unknown_question_type_is_a_schema_violation() {
        let err = survey_schema()
            .validate(&json!({
                "title": "t",
                "description": "d",
                "questions": [{ "text": "q", "type": "slider" }]
            }))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["questions[0].type"]);
    }

    #[test]
    fn negative_counts_are_blamed_on_their_field() {
        let raw = json!({
            "title": "Remote work",
            "description": "How people work from home",
            "questions": [],
            "target_audience": "office workers",
            "estimated_time": "5 minutes",
            "required_responses": -5
        })
        .to_string();
        let err = pipeline::parse_structured::<SurveySpec>(&raw, &survey_spec_schema()).unwrap_err();
        assert_eq!(err.fields(), vec!["required_responses"]);

        let err = cohort_schema()
            .validate(&json!({ "description": "d", "criteria": [], "target_size": -1 }))
            .unwrap_err();
        assert_eq!(err.fields(), vec!["target_size"]);
    }
}
