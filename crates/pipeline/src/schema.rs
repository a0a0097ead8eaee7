//! Structured-output schemas and the validator that enforces them.
//!
//! Generative models return free-form text. Each stage declares a [`Schema`]
//! (field names, types, required/optional, enumerated value sets) and the
//! validator turns raw text into a typed value or a [`ValidationError`] that
//! lists **every** violated field, so a single repair request can address all
//! of them at once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ValidationError;

// ---------------------------------------------------------------------------
// Schema description
// ---------------------------------------------------------------------------

/// The declared type of one schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    /// A non-negative integer that fits in a `u32` (counts, sizes).
    Count,
    Number,
    Boolean,
    /// A string restricted to a fixed set of values (categorical field).
    Enum(Vec<String>),
    Array(Box<FieldType>),
    Object(Schema),
}

impl FieldType {
    /// Convenience constructor for [`FieldType::Enum`].
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum(values.into_iter().map(Into::into).collect())
    }

    /// Convenience constructor for [`FieldType::Array`].
    pub fn array_of(item: FieldType) -> Self {
        FieldType::Array(Box::new(item))
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Enum(_) => "string",
            FieldType::Integer | FieldType::Count => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array(_) => "array",
            FieldType::Object(_) => "object",
        }
    }

    fn hint(&self) -> Value {
        match self {
            FieldType::Enum(values) => json!({ "type": "string", "enum": values }),
            FieldType::Array(item) => json!({ "type": "array", "items": item.hint() }),
            FieldType::Object(schema) => schema.hint(),
            FieldType::Count => json!({ "type": "integer", "minimum": 0, "maximum": u32::MAX }),
            other => json!({ "type": other.name() }),
        }
    }
}

/// One named field of a [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

/// Declared shape of a JSON object produced by the inference dependency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field that must be present and non-null.
    pub fn required(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    /// Adds a field that may be absent or null.
    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// JSON-Schema-style description sent to the dependency as a schema hint.
    pub fn hint(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.ty.hint()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({ "type": "object", "properties": properties, "required": required })
    }

    /// Checks `value` against this schema, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        match value {
            Value::Object(object) => self.check_object(object, "", &mut violations),
            other => violations.push(Violation::wrong_type(ROOT, "object", other)),
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    fn check_object(&self, object: &Map<String, Value>, prefix: &str, out: &mut Vec<Violation>) {
        for field in &self.fields {
            let path = join_path(prefix, &field.name);
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        out.push(Violation::new(path, Problem::Missing));
                    }
                }
                Some(value) => check_value(&field.ty, value, &path, out),
            }
        }
    }
}

fn check_value(ty: &FieldType, value: &Value, path: &str, out: &mut Vec<Violation>) {
    match (ty, value) {
        (FieldType::String, Value::String(_)) | (FieldType::Boolean, Value::Bool(_)) => {}
        (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        (FieldType::Count, Value::Number(n)) if n.is_i64() || n.is_u64() => {
            if n.as_u64().is_none_or(|v| v > u64::from(u32::MAX)) {
                out.push(Violation::new(
                    path.to_string(),
                    Problem::OutOfRange {
                        value: n.to_string(),
                        min: 0,
                        max: u64::from(u32::MAX),
                    },
                ));
            }
        }
        (FieldType::Number, Value::Number(_)) => {}
        (FieldType::Enum(allowed), Value::String(s)) => {
            if !allowed.iter().any(|a| a == s) {
                out.push(Violation::new(
                    path.to_string(),
                    Problem::NotAllowed {
                        value: s.clone(),
                        allowed: allowed.clone(),
                    },
                ));
            }
        }
        (FieldType::Array(item), Value::Array(items)) => {
            for (i, element) in items.iter().enumerate() {
                check_value(item, element, &format!("{path}[{i}]"), out);
            }
        }
        (FieldType::Object(schema), Value::Object(object)) => {
            schema.check_object(object, path, out);
        }
        (expected, found) => out.push(Violation::wrong_type(path, expected.name(), found)),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Path used for violations that concern the response as a whole.
pub const ROOT: &str = "$";

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// What is wrong with one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum Problem {
    Missing,
    WrongType { expected: String, found: String },
    NotAllowed { value: String, allowed: Vec<String> },
    OutOfRange { value: String, min: u64, max: u64 },
    Unparseable { message: String },
    /// A stage-specific rule that spans fields (e.g. options for choice questions).
    Rule { message: String },
}

/// One violated field, addressed by a dotted path such as `questions[2].type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub problem: Problem,
}

impl Violation {
    pub fn new(field: impl Into<String>, problem: Problem) -> Self {
        Self {
            field: field.into(),
            problem,
        }
    }

    /// A stage-specific rule violation.
    pub fn rule(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field,
            Problem::Rule {
                message: message.into(),
            },
        )
    }

    fn wrong_type(field: &str, expected: &str, found: &Value) -> Self {
        Self::new(
            field,
            Problem::WrongType {
                expected: expected.to_string(),
                found: json_type_name(found).to_string(),
            },
        )
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            Problem::Missing => write!(f, "{}: required field is missing", self.field),
            Problem::WrongType { expected, found } => {
                write!(f, "{}: expected {expected}, found {found}", self.field)
            }
            Problem::NotAllowed { value, allowed } => write!(
                f,
                "{}: '{value}' is not one of [{}]",
                self.field,
                allowed.join(", ")
            ),
            Problem::OutOfRange { value, min, max } => {
                write!(f, "{}: {value} is outside [{min}, {max}]", self.field)
            }
            Problem::Unparseable { message } => {
                write!(f, "{}: response is not valid JSON ({message})", self.field)
            }
            Problem::Rule { message } => write!(f, "{}: {message}", self.field),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw text → typed value
// ---------------------------------------------------------------------------

/// Locates the outermost JSON object in free-form model output.
///
/// Models wrap JSON in markdown fences or prose; everything outside the first
/// `{` and the last `}` is discarded.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Parses raw model output, validates it against `schema`, and deserialises it.
pub fn parse_structured<T: DeserializeOwned>(
    raw: &str,
    schema: &Schema,
) -> Result<T, ValidationError> {
    let unparseable = |message: String| {
        ValidationError::new(vec![Violation::new(ROOT, Problem::Unparseable { message })])
    };

    let text = extract_json(raw).ok_or_else(|| unparseable("no JSON object found".into()))?;
    let value: Value = serde_json::from_str(text).map_err(|e| unparseable(e.to_string()))?;
    schema.validate(&value)?;
    serde_json::from_value(value).map_err(|e| {
        ValidationError::new(vec![Violation::rule(
            ROOT,
            format!("response does not match the expected shape ({e})"),
        )])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Spec {
        title: String,
        target_audience: String,
        required_responses: u32,
        tags: Option<Vec<String>>,
    }

    fn spec_schema() -> Schema {
        Schema::new()
            .required("title", FieldType::String)
            .required("target_audience", FieldType::String)
            .required("required_responses", FieldType::Count)
            .optional("tags", FieldType::array_of(FieldType::String))
    }

    fn question_schema() -> Schema {
        Schema::new().required(
            "questions",
            FieldType::array_of(FieldType::Object(
                Schema::new()
                    .required("text", FieldType::String)
                    .required(
                        "type",
                        FieldType::one_of(["multiple_choice", "text", "rating", "boolean"]),
                    ),
            )),
        )
    }

    #[test]
    fn missing_required_field_is_reported_by_name() {
        let raw = r#"{"title": "Remote work", "required_responses": 200}"#;
        let err = parse_structured::<Spec>(raw, &spec_schema()).unwrap_err();
        assert_eq!(err.fields(), vec!["target_audience"]);
    }

    #[test]
    fn every_violation_is_listed_not_just_the_first() {
        let raw = r#"{"title": 7, "required_responses": "many", "tags": ["a", 3]}"#;
        let err = parse_structured::<Spec>(raw, &spec_schema()).unwrap_err();
        assert_eq!(
            err.fields(),
            vec!["title", "target_audience", "required_responses", "tags[1]"]
        );
    }

    #[test]
    fn enum_and_nested_paths_are_precise() {
        let value = json!({
            "questions": [
                {"text": "How often?", "type": "rating"},
                {"text": "Why?", "type": "essay"},
                {"type": "text"}
            ]
        });
        let err = question_schema().validate(&value).unwrap_err();
        assert_eq!(err.fields(), vec!["questions[1].type", "questions[2].text"]);
        assert!(matches!(
            &err.violations()[0].problem,
            Problem::NotAllowed { value, .. } if value == "essay"
        ));
    }

    #[test]
    fn fenced_output_with_prose_is_accepted() {
        let raw = "Here you go:\n```json\n{\"title\": \"T\", \"target_audience\": \"adults\", \"required_responses\": 50}\n```\nThanks!";
        let spec: Spec = parse_structured(raw, &spec_schema()).unwrap();
        assert_eq!(spec.required_responses, 50);
        assert_eq!(spec.tags, None);
    }

    #[test]
    fn non_json_output_is_a_root_violation() {
        let err = parse_structured::<Spec>("I cannot help with that.", &spec_schema()).unwrap_err();
        assert_eq!(err.fields(), vec![ROOT]);
    }

    #[test]
    fn negative_count_is_reported_at_its_field() {
        let raw = r#"{"title": "T", "target_audience": "adults", "required_responses": -5}"#;
        let err = parse_structured::<Spec>(raw, &spec_schema()).unwrap_err();
        assert_eq!(err.fields(), vec!["required_responses"]);
        assert!(matches!(
            &err.violations()[0].problem,
            Problem::OutOfRange { value, .. } if value == "-5"
        ));
    }

    #[test]
    fn count_above_u32_is_reported_at_its_field() {
        let raw = r#"{"title": "T", "target_audience": "adults", "required_responses": 4294967296}"#;
        let err = parse_structured::<Spec>(raw, &spec_schema()).unwrap_err();
        assert_eq!(err.fields(), vec!["required_responses"]);
        assert_eq!(
            err.violations()[0].to_string(),
            "required_responses: 4294967296 is outside [0, 4294967295]"
        );
    }

    #[test]
    fn null_optional_fields_are_accepted() {
        let value = json!({"title": "T", "target_audience": "a", "required_responses": 1, "tags": null});
        assert!(spec_schema().validate(&value).is_ok());
    }

    #[test]
    fn hint_lists_required_fields_and_enums() {
        let hint = question_schema().hint();
        assert_eq!(hint["required"], json!(["questions"]));
        assert_eq!(
            hint["properties"]["questions"]["items"]["properties"]["type"]["enum"][0],
            "multiple_choice"
        );
    }
}
