//! Structured response parsing: raw model text to a typed result.
//!
//! Parsing is three gates in order: the text must contain a JSON object
//! (a surrounding Markdown code fence is tolerated), the object must satisfy
//! the step's JSON Schema, and it must deserialize into the target type.

use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("model returned an empty response")]
    Empty,
    #[error("model response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model response violates the {schema} schema:\n- {}", .violations.join("\n- "))]
    Schema {
        schema: String,
        violations: Vec<String>,
    },
    #[error("model response does not match {target}: {message}")]
    Shape {
        target: &'static str,
        message: String,
    },
}

/// A compiled result schema.
pub struct ResultSchema {
    name: String,
    validator: Validator,
}

impl ResultSchema {
    /// Compile a schema document.
    pub fn compile(name: impl Into<String>, schema: &Value) -> anyhow::Result<Self> {
        let name = name.into();
        let validator = jsonschema::validator_for(schema)
            .map_err(|err| anyhow::anyhow!("invalid {name} schema: {err}"))?;
        Ok(Self { name, validator })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse `raw` model output into `T`.
    pub fn parse<T: DeserializeOwned>(&self, raw: &str) -> Result<T, ParseError> {
        let body = strip_code_fence(raw);
        if body.is_empty() {
            return Err(ParseError::Empty);
        }
        let value: Value = serde_json::from_str(body)?;
        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(ParseError::Schema {
                schema: self.name.clone(),
                violations,
            });
        }
        serde_json::from_value(value).map_err(|err| ParseError::Shape {
            target: std::any::type_name::<T>(),
            message: err.to_string(),
        })
    }
}

/// Remove a single surrounding Markdown code fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. "json") on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return trimmed,
    };
    rest.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Code, FinalReport};
    use serde_json::json;

    fn code_schema() -> ResultSchema {
        let schema = json!({
            "type": "object",
            "required": ["source", "dependencies"],
            "properties": {
                "source": {"type": "string", "minLength": 1},
                "dependencies": {"type": "array", "items": {"type": "string"}},
                "resources": {"type": "array", "items": {"type": "string"}}
            }
        });
        ResultSchema::compile("code", &schema).expect("compile")
    }

    #[test]
    fn parses_plain_json() {
        let code: Code = code_schema()
            .parse(r#"{"source": "print(1)", "dependencies": ["pulp"]}"#)
            .expect("parse");
        assert_eq!(code.source, "print(1)");
        assert!(code.resources.is_empty());
    }

    #[test]
    fn tolerates_fenced_json() {
        let raw = "```json\n{\"source\": \"x = 1\", \"dependencies\": []}\n```\n";
        let code: Code = code_schema().parse(raw).expect("parse");
        assert_eq!(code.source, "x = 1");
    }

    #[test]
    fn rejects_empty_output() {
        let err = code_schema().parse::<Code>("  \n").unwrap_err();
        assert!(matches!(err, ParseError::Empty));
    }

    #[test]
    fn rejects_truncated_json() {
        let err = code_schema()
            .parse::<Code>(r#"{"source": "print(1)", "depend"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn reports_schema_violations() {
        let err = code_schema()
            .parse::<Code>(r#"{"source": "", "dependencies": "pulp"}"#)
            .unwrap_err();
        match err {
            ParseError::Schema { schema, violations } => {
                assert_eq!(schema, "code");
                assert_eq!(violations.len(), 2);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn reports_shape_mismatch_after_schema_pass() {
        let permissive = ResultSchema::compile("report", &json!({"type": "object"})).expect("compile");
        let err = permissive
            .parse::<FinalReport>(r#"{"index_of_optimization": -1, "reason": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::Shape { .. }));
    }

    #[test]
    fn unterminated_fence_is_left_alone() {
        assert_eq!(strip_code_fence("```json"), "```json");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
