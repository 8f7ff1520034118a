//! Per-parameter schema: coercion, defaults, and validation constraints
//! (spec §4.1 step 4, Design Notes §9).
//!
//! Secrecy is a field on the schema itself rather than a runtime-reflected
//! prototype extension, so the dispatcher's redaction pass (step 8) never
//! has to guess which fields to mask.

use serde_json::Value;

/// The declared type a raw parameter is coerced into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Kept as a JSON string.
    String,
    /// Coerced from a numeric-looking string or JSON number.
    Number,
    /// Coerced from `"true"`/`"false"` or a JSON bool.
    Boolean,
    /// Left untouched; schema constraints other than required/default don't
    /// apply.
    Any,
}

/// Constraints and coercion rules for one action parameter.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    pub(crate) param_type: ParamType,
    pub(crate) required: bool,
    pub(crate) secret: bool,
    pub(crate) default: Option<Value>,
    pub(crate) min: Option<f64>,
    pub(crate) max: Option<f64>,
    pub(crate) min_length: Option<usize>,
    pub(crate) max_length: Option<usize>,
    pub(crate) pattern: Option<regex::Regex>,
}

impl ParamSchema {
    /// Start a builder for a parameter of the given type, optional by
    /// default.
    #[must_use]
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: false,
            secret: false,
            default: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }

    /// Shorthand for `ParamSchema::new(ParamType::String)`.
    #[must_use]
    pub fn string() -> Self {
        Self::new(ParamType::String)
    }

    /// Shorthand for `ParamSchema::new(ParamType::Number)`.
    #[must_use]
    pub fn number() -> Self {
        Self::new(ParamType::Number)
    }

    /// Shorthand for `ParamSchema::new(ParamType::Boolean)`.
    #[must_use]
    pub fn boolean() -> Self {
        Self::new(ParamType::Boolean)
    }

    /// Reject dispatch with `ACTION_PARAM_REQUIRED` when this field is
    /// missing.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark this field's value as sensitive: redacted to `[[secret]]` in
    /// logs and in error payloads.
    #[must_use]
    pub const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Value substituted when the field is absent from `rawParams`.
    #[must_use]
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Minimum numeric value (inclusive).
    #[must_use]
    pub const fn min(mut self, value: f64) -> Self {
        self.min = Some(value);
        self
    }

    /// Maximum numeric value (inclusive).
    #[must_use]
    pub const fn max(mut self, value: f64) -> Self {
        self.max = Some(value);
        self
    }

    /// Minimum string length (inclusive).
    #[must_use]
    pub const fn min_length(mut self, value: usize) -> Self {
        self.min_length = Some(value);
        self
    }

    /// Maximum string length (inclusive).
    #[must_use]
    pub const fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(value);
        self
    }

    /// A regex the string value must fully match.
    #[must_use]
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = regex::Regex::new(pattern).ok();
        self
    }

    /// `true` if this field's value must never be logged or echoed
    /// verbatim.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        self.secret
    }
}

/// Outcome of validating one field, carrying enough detail to build the
/// `ACTION_PARAM_VALIDATION` / `ACTION_PARAM_REQUIRED` error (spec §4.1 step 4).
#[derive(Debug)]
pub enum FieldError {
    /// The field was required and absent.
    Missing,
    /// The field was present but failed a constraint or coercion.
    Invalid(String),
}

/// Coerce and validate `raw` against `schema`. Returns the coerced value, or
/// a [`FieldError`] describing why validation failed.
///
/// # Errors
///
/// Returns [`FieldError::Missing`] if the field is required and absent (after
/// applying `default`), or [`FieldError::Invalid`] if coercion or a
/// constraint fails.
pub fn coerce_and_validate(schema: &ParamSchema, raw: Option<&Value>) -> Result<Value, FieldError> {
    let value = match raw {
        Some(v) if !v.is_null() => v.clone(),
        _ => match &schema.default {
            Some(default) => default.clone(),
            None if schema.required => return Err(FieldError::Missing),
            None => return Ok(Value::Null),
        },
    };

    let coerced = coerce(schema.param_type, &value)?;
    validate_constraints(schema, &coerced)?;
    Ok(coerced)
}

fn coerce(param_type: ParamType, value: &Value) -> Result<Value, FieldError> {
    match param_type {
        ParamType::Any => Ok(value.clone()),
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(FieldError::Invalid("expected a string".to_string())),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| FieldError::Invalid("expected a number".to_string())),
            _ => Err(FieldError::Invalid("expected a number".to_string())),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => Err(FieldError::Invalid("expected a boolean".to_string())),
        },
    }
}

fn validate_constraints(schema: &ParamSchema, value: &Value) -> Result<(), FieldError> {
    if let Value::Number(n) = value {
        let n = n.as_f64().unwrap_or_default();
        if let Some(min) = schema.min {
            if n < min {
                return Err(FieldError::Invalid(format!("must be at least {min}")));
            }
        }
        if let Some(max) = schema.max {
            if n > max {
                return Err(FieldError::Invalid(format!("must be at most {max}")));
            }
        }
    }
    if let Value::String(s) = value {
        if let Some(min_length) = schema.min_length {
            if s.chars().count() < min_length {
                return Err(FieldError::Invalid(format!(
                    "must be at least {min_length} characters"
                )));
            }
        }
        if let Some(max_length) = schema.max_length {
            if s.chars().count() > max_length {
                return Err(FieldError::Invalid(format!(
                    "must be at most {max_length} characters"
                )));
            }
        }
        if let Some(pattern) = &schema.pattern {
            if !pattern.is_match(s) {
                return Err(FieldError::Invalid("does not match the required pattern".to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_missing_field_is_reported() {
        let schema = ParamSchema::string().required();
        assert!(matches!(coerce_and_validate(&schema, None), Err(FieldError::Missing)));
    }

    #[test]
    fn default_applies_when_absent() {
        let schema = ParamSchema::number().default(serde_json::json!(5));
        let value = coerce_and_validate(&schema, None).unwrap();
        assert_eq!(value, serde_json::json!(5.0));
    }

    #[test]
    fn min_length_rejects_short_strings() {
        let schema = ParamSchema::string().min_length(3);
        let err = coerce_and_validate(&schema, Some(&serde_json::json!("x"))).unwrap_err();
        assert!(matches!(err, FieldError::Invalid(_)));
    }

    #[test]
    fn string_coerces_numeric_input() {
        let schema = ParamSchema::number();
        let value = coerce_and_validate(&schema, Some(&serde_json::json!("42"))).unwrap();
        assert_eq!(value, serde_json::json!(42.0));
    }
}
