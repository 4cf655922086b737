//! Column validators evaluated before every write.

use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Predicate half of a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "arg", rename_all = "snake_case")]
pub enum Rule {
    MinValue(f64),
    MaxValue(f64),
    MinLength(usize),
    MaxLength(usize),
    /// Text must match the regular expression
    Pattern(String),
    /// Text must contain at least one non-whitespace character
    NotBlank,
    OneOf(Vec<Value>),
}

/// A predicate paired with the message reported when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub rule: Rule,
    pub message: String,
}

impl Validator {
    pub fn new(rule: Rule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }

    pub fn min_value(min: f64) -> Self {
        Self::new(Rule::MinValue(min), format!("must be at least {min}"))
    }

    pub fn max_value(max: f64) -> Self {
        Self::new(Rule::MaxValue(max), format!("must be at most {max}"))
    }

    pub fn min_length(min: usize) -> Self {
        Self::new(Rule::MinLength(min), format!("must be at least {min} characters"))
    }

    pub fn max_length(max: usize) -> Self {
        Self::new(Rule::MaxLength(max), format!("must be at most {max} characters"))
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let message = format!("must match {pattern}");
        Self::new(Rule::Pattern(pattern), message)
    }

    pub fn not_blank() -> Self {
        Self::new(Rule::NotBlank, "may not be blank")
    }

    pub fn one_of(choices: Vec<Value>) -> Self {
        Self::new(Rule::OneOf(choices), "is not one of the allowed choices")
    }

    /// Replace the failure message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Returns `true` when `value` satisfies the rule.
    ///
    /// NULL always passes; nullability is checked by the column itself.
    /// A rule that does not apply to the value's kind (a length rule on an
    /// integer, say) fails.
    pub fn check(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match &self.rule {
            Rule::MinValue(min) => value.as_f64().is_some_and(|v| v >= *min),
            Rule::MaxValue(max) => value.as_f64().is_some_and(|v| v <= *max),
            Rule::MinLength(min) => text_len(value).is_some_and(|len| len >= *min),
            Rule::MaxLength(max) => text_len(value).is_some_and(|len| len <= *max),
            Rule::Pattern(pattern) => match (value.as_str(), Regex::new(pattern)) {
                (Some(s), Ok(re)) => re.is_match(s),
                _ => false,
            },
            Rule::NotBlank => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Rule::OneOf(choices) => choices.contains(value),
        }
    }

    /// Problems with the validator definition itself (bad regex).
    pub(crate) fn definition_error(&self) -> Option<String> {
        match &self.rule {
            Rule::Pattern(p) => Regex::new(p)
                .err()
                .map(|e| format!("invalid validator pattern '{p}': {e}")),
            _ => None,
        }
    }
}

fn text_len(value: &Value) -> Option<usize> {
    match value {
        Value::Text(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        _ => None,
    }
}
