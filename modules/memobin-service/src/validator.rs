//! Field-level validation state and reusable predicates.
//!
//! Form records own a [`ValidationState`] and run their rule set against it.
//! Only the first message registered for a field is kept, so rule sets list
//! general checks (blank) before specific ones (length, pattern).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// Shape of an email address as accepted at signup and login.
pub static EMAIL_RX: Lazy<FullMatch> = Lazy::new(|| {
    FullMatch::new(
        r"[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*",
    )
    .expect("email pattern is valid")
});

/// A pattern that only accepts the whole input. Anchoring happens at
/// construction, so alternations like `a|ab` still match `"ab"`.
#[derive(Debug, Clone)]
pub struct FullMatch(Regex);

impl FullMatch {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!(r"^(?:{})$", pattern)).map(Self)
    }
}

/// Errors collected during one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationState {
    pub field_errors: HashMap<String, String>,
    pub non_field_errors: Vec<String>,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no error, field-specific or not, has been registered.
    pub fn valid(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    /// Record `message` for `field` unless the field already has one.
    pub fn add_field_error(&mut self, field: &str, message: &str) {
        self.field_errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn add_non_field_error(&mut self, message: &str) {
        self.non_field_errors.push(message.to_string());
    }

    pub fn check_field(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_field_error(field, message);
        }
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.field_errors.get(field).map(String::as_str)
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Length bounds count Unicode scalar values, not bytes.
pub fn max_chars(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

pub fn min_chars(value: &str, n: usize) -> bool {
    value.chars().count() >= n
}

pub fn permitted_value<T: PartialEq>(value: T, permitted: &[T]) -> bool {
    permitted.contains(&value)
}

pub fn matches(value: &str, pattern: &FullMatch) -> bool {
    pattern.0.is_match(value)
}
