//! Form decoding: raw `application/x-www-form-urlencoded` bodies into typed
//! records.
//!
//! Each record type gets a [`FormDecoder`] built once at startup from an
//! explicit table of `(field name, setter)` bindings. Decoding only converts
//! types; validation is a separate pass over the decoded record.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The request body is not a well-formed form payload.
    #[error("malformed form body: {0}")]
    Malformed(String),

    #[error("missing form field '{0}'")]
    MissingField(String),

    #[error("invalid value for form field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// The decoder itself was declared wrongly. Never caused by user input.
    #[error("undecodable form target: {0}")]
    InvalidTarget(String),
}

impl DecodeError {
    /// Client errors answer 400; anything else is a programming error.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DecodeError::InvalidTarget(_))
    }
}

/// Submitted form fields, keyed by name. Repeated keys keep every value in
/// submission order.
#[derive(Debug, Clone, Default)]
pub struct RawForm {
    values: HashMap<String, Vec<String>>,
}

impl RawForm {
    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(body)
            .map_err(|e| DecodeError::Malformed(format!("body is not UTF-8: {}", e)))?;

        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Ok(Self { values })
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawForm {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in iter {
            values.entry(k.into()).or_default().push(v.into());
        }
        Self { values }
    }
}

/// Conversion from one submitted string to a field's semantic type.
pub trait FromFormValue: Sized {
    fn from_form_value(raw: &str) -> Result<Self, String>;
}

impl FromFormValue for String {
    fn from_form_value(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl FromFormValue for i64 {
    fn from_form_value(raw: &str) -> Result<Self, String> {
        raw.trim()
            .parse()
            .map_err(|_| format!("'{}' is not an integer", raw))
    }
}

type Setter<T> = Box<dyn Fn(&mut T, &str) -> Result<(), String> + Send + Sync>;

struct FieldBinding<T> {
    name: &'static str,
    required: bool,
    set: Setter<T>,
}

/// Declarative mapping from form field names onto a record of type `T`.
pub struct FormDecoder<T> {
    fields: Vec<FieldBinding<T>>,
}

impl<T> fmt::Debug for FormDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormDecoder")
            .field(
                "fields",
                &self.fields.iter().map(|b| b.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub struct FormDecoderBuilder<T> {
    fields: Vec<FieldBinding<T>>,
}

impl<T: 'static> FormDecoderBuilder<T> {
    /// Bind a field that must be present in every submission.
    pub fn field<V, F>(self, name: &'static str, set: F) -> Self
    where
        V: FromFormValue + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.bind(name, true, set)
    }

    /// Bind a field that keeps the record's default when absent.
    pub fn optional<V, F>(self, name: &'static str, set: F) -> Self
    where
        V: FromFormValue + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.bind(name, false, set)
    }

    fn bind<V, F>(mut self, name: &'static str, required: bool, set: F) -> Self
    where
        V: FromFormValue + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.fields.push(FieldBinding {
            name,
            required,
            set: Box::new(move |record: &mut T, raw: &str| {
                let value = V::from_form_value(raw)?;
                set(record, value);
                Ok(())
            }),
        });
        self
    }

    pub fn build(self) -> Result<FormDecoder<T>, DecodeError> {
        if self.fields.is_empty() {
            return Err(DecodeError::InvalidTarget(
                "decoder declares no fields".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for binding in &self.fields {
            if binding.name.trim().is_empty() {
                return Err(DecodeError::InvalidTarget(
                    "field name must not be empty".to_string(),
                ));
            }
            if !seen.insert(binding.name) {
                return Err(DecodeError::InvalidTarget(format!(
                    "field '{}' is bound twice",
                    binding.name
                )));
            }
        }
        Ok(FormDecoder {
            fields: self.fields,
        })
    }
}

impl<T: 'static> FormDecoder<T> {
    pub fn builder() -> FormDecoderBuilder<T> {
        FormDecoderBuilder { fields: Vec::new() }
    }

    /// Populate `record` from `form`, starting from the caller's defaults.
    /// Fields not declared by this decoder are ignored.
    pub fn decode_into(&self, form: &RawForm, mut record: T) -> Result<T, DecodeError> {
        for binding in &self.fields {
            match form.first(binding.name) {
                Some(raw) => {
                    (binding.set)(&mut record, raw).map_err(|reason| {
                        DecodeError::InvalidValue {
                            field: binding.name.to_string(),
                            reason,
                        }
                    })?;
                }
                None if binding.required => {
                    return Err(DecodeError::MissingField(binding.name.to_string()));
                }
                None => {}
            }
        }
        Ok(record)
    }

    pub fn decode(&self, form: &RawForm) -> Result<T, DecodeError>
    where
        T: Default,
    {
        self.decode_into(form, T::default())
    }
}
