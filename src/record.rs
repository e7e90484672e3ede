//! Records: one spreadsheet row as a field-name → value mapping.
//!
//! A [`Record`] is the substitution context for one instance of the
//! template's repeating block. Lookups of unknown fields are not errors:
//! [`Record::text`] returns an empty string, which is exactly what a
//! placeholder with no matching column should render as.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar cell value.
///
/// Dates are carried as already-formatted text; see
/// [`crate::pipeline::extract`] for the formatting rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            // f64's Display already drops the ".0" of integral values: 95.0 → "95".
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Bool(true) => f.write_str("TRUE"),
            FieldValue::Bool(false) => f.write_str("FALSE"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// One row of tabular input.
///
/// Field order carries no meaning; a `BTreeMap` keeps serialised output stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Rendered text of a field; empty when the field is absent.
    pub fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Return a copy of this record with one extra (or replaced) field.
    #[must_use]
    pub fn with_field(&self, name: impl Into<String>, value: impl Into<FieldValue>) -> Record {
        let mut fields = self.fields.clone();
        fields.insert(name.into(), value.into());
        Record { fields }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn insert(&mut self, name: String, value: FieldValue) {
        self.fields.insert(name, value);
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_renders_empty() {
        let r: Record = [("姓名", "王小明")].into_iter().collect();
        assert_eq!(r.text("姓名"), "王小明");
        assert_eq!(r.text("性別"), "");
        assert!(r.get("性別").is_none());
    }

    #[test]
    fn integral_numbers_have_no_fraction() {
        assert_eq!(FieldValue::Number(95.0).to_string(), "95");
        assert_eq!(FieldValue::Number(90.5).to_string(), "90.5");
        assert_eq!(FieldValue::Bool(true).to_string(), "TRUE");
    }

    #[test]
    fn with_field_leaves_original_untouched() {
        let original: Record = [("a", "1")].into_iter().collect();
        let derived = original.with_field("b", "2");
        assert_eq!(original.len(), 1);
        assert_eq!(derived.len(), 2);
        assert_eq!(derived.text("b"), "2");
    }

    #[test]
    fn serialises_as_plain_object() {
        let r: Record = [("n", FieldValue::Number(3.0)), ("s", "x".into())]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"n":3.0,"s":"x"}"#);
    }
}
