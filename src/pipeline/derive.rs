//! Field derivation: attach computed fields to records before rendering.
//!
//! A [`RuleSet`] reads one classifying ("case") field, walks its rules in
//! order, and stores the first matching rule's filled-in template under a
//! target field. No match stores an empty string. New cases are new rules,
//! not new code paths.
//!
//! Derivation never fails and never looks at more than one record at a time.

use crate::error::MergeError;
use crate::pipeline::placeholder;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Predicate over the classifying field's (trimmed) text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMatch {
    /// The case value equals this string exactly.
    Equals(String),
    /// The case value is one of these strings.
    OneOf(Vec<String>),
    /// Always matches; put it last as a catch-all.
    Any,
}

impl CaseMatch {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            CaseMatch::Equals(s) => s == value,
            CaseMatch::OneOf(options) => options.iter().any(|s| s == value),
            CaseMatch::Any => true,
        }
    }
}

/// One `(predicate, template)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationRule {
    pub when: CaseMatch,
    /// Text with `{field}` placeholders resolved against the same record.
    pub template: String,
}

impl DerivationRule {
    pub fn equals(case: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            when: CaseMatch::Equals(case.into()),
            template: template.into(),
        }
    }
}

/// An ordered rule list bound to a classifying field and a target field.
///
/// # Example
/// ```rust
/// use docmerge::{DerivationRule, Record, RuleSet};
///
/// let rules = RuleSet::new("結果", "說明")
///     .rule(DerivationRule::equals("合格", "{車號}檢驗合格"));
/// let record: Record = [("結果", "合格"), ("車號", "ABC-123")].into_iter().collect();
/// assert_eq!(rules.derive(&record).text("說明"), "ABC-123檢驗合格");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub case_field: String,
    pub target_field: String,
    #[serde(default)]
    pub rules: Vec<DerivationRule>,
}

impl RuleSet {
    pub fn new(case_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            case_field: case_field.into(),
            target_field: target_field.into(),
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn rule(mut self, rule: DerivationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The derived value for `record`: first matching rule wins, else `""`.
    pub fn resolve(&self, record: &Record) -> String {
        let case = record.text(&self.case_field);
        let case = case.trim();
        self.rules
            .iter()
            .find(|r| r.when.matches(case))
            .map(|r| placeholder::fill(&r.template, record))
            .unwrap_or_default()
    }

    /// A new record carrying the derived field.
    pub fn derive(&self, record: &Record) -> Record {
        record.with_field(self.target_field.clone(), self.resolve(record))
    }

    /// Parse a rule set from JSON.
    pub fn from_json(json: &str) -> Result<Self, MergeError> {
        Self::parse(json).map_err(|e| MergeError::InvalidConfig(format!("rule set: {e}")))
    }

    /// Load a JSON rule set from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MergeError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json = std::fs::read_to_string(path)
            .map_err(|_| MergeError::InputNotFound { name: name.clone() })?;
        Self::parse(&json).map_err(|e| MergeError::InvalidConfig(format!("{name}: {e}")))
    }

    fn parse(json: &str) -> Result<Self, String> {
        let set: RuleSet = serde_json::from_str(json).map_err(|e| e.to_string())?;
        set.validate().map_err(|e| e.to_string())?;
        Ok(set)
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.case_field.is_empty() || self.target_field.is_empty() {
            return Err("rule set needs non-empty case_field and target_field");
        }
        Ok(())
    }
}

/// Apply each rule set in turn to every record.
pub fn derive_all(rule_sets: &[RuleSet], records: Vec<Record>) -> Vec<Record> {
    if rule_sets.is_empty() {
        return records;
    }
    debug!(
        "Deriving {} field(s) for {} records",
        rule_sets.len(),
        records.len()
    );
    records
        .iter()
        .map(|record| {
            rule_sets
                .iter()
                .fold(record.clone(), |acc, set| set.derive(&acc))
        })
        .collect()
}
