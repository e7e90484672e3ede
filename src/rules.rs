//! Built-in derivation rule presets.
//!
//! These are ordinary [`RuleSet`] values: the same rules can be written as
//! JSON and passed with `--rules`. Presets exist so the common notice
//! templates work without a rule file.

use crate::pipeline::derive::{DerivationRule, RuleSet};

/// Classifying field of [`violation_rules`].
pub const VIOLATION_CASE_FIELD: &str = "違規態樣";

/// Derived field written by [`violation_rules`].
pub const VIOLATION_FACT_FIELD: &str = "違規事實";

/// Emission-test result exceeded the control standard.
pub const EXCEEDED_TEMPLATE: &str = "車牌號碼{車牌號碼}之車輛於{違反時間}經檢驗，\
檢驗結果為{檢驗結果}，超過管制標準{管制標準}。";

/// Vehicle was summoned for testing and did not show up.
pub const NOT_PRESENTED_TEMPLATE: &str =
    "車牌號碼{車牌號碼}之車輛經通知應於{違反時間}前到檢，逾期未到檢。";

/// Violation-notice rules: `超標` and `未到檢` cases, anything else empty.
pub fn violation_rules() -> RuleSet {
    RuleSet::new(VIOLATION_CASE_FIELD, VIOLATION_FACT_FIELD)
        .rule(DerivationRule::equals("超標", EXCEEDED_TEMPLATE))
        .rule(DerivationRule::equals("未到檢", NOT_PRESENTED_TEMPLATE))
}
