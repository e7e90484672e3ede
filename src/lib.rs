//! # docmerge
//!
//! Merge the rows of a spreadsheet into a Word template, one copy of the
//! template's repeating block per row, and optionally convert the result to
//! PDF with an office suite.
//!
//! ## Pipeline Overview
//!
//! ```text
//! xlsx / csv                         template.docx
//!  │                                      │
//!  ├─ 1. Extract  rows → records          │
//!  ├─ 2. Derive   rule-computed fields    │
//!  └─ 3. Render   {#records} … {/records} ┘  one instance per record,
//!        │                                   page break between instances
//!        ├─ <job>/merged.docx
//!        └─ 4. Convert (optional)  soffice --headless → <job>/merged.pdf
//! ```
//!
//! Every job gets its own UUID-named directory under
//! [`MergeConfig::work_root`]. A failed job removes it, so no partial output
//! survives.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docmerge::{merge, rules, ConverterSettings, MergeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MergeConfig::builder()
//!         .rule_set(rules::violation_rules())
//!         .conversion(ConverterSettings::default())
//!         .build()?;
//!     let output = merge("名冊.xlsx", "通知書.docx", &config).await?;
//!     println!("{} records → {}", output.records, output.document.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Template Syntax
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `{field}` / `{{field}}` | value of column `field`, empty if missing |
//! | `{#records}` | start of the repeating block (alone in its paragraph) |
//! | `{/records}` | end of the repeating block (alone in its paragraph) |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docmerge` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docmerge = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod rules;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConverterSettings, MergeConfig, MergeConfigBuilder, PageBreakPolicy, SecondaryFormat,
};
pub use error::{MergeError, NoDataReason};
pub use merge::{inspect_data, merge, merge_bytes, merge_sync, MergeInput};
pub use output::{ConversionOutcome, DataPreview, JobState, MergeOutput, MergeStats};
pub use pipeline::derive::{CaseMatch, DerivationRule, RuleSet};
pub use progress::{MergeProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{FieldValue, Record};
