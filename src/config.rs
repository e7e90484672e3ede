//! Configuration types for merge jobs.
//!
//! All job behaviour is controlled through [`MergeConfig`], built via its
//! [`MergeConfigBuilder`]. One config can drive any number of concurrent
//! jobs: it is read-only once built and holds no per-job state.

use crate::error::MergeError;
use crate::pipeline::derive::RuleSet;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for a merge job.
///
/// Built via [`MergeConfig::builder()`] or using [`MergeConfig::default()`].
///
/// # Example
/// ```rust
/// use docmerge::{ConverterSettings, MergeConfig, PageBreakPolicy};
///
/// let config = MergeConfig::builder()
///     .sheet("名冊")
///     .page_breaks(PageBreakPolicy::AfterEveryRecord)
///     .conversion(ConverterSettings::default())
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct MergeConfig {
    /// Worksheet to read. Default: `"sheet1"` (matched case-insensitively
    /// when there is no exact match). Ignored for CSV input.
    pub sheet: String,

    /// Name of the repeating block, i.e. the `records` in `{#records}`.
    /// Default: `"records"`.
    pub block_name: String,

    /// Where page breaks go. Default: [`PageBreakPolicy::BetweenRecords`].
    pub page_breaks: PageBreakPolicy,

    /// Turn `\n` in values into Word line breaks. Default: true.
    pub line_breaks: bool,

    /// Derived-field rule sets, applied in order to every record. Default: none.
    pub rules: Vec<RuleSet>,

    /// Secondary-format conversion. `None` (default) skips conversion.
    pub conversion: Option<ConverterSettings>,

    /// Keep the merged DOCX when conversion fails. Default: true.
    ///
    /// When true a conversion failure leaves the rendered document
    /// in place and the job ends `Done` with
    /// [`crate::output::ConversionOutcome::Failed`]. When false it fails the
    /// whole job and no artifact survives.
    pub allow_conversion_failure: bool,

    /// Parent of every job directory. Default: `<tmp>/docmerge`.
    pub work_root: PathBuf,

    /// File stem of the artifacts inside a job directory. Default: `"merged"`.
    pub output_stem: String,

    /// Optional per-job progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            sheet: "sheet1".to_string(),
            block_name: "records".to_string(),
            page_breaks: PageBreakPolicy::default(),
            line_breaks: true,
            rules: Vec::new(),
            conversion: None,
            allow_conversion_failure: true,
            work_root: std::env::temp_dir().join("docmerge"),
            output_stem: "merged".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MergeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeConfig")
            .field("sheet", &self.sheet)
            .field("block_name", &self.block_name)
            .field("page_breaks", &self.page_breaks)
            .field("line_breaks", &self.line_breaks)
            .field("rules", &self.rules.len())
            .field("conversion", &self.conversion)
            .field("allow_conversion_failure", &self.allow_conversion_failure)
            .field("work_root", &self.work_root)
            .field("output_stem", &self.output_stem)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn MergeProgressCallback>"),
            )
            .finish()
    }
}

impl MergeConfig {
    /// Create a new builder for `MergeConfig`.
    pub fn builder() -> MergeConfigBuilder {
        MergeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`MergeConfig`].
#[derive(Debug)]
pub struct MergeConfigBuilder {
    config: MergeConfig,
}

impl MergeConfigBuilder {
    pub fn sheet(mut self, sheet: impl Into<String>) -> Self {
        self.config.sheet = sheet.into();
        self
    }

    pub fn block_name(mut self, name: impl Into<String>) -> Self {
        self.config.block_name = name.into();
        self
    }

    pub fn page_breaks(mut self, policy: PageBreakPolicy) -> Self {
        self.config.page_breaks = policy;
        self
    }

    pub fn line_breaks(mut self, v: bool) -> Self {
        self.config.line_breaks = v;
        self
    }

    /// Append one rule set; later sets see fields derived by earlier ones.
    pub fn rule_set(mut self, rules: RuleSet) -> Self {
        self.config.rules.push(rules);
        self
    }

    pub fn rules(mut self, rules: Vec<RuleSet>) -> Self {
        self.config.rules = rules;
        self
    }

    pub fn conversion(mut self, settings: ConverterSettings) -> Self {
        self.config.conversion = Some(settings);
        self
    }

    pub fn allow_conversion_failure(mut self, v: bool) -> Self {
        self.config.allow_conversion_failure = v;
        self
    }

    pub fn work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_root = dir.into();
        self
    }

    pub fn output_stem(mut self, stem: impl Into<String>) -> Self {
        self.config.output_stem = stem.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MergeConfig, MergeError> {
        let c = &self.config;
        if c.sheet.trim().is_empty() {
            return Err(MergeError::InvalidConfig("Sheet name must not be empty".into()));
        }
        if c.block_name.is_empty()
            || c
                .block_name
                .chars()
                .any(|ch| ch.is_whitespace() || "{}#/".contains(ch))
        {
            return Err(MergeError::InvalidConfig(format!(
                "Block name must be a plain word, got '{}'",
                c.block_name
            )));
        }
        if c.output_stem.is_empty()
            || c.output_stem == "."
            || c.output_stem == ".."
            || c.output_stem.contains(['/', '\\'])
        {
            return Err(MergeError::InvalidConfig(format!(
                "Output name must be a bare file stem, got '{}'",
                c.output_stem
            )));
        }
        for set in &c.rules {
            set.validate()
                .map_err(|e| MergeError::InvalidConfig(e.to_string()))?;
        }
        if let Some(conv) = &c.conversion {
            if conv.program.trim().is_empty() {
                return Err(MergeError::InvalidConfig(
                    "Converter program must not be empty".into(),
                ));
            }
            if conv.timeout_secs == 0 {
                return Err(MergeError::InvalidConfig(
                    "Conversion timeout must be ≥ 1 second".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Converter settings ───────────────────────────────────────────────────

/// How to invoke the external office converter.
///
/// The command line is
/// `<program> [leading_args…] --headless --convert-to <format> --outdir <job dir>
/// [-env:UserInstallation=file://<job dir>/.lo-profile] <document>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterSettings {
    /// Executable name or path. Default: `"soffice"`.
    pub program: String,

    /// Arguments placed before the LibreOffice flags. Default: none.
    pub leading_args: Vec<String>,

    /// Wall-clock limit in seconds; the child is killed on expiry. Default: 120.
    pub timeout_secs: u64,

    /// Give each job its own LibreOffice user profile. Default: true.
    ///
    /// Two `soffice` processes sharing a profile lock each other out, so
    /// concurrent jobs need this on.
    pub isolate_profile: bool,

    /// Target format. Default: [`SecondaryFormat::Pdf`].
    pub format: SecondaryFormat,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            leading_args: Vec::new(),
            timeout_secs: 120,
            isolate_profile: true,
            format: SecondaryFormat::default(),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Placement of the page-break paragraphs between block instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageBreakPolicy {
    /// After every instance except the last: N records, N pages. (default)
    #[default]
    BetweenRecords,
    /// After every instance, including the last.
    AfterEveryRecord,
}

/// Formats the converter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecondaryFormat {
    #[default]
    Pdf,
}

impl SecondaryFormat {
    /// File extension, also the `--convert-to` argument.
    pub fn extension(&self) -> &'static str {
        match self {
            SecondaryFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for SecondaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = MergeConfig::default();
        assert_eq!(c.sheet, "sheet1");
        assert_eq!(c.block_name, "records");
        assert_eq!(c.page_breaks, PageBreakPolicy::BetweenRecords);
        assert!(c.line_breaks);
        assert!(c.conversion.is_none());
        assert!(c.allow_conversion_failure);
        assert_eq!(c.output_stem, "merged");
        assert!(c.work_root.ends_with("docmerge"));
    }

    #[test]
    fn converter_defaults() {
        let s = ConverterSettings::default();
        assert_eq!(s.program, "soffice");
        assert_eq!(s.timeout_secs, 120);
        assert!(s.isolate_profile);
        assert_eq!(s.format.to_string(), "pdf");
    }

    #[test]
    fn builder_rejects_bad_block_name() {
        for name in ["", "re cords", "#records", "{records}"] {
            assert!(
                MergeConfig::builder().block_name(name).build().is_err(),
                "accepted '{name}'"
            );
        }
    }

    #[test]
    fn builder_rejects_path_like_output_stem() {
        for stem in ["", "..", "a/b", "a\\b"] {
            assert!(MergeConfig::builder().output_stem(stem).build().is_err());
        }
        assert!(MergeConfig::builder().output_stem("通知書").build().is_ok());
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let settings = ConverterSettings {
            timeout_secs: 0,
            ..ConverterSettings::default()
        };
        let err = MergeConfig::builder().conversion(settings).build().unwrap_err();
        assert!(matches!(err, MergeError::InvalidConfig(_)));
    }

    #[test]
    fn builder_validates_rule_sets() {
        let err = MergeConfig::builder()
            .rule_set(RuleSet::new("", "x"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("case_field"));
    }

    #[test]
    fn converter_settings_deserialize_with_defaults() {
        let s: ConverterSettings = serde_json::from_str(r#"{ "timeout_secs": 30 }"#).unwrap();
        assert_eq!(s.timeout_secs, 30);
        assert_eq!(s.program, "soffice");
    }

    #[test]
    fn debug_hides_callback() {
        let debug = format!("{:?}", MergeConfig::default());
        assert!(debug.contains("progress_callback: None"));
    }
}
