//! Error types for the docmerge library.
//!
//! Every failure is fatal for the job it belongs to: a merge either produces
//! all requested artifacts or none of them. [`MergeError::stage`] tells the
//! caller which pipeline stage gave up, so a front end can point the user at
//! the input that needs fixing (the spreadsheet, the template, or the
//! converter installation).
//!
//! Messages name inputs by file name only. Job working directories live
//! under a process-wide root and are never spelled out in an error.

use crate::output::JobState;
use thiserror::Error;

/// All fatal errors returned by the docmerge library.
#[derive(Debug, Error)]
pub enum MergeError {
    // ── Extraction ────────────────────────────────────────────────────────
    /// The tabular source yielded no usable rows.
    #[error("No data to merge from '{source_name}': {reason}")]
    NoData {
        source_name: String,
        reason: NoDataReason,
    },

    // ── Rendering ─────────────────────────────────────────────────────────
    /// The template's repeating block is missing, unmatched, nested or misplaced.
    #[error("Template '{template}' is malformed: {detail}")]
    TemplateMalformed { template: String, detail: String },

    /// The DOCX container could not be parsed or reassembled.
    #[error("Failed to render '{template}': {detail}")]
    Render { template: String, detail: String },

    // ── Conversion ────────────────────────────────────────────────────────
    /// The external converter failed, timed out, or produced no artifact.
    ///
    /// `diagnostic` carries the tool's own output with job paths scrubbed.
    #[error("Conversion to {format} failed: {diagnostic}")]
    Conversion { format: String, diagnostic: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// An input file could not be read.
    #[error("Input file not found or unreadable: '{name}'")]
    InputNotFound { name: String },

    /// Could not write an artifact into the job workspace.
    #[error("Failed to write output '{name}': {source}")]
    OutputWriteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed, or a rule file could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, workspace creation failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MergeError {
    /// The pipeline stage this error belongs to, if it is stage-specific.
    pub fn stage(&self) -> Option<JobState> {
        match self {
            MergeError::NoData { .. } => Some(JobState::Extracting),
            MergeError::TemplateMalformed { .. } | MergeError::Render { .. } => {
                Some(JobState::Rendering)
            }
            MergeError::Conversion { .. } => Some(JobState::ConversionRequested),
            _ => None,
        }
    }

    pub(crate) fn malformed(template: &str, detail: impl Into<String>) -> Self {
        MergeError::TemplateMalformed {
            template: template.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn render(template: &str, detail: impl std::fmt::Display) -> Self {
        MergeError::Render {
            template: template.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Why the extractor found nothing to merge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoDataReason {
    /// The requested sheet does not exist in the workbook.
    #[error("sheet '{sheet}' not found (available: {})", .available.join(", "))]
    SheetMissing {
        sheet: String,
        available: Vec<String>,
    },

    /// The sheet exists but has a header row at most.
    #[error("sheet '{sheet}' contains no data rows")]
    NoRows { sheet: String },

    /// The bytes are neither a readable workbook nor UTF-8 CSV.
    #[error("unreadable tabular data: {0}")]
    Unreadable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_display_lists_available_sheets() {
        let e = MergeError::NoData {
            source_name: "data.xlsx".into(),
            reason: NoDataReason::SheetMissing {
                sheet: "sheet1".into(),
                available: vec!["名冊".into(), "備註".into()],
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("data.xlsx"), "got: {msg}");
        assert!(msg.contains("名冊, 備註"), "got: {msg}");
    }

    #[test]
    fn stages_follow_the_taxonomy() {
        let no_data = MergeError::NoData {
            source_name: "x.csv".into(),
            reason: NoDataReason::NoRows {
                sheet: "sheet1".into(),
            },
        };
        assert_eq!(no_data.stage(), Some(JobState::Extracting));
        assert_eq!(
            MergeError::malformed("t.docx", "no block").stage(),
            Some(JobState::Rendering)
        );
        assert_eq!(
            MergeError::render("t.docx", "bad zip").stage(),
            Some(JobState::Rendering)
        );
        let conversion = MergeError::Conversion {
            format: "pdf".into(),
            diagnostic: "exit 1".into(),
        };
        assert_eq!(conversion.stage(), Some(JobState::ConversionRequested));
        assert_eq!(MergeError::Internal("boom".into()).stage(), None);
    }

    #[test]
    fn conversion_display_carries_diagnostic() {
        let e = MergeError::Conversion {
            format: "pdf".into(),
            diagnostic: "source file could not be loaded".into(),
        };
        assert!(e.to_string().contains("source file could not be loaded"));
        assert!(e.to_string().contains("pdf"));
    }
}
