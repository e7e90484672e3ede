//! Result types returned by the merge orchestrator.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a merge job. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Extracting,
    Deriving,
    Rendering,
    ConversionRequested,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Extracting => "extracting",
            JobState::Deriving => "deriving",
            JobState::Rendering => "rendering",
            JobState::ConversionRequested => "conversion_requested",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What happened to the secondary-format request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// No converter was configured.
    NotRequested,
    /// The artifact exists and is non-empty.
    Converted,
    /// Conversion failed and the job was allowed to finish without it.
    Failed { diagnostic: String },
}

/// A finished merge job. Both paths live inside the job's own directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutput {
    /// UUID v4 naming the job directory.
    pub job_id: String,
    /// The merged DOCX.
    pub document: PathBuf,
    /// The converted artifact, when conversion succeeded.
    pub converted: Option<PathBuf>,
    pub conversion: ConversionOutcome,
    /// Block instances in the document, equal to the extracted row count.
    pub records: usize,
    pub stats: MergeStats,
    /// Always [`JobState::Done`]; failures come back as errors.
    pub state: JobState,
}

/// Timing and size figures for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub extract_ms: u64,
    pub render_ms: u64,
    pub convert_ms: Option<u64>,
    pub total_ms: u64,
    pub document_bytes: u64,
    pub page_breaks: usize,
    /// Block placeholders that no record has a field for. They render empty.
    pub unmatched_placeholders: Vec<String>,
}

/// Result of [`crate::merge::inspect_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPreview {
    pub source_name: String,
    pub sheet: String,
    /// Field names after duplicate/empty header resolution.
    pub headers: Vec<String>,
    pub records: usize,
    /// The first few records, derived fields included.
    pub sample: Vec<Record>,
}
