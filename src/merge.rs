//! Merge-job entry points.
//!
//! A job runs its stages strictly in sequence:
//!
//! ```text
//! Extracting → Deriving → Rendering → (ConversionRequested) → Done
//!      └──────────┴───────────┴──────────────┴──────────────→ Failed
//! ```
//!
//! The first error ends the job in `Failed`. The job directory is removed on
//! that path, so a failed job never leaves a partial artifact behind. On
//! success the directory is kept and [`MergeOutput`] points into it.

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::output::{ConversionOutcome, DataPreview, JobState, MergeOutput, MergeStats};
use crate::pipeline::convert::convert_document;
use crate::pipeline::derive::derive_all;
use crate::pipeline::extract::{extract_headers, extract_records};
use crate::pipeline::render::{render, RenderOptions};
use crate::pipeline::template::Template;
use crate::pipeline::workspace::{write_atomic, JobWorkspace};
use crate::progress::ProgressCallback;
use crate::record::Record;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Records shown by [`inspect_data`].
const PREVIEW_RECORDS: usize = 5;

/// An input file held in memory, named for error messages.
#[derive(Debug, Clone)]
pub struct MergeInput {
    /// File name only; never a full path.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl MergeInput {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, keeping only its file name.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, MergeError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self { name, bytes }),
            Err(e) => {
                debug!("Cannot read '{}': {}", name, e);
                Err(MergeError::InputNotFound { name })
            }
        }
    }
}

/// Merge a spreadsheet into a DOCX template.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `data_path`     - workbook (xlsx, xls, ods, …) or CSV file
/// * `template_path` - DOCX with one `{#records}` … `{/records}` block
/// * `config`        - job configuration
///
/// # Errors
/// Every error is fatal for the job; see [`MergeError::stage`] for where it
/// happened.
pub async fn merge(
    data_path: impl AsRef<Path>,
    template_path: impl AsRef<Path>,
    config: &MergeConfig,
) -> Result<MergeOutput, MergeError> {
    let data = MergeInput::read(data_path).await?;
    let template = MergeInput::read(template_path).await?;
    merge_bytes(data, template, config).await
}

/// Merge in-memory inputs. Each call is an independent job with its own
/// working directory, so calls may run concurrently.
pub async fn merge_bytes(
    data: MergeInput,
    template: MergeInput,
    config: &MergeConfig,
) -> Result<MergeOutput, MergeError> {
    let workspace = JobWorkspace::create(&config.work_root)?;
    let events = JobEvents {
        job_id: workspace.id(),
        callback: config.progress_callback.clone(),
    };
    let span = info_span!("merge_job", job = %events.job_id);

    let result = run_job(data, template, config, workspace, &events)
        .instrument(span.clone())
        .await;

    span.in_scope(|| match &result {
        Ok(output) => {
            events.enter(JobState::Done);
            if let Some(cb) = &events.callback {
                cb.on_job_complete(output.records, output.converted.is_some());
            }
            info!(
                "Job done: {} records, {}ms total",
                output.records, output.stats.total_ms
            );
        }
        Err(e) => {
            events.enter(JobState::Failed);
            if let Some(cb) = &events.callback {
                cb.on_job_failed(&e.to_string());
            }
            warn!("Job failed: {}", e);
        }
    });
    result
}

/// Synchronous wrapper around [`merge`].
///
/// Creates a temporary tokio runtime internally.
pub fn merge_sync(
    data_path: impl AsRef<Path>,
    template_path: impl AsRef<Path>,
    config: &MergeConfig,
) -> Result<MergeOutput, MergeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MergeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(merge(data_path, template_path, config))
}

/// Read and derive records without rendering anything.
///
/// Needs no template and creates no job directory.
pub async fn inspect_data(
    data_path: impl AsRef<Path>,
    config: &MergeConfig,
) -> Result<DataPreview, MergeError> {
    let data = MergeInput::read(data_path).await?;
    let sheet = config.sheet.clone();
    let rules = config.rules.clone();

    tokio::task::spawn_blocking(move || {
        let headers = extract_headers(&data.bytes, &data.name, &sheet)?;
        let records = extract_records(&data.bytes, &data.name, &sheet)?;
        let total = records.len();
        let sample = derive_all(&rules, records.into_iter().take(PREVIEW_RECORDS).collect());
        Ok(DataPreview {
            source_name: data.name,
            sheet,
            headers,
            records: total,
            sample,
        })
    })
    .await
    .map_err(|e| MergeError::Internal(format!("Inspect task panicked: {}", e)))?
}

// ── Internal helpers ─────────────────────────────────────────────────────

struct JobEvents {
    job_id: String,
    callback: Option<ProgressCallback>,
}

impl JobEvents {
    fn enter(&self, state: JobState) {
        debug!("State → {}", state);
        if let Some(cb) = &self.callback {
            cb.on_state_change(&self.job_id, state);
        }
    }
}

async fn run_job(
    data: MergeInput,
    template: MergeInput,
    config: &MergeConfig,
    workspace: JobWorkspace,
    events: &JobEvents,
) -> Result<MergeOutput, MergeError> {
    let total_start = Instant::now();
    info!(
        "Starting merge: '{}' into '{}'",
        data.name, template.name
    );

    // ── Step 1: Extract records ──────────────────────────────────────────
    events.enter(JobState::Extracting);
    let extract_start = Instant::now();
    let sheet = config.sheet.clone();
    let records = tokio::task::spawn_blocking(move || {
        extract_records(&data.bytes, &data.name, &sheet)
    })
    .await
    .map_err(|e| MergeError::Internal(format!("Extract task panicked: {}", e)))??;
    let extract_ms = extract_start.elapsed().as_millis() as u64;

    if let Some(cb) = &events.callback {
        cb.on_records_loaded(records.len());
    }

    // ── Step 2: Derive fields ────────────────────────────────────────────
    events.enter(JobState::Deriving);
    let records = derive_all(&config.rules, records);

    // ── Step 3: Render and persist the document ──────────────────────────
    events.enter(JobState::Rendering);
    let render_start = Instant::now();
    let options = RenderOptions {
        page_breaks: config.page_breaks,
        line_breaks: config.line_breaks,
    };
    let block_name = config.block_name.clone();
    let progress = events.callback.clone();
    let dir = workspace.dir().to_path_buf();
    let file_name = format!("{}.docx", config.output_stem);

    let (rendered, document, unmatched) = tokio::task::spawn_blocking(move || {
        let template = Template::from_bytes(&template.bytes, &template.name, &block_name)?;
        let unmatched = unmatched_placeholders(&template, &records);
        let rendered = render(&template, &records, &options, progress.as_ref())?;
        let document = write_atomic(&dir, &file_name, &rendered.bytes)?;
        Ok::<_, MergeError>((rendered, document, unmatched))
    })
    .await
    .map_err(|e| MergeError::Internal(format!("Render task panicked: {}", e)))??;
    let render_ms = render_start.elapsed().as_millis() as u64;

    if !unmatched.is_empty() {
        warn!(
            "Placeholders with no matching column render empty: {}",
            unmatched.join(", ")
        );
    }

    // ── Step 4: Optional conversion ──────────────────────────────────────
    let (converted, conversion, convert_ms) = match &config.conversion {
        None => (None, ConversionOutcome::NotRequested, None),
        Some(settings) => {
            events.enter(JobState::ConversionRequested);
            if let Some(cb) = &events.callback {
                cb.on_conversion_start(settings.format.extension());
            }
            let convert_start = Instant::now();
            let result = convert_document(&document, workspace.dir(), settings).await;
            let ms = convert_start.elapsed().as_millis() as u64;
            match result {
                Ok(path) => (Some(path), ConversionOutcome::Converted, Some(ms)),
                Err(MergeError::Conversion { diagnostic, .. })
                    if config.allow_conversion_failure =>
                {
                    warn!("Keeping the document without conversion: {}", diagnostic);
                    (None, ConversionOutcome::Failed { diagnostic }, Some(ms))
                }
                Err(e) => return Err(e),
            }
        }
    };

    // ── Step 5: Keep the job directory ───────────────────────────────────
    workspace.persist();

    let stats = MergeStats {
        extract_ms,
        render_ms,
        convert_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
        document_bytes: rendered.bytes.len() as u64,
        page_breaks: rendered.page_breaks,
        unmatched_placeholders: unmatched,
    };

    Ok(MergeOutput {
        job_id: events.job_id.clone(),
        document,
        converted,
        conversion,
        records: rendered.instances,
        stats,
        state: JobState::Done,
    })
}

/// Block placeholders that no record carries.
fn unmatched_placeholders(template: &Template, records: &[Record]) -> Vec<String> {
    template
        .placeholders()
        .into_iter()
        .filter(|name| !records.iter().any(|r| r.contains(name)))
        .collect()
}
