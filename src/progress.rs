//! Progress-callback trait for merge-job events.
//!
//! Inject an [`Arc<dyn MergeProgressCallback>`] via
//! [`crate::config::MergeConfigBuilder::progress_callback`] to follow a job
//! through its states and see each record as it is rendered.
//!
//! # Example
//!
//! ```rust
//! use docmerge::{MergeConfig, MergeProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl MergeProgressCallback for CountingCallback {
//!     fn on_record_rendered(&self, index: usize, total: usize) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Record {}/{} rendered", index, total);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//!
//! let config = MergeConfig::builder()
//!     .progress_callback(counter as Arc<dyn MergeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::JobState;
use std::sync::Arc;

/// Called by the merge orchestrator as a job advances.
///
/// Implementations must be `Send + Sync`: jobs run on the Tokio runtime and
/// rendering happens on a blocking-pool thread. All methods have default
/// no-op implementations so callers only override what they care about.
pub trait MergeProgressCallback: Send + Sync {
    /// Called on every state transition, terminal states included.
    fn on_state_change(&self, job_id: &str, state: JobState) {
        let _ = (job_id, state);
    }

    /// Called once after extraction succeeded.
    ///
    /// # Arguments
    /// * `total` - number of records that will be rendered
    fn on_records_loaded(&self, total: usize) {
        let _ = total;
    }

    /// Called after each block instance has been produced.
    ///
    /// # Arguments
    /// * `index` - 1-indexed record number
    /// * `total` - total records
    fn on_record_rendered(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called just before the external converter is launched.
    fn on_conversion_start(&self, format: &str) {
        let _ = format;
    }

    /// Called once when the job reaches `Done`.
    ///
    /// # Arguments
    /// * `records`   - block instances in the primary document
    /// * `converted` - whether a secondary artifact was produced
    fn on_job_complete(&self, records: usize, converted: bool) {
        let _ = (records, converted);
    }

    /// Called once when the job reaches `Failed`.
    fn on_job_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl MergeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::MergeConfig`].
pub type ProgressCallback = Arc<dyn MergeProgressCallback>;
