//! Per-job working directories.
//!
//! Every job owns `<work_root>/<uuid-v4>/`. All of its files (the merged
//! document, the converted artifact, the converter's private profile) live
//! there, so concurrent jobs never touch the same path.
//!
//! The directory is removed when the [`JobWorkspace`] is dropped, unless the
//! job finished and called [`JobWorkspace::persist`]. A failed job therefore
//! leaves nothing behind, whichever stage it failed in.

use crate::error::MergeError;
use crate::pipeline::convert::scrub;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A job-scoped directory that cleans up after itself.
#[derive(Debug)]
pub struct JobWorkspace {
    id: Uuid,
    dir: PathBuf,
    keep: bool,
}

impl JobWorkspace {
    /// Create a fresh job directory under `root` (created if missing).
    pub fn create(root: &Path) -> Result<Self, MergeError> {
        std::fs::create_dir_all(root)
            .map_err(|e| MergeError::Internal(format!("cannot create work root: {e}")))?;

        let id = Uuid::new_v4();
        let dir = root.join(id.to_string());
        std::fs::create_dir(&dir)
            .map_err(|e| MergeError::Internal(format!("cannot create job directory: {e}")))?;

        debug!("Job {} workspace created", id);
        Ok(Self {
            id,
            dir,
            keep: false,
        })
    }

    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keep the directory after this value is dropped. Returns its path.
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        debug!("Job {} workspace kept", self.id);
        std::mem::take(&mut self.dir)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.keep || self.dir.as_os_str().is_empty() {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("Job {} workspace removed", self.id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Job {} workspace could not be removed: {}", self.id, e),
        }
    }
}

/// Write to a temp file in `dir`, then rename it over `<dir>/<file_name>`.
///
/// Readers see either no file or the complete file, never a prefix.
/// tempfile names the temp path in its errors, so messages are scrubbed.
pub fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, MergeError> {
    let write_failed = |e: std::io::Error| MergeError::OutputWriteFailed {
        name: file_name.to_string(),
        source: std::io::Error::new(e.kind(), scrub(&e.to_string(), &[dir])),
    };

    let path = dir.join(file_name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
    tmp.write_all(bytes).map_err(write_failed)?;
    tmp.as_file().sync_all().map_err(write_failed)?;
    tmp.persist(&path).map_err(|e| write_failed(e.error))?;

    debug!("Wrote {} ({} bytes)", file_name, bytes.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_lives_under_root_and_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path()).unwrap();
        let dir = ws.dir().to_path_buf();
        assert!(dir.is_dir());
        assert_eq!(dir.parent(), Some(root.path()));
        assert_eq!(dir.file_name().unwrap().to_string_lossy(), ws.id());

        write_atomic(ws.dir(), "merged.docx", b"x").unwrap();
        drop(ws);
        assert!(!dir.exists());
    }

    #[test]
    fn persisted_workspace_survives_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path()).unwrap();
        write_atomic(ws.dir(), "merged.docx", b"x").unwrap();
        let dir = ws.persist();
        assert!(dir.join("merged.docx").is_file());
    }

    #[test]
    fn concurrent_jobs_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let a = JobWorkspace::create(root.path()).unwrap();
        let b = JobWorkspace::create(root.path()).unwrap();
        assert_ne!(a.dir(), b.dir());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn atomic_write_leaves_only_the_target() {
        let root = tempfile::tempdir().unwrap();
        let path = write_atomic(root.path(), "out.docx", b"first").unwrap();
        write_atomic(root.path(), "out.docx", b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let err = write_atomic(&root.path().join("gone"), "out.docx", b"x").unwrap_err();
        assert!(matches!(err, MergeError::OutputWriteFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("out.docx"), "{message}");
        assert!(
            !message.contains(&*root.path().to_string_lossy()),
            "{message}"
        );
    }
}
