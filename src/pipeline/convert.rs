//! Secondary-format conversion through an external office suite.
//!
//! The converter is a child process (`soffice` by default) that reads the
//! merged DOCX from the job directory and writes `<stem>.pdf` next to it.
//! It is awaited on the Tokio runtime under a wall-clock limit; on expiry
//! the child is killed.
//!
//! A run only counts as a success when the tool exits 0 **and** the expected
//! artifact exists with a non-zero size: LibreOffice is known to exit 0
//! after failing to load a document. On any failure the partial artifact is
//! deleted before the error is returned.

use crate::config::ConverterSettings;
use crate::error::MergeError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Keep diagnostics readable in logs and JSON output.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

/// Directory name of the per-job LibreOffice profile.
const PROFILE_DIR: &str = ".lo-profile";

/// Absolute paths that contain a UUID, i.e. some job's directory.
static JOB_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:[A-Za-z]:)?[/\\][^\s'\x22]*[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}[^\s'\x22]*",
    )
    .unwrap()
});

/// Convert `input` into `settings.format`, writing into `out_dir`.
///
/// Returns the path of the produced artifact, `<out_dir>/<input stem>.<ext>`.
pub async fn convert_document(
    input: &Path,
    out_dir: &Path,
    settings: &ConverterSettings,
) -> Result<PathBuf, MergeError> {
    let format = settings.format;
    let ext = format.extension();
    let fail = |diagnostic: String| MergeError::Conversion {
        format: format.to_string(),
        diagnostic,
    };

    let stem = input
        .file_stem()
        .ok_or_else(|| fail("input document has no file name".into()))?;
    let artifact = out_dir.join(format!("{}.{ext}", stem.to_string_lossy()));
    remove_if_present(&artifact);

    let profile = out_dir.join(PROFILE_DIR);
    let mut cmd = Command::new(&settings.program);
    cmd.args(&settings.leading_args)
        .arg("--headless")
        .arg("--convert-to")
        .arg(ext)
        .arg("--outdir")
        .arg(out_dir);
    if settings.isolate_profile {
        let url = profile_url(&profile)
            .ok_or_else(|| fail("converter profile path is not expressible as a file URL".into()))?;
        cmd.arg(format!("-env:UserInstallation={url}"));
    }
    cmd.arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!(
        "Converting {} to {} with '{}' (timeout {}s)",
        file_name(input),
        ext,
        settings.program,
        settings.timeout_secs
    );

    let result = run(cmd, settings, &artifact, &[out_dir, input.parent().unwrap_or(out_dir)]).await;

    if settings.isolate_profile {
        if let Err(e) = tokio::fs::remove_dir_all(&profile).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove converter profile: {}", e);
            }
        }
    }

    match result {
        Ok(()) => {
            debug!("Conversion produced {}", file_name(&artifact));
            Ok(artifact)
        }
        Err(diagnostic) => {
            remove_if_present(&artifact);
            warn!("Conversion to {} failed: {}", ext, diagnostic);
            Err(fail(diagnostic))
        }
    }
}

/// Spawn, wait, and check the artifact. The error is a scrubbed diagnostic.
async fn run(
    mut cmd: Command,
    settings: &ConverterSettings,
    artifact: &Path,
    scrub_dirs: &[&Path],
) -> Result<(), String> {
    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            format!("converter '{}' not found; is it installed and on PATH?", settings.program)
        }
        _ => format!("failed to start converter '{}': {e}", settings.program),
    })?;

    let timeout = Duration::from_secs(settings.timeout_secs);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed waiting for converter: {e}")),
        // Dropping the future drops the child, which kills it.
        Err(_) => {
            return Err(format!(
                "converter timed out after {}s and was killed",
                settings.timeout_secs
            ))
        }
    };

    let tool_output = scrub(&tool_text(&output.stderr, &output.stdout), scrub_dirs);

    if !output.status.success() {
        return Err(if tool_output.is_empty() {
            format!("converter exited with {}", output.status)
        } else {
            format!("converter exited with {}: {tool_output}", output.status)
        });
    }

    match tokio::fs::metadata(artifact).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(with_output("converter produced an empty artifact", &tool_output)),
        Err(_) => Err(with_output("converter exited 0 but produced no artifact", &tool_output)),
    }
}

fn tool_text(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::from_utf8_lossy(stdout).trim().to_string()
    } else {
        stderr.to_string()
    }
}

fn with_output(message: &str, tool_output: &str) -> String {
    if tool_output.is_empty() {
        message.to_string()
    } else {
        format!("{message}: {tool_output}")
    }
}

/// Percent-encoded `file://` URL of `path`, made absolute first.
fn profile_url(path: &Path) -> Option<String> {
    let absolute = std::path::absolute(path).ok()?;
    Url::from_file_path(absolute).ok().map(String::from)
}

/// Replace job paths with `<workdir>` and cap the length.
pub fn scrub(text: &str, dirs: &[&Path]) -> String {
    let mut out = text.to_string();
    for dir in dirs {
        let dir = dir.display().to_string();
        if !dir.is_empty() {
            out = out.replace(&dir, "<workdir>");
        }
    }
    let out = JOB_PATH.replace_all(&out, "<workdir>");
    if out.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let mut cut: String = out.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        cut.push('…');
        cut
    } else {
        out.into_owned()
    }
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale artifact {}", file_name(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", file_name(path), e),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
