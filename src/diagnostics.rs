//! File-backed screenshot diagnostics
//!
//! Captures land in `<root>/<YYYY-MM-DD>/<level>_<label>_<HHMMSS>.png` where
//! `root` is the retention policy's screenshots directory, so the lifecycle
//! sweep ages them like any other artifact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_flow::{ArtifactRef, CaptureLevel, CaptureRequest, DiagnosticCapture, DiagnosticError};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::debug;

const MAX_LABEL_LEN: usize = 60;

/// Produces PNG bytes of the current UI state; implemented by the driver.
#[async_trait]
pub trait ScreenshotSource: Send + Sync {
    async fn screenshot(&self) -> Result<Vec<u8>, DiagnosticError>;
}

pub struct ScreenshotCapture {
    source: Arc<dyn ScreenshotSource>,
    root: PathBuf,
}

impl ScreenshotCapture {
    pub fn new(source: Arc<dyn ScreenshotSource>, root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path for a capture taken at `at`; never overwrites an existing file.
    pub fn path_for(&self, level: CaptureLevel, label: &str, at: DateTime<Local>) -> PathBuf {
        let dir = self.root.join(at.format("%Y-%m-%d").to_string());
        let stem = format!(
            "{}_{}_{}",
            level.prefix(),
            sanitize_label(label),
            at.format("%H%M%S")
        );
        let mut path = dir.join(format!("{stem}.png"));
        let mut n = 1;
        while path.exists() {
            n += 1;
            path = dir.join(format!("{stem}_{n}.png"));
        }
        path
    }
}

#[async_trait]
impl DiagnosticCapture for ScreenshotCapture {
    async fn capture(&self, request: &CaptureRequest) -> Result<ArtifactRef, DiagnosticError> {
        let bytes = self.source.screenshot().await?;
        let label = format!("{}_attempt{}", request.label, request.attempt);
        let path = self.path_for(request.level, &label, Local::now());
        let size = bytes.len() as u64;
        write_atomic(&path, bytes).await.map_err(|err| DiagnosticError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        debug!(path = %path.display(), bytes = size, step = %request.step_id, "screenshot saved");
        Ok(ArtifactRef {
            path,
            captured_at: Utc::now(),
            bytes: size,
        })
    }
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("png.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

/// Keep `[A-Za-z0-9_-]`, fold runs of anything else into one `_`.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_sep = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
        if out.len() >= MAX_LABEL_LEN {
            break;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "capture".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Screenshot counts by level, compressed ones included.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScreenshotSummary {
    pub error: usize,
    pub step: usize,
    pub success: usize,
    pub other: usize,
    pub bytes: u64,
}

impl ScreenshotSummary {
    pub fn total(&self) -> usize {
        self.error + self.step + self.success + self.other
    }
}

pub fn screenshot_summary(root: &Path) -> io::Result<ScreenshotSummary> {
    let mut summary = ScreenshotSummary::default();
    if !root.exists() {
        return Ok(summary);
    }
    tally(root, &mut summary)?;
    Ok(summary)
}

fn tally(dir: &Path, summary: &mut ScreenshotSummary) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            tally(&entry.path(), summary)?;
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".tmp") {
            continue;
        }
        let prefix = name.split('_').next().unwrap_or_default();
        match prefix {
            "error" => summary.error += 1,
            "step" => summary.step += 1,
            "success" => summary.success += 1,
            _ => summary.other += 1,
        }
        summary.bytes += entry.metadata()?.len();
    }
    Ok(())
}
