//! Diagnostic dump: writes intermediate artifacts of a run to disk.
//!
//! Disabled unless `TENDER_DUMP_DIR` is set. Each run gets its own directory:
//!
//! ```text
//! {dump_dir}/{run_id}/
//!   semantic_enhance_prompt.txt
//!   semantic_enhance_response_0.txt
//!   backfill_contact_prompt.txt
//!   backfill_contact_response.txt
//!   merged.json
//!   output.json
//! ```
//!
//! Failures are logged and swallowed. A dump never blocks the pipeline.

use std::path::{Path, PathBuf};

use crate::config;

#[derive(Debug, Clone)]
pub struct DiagnosticDump {
    dir: PathBuf,
}

impl DiagnosticDump {
    /// Dump for one run, or `None` when diagnostics are disabled.
    pub fn for_run(run_id: &str) -> Option<Self> {
        let base = config::dump_dir()?;
        Self::new(&base.join(run_id))
    }

    /// Creates the directory tree. Returns `None` (with a warning) on failure.
    pub fn new(dir: &Path) -> Option<Self> {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Diagnostic dump: failed to create directory"
            );
            return None;
        }
        Some(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a text artifact (prompt, raw provider answer).
    pub fn write_text(&self, filename: &str, text: &str) {
        let path = self.dir.join(filename);
        match std::fs::write(&path, text.as_bytes()) {
            Ok(()) => tracing::debug!(
                path = %path.display(),
                size = text.len(),
                "Diagnostic dump: text written"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Diagnostic dump: failed to write text"
            ),
        }
    }

    /// Write a pretty-printed JSON artifact.
    pub fn write_json<T: serde::Serialize>(&self, filename: &str, value: &T) {
        let path = self.dir.join(filename);
        let json = match serde_json::to_string_pretty(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Diagnostic dump: failed to serialize JSON"
                );
                return;
            }
        };
        match std::fs::write(&path, json.as_bytes()) {
            Ok(()) => tracing::debug!(
                path = %path.display(),
                size = json.len(),
                "Diagnostic dump: JSON written"
            ),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Diagnostic dump: failed to write JSON"
            ),
        }
    }
}
