//! Per-run progress checkpoints.
//!
//! One `analysis_state.json` per run directory, rewritten wholesale after
//! every completed prompt.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CHECKPOINT_FILE: &str = "analysis_state.json";

/// Durable record of the furthest completed prompt in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the last prompt whose result was fully recorded.
    pub last_processed_index: usize,
    pub total_prompts: usize,
    pub current_model: String,
    /// Declared range of the run, inclusive.
    pub start_index: usize,
    pub end_index: usize,
    /// Run directory name.
    #[serde(rename = "timestamp")]
    pub run_id: String,
    /// RFC 3339 time of the save.
    pub saved_at: String,
}

impl Checkpoint {
    /// Whether every index of the declared range has been passed.
    pub fn is_complete(&self) -> bool {
        self.last_processed_index >= self.end_index
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A run directory holding a readable checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableRun {
    /// Directory name under the results root.
    pub run_id: String,
    pub checkpoint: Checkpoint,
}

/// Checkpoint file of a single run directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    run_dir: PathBuf,
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        let run_dir = run_dir.into();
        let path = run_dir.join(CHECKPOINT_FILE);
        Self { run_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_id(&self) -> String {
        self.run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Overwrite the checkpoint. The previous file stays intact until the new
    /// one is fully written.
    pub fn save(
        &self,
        last_processed_index: usize,
        total_prompts: usize,
        current_model: &str,
        start_index: usize,
        end_index: usize,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = Checkpoint {
            last_processed_index,
            total_prompts,
            current_model: current_model.to_string(),
            start_index,
            end_index,
            run_id: self.run_id(),
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;
        write_atomic(&self.path, &json).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            last_processed_index,
            "checkpoint saved"
        );
        Ok(checkpoint)
    }

    /// Current checkpoint, or `None` when absent or unreadable.
    pub fn load(&self) -> Option<Checkpoint> {
        match read_checkpoint(&self.path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint corrupt; treating as absent");
                None
            }
        }
    }

    /// Runs under `root` with a valid checkpoint, most recent first.
    pub fn find_resumable(root: impl AsRef<Path>) -> Vec<ResumableRun> {
        let root = root.as_ref();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "results root not readable");
                return Vec::new();
            }
        };

        let mut runs = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match read_checkpoint(&dir.join(CHECKPOINT_FILE)) {
                Ok(Some(checkpoint)) => runs.push(ResumableRun { run_id, checkpoint }),
                Ok(None) => {}
                Err(e) => warn!(run = %run_id, error = %e, "skipping run with unreadable checkpoint"),
            }
        }

        runs.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        runs
    }
}

fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Write `bytes` to a sibling temp file, sync it, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(last: usize, start: usize, end: usize) -> Checkpoint {
        Checkpoint {
            last_processed_index: last,
            total_prompts: 100,
            current_model: "m".into(),
            start_index: start,
            end_index: end,
            run_id: "20240101_000000".into(),
            saved_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn completion_helpers() {
        assert!(!checkpoint(4, 0, 9).is_complete());
        assert!(checkpoint(9, 0, 9).is_complete());
    }

    #[test]
    fn reads_legacy_state_without_fractional_timestamp() {
        let raw = r#"{
            "last_processed_index": 5,
            "total_prompts": 50,
            "current_model": "gemini-old",
            "start_index": 0,
            "end_index": 49,
            "timestamp": "20240101_120000",
            "saved_at": "2024-01-01T12:00:00.123456"
        }"#;
        let parsed: Checkpoint = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.run_id, "20240101_120000");
        assert_eq!(parsed.last_processed_index, 5);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");
        write_atomic(&target, b"{}").unwrap();
        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{\"a\":1}");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
