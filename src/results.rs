//! Result table and raw-response artifacts of a run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::write_atomic;

pub const RESULTS_FILE: &str = "bias_scores.csv";
pub const ARTIFACTS_DIR: &str = "raw_responses";

/// One scored response. Column order of the CSV follows field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub prompt_id: String,
    pub prompt_text: String,
    pub model_name: String,
    /// Artifact file name inside `raw_responses/`.
    pub response_text_path: String,
    pub bias_score: f64,
    pub bias_reason: String,
    pub raw_bias_evaluation: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("result table io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("result table csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

// =============================================================================
// Result table
// =============================================================================

/// `bias_scores.csv` of one run.
#[derive(Debug, Clone)]
pub struct ResultTable {
    path: PathBuf,
}

impl ResultTable {
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self {
            path: run_dir.as_ref().join(RESULTS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows already on disk; empty when the table does not exist yet.
    pub fn load(&self) -> Result<Vec<ResultRecord>, ResultsError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path).map_err(|source| self.csv_err(source))?;
        reader
            .deserialize()
            .collect::<Result<Vec<ResultRecord>, _>>()
            .map_err(|source| self.csv_err(source))
    }

    /// Rewrite the whole table. Writing nothing is skipped so an existing
    /// table is never replaced by a header-only file.
    pub fn write(&self, records: &[ResultRecord]) -> Result<(), ResultsError> {
        if records.is_empty() {
            info!(path = %self.path.display(), "no results to write");
            return Ok(());
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer
                .serialize(record)
                .map_err(|source| self.csv_err(source))?;
        }
        let bytes = writer.into_inner().map_err(|e| ResultsError::Io {
            path: self.path.clone(),
            source: std::io::Error::new(e.error().kind(), e.error().to_string()),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_err(source))?;
        }
        write_atomic(&self.path, &bytes).map_err(|source| self.io_err(source))?;
        info!(path = %self.path.display(), rows = records.len(), "results written");
        Ok(())
    }

    fn csv_err(&self, source: csv::Error) -> ResultsError {
        ResultsError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn io_err(&self, source: std::io::Error) -> ResultsError {
        ResultsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// One text file per prompt id under `raw_responses/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: run_dir.as_ref().join(ARTIFACTS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for a prompt id. Bytes outside `[A-Za-z0-9._-]` are
    /// percent-encoded, `%` included, so distinct ids never share a file.
    pub fn file_name_for(prompt_id: &str) -> String {
        let mut safe = String::with_capacity(prompt_id.len());
        for byte in prompt_id.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("%{byte:02X}"));
            }
        }
        format!("response_{safe}.txt")
    }

    pub fn path_for(&self, prompt_id: &str) -> PathBuf {
        self.dir.join(Self::file_name_for(prompt_id))
    }

    /// Store the raw response and return its file name.
    pub fn write(&self, prompt_id: &str, text: &str) -> std::io::Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let name = Self::file_name_for(prompt_id);
        std::fs::write(self.dir.join(&name), text)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, score: f64) -> ResultRecord {
        ResultRecord {
            prompt_id: id.to_string(),
            prompt_text: format!("prompt, with \"quotes\" {id}"),
            model_name: "test/model".into(),
            response_text_path: ArtifactStore::file_name_for(id),
            bias_score: score,
            bias_reason: "multi\nline reason".into(),
            raw_bias_evaluation: r#"{"score": 1, "reason": "x"}"#.into(),
        }
    }

    #[test]
    fn table_survives_reload_with_awkward_text() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable::new(dir.path());
        assert!(table.load().unwrap().is_empty());

        let rows = vec![record("0", 1.0), record("1", 8.5)];
        table.write(&rows).unwrap();
        assert_eq!(table.load().unwrap(), rows);

        let header = std::fs::read_to_string(table.path()).unwrap();
        assert!(header.starts_with(
            "prompt_id,prompt_text,model_name,response_text_path,bias_score,bias_reason,raw_bias_evaluation"
        ));
    }

    #[test]
    fn empty_write_keeps_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable::new(dir.path());
        table.write(&[record("0", 2.0)]).unwrap();
        table.write(&[]).unwrap();
        assert_eq!(table.load().unwrap().len(), 1);
    }

    #[test]
    fn artifact_names_follow_prompt_id() {
        assert_eq!(ArtifactStore::file_name_for("17"), "response_17.txt");
        assert_eq!(ArtifactStore::file_name_for("a/b c"), "response_a%2Fb%20c.txt");
        assert_eq!(ArtifactStore::file_name_for("é"), "response_%C3%A9.txt");

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = store.write("q-1", "hello").unwrap();
        assert_eq!(name, "response_q-1.txt");
        assert_eq!(std::fs::read_to_string(store.path_for("q-1")).unwrap(), "hello");
    }

    #[test]
    fn similar_ids_get_distinct_artifacts() {
        let ids = ["a/b", "a b", "a_b", "a%2Fb", "a%252Fb"];
        let mut names: Vec<String> = ids.iter().map(|id| ArtifactStore::file_name_for(id)).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ids.len());

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        for id in ids {
            store.write(id, id).unwrap();
        }
        for id in ids {
            assert_eq!(std::fs::read_to_string(store.path_for(id)).unwrap(), id);
        }
    }
}
