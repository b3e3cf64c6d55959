//! Prompt dataset loaded from CSV.
//!
//! The file needs a header with an `id` column and a prompt column named
//! `prompt_text` or `prompt`. Row order defines the 0-based prompt index.

use std::path::{Path, PathBuf};

use tracing::info;

const PROMPT_COLUMNS: &[&str] = &["prompt_text", "prompt"];

/// One research prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptItem {
    pub id: String,
    pub text: String,
}

impl PromptItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("prompt file not found: {0}")]
    NotFound(PathBuf),
    #[error("prompt file csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("prompt file has no '{0}' column")]
    MissingColumn(String),
    #[error("prompt file contains no prompts")]
    Empty,
}

/// Ordered, index-addressable prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    items: Vec<PromptItem>,
}

impl PromptSet {
    pub fn new(items: Vec<PromptItem>) -> Self {
        Self { items }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_path(path)?;
        let set = Self::from_reader(reader)?;
        info!(path = %path.display(), prompts = set.len(), "prompts loaded");
        Ok(set)
    }

    pub fn from_csv_str(raw: &str) -> Result<Self, DatasetError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(raw.as_bytes());
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, DatasetError> {
        let headers = reader.headers()?.clone();
        let id_col = headers
            .iter()
            .position(|h| h == "id")
            .ok_or_else(|| DatasetError::MissingColumn("id".into()))?;
        let text_col = PROMPT_COLUMNS
            .iter()
            .find_map(|name| headers.iter().position(|h| h == *name))
            .ok_or_else(|| DatasetError::MissingColumn(PROMPT_COLUMNS.join("' or '")))?;

        let mut items = Vec::new();
        for row in reader.records() {
            let row = row?;
            items.push(PromptItem {
                id: row.get(id_col).unwrap_or_default().trim().to_string(),
                text: row.get(text_col).unwrap_or_default().to_string(),
            });
        }

        if items.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PromptItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PromptItem> {
        self.items.iter()
    }
}
