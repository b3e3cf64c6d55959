#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bias_harness::checkpoint::CheckpointStore;
use bias_harness::gateway::{
    ChatProvider, ChatRequest, ChatResponse, ErrorContext, ModelInfo, ProviderError,
};
use bias_harness::results::ResultTable;
use bias_harness::{HarnessConfig, PromptItem, PromptSet};

pub const EVALUATION: &str = r#"{"score": 2, "reason": "mostly neutral"}"#;

/// In-process provider: echoes prompts, scores every response with
/// [`EVALUATION`], and fails generation for selected prompt texts.
#[derive(Default)]
pub struct FakeProvider {
    failing: Mutex<HashSet<String>>,
    generate_attempts: Mutex<HashMap<String, usize>>,
    evaluate_calls: Mutex<usize>,
    observe: Option<PathBuf>,
    /// Checkpoint index and rows on disk at each generate call (when observing).
    pub observed: Mutex<Vec<(Option<usize>, usize)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of this prompt text fails with a 503 until healed.
    pub fn failing(self, prompt_text: &str) -> Self {
        self.failing.lock().unwrap().insert(prompt_text.to_string());
        self
    }

    /// Record the checkpoint and result rows of `run_dir` on every generate call.
    pub fn observing(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.observe = Some(run_dir.into());
        self
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn generate_attempts(&self, prompt_text: &str) -> usize {
        self.generate_attempts
            .lock()
            .unwrap()
            .get(prompt_text)
            .copied()
            .unwrap_or(0)
    }

    pub fn evaluate_calls(&self) -> usize {
        *self.evaluate_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatProvider for FakeProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        if req.json_mode {
            *self.evaluate_calls.lock().unwrap() += 1;
            return Ok(ChatResponse::text(EVALUATION));
        }

        let prompt = req
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        *self
            .generate_attempts
            .lock()
            .unwrap()
            .entry(prompt.clone())
            .or_default() += 1;

        if let Some(dir) = &self.observe {
            let last = CheckpointStore::new(dir)
                .load()
                .map(|cp| cp.last_processed_index);
            let rows = ResultTable::new(dir).load().map(|r| r.len()).unwrap_or(0);
            self.observed.lock().unwrap().push((last, rows));
        }

        if self.failing.lock().unwrap().contains(&prompt) {
            return Err(ProviderError::provider_with_context(
                "fake",
                "upstream unavailable",
                true,
                ErrorContext::new().with_status(503),
            ));
        }
        Ok(ChatResponse::text(format!("response to {prompt}")))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(vec![ModelInfo::new("test/model")])
    }
}

/// `n` prompts with ids `0..n` and texts `prompt <i>`.
pub fn prompts(n: usize) -> PromptSet {
    PromptSet::new(
        (0..n)
            .map(|i| PromptItem::new(i.to_string(), format!("prompt {i}")))
            .collect(),
    )
}

/// Default retries, no pause between attempts.
pub fn fast_config() -> HarnessConfig {
    HarnessConfig {
        retry_delay: Duration::ZERO,
        ..HarnessConfig::default()
    }
}
