//! Batch runner: walks a prompt window in index order, scores each response,
//! and checkpoints after every completed item.
//!
//! State machine: `Idle → Running → {Completed, Aborted, Failed}`.
//!
//! Per item the order is fixed: generate → write artifact → evaluate →
//! accumulate record → rewrite result table → save checkpoint. The checkpoint
//! on disk therefore never names an index whose row is not already on disk.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::dataset::PromptSet;
use crate::inference::{InferenceClient, InferenceError};
use crate::interaction::{FailureContext, FailureDecision, Interaction};
use crate::results::{ArtifactStore, ResultRecord, ResultTable, ResultsError};
use crate::selector::RunPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Loop finished (or there was nothing left to do).
    Completed,
    /// Stopped by the interaction boundary after a failure.
    Aborted,
    /// Storage failure that could not be routed to a decision.
    Failed,
}

/// Summary of one `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    /// Items completed in this session.
    pub processed: usize,
    /// Indices that failed and were skipped on "continue".
    pub skipped: Vec<usize>,
    /// Highest completed index, including earlier sessions.
    pub last_completed: Option<usize>,
    /// Rows in the result table after the final flush.
    pub records_written: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Results(#[from] ResultsError),
    #[error("cannot create run directory {path}: {source}")]
    RunDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of one item, routed to the interaction boundary.
#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("writing response artifact failed: {0}")]
    Artifact(#[from] std::io::Error),
    #[error("no prompt at index {0}")]
    MissingPrompt(usize),
}

pub struct BatchRunner<'a> {
    client: &'a InferenceClient,
    prompts: &'a PromptSet,
    plan: RunPlan,
    checkpoints: CheckpointStore,
    table: ResultTable,
    artifacts: ArtifactStore,
    records: Vec<ResultRecord>,
    state: RunState,
}

impl<'a> BatchRunner<'a> {
    pub fn new(client: &'a InferenceClient, prompts: &'a PromptSet, plan: RunPlan) -> Self {
        let checkpoints = CheckpointStore::new(&plan.run_dir);
        let table = ResultTable::new(&plan.run_dir);
        let artifacts = ArtifactStore::new(&plan.run_dir);
        Self {
            client,
            prompts,
            plan,
            checkpoints,
            table,
            artifacts,
            records: Vec::new(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Records held in memory (prior rows on resume plus this session's).
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Drive the window to completion or until the boundary says stop.
    pub async fn run(&mut self, interaction: &mut dyn Interaction) -> Result<RunOutcome, RunnerError> {
        let start = self.plan.effective_start();
        let range = self.plan.range;
        let resumed_last = self
            .plan
            .resume_from
            .as_ref()
            .map(|cp| cp.last_processed_index);

        let mut outcome = RunOutcome {
            state: RunState::Completed,
            processed: 0,
            skipped: Vec::new(),
            last_completed: resumed_last,
            records_written: 0,
        };

        if start > range.end_index {
            info!(run = %self.plan.run_id, "nothing left to process in range {range}");
            self.state = RunState::Completed;
            return Ok(outcome);
        }

        std::fs::create_dir_all(&self.plan.run_dir).map_err(|source| RunnerError::RunDir {
            path: self.plan.run_dir.display().to_string(),
            source,
        })?;

        if self.plan.is_resume() {
            self.records = self.table.load()?;
            info!(rows = self.records.len(), "loaded existing results");
        }

        self.state = RunState::Running;
        let model = self.client.model().to_string();
        let total = self.prompts.len();
        let window = range.len();
        let mut done = self.rows_in_range();

        info!(
            run = %self.plan.run_id,
            model = %model,
            from = start,
            to = range.end_index,
            "processing prompts"
        );

        for index in start..=range.end_index {
            match self.process_item(index, &model).await {
                Ok(record) => {
                    self.push_record(record);
                    self.flush_or_fail()?;
                    if let Err(e) = self.checkpoints.save(
                        index,
                        total,
                        &model,
                        range.start_index,
                        range.end_index,
                    ) {
                        error!(index, error = %e, "checkpoint save failed; stopping run");
                        self.state = RunState::Failed;
                        return Err(e.into());
                    }
                    outcome.last_completed = Some(index);
                    outcome.processed += 1;
                    done += 1;
                    info!(index, "[{done}/{window}] prompt complete");
                }
                Err(err) => {
                    let prompts = self.prompts;
                    let prompt_id = prompts
                        .get(index)
                        .map(|p| p.id.as_str())
                        .unwrap_or("?");
                    match &err {
                        ItemError::Inference(e) => {
                            error!(index, prompt_id, status = ?e.status(), error = %e, "API error")
                        }
                        other => error!(index, prompt_id, error = ?other, "unexpected error"),
                    }

                    let message = err.to_string();
                    let decision = interaction.on_failure(&FailureContext {
                        index,
                        prompt_id,
                        error: &message,
                        processed: done,
                        window,
                        last_completed: outcome.last_completed,
                    });

                    match decision {
                        FailureDecision::Continue => {
                            warn!(index, prompt_id, "skipping failed prompt");
                            outcome.skipped.push(index);
                        }
                        FailureDecision::Stop { save_checkpoint } => {
                            if save_checkpoint {
                                self.save_on_stop(outcome.last_completed, total, &model);
                            }
                            outcome.records_written = self.flush_or_fail()?;
                            outcome.state = RunState::Aborted;
                            self.state = RunState::Aborted;
                            info!(run = %self.plan.run_id, "run stopped by user");
                            return Ok(outcome);
                        }
                    }
                }
            }
        }

        outcome.records_written = self.flush_or_fail()?;
        self.state = RunState::Completed;
        if !outcome.skipped.is_empty() {
            warn!(skipped = ?outcome.skipped, "some prompts were skipped and are not in the results");
        }
        info!(run = %self.plan.run_id, processed = outcome.processed, "run complete");
        Ok(outcome)
    }

    async fn process_item(&self, index: usize, model: &str) -> Result<ResultRecord, ItemError> {
        let prompt = self
            .prompts
            .get(index)
            .ok_or(ItemError::MissingPrompt(index))?;

        let response = self.client.generate_response(&prompt.text).await?;
        let artifact = self.artifacts.write(&prompt.id, &response)?;
        debug!(index, prompt_id = %prompt.id, artifact = %artifact, "response stored");

        let evaluation = self.client.evaluate_bias(&response).await?;

        Ok(ResultRecord {
            prompt_id: prompt.id.clone(),
            prompt_text: prompt.text.clone(),
            model_name: model.to_string(),
            response_text_path: artifact,
            bias_score: evaluation.score,
            bias_reason: evaluation.reason,
            raw_bias_evaluation: evaluation.raw_evaluation,
        })
    }

    /// One row per prompt id; a re-processed id replaces its earlier row.
    fn push_record(&mut self, record: ResultRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| r.prompt_id == record.prompt_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    fn save_on_stop(&self, last_completed: Option<usize>, total: usize, model: &str) {
        let Some(last) = last_completed else {
            debug!("no completed prompt yet; nothing to checkpoint");
            return;
        };
        let range = self.plan.range;
        if let Err(e) = self
            .checkpoints
            .save(last, total, model, range.start_index, range.end_index)
        {
            warn!(error = %e, "checkpoint save on stop failed");
        }
    }

    /// Prompts of the declared range that already have a row.
    fn rows_in_range(&self) -> usize {
        let range = self.plan.range;
        let recorded: HashSet<&str> = self.records.iter().map(|r| r.prompt_id.as_str()).collect();
        self.prompts
            .iter()
            .enumerate()
            .filter(|(index, prompt)| range.contains(*index) && recorded.contains(prompt.id.as_str()))
            .count()
    }

    /// Rewrite the result table; a failed write ends the run as `Failed`.
    fn flush_or_fail(&mut self) -> Result<usize, RunnerError> {
        if let Err(e) = self.table.write(&self.records) {
            error!(path = %self.table.path().display(), error = %e, "writing results failed; stopping run");
            self.state = RunState::Failed;
            return Err(e.into());
        }
        Ok(self.records.len())
    }
}
