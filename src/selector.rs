//! Run selection: decide which run directory a batch writes to and which
//! index window it covers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::checkpoint::{Checkpoint, CheckpointStore, ResumableRun};
use crate::interaction::{Interaction, RunChoice};

/// Inclusive prompt index window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisRange {
    pub start_index: usize,
    pub end_index: usize,
}

impl AnalysisRange {
    /// Validated range over a dataset of `total_prompts` items.
    pub fn new(start_index: usize, end_index: usize, total_prompts: usize) -> Result<Self, SelectionError> {
        if total_prompts == 0 {
            return Err(SelectionError::EmptyDataset);
        }
        if start_index > end_index || end_index >= total_prompts {
            return Err(SelectionError::InvalidRange {
                start: start_index,
                end: end_index,
                total: total_prompts,
            });
        }
        Ok(Self {
            start_index,
            end_index,
        })
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

impl std::fmt::Display for AnalysisRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start_index, self.end_index)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("range {start}-{end} is outside 0-{} or reversed", .total.saturating_sub(1))]
    InvalidRange { start: usize, end: usize, total: usize },
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("run {run_id} already covered its range up to index {end}")]
    NothingToContinue { run_id: String, end: usize },
    #[error("no resumable run named {0}")]
    UnknownRun(String),
    #[error("run directory {0} already exists")]
    RunExists(String),
    #[error("checkpoint of run {run_id} declares {recorded} prompts but the dataset has {actual}")]
    DatasetMismatch {
        run_id: String,
        recorded: usize,
        actual: usize,
    },
    #[error("selection cancelled")]
    Cancelled,
}

/// Where a batch runs and what it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub run_id: String,
    pub run_dir: PathBuf,
    /// Declared range of the run; on resume, the range saved in the checkpoint.
    pub range: AnalysisRange,
    /// Present when reattaching to an existing run.
    pub resume_from: Option<Checkpoint>,
    /// Model recorded for resumed runs; fresh runs pick one separately.
    pub model: Option<String>,
}

impl RunPlan {
    /// First index the batch will actually process.
    pub fn effective_start(&self) -> usize {
        match &self.resume_from {
            Some(cp) => self.range.start_index.max(cp.last_processed_index + 1),
            None => self.range.start_index,
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume_from.is_some()
    }
}

/// Sortable run id `YYYYMMDD_HHMMSS` for a creation time.
pub fn run_id_for(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Fresh run id under `root`, suffixed `_N` when that second is already taken.
pub fn allocate_run_id(root: &Path, now: DateTime<Local>) -> String {
    let base = run_id_for(now);
    if !root.join(&base).exists() {
        return base;
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !root.join(candidate).exists())
        .unwrap_or(base)
}

/// Decides run directory and window from checkpoints on disk.
#[derive(Debug, Clone)]
pub struct RunSelector {
    results_root: PathBuf,
    total_prompts: usize,
}

impl RunSelector {
    pub fn new(results_root: impl Into<PathBuf>, total_prompts: usize) -> Self {
        Self {
            results_root: results_root.into(),
            total_prompts,
        }
    }

    /// Runs with a readable checkpoint, newest first.
    pub fn candidates(&self) -> Vec<ResumableRun> {
        CheckpointStore::find_resumable(&self.results_root)
    }

    /// Ask the interaction boundary and build the plan it chose.
    pub fn select(&self, interaction: &mut dyn Interaction) -> Result<RunPlan, SelectionError> {
        let candidates = self.candidates();
        match interaction.select_run(&candidates, self.total_prompts) {
            RunChoice::Resume(i) => {
                let run = candidates
                    .get(i)
                    .ok_or_else(|| SelectionError::UnknownRun(format!("#{}", i + 1)))?;
                self.resume_plan(run)
            }
            RunChoice::Fresh { start, end } => self.fresh(start, end),
            RunChoice::Cancel => Err(SelectionError::Cancelled),
        }
    }

    /// Plan for resuming the named run directory.
    pub fn resume(&self, run_id: &str) -> Result<RunPlan, SelectionError> {
        let run = self
            .candidates()
            .into_iter()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| SelectionError::UnknownRun(run_id.to_string()))?;
        self.resume_plan(&run)
    }

    fn resume_plan(&self, run: &ResumableRun) -> Result<RunPlan, SelectionError> {
        let cp = &run.checkpoint;
        if cp.total_prompts != self.total_prompts {
            return Err(SelectionError::DatasetMismatch {
                run_id: run.run_id.clone(),
                recorded: cp.total_prompts,
                actual: self.total_prompts,
            });
        }
        let next = cp.last_processed_index + 1;
        if next > cp.end_index {
            return Err(SelectionError::NothingToContinue {
                run_id: run.run_id.clone(),
                end: cp.end_index,
            });
        }
        let range = AnalysisRange::new(cp.start_index, cp.end_index, self.total_prompts)?;
        info!(
            run = %run.run_id,
            next_index = next,
            end_index = cp.end_index,
            model = %cp.current_model,
            "resuming run"
        );
        Ok(RunPlan {
            run_id: run.run_id.clone(),
            run_dir: self.results_root.join(&run.run_id),
            range,
            resume_from: Some(cp.clone()),
            model: Some(cp.current_model.clone()),
        })
    }

    /// Plan for a new run over `start..=end`, validated before anything is created.
    pub fn fresh(&self, start: usize, end: usize) -> Result<RunPlan, SelectionError> {
        let range = AnalysisRange::new(start, end, self.total_prompts)?;
        let run_id = allocate_run_id(&self.results_root, Local::now());
        info!(run = %run_id, range = %range, "starting new run");
        Ok(RunPlan {
            run_dir: self.results_root.join(&run_id),
            run_id,
            range,
            resume_from: None,
            model: None,
        })
    }

    /// Plan for a new run with a caller-chosen id.
    pub fn fresh_named(&self, run_id: &str, start: usize, end: usize) -> Result<RunPlan, SelectionError> {
        let range = AnalysisRange::new(start, end, self.total_prompts)?;
        let run_dir = self.results_root.join(run_id);
        if run_dir.exists() {
            return Err(SelectionError::RunExists(run_id.to_string()));
        }
        Ok(RunPlan {
            run_id: run_id.to_string(),
            run_dir,
            range,
            resume_from: None,
            model: None,
        })
    }
}
