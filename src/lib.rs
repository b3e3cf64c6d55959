#![forbid(unsafe_code)]

//! # bias-harness
//!
//! Batch a prompt list through an LLM, store every raw response, ask a model
//! to score each response for bias, and keep a checkpoint after every prompt
//! so a long batch can be stopped and resumed without duplicates.
//!
//! Each run lives in its own timestamped directory under the results root:
//!
//! ```text
//! results/20250101_093000/
//!   analysis_state.json      checkpoint
//!   bias_scores.csv          one row per scored prompt
//!   raw_responses/response_<id>.txt
//! ```

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod gateway;
pub mod inference;
pub mod interaction;
pub mod logging;
pub mod prompts;
pub mod results;
pub mod runner;
pub mod selector;

pub use checkpoint::{Checkpoint, CheckpointStore, ResumableRun};
pub use config::HarnessConfig;
pub use dataset::{PromptItem, PromptSet};
pub use gateway::{ChatProvider, ModelInfo, OpenRouterAdapter, ProviderError};
pub use inference::{InferenceClient, InferenceError, RetryPolicy};
pub use interaction::{
    ConsoleInteraction, FailureContext, FailureDecision, Interaction, ReportedFailure, RunChoice,
    ScriptedInteraction,
};
pub use prompts::BiasEvaluation;
pub use results::{ArtifactStore, ResultRecord, ResultTable};
pub use runner::{BatchRunner, RunOutcome, RunState, RunnerError};
pub use selector::{AnalysisRange, RunPlan, RunSelector, SelectionError};
