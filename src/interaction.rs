//! Boundary between the batch core and whoever makes decisions for it.
//!
//! The core never reads stdin itself: model choice, run choice and the
//! continue/stop decision after a failure all go through [`Interaction`].

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use crate::checkpoint::ResumableRun;
use crate::gateway::ModelInfo;
use crate::selector::AnalysisRange;

/// What the runner knows when an item fails.
#[derive(Debug, Clone)]
pub struct FailureContext<'a> {
    pub index: usize,
    pub prompt_id: &'a str,
    pub error: &'a str,
    /// Items completed so far in this window, including earlier sessions.
    pub processed: usize,
    /// Size of the declared range.
    pub window: usize,
    pub last_completed: Option<usize>,
}

/// Answer to a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Skip this item and go on with the next index.
    Continue,
    /// Flush results and end the run, optionally re-saving the checkpoint.
    Stop { save_checkpoint: bool },
}

/// Answer to "resume or start fresh?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunChoice {
    /// Position in the candidate list.
    Resume(usize),
    Fresh { start: usize, end: usize },
    Cancel,
}

pub trait Interaction {
    /// Pick one model id from the list; `None` cancels.
    fn select_model(&mut self, models: &[ModelInfo]) -> Option<String>;

    /// Pick a resumable run or declare a fresh range.
    fn select_run(&mut self, candidates: &[ResumableRun], total_prompts: usize) -> RunChoice;

    /// Decide what happens after an item failed.
    fn on_failure(&mut self, failure: &FailureContext<'_>) -> FailureDecision;
}

// =============================================================================
// Console
// =============================================================================

/// Line-oriented prompts over any reader/writer pair (stdin/stderr in the CLI).
pub struct ConsoleInteraction<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleInteraction<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, line: impl AsRef<str>) {
        let _ = writeln!(self.output, "{}", line.as_ref());
    }

    /// Prompt and read one trimmed line; `None` on EOF or read error.
    fn ask(&mut self, prompt: &str, default: Option<&str>) -> Option<String> {
        match default {
            Some(d) => {
                let _ = write!(self.output, "{prompt} [{d}]: ");
            }
            None => {
                let _ = write!(self.output, "{prompt}: ");
            }
        }
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let answer = line.trim();
                if answer.is_empty() {
                    Some(default.unwrap_or_default().to_string())
                } else {
                    Some(answer.to_string())
                }
            }
        }
    }

    fn ask_range(&mut self, total_prompts: usize) -> Option<(usize, usize)> {
        let last = total_prompts.saturating_sub(1).to_string();
        loop {
            let start = self.ask("Start index (0-based)", Some("0"))?;
            let end = self.ask(&format!("End index (max {last})"), Some(last.as_str()))?;
            match (start.parse::<usize>(), end.parse::<usize>()) {
                (Ok(start), Ok(end)) => match AnalysisRange::new(start, end, total_prompts) {
                    Ok(range) => return Some((range.start_index, range.end_index)),
                    Err(e) => self.say(format!("Invalid range: {e}")),
                },
                _ => self.say("Please enter whole numbers."),
            }
        }
    }
}

impl<R: BufRead, W: Write> Interaction for ConsoleInteraction<R, W> {
    fn select_model(&mut self, models: &[ModelInfo]) -> Option<String> {
        if models.is_empty() {
            return None;
        }
        self.say("Available models:");
        for (i, model) in models.iter().enumerate() {
            match &model.name {
                Some(name) if name != &model.id => self.say(format!("  {}. {} ({name})", i + 1, model.id)),
                _ => self.say(format!("  {}. {}", i + 1, model.id)),
            }
        }
        loop {
            let answer = self.ask("Model number or id", None)?;
            if let Ok(n) = answer.parse::<usize>() {
                if (1..=models.len()).contains(&n) {
                    return Some(models[n - 1].id.clone());
                }
            } else if let Some(model) = models.iter().find(|m| m.id == answer) {
                return Some(model.id.clone());
            }
            self.say("Unknown model, try again.");
        }
    }

    fn select_run(&mut self, candidates: &[ResumableRun], total_prompts: usize) -> RunChoice {
        if !candidates.is_empty() {
            self.say("Unfinished runs:");
            for (i, run) in candidates.iter().enumerate() {
                let cp = &run.checkpoint;
                self.say(format!(
                    "  {}. {}  model={}  progress={}/{}  range={}-{}  saved={}",
                    i + 1,
                    run.run_id,
                    cp.current_model,
                    cp.last_processed_index,
                    cp.total_prompts,
                    cp.start_index,
                    cp.end_index,
                    cp.saved_at,
                ));
            }
            loop {
                let Some(answer) = self.ask("Run number to resume, or 'n' for a new run", Some("n"))
                else {
                    return RunChoice::Cancel;
                };
                if answer.eq_ignore_ascii_case("n") {
                    break;
                }
                match answer.parse::<usize>() {
                    Ok(n) if (1..=candidates.len()).contains(&n) => return RunChoice::Resume(n - 1),
                    _ => self.say("Enter a listed number or 'n'."),
                }
            }
        }

        self.say(format!("{total_prompts} prompts available."));
        match self.ask_range(total_prompts) {
            Some((start, end)) => RunChoice::Fresh { start, end },
            None => RunChoice::Cancel,
        }
    }

    fn on_failure(&mut self, failure: &FailureContext<'_>) -> FailureDecision {
        self.say(format!(
            "Prompt {} (index {}) failed: {}",
            failure.prompt_id, failure.index, failure.error
        ));
        self.say(format!("Progress: {}/{}", failure.processed, failure.window));
        loop {
            let Some(answer) = self.ask("Save progress and stop? (y/n)", Some("y")) else {
                return FailureDecision::Stop {
                    save_checkpoint: true,
                };
            };
            match answer.to_ascii_lowercase().as_str() {
                "y" | "yes" => {
                    return FailureDecision::Stop {
                        save_checkpoint: true,
                    }
                }
                "n" | "no" => return FailureDecision::Continue,
                _ => self.say("Please answer 'y' or 'n'."),
            }
        }
    }
}

// =============================================================================
// Scripted
// =============================================================================

/// A failure as reported to [`ScriptedInteraction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedFailure {
    pub index: usize,
    pub prompt_id: String,
    pub error: String,
    pub processed: usize,
}

/// Pre-decided answers, for unattended runs and tests.
#[derive(Debug, Clone)]
pub struct ScriptedInteraction {
    model: Option<String>,
    run_choice: RunChoice,
    decisions: VecDeque<FailureDecision>,
    fallback: FailureDecision,
    /// Every failure reported so far.
    pub failures: Vec<ReportedFailure>,
}

impl ScriptedInteraction {
    pub fn new(fallback: FailureDecision) -> Self {
        Self {
            model: None,
            run_choice: RunChoice::Cancel,
            decisions: VecDeque::new(),
            fallback,
            failures: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_run_choice(mut self, choice: RunChoice) -> Self {
        self.run_choice = choice;
        self
    }

    /// Queue a decision; queued ones are used before the fallback.
    pub fn then(mut self, decision: FailureDecision) -> Self {
        self.decisions.push_back(decision);
        self
    }
}

impl Interaction for ScriptedInteraction {
    fn select_model(&mut self, models: &[ModelInfo]) -> Option<String> {
        match &self.model {
            Some(model) => Some(model.clone()),
            None => models.first().map(|m| m.id.clone()),
        }
    }

    fn select_run(&mut self, _candidates: &[ResumableRun], _total_prompts: usize) -> RunChoice {
        self.run_choice.clone()
    }

    fn on_failure(&mut self, failure: &FailureContext<'_>) -> FailureDecision {
        self.failures.push(ReportedFailure {
            index: failure.index,
            prompt_id: failure.prompt_id.to_string(),
            error: failure.error.to_string(),
            processed: failure.processed,
        });
        self.decisions.pop_front().unwrap_or(self.fallback)
    }
}
