#![forbid(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use bias_harness::checkpoint::{CheckpointStore, ResumableRun};
use bias_harness::gateway::{provider_from_config, ModelInfo};
use bias_harness::interaction::{
    ConsoleInteraction, FailureContext, FailureDecision, Interaction, RunChoice,
};
use bias_harness::{
    BatchRunner, HarnessConfig, InferenceClient, InferenceError, PromptSet, RunPlan, RunSelector,
    RunState, SelectionError,
};

#[derive(Parser)]
#[command(name = "bias-harness", version, about = "Resumable LLM bias scoring batches")]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a prompt range, starting fresh or resuming a run
    Run {
        /// Prompt CSV (columns: id, prompt_text|prompt)
        #[arg(long)]
        prompts: Option<PathBuf>,

        /// Root directory holding one directory per run
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Model id; asked interactively when omitted on a fresh run
        #[arg(long)]
        model: Option<String>,

        /// Model used for bias scoring (default: the run's model)
        #[arg(long)]
        evaluator_model: Option<String>,

        /// First prompt index of a fresh run
        #[arg(long, conflicts_with = "resume")]
        start: Option<usize>,

        /// Last prompt index of a fresh run (inclusive)
        #[arg(long, conflicts_with = "resume")]
        end: Option<usize>,

        /// Resume the run with this directory name
        #[arg(long)]
        resume: Option<String>,

        /// What to do when a prompt fails after all retries
        #[arg(long, value_enum, default_value = "ask")]
        on_error: OnError,

        /// Attempts per remote call
        #[arg(long)]
        max_retries: Option<u32>,

        /// Seconds between attempts
        #[arg(long)]
        retry_delay: Option<u64>,
    },
    /// List runs that have a checkpoint
    Runs {
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },
    /// List models offered by the provider
    Models,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnError {
    /// Prompt on the terminal
    Ask,
    /// Skip the failed prompt and go on
    Continue,
    /// Save progress and stop
    Stop,
}

/// Console prompts, except for failures when `--on-error` decides them.
struct CliInteraction<R, W> {
    console: ConsoleInteraction<R, W>,
    on_error: OnError,
}

impl<R: BufRead, W: Write> Interaction for CliInteraction<R, W> {
    fn select_model(&mut self, models: &[ModelInfo]) -> Option<String> {
        self.console.select_model(models)
    }

    fn select_run(&mut self, candidates: &[ResumableRun], total_prompts: usize) -> RunChoice {
        self.console.select_run(candidates, total_prompts)
    }

    fn on_failure(&mut self, failure: &FailureContext<'_>) -> FailureDecision {
        match self.on_error {
            OnError::Ask => self.console.on_failure(failure),
            OnError::Continue => FailureDecision::Continue,
            OnError::Stop => FailureDecision::Stop {
                save_checkpoint: true,
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose {
        bias_harness::logging::init_with_default("bias_harness=debug");
    } else {
        bias_harness::logging::init();
    }

    let mut config = HarnessConfig::from_env();

    match cli.command {
        Commands::Runs { results_dir } => {
            if let Some(dir) = results_dir {
                config.results_dir = dir;
            }
            print_runs(&CheckpointStore::find_resumable(&config.results_dir));
        }
        Commands::Models => {
            let provider = provider_from_config(&config)
                .map_err(|e| InferenceError::Configuration(e.to_string()))?;
            for model in provider.list_models().await? {
                println!("{}\t{}", model.id, model.label());
            }
        }
        Commands::Run {
            prompts,
            results_dir,
            model,
            evaluator_model,
            start,
            end,
            resume,
            on_error,
            max_retries,
            retry_delay,
        } => {
            if let Some(path) = prompts {
                config.prompts_file = path;
            }
            if let Some(dir) = results_dir {
                config.results_dir = dir;
            }
            if let Some(m) = evaluator_model {
                config.evaluator_model = Some(m);
            }
            if let Some(n) = max_retries {
                config.max_retries = n.max(1);
            }
            if let Some(secs) = retry_delay {
                config.retry_delay = Duration::from_secs(secs);
            }

            // Fail fast on a missing key, before any file is touched.
            let provider = provider_from_config(&config)
                .map_err(|e| InferenceError::Configuration(e.to_string()))?;

            let prompts = PromptSet::load(&config.prompts_file)?;
            let selector = RunSelector::new(&config.results_dir, prompts.len());

            let mut interaction = CliInteraction {
                console: ConsoleInteraction::new(io::stdin().lock(), io::stderr()),
                on_error,
            };

            let plan = match select_plan(&selector, &mut interaction, resume, start, end, prompts.len()) {
                Ok(plan) => plan,
                Err(SelectionError::Cancelled) => {
                    eprintln!("cancelled");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let model = match plan.model.clone().or(model) {
                Some(model) => model,
                None => {
                    let models = provider.list_models().await?;
                    if models.is_empty() {
                        return Err("provider returned no models".into());
                    }
                    interaction
                        .select_model(&models)
                        .ok_or("no model selected")?
                }
            };

            let client = InferenceClient::with_provider(provider, model, &config);
            let mut runner = BatchRunner::new(&client, &prompts, plan);
            let outcome = runner.run(&mut interaction).await?;

            let plan = runner.plan();
            println!("run:        {}", plan.run_id);
            println!("directory:  {}", plan.run_dir.display());
            println!("state:      {:?}", outcome.state);
            println!("processed:  {}", outcome.processed);
            if !outcome.skipped.is_empty() {
                println!("skipped:    {:?}", outcome.skipped);
            }
            if let Some(last) = outcome.last_completed {
                println!("checkpoint: {last}");
            }
            println!("rows:       {}", outcome.records_written);

            if outcome.state == RunState::Aborted {
                println!(
                    "resume with: bias-harness run --resume {}",
                    plan.run_id
                );
            }
        }
    }

    Ok(())
}

fn select_plan(
    selector: &RunSelector,
    interaction: &mut dyn Interaction,
    resume: Option<String>,
    start: Option<usize>,
    end: Option<usize>,
    total_prompts: usize,
) -> Result<RunPlan, SelectionError> {
    if let Some(run_id) = resume {
        return selector.resume(&run_id);
    }
    if start.is_some() || end.is_some() {
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(total_prompts.saturating_sub(1));
        return selector.fresh(start, end);
    }
    selector.select(interaction)
}

fn print_runs(runs: &[ResumableRun]) {
    if runs.is_empty() {
        println!("no resumable runs");
        return;
    }
    for run in runs {
        let cp = &run.checkpoint;
        let status = if cp.is_complete() { "complete" } else { "resumable" };
        println!(
            "{}\t{}\t{}/{}\t{}-{}\t{}\t{}",
            run.run_id,
            cp.current_model,
            cp.last_processed_index,
            cp.total_prompts,
            cp.start_index,
            cp.end_index,
            cp.saved_at,
            status,
        );
    }
}
