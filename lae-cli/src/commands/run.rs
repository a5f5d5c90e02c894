use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use lae_service::{
    progress_channel, Engine, EngineConfig, ExecutionEvent, InputParser, OutputWriter,
};

/// Evaluate a JSON expression file
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the expression JSON file
    pub input: PathBuf,

    /// Write the result document here instead of stdout
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, short = 't', value_name = "N")]
    pub threads: Option<usize>,

    /// Seed for the workers' fatigue multipliers
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Print the per-worker report after the run
    #[arg(long)]
    pub report: bool,

    /// Engine config file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let input_path = &args.input;
    let output_path = args.output.as_deref();

    if !input_path.exists() {
        color_eyre::eyre::bail!("Input file not found: {}", input_path.display());
    }

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::discover()?,
    };
    if let Some(threads) = args.threads {
        config.workers = threads;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    // Parse errors are reported in the output document too
    output::action("Parsing", &format!("{}", input_path.display()));
    let tree = match InputParser::parse_file(input_path) {
        Ok(tree) => tree,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            OutputWriter::write_error(&e.to_string(), output_path)?;
            std::process::exit(1);
        }
    };

    let (tx, mut rx) = progress_channel();
    let mut engine = Engine::with_config(config)?.with_progress(tx);

    // The engine blocks on its pool barrier; keep it off the async workers.
    // Dropping the engine closes the event channel.
    let exec_handle = tokio::task::spawn_blocking(move || {
        let result = engine.run(tree);
        let report = engine.worker_reports();
        (result, report)
    });

    while let Some(event) = rx.recv().await {
        match event {
            ExecutionEvent::RunStarted {
                operations,
                workers,
            } => {
                output::banner(&format!(
                    "Evaluating {} operation(s) on {} worker(s)",
                    operations, workers
                ));
            }

            ExecutionEvent::StepStarted {
                step,
                operator,
                tasks,
            } => {
                output::step_started(step, operator, tasks);
            }

            ExecutionEvent::StepCompleted {
                rows,
                cols,
                duration,
                ..
            } => output::step_completed(rows, cols, duration),

            ExecutionEvent::Error { message, step } => match step {
                Some(step) => output::failed(&format!("Step {} failed: {}", step, message)),
                None => output::failed(&message),
            },

            ExecutionEvent::RunCompleted {
                steps,
                success,
                duration,
            } => {
                if success {
                    output::passed(&format!(
                        "Evaluated in {} step(s), {:.2}s",
                        steps,
                        duration.as_secs_f64()
                    ));
                } else {
                    output::failed(&format!(
                        "Evaluation failed after {} step(s), {:.2}s",
                        steps,
                        duration.as_secs_f64()
                    ));
                }
            }
        }
    }

    let (result, report) = exec_handle.await?;

    if args.report {
        output::banner("Worker report");
        for worker in &report {
            output::worker(worker);
        }
    }

    match result {
        Ok(root) => {
            let Some(matrix) = root.as_matrix() else {
                color_eyre::eyre::bail!("Evaluation finished without a concrete matrix");
            };
            OutputWriter::write_result(matrix, output_path)?;
            if let Some(path) = output_path {
                output::note(&format!("Result written to {}", path.display()));
            }
            Ok(())
        }
        Err(e) => {
            output::error(&e.to_string());
            OutputWriter::write_error(&e.to_string(), output_path)?;
            std::process::exit(1);
        }
    }
}
