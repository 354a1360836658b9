use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use requeue::{BatchSpec, FixSuggestion, QueueError, QueueRunner};

#[derive(Parser)]
#[command(name = "requeue", version, about = "Concurrent HTTP action queue runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch file to completion
    Run {
        /// Batch file (YAML)
        file: PathBuf,

        /// Override the batch file's worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Directory for saved results
        #[arg(long, default_value = "results")]
        out: PathBuf,
    },
    /// Parse a batch file and build its actions without sending anything
    Validate {
        /// Batch file (YAML)
        file: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run { file, workers, out } => run_batch(file, workers, out).await,
        Command::Validate { file } => validate_batch(file),
    };

    match result {
        Ok(failed) if failed > 0 => std::process::exit(1),
        Ok(_) => {}
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            if let Some(suggestion) = error.fix_suggestion() {
                eprintln!("  {} {suggestion}", "hint:".yellow());
            }
            std::process::exit(2);
        }
    }
}

/// Returns the number of failed actions.
async fn run_batch(
    file: PathBuf,
    workers: Option<usize>,
    out: PathBuf,
) -> Result<usize, QueueError> {
    let spec = BatchSpec::from_path(&file)?;
    let worker_count = workers.unwrap_or(spec.workers);
    let actions = spec.into_actions(&out)?;

    let report = QueueRunner::new()
        .with_workers(worker_count)
        .run(actions)
        .await?;

    let succeeded = report.succeeded().count();
    let failed = report.failed().count();
    println!(
        "{} {} completed ({} succeeded, {} failed) in {:.2}s",
        "done:".green().bold(),
        report.len(),
        succeeded,
        failed,
        report.elapsed.as_secs_f64(),
    );
    for action in report.failed() {
        let detail = match (&action.response, &action.transport_error) {
            (Some(response), _) => format!("status {}", response.status),
            (None, Some(error)) => error.clone(),
            (None, None) => "no response".to_string(),
        };
        println!(
            "  {} {} ({} attempts): {detail}",
            "failed:".red(),
            action.name,
            action.attempts,
        );
    }
    Ok(failed)
}

fn validate_batch(file: PathBuf) -> Result<usize, QueueError> {
    let spec = BatchSpec::from_path(&file)?;
    let workers = spec.workers;
    let actions = spec.into_actions(std::path::Path::new("results"))?;
    println!(
        "{} {} actions, {} workers",
        "valid:".green().bold(),
        actions.len(),
        workers,
    );
    Ok(0)
}
