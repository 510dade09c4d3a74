//! Lean 4 autoformalization CLI.
//!
//! Provides the `formalizer` binary:
//! - `run`: formalize one statement into a `.lean` artifact;
//! - `batch`: formalize every problem in a JSONL file.
//!
//! Both go through the same `Formalizer` pipeline with the real
//! collaborators (OpenAI-compatible model, LeanSearch, `lake env lean`).

mod batch;
mod config;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use formalizer_agent::{LeanSearchClient, OpenAiCompatibleModel};
use formalizer_check::LeanCompiler;
use formalizer_synth::{Formalizer, ModelOptions, PipelineError};
use tracing_subscriber::EnvFilter;

use crate::config::FormalizerConfig;

/// Formalize informal mathematics into Lean 4 with Mathlib.
#[derive(Parser)]
#[command(name = "formalizer", about = "Lean 4 autoformalization pipeline")]
struct Cli {
    /// TOML configuration file (default: built-in defaults).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Formalize a single statement.
    Run {
        /// The informal statement.
        #[arg(short, long)]
        statement: String,

        /// Artifact path; a `<stem>_report.json` is written beside it.
        /// Prints the artifact to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Formalize every problem in a JSONL file.
    Batch {
        /// One `{"index", "question", "category"?}` object per line.
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "./formalized")]
        output_dir: PathBuf,

        /// Process at most this many problems.
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match FormalizerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            process::exit(3);
        }
    };

    let exit_code = match cli.command {
        Commands::Run { statement, output } => run_single(&config, &statement, output).await,
        Commands::Batch {
            input,
            output_dir,
            limit,
        } => run_batch(&config, &input, &output_dir, limit).await,
    };
    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_formalizer(config: &FormalizerConfig) -> Result<Formalizer, i32> {
    let search = match LeanSearchClient::new(config.search.clone()) {
        Ok(search) => search,
        Err(e) => {
            eprintln!("Error: failed to set up search client: {}", e);
            return Err(3);
        }
    };
    Formalizer::new(
        Arc::new(OpenAiCompatibleModel::new(config.llm.clone())),
        Arc::new(search),
        Arc::new(LeanCompiler::new(config.lean.to_lean_config())),
        config.run.clone(),
        ModelOptions::from_llm(&config.llm),
    )
    .map_err(|e| {
        eprintln!("Error: {}", e);
        exit_code_for(&e)
    })
}

/// Execute the run subcommand.
///
/// Returns exit code: 0 = every concept synthesized, 1 = some concepts
/// failed, 2 = graph error, 3 = I/O or config error.
async fn run_single(config: &FormalizerConfig, statement: &str, output: Option<PathBuf>) -> i32 {
    let formalizer = match build_formalizer(config) {
        Ok(f) => f,
        Err(code) => return code,
    };

    let run = match formalizer.formalize(statement).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for(&e);
        }
    };

    match output {
        Some(path) => {
            let (dir, stem) = split_output_path(&path);
            if let Err(e) = run.write_to(&dir, &stem) {
                eprintln!("Error: failed to write '{}': {}", path.display(), e);
                return exit_code_for(&e);
            }
        }
        None => print!("{}", run.artifact),
    }

    let report = serde_json::to_string_pretty(&run.report.counts)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize counts: {}\"}}", e));
    eprintln!("{}", report);

    if run.report.all_synthesized() {
        0
    } else {
        1
    }
}

/// Execute the batch subcommand.
///
/// Returns exit code: 0 = every problem fully synthesized, 1 = some
/// problems failed or errored, 3 = I/O or config error.
async fn run_batch(
    config: &FormalizerConfig,
    input: &Path,
    output_dir: &Path,
    limit: Option<usize>,
) -> i32 {
    let formalizer = match build_formalizer(config) {
        Ok(f) => f,
        Err(code) => return code,
    };

    match batch::run_batch(&formalizer, input, output_dir, limit).await {
        Ok(tally) if tally.all_synthesized() => 0,
        Ok(_) => 1,
        Err(e) => {
            eprintln!("Error: batch aborted: {}", e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &PipelineError) -> i32 {
    match err {
        PipelineError::Graph(_) => 2,
        PipelineError::Config(_) | PipelineError::Io(_) | PipelineError::Serialize(_) => 3,
    }
}

/// `out/problem.lean` -> (`out`, `problem`).
fn split_output_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "formalized".to_string());
    (dir, stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use formalizer_core::{ConceptId, ConfigError, CoreError};

    #[test]
    fn output_path_splits_into_dir_and_stem() {
        assert_eq!(
            split_output_path(Path::new("out/problem_3.lean")),
            (PathBuf::from("out"), "problem_3".to_string())
        );
        assert_eq!(
            split_output_path(Path::new("theorem.lean")),
            (PathBuf::from("."), "theorem".to_string())
        );
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let graph = PipelineError::Graph(CoreError::CycleDetected { id: ConceptId(0) });
        let config = PipelineError::Config(ConfigError {
            field: "planner.max_nodes",
            reason: "must be at least 1".into(),
        });
        let io = PipelineError::Io(std::io::Error::other("disk full"));
        assert_eq!(exit_code_for(&graph), 2);
        assert_eq!(exit_code_for(&config), 3);
        assert_eq!(exit_code_for(&io), 3);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "formalizer",
            "--verbose",
            "batch",
            "--input",
            "data.jsonl",
            "--limit",
            "5",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Batch {
                input,
                output_dir,
                limit,
            } => {
                assert_eq!(input, PathBuf::from("data.jsonl"));
                assert_eq!(output_dir, PathBuf::from("./formalized"));
                assert_eq!(limit, Some(5));
            }
            Commands::Run { .. } => panic!("expected batch"),
        }
    }
}
