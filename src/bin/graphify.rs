//! CLI binary: classify extracted images and reconstruct charts.
//!
//! Prints `{"summary_path": ..., "count": N}` on stdout when done.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_toolbelt::cli::{
    default_graphify_out_dir, flag_or_env, init_logging, resolve_api_base, resolve_model,
    run_graphify, GraphifyRun,
};
use pdf_toolbelt::{SandboxConfig, VisionConfig};
use std::path::PathBuf;
use std::process::ExitCode;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Classify only
  graphify datalab_outputs/report_images

  # Classify and re-plot detected charts (needs python3 + matplotlib)
  graphify datalab_outputs/report_images --execute --concurrency 4

ENVIRONMENT VARIABLES:
  GPT_API_KEY / OPENAI_API_KEY     Vision API key
  GPT_API_BASE / OPENAI_API_BASE   API base (default https://api.openai.com/v1)
  GPT_MODEL                        Model (default gpt-5-mini)
  GRAPHIFY_PYTHON                  Interpreter used with --execute (default python3)
"#;

/// Classify images as graphs and reconstruct plots via a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "graphify",
    version,
    about = "Classify images as graphs and reconstruct plots via a vision model",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing extracted images.
    images_dir: PathBuf,

    /// Output directory (default: <images_dir>_graphify).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Vision API key (falls back to GPT_API_KEY, then OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// API base (falls back to GPT_API_BASE, then OPENAI_API_BASE).
    #[arg(long)]
    api_base: Option<String>,

    /// Model name (falls back to GPT_MODEL; default gpt-5-mini).
    #[arg(long)]
    model: Option<String>,

    /// Limit the number of images processed.
    #[arg(long)]
    max_images: Option<usize>,

    /// Execute generated Python to recreate plots.
    #[arg(long)]
    execute: bool,

    /// Extra textual context for the model.
    #[arg(long)]
    context: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long = "timeout-s", default_value_t = 120)]
    timeout_s: u64,

    /// Parallel workers.
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    /// Seconds allowed for each plot-code execution.
    #[arg(long = "exec-timeout-s", default_value_t = 30)]
    exec_timeout_s: u64,

    /// Python interpreter for --execute.
    #[arg(long, env = "GRAPHIFY_PYTHON")]
    python: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors and the final JSON line.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let show_progress = !cli.quiet && !cli.no_progress;
    init_logging(cli.verbose, cli.quiet || (show_progress && !cli.verbose));

    let images_dir = cli
        .images_dir
        .canonicalize()
        .unwrap_or_else(|_| cli.images_dir.clone());
    if !images_dir.is_dir() {
        eprintln!("Images directory not found: {}", images_dir.display());
        return Ok(ExitCode::from(2));
    }

    let Some(api_key) = flag_or_env(cli.api_key, &["GPT_API_KEY", "OPENAI_API_KEY"]) else {
        eprintln!("Missing GPT API key. Provide --api-key or set GPT_API_KEY/OPENAI_API_KEY.");
        return Ok(ExitCode::from(2));
    };

    let vision = VisionConfig::builder(api_key)
        .api_base(resolve_api_base(cli.api_base))
        .model(resolve_model(cli.model))
        .timeout_secs(cli.timeout_s)
        .build()
        .context("Invalid vision configuration")?;
    let sandbox = match cli.python {
        Some(python_exe) => SandboxConfig { python_exe },
        None => SandboxConfig::default(),
    };
    let out_dir = cli
        .out_dir
        .unwrap_or_else(|| default_graphify_out_dir(&images_dir));

    let summary = run_graphify(GraphifyRun {
        images_dir,
        out_dir,
        vision,
        sandbox,
        execute: cli.execute,
        max_images: cli.max_images,
        context: cli.context,
        concurrency: cli.concurrency.max(1),
        exec_timeout_secs: cli.exec_timeout_s.max(1),
        show_progress,
    })
    .await?;

    println!(
        "{}",
        serde_json::json!({
            "summary_path": summary.summary_path,
            "count": summary.count(),
        })
    );
    Ok(ExitCode::SUCCESS)
}
