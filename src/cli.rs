//! Pieces shared by the `marker`, `graphify` and `tables-server` binaries.
//!
//! Only compiled with the `cli` feature.

use crate::config::{BatchConfig, SandboxConfig, VisionConfig, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::graphify::{list_images, BatchSummary, CodeExecutor, GraphifyBatch, ImageClassifier, Sandbox, VisionClient};
use crate::progress::{BatchProgressCallback, ProgressCallback};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

pub fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
pub fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
pub fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
pub fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Install the stderr tracing subscriber. `RUST_LOG` wins over the flags.
pub fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .init();
}

/// Spinner shown while waiting on a single remote job.
pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// First non-empty value among the flag and the given environment variables.
pub fn flag_or_env(flag: Option<String>, vars: &[&str]) -> Option<String> {
    flag.filter(|v| !v.trim().is_empty()).or_else(|| {
        vars.iter()
            .filter_map(|v| std::env::var(v).ok())
            .find(|v| !v.trim().is_empty())
    })
}

// ── Graphify ─────────────────────────────────────────────────────────────

/// Progress bar over the images of one graphify batch.
pub struct CliBatchProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliBatchProgress {
    pub fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Graphify");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliBatchProgress {
    fn on_batch_start(&self, total_images: usize) {
        self.bar.set_length(total_images as u64);
    }

    fn on_image_start(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_image_complete(&self, name: &str, is_graph: bool, error: Option<&str>) {
        let line = match error {
            Some(e) => {
                self.errors.fetch_add(1, Ordering::SeqCst);
                let short: String = e.lines().next().unwrap_or_default().chars().take(80).collect();
                format!("  {} {}  {}", red("✗"), name, red(&short))
            }
            None if is_graph => format!("  {} {}  {}", green("✓"), name, dim("graph")),
            None => format!("  {} {}  {}", green("✓"), name, dim("not a graph")),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_images: usize, graphs_found: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} image(s), {} graph(s), {} error(s)",
            if errors == 0 { green("✔") } else { red("⚠") },
            bold(&total_images.to_string()),
            graphs_found,
            errors
        );
    }
}

/// Everything needed to run graphify over one directory.
#[derive(Debug, Clone)]
pub struct GraphifyRun {
    pub images_dir: PathBuf,
    pub out_dir: PathBuf,
    pub vision: VisionConfig,
    pub sandbox: SandboxConfig,
    pub execute: bool,
    pub max_images: Option<usize>,
    pub context: Option<String>,
    pub concurrency: usize,
    pub exec_timeout_secs: u64,
    pub show_progress: bool,
}

/// Default graphify output directory: `<images_dir>_graphify` next to it.
pub fn default_graphify_out_dir(images_dir: &Path) -> PathBuf {
    let name = images_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "images".to_string());
    images_dir.with_file_name(format!("{name}_graphify"))
}

/// `GPT_API_BASE`, `OPENAI_API_BASE`, or the public endpoint.
pub fn resolve_api_base(flag: Option<String>) -> String {
    flag_or_env(flag, &["GPT_API_BASE", "OPENAI_API_BASE"]).unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// `GPT_MODEL` or the default model.
pub fn resolve_model(flag: Option<String>) -> String {
    flag_or_env(flag, &["GPT_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Wire the vision client, sandbox and orchestrator together and run.
pub async fn run_graphify(run: GraphifyRun) -> Result<BatchSummary> {
    let images = list_images(&run.images_dir)
        .with_context(|| format!("Failed to list images in {}", run.images_dir.display()))?;

    let classifier: Arc<dyn ImageClassifier> =
        Arc::new(VisionClient::new(run.vision).context("Failed to create vision client")?);
    let executor: Option<Arc<dyn CodeExecutor>> = if run.execute {
        Some(Arc::new(Sandbox::new(run.sandbox)))
    } else {
        None
    };

    let mut builder = BatchConfig::builder(&run.out_dir)
        .execute(run.execute)
        .concurrency(run.concurrency)
        .max_images(run.max_images)
        .extra_context(run.context)
        .exec_timeout_secs(run.exec_timeout_secs);
    if run.show_progress {
        let cb: ProgressCallback = CliBatchProgress::new();
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid graphify configuration")?;

    GraphifyBatch::new(Some(classifier), executor)
        .run(images, &config)
        .await
        .context("Graphify batch failed")
}
