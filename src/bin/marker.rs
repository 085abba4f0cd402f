//! CLI binary: convert a PDF with the Datalab Marker API.
//!
//! Submits the document, polls until the job finishes, and writes the raw
//! response, Markdown, images and any structured extraction next to the
//! input. Optionally hands the saved images to graphify.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_toolbelt::cli::{
    bold, default_graphify_out_dir, dim, flag_or_env, green, init_logging, resolve_api_base,
    resolve_model, run_graphify, spinner, GraphifyRun,
};
use pdf_toolbelt::config::DEFAULT_MARKER_URL;
use pdf_toolbelt::graphify::list_images;
use pdf_toolbelt::marker::{
    load_schema_file, materialize, safe_stem, write_response_artifact, MaterializeOptions,
    OutputFormat,
};
use pdf_toolbelt::{
    JobSubmission, MarkerClient, MarkerConfig, MarkerError, SandboxConfig, VisionConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown + images next to the PDF (in ./datalab_outputs)
  marker report.pdf

  # Structured extraction with a JSON schema (enables use_llm)
  marker invoice.pdf --schema-file invoice.schema.json

  # Also classify the extracted images and re-plot charts
  marker paper.pdf --graphify --graphify-execute

ENVIRONMENT VARIABLES:
  DATALAB_API_KEY                  Datalab API key
  GPT_API_KEY / OPENAI_API_KEY     Vision API key for --graphify
  GPT_API_BASE / OPENAI_API_BASE   Vision API base for --graphify
  GPT_MODEL                        Vision model for --graphify
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormatArg {
    Markdown,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Markdown => OutputFormat::Markdown,
        }
    }
}

/// Convert PDF to Markdown (and JSON) via the Datalab Marker API.
#[derive(Parser, Debug)]
#[command(
    name = "marker",
    version,
    about = "Convert PDF to Markdown (and JSON) via the Datalab Marker API",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the input PDF.
    input: PathBuf,

    /// Datalab API key.
    #[arg(long, env = "DATALAB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Marker endpoint URL.
    #[arg(long, default_value = DEFAULT_MARKER_URL)]
    endpoint: String,

    /// Output directory (default: <input dir>/datalab_outputs).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Base name for output files (default: sanitised input stem).
    #[arg(long)]
    name: Option<String>,

    /// JSON schema for structured extraction, sent as page_schema.
    /// Implies --use-llm true unless set explicitly.
    #[arg(long)]
    schema_file: Option<PathBuf>,

    /// Output format requested from Datalab.
    #[arg(long, value_enum, default_value = "markdown")]
    output_format: OutputFormatArg,

    /// Force OCR.
    #[arg(long)]
    force_ocr: bool,

    /// Paginate output.
    #[arg(long)]
    paginate: bool,

    /// Explicitly set use_llm.
    #[arg(long, value_name = "true|false", action = clap::ArgAction::Set)]
    use_llm: Option<bool>,

    /// Strip any existing OCR from the PDF.
    #[arg(long)]
    strip_existing_ocr: bool,

    /// Disable image extraction.
    #[arg(long)]
    disable_image_extraction: bool,

    /// Max seconds to wait for completion.
    #[arg(long = "timeout-s", default_value_t = 900.0)]
    timeout_s: f64,

    /// Seconds between status checks.
    #[arg(long = "poll-interval-s", default_value_t = 2.0)]
    poll_interval_s: f64,

    /// Do not save images from the response.
    #[arg(long)]
    no_save_images: bool,

    /// Send saved images to a vision model to detect and reconstruct graphs.
    #[arg(long)]
    graphify: bool,

    /// Execute generated Python to recreate plots.
    #[arg(long)]
    graphify_execute: bool,

    /// Vision API key (falls back to GPT_API_KEY, then OPENAI_API_KEY).
    #[arg(long)]
    graphify_api_key: Option<String>,

    /// Vision API base (falls back to GPT_API_BASE, then OPENAI_API_BASE).
    #[arg(long)]
    graphify_api_base: Option<String>,

    /// Vision model (falls back to GPT_MODEL; default gpt-5-mini).
    #[arg(long)]
    graphify_model: Option<String>,

    /// Limit the number of images sent to the vision model.
    #[arg(long)]
    graphify_max_images: Option<usize>,

    /// Extra textual context for the vision model.
    #[arg(long)]
    graphify_context: Option<String>,

    /// Graphify output directory (default: <images_dir>_graphify).
    #[arg(long)]
    graphify_out_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let input = cli.input.canonicalize().unwrap_or_else(|_| cli.input.clone());
    if !input.is_file() {
        eprintln!("Input file not found: {}", input.display());
        return Ok(ExitCode::from(2));
    }
    let Some(api_key) = cli.api_key.clone().filter(|k| !k.trim().is_empty()) else {
        eprintln!("Missing API key. Provide --api-key or set DATALAB_API_KEY.");
        return Ok(ExitCode::from(2));
    };

    let out_dir = match &cli.out_dir {
        Some(dir) => dir.clone(),
        None => input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("datalab_outputs"),
    };
    let base_name = cli.name.clone().unwrap_or_else(|| safe_stem(&input));

    let page_schema = match &cli.schema_file {
        Some(path) => Some(load_schema_file(path).context("Invalid --schema-file")?),
        None => None,
    };

    let mut job = JobSubmission::new(&input);
    job.output_format = cli.output_format.into();
    job.force_ocr = cli.force_ocr;
    job.paginate = cli.paginate;
    job.strip_existing_ocr = cli.strip_existing_ocr;
    job.disable_image_extraction = cli.disable_image_extraction;
    job.use_llm = cli.use_llm;
    job.page_schema = page_schema;
    let schema_supplied = job.page_schema.is_some();

    let config = MarkerConfig::builder(api_key)
        .endpoint(&cli.endpoint)
        .job_timeout_secs(cli.timeout_s)
        .poll_interval_secs(cli.poll_interval_s)
        .build()
        .context("Invalid configuration")?;
    let client = MarkerClient::new(config).context("Failed to create HTTP client")?;

    let bar = (!cli.quiet).then(|| spinner("Waiting for Datalab Marker…"));
    let outcome = client.submit_and_wait(&job).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let (handle, result) = match outcome {
        Ok(done) => done,
        Err(e) => {
            let payload = match &e {
                MarkerError::JobFailed { payload, .. } => Some(&**payload),
                MarkerError::Protocol { payload, .. } => payload.as_deref(),
                _ => None,
            };
            if let Some(payload) = payload {
                match write_response_artifact(payload, &out_dir, &base_name) {
                    Ok(path) => eprintln!("Response saved to {}", path.display()),
                    Err(e) => warn!("Could not save failed response: {}", e),
                }
            }
            return Err(e).context("Marker job failed");
        }
    };

    let manifest = materialize(
        &result,
        &MaterializeOptions {
            out_dir: out_dir.clone(),
            base_name: base_name.clone(),
            save_images: !cli.no_save_images,
            schema_supplied,
        },
    )
    .context("Failed to write outputs")?;

    if !cli.no_save_images && cli.graphify {
        let images_dir = out_dir.join(format!("{base_name}_images"));
        maybe_graphify(&cli, &images_dir).await?;
    }

    println!("{} Done. {}", green("✔"), dim(&format!("(request {})", handle.request_id)));
    println!("- JSON response: {}", bold(&manifest.response_json.display().to_string()));
    if let Some(md) = &manifest.markdown {
        println!("- Markdown: {}", md.display());
    }
    if let Some(extraction) = &manifest.extraction {
        println!("- Extraction: {}", extraction.display());
    }
    if manifest.images_saved > 0 || manifest.image_urls > 0 {
        println!(
            "- Images: saved {} file(s); {} URL(s) (see image_urls.txt if present)",
            manifest.images_saved, manifest.image_urls
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Run graphify over the saved images when there are any and a key is set.
async fn maybe_graphify(cli: &Cli, images_dir: &Path) -> Result<()> {
    let has_images = images_dir.is_dir()
        && list_images(images_dir)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
    if !has_images {
        eprintln!(
            "Skipping graphify: no local images were saved (enable image extraction or check response)"
        );
        return Ok(());
    }

    let Some(api_key) = flag_or_env(
        cli.graphify_api_key.clone(),
        &["GPT_API_KEY", "OPENAI_API_KEY"],
    ) else {
        eprintln!(
            "Skipping graphify: missing GPT API key (use --graphify-api-key or set GPT_API_KEY/OPENAI_API_KEY)"
        );
        return Ok(());
    };

    let model = resolve_model(cli.graphify_model.clone());
    let vision = VisionConfig::builder(api_key)
        .api_base(resolve_api_base(cli.graphify_api_base.clone()))
        .model(&model)
        .build()
        .context("Invalid graphify configuration")?;
    let out_dir = cli
        .graphify_out_dir
        .clone()
        .unwrap_or_else(|| default_graphify_out_dir(images_dir));

    eprintln!(
        "Graphify: sending images from {} to model '{}'...",
        images_dir.display(),
        model
    );
    let summary = run_graphify(GraphifyRun {
        images_dir: images_dir.to_path_buf(),
        out_dir,
        vision,
        sandbox: SandboxConfig::default(),
        execute: cli.graphify_execute,
        max_images: cli.graphify_max_images,
        context: cli.graphify_context.clone(),
        concurrency: 3,
        exec_timeout_secs: 30,
        show_progress: !cli.quiet,
    })
    .await?;
    eprintln!(
        "- Graphify summary: {} ({} items)",
        summary.summary_path.display(),
        summary.count()
    );
    Ok(())
}
