//! # pdf-toolbelt
//!
//! Move PDF documents through third-party extraction services and turn the
//! results into files you can use.
//!
//! ## Pipelines
//!
//! ```text
//! marker    PDF ──submit──▶ Datalab Marker ──poll──▶ JSON ──materialize──▶ .md, images, extractions
//!                                                                  │
//! graphify  images ──vision model──▶ chart JSON ──sandbox (opt.)──▶ reconstructed .png
//!
//! tables    base64 PDF ──pdfium──▶ stream tables ──▶ .xlsx (HTTP endpoint)
//! ```
//!
//! Each remote exchange is resilient in its own way: the Marker poller fails
//! fast on an unknown status, the vision client retries transient failures
//! and drops parameters an endpoint refuses, and generated code runs in a
//! child process that is killed at its deadline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_toolbelt::marker::{JobSubmission, MarkerClient};
//! use pdf_toolbelt::MarkerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MarkerConfig::builder(std::env::var("DATALAB_API_KEY")?).build()?;
//!     let client = MarkerClient::new(config)?;
//!     let (_, result) = client.submit_and_wait(&JobSubmission::new("report.pdf")).await?;
//!     println!("{}", result.markdown.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `marker`, `graphify` and `tables-server` binaries |
//!
//! ## Runtime requirements
//!
//! - Table extraction binds to a pdfium shared library; set
//!   `PDFIUM_LIB_PATH` to the directory containing it, or install it
//!   system-wide.
//! - Executing reconstructed charts needs a Python 3 interpreter with
//!   matplotlib (`GRAPHIFY_PYTHON` overrides `python3`).

// ── Modules ──────────────────────────────────────────────────────────────

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod graphify;
pub mod marker;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod tables;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BatchConfig, BatchConfigBuilder, MarkerConfig, MarkerConfigBuilder, SandboxConfig,
    VisionConfig, VisionConfigBuilder,
};
pub use error::{BatchError, ConfigError, MarkerError, MaterializeError, TableError, VisionError};
pub use graphify::{
    BatchEntry, BatchSummary, ClassificationRequest, ClassificationResult, CodeExecutor,
    ExecutionOutcome, GraphifyBatch, ImageClassifier, Sandbox, VisionClient,
};
pub use marker::{JobHandle, JobResult, JobStatus, JobSubmission, MarkerClient};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{router, ServerState};
pub use tables::{write_workbook, ExtractedTable, PdfiumTableExtractor, TableExtractor};
