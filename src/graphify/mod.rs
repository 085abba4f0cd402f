//! Chart classification and reconstruction for extracted images.
//!
//! ```text
//! image ──classify──▶ ClassificationResult ──(execute)──▶ ExecutionOutcome
//!   └──────────────────────── BatchEntry ◀──────────────────────┘
//! ```
//!
//! 1. [`vision`] : OpenAI-compatible chat-completions call with fallbacks
//! 2. [`sandbox`]: run generated plotting code in a killable child process
//! 3. [`batch`]  : bounded fan-out over a directory of images
//!
//! The orchestrator only sees the [`ImageClassifier`] and [`CodeExecutor`]
//! traits, so tests can substitute either side.

pub mod batch;
pub mod sandbox;
pub mod vision;

pub use batch::{list_images, sanitize_filename, GraphifyBatch};
pub use sandbox::Sandbox;
pub use vision::{infer_mime_type, VisionClient};

use crate::error::VisionError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One image to classify.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub image: Vec<u8>,
    pub mime_type: String,
    /// Free text appended to the prompt as `Context: ...`.
    pub context: Option<String>,
    /// Display name used in logs.
    pub name: String,
}

/// The model's reply, or the failure that replaced it.
///
/// Keys the model adds beyond the requested schema are kept in `extra` and
/// written back out with the per-image artifact. `is_graph` takes the
/// truthiness of whatever the model sent, so `null` reads as `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default, deserialize_with = "truthy")]
    pub is_graph: bool,
    #[serde(
        default,
        deserialize_with = "loose_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub graph_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "loose_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumptions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClassificationResult {
    /// Result recorded when the classification call itself failed.
    pub fn failed(err: &VisionError) -> Self {
        Self {
            is_graph: false,
            error: Some(format!("GPT call failed: {err}")),
            ..Self::default()
        }
    }

    /// Generated code, if non-blank.
    pub fn code(&self) -> Option<&str> {
        self.python_code.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Whether the sandbox should run this result.
    pub fn is_executable(&self) -> bool {
        self.is_graph && self.code().is_some()
    }
}

fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

/// `null` is absent; any other non-string is kept as its JSON text.
fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Result of one sandboxed execution. Never an error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Set only on success, and then the file exists.
    pub output_path: Option<PathBuf>,
}

impl ExecutionOutcome {
    pub fn ok(output_path: PathBuf) -> Self {
        Self {
            success: true,
            error: None,
            output_path: Some(output_path),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            output_path: None,
        }
    }
}

/// One line of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub image: PathBuf,
    /// Per-image artifact; `None` when the worker died before writing it.
    pub json: Option<PathBuf>,
    /// Reconstructed chart; set only when execution ran and succeeded.
    pub reconstructed: Option<PathBuf>,
    pub is_graph: bool,
    pub graph_type: Option<String>,
    pub error: Option<String>,
}

impl BatchEntry {
    pub(crate) fn worker_error(image: PathBuf, detail: impl std::fmt::Display) -> Self {
        Self {
            image,
            json: None,
            reconstructed: None,
            is_graph: false,
            graph_type: None,
            error: Some(format!("worker-error: {detail}")),
        }
    }
}

/// Returned by [`GraphifyBatch::run`].
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub summary_path: PathBuf,
    /// Entries in completion order.
    pub entries: Vec<BatchEntry>,
}

impl BatchSummary {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn graphs_found(&self) -> usize {
        self.entries.iter().filter(|e| e.is_graph).count()
    }
}

/// Classifies one image.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, VisionError>;
}

/// Runs generated plotting code, writing the figure to `output_path`.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str, output_path: &Path, timeout: Duration) -> ExecutionOutcome;
}
