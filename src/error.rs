//! Error types for the pdf-toolbelt library.
//!
//! Each component owns one error enum so callers can match on exactly the
//! failures that component can produce:
//!
//! * [`MarkerError`]: the Datalab submit/poll pipeline. Fatal for the job.
//! * [`MaterializeError`]: writing a completed job's artifacts to disk.
//! * [`VisionError`]: one vision-model call. The batch orchestrator never
//!   lets it escape: it is folded into a
//!   [`crate::graphify::ClassificationResult`] with `is_graph = false`.
//! * [`BatchError`]: only the failures that stop a whole batch (no
//!   classifier, unwritable output directory).
//! * [`TableError`]: PDF table extraction and spreadsheet writing.
//! * [`ConfigError`]: builder validation.
//!
//! Sandbox failures are not errors at all; they are reported as
//! [`crate::graphify::ExecutionOutcome`] values.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the remote document-conversion job.
#[derive(Debug, Error)]
pub enum MarkerError {
    // ── Submission ───────────────────────────────────────────────────────
    /// The endpoint rejected the upload or omitted the status-check URL.
    #[error("Marker submission failed: {message}")]
    Submission { message: String },

    /// The input document could not be read or is unusable.
    #[error("Invalid input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    // ── Polling ──────────────────────────────────────────────────────────
    /// The status endpoint answered with something we cannot interpret,
    /// including any status other than `processing` or `complete`.
    ///
    /// `payload` is the response when it was JSON.
    #[error("{detail}")]
    Protocol {
        detail: String,
        payload: Option<Box<serde_json::Value>>,
    },

    /// The job did not complete within the configured budget.
    #[error("Timed out after {secs:.0}s waiting for Datalab job to complete.\nIncrease --timeout-s.")]
    Timeout { secs: f64 },

    /// The job reached a terminal state but reported failure.
    ///
    /// `payload` is the last status response, kept so callers can still
    /// write it out for traceability.
    #[error("Datalab job failed: {message}")]
    JobFailed {
        message: String,
        payload: Box<serde_json::Value>,
    },

    // ── Transport ────────────────────────────────────────────────────────
    /// A single HTTP exchange failed before a response was received.
    #[error("HTTP request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Failures while persisting a completed job's artifacts.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise '{path}': {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures of a single vision-model classification call.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum VisionError {
    /// Permanent 4xx rejection (anything but 429 and the handled
    /// unsupported-parameter cases).
    #[error("GPT API error (HTTP {status}): {body}")]
    RemoteRejection { status: u16, body: String },

    /// Every attempt hit a retryable failure.
    #[error("GPT API error after {attempts} attempts: {last_error}")]
    RemoteExhausted { attempts: u32, last_error: String },

    /// The reply was not the JSON object we asked for.
    #[error("Failed to parse GPT JSON content: {detail}")]
    MalformedReply { detail: String },

    /// Non-timeout transport failure (DNS, connection refused, TLS).
    #[error("GPT API transport error: {detail}")]
    Transport { detail: String },
}

/// Failures that abort a whole graphify batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The orchestrator was built without a classification client.
    #[error("No image classifier configured.\n{hint}")]
    ClassifierUnavailable { hint: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise batch summary: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures of PDF table extraction and spreadsheet generation.
#[derive(Debug, Error)]
pub enum TableError {
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// pdfium refused the document.
    #[error("PDF could not be parsed: {0}")]
    InvalidPdf(String),

    /// Text could not be read from a page.
    #[error("Text extraction failed for page {page}: {detail}")]
    PageText { page: usize, detail: String },

    #[error("Spreadsheet generation failed: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),
}

/// Builder validation failure.
#[derive(Debug, Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_mentions_budget() {
        let e = MarkerError::Timeout { secs: 900.0 };
        let msg = e.to_string();
        assert!(msg.contains("900s"), "got: {msg}");
        assert!(msg.contains("--timeout-s"));
    }

    #[test]
    fn job_failed_display_carries_remote_message() {
        let e = MarkerError::JobFailed {
            message: "Unsupported file".into(),
            payload: Box::new(serde_json::json!({"status": "complete"})),
        };
        assert!(e.to_string().contains("Unsupported file"));
    }

    #[test]
    fn rejection_display_includes_status() {
        let e = VisionError::RemoteRejection {
            status: 401,
            body: "invalid key".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("invalid key"));
    }

    #[test]
    fn exhausted_display_includes_attempts() {
        let e = VisionError::RemoteExhausted {
            attempts: 3,
            last_error: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
    }
}
