//! Datalab Marker pipeline: submit a PDF, poll until it completes, and
//! write the returned artifacts to disk.
//!
//! ```text
//! JobSubmission ──submit──▶ JobHandle ──poll──▶ JobResult ──materialize──▶ ArtifactManifest
//! ```
//!
//! 1. [`client`]     : the two HTTP exchanges (multipart upload, status GET)
//! 2. [`materialize`]: response JSON, Markdown, attachments, extractions

pub mod client;
pub mod materialize;

pub use client::{submit_and_wait_sync, MarkerClient};
pub use materialize::{
    load_schema_file, materialize, safe_stem, write_response_artifact, ArtifactManifest,
    MaterializeOptions,
};

use serde_json::{Map, Value};
use std::path::PathBuf;

/// Output format requested from Marker. The API currently only offers Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Markdown,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
        }
    }
}

/// Everything sent with one Marker upload.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub document: PathBuf,
    pub output_format: OutputFormat,
    pub force_ocr: bool,
    pub paginate: bool,
    pub strip_existing_ocr: bool,
    pub disable_image_extraction: bool,
    /// Compact JSON schema for structured extraction (`page_schema` field).
    pub page_schema: Option<String>,
    /// Explicit `use_llm` choice; `None` leaves it to [`Self::effective_use_llm`].
    pub use_llm: Option<bool>,
}

impl JobSubmission {
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
            output_format: OutputFormat::default(),
            force_ocr: false,
            paginate: false,
            strip_existing_ocr: false,
            disable_image_extraction: false,
            page_schema: None,
            use_llm: None,
        }
    }

    /// `use_llm` as sent: the explicit choice, else `true` when a schema is
    /// attached, else omitted.
    pub fn effective_use_llm(&self) -> Option<bool> {
        self.use_llm
            .or_else(|| self.page_schema.as_ref().map(|_| true))
    }

    /// Filename reported in the multipart `file` part.
    pub fn file_name(&self) -> String {
        self.document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string())
    }
}

/// Returned by a successful submission; consumed by polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub check_url: String,
    pub request_id: String,
}

/// Job state as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// `"processing"` or no status at all.
    Processing,
    Complete,
    /// Anything else, `"failed"` included; polling stops immediately.
    Unknown(String),
}

impl JobStatus {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => JobStatus::Processing,
            Some(Value::String(s)) => match s.as_str() {
                "processing" => JobStatus::Processing,
                "complete" => JobStatus::Complete,
                other => JobStatus::Unknown(other.to_string()),
            },
            Some(other) => JobStatus::Unknown(other.to_string()),
        }
    }
}

/// One status response, with the typed fields pulled out and the raw
/// payload kept for the traceability artifact.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub status: JobStatus,
    pub success: bool,
    pub markdown: Option<String>,
    pub images: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub payload: Value,
}

impl JobResult {
    pub fn from_payload(payload: Value) -> Self {
        let status = JobStatus::from_value(payload.get("status"));
        let success = payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let markdown = payload
            .get("markdown")
            .and_then(Value::as_str)
            .map(str::to_string);
        let images = payload
            .get("images")
            .and_then(Value::as_object)
            .cloned();
        let error = payload.get("error").and_then(|e| match e {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });
        Self {
            status,
            success,
            markdown,
            images,
            error,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_implies_use_llm() {
        let mut job = JobSubmission::new("/tmp/a.pdf");
        assert_eq!(job.effective_use_llm(), None);
        job.page_schema = Some("{}".into());
        assert_eq!(job.effective_use_llm(), Some(true));
        job.use_llm = Some(false);
        assert_eq!(job.effective_use_llm(), Some(false));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(JobStatus::from_value(None), JobStatus::Processing);
        assert_eq!(JobStatus::from_value(Some(&Value::Null)), JobStatus::Processing);
        assert_eq!(
            JobStatus::from_value(Some(&json!("complete"))),
            JobStatus::Complete
        );
        assert_eq!(
            JobStatus::from_value(Some(&json!("failed"))),
            JobStatus::Unknown("failed".into())
        );
        assert_eq!(
            JobStatus::from_value(Some(&json!("queued"))),
            JobStatus::Unknown("queued".into())
        );
        assert_eq!(
            JobStatus::from_value(Some(&json!(3))),
            JobStatus::Unknown("3".into())
        );
    }

    #[test]
    fn result_from_payload_extracts_fields() {
        let r = JobResult::from_payload(json!({
            "status": "complete",
            "success": true,
            "markdown": "# Title",
            "images": {"a.png": "aGk="},
            "error": null
        }));
        assert_eq!(r.status, JobStatus::Complete);
        assert!(r.success);
        assert_eq!(r.markdown.as_deref(), Some("# Title"));
        assert_eq!(r.images.as_ref().map(|m| m.len()), Some(1));
        assert!(r.error.is_none());
    }

    #[test]
    fn file_name_falls_back() {
        assert_eq!(JobSubmission::new("/x/report.pdf").file_name(), "report.pdf");
        assert_eq!(JobSubmission::new("/").file_name(), "document.pdf");
    }
}
