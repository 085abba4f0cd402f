//! HTTP client for the Datalab Marker API.
//!
//! ## Polling model
//!
//! Marker is asynchronous: the upload returns a `request_check_url` and the
//! result has to be fetched from it until the job finishes. Each poll tick
//! is exactly one GET. A transient failure of that GET is not retried here;
//! an HTTP error body without a `status` simply counts as "still
//! processing" and the next tick tries again. The overall wall-clock budget
//! is the only thing that ends an endless `processing` job.
//!
//! An unrecognised status fails fast instead of waiting out the budget.

use crate::config::MarkerConfig;
use crate::error::MarkerError;
use crate::marker::{JobHandle, JobResult, JobStatus, JobSubmission};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "X-Api-Key";

/// Characters of a non-JSON body quoted in error messages.
const BODY_SNIPPET_CHARS: usize = 500;

/// Client for one Marker endpoint.
#[derive(Debug, Clone)]
pub struct MarkerClient {
    http: reqwest::Client,
    config: MarkerConfig,
}

impl MarkerClient {
    pub fn new(config: MarkerConfig) -> Result<Self, MarkerError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| MarkerError::Transport {
                url: config.endpoint.clone(),
                source: e,
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }

    /// Upload the document and return the handle used for polling.
    ///
    /// # Errors
    /// - [`MarkerError::InvalidInput`] if the document cannot be read
    /// - [`MarkerError::Submission`] on HTTP ≥ 400, `success != true`,
    ///   a non-JSON body, or a missing `request_check_url`
    /// - [`MarkerError::Transport`] if no response was received
    pub async fn submit(&self, job: &JobSubmission) -> Result<JobHandle, MarkerError> {
        let bytes = tokio::fs::read(&job.document)
            .await
            .map_err(|e| MarkerError::InvalidInput {
                path: job.document.clone(),
                reason: e.to_string(),
            })?;
        info!(
            "Submitting {} ({} bytes) to {}",
            job.document.display(),
            bytes.len(),
            self.config.endpoint
        );

        let form = build_form(job, bytes).map_err(|e| MarkerError::Transport {
            url: self.config.endpoint.clone(),
            source: e,
        })?;

        let resp = self
            .http
            .post(&self.config.endpoint)
            .header(API_KEY_HEADER, &self.config.api_key)
            .timeout(Duration::from_secs(self.config.submit_timeout_secs))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MarkerError::Transport {
                url: self.config.endpoint.clone(),
                source: e,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| MarkerError::Transport {
            url: self.config.endpoint.clone(),
            source: e,
        })?;

        let data: Value = serde_json::from_str(&text).map_err(|_| MarkerError::Submission {
            message: format!(
                "Unexpected non-JSON response (HTTP {}). Body: {}",
                status.as_u16(),
                snippet(&text)
            ),
        })?;

        let accepted = data.get("success").and_then(Value::as_bool).unwrap_or(false);
        if status.is_client_error() || status.is_server_error() || !accepted {
            let message = data
                .get("error")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| text.clone());
            return Err(MarkerError::Submission { message });
        }

        let check_url = data
            .get("request_check_url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| MarkerError::Submission {
                message: "Marker response missing 'request_check_url'.".into(),
            })?
            .to_string();
        let request_id = data
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        info!("Submitted. Request ID: {}", request_id);
        Ok(JobHandle {
            check_url,
            request_id,
        })
    }

    /// Poll the status URL until the job completes, fails, or `timeout`
    /// elapses. Sleeps `interval` before every request.
    ///
    /// Never returns a result whose status is still processing.
    ///
    /// # Errors
    /// - [`MarkerError::Timeout`] when the budget is exhausted
    /// - [`MarkerError::Protocol`] on a non-JSON body or any status other
    ///   than `processing` or `complete` (`failed` included)
    /// - [`MarkerError::JobFailed`] on `complete` without success
    /// - [`MarkerError::Transport`] if a status request gets no response
    pub async fn poll(
        &self,
        handle: &JobHandle,
        timeout: Duration,
        interval: Duration,
    ) -> Result<JobResult, MarkerError> {
        info!("Polling: {}", handle.check_url);
        let start = Instant::now();
        let mut ticks: u32 = 0;

        loop {
            if start.elapsed() > timeout {
                return Err(MarkerError::Timeout {
                    secs: timeout.as_secs_f64(),
                });
            }
            sleep(interval).await;
            ticks += 1;

            let resp = self
                .http
                .get(&handle.check_url)
                .header(API_KEY_HEADER, &self.config.api_key)
                .timeout(Duration::from_secs(self.config.poll_request_timeout_secs))
                .send()
                .await
                .map_err(|e| MarkerError::Transport {
                    url: handle.check_url.clone(),
                    source: e,
                })?;

            let http_status = resp.status();
            if !http_status.is_success() {
                warn!("Status check returned HTTP {}", http_status.as_u16());
            }
            let text = resp.text().await.map_err(|e| MarkerError::Transport {
                url: handle.check_url.clone(),
                source: e,
            })?;
            let payload: Value =
                serde_json::from_str(&text).map_err(|_| MarkerError::Protocol {
                    detail: format!(
                        "Unexpected non-JSON response from Datalab (HTTP {}). Body: {}",
                        http_status.as_u16(),
                        snippet(&text)
                    ),
                    payload: None,
                })?;

            let result = JobResult::from_payload(payload);
            match &result.status {
                JobStatus::Processing => {
                    debug!(
                        "Job {} still processing after {} checks ({:.1}s)",
                        handle.request_id,
                        ticks,
                        start.elapsed().as_secs_f64()
                    );
                }
                JobStatus::Complete => return finish(result),
                JobStatus::Unknown(status) => {
                    warn!("Job {} reported status '{}'", handle.request_id, status);
                    return Err(MarkerError::Protocol {
                        detail: format!("Unexpected status from Datalab: {status}"),
                        payload: Some(Box::new(result.payload)),
                    });
                }
            }
        }
    }

    /// Submit, then poll with the configured timeout and interval.
    pub async fn submit_and_wait(
        &self,
        job: &JobSubmission,
    ) -> Result<(JobHandle, JobResult), MarkerError> {
        let handle = self.submit(job).await?;
        let result = self
            .poll(
                &handle,
                self.config.job_timeout(),
                self.config.poll_interval(),
            )
            .await?;
        Ok((handle, result))
    }
}

/// Blocking wrapper around [`MarkerClient::submit_and_wait`].
///
/// Creates a temporary tokio runtime internally; do not call from inside
/// an async context.
pub fn submit_and_wait_sync(
    config: MarkerConfig,
    job: &JobSubmission,
) -> Result<(JobHandle, JobResult), MarkerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| MarkerError::InvalidInput {
            path: job.document.clone(),
            reason: format!("Failed to create tokio runtime: {e}"),
        })?;
    runtime.block_on(async {
        let client = MarkerClient::new(config)?;
        client.submit_and_wait(job).await
    })
}

fn finish(result: JobResult) -> Result<JobResult, MarkerError> {
    if result.success {
        Ok(result)
    } else {
        Err(MarkerError::JobFailed {
            message: result
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
            payload: Box::new(result.payload),
        })
    }
}

/// Build the multipart form in the field layout Marker documents.
fn build_form(job: &JobSubmission, bytes: Vec<u8>) -> Result<Form, reqwest::Error> {
    let file = Part::bytes(bytes)
        .file_name(job.file_name())
        .mime_str("application/pdf")?;

    let mut form = Form::new()
        .part("file", file)
        .text("output_format", job.output_format.as_str())
        .text("force_ocr", bool_field(job.force_ocr))
        .text("paginate", bool_field(job.paginate))
        .text("strip_existing_ocr", bool_field(job.strip_existing_ocr))
        .text(
            "disable_image_extraction",
            bool_field(job.disable_image_extraction),
        );
    if let Some(use_llm) = job.effective_use_llm() {
        form = form.text("use_llm", bool_field(use_llm));
    }
    if let Some(ref schema) = job.page_schema {
        form = form.text("page_schema", schema.clone());
    }
    Ok(form)
}

fn bool_field(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(BODY_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_fields_are_lowercase() {
        assert_eq!(bool_field(true), "true");
        assert_eq!(bool_field(false), "false");
    }

    #[test]
    fn snippet_is_char_safe() {
        let long = "é".repeat(600);
        assert_eq!(snippet(&long).chars().count(), BODY_SNIPPET_CHARS);
    }

    #[test]
    fn complete_without_success_is_job_failure() {
        let r = JobResult::from_payload(serde_json::json!({
            "status": "complete",
            "success": false,
            "error": "Could not parse PDF"
        }));
        match finish(r) {
            Err(MarkerError::JobFailed { message, payload }) => {
                assert_eq!(message, "Could not parse PDF");
                assert_eq!(payload["status"], "complete");
            }
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn complete_without_error_text_uses_default_message() {
        let r = JobResult::from_payload(serde_json::json!({"status": "complete"}));
        match finish(r) {
            Err(MarkerError::JobFailed { message, .. }) => assert_eq!(message, "Unknown error"),
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }
}
