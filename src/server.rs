//! HTTP boundary for table extraction.
//!
//! `POST /api/extract_tables` takes `{"pdf_data": "<base64>", "filename"?: "..."}`
//! and answers with the tables found plus a base64 `.xlsx` workbook. Every
//! failure after the request is accepted, including a panic in the
//! extractor, is reported as a structured 500 rather than a dropped
//! connection. A body over the size limit gets the same JSON shape with a
//! 413. All responses on the route carry CORS headers for a single
//! configured origin.

use crate::error::{ConfigError, TableError};
use crate::tables::{write_workbook, ExtractedTable, TableExtractor};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const EXTRACT_PATH: &str = "/api/extract_tables";

const DEFAULT_FILENAME: &str = "document.pdf";
const ALLOW_METHODS: &str = "POST, OPTIONS, GET";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";
const MAX_AGE: &str = "86400";
/// Base64 inflates by a third; leave room for sizeable scanned PDFs.
pub const BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    extractor: Arc<dyn TableExtractor>,
    allowed_origin: HeaderValue,
    body_limit: usize,
}

impl ServerState {
    pub fn new(extractor: Arc<dyn TableExtractor>, allowed_origin: &str) -> Result<Self, ConfigError> {
        let allowed_origin = HeaderValue::from_str(allowed_origin)
            .map_err(|e| ConfigError(format!("invalid CORS origin '{allowed_origin}': {e}")))?;
        Ok(Self {
            extractor,
            allowed_origin,
            body_limit: BODY_LIMIT_BYTES,
        })
    }

    /// Largest accepted request body, in bytes.
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    pdf_data: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

/// Anything that turns into the 500 response.
#[derive(Debug, Error)]
enum HandlerError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("extraction task failed: {0}")]
    Worker(String),
}

/// Build the application router.
pub fn router(state: ServerState) -> Router {
    let extract = post(extract_tables)
        .options(preflight)
        .fallback(method_not_allowed);

    Router::new()
        .route(EXTRACT_PATH, extract)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), add_cors_headers))
        .layer(DefaultBodyLimit::max(state.body_limit))
        .with_state(state)
}

async fn add_cors_headers(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        state.allowed_origin.clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE));
    response
}

async fn preflight() -> Response {
    (StatusCode::OK, Json(json!({"message": "CORS preflight"}))).into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Method not allowed"})),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

async fn extract_tables(
    State(state): State<ServerState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            return failure(rejection.status(), rejection.body_text());
        }
    };
    match handle_extract(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            error!("Error processing PDF: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn failure(status: StatusCode, reason: impl std::fmt::Display) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": format!("Error processing PDF: {reason}"),
            "tables": [],
        })),
    )
        .into_response()
}

async fn handle_extract(state: &ServerState, body: &[u8]) -> Result<Response, HandlerError> {
    let request: ExtractRequest = serde_json::from_slice(body)?;
    let filename = request
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    let Some(pdf_data) = request.pdf_data.filter(|d| !d.is_empty()) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "No PDF data provided"})),
        )
            .into_response());
    };

    let cleaned: String = pdf_data.chars().filter(|c| !c.is_whitespace()).collect();
    let pdf = STANDARD.decode(cleaned)?;
    info!("Extracting tables from {} ({} bytes)", filename, pdf.len());

    let extractor = Arc::clone(&state.extractor);
    let (tables, workbook) = tokio::task::spawn_blocking(move || {
        let tables = extractor.extract(&pdf)?;
        let workbook = if tables.is_empty() {
            None
        } else {
            Some(write_workbook(&tables)?)
        };
        Ok::<(Vec<ExtractedTable>, Option<Vec<u8>>), TableError>((tables, workbook))
    })
    .await
    .map_err(|e| HandlerError::Worker(e.to_string()))??;

    let Some(workbook) = workbook else {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "success": false,
                "error": "No tables found in the PDF",
                "tables": [],
            })),
        )
            .into_response());
    };

    let message = format!(
        "Successfully extracted {} table(s) from {}",
        tables.len(),
        filename
    );
    info!("{}", message);
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "tables": tables,
            "excel_data": STANDARD.encode(workbook),
            "message": message,
        })),
    )
        .into_response())
}
