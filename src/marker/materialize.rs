//! Persist a completed Marker job to a destination directory.
//!
//! The attachment encoding in Marker responses is not contractually fixed:
//! depending on the response variant an image may be a bare base64 string,
//! an object holding base64 under one of several keys, or an object holding
//! a download URL. Each entry is therefore resolved through an ordered list
//! of strategies, and anything unrecognised is dumped as JSON rather than
//! dropped.

use crate::error::{MarkerError, MaterializeError};
use crate::marker::JobResult;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sub-keys checked, in order, for base64 content inside an attachment object.
const BASE64_KEYS: [&str; 4] = ["data", "content", "base64", "b64"];

/// Top-level response keys that may hold a structured-extraction result.
pub const EXTRACTION_KEYS: [&str; 5] = [
    "json",
    "structured_output",
    "structured_data",
    "extractions",
    "extracted",
];

/// Name of the manifest listing attachments that must be downloaded later.
pub const URL_MANIFEST: &str = "image_urls.txt";

/// Where and how to write a job's artifacts.
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub out_dir: PathBuf,
    /// Prefix for every artifact (`<base>-response.json`, `<base>.md`, …).
    pub base_name: String,
    /// Write attachments under `<base>_images/`.
    pub save_images: bool,
    /// A `page_schema` was sent, so look for a structured extraction.
    pub schema_supplied: bool,
}

/// Paths and counts of what was written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactManifest {
    pub response_json: PathBuf,
    pub markdown: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    /// Attachments decoded and written locally.
    pub images_saved: usize,
    /// Attachments recorded in `image_urls.txt` for later download.
    pub image_urls: usize,
    /// Attachments written as `<stem>.raw.json` because no strategy applied.
    pub raw_attachments: usize,
    pub extraction: Option<PathBuf>,
}

/// Write every artifact of a completed job.
///
/// The raw response is written first so it exists even if a later step
/// fails.
pub fn materialize(
    result: &JobResult,
    opts: &MaterializeOptions,
) -> Result<ArtifactManifest, MaterializeError> {
    let response_json = write_response_artifact(&result.payload, &opts.out_dir, &opts.base_name)?;
    let mut manifest = ArtifactManifest {
        response_json,
        ..ArtifactManifest::default()
    };

    if let Some(md) = result.markdown.as_deref().filter(|m| !m.trim().is_empty()) {
        let path = opts.out_dir.join(format!("{}.md", opts.base_name));
        write_bytes(&path, md.as_bytes())?;
        manifest.markdown = Some(path);
    }

    if opts.save_images {
        if let Some(images) = result.images.as_ref().filter(|m| !m.is_empty()) {
            let dir = opts.out_dir.join(format!("{}_images", opts.base_name));
            let counts = save_attachments(images, &dir)?;
            manifest.images_saved = counts.saved;
            manifest.image_urls = counts.urls;
            manifest.raw_attachments = counts.raw;
            manifest.images_dir = Some(dir);
        }
    }

    if opts.schema_supplied {
        if let Some((key, value)) = find_extraction(&result.payload) {
            let path = opts.out_dir.join(format!("{}-extractions.json", opts.base_name));
            save_json(value, &path)?;
            debug!("Structured extraction found under '{}'", key);
            manifest.extraction = Some(path);
        } else {
            warn!("Schema was supplied but no structured extraction was found in the response");
        }
    }

    info!(
        "Materialized job into {} ({} images saved, {} URLs deferred)",
        opts.out_dir.display(),
        manifest.images_saved,
        manifest.image_urls
    );
    Ok(manifest)
}

/// Write `<base>-response.json`, creating `out_dir` if needed.
///
/// Used by [`materialize`] and on its own when a job fails after a response
/// was received.
pub fn write_response_artifact(
    payload: &Value,
    out_dir: &Path,
    base_name: &str,
) -> Result<PathBuf, MaterializeError> {
    ensure_dir(out_dir)?;
    let path = out_dir.join(format!("{base_name}-response.json"));
    save_json(payload, &path)?;
    Ok(path)
}

/// First non-empty object or array under one of [`EXTRACTION_KEYS`].
pub fn find_extraction(payload: &Value) -> Option<(&'static str, &Value)> {
    EXTRACTION_KEYS.iter().find_map(|&key| match payload.get(key) {
        Some(v @ Value::Object(m)) if !m.is_empty() => Some((key, v)),
        Some(v @ Value::Array(a)) if !a.is_empty() => Some((key, v)),
        _ => None,
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
struct AttachmentCounts {
    saved: usize,
    urls: usize,
    raw: usize,
}

fn save_attachments(
    images: &serde_json::Map<String, Value>,
    dir: &Path,
) -> Result<AttachmentCounts, MaterializeError> {
    ensure_dir(dir)?;
    let mut counts = AttachmentCounts::default();
    let mut url_lines: Vec<String> = Vec::new();

    for (key, value) in images {
        let filename = attachment_filename(key, value);
        let out_path = dir.join(&filename);

        if let Some(bytes) = decode_attachment(value) {
            write_bytes(&out_path, &bytes)?;
            counts.saved += 1;
            continue;
        }

        if let Some(url) = value.get("url").and_then(Value::as_str) {
            url_lines.push(format!("{filename}\t{url}"));
            counts.urls += 1;
            continue;
        }

        let stem = Path::new(&filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());
        save_json(value, &dir.join(format!("{stem}.raw.json")))?;
        counts.raw += 1;
        debug!("Attachment '{}' has no recognised encoding; wrote raw JSON", key);
    }

    if !url_lines.is_empty() {
        write_bytes(&dir.join(URL_MANIFEST), url_lines.join("\n").as_bytes())?;
    }
    Ok(counts)
}

/// Filename for an attachment: its `filename` field or its key, reduced to
/// the final path component, with `.png` appended when extension-less.
fn attachment_filename(key: &str, value: &Value) -> String {
    let raw = value
        .get("filename")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .unwrap_or(key);
    let mut name = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "attachment".to_string());
    if !name.contains('.') {
        name.push_str(".png");
    }
    name
}

/// Strategies 1 and 2: a raw base64 string, or base64 under a known sub-key.
fn decode_attachment(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => decode_base64(s),
        Value::Object(map) => BASE64_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .and_then(decode_base64),
        _ => None,
    }
}

fn decode_base64(s: &str) -> Option<Vec<u8>> {
    let payload = match s.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map(|(_, b)| b)?,
        None => s,
    };
    STANDARD.decode(payload.trim()).ok()
}

// ── Naming and schema helpers ────────────────────────────────────────────

/// Filesystem-safe stem of `path`: every char other than ASCII
/// alphanumerics, `-` and `_` becomes `-`.
pub fn safe_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Read a JSON schema file, validate it, and return it re-serialised
/// compactly for the `page_schema` form field.
pub fn load_schema_file(path: &Path) -> Result<String, MarkerError> {
    let invalid = |reason: String| MarkerError::InvalidInput {
        path: path.to_path_buf(),
        reason,
    };
    let raw = fs::read_to_string(path)
        .map_err(|e| invalid(format!("Failed to read schema file: {e}")))?;
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| invalid(format!("Failed to parse schema file: {e}")))?;
    serde_json::to_string(&parsed).map_err(|e| invalid(e.to_string()))
}

// ── I/O helpers ──────────────────────────────────────────────────────────

fn ensure_dir(dir: &Path) -> Result<(), MaterializeError> {
    fs::create_dir_all(dir).map_err(|e| MaterializeError::Write {
        path: dir.to_path_buf(),
        source: e,
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), MaterializeError> {
    fs::write(path, bytes).map_err(|e| MaterializeError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

fn save_json(value: &Value, path: &Path) -> Result<(), MaterializeError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| MaterializeError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_bytes(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn opts(dir: &TempDir, schema: bool) -> MaterializeOptions {
        MaterializeOptions {
            out_dir: dir.path().to_path_buf(),
            base_name: "report".into(),
            save_images: true,
            schema_supplied: schema,
        }
    }

    #[test]
    fn response_is_written_even_without_content() {
        let dir = TempDir::new().unwrap();
        let result = JobResult::from_payload(json!({"status": "complete", "success": true}));
        let manifest = materialize(&result, &opts(&dir, false)).unwrap();
        assert!(manifest.response_json.exists());
        assert!(manifest.markdown.is_none());
        assert!(manifest.images_dir.is_none());
    }

    #[test]
    fn blank_markdown_is_skipped() {
        let dir = TempDir::new().unwrap();
        let result = JobResult::from_payload(json!({"success": true, "markdown": "  \n"}));
        let manifest = materialize(&result, &opts(&dir, false)).unwrap();
        assert!(manifest.markdown.is_none());
        assert!(!dir.path().join("report.md").exists());
    }

    #[test]
    fn attachment_strategies_in_order() {
        let dir = TempDir::new().unwrap();
        let result = JobResult::from_payload(json!({
            "success": true,
            "markdown": "# Doc",
            "images": {
                "fig1": "aGVsbG8=",
                "fig2.jpg": {"b64": "d29ybGQ="},
                "fig3": {"filename": "remote.png", "url": "https://cdn.example/remote.png"},
                "fig4": {"width": 10},
                "fig5": "%%% not base64 %%%"
            }
        }));
        let manifest = materialize(&result, &opts(&dir, false)).unwrap();
        let images = manifest.images_dir.clone().unwrap();

        assert_eq!(manifest.images_saved, 2);
        assert_eq!(manifest.image_urls, 1);
        assert_eq!(manifest.raw_attachments, 2);
        assert_eq!(fs::read(images.join("fig1.png")).unwrap(), b"hello");
        assert_eq!(fs::read(images.join("fig2.jpg")).unwrap(), b"world");
        assert_eq!(
            fs::read_to_string(images.join(URL_MANIFEST)).unwrap(),
            "remote.png\thttps://cdn.example/remote.png"
        );
        assert!(images.join("fig4.raw.json").exists());
        assert!(images.join("fig5.raw.json").exists());
        assert_eq!(
            fs::read_to_string(manifest.markdown.unwrap()).unwrap(),
            "# Doc"
        );
    }

    #[test]
    fn attachment_names_cannot_escape_the_directory() {
        assert_eq!(attachment_filename("../../etc/passwd", &json!("")), "passwd.png");
        assert_eq!(
            attachment_filename("k", &json!({"filename": "/abs/chart.webp"})),
            "chart.webp"
        );
        assert_eq!(attachment_filename("..", &json!("")), "attachment.png");
    }

    #[test]
    fn data_url_prefix_is_accepted() {
        assert_eq!(
            decode_base64("data:image/png;base64,aGk=").as_deref(),
            Some(&b"hi"[..])
        );
        assert!(decode_base64("data:image/png,plain").is_none());
    }

    #[test]
    fn images_skipped_when_disabled() {
        let dir = TempDir::new().unwrap();
        let result = JobResult::from_payload(json!({"success": true, "images": {"a": "aGk="}}));
        let mut o = opts(&dir, false);
        o.save_images = false;
        let manifest = materialize(&result, &o).unwrap();
        assert!(manifest.images_dir.is_none());
        assert_eq!(manifest.images_saved, 0);
    }

    #[test]
    fn extraction_round_trips_first_non_empty_key() {
        let dir = TempDir::new().unwrap();
        let structured = json!({"invoice_number": "INV-7", "total": 41.5, "lines": [1, 2]});
        let result = JobResult::from_payload(json!({
            "success": true,
            "json": {},
            "structured_output": structured.clone(),
            "extracted": [{"ignored": true}]
        }));
        let manifest = materialize(&result, &opts(&dir, true)).unwrap();
        let path = manifest.extraction.unwrap();
        assert_eq!(path, dir.path().join("report-extractions.json"));
        let back: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, structured);
    }

    #[test]
    fn extraction_ignored_without_schema() {
        let dir = TempDir::new().unwrap();
        let result = JobResult::from_payload(json!({"success": true, "json": {"a": 1}}));
        let manifest = materialize(&result, &opts(&dir, false)).unwrap();
        assert!(manifest.extraction.is_none());
    }

    #[test]
    fn safe_stem_replaces_punctuation() {
        assert_eq!(safe_stem(Path::new("/x/Q3 report (final).pdf")), "Q3-report--final-");
        assert_eq!(safe_stem(Path::new("plain_name-1.pdf")), "plain_name-1");
    }

    #[test]
    fn schema_file_is_validated_and_compacted() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("schema.json");
        fs::write(&good, "{\n  \"type\": \"object\"\n}\n").unwrap();
        assert_eq!(load_schema_file(&good).unwrap(), "{\"type\":\"object\"}");

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            load_schema_file(&bad),
            Err(MarkerError::InvalidInput { .. })
        ));
    }
}
