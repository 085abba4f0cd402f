//! Batch orchestration: classify a directory of images with bounded
//! concurrency and write one artifact per image plus `summary.json`.
//!
//! Every image runs in its own spawned task, so a panic in a classifier or
//! executor becomes a `worker-error` entry instead of taking the batch down.
//! With `concurrency == 1` the pool degenerates to strictly sequential
//! processing in listing order; otherwise entries arrive in completion order.

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::graphify::vision::infer_mime_type;
use crate::graphify::{
    BatchEntry, BatchSummary, ClassificationRequest, ClassificationResult, CodeExecutor,
    ImageClassifier,
};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Extensions picked up by [`list_images`], compared case-insensitively.
pub const SUPPORTED_IMAGE_EXTS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

pub const SUMMARY_FILE: &str = "summary.json";

/// A boxed stream of batch entries in completion order.
pub type EntryStream = Pin<Box<dyn Stream<Item = BatchEntry> + Send>>;

/// Sorted list of supported image files directly inside `dir`.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let io_err = |source| BatchError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if supported && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").unwrap());

/// Collapse runs of unsafe characters to `-`, trim dashes, and fall back
/// to `untitled`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = RE_UNSAFE.replace_all(name, "-");
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Drives classification (and optional execution) over many images.
#[derive(Clone)]
pub struct GraphifyBatch {
    classifier: Option<Arc<dyn ImageClassifier>>,
    executor: Option<Arc<dyn CodeExecutor>>,
}

impl GraphifyBatch {
    pub fn new(
        classifier: Option<Arc<dyn ImageClassifier>>,
        executor: Option<Arc<dyn CodeExecutor>>,
    ) -> Self {
        Self {
            classifier,
            executor,
        }
    }

    /// Start processing and yield each entry as it completes.
    ///
    /// Fails only when no classifier is configured or the output directory
    /// cannot be created. The stream yields exactly one entry per image
    /// after truncation to `max_images`.
    pub fn entries_stream(
        &self,
        mut images: Vec<PathBuf>,
        config: &BatchConfig,
    ) -> Result<EntryStream, BatchError> {
        let classifier = self
            .classifier
            .clone()
            .ok_or_else(|| BatchError::ClassifierUnavailable {
                hint: "Provide --api-key or set GPT_API_KEY/OPENAI_API_KEY.".into(),
            })?;
        std::fs::create_dir_all(&config.out_dir).map_err(|source| BatchError::Io {
            path: config.out_dir.clone(),
            source,
        })?;

        if let Some(max) = config.max_images {
            images.truncate(max);
        }
        if config.execute && self.executor.is_none() {
            warn!("Execution requested but no code executor is configured; skipping execution");
        }
        info!(
            "Graphify: {} image(s), concurrency {}",
            images.len(),
            config.concurrency
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_start(images.len());
        }

        let worker = Arc::new(Worker {
            classifier,
            executor: self.executor.clone(),
            config: config.clone(),
        });
        let callback = config.progress_callback.clone();

        let s = stream::iter(images.into_iter().map(move |image| {
            let worker = Arc::clone(&worker);
            let callback = callback.clone();
            async move {
                let task_image = image.clone();
                match tokio::spawn(async move { worker.process(task_image).await }).await {
                    Ok(entry) => entry,
                    Err(join_err) => {
                        warn!("Worker for {} died: {}", image.display(), join_err);
                        let entry = BatchEntry::worker_error(image, join_err);
                        if let Some(cb) = callback {
                            cb.on_image_complete(
                                &display_name(&entry.image),
                                false,
                                entry.error.as_deref(),
                            );
                        }
                        entry
                    }
                }
            }
        }))
        .buffer_unordered(config.concurrency.max(1));

        Ok(Box::pin(s))
    }

    /// Process every image and write `summary.json`.
    pub async fn run(
        &self,
        images: Vec<PathBuf>,
        config: &BatchConfig,
    ) -> Result<BatchSummary, BatchError> {
        let entries: Vec<BatchEntry> = self.entries_stream(images, config)?.collect().await;

        let summary_path = config.out_dir.join(SUMMARY_FILE);
        let text = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&summary_path, text)
            .await
            .map_err(|source| BatchError::Io {
                path: summary_path.clone(),
                source,
            })?;

        let summary = BatchSummary {
            summary_path,
            entries,
        };
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_complete(summary.count(), summary.graphs_found());
        }
        info!(
            "Graphify complete: {} image(s), {} graph(s)",
            summary.count(),
            summary.graphs_found()
        );
        Ok(summary)
    }
}

/// State shared by every spawned task of one batch.
struct Worker {
    classifier: Arc<dyn ImageClassifier>,
    executor: Option<Arc<dyn CodeExecutor>>,
    config: BatchConfig,
}

impl Worker {
    async fn process(&self, image: PathBuf) -> BatchEntry {
        let name = display_name(&image);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_image_start(&name);
        }
        debug!("processing {}", name);

        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = sanitize_filename(&stem);
        let json_path = self.config.out_dir.join(format!("{base}.graph.json"));
        let recon_path = self.config.out_dir.join(format!("{base}.reconstructed.png"));

        let mut result = self.classify(&image, &name).await;

        let saved = match serde_json::to_string_pretty(&result) {
            Ok(text) => tokio::fs::write(&json_path, text)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = saved {
            result.error = Some(match result.error.take() {
                Some(prev) => format!("{prev} | save-json-error: {e}"),
                None => format!("save-json-error: {e}"),
            });
        }

        let mut reconstructed = None;
        let mut exec_error = None;
        if self.config.execute && result.is_executable() {
            if let (Some(executor), Some(code)) = (&self.executor, result.code()) {
                let outcome = executor
                    .execute(code, &recon_path, self.config.exec_timeout())
                    .await;
                if outcome.success {
                    reconstructed = outcome.output_path;
                } else {
                    warn!(
                        "{}: execution failed: {}",
                        name,
                        outcome.error.as_deref().unwrap_or("unknown")
                    );
                    exec_error = outcome.error;
                }
            }
        }

        let entry = BatchEntry {
            image,
            json: Some(json_path),
            reconstructed,
            is_graph: result.is_graph,
            graph_type: result.graph_type.clone(),
            error: result.error.clone().or(exec_error),
        };
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_image_complete(&name, entry.is_graph, entry.error.as_deref());
        }
        debug!("done {} (is_graph={})", name, entry.is_graph);
        entry
    }

    async fn classify(&self, image: &Path, name: &str) -> ClassificationResult {
        let bytes = match tokio::fs::read(image).await {
            Ok(b) => b,
            Err(e) => {
                warn!("{}: could not read image: {}", name, e);
                return ClassificationResult {
                    error: Some(format!("GPT call failed: could not read image: {e}")),
                    ..ClassificationResult::default()
                };
            }
        };
        let request = ClassificationRequest {
            mime_type: infer_mime_type(image, &bytes),
            image: bytes,
            context: self.config.extra_context.clone(),
            name: name.to_string(),
        };
        match self.classifier.classify(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: classification failed: {}", name, e);
                ClassificationResult::failed(&e)
            }
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_examples() {
        assert_eq!(sanitize_filename("Figure 3 (a)"), "Figure-3-a");
        assert_eq!(sanitize_filename("chart_v1.2-final"), "chart_v1.2-final");
        assert_eq!(sanitize_filename("   "), "untitled");
        assert_eq!(sanitize_filename("图表"), "untitled");
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.jpg", "c.webp", "notes.txt", "d.jpeg", "e.gif"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| display_name(p))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp", "d.jpeg"]);
    }

    #[test]
    fn list_images_missing_dir_is_io_error() {
        let err = list_images(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, BatchError::Io { .. }));
    }

    #[tokio::test]
    async fn missing_classifier_fails_fast() {
        let dir = TempDir::new().unwrap();
        let config = BatchConfig::builder(dir.path()).build().unwrap();
        let batch = GraphifyBatch::new(None, None);
        let err = batch.run(vec![], &config).await.unwrap_err();
        assert!(matches!(err, BatchError::ClassifierUnavailable { .. }));
    }
}
