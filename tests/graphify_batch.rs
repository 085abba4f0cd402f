//! Batch orchestration with in-memory classifier and executor doubles.

use async_trait::async_trait;
use pdf_toolbelt::graphify::batch::SUMMARY_FILE;
use pdf_toolbelt::{
    BatchConfig, BatchEntry, BatchProgressCallback, ClassificationRequest, ClassificationResult,
    CodeExecutor, ExecutionOutcome, GraphifyBatch, ImageClassifier, VisionError,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Behaviour chosen from the image name.
struct ByName {
    calls: AtomicUsize,
    contexts: Mutex<Vec<Option<String>>>,
}

impl ByName {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ImageClassifier for ByName {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(request.context.clone());
        let name = request.name.as_str();
        if name.starts_with("boom") {
            panic!("classifier exploded on {name}");
        }
        if name.starts_with("denied") {
            return Err(VisionError::RemoteRejection {
                status: 403,
                body: "forbidden".into(),
            });
        }
        if name.starts_with("chart") || name.starts_with("broken") {
            return Ok(ClassificationResult {
                is_graph: true,
                graph_type: Some("line".into()),
                python_code: Some(format!("# plot for {name}")),
                ..ClassificationResult::default()
            });
        }
        Ok(ClassificationResult {
            is_graph: false,
            reason: Some("photograph".into()),
            ..ClassificationResult::default()
        })
    }
}

/// Writes a fixed payload unless the code mentions `broken`.
#[derive(Default)]
struct FakeExecutor {
    runs: AtomicUsize,
}

#[async_trait]
impl CodeExecutor for FakeExecutor {
    async fn execute(&self, code: &str, output_path: &Path, _timeout: Duration) -> ExecutionOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if code.contains("broken") {
            return ExecutionOutcome::failed("Execution error: NameError");
        }
        std::fs::write(output_path, b"PNG").unwrap();
        ExecutionOutcome::ok(output_path.to_path_buf())
    }
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: Mutex<Vec<(String, bool, Option<String>)>>,
    batch: Mutex<Option<(usize, usize)>>,
}

impl BatchProgressCallback for Recorder {
    fn on_batch_start(&self, total_images: usize) {
        self.started.store(total_images, Ordering::SeqCst);
    }
    fn on_image_complete(&self, name: &str, is_graph: bool, error: Option<&str>) {
        self.completed
            .lock()
            .unwrap()
            .push((name.to_string(), is_graph, error.map(str::to_string)));
    }
    fn on_batch_complete(&self, total_images: usize, graphs_found: usize) {
        *self.batch.lock().unwrap() = Some((total_images, graphs_found));
    }
}

fn classifier(c: &Arc<ByName>) -> Option<Arc<dyn ImageClassifier>> {
    Some(c.clone() as Arc<dyn ImageClassifier>)
}

fn executor(e: &Arc<FakeExecutor>) -> Option<Arc<dyn CodeExecutor>> {
    Some(e.clone() as Arc<dyn CodeExecutor>)
}

fn images(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| {
            let p = dir.path().join(n);
            std::fs::write(&p, [0x89, b'P', b'N', b'G']).unwrap();
            p
        })
        .collect()
}

fn entry_for<'a>(entries: &'a [BatchEntry], name: &str) -> &'a BatchEntry {
    entries
        .iter()
        .find(|e| e.image.file_name().unwrap() == name)
        .unwrap_or_else(|| panic!("no entry for {name}"))
}

#[tokio::test]
async fn classifies_every_image_and_writes_summary() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["chart_a.png", "photo.jpg", "denied.png"]);
    let classifier_double = ByName::new();
    let recorder = Arc::new(Recorder::default());

    let config = BatchConfig::builder(out.path())
        .concurrency(2)
        .extra_context(Some("Annual report".into()))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let summary = GraphifyBatch::new(classifier(&classifier_double), None)
        .run(imgs, &config)
        .await
        .unwrap();

    assert_eq!(summary.count(), 3);
    assert_eq!(summary.graphs_found(), 1);
    assert_eq!(summary.summary_path, out.path().join(SUMMARY_FILE));

    let chart = entry_for(&summary.entries, "chart_a.png");
    assert!(chart.is_graph);
    assert_eq!(chart.graph_type.as_deref(), Some("line"));
    assert_eq!(chart.json, Some(out.path().join("chart_a.graph.json")));
    assert!(chart.reconstructed.is_none());
    assert!(chart.error.is_none());

    let denied = entry_for(&summary.entries, "denied.png");
    assert!(!denied.is_graph);
    assert!(denied.error.as_deref().unwrap().starts_with("GPT call failed:"));
    let saved: ClassificationResult = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("denied.graph.json")).unwrap(),
    )
    .unwrap();
    assert!(saved.error.unwrap().contains("403"));

    let on_disk: Vec<BatchEntry> =
        serde_json::from_str(&std::fs::read_to_string(&summary.summary_path).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 3);

    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.completed.lock().unwrap().len(), 3);
    assert_eq!(*recorder.batch.lock().unwrap(), Some((3, 1)));
    assert!(classifier_double
        .contexts
        .lock()
        .unwrap()
        .iter()
        .all(|c| c.as_deref() == Some("Annual report")));
}

#[tokio::test]
async fn max_images_truncates_in_order() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["a.png", "b.png", "c.png", "d.png"]);
    let classifier_double = ByName::new();

    let config = BatchConfig::builder(out.path())
        .max_images(Some(2))
        .build()
        .unwrap();
    let summary = GraphifyBatch::new(classifier(&classifier_double), None)
        .run(imgs, &config)
        .await
        .unwrap();

    assert_eq!(summary.count(), 2);
    assert_eq!(classifier_double.calls.load(Ordering::SeqCst), 2);
    entry_for(&summary.entries, "a.png");
    entry_for(&summary.entries, "b.png");
}

#[tokio::test]
async fn panicking_worker_becomes_an_entry() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["boom.png", "photo.png"]);

    let config = BatchConfig::builder(out.path()).concurrency(2).build().unwrap();
    let summary = GraphifyBatch::new(classifier(&ByName::new()), None)
        .run(imgs, &config)
        .await
        .unwrap();

    assert_eq!(summary.count(), 2);
    let boom = entry_for(&summary.entries, "boom.png");
    assert!(boom.error.as_deref().unwrap().starts_with("worker-error:"));
    assert!(boom.json.is_none());
    assert!(entry_for(&summary.entries, "photo.png").error.is_none());
}

#[tokio::test]
async fn reconstruction_only_on_successful_execution() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["chart_ok.png", "broken_chart.png", "photo.png"]);
    let executor_double = Arc::new(FakeExecutor::default());

    let config = BatchConfig::builder(out.path())
        .execute(true)
        .concurrency(1)
        .build()
        .unwrap();
    let summary = GraphifyBatch::new(classifier(&ByName::new()), executor(&executor_double))
        .run(imgs, &config)
        .await
        .unwrap();

    // Photos are not executed.
    assert_eq!(executor_double.runs.load(Ordering::SeqCst), 2);

    let ok = entry_for(&summary.entries, "chart_ok.png");
    let recon = out.path().join("chart_ok.reconstructed.png");
    assert_eq!(ok.reconstructed.as_deref(), Some(recon.as_path()));
    assert_eq!(std::fs::read(&recon).unwrap(), b"PNG");

    let broken = entry_for(&summary.entries, "broken_chart.png");
    assert!(broken.is_graph);
    assert!(broken.reconstructed.is_none());
    assert_eq!(broken.error.as_deref(), Some("Execution error: NameError"));
    assert!(!out.path().join("broken_chart.reconstructed.png").exists());
}

#[tokio::test]
async fn execution_disabled_leaves_code_unrun() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["chart.png"]);
    let executor_double = Arc::new(FakeExecutor::default());

    let config = BatchConfig::builder(out.path()).build().unwrap();
    let summary = GraphifyBatch::new(classifier(&ByName::new()), executor(&executor_double))
        .run(imgs, &config)
        .await
        .unwrap();

    assert_eq!(executor_double.runs.load(Ordering::SeqCst), 0);
    assert!(summary.entries[0].reconstructed.is_none());
}

#[tokio::test]
async fn stream_yields_one_entry_per_image() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["a.png", "b.png", "c.png"]);

    let config = BatchConfig::builder(out.path()).concurrency(3).build().unwrap();
    let stream = GraphifyBatch::new(classifier(&ByName::new()), None)
        .entries_stream(imgs, &config)
        .unwrap();
    let entries: Vec<BatchEntry> = stream.collect().await;

    assert_eq!(entries.len(), 3);
    assert!(!out.path().join(SUMMARY_FILE).exists());
}

/// Logs when each classification starts and ends.
#[derive(Default)]
struct Tracer {
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageClassifier for Tracer {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, VisionError> {
        self.log.lock().unwrap().push(format!("start {}", request.name));
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().unwrap().push(format!("end {}", request.name));
        Ok(ClassificationResult::default())
    }
}

#[tokio::test]
async fn single_worker_runs_images_one_after_another() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["a.png", "b.png", "c.png"]);
    let tracer = Arc::new(Tracer::default());

    let config = BatchConfig::builder(out.path()).concurrency(1).build().unwrap();
    let summary = GraphifyBatch::new(Some(tracer.clone() as Arc<dyn ImageClassifier>), None)
        .run(imgs, &config)
        .await
        .unwrap();

    assert_eq!(summary.count(), 3);
    let names: Vec<_> = summary
        .entries
        .iter()
        .map(|e| e.image.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.png", "b.png", "c.png"]);
    assert_eq!(
        *tracer.log.lock().unwrap(),
        ["start a.png", "end a.png", "start b.png", "end b.png", "start c.png", "end c.png"]
    );
}

#[tokio::test]
async fn unwritable_result_file_is_noted_on_the_entry() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let imgs = images(&input, &["photo.png"]);
    std::fs::create_dir(out.path().join("photo.graph.json")).unwrap();

    let config = BatchConfig::builder(out.path()).build().unwrap();
    let summary = GraphifyBatch::new(classifier(&ByName::new()), None)
        .run(imgs, &config)
        .await
        .unwrap();

    let entry = &summary.entries[0];
    assert!(!entry.is_graph);
    assert!(entry
        .error
        .as_deref()
        .unwrap()
        .starts_with("save-json-error:"));
}
