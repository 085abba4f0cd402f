//! Progress-callback trait for per-image graphify events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through a batch. The CLI uses this to
//! drive an indicatif progress bar; library callers can forward the events
//! anywhere.
//!
//! # Thread safety
//!
//! With `concurrency > 1`, `on_image_start` and `on_image_complete` are
//! called concurrently from different tokio worker threads and in completion
//! order. Implementations must protect shared mutable state themselves.

use std::sync::Arc;

/// Called by the batch orchestrator as it processes each image.
///
/// All methods have no-op defaults so implementors only override what they
/// care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after truncation to `max_images`.
    fn on_batch_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called just before the image is sent to the classifier.
    fn on_image_start(&self, name: &str) {
        let _ = name;
    }

    /// Called when an image's entry is final, successful or not.
    ///
    /// `error` is `Some` when classification, execution or the worker failed.
    fn on_image_complete(&self, name: &str, is_graph: bool, error: Option<&str>) {
        let _ = (name, is_graph, error);
    }

    /// Called once after every image has an entry.
    fn on_batch_complete(&self, total_images: usize, graphs_found: usize) {
        let _ = (total_images, graphs_found);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
