//! Configuration types for the three pipelines.
//!
//! Every remote endpoint, credential and limit is an explicit value handed to
//! a client constructor. Nothing is read from process-global state once a
//! config has been built; the binaries resolve environment variables up
//! front and pass the result in.
//!
//! Each config has a `Default` (where a default makes sense) and a builder
//! whose `build()` validates the combination. API keys are redacted from the
//! `Debug` output so configs can be logged safely.

use crate::error::ConfigError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Datalab Marker endpoint used when `--endpoint` is not given.
pub const DEFAULT_MARKER_URL: &str = "https://www.datalab.to/api/v1/marker";

/// OpenAI-compatible API base used when none is configured.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Vision model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Origin allowed by the table endpoint's CORS headers.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://www.developent.guru";

fn redact(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

// ── Marker ───────────────────────────────────────────────────────────────

/// Connection settings for the Datalab Marker API.
#[derive(Clone)]
pub struct MarkerConfig {
    /// Submission endpoint. Default: [`DEFAULT_MARKER_URL`].
    pub endpoint: String,

    /// Sent as the `X-Api-Key` header.
    pub api_key: String,

    /// HTTP timeout for the multipart upload. Default: 300.
    ///
    /// Uploads of large scanned PDFs are slow; the status checks are not.
    pub submit_timeout_secs: u64,

    /// HTTP timeout for each status request. Default: 120.
    pub poll_request_timeout_secs: u64,

    /// Overall wall-clock budget for a job to complete. Default: 900.
    pub job_timeout_secs: f64,

    /// Delay between status requests. Default: 2.0.
    pub poll_interval_secs: f64,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MARKER_URL.to_string(),
            api_key: String::new(),
            submit_timeout_secs: 300,
            poll_request_timeout_secs: 120,
            job_timeout_secs: 900.0,
            poll_interval_secs: 2.0,
        }
    }
}

impl fmt::Debug for MarkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("submit_timeout_secs", &self.submit_timeout_secs)
            .field("poll_request_timeout_secs", &self.poll_request_timeout_secs)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

impl MarkerConfig {
    pub fn builder(api_key: impl Into<String>) -> MarkerConfigBuilder {
        MarkerConfigBuilder {
            config: Self {
                api_key: api_key.into(),
                ..Self::default()
            },
        }
    }

    /// Saturates at [`Duration::MAX`]; non-positive or NaN is zero.
    pub fn job_timeout(&self) -> Duration {
        saturating_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        saturating_secs(self.poll_interval_secs)
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Seconds that fit in a [`Duration`].
fn representable_secs(secs: f64) -> bool {
    secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Builder for [`MarkerConfig`].
#[derive(Debug)]
pub struct MarkerConfigBuilder {
    config: MarkerConfig,
}

impl MarkerConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn submit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.submit_timeout_secs = secs;
        self
    }

    pub fn poll_request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.poll_request_timeout_secs = secs;
        self
    }

    pub fn job_timeout_secs(mut self, secs: f64) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    pub fn poll_interval_secs(mut self, secs: f64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn build(self) -> Result<MarkerConfig, ConfigError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(ConfigError(
                "Missing API key. Provide --api-key or set DATALAB_API_KEY.".into(),
            ));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(ConfigError(format!(
                "Marker endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        if !representable_secs(c.job_timeout_secs) {
            return Err(ConfigError(format!(
                "Job timeout must be a non-negative, in-range number of seconds, got {}",
                c.job_timeout_secs
            )));
        }
        if !representable_secs(c.poll_interval_secs) {
            return Err(ConfigError(format!(
                "Poll interval must be a non-negative, in-range number of seconds, got {}",
                c.poll_interval_secs
            )));
        }
        Ok(self.config)
    }
}

// ── Vision ───────────────────────────────────────────────────────────────

/// Settings for the OpenAI-compatible vision endpoint.
#[derive(Clone)]
pub struct VisionConfig {
    pub api_key: String,

    /// API base; `/chat/completions` is appended. Default: [`DEFAULT_API_BASE`].
    pub api_base: String,

    /// Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub timeout_secs: u64,

    /// Sampling temperature. Default: `Some(1.0)`.
    ///
    /// Some reasoning models only accept the default temperature and reject
    /// the field outright; the client drops it and retries when that happens.
    pub temperature: Option<f32>,

    /// Total attempts per image, including the first. Default: 3.
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles afterwards. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single backoff sleep. Default: 8000.
    pub max_backoff_ms: u64,
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .finish()
    }
}

impl VisionConfig {
    pub fn builder(api_key: impl Into<String>) -> VisionConfigBuilder {
        VisionConfigBuilder {
            config: Self {
                api_key: api_key.into(),
                api_base: DEFAULT_API_BASE.to_string(),
                model: DEFAULT_MODEL.to_string(),
                timeout_secs: 120,
                temperature: Some(1.0),
                max_attempts: 3,
                retry_backoff_ms: 1000,
                max_backoff_ms: 8000,
            },
        }
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Backoff to sleep after the given failed attempt (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Builder for [`VisionConfig`].
#[derive(Debug)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs.max(1);
        self
    }

    pub fn temperature(mut self, t: Option<f32>) -> Self {
        self.config.temperature = t.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> Result<VisionConfig, ConfigError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(ConfigError(
                "Missing GPT API key. Provide --api-key or set GPT_API_KEY/OPENAI_API_KEY.".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be ≥ 1".into()));
        }
        if c.model.trim().is_empty() {
            return Err(ConfigError("model must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Sandbox ──────────────────────────────────────────────────────────────

/// Settings for the child process that runs generated plotting code.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter used for the child. Default: `$GRAPHIFY_PYTHON` or `python3`.
    pub python_exe: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let python_exe = std::env::var_os("GRAPHIFY_PYTHON")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("python3"));
        Self { python_exe }
    }
}

// ── Batch ────────────────────────────────────────────────────────────────

/// Settings for one graphify batch run.
#[derive(Clone)]
pub struct BatchConfig {
    /// Directory receiving `<image>.graph.json`, reconstructions and `summary.json`.
    pub out_dir: PathBuf,

    /// Execute generated plotting code. Default: false.
    pub execute: bool,

    /// Parallel workers. `<= 1` means strictly sequential. Default: 3.
    pub concurrency: usize,

    /// Only process the first N images of the sorted listing.
    pub max_images: Option<usize>,

    /// Extra text appended to the user prompt.
    pub extra_context: Option<String>,

    /// Wall-clock limit for each sandboxed execution. Default: 30.
    pub exec_timeout_secs: u64,

    /// Optional progress events for the CLI.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("out_dir", &self.out_dir)
            .field("execute", &self.execute)
            .field("concurrency", &self.concurrency)
            .field("max_images", &self.max_images)
            .field("extra_context", &self.extra_context)
            .field("exec_timeout_secs", &self.exec_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    pub fn builder(out_dir: impl Into<PathBuf>) -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self {
                out_dir: out_dir.into(),
                execute: false,
                concurrency: 3,
                max_images: None,
                extra_context: None,
                exec_timeout_secs: 30,
                progress_callback: None,
            },
        }
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn execute(mut self, v: bool) -> Self {
        self.config.execute = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_images(mut self, n: Option<usize>) -> Self {
        self.config.max_images = n;
        self
    }

    pub fn extra_context(mut self, ctx: Option<String>) -> Self {
        self.config.extra_context = ctx.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn exec_timeout_secs(mut self, secs: u64) -> Self {
        self.config.exec_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn build(self) -> Result<BatchConfig, ConfigError> {
        if self.config.out_dir.as_os_str().is_empty() {
            return Err(ConfigError("output directory must not be empty".into()));
        }
        Ok(self.config)
    }
}
