//! Run model-generated plotting code in a killable child process.
//!
//! Every execution gets a private temporary directory holding the code, a
//! small Python harness, the harness's result file and a staging path for
//! the figure. The figure is moved to the caller's `output_path` only after
//! the harness reports success and the staging file exists, so a failed or
//! timed-out run never leaves a partial file behind.
//!
//! The child inherits no stdin, runs with `MPLBACKEND=Agg`, and is killed
//! when the wall-clock limit expires. It is not otherwise isolated: the
//! generated code runs with the caller's filesystem and network access.

use crate::config::SandboxConfig;
use crate::graphify::{CodeExecutor, ExecutionOutcome};
use crate::prompts::RECREATE_FN;
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Harness executed as `python harness.py <code> <output> <result>`.
///
/// Always writes a JSON object `{"ok": bool, "error"?: str}` to the result
/// path unless the child is killed or exits from inside the generated code.
const HARNESS: &str = r#"import json
import sys
import traceback


def emit(path, payload):
    with open(path, "w", encoding="utf-8") as fh:
        json.dump(payload, fh)


def main():
    code_path, output_path, result_path = sys.argv[1], sys.argv[2], sys.argv[3]
    try:
        plt = None
        try:
            import matplotlib
            matplotlib.use("Agg")
            import matplotlib.pyplot as plt
            plt.show = lambda *a, **k: None
        except ImportError:
            plt = None
        with open(code_path, encoding="utf-8") as fh:
            source = fh.read()
        namespace = {"__name__": "__generated__"}
        exec(compile(source, "<generated>", "exec"), namespace)
        fn = namespace.get("__RECREATE_FN__")
        if not callable(fn):
            emit(result_path, {"ok": False, "error": "No __RECREATE_FN__(output_path: str) found"})
            return
        fn(output_path)
        if plt is not None:
            try:
                plt.close("all")
            except Exception:
                pass
        emit(result_path, {"ok": True})
    except Exception as exc:
        emit(result_path, {"ok": False, "error": "Execution error: %s\n%s" % (exc, traceback.format_exc())})


main()
"#;

#[derive(Debug, Deserialize)]
struct HarnessReport {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Executes generated code with the configured interpreter.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn python_exe(&self) -> &Path {
        &self.config.python_exe
    }

    /// Run `code`, expecting it to define `recreate_plot(output_path)`.
    ///
    /// Never fails: every problem, including a missing interpreter, is
    /// reported through the returned [`ExecutionOutcome`].
    pub async fn execute(&self, code: &str, output_path: &Path, limit: Duration) -> ExecutionOutcome {
        match self.run(code, output_path, limit).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failed(format!("Sandbox setup failed: {e}")),
        }
    }

    async fn run(&self, code: &str, output_path: &Path, limit: Duration) -> io::Result<ExecutionOutcome> {
        let workdir = tempfile::Builder::new().prefix("graphify-exec-").tempdir()?;
        let code_path = workdir.path().join("generated.py");
        let harness_path = workdir.path().join("harness.py");
        let result_path = workdir.path().join("result.json");
        let staging_path = workdir.path().join(staging_name(output_path));

        tokio::fs::write(&code_path, code).await?;
        tokio::fs::write(&harness_path, HARNESS.replace("__RECREATE_FN__", RECREATE_FN)).await?;

        let mut cmd = Command::new(&self.config.python_exe);
        cmd.arg(&harness_path)
            .arg(&code_path)
            .arg(&staging_path)
            .arg(&result_path)
            .current_dir(workdir.path())
            .env("MPLBACKEND", "Agg")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return Ok(ExecutionOutcome::failed(format!(
                    "Failed to start {}: {e}",
                    self.config.python_exe.display()
                )))
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(ExecutionOutcome::failed(format!(
                    "Failed waiting for child process: {e}"
                )))
            }
            Err(_) => {
                warn!("Generated code exceeded {}; killed", format_limit(limit));
                return Ok(ExecutionOutcome::failed(format!(
                    "Execution timed out after {}",
                    format_limit(limit)
                )));
            }
        };

        if !output.stderr.is_empty() {
            debug!(
                "sandbox stderr (exit {:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let report: Option<HarnessReport> = tokio::fs::read(&result_path)
            .await
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok());
        let Some(report) = report else {
            return Ok(ExecutionOutcome::failed("No result returned from execution"));
        };
        if !report.ok {
            return Ok(ExecutionOutcome::failed(
                report
                    .error
                    .unwrap_or_else(|| "Unknown execution error".to_string()),
            ));
        }
        if !tokio::fs::try_exists(&staging_path).await.unwrap_or(false) {
            return Ok(ExecutionOutcome::failed(format!(
                "{RECREATE_FN} returned without writing an output file"
            )));
        }

        publish(&staging_path, output_path).await?;
        Ok(ExecutionOutcome::ok(output_path.to_path_buf()))
    }
}

#[async_trait]
impl CodeExecutor for Sandbox {
    async fn execute(&self, code: &str, output_path: &Path, timeout: Duration) -> ExecutionOutcome {
        Sandbox::execute(self, code, output_path, timeout).await
    }
}

/// Staging filename keeping the destination's extension, which matplotlib
/// uses to pick the image format.
fn staging_name(output_path: &Path) -> PathBuf {
    let ext = output_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    PathBuf::from(format!("output.{ext}"))
}

/// Move the staged figure into place; rename first, copy across filesystems.
///
/// A failed copy leaves nothing at `dest`.
async fn publish(staging: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(staging, dest).await.is_err() {
        if let Err(e) = tokio::fs::copy(staging, dest).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(e);
        }
    }
    Ok(())
}

fn format_limit(limit: Duration) -> String {
    if limit.subsec_nanos() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{:.1}s", limit.as_secs_f64())
    }
}
