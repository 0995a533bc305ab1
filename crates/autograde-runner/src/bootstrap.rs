//! In-container bootstrap: module search path plus one bounded test run.
//!
//! The plan is built on the host from the grader configuration and handed
//! to the container as explicit `autograde bootstrap` arguments, so nothing
//! inside the container depends on ambient environment settings.

use autograde_core::artifact::append_log;
use autograde_core::{inspect, read_results, seal_failure, ArtifactNames, GraderConfig, ResultState};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long output readers may keep draining after the runner is gone.
/// Processes the runner left in the background can hold the pipes open.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

/// Upper bound on captured runner output per stream.
const OUTPUT_LIMIT: usize = 1 << 20;

/// How the test runner process ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Runner exited on its own (-1 if killed by a signal).
    Exited(i32),
    /// Runner outlived timeout + grace and was killed.
    TimedOut,
    /// Runner could not be started or waited on.
    Failed(String),
}

/// Result of one bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapOutcome {
    pub termination: Termination,
    /// Both artifacts exist and every test reported an outcome.
    pub complete: bool,
    pub duration_ms: u64,
}

impl BootstrapOutcome {
    /// Process exit code of `autograde bootstrap`: 0 when complete, 2 when
    /// the results are partial or sealed.
    pub fn exit_code(&self) -> i32 {
        if self.complete {
            0
        } else {
            2
        }
    }
}

/// Fully resolved bootstrap procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapPlan {
    pub submission_root: PathBuf,
    pub tests_root: PathBuf,
    pub library_root: PathBuf,
    /// Variable that receives the module search path.
    pub search_path_var: String,
    pub test_runner: Vec<String>,
    pub test_target: String,
    pub timeout: Duration,
    pub grace: Duration,
    pub verbose: bool,
    pub artifacts: ArtifactNames,
}

impl BootstrapPlan {
    /// Plan for the fixed mount points inside the container.
    pub fn in_container(config: &GraderConfig) -> Self {
        Self {
            submission_root: config.container.submission_mount.clone(),
            tests_root: config.container.tests_mount.clone(),
            library_root: config.container.library_mount.clone(),
            search_path_var: config.bootstrap.search_path_var.clone(),
            test_runner: config.bootstrap.test_runner.clone(),
            test_target: config.bootstrap.test_target.clone(),
            timeout: config.bootstrap.timeout(),
            grace: Duration::from_secs(config.bootstrap.grace_secs),
            verbose: config.bootstrap.verbose,
            artifacts: config.artifacts.clone(),
        }
    }

    /// Library, tests, submission: in that precedence order.
    pub fn search_path(&self) -> anyhow::Result<OsString> {
        let path = std::env::join_paths([&self.library_root, &self.tests_root, &self.submission_root])?;
        Ok(path)
    }

    pub fn results_path(&self) -> PathBuf {
        self.artifacts.results_path(&self.submission_root)
    }

    pub fn log_path(&self) -> PathBuf {
        self.artifacts.log_path(&self.submission_root)
    }

    pub fn hard_deadline(&self) -> Duration {
        self.timeout + self.grace
    }

    /// `<runner…> <target> -t <secs> [-v] -r <results> -c <log>`
    pub fn runner_command(&self) -> Vec<String> {
        let mut argv = self.test_runner.clone();
        argv.push(self.test_target.clone());
        argv.push("-t".to_string());
        argv.push(self.timeout.as_secs_f64().to_string());
        if self.verbose {
            argv.push("-v".to_string());
        }
        argv.push("-r".to_string());
        argv.push(self.results_path().display().to_string());
        argv.push("-c".to_string());
        argv.push(self.log_path().display().to_string());
        argv
    }

    /// Command line that re-creates this plan via `autograde bootstrap`.
    pub fn container_command(&self, program: &Path) -> Vec<String> {
        let mut argv = vec![
            program.display().to_string(),
            "bootstrap".to_string(),
            "--submission".to_string(),
            self.submission_root.display().to_string(),
            "--tests".to_string(),
            self.tests_root.display().to_string(),
            "--library".to_string(),
            self.library_root.display().to_string(),
            "--timeout".to_string(),
            self.timeout.as_secs_f64().to_string(),
            "--grace".to_string(),
            self.grace.as_secs_f64().to_string(),
            "--target".to_string(),
            self.test_target.clone(),
            "--search-path-var".to_string(),
            self.search_path_var.clone(),
            "--results-file".to_string(),
            self.artifacts.results_file.clone(),
            "--log-file".to_string(),
            self.artifacts.log_file.clone(),
        ];
        if !self.verbose {
            argv.push("--quiet".to_string());
        }
        argv.push("--".to_string());
        argv.extend(self.test_runner.iter().cloned());
        argv
    }

    /// Run the test runner once and guarantee both artifacts afterwards.
    pub async fn run(&self) -> anyhow::Result<BootstrapOutcome> {
        let start = Instant::now();
        if self.test_runner.is_empty() {
            anyhow::bail!("Bootstrap has empty test runner command");
        }

        // Results left over from an earlier run must not mask this one.
        for stale in [self.results_path(), self.log_path()] {
            match std::fs::remove_file(&stale) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let search_path = self.search_path()?;
        let argv = self.runner_command();
        info!(
            submission = %self.submission_root.display(),
            timeout_secs = self.timeout.as_secs_f64(),
            "Starting test runner"
        );

        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .env(&self.search_path_var, &search_path)
            .current_dir(&self.submission_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut captured = String::new();
        let termination = match spawned {
            Err(e) => Termination::Failed(format!("cannot start {}: {}", argv[0], e)),
            Ok(mut child) => {
                // Only the runner itself is awaited; the pipes are read on the
                // side so a backgrounded child holding them cannot stall us.
                let stdout = child.stdout.take().map(OutputCapture::start);
                let stderr = child.stderr.take().map(OutputCapture::start);

                let waited = tokio::time::timeout(self.hard_deadline(), child.wait()).await;
                let termination = match waited {
                    Ok(Ok(status)) => Termination::Exited(status.code().unwrap_or(-1)),
                    Ok(Err(e)) => Termination::Failed(format!("waiting on test runner: {}", e)),
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Could not kill test runner");
                        }
                        Termination::TimedOut
                    }
                };

                let (stdout, stderr) =
                    tokio::join!(OutputCapture::finish(stdout), OutputCapture::finish(stderr));
                captured = captured_streams(&stdout, &stderr);
                termination
            }
        };

        let note = describe(&termination, self.hard_deadline());
        match read_results(&self.submission_root, &self.artifacts) {
            ResultState::Missing | ResultState::Malformed(_) => {
                warn!(reason = %note, "Test runner left no usable results; sealing");
                seal_failure(&self.submission_root, &self.artifacts, &note, &captured)?;
            }
            ResultState::Complete(_) | ResultState::Incomplete(_) => {
                append_log(
                    &self.submission_root,
                    &self.artifacts,
                    &format!("[autograde] {}\n{}", note, captured),
                )?;
            }
        }

        let state = inspect(&self.submission_root, &self.artifacts);
        let outcome = BootstrapOutcome {
            termination,
            complete: state.is_complete(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            complete = outcome.complete,
            duration_ms = outcome.duration_ms,
            "Test runner finished"
        );
        Ok(outcome)
    }
}

/// One runner output stream, read into memory by a background task.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputCapture {
    fn start<R>(mut reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut buf = sink.lock().unwrap_or_else(|p| p.into_inner());
                        let room = OUTPUT_LIMIT.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Wait briefly for EOF, then abandon the reader and keep what arrived.
    async fn finish(capture: Option<Self>) -> Vec<u8> {
        let Some(mut capture) = capture else {
            return Vec::new();
        };
        if tokio::time::timeout(OUTPUT_DRAIN, &mut capture.task).await.is_err() {
            debug!("Runner output still open after exit; abandoning reader");
            capture.task.abort();
        }
        let mut buf = capture.buffer.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *buf)
    }
}

fn describe(termination: &Termination, deadline: Duration) -> String {
    match termination {
        Termination::Exited(code) => format!("test runner exited with code {}", code),
        Termination::TimedOut => format!(
            "test run exceeded {}s and was killed",
            deadline.as_secs_f64()
        ),
        Termination::Failed(reason) => format!("test runner failed: {}", reason),
    }
}

fn captured_streams(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::new();
    for (label, bytes) in [("stdout", stdout), ("stderr", stderr)] {
        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("--- runner {} ---\n{}", label, text));
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
