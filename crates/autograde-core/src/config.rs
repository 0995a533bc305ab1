//! Grader configuration.
//!
//! Every field has a default, so an empty (or absent) TOML file yields a
//! usable configuration. Sections mirror the pipeline stages:
//!
//! ```toml
//! [container]
//! image = "autograde-python:latest"
//!
//! [bootstrap]
//! timeout_secs = 60
//!
//! [grade]
//! tests_dir = "tests"
//! lib_dir = "lib"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GradeError, Result};

/// Top-level configuration for the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraderConfig {
    pub container: ContainerConfig,
    pub bootstrap: BootstrapConfig,
    pub artifacts: ArtifactNames,
    pub extract: ExtractConfig,
    pub grade: GradeConfig,
}

/// How isolated execution environments are launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container runtime executable (docker-compatible CLI).
    pub runtime: String,

    /// Base image every submission runs in.
    pub image: String,

    /// Extra flags passed to `run` before the mounts.
    pub extra_args: Vec<String>,

    /// Mount point of the submission directory (read-write).
    pub submission_mount: PathBuf,

    /// Mount point of the test definitions (read-only).
    pub tests_mount: PathBuf,

    /// Mount point of the grading-support library (read-only).
    pub library_mount: PathBuf,

    /// Path of the autograde binary inside the container.
    pub bootstrap_program: PathBuf,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "autograde-python:latest".to_string(),
            extra_args: vec!["--network=none".to_string()],
            submission_mount: PathBuf::from("/submission"),
            tests_mount: PathBuf::from("/tests"),
            library_mount: PathBuf::from("/grader"),
            bootstrap_program: PathBuf::from("/grader/bin/autograde"),
        }
    }
}

/// The bounded test invocation performed inside the container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Environment variable holding the module search path.
    pub search_path_var: String,

    /// Test runner command (first element is the executable).
    pub test_runner: Vec<String>,

    /// Test module handed to the runner as its positional target.
    pub test_target: String,

    /// Wall-clock budget passed to the runner with `-t`.
    pub timeout_secs: u64,

    /// Extra time the runner gets to write partial results before it is killed.
    pub grace_secs: u64,

    /// Pass `-v` to the runner.
    pub verbose: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            search_path_var: "PYTHONPATH".to_string(),
            test_runner: vec!["python3".to_string(), "/grader/runner.py".to_string()],
            test_target: "tests".to_string(),
            timeout_secs: 60,
            grace_secs: 5,
            verbose: true,
        }
    }
}

impl BootstrapConfig {
    /// Budget handed to the test runner.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Point past which the runner is killed.
    pub fn hard_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + self.grace_secs)
    }
}

/// Fixed file names of the per-submission artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactNames {
    pub results_file: String,
    pub log_file: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            results_file: "results.json".to_string(),
            log_file: "log.txt".to_string(),
        }
    }
}

impl ArtifactNames {
    pub fn results_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.results_file)
    }

    pub fn log_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.log_file)
    }
}

/// Submission bundle extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractConfig {
    /// Conventional folder inside a CMS export holding one entry per group.
    pub submissions_dir_name: String,

    /// Glob patterns of file names kept from each submission.
    pub file_patterns: Vec<String>,

    /// Upper bound on bytes unpacked from any single archive.
    pub max_uncompressed_bytes: u64,

    /// Maximum rounds of nested-archive expansion.
    pub max_depth: usize,

    /// Replace submission directories that already exist. Independent of
    /// `grade.overwrite_existing`, which only regrades.
    pub overwrite_existing: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            submissions_dir_name: "Submissions".to_string(),
            file_patterns: vec!["*".to_string()],
            max_uncompressed_bytes: 512 * 1024 * 1024,
            max_depth: 8,
            overwrite_existing: false,
        }
    }
}

/// Grading stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradeConfig {
    /// Host directory with the test definitions.
    pub tests_dir: PathBuf,

    /// Host directory with the grading-support library.
    pub lib_dir: PathBuf,

    /// Re-grade submissions that already have complete artifacts.
    pub overwrite_existing: bool,

    /// File name of the grading report written into the destination.
    pub report_file: String,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("tests"),
            lib_dir: PathBuf::from("lib"),
            overwrite_existing: false,
            report_file: "grading-report.json".to_string(),
        }
    }
}

impl GraderConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GraderConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_toml_str(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.container.image.trim().is_empty() {
            return Err(GradeError::InvalidConfig("container.image is empty".into()));
        }
        if self.container.runtime.trim().is_empty() {
            return Err(GradeError::InvalidConfig("container.runtime is empty".into()));
        }
        if self.bootstrap.test_runner.is_empty() {
            return Err(GradeError::InvalidConfig(
                "bootstrap.test_runner is empty".into(),
            ));
        }
        if self.bootstrap.timeout_secs == 0 {
            return Err(GradeError::InvalidConfig(
                "bootstrap.timeout_secs must be positive".into(),
            ));
        }
        if self.extract.max_depth == 0 {
            return Err(GradeError::InvalidConfig(
                "extract.max_depth must be positive".into(),
            ));
        }

        let mounts = [
            &self.container.submission_mount,
            &self.container.tests_mount,
            &self.container.library_mount,
        ];
        for mount in mounts {
            if !mount.is_absolute() {
                return Err(GradeError::InvalidConfig(format!(
                    "mount point {} is not absolute",
                    mount.display()
                )));
            }
        }
        if mounts[0] == mounts[1] || mounts[0] == mounts[2] || mounts[1] == mounts[2] {
            return Err(GradeError::InvalidConfig(
                "mount points must be distinct".into(),
            ));
        }
        Ok(())
    }
}
