//! Grading orchestration: one container per submission, strictly in order.

use anyhow::Context;
use autograde_core::artifact::append_log;
use autograde_core::{
    emit_submission_failed, emit_submission_graded, emit_submission_skipped, inspect,
    list_submissions, seal_failure, submission_span, GraderConfig, ResultState, SubmissionDir,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::bootstrap::BootstrapPlan;
use crate::container::{ContainerRuntime, ContainerSpec, Mount};

/// Final state of one submission after a grading pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Every test reported an outcome.
    Graded,
    /// Results exist but some tests never finished.
    Incomplete,
    /// No usable results were produced; a failing record was sealed.
    Failed,
    /// Already graded by an earlier pass.
    Skipped,
}

/// Outcome of grading one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionOutcome {
    pub id: String,
    pub status: SubmissionStatus,
    /// Container exit code, when the container ran.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

/// Summary of a whole grading pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradingReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<SubmissionOutcome>,
    pub duration_ms: u64,
}

impl GradingReport {
    pub fn count(&self, status: SubmissionStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Submissions that need a human look.
    pub fn problems(&self) -> impl Iterator<Item = &SubmissionOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                o.status,
                SubmissionStatus::Failed | SubmissionStatus::Incomplete
            )
        })
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("serialize grading report")?;
        std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parse {:?}", path))
    }

    /// Ids whose artifacts this pipeline produced and accepted.
    pub fn finished_ids(&self) -> BTreeSet<String> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SubmissionStatus::Graded | SubmissionStatus::Skipped))
            .map(|o| o.id.clone())
            .collect()
    }
}

/// Drives one isolated execution per submission directory.
pub struct Orchestrator<R> {
    config: GraderConfig,
    runtime: R,
}

impl<R: ContainerRuntime> Orchestrator<R> {
    pub fn new(config: GraderConfig, runtime: R) -> Self {
        Self { config, runtime }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Submission read-write, tests read-only, library read-only.
    pub fn mounts(&self, submission: &Path, tests: &Path, library: &Path) -> Vec<Mount> {
        let container = &self.config.container;
        vec![
            Mount::read_write(submission, &container.submission_mount),
            Mount::read_only(tests, &container.tests_mount),
            Mount::read_only(library, &container.library_mount),
        ]
    }

    pub fn container_spec(
        &self,
        submission: &SubmissionDir,
        tests: &Path,
        library: &Path,
    ) -> ContainerSpec {
        let plan = BootstrapPlan::in_container(&self.config);
        ContainerSpec {
            name: submission.id.clone(),
            image: self.config.container.image.clone(),
            mounts: self.mounts(&submission.path, tests, library),
            workdir: self.config.container.submission_mount.clone(),
            command: plan.container_command(&self.config.container.bootstrap_program),
        }
    }

    /// Grade every submission under `destination`, one at a time, in id order.
    ///
    /// A submission that fails never stops the pass; its failure is recorded
    /// in the report and sealed into its result artifact.
    pub async fn grade_all(&self, destination: &Path) -> anyhow::Result<GradingReport> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let tests = resolve_dir(&self.config.grade.tests_dir, "tests")?;
        let library = resolve_dir(&self.config.grade.lib_dir, "grading library")?;
        let destination = resolve_dir(destination, "destination")?;

        let report_path = destination.join(&self.config.grade.report_file);
        let finished = self.previously_finished(&report_path);

        let submissions = list_submissions(&destination)?;
        info!(
            run_id = %run_id,
            submissions = submissions.len(),
            "Starting grading pass"
        );

        let mut outcomes = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            let outcome = self
                .grade_one(submission, &tests, &library, finished.contains(&submission.id))
                .instrument(submission_span(&submission.id))
                .await;
            outcomes.push(outcome);
        }

        let report = GradingReport {
            run_id,
            generated_at: Utc::now(),
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        report.write_json(&report_path)?;

        info!(
            run_id = %report.run_id,
            graded = report.count(SubmissionStatus::Graded),
            incomplete = report.count(SubmissionStatus::Incomplete),
            failed = report.count(SubmissionStatus::Failed),
            skipped = report.count(SubmissionStatus::Skipped),
            "Grading pass finished"
        );
        Ok(report)
    }

    /// Submissions an earlier pass finished, according to its report.
    ///
    /// Artifacts found in a submission directory are only trusted when they
    /// are listed here; anything else may have arrived with the submission.
    fn previously_finished(&self, report_path: &Path) -> BTreeSet<String> {
        if self.config.grade.overwrite_existing || !report_path.is_file() {
            return BTreeSet::new();
        }
        match GradingReport::read_json(report_path) {
            Ok(previous) => previous.finished_ids(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable grading report; regrading everything");
                BTreeSet::new()
            }
        }
    }

    async fn grade_one(
        &self,
        submission: &SubmissionDir,
        tests: &Path,
        library: &Path,
        finished_before: bool,
    ) -> SubmissionOutcome {
        let names = &self.config.artifacts;

        if finished_before && inspect(&submission.path, names).is_complete() {
            emit_submission_skipped(&submission.id);
            return SubmissionOutcome {
                id: submission.id.clone(),
                status: SubmissionStatus::Skipped,
                exit_code: None,
                duration_ms: 0,
                detail: None,
            };
        }

        let spec = self.container_spec(submission, tests, library);
        let start = Instant::now();
        let (exit_code, reason, stderr) = match self.runtime.run(&spec).await {
            Ok(exit) => {
                let reason = format!("container exited with code {}", exit.exit_code);
                (Some(exit.exit_code), reason, exit.stderr)
            }
            Err(e) => (None, format!("container launch failed: {}", e), String::new()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let state = inspect(&submission.path, names);
        let (status, detail) = match &state.results {
            ResultState::Complete(_) | ResultState::Incomplete(_) => {
                if !state.log_present {
                    let note = format!("[autograde] {}", reason);
                    if let Err(e) = append_log(&submission.path, names, &note) {
                        warn!(error = %e, "Could not write log artifact");
                    }
                }
                let status = if matches!(state.results, ResultState::Complete(_)) {
                    SubmissionStatus::Graded
                } else {
                    SubmissionStatus::Incomplete
                };
                let detail = (exit_code != Some(0)).then(|| reason.clone());
                (status, detail)
            }
            ResultState::Missing | ResultState::Malformed(_) => {
                let reason = format!("{}; no usable {}", reason, names.results_file);
                if let Err(e) = seal_failure(&submission.path, names, &reason, &stderr) {
                    warn!(error = %e, "Could not seal failed submission");
                }
                (SubmissionStatus::Failed, Some(reason))
            }
        };

        match status {
            SubmissionStatus::Failed => {
                emit_submission_failed(&submission.id, &detail.clone().unwrap_or_default())
            }
            _ => emit_submission_graded(
                &submission.id,
                duration_ms,
                status == SubmissionStatus::Graded,
            ),
        }

        SubmissionOutcome {
            id: submission.id.clone(),
            status,
            exit_code,
            duration_ms,
            detail,
        }
    }
}

fn resolve_dir(path: &Path, what: &str) -> anyhow::Result<PathBuf> {
    if !path.is_dir() {
        anyhow::bail!("{} directory {:?} does not exist", what, path);
    }
    std::fs::canonicalize(path).with_context(|| format!("resolve {} directory {:?}", what, path))
}
