//! Structured observability hooks for pipeline and submission lifecycle.
//!
//! This module provides:
//! - Submission-scoped tracing spans via the `SubmissionSpan` RAII guard
//!   (sync code) or [`submission_span`] (async code)
//! - Emission functions for key lifecycle events: stage start/finish and
//!   per-submission grading results
//!
//! Events are emitted at `info!` level (`warn!` for failures) and can be
//! filtered with `RUST_LOG`.

use tracing::{info, warn};

/// RAII guard that enters a submission-scoped span while it is alive.
///
/// ```ignore
/// let _span = SubmissionSpan::enter("group_of_ab1_cd2");
/// // every tracing call now carries submission_id = "group_of_ab1_cd2"
/// ```
pub struct SubmissionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SubmissionSpan {
    /// Create and enter a span tagged with the submission id.
    pub fn enter(submission_id: &str) -> Self {
        Self {
            _span: submission_span(submission_id).entered(),
        }
    }
}

/// Submission-scoped span for async work, used with `Instrument`.
pub fn submission_span(submission_id: &str) -> tracing::Span {
    tracing::info_span!("autograde.submission", submission_id = %submission_id)
}

/// Emit event: a pipeline stage started.
pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

/// Emit event: a pipeline stage finished.
pub fn emit_stage_finished(stage: &str, duration_ms: u64, items: usize) {
    info!(
        event = "stage.finished",
        stage = %stage,
        duration_ms = duration_ms,
        items = items,
    );
}

/// Emit event: a submission produced a result artifact.
pub fn emit_submission_graded(submission_id: &str, duration_ms: u64, complete: bool) {
    info!(
        event = "submission.graded",
        submission_id = %submission_id,
        duration_ms = duration_ms,
        complete = complete,
    );
}

/// Emit event: a submission was skipped because its artifacts already exist.
pub fn emit_submission_skipped(submission_id: &str) {
    info!(event = "submission.skipped", submission_id = %submission_id);
}

/// Emit event: grading a submission failed (warning level).
pub fn emit_submission_failed(submission_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "submission.failed", submission_id = %submission_id, error = %error);
}
