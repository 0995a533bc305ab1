//! Observability tests for grading lifecycle tracing.
//!
//! These tests verify that structured tracing events are emitted for stage
//! start/finish and for each per-submission result.

use autograde_core::{
    emit_stage_finished, emit_stage_started, emit_submission_failed, emit_submission_graded,
    emit_submission_skipped, SubmissionSpan,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_stage_events_carry_stage_name() {
    emit_stage_started("extract");
    emit_stage_finished("extract", 120, 2);

    assert!(logs_contain("stage.started"));
    assert!(logs_contain("stage.finished"));
    assert!(logs_contain("extract"));
}

#[traced_test]
#[test]
fn test_submission_graded_logs_completeness() {
    emit_submission_graded("G1", 850, true);

    assert!(logs_contain("submission.graded"));
    assert!(logs_contain("G1"));
}

#[traced_test]
#[test]
fn test_submission_skipped() {
    emit_submission_skipped("G2");
    assert!(logs_contain("submission.skipped"));
}

/// Failures are logged at warn level with the error text.
#[traced_test]
#[test]
fn test_submission_failed_logs_warning() {
    let error_msg = "container launch failed: docker not found";
    emit_submission_failed("group_of_ab1_cd2", &error_msg);

    assert!(logs_contain("submission.failed"));
    assert!(logs_contain("WARN"));
    assert!(logs_contain("docker not found"));
}

#[traced_test]
#[test]
fn test_events_inside_submission_span_carry_id() {
    {
        let _span = SubmissionSpan::enter("G7");
        emit_submission_graded("G7", 10, false);
    }
    assert!(logs_contain("autograde.submission"));
    assert!(logs_contain("submission_id=G7"));
}

/// Extraction ends with one summary line.
#[traced_test]
#[test]
fn test_extraction_logs_summary() {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    let dir = tempfile::tempdir().unwrap();
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("Submissions/G1/solution.py", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"x = 1").unwrap();
    let bundle = dir.path().join("bundle.zip");
    std::fs::write(&bundle, zip.finish().unwrap().into_inner()).unwrap();

    autograde_core::Extractor::new(
        autograde_core::ExtractConfig::default(),
        &autograde_core::ArtifactNames::default(),
    )
    .unwrap()
    .extract_bundle(&bundle, &dir.path().join("out"), false)
    .unwrap();

    assert!(logs_contain("Bundle extracted"));
}
