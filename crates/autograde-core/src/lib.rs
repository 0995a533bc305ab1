//! autograde core library
//!
//! Domain pieces of the grading pipeline that do not launch containers:
//! configuration, submission enumeration, result artifacts, bundle
//! extraction and gradebook analysis.

pub mod analyze;
pub mod artifact;
pub mod config;
pub mod error;
pub mod extract;
pub mod obs;
pub mod submission;
pub mod telemetry;

pub use analyze::{read_gradebook, render_summary, write_gradebook, AnalysisReport, Analyzer, GradeRow};
pub use artifact::{
    inspect, read_results, seal_failure, write_result_artifact, ArtifactState, Incomplete,
    ResultArtifact, ResultState,
};
pub use config::{
    ArtifactNames, BootstrapConfig, ContainerConfig, ExtractConfig, GradeConfig, GraderConfig,
};
pub use error::{GradeError, Result};
pub use extract::{unpack_zip, Collected, ExtractionFailure, ExtractionReport, Extractor};
pub use obs::{
    emit_stage_finished, emit_stage_started, emit_submission_failed, emit_submission_graded,
    emit_submission_skipped, submission_span, SubmissionSpan,
};
pub use submission::{group_members, list_submissions, SubmissionDir};
pub use telemetry::{default_directives, init_tracing};

/// autograde version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
