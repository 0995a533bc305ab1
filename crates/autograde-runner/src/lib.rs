//! autograde runner
//!
//! The parts of the grading pipeline that launch processes:
//! - Per-submission container orchestration with fixed mounts
//! - The in-container bootstrap that runs one bounded test run
//! - The sequential extract, grade, analyze pipeline

pub mod bootstrap;
pub mod container;
pub mod orchestrator;
pub mod pipeline;

// Re-export key types
pub use bootstrap::{BootstrapOutcome, BootstrapPlan, Termination};
pub use container::{ContainerExit, ContainerRuntime, ContainerSpec, DockerRuntime, Mount, MountAccess};
pub use orchestrator::{GradingReport, Orchestrator, SubmissionOutcome, SubmissionStatus};
pub use pipeline::{Pipeline, PipelineReport};
