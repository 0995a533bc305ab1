//! Tracing setup shared by both sides of a grading run.
//!
//! The same `autograde` binary runs twice per submission: once on the host,
//! where it extracts the bundle, launches one container per submission and
//! writes the gradebook, and once inside each container as `autograde
//! bootstrap`. Both call [`init_tracing`] at start-up.
//!
//! Log lines always go to stderr. On the host, stdout carries the command
//! summaries an instructor reads or pipes. Inside the container the
//! bootstrap's stderr is what the container runtime hands back to the
//! orchestrator, which folds it into the sealed failure record when a run
//! leaves no usable results; keeping logs there is what makes a crashed or
//! killed run explainable from the submission's log artifact alone.
//!
//! `--json` is meant for batch runs over a whole course, where the per
//! submission `autograde.submission` span fields let a log store group
//! every line of one submission. `RUST_LOG` overrides the default filter,
//! e.g. `RUST_LOG=autograde_runner=debug` to watch runner output draining.
//!
//! Calling [`init_tracing`] again is harmless: the global subscriber can
//! only be set once per process and later attempts are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else,
/// notably the archive and process plumbing underneath, stays at `warn`.
const AUTOGRADE_TARGETS: [&str; 3] = ["autograde", "autograde_core", "autograde_runner"];

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        AUTOGRADE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level)),
    );
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: verbosity of the autograde crates when `RUST_LOG` is unset
///   (`--verbose` maps to `DEBUG`).
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
