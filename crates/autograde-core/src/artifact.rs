//! Per-submission result and log artifacts.
//!
//! The result artifact is the JSON document the test runner writes into the
//! submission directory. Test ids are dotted `module.Class.test_name`
//! strings. The `incomplete` marker is never written by the runner itself;
//! it is added when a run had to be sealed after a timeout or crash.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use crate::config::ArtifactNames;
use crate::error::Result;

/// Structured record of one submission's test outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultArtifact {
    /// Test id → traceback.
    pub errors: BTreeMap<String, String>,
    /// Test id → traceback.
    pub failures: BTreeMap<String, String>,
    pub successes: Vec<String>,
    /// Test id → skip reason.
    pub skipped: BTreeMap<String, String>,
    pub expected_failures: BTreeMap<String, String>,
    pub unexpected_successes: Vec<String>,
    /// Test id → docstring.
    pub all_tests: BTreeMap<String, Option<String>>,
    pub aborted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete: Option<Incomplete>,
}

/// Why a result artifact does not describe a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incomplete {
    pub reason: String,
}

impl ResultArtifact {
    /// A sealed record for a run that produced no usable results.
    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self {
            incomplete: Some(Incomplete {
                reason: reason.into(),
            }),
            ..Default::default()
        }
    }

    /// Tests that never reported an outcome.
    ///
    /// Uses the explicit `aborted` list when present, otherwise every test in
    /// `allTests` that appears in none of the outcome sets.
    pub fn aborted_ids(&self) -> Vec<String> {
        if !self.aborted.is_empty() {
            return self.aborted.clone();
        }
        let processed: BTreeSet<&str> = self
            .errors
            .keys()
            .chain(self.failures.keys())
            .chain(self.skipped.keys())
            .chain(self.expected_failures.keys())
            .map(String::as_str)
            .chain(self.successes.iter().map(String::as_str))
            .chain(self.unexpected_successes.iter().map(String::as_str))
            .collect();
        self.all_tests
            .keys()
            .filter(|id| !processed.contains(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn passed(&self) -> usize {
        self.successes.len() + self.expected_failures.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len() + self.unexpected_successes.len()
    }

    pub fn errored(&self) -> usize {
        self.errors.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn aborted_count(&self) -> usize {
        self.aborted_ids().len()
    }

    /// Number of tests in the suite; falls back to the outcome sum for
    /// runners that omit `allTests`.
    pub fn total(&self) -> usize {
        let counted = self.passed()
            + self.failed()
            + self.errored()
            + self.skipped_count()
            + self.aborted.len();
        self.all_tests.len().max(counted)
    }

    /// Every test ran to an outcome and nothing sealed the record.
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none() && self.aborted_ids().is_empty()
    }
}

/// What a submission directory holds after (or before) grading.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState {
    Complete(ResultArtifact),
    Incomplete(ResultArtifact),
    Malformed(String),
    Missing,
}

impl ResultState {
    pub fn label(&self) -> &'static str {
        match self {
            ResultState::Complete(_) => "complete",
            ResultState::Incomplete(_) => "incomplete",
            ResultState::Malformed(_) => "malformed",
            ResultState::Missing => "missing",
        }
    }

    /// The parsed artifact, if it was well-formed.
    pub fn artifact(&self) -> Option<&ResultArtifact> {
        match self {
            ResultState::Complete(a) | ResultState::Incomplete(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.artifact().is_some()
    }
}

/// Result artifact state plus presence of the log artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactState {
    pub results: ResultState,
    pub log_present: bool,
}

impl ArtifactState {
    /// Both artifacts exist and the results describe a finished run.
    pub fn is_complete(&self) -> bool {
        self.log_present && matches!(self.results, ResultState::Complete(_))
    }
}

/// Read and classify the result artifact in `dir`.
pub fn read_results(dir: &Path, names: &ArtifactNames) -> ResultState {
    let path = names.results_path(dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ResultState::Missing,
        Err(e) => return ResultState::Malformed(e.to_string()),
    };
    match serde_json::from_str::<ResultArtifact>(&text) {
        Ok(artifact) if artifact.is_complete() => ResultState::Complete(artifact),
        Ok(artifact) => ResultState::Incomplete(artifact),
        Err(e) => ResultState::Malformed(e.to_string()),
    }
}

/// Classify both artifacts of a submission directory.
pub fn inspect(dir: &Path, names: &ArtifactNames) -> ArtifactState {
    ArtifactState {
        results: read_results(dir, names),
        log_present: names.log_path(dir).is_file(),
    }
}

/// Write `artifact` as pretty JSON, replacing any previous file atomically.
pub fn write_result_artifact(path: &Path, artifact: &ResultArtifact) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, artifact)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Append a block of text to the log artifact, creating it if needed.
pub fn append_log(dir: &Path, names: &ArtifactNames, text: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(names.log_path(dir))?;
    file.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Make sure a submission whose run went wrong still carries both artifacts.
///
/// When the result artifact is missing or malformed it is replaced by an
/// [`ResultArtifact::incomplete`] record so that the analyzer grades the
/// submission as failing instead of dropping it. `detail` is appended to the
/// log. Returns `true` if a record was written.
pub fn seal_failure(dir: &Path, names: &ArtifactNames, reason: &str, detail: &str) -> Result<bool> {
    let sealed = match read_results(dir, names) {
        ResultState::Missing | ResultState::Malformed(_) => {
            write_result_artifact(&names.results_path(dir), &ResultArtifact::incomplete(reason))?;
            true
        }
        ResultState::Complete(_) | ResultState::Incomplete(_) => false,
    };

    let mut note = format!("[autograde] {}\n", reason);
    if !detail.trim().is_empty() {
        note.push_str(detail);
    }
    if sealed || !names.log_path(dir).is_file() || !detail.trim().is_empty() {
        append_log(dir, names, &note)?;
    }
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> ResultArtifact {
        serde_json::from_value(json!({
            "errors": {"tests.TestA.test_err": "Traceback ..."},
            "failures": {"tests.TestA.test_fail": "AssertionError"},
            "successes": ["tests.TestA.test_ok"],
            "skipped": {},
            "expectedFailures": {},
            "unexpectedSuccesses": [],
            "allTests": {
                "tests.TestA.test_err": null,
                "tests.TestA.test_fail": "checks failure",
                "tests.TestA.test_ok": null,
                "tests.TestA.test_hang": null
            },
            "aborted": ["tests.TestA.test_hang"]
        }))
        .unwrap()
    }

    #[test]
    fn test_counts() {
        let a = sample();
        assert_eq!(a.passed(), 1);
        assert_eq!(a.failed(), 1);
        assert_eq!(a.errored(), 1);
        assert_eq!(a.aborted_count(), 1);
        assert_eq!(a.total(), 4);
        assert!(!a.is_complete());
    }

    #[test]
    fn test_aborted_recomputed_without_explicit_list() {
        let mut a = sample();
        a.aborted.clear();
        assert_eq!(a.aborted_ids(), vec!["tests.TestA.test_hang".to_string()]);
    }

    #[test]
    fn test_missing_fields_default() {
        let a: ResultArtifact = serde_json::from_str(r#"{"successes": ["t.T.a"]}"#).unwrap();
        assert_eq!(a.passed(), 1);
        assert_eq!(a.total(), 1);
        assert!(a.is_complete());
    }

    #[test]
    fn test_incomplete_marker_serialized_only_when_set() {
        let text = serde_json::to_string(&ResultArtifact::default()).unwrap();
        assert!(!text.contains("incomplete"));
        assert!(text.contains("allTests"));

        let text = serde_json::to_string(&ResultArtifact::incomplete("timed out")).unwrap();
        assert!(text.contains("timed out"));
    }

    #[test]
    fn test_inspect_states() {
        let dir = tempdir().unwrap();
        let names = ArtifactNames::default();

        let state = inspect(dir.path(), &names);
        assert_eq!(state.results, ResultState::Missing);
        assert!(!state.log_present);

        std::fs::write(names.results_path(dir.path()), "{not json").unwrap();
        assert!(matches!(
            read_results(dir.path(), &names),
            ResultState::Malformed(_)
        ));

        write_result_artifact(
            &names.results_path(dir.path()),
            &serde_json::from_value(json!({"successes": ["t.T.a"], "allTests": {"t.T.a": null}}))
                .unwrap(),
        )
        .unwrap();
        std::fs::write(names.log_path(dir.path()), "ok\n").unwrap();
        assert!(inspect(dir.path(), &names).is_complete());
    }

    #[test]
    fn test_seal_failure_writes_both_artifacts() {
        let dir = tempdir().unwrap();
        let names = ArtifactNames::default();

        let sealed = seal_failure(dir.path(), &names, "test run timed out", "").unwrap();
        assert!(sealed);

        let state = inspect(dir.path(), &names);
        assert!(state.log_present);
        match state.results {
            ResultState::Incomplete(a) => {
                assert_eq!(a.incomplete.unwrap().reason, "test run timed out");
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
    }

    #[test]
    fn test_seal_failure_keeps_existing_results() {
        let dir = tempdir().unwrap();
        let names = ArtifactNames::default();
        write_result_artifact(&names.results_path(dir.path()), &sample()).unwrap();

        let sealed = seal_failure(dir.path(), &names, "runner exited with code 2", "").unwrap();
        assert!(!sealed);
        assert_eq!(
            read_results(dir.path(), &names).artifact().unwrap(),
            &sample()
        );
        assert!(names.log_path(dir.path()).is_file());
    }
}
