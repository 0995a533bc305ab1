//! Gradebook analysis: result artifacts in, CSV rows out.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::artifact::{read_results, ResultArtifact, ResultState};
use crate::config::ArtifactNames;
use crate::error::Result;
use crate::submission::list_submissions;

/// One gradebook row, keyed by submission id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeRow {
    pub submission: String,
    /// Member NetIDs joined with `;`.
    pub members: String,
    /// `complete`, `incomplete`, `malformed` or `missing`.
    pub status: String,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub aborted: usize,
    pub skipped: usize,
    pub total: usize,
    /// Percentage of passing tests, two decimals.
    pub score: f64,
    pub comments: String,
}

impl GradeRow {
    fn from_state(submission: &str, members: Vec<String>, state: &ResultState) -> Self {
        let mut row = GradeRow {
            submission: submission.to_string(),
            members: members.join(";"),
            status: state.label().to_string(),
            passed: 0,
            failed: 0,
            errors: 0,
            aborted: 0,
            skipped: 0,
            total: 0,
            score: 0.0,
            comments: String::new(),
        };

        match state {
            ResultState::Complete(a) | ResultState::Incomplete(a) => {
                row.passed = a.passed();
                row.failed = a.failed();
                row.errors = a.errored();
                row.aborted = a.aborted_count();
                row.skipped = a.skipped_count();
                row.total = a.total();
                row.score = score(row.passed, row.total);
                row.comments = comments(a);
            }
            ResultState::Malformed(reason) => {
                row.comments = format!("result file unreadable: {}", reason);
            }
            ResultState::Missing => {
                row.comments = "no result file".to_string();
            }
        }
        row
    }

    /// One-line summary of the counts.
    pub fn headline(&self) -> String {
        format!(
            "Successes: {}, Failures: {}, Errors: {}, Aborted: {}, Total: {}",
            self.passed, self.failed, self.errors, self.aborted, self.total
        )
    }
}

/// Result of one analysis pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub rows: usize,
    pub complete: usize,
    /// Rows graded as incomplete, malformed or missing.
    pub incomplete: usize,
}

/// Reads result artifacts and maintains the gradebook.
pub struct Analyzer {
    names: ArtifactNames,
}

impl Analyzer {
    pub fn new(names: ArtifactNames) -> Self {
        Self { names }
    }

    /// One row per submission directory, in id order.
    ///
    /// Submissions without a usable result artifact still get a row so the
    /// gradebook never silently drops anyone.
    pub fn gather(&self, destination: &Path) -> Result<Vec<GradeRow>> {
        let mut rows = Vec::new();
        for submission in list_submissions(destination)? {
            let state = read_results(&submission.path, &self.names);
            if !state.is_usable() {
                warn!(
                    submission_id = %submission.id,
                    status = state.label(),
                    "No usable result artifact"
                );
            }
            rows.push(GradeRow::from_state(
                &submission.id,
                submission.members(),
                &state,
            ));
        }
        Ok(rows)
    }

    /// Render [`render_summary`] for every submission under `destination`.
    pub fn summarize(&self, destination: &Path) -> Result<String> {
        let rows = self.gather(destination)?;
        let artifacts = list_submissions(destination)?
            .into_iter()
            .map(|s| {
                let artifact = read_results(&s.path, &self.names).artifact().cloned();
                (s.id, artifact)
            })
            .collect::<Vec<_>>();
        Ok(render_summary(&rows, &artifacts))
    }

    /// Gather rows from `destination` and write them to `csv_path`.
    pub fn analyze(&self, destination: &Path, csv_path: &Path) -> Result<AnalysisReport> {
        let rows = self.gather(destination)?;
        write_gradebook(&rows, csv_path)?;

        let complete = rows.iter().filter(|r| r.status == "complete").count();
        let report = AnalysisReport {
            rows: rows.len(),
            complete,
            incomplete: rows.len() - complete,
        };
        info!(
            rows = report.rows,
            complete = report.complete,
            csv = %csv_path.display(),
            "Gradebook written"
        );
        Ok(report)
    }
}

/// Write the gradebook CSV, replacing `path` atomically.
pub fn write_gradebook(rows: &[GradeRow], path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file());
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a gradebook written by [`write_gradebook`].
pub fn read_gradebook(path: &Path) -> Result<Vec<GradeRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<GradeRow>, _>>()?;
    Ok(rows)
}

/// Human-readable report of every submission, failing tests included.
pub fn render_summary(rows: &[GradeRow], artifacts: &[(String, Option<ResultArtifact>)]) -> String {
    let mut out = String::new();
    for row in rows {
        let members: Vec<&str> = row.members.split(';').collect();
        if members.len() > 1 {
            out.push_str(&format!("Group of {}", members.join(" and ")));
        } else {
            out.push_str(&format!("Single person group {}", row.members));
        }
        out.push_str(&format!(
            " [{}] Failed: {}, Errors: {}, Successes: {}, Aborted: {}\n",
            row.status, row.failed, row.errors, row.passed, row.aborted
        ));

        let artifact = artifacts
            .iter()
            .find(|(id, _)| id == &row.submission)
            .and_then(|(_, a)| a.as_ref());
        if let Some(a) = artifact {
            if !a.failures.is_empty() {
                out.push_str("\nFailures:\n");
                for (id, trace) in &a.failures {
                    out.push_str(&format!(
                        "  {}: {}\n",
                        short_name(id),
                        last_line(trace)
                    ));
                }
            }
            if !a.errors.is_empty() {
                out.push_str("\nErrors:\n");
                for (id, trace) in &a.errors {
                    out.push_str(&format!("  {}\n", short_name(id)));
                    for line in trace.lines() {
                        out.push_str(&format!("    {}\n", line));
                    }
                }
            }
        } else if !row.comments.is_empty() {
            out.push_str(&format!("  {}\n", row.comments));
        }
        out.push_str(&"-".repeat(80));
        out.push('\n');
    }
    out
}

fn score(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (passed as f64 * 10_000.0 / total as f64).round() / 100.0
}

fn comments(artifact: &ResultArtifact) -> String {
    let mut parts = Vec::new();
    let join = |ids: Vec<&str>| ids.into_iter().map(short_name).collect::<Vec<_>>().join(" ");

    if !artifact.failures.is_empty() {
        parts.push(format!(
            "failed: {}",
            join(artifact.failures.keys().map(String::as_str).collect())
        ));
    }
    if !artifact.errors.is_empty() {
        parts.push(format!(
            "errors: {}",
            join(artifact.errors.keys().map(String::as_str).collect())
        ));
    }
    let aborted = artifact.aborted_ids();
    if !aborted.is_empty() {
        parts.push(format!(
            "aborted: {}",
            join(aborted.iter().map(String::as_str).collect())
        ));
    }
    if let Some(incomplete) = &artifact.incomplete {
        parts.push(format!("incomplete: {}", incomplete.reason));
    }
    parts.join("; ")
}

/// `tests.TestFoo.test_bar` -> `test_bar`.
fn short_name(id: &str) -> &str {
    id.rsplit('.').next().unwrap_or(id)
}

fn last_line(trace: &str) -> &str {
    trace
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
}
