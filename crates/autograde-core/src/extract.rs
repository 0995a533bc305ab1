//! Submission bundle extraction.
//!
//! A CMS export is a zip whose `Submissions/` folder holds one entry per
//! student or group, either a directory or a `.zip`. Each submission may
//! itself contain archives, possibly nested several levels deep. The
//! extractor expands all of them and collapses the files that match the
//! configured patterns into `<destination>/<id>/`.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::{ArtifactNames, ExtractConfig};
use crate::error::{GradeError, Result};
use crate::obs::SubmissionSpan;

/// A submission that could not be extracted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of extracting one bundle. All lists are sorted by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractionReport {
    /// Newly created submission directories.
    pub extracted: Vec<String>,
    /// Submissions whose directory already existed and was left untouched.
    pub existing: Vec<String>,
    /// Submissions with no file matching the patterns.
    pub empty: Vec<String>,
    /// Submissions skipped because an archive inside them was unusable.
    pub failed: Vec<ExtractionFailure>,
    /// Files refused because they carry a result or log artifact name,
    /// as `<id>/<file name>`.
    pub dropped: Vec<String>,
}

impl ExtractionReport {
    /// Submissions present in the destination after extraction.
    pub fn available(&self) -> usize {
        self.extracted.len() + self.existing.len()
    }
}

enum Placement {
    Extracted,
    Existing,
    Empty,
}

/// Files selected from one submission tree.
#[derive(Debug, Default)]
pub struct Collected {
    /// Pattern matches to copy, in sorted walk order.
    pub files: Vec<PathBuf>,
    /// Matches named like a grading artifact; never copied.
    pub reserved: Vec<PathBuf>,
}

/// Unpacks CMS submission bundles.
pub struct Extractor {
    config: ExtractConfig,
    patterns: Vec<Pattern>,
    reserved: BTreeSet<String>,
}

impl Extractor {
    /// Compile the configured file patterns.
    ///
    /// Files named like one of `artifacts` are never placed in a
    /// submission directory: only grading may produce them.
    pub fn new(config: ExtractConfig, artifacts: &ArtifactNames) -> Result<Self> {
        let patterns = config
            .file_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| GradeError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let reserved = [&artifacts.results_file, &artifacts.log_file]
            .into_iter()
            .cloned()
            .collect();
        Ok(Self {
            config,
            patterns,
            reserved,
        })
    }

    /// Extract `bundle` into `destination`, one directory per submission.
    ///
    /// An unreadable bundle fails the whole batch. An unreadable archive
    /// inside one submission only skips that submission.
    pub fn extract_bundle(
        &self,
        bundle: &Path,
        destination: &Path,
        overwrite: bool,
    ) -> Result<ExtractionReport> {
        if !bundle.is_file() {
            return Err(GradeError::BundleNotFound(bundle.to_path_buf()));
        }

        let staging = tempfile::tempdir()?;
        unpack_zip(bundle, staging.path(), self.config.max_uncompressed_bytes)?;

        let cms_root = staging.path().join(&self.config.submissions_dir_name);
        let root = if cms_root.is_dir() {
            cms_root
        } else {
            staging.path().to_path_buf()
        };

        std::fs::create_dir_all(destination)?;
        let mut report = ExtractionReport::default();
        let mut failed_ids = BTreeSet::new();

        // Top-level submission archives become directories named by their stem.
        for path in sorted_children(&root)? {
            if !path.is_file() {
                continue;
            }
            if !is_zip(&path) {
                debug!(path = %path.display(), "Ignoring stray file in bundle");
                continue;
            }
            let Some(id) = file_stem(&path) else {
                continue;
            };
            let target = root.join(&id);
            std::fs::create_dir_all(&target)?;
            if let Err(e) = unpack_zip(&path, &target, self.config.max_uncompressed_bytes) {
                warn!(submission_id = %id, error = %e, "Submission archive unreadable");
                report.failed.push(ExtractionFailure {
                    id: id.clone(),
                    reason: e.to_string(),
                });
                failed_ids.insert(id);
            }
            std::fs::remove_file(&path)?;
        }

        for path in sorted_children(&root)? {
            if !path.is_dir() {
                continue;
            }
            let Some(id) = file_name(&path) else {
                continue;
            };
            if id.starts_with('.') || failed_ids.contains(&id) {
                continue;
            }

            let _span = SubmissionSpan::enter(&id);
            match self.place_submission(&id, &path, destination, overwrite, &mut report.dropped) {
                Ok(Placement::Extracted) => report.extracted.push(id),
                Ok(Placement::Existing) => report.existing.push(id),
                Ok(Placement::Empty) => {
                    debug!(submission_id = %id, "No matching files in submission");
                    report.empty.push(id);
                }
                Err(e) => {
                    warn!(submission_id = %id, error = %e, "Failed to extract submission");
                    report.failed.push(ExtractionFailure {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.failed.sort_by(|a, b| a.id.cmp(&b.id));
        info!(
            extracted = report.extracted.len(),
            existing = report.existing.len(),
            empty = report.empty.len(),
            failed = report.failed.len(),
            dropped = report.dropped.len(),
            "Bundle extracted"
        );
        Ok(report)
    }

    fn place_submission(
        &self,
        id: &str,
        work_dir: &Path,
        destination: &Path,
        overwrite: bool,
        dropped: &mut Vec<String>,
    ) -> Result<Placement> {
        self.expand_nested(work_dir)?;

        let Collected { files, reserved } = self.collect_files(work_dir)?;
        for path in &reserved {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            warn!(submission_id = %id, file = %name, "Dropping file named like a grading artifact");
            dropped.push(format!("{}/{}", id, name));
        }
        if files.is_empty() {
            return Ok(Placement::Empty);
        }

        let target = destination.join(id);
        if target.exists() {
            if !overwrite {
                return Ok(Placement::Existing);
            }
            std::fs::remove_dir_all(&target)?;
        }

        // Assemble next to the target, then rename, so a crash never leaves
        // a half-populated submission directory behind.
        let assembling = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(destination)?;
        for file in &files {
            if let Some(name) = file.file_name() {
                std::fs::copy(file, assembling.path().join(name))?;
            }
        }
        std::fs::rename(assembling.path(), &target)?;
        Ok(Placement::Extracted)
    }

    /// Expand archives under `root` until none remain.
    ///
    /// Each `name.zip` is unpacked into a sibling `name/` and then removed.
    pub fn expand_nested(&self, root: &Path) -> Result<()> {
        for round in 0.. {
            let archives = find_archives(root)?;
            if archives.is_empty() {
                return Ok(());
            }
            if round >= self.config.max_depth {
                return Err(GradeError::NestingTooDeep {
                    root: root.to_path_buf(),
                    max_depth: self.config.max_depth,
                });
            }
            for archive in archives {
                let target = archive.with_extension("");
                std::fs::create_dir_all(&target)?;
                unpack_zip(&archive, &target, self.config.max_uncompressed_bytes)?;
                std::fs::remove_file(&archive)?;
            }
        }
        Ok(())
    }

    /// Files under `root` whose name matches a pattern, in sorted walk order.
    pub fn collect_files(&self, root: &Path) -> Result<Collected> {
        let mut collected = Collected::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.patterns.iter().any(|p| p.matches(&name)) {
                continue;
            }
            if self.reserved.contains(&name) {
                collected.reserved.push(entry.into_path());
            } else {
                collected.files.push(entry.into_path());
            }
        }
        Ok(collected)
    }
}

/// Unpack `archive` into `target`, refusing entries that escape it and
/// stopping once more than `limit` bytes have been written.
pub fn unpack_zip(archive: &Path, target: &Path, limit: u64) -> Result<()> {
    let archive_err = |source| GradeError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(archive_err)?;
    let mut total: u64 = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(archive_err)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| GradeError::UnsafeArchivePath {
                archive: archive.to_path_buf(),
                entry: entry.name().to_string(),
            })?;
        let out_path = target.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let remaining = limit.saturating_sub(total);
        let mut out = File::create(&out_path)?;
        let written = std::io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)?;
        total += written;
        if total > limit {
            return Err(GradeError::ArchiveTooLarge {
                archive: archive.to_path_buf(),
                limit,
            });
        }
    }
    Ok(())
}

fn find_archives(root: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_zip(entry.path()) {
            archives.push(entry.into_path());
        }
    }
    Ok(archives)
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|n| n.to_string_lossy().into_owned())
}
