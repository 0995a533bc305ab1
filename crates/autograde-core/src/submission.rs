//! Submission directories in the destination tree.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GradeError, Result};

/// Prefix the CMS gives directories of multi-person groups.
pub const GROUP_PREFIX: &str = "group_of_";

/// One student's or group's extracted submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubmissionDir {
    /// Directory name, used as the submission identifier.
    pub id: String,

    /// Full path of the directory.
    pub path: PathBuf,
}

impl SubmissionDir {
    /// NetIDs of the group members encoded in the identifier.
    pub fn members(&self) -> Vec<String> {
        group_members(&self.id)
    }
}

/// List every submission directory directly under `destination`.
///
/// Sorted lexicographically by id so that grading order and log order are
/// reproducible. Plain files and dot-entries are not submissions.
pub fn list_submissions(destination: &Path) -> Result<Vec<SubmissionDir>> {
    if !destination.is_dir() {
        return Err(GradeError::MissingDirectory(destination.to_path_buf()));
    }

    let mut submissions = Vec::new();
    for entry in std::fs::read_dir(destination)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        if id.starts_with('.') {
            continue;
        }
        submissions.push(SubmissionDir {
            id,
            path: entry.path(),
        });
    }
    submissions.sort();
    Ok(submissions)
}

/// Split a CMS directory name into the NetIDs of its members.
///
/// `group_of_ab1_cd2` names a two-person group; anything else is a single
/// person whose NetID is the directory name itself.
pub fn group_members(id: &str) -> Vec<String> {
    match id.strip_prefix(GROUP_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.split('_').map(str::to_string).collect(),
        _ => vec![id.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_list_submissions_sorted_and_dirs_only() {
        let dir = tempdir().unwrap();
        for name in ["zz9", "G2", "G1", "ab12"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("grading-report.json"), "{}").unwrap();

        let ids: Vec<String> = list_submissions(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["G1", "G2", "ab12", "zz9"]);
    }

    #[test]
    fn test_list_submissions_missing_destination() {
        let dir = tempdir().unwrap();
        let err = list_submissions(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, GradeError::MissingDirectory(_)));
    }

    #[test]
    fn test_group_members() {
        assert_eq!(group_members("group_of_ab1_cd2"), vec!["ab1", "cd2"]);
        assert_eq!(group_members("ab1"), vec!["ab1"]);
        assert_eq!(group_members("group_of_"), vec!["group_of_"]);
    }
}
