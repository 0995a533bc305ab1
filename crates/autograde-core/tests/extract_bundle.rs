//! End-to-end extraction of CMS submission bundles.

use std::io::{Cursor, Write};
use std::path::Path;

use autograde_core::{list_submissions, ArtifactNames, ExtractConfig, Extractor, GradeError};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// G1.zip holds one nested archive, G2.zip holds an archive inside an archive.
fn write_two_group_bundle(path: &Path) {
    let g1 = zip_bytes(&[(
        "hw1.zip",
        zip_bytes(&[("solution.py", b"def add(a, b):\n    return a + b\n".to_vec())]),
    )]);
    let g2_inner = zip_bytes(&[("solution.py", b"def add(a, b):\n    return a - b\n".to_vec())]);
    let g2 = zip_bytes(&[
        ("outer.zip", zip_bytes(&[("inner.zip", g2_inner)])),
        ("README.txt", b"notes".to_vec()),
    ]);
    let bundle = zip_bytes(&[("Submissions/G1.zip", g1), ("Submissions/G2.zip", g2)]);
    std::fs::write(path, bundle).unwrap();
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_two_groups_yield_two_flat_directories() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    write_two_group_bundle(&bundle);
    let out = dir.path().join("out");

    let extractor = Extractor::new(ExtractConfig::default(), &ArtifactNames::default()).unwrap();
    let report = extractor.extract_bundle(&bundle, &out, false).unwrap();

    assert_eq!(report.extracted, vec!["G1", "G2"]);
    assert!(report.failed.is_empty());
    assert!(report.empty.is_empty());

    let ids: Vec<String> = list_submissions(&out)
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec!["G1", "G2"]);

    assert_eq!(file_names(&out.join("G1")), vec!["solution.py"]);
    assert_eq!(file_names(&out.join("G2")), vec!["README.txt", "solution.py"]);
    assert!(std::fs::read_to_string(out.join("G2/solution.py"))
        .unwrap()
        .contains("a - b"));
}

#[test]
fn test_patterns_drop_unmatched_and_empty_submissions() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    let bundle_bytes = zip_bytes(&[
        ("Submissions/group_of_ab1_cd2/hw.py", b"x = 1".to_vec()),
        ("Submissions/group_of_ab1_cd2/hw.pyc", b"junk".to_vec()),
        ("Submissions/ef3/report.pdf", b"%PDF".to_vec()),
    ]);
    std::fs::write(&bundle, bundle_bytes).unwrap();
    let out = dir.path().join("out");

    let extractor = Extractor::new(
        ExtractConfig {
            file_patterns: vec!["*.py".to_string()],
            ..Default::default()
        },
        &ArtifactNames::default(),
    )
    .unwrap();
    let report = extractor.extract_bundle(&bundle, &out, false).unwrap();

    assert_eq!(report.extracted, vec!["group_of_ab1_cd2"]);
    assert_eq!(report.empty, vec!["ef3"]);
    assert!(!out.join("ef3").exists());
    assert_eq!(file_names(&out.join("group_of_ab1_cd2")), vec!["hw.py"]);
}

#[test]
fn test_bundle_without_cms_folder_uses_root() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("bundle.zip");
    let bundle_bytes = zip_bytes(&[(
        "G1.zip",
        zip_bytes(&[("main.py", b"print(1)".to_vec())]),
    )]);
    std::fs::write(&bundle, bundle_bytes).unwrap();
    let out = dir.path().join("out");

    let report = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&bundle, &out, false)
        .unwrap();
    assert_eq!(report.extracted, vec!["G1"]);
    assert!(out.join("G1/main.py").is_file());
}

#[test]
fn test_corrupt_nested_archive_skips_only_that_submission() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    let good = zip_bytes(&[("a.py", b"ok".to_vec())]);
    let bundle_bytes = zip_bytes(&[
        ("Submissions/G1.zip", good),
        ("Submissions/G2/code.zip", b"this is not a zip file".to_vec()),
    ]);
    std::fs::write(&bundle, bundle_bytes).unwrap();
    let out = dir.path().join("out");

    let report = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&bundle, &out, false)
        .unwrap();

    assert_eq!(report.extracted, vec!["G1"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "G2");
    assert!(!out.join("G2").exists());
}

#[test]
fn test_corrupt_bundle_fails_batch() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    std::fs::write(&bundle, b"garbage").unwrap();

    let err = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&bundle, &dir.path().join("out"), false)
        .unwrap_err();
    assert!(matches!(err, GradeError::Archive { .. }));
}

#[test]
fn test_missing_bundle() {
    let dir = tempdir().unwrap();
    let err = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&dir.path().join("none.zip"), dir.path(), false)
        .unwrap_err();
    assert!(matches!(err, GradeError::BundleNotFound(_)));
}

#[test]
fn test_existing_directory_left_alone_unless_overwrite() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    write_two_group_bundle(&bundle);
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("G1")).unwrap();
    std::fs::write(out.join("G1/results.json"), "{}").unwrap();

    let extractor = Extractor::new(ExtractConfig::default(), &ArtifactNames::default()).unwrap();
    let report = extractor.extract_bundle(&bundle, &out, false).unwrap();
    assert_eq!(report.existing, vec!["G1"]);
    assert_eq!(report.extracted, vec!["G2"]);
    assert_eq!(file_names(&out.join("G1")), vec!["results.json"]);

    let report = extractor.extract_bundle(&bundle, &out, true).unwrap();
    assert_eq!(report.extracted, vec!["G1", "G2"]);
    assert_eq!(file_names(&out.join("G1")), vec!["solution.py"]);
}

#[test]
fn test_student_supplied_artifacts_are_not_placed() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    let g1 = zip_bytes(&[
        ("solution.py", b"def add(a, b):\n    return a - b\n".to_vec()),
        (
            "results.json",
            br#"{"successes":["tests.TestAdd.test_add"],"allTests":{"tests.TestAdd.test_add":null}}"#.to_vec(),
        ),
        ("nested/log.txt", b"all good".to_vec()),
    ]);
    std::fs::write(&bundle, zip_bytes(&[("Submissions/G1.zip", g1)])).unwrap();
    let out = dir.path().join("out");

    let report = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&bundle, &out, false)
        .unwrap();

    assert_eq!(report.extracted, vec!["G1"]);
    assert_eq!(report.dropped, vec!["G1/log.txt", "G1/results.json"]);
    assert_eq!(file_names(&out.join("G1")), vec!["solution.py"]);
}

#[test]
fn test_submission_of_only_artifacts_is_empty() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("submissions.zip");
    std::fs::write(
        &bundle,
        zip_bytes(&[("Submissions/G1/results.json", b"{}".to_vec())]),
    )
    .unwrap();
    let out = dir.path().join("out");

    let report = Extractor::new(ExtractConfig::default(), &ArtifactNames::default())
        .unwrap()
        .extract_bundle(&bundle, &out, false)
        .unwrap();

    assert_eq!(report.empty, vec!["G1"]);
    assert_eq!(report.dropped, vec!["G1/results.json"]);
    assert!(!out.join("G1").exists());
}
