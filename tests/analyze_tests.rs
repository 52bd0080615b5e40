use rededup::analyze::analyze;
use rededup::policy::MatchPolicy;
use rededup::refresh::rebuild;
use rededup::report::{
    self, read_dir_duplicates, read_file_duplicates, read_meta, DUPLICATES_FILE, FILES_DIR,
};
use rededup::store::Store;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;
use tempfile::tempdir;

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().write_all(content).unwrap();
}

fn copy_mtime(from: &Path, to: &Path) {
    let mtime = fs::metadata(from).unwrap().modified().unwrap();
    File::options()
        .write(true)
        .open(to)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

#[test]
fn analyze_single_duplicate_file() {
    let repo_dir = tempdir().unwrap();
    write_file(&repo_dir.path().join("foo"), b"content-c");

    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let outside = tempdir().unwrap();
    let bar = outside.path().join("bar");
    write_file(&bar, b"content-c");
    copy_mtime(&repo_dir.path().join("foo"), &bar);

    analyze(&store, &[bar.clone()], MatchPolicy::default()).unwrap();

    let report_dir = report::report_dir_for(&bar);
    assert!(report_dir.is_dir());

    let meta = read_meta(&report_dir).unwrap();
    assert!(!meta.is_directory);
    assert_eq!(meta.repository_root, repo_dir.path().display().to_string());
    assert_eq!(meta.policy, MatchPolicy::default());

    let records = read_file_duplicates(&report_dir.join(DUPLICATES_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repository_path, "foo");
    assert_eq!(records[0].ec_id, 0);
    assert!(records[0].identical);
    assert_eq!(records[0].size, b"content-c".len() as u64);
}

#[test]
fn analyze_reports_content_match_with_different_mtime_as_not_identical() {
    let repo_dir = tempdir().unwrap();
    write_file(&repo_dir.path().join("foo"), b"payload");

    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let outside = tempdir().unwrap();
    let bar = outside.path().join("bar");
    write_file(&bar, b"payload");
    // Force a different mtime.
    File::options()
        .write(true)
        .open(&bar)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH)
        .unwrap();

    analyze(&store, &[bar.clone()], MatchPolicy::default()).unwrap();

    let records =
        read_file_duplicates(&report::report_dir_for(&bar).join(DUPLICATES_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].identical);

    // The mtime stops mattering when the policy drops it.
    let relaxed = MatchPolicy {
        mtime: false,
        ..MatchPolicy::default()
    };
    analyze(&store, &[bar.clone()], relaxed).unwrap();
    let records =
        read_file_duplicates(&report::report_dir_for(&bar).join(DUPLICATES_FILE)).unwrap();
    assert!(records[0].identical);
}

#[test]
fn analyze_file_with_no_match_yields_empty_report() {
    let repo_dir = tempdir().unwrap();
    write_file(&repo_dir.path().join("foo"), b"indexed");

    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let outside = tempdir().unwrap();
    let other = outside.path().join("other");
    write_file(&other, b"not indexed");

    analyze(&store, &[other.clone()], MatchPolicy::default()).unwrap();

    let records =
        read_file_duplicates(&report::report_dir_for(&other).join(DUPLICATES_FILE)).unwrap();
    assert!(records.is_empty());
}

#[test]
fn analyze_directory_aggregates_candidates() {
    let repo_dir = tempdir().unwrap();
    write_file(&repo_dir.path().join("docs/a"), b"first");
    write_file(&repo_dir.path().join("docs/b"), b"second-longer");

    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let outside = tempdir().unwrap();
    let input = outside.path().join("input");
    write_file(&input.join("a"), b"first");
    write_file(&input.join("b"), b"second-longer");
    copy_mtime(&repo_dir.path().join("docs/a"), &input.join("a"));
    copy_mtime(&repo_dir.path().join("docs/b"), &input.join("b"));

    analyze(&store, &[input.clone()], MatchPolicy::default()).unwrap();

    let report_dir = report::report_dir_for(&input);
    let meta = read_meta(&report_dir).unwrap();
    assert!(meta.is_directory);

    // The files/ mirror has one leaf per analyzed file.
    let leaf_a = read_file_duplicates(&report_dir.join(FILES_DIR).join("a")).unwrap();
    assert_eq!(leaf_a.len(), 1);
    assert_eq!(leaf_a[0].repository_path, "docs/a");
    assert!(leaf_a[0].identical);

    let records = read_dir_duplicates(&report_dir.join(DUPLICATES_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repository_dir, "docs");
    assert_eq!(records[0].duplicated_items, 2);
    assert_eq!(
        records[0].duplicated_size,
        (b"first".len() + b"second-longer".len()) as u64
    );
    assert!(records[0].identical);
}

#[test]
fn analyze_directory_partial_match_is_not_identical() {
    let repo_dir = tempdir().unwrap();
    write_file(&repo_dir.path().join("docs/a"), b"first");
    write_file(&repo_dir.path().join("docs/b"), b"second");

    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    // Only one of the two analyzed files exists in the repository.
    let outside = tempdir().unwrap();
    let input = outside.path().join("input");
    write_file(&input.join("a"), b"first");
    write_file(&input.join("c"), b"unindexed");
    copy_mtime(&repo_dir.path().join("docs/a"), &input.join("a"));

    analyze(&store, &[input.clone()], MatchPolicy::default()).unwrap();

    let records =
        read_dir_duplicates(&report::report_dir_for(&input).join(DUPLICATES_FILE)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repository_dir, "docs");
    assert_eq!(records[0].duplicated_items, 1);
    assert_eq!(records[0].duplicated_size, b"first".len() as u64);
    assert!(!records[0].identical);
}

#[test]
fn analyze_refuses_report_path_held_by_a_file() {
    let repo_dir = tempdir().unwrap();
    let store = Store::open(repo_dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let outside = tempdir().unwrap();
    let input = outside.path().join("victim");
    write_file(&input, b"data");
    write_file(&outside.path().join("victim.report"), b"occupied");

    assert!(analyze(&store, &[input], MatchPolicy::default()).is_err());
}
