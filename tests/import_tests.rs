use rededup::error;
use rededup::import::import;
use rededup::keys;
use rededup::refresh::rebuild;
use rededup::signature::decode_bucket;
use rededup::store::Store;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn parts(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(path).unwrap().write_all(content).unwrap();
}

fn sha256(content: &[u8]) -> Vec<u8> {
    Sha256::digest(content).to_vec()
}

#[test]
fn import_from_nested_repository_prepends_prefix() {
    let dir = tempdir().unwrap();
    let parent_root = dir.path();

    // The parent indexes its own file first; the nested repository and its
    // content appear afterwards, so only import can bring them in.
    write_file(&parent_root.join("dup"), b"shared");
    let parent = Store::open(parent_root, true).unwrap();
    rebuild(&parent, 1).unwrap();

    let child_root = parent_root.join("sub");
    write_file(&child_root.join("file"), b"shared");
    {
        let child = Store::open(&child_root, true).unwrap();
        rebuild(&child, 1).unwrap();
    }

    import(&parent, &child_root).unwrap();

    let digest = sha256(b"shared");
    let sig = parent.signature(&parts(&["sub", "file"])).unwrap().unwrap();
    assert_eq!(sig.digest, digest);
    assert_eq!(sig.ec_id, Some(0));

    // Byte-identical content merges into the existing class.
    let bucket = parent.get(&keys::bucket_key(&digest, 0)).unwrap().unwrap();
    assert_eq!(decode_bucket(&bucket).unwrap(), parts(&["dup", "sub/file"]));
}

#[test]
fn import_from_ancestor_strips_prefix_and_filters() {
    let dir = tempdir().unwrap();
    let parent_root = dir.path();

    write_file(&parent_root.join("outside"), b"aaa");
    write_file(&parent_root.join("sub/inside"), b"bbb");

    let parent = Store::open(parent_root, true).unwrap();
    rebuild(&parent, 1).unwrap();
    drop(parent);

    let child_root = parent_root.join("sub");
    let child = Store::open(&child_root, true).unwrap();
    rebuild(&child, 1).unwrap();
    // Start from an index that only knows the ancestor's entries.
    // Remove the child's own record so the imported one is observable.
    for (key, _) in child.iter_prefix(keys::SIGNATURE_PREFIX).unwrap() {
        child.delete(key).unwrap();
    }
    for (key, _) in child.iter_prefix(keys::BUCKET_PREFIX).unwrap() {
        child.delete(key).unwrap();
    }

    import(&child, parent_root).unwrap();

    // `sub/inside` arrives with the prefix stripped; `outside` is out of
    // scope and filtered.
    let sig = child.signature(&parts(&["inside"])).unwrap().unwrap();
    assert_eq!(sig.digest, sha256(b"bbb"));
    assert_eq!(sig.ec_id, Some(0));
    assert!(child.signature(&parts(&["outside"])).unwrap().is_none());

    let bucket = child
        .get(&keys::bucket_key(&sha256(b"bbb"), 0))
        .unwrap()
        .unwrap();
    assert_eq!(decode_bucket(&bucket).unwrap(), parts(&["inside"]));
}

#[test]
fn import_rejects_unrelated_repository() {
    let dir = tempdir().unwrap();
    let a_root = dir.path().join("a");
    let b_root = dir.path().join("b");
    fs::create_dir_all(&a_root).unwrap();
    fs::create_dir_all(&b_root).unwrap();

    let a = Store::open(&a_root, true).unwrap();
    rebuild(&a, 1).unwrap();
    {
        let b = Store::open(&b_root, true).unwrap();
        rebuild(&b, 1).unwrap();
    }

    let err = import(&a, &b_root).unwrap_err();
    assert_eq!(error::exit_code(&err), 2);
}

#[test]
fn import_rejects_self() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path(), true).unwrap();
    rebuild(&store, 1).unwrap();

    let err = import(&store, dir.path()).unwrap_err();
    assert_eq!(error::exit_code(&err), 2);
}

#[test]
fn import_creates_classes_for_new_digests() {
    let dir = tempdir().unwrap();
    let parent_root = dir.path();

    write_file(&parent_root.join("keep"), b"same-bytes");
    let parent = Store::open(parent_root, true).unwrap();
    rebuild(&parent, 1).unwrap();

    // The child has a byte-identical copy plus an unrelated file.
    let child_root = parent_root.join("sub");
    write_file(&child_root.join("copy"), b"same-bytes");
    write_file(&child_root.join("new"), b"different");
    {
        let child = Store::open(&child_root, true).unwrap();
        rebuild(&child, 1).unwrap();
    }

    import(&parent, &child_root).unwrap();

    let same = sha256(b"same-bytes");
    let bucket = parent.get(&keys::bucket_key(&same, 0)).unwrap().unwrap();
    assert_eq!(
        decode_bucket(&bucket).unwrap(),
        parts(&["keep", "sub/copy"])
    );

    let other = sha256(b"different");
    let bucket = parent.get(&keys::bucket_key(&other, 0)).unwrap().unwrap();
    assert_eq!(decode_bucket(&bucket).unwrap(), parts(&["sub/new"]));
}
