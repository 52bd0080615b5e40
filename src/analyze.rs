use crate::error::RepoError;
use crate::hashing::{compare_content, hasher_for, ContentHasher};
use crate::keys;
use crate::path_utils::{join_components, normalize_path};
use crate::policy::{compare_metadata, MatchPolicy};
use crate::report::{
    self, DirDuplicate, FileDuplicate, ReportMeta, DUPLICATES_FILE, FILES_DIR,
};
use crate::signature::decode_bucket;
use crate::store::Store;
use crate::walker::walk_files;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One bucket member the analyzed file was checked against.
struct FileHit {
    record: FileDuplicate,
    /// Byte-level equality with the analyzed file (the record's
    /// `identical` flag additionally requires the metadata policy).
    content_match: bool,
}

/// Analyze each input against the index, producing a persistent
/// `<input>.report/` directory per input.
pub fn analyze(store: &Store, inputs: &[std::path::PathBuf], policy: MatchPolicy) -> Result<()> {
    let algorithm = store.hash_algorithm()?;
    let hasher = hasher_for(&algorithm)
        .ok_or_else(|| RepoError::Config(format!("unknown hash algorithm: {algorithm}")))?;

    for input in inputs {
        analyze_input(store, hasher.as_ref(), input, policy)?;
    }
    Ok(())
}

pub fn analyze_input(
    store: &Store,
    hasher: &dyn ContentHasher,
    input: &Path,
    policy: MatchPolicy,
) -> Result<()> {
    let input = normalize_path(input)?;
    let md = std::fs::symlink_metadata(&input)?;

    let report_dir = report::report_dir_for(&input);
    if report_dir.exists() && !report_dir.is_dir() {
        return Err(anyhow!(
            "{} exists and is not a directory",
            report_dir.display()
        ));
    }
    // A report fully describes one analysis run; stale leaves from an
    // earlier run must not survive.
    if report_dir.is_dir() {
        std::fs::remove_dir_all(&report_dir)?;
    }
    std::fs::create_dir(&report_dir)?;

    let meta = ReportMeta {
        created_ns: now_ns(),
        analyzed_path: input.display().to_string(),
        repository_root: store.root().display().to_string(),
        policy,
        is_directory: md.is_dir(),
    };

    if md.is_file() {
        let hits = analyze_file(store, hasher, &input, policy)?;
        let records: Vec<FileDuplicate> = hits.into_iter().map(|h| h.record).collect();
        report::write_file_duplicates(&report_dir.join(DUPLICATES_FILE), &records)?;
    } else if md.is_dir() {
        analyze_directory(store, hasher, &input, &report_dir, policy)?;
    } else {
        return Err(anyhow!(
            "{} is neither a regular file nor a directory",
            input.display()
        ));
    }

    report::write_meta(&report_dir, &meta)?;
    tracing::info!(input = %input.display(), report = %report_dir.display(), "analysis written");
    Ok(())
}

/// Hash one file and probe the index: every bucket of its digest is
/// classified by byte comparison against one representative, and every
/// bucket member yields a record with its metadata verdict.
fn analyze_file(
    store: &Store,
    hasher: &dyn ContentHasher,
    abs: &Path,
    policy: MatchPolicy,
) -> Result<Vec<FileHit>> {
    let input_md = std::fs::metadata(abs)?;
    let size = input_md.len();
    let (digest, _) = hasher.digest_file(abs)?;

    let mut hits = Vec::new();

    for (key, value) in store.iter_prefix(&keys::bucket_prefix(&digest))? {
        let (_, ec_id) = keys::parse_bucket_key(&key, hasher.digest_len())?;
        let members = decode_bucket(&value)?;

        // One representative settles byte equality for the whole class.
        let mut content_match = None;
        for member in &members {
            match compare_content(abs, &store.root().join(member)) {
                Ok(equal) => {
                    content_match = Some(equal);
                    break;
                }
                Err(e) => {
                    tracing::warn!(path = %member, error = %e, "unreadable class member");
                }
            }
        }
        let Some(content_match) = content_match else {
            continue;
        };

        for member in &members {
            let member_abs = store.root().join(member);
            let identical = content_match
                && std::fs::symlink_metadata(&member_abs)
                    .map(|md| policy.identical(&compare_metadata(&input_md, &md)))
                    .unwrap_or(false);

            hits.push(FileHit {
                record: FileDuplicate {
                    repository_path: member.clone(),
                    ec_id,
                    identical,
                    size,
                },
                content_match,
            });
        }
    }

    Ok(hits)
}

#[derive(Default)]
struct CandidateAgg {
    matched: BTreeSet<String>,
    size: u64,
    all_identical: bool,
}

/// Directory analysis: per-file reports mirrored under `files/`, plus
/// directory-level aggregates over candidate repository directories.
///
/// A repository directory D becomes a candidate when some analyzed file at
/// relative location r has a content match at D/r; its aggregate counts
/// the analyzed files matched that way.
fn analyze_directory(
    store: &Store,
    hasher: &dyn ContentHasher,
    input: &Path,
    report_dir: &Path,
    policy: MatchPolicy,
) -> Result<()> {
    let files_dir = report_dir.join(FILES_DIR);
    let mut candidates: BTreeMap<String, CandidateAgg> = BTreeMap::new();
    let mut total_files = 0u64;

    for file in walk_files(input, false) {
        total_files += 1;
        let rel = join_components(&file.parts);

        let hits = match analyze_file(store, hasher, &file.abs, policy) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(path = %rel, error = %e, "skipping unreadable file");
                continue;
            }
        };

        let records: Vec<FileDuplicate> = hits.iter().map(|h| h.record.clone()).collect();
        report::write_file_duplicates(&files_dir.join(&rel), &records)?;

        for hit in hits.iter().filter(|h| h.content_match) {
            let Some(dir) = strip_rel_suffix(&hit.record.repository_path, &file.parts) else {
                continue;
            };
            let agg = candidates.entry(dir).or_insert_with(|| CandidateAgg {
                matched: BTreeSet::new(),
                size: 0,
                all_identical: true,
            });
            if agg.matched.insert(rel.clone()) {
                agg.size += file.size;
            }
            agg.all_identical &= hit.record.identical;
        }
    }

    let mut records = Vec::with_capacity(candidates.len());
    for (dir, agg) in candidates {
        let matched = agg.matched.len() as u64;
        let identical = agg.all_identical
            && matched == total_files
            && candidate_file_count(store, &dir) == matched;

        records.push(DirDuplicate {
            repository_dir: dir,
            duplicated_items: matched,
            duplicated_size: agg.size,
            identical,
        });
    }
    records.sort_by(|a, b| {
        b.duplicated_size
            .cmp(&a.duplicated_size)
            .then_with(|| a.repository_dir.cmp(&b.repository_dir))
    });

    report::write_dir_duplicates(&report_dir.join(DUPLICATES_FILE), &records)
}

/// If `member` ends with the analyzed file's relative components, the
/// leading remainder is the candidate directory (`.` for the repository
/// root).
fn strip_rel_suffix(member: &str, parts: &[String]) -> Option<String> {
    let member_parts: Vec<&str> = member.split('/').collect();
    if member_parts.len() < parts.len() {
        return None;
    }
    let split = member_parts.len() - parts.len();
    if member_parts[split..]
        .iter()
        .zip(parts)
        .all(|(a, b)| *a == b.as_str())
    {
        if split == 0 {
            Some(".".to_string())
        } else {
            Some(member_parts[..split].join("/"))
        }
    } else {
        None
    }
}

/// Number of regular files under a candidate directory, used to decide
/// whether a full-coverage match is also structure-identical.
fn candidate_file_count(store: &Store, dir: &str) -> u64 {
    let (abs, at_root) = if dir == "." {
        (store.root().to_path_buf(), true)
    } else {
        (store.root().join(dir), false)
    };
    walk_files(&abs, at_root).len() as u64
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
