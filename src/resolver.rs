use crate::hashing::compare_content;
use crate::keys;
use crate::path_utils::join_components;
use crate::signature::{decode_bucket, encode_bucket, FileSignature};
use crate::store::{BatchOp, Store};
use anyhow::Result;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

/// Result of scanning the existing equivalent classes of one digest
/// against a candidate file.
pub struct ClassScan {
    /// The bucket whose representative matched the candidate byte for
    /// byte, with its surviving member list.
    pub matched: Option<(u32, Vec<String>)>,
    pub used_ids: BTreeSet<u32>,
    /// Lazy repairs: buckets rewritten without members that could no
    /// longer be read, or deleted when emptied.
    pub prune_ops: Vec<BatchOp>,
}

/// Compare the candidate against one representative of every existing
/// bucket of `digest`, in ascending ec_id order.
///
/// The representative is the first listed member whose content can still
/// be read; unreadable members are shed from the bucket as a side effect.
/// The caller must have verified the candidate itself is readable, so a
/// comparison failure is attributed to the member.
pub fn scan_classes(store: &Store, candidate_abs: &Path, digest: &[u8]) -> Result<ClassScan> {
    let mut scan = ClassScan {
        matched: None,
        used_ids: BTreeSet::new(),
        prune_ops: Vec::new(),
    };

    for (key, value) in store.iter_prefix(&keys::bucket_prefix(digest))? {
        let (_, ec_id) = keys::parse_bucket_key(&key, digest.len())?;
        scan.used_ids.insert(ec_id);

        if scan.matched.is_some() {
            continue;
        }

        let members = decode_bucket(&value)?;
        let mut survivors = Vec::with_capacity(members.len());
        let mut verdict = None;

        for member in &members {
            if verdict.is_some() {
                survivors.push(member.clone());
                continue;
            }

            let member_abs = store.root().join(member);
            match compare_content(candidate_abs, &member_abs) {
                Ok(equal) => {
                    survivors.push(member.clone());
                    verdict = Some(equal);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %member_abs.display(),
                        error = %e,
                        "dropping unreadable equivalent-class member"
                    );
                }
            }
        }

        if survivors.len() != members.len() {
            if survivors.is_empty() {
                scan.prune_ops.push(BatchOp::Delete(key.clone()));
                scan.used_ids.remove(&ec_id);
            } else {
                scan.prune_ops
                    .push(BatchOp::Put(key.clone(), encode_bucket(&survivors)?));
            }
        }

        if verdict == Some(true) {
            scan.matched = Some((ec_id, survivors));
        }
    }

    Ok(scan)
}

/// Place a freshly hashed file into its equivalent class and write its
/// completed signature, all in one atomic batch.
///
/// Returns None when the candidate can no longer be read; nothing is
/// written in that case and the caller discards its partial entry.
pub fn resolve_file(
    store: &Store,
    candidate_abs: &Path,
    parts: &[String],
    digest: &[u8],
    mtime_ns: i64,
) -> Result<Option<u32>> {
    if let Err(e) = File::open(candidate_abs) {
        tracing::warn!(path = %candidate_abs.display(), error = %e, "candidate became unreadable");
        return Ok(None);
    }

    let rel = join_components(parts);
    let scan = scan_classes(store, candidate_abs, digest)?;
    let mut ops = scan.prune_ops;

    let ec_id = match scan.matched {
        Some((ec_id, mut members)) => {
            if !members.contains(&rel) {
                members.push(rel);
                members.sort();
            }
            ops.push(BatchOp::Put(
                keys::bucket_key(digest, ec_id),
                encode_bucket(&members)?,
            ));
            ec_id
        }
        None => {
            let ec_id = smallest_unused(&scan.used_ids);
            ops.push(BatchOp::Put(
                keys::bucket_key(digest, ec_id),
                encode_bucket(&[rel])?,
            ));
            ec_id
        }
    };

    ops.push(BatchOp::Put(
        keys::signature_key(parts),
        FileSignature::new(digest.to_vec(), mtime_ns, Some(ec_id)).encode()?,
    ));

    store.batch(ops)?;
    Ok(Some(ec_id))
}

/// Mutations removing one path from its bucket, deleting the bucket when
/// it loses its last member.
pub fn detach_ops(store: &Store, parts: &[String], sig: &FileSignature) -> Result<Vec<BatchOp>> {
    let Some(ec_id) = sig.ec_id else {
        return Ok(Vec::new());
    };

    let key = keys::bucket_key(&sig.digest, ec_id);
    let Some(value) = store.get(&key)? else {
        return Ok(Vec::new());
    };

    let rel = join_components(parts);
    let mut members = decode_bucket(&value)?;
    let before = members.len();
    members.retain(|m| *m != rel);

    if members.len() == before {
        return Ok(Vec::new());
    }

    Ok(vec![if members.is_empty() {
        BatchOp::Delete(key)
    } else {
        BatchOp::Put(key, encode_bucket(&members)?)
    }])
}

pub(crate) fn smallest_unused(used: &BTreeSet<u32>) -> u32 {
    let mut id = 0u32;
    for &u in used {
        if u == id {
            id += 1;
        } else if u > id {
            break;
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_unused_fills_gaps() {
        let mut used = BTreeSet::new();
        assert_eq!(smallest_unused(&used), 0);
        used.insert(0);
        used.insert(1);
        used.insert(3);
        assert_eq!(smallest_unused(&used), 2);
        used.insert(2);
        assert_eq!(smallest_unused(&used), 4);
    }
}
