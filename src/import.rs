use crate::error::RepoError;
use crate::hashing::hasher_for;
use crate::keys;
use crate::path_utils::{normalize_path, rel_components, split_rel};
use crate::resolver::{scan_classes, smallest_unused};
use crate::signature::{decode_bucket, encode_bucket, FileSignature};
use crate::store::{BatchOp, Store, INDEX_DIR};
use anyhow::Result;
use std::fs::File;
use std::path::Path;

enum Shift {
    /// Source is nested under the current repository: prepend.
    Prepend(Vec<String>),
    /// Source is an ancestor of the current repository: filter and strip.
    Strip(Vec<String>),
}

impl Shift {
    fn apply(&self, rel: &str) -> Option<String> {
        let parts = split_rel(rel);
        match self {
            Shift::Prepend(prefix) => {
                let mut out = prefix.clone();
                out.extend(parts);
                Some(out.join("/"))
            }
            Shift::Strip(prefix) => {
                if parts.len() > prefix.len() && parts[..prefix.len()] == prefix[..] {
                    Some(parts[prefix.len()..].join("/"))
                } else {
                    None
                }
            }
        }
    }
}

/// Copy index entries from another repository into this one, rewriting
/// paths per the prefix-shift rules. Each source bucket is applied as one
/// atomic batch, so an interrupted import leaves the index consistent.
pub fn import(store: &Store, source: &Path) -> Result<()> {
    let source_root = normalize_path(source)?;
    let current_root = normalize_path(store.root())?;

    if source_root == current_root {
        return Err(
            RepoError::Config("source repository is the same as the current one".into()).into(),
        );
    }
    if source_root.starts_with(current_root.join(INDEX_DIR)) {
        return Err(RepoError::Config(format!(
            "source repository cannot live inside {INDEX_DIR}"
        ))
        .into());
    }

    let shift = if source_root.starts_with(&current_root) {
        Shift::Prepend(rel_components(&current_root, &source_root)?)
    } else if current_root.starts_with(&source_root) {
        Shift::Strip(rel_components(&source_root, &current_root)?)
    } else {
        return Err(RepoError::Config(
            "source repository must be nested under, or an ancestor of, the current repository"
                .into(),
        )
        .into());
    };

    let source_store = Store::open(&source_root, false)?;
    source_store.check_not_truncating()?;

    let current_algorithm = store.hash_algorithm()?;
    let source_algorithm = source_store.hash_algorithm()?;
    if current_algorithm != source_algorithm {
        return Err(RepoError::Config(format!(
            "hash algorithm mismatch: source uses {source_algorithm}, current uses {current_algorithm}"
        ))
        .into());
    }
    let digest_len = hasher_for(&current_algorithm)
        .ok_or_else(|| RepoError::Config(format!("unknown hash algorithm: {current_algorithm}")))?
        .digest_len();

    let mut imported = 0u64;

    for (key, value) in source_store.iter_prefix(keys::BUCKET_PREFIX)? {
        let (digest, source_ec) = keys::parse_bucket_key(&key, digest_len)?;
        let members = decode_bucket(&value)?;

        // (source rel, target rel) pairs surviving the shift and not
        // already registered here.
        let mut pairs = Vec::new();
        for member in &members {
            let Some(target) = shift.apply(member) else {
                continue;
            };
            if store.signature(&split_rel(&target))?.is_some() {
                tracing::debug!(path = %target, "already indexed; skipping");
                continue;
            }
            pairs.push((member.clone(), target));
        }
        if pairs.is_empty() {
            continue;
        }

        // Representative for byte comparison against existing classes.
        let Some(candidate_abs) = pairs
            .iter()
            .map(|(src, _)| source_root.join(src))
            .find(|p| File::open(p).is_ok())
        else {
            tracing::warn!(
                digest = %hex::encode(&digest),
                ec_id = source_ec,
                "no readable member in source class; skipping"
            );
            continue;
        };

        // A member only enters the target bucket together with its
        // signature, keeping the bucket/signature bijection intact.
        let mut signed = Vec::new();
        for (src, target) in &pairs {
            match source_store.signature(&split_rel(src))? {
                Some(sig) => signed.push((sig, target.clone())),
                None => {
                    tracing::warn!(path = %src, "source class member has no signature; skipping")
                }
            }
        }
        if signed.is_empty() {
            continue;
        }

        let scan = scan_classes(store, &candidate_abs, &digest)?;
        let mut ops = scan.prune_ops;

        let (ec_id, mut bucket_members) = match scan.matched {
            Some((id, members)) => (id, members),
            None => (smallest_unused(&scan.used_ids), Vec::new()),
        };

        for (sig, target) in &signed {
            if !bucket_members.contains(target) {
                bucket_members.push(target.clone());
            }
            ops.push(BatchOp::Put(
                keys::signature_key(&split_rel(target)),
                FileSignature::new(sig.digest.clone(), sig.mtime_ns, Some(ec_id)).encode()?,
            ));
            imported += 1;
        }
        bucket_members.sort();
        ops.push(BatchOp::Put(
            keys::bucket_key(&digest, ec_id),
            encode_bucket(&bucket_members)?,
        ));

        store.batch(ops)?;
    }

    tracing::info!(imported, source = %source_root.display(), "import complete");
    Ok(())
}
