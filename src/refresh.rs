use crate::error::RepoError;
use crate::hashing::{hasher_for, ContentHasher, Sha256Hasher, DEFAULT_ALGORITHM};
use crate::keys::{self, CONFIG_HASH_ALGORITHM, CONFIG_TRUNCATING, TRUNCATING_VALUE};
use crate::resolver::{detach_ops, resolve_file};
use crate::signature::FileSignature;
use crate::store::{BatchOp, Store};
use crate::walker::{mtime_ns, walk_files};
use anyhow::{anyhow, Result};
use crossbeam_channel as chan;
use std::path::PathBuf;
use std::thread;

#[derive(Debug)]
struct HashJob {
    abs: PathBuf,
    parts: Vec<String>,
}

#[derive(Debug)]
enum HashOutcome {
    Hashed {
        abs: PathBuf,
        parts: Vec<String>,
        mtime_ns: i64,
        digest: Vec<u8>,
    },
    Failed {
        parts: Vec<String>,
        error: String,
    },
}

/// Rebuild the index from scratch via the truncation protocol.
///
/// The `truncating` marker stays set for the whole destructive window;
/// a crash leaves it behind and every other command refuses to run until
/// the next rebuild.
pub fn rebuild(store: &Store, threads: usize) -> Result<()> {
    store.write_config(CONFIG_TRUNCATING, Some(TRUNCATING_VALUE))?;

    let keep_algorithm = keys::config_key(CONFIG_HASH_ALGORITHM);
    let keep_marker = keys::config_key(CONFIG_TRUNCATING);
    let mut ops = Vec::new();
    for (key, _) in store.iter_prefix(b"")? {
        if key == keep_algorithm || key == keep_marker {
            continue;
        }
        ops.push(BatchOp::Delete(key));
    }
    store.batch(ops)?;

    store.write_config(CONFIG_HASH_ALGORITHM, Some(DEFAULT_ALGORITHM))?;
    refresh_with_hasher(store, &Sha256Hasher, threads)?;
    store.write_config(CONFIG_TRUNCATING, None)?;

    tracing::info!("rebuild complete");
    Ok(())
}

/// Incrementally reconcile the index with the filesystem.
pub fn refresh(store: &Store, threads: usize) -> Result<()> {
    let algorithm = store.hash_algorithm()?;
    let hasher = hasher_for(&algorithm)
        .ok_or_else(|| RepoError::Config(format!("unknown hash algorithm: {algorithm}")))?;
    refresh_with_hasher(store, hasher.as_ref(), threads)
}

/// The refresh pipeline: discover, prune, then hash in parallel while a
/// single writer applies all store mutations in arrival order.
pub fn refresh_with_hasher(store: &Store, hasher: &dyn ContentHasher, threads: usize) -> Result<()> {
    let jobs = discover(store)?;
    let pruned = prune_missing(store)?;

    tracing::debug!(queued = jobs.len(), pruned, "discovery finished");

    if jobs.is_empty() {
        tracing::info!(indexed = 0, "refresh complete");
        return Ok(());
    }

    let threads = threads.max(1);
    let (job_tx, job_rx) = chan::unbounded::<HashJob>();
    let (res_tx, res_rx) = chan::bounded::<HashOutcome>(threads * 256);

    for job in jobs {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let mut indexed: u64 = 0;
    thread::scope(|s| -> Result<()> {
        // Owned by the writer; dropping it on an early error closes the
        // channel so blocked workers can exit before the scope joins them.
        let res_rx = res_rx;
        for _ in 0..threads {
            let rx = job_rx.clone();
            let tx = res_tx.clone();
            s.spawn(move || worker_loop(rx, tx, hasher));
        }
        drop(res_tx);
        drop(job_rx);

        // Writer: the only agent mutating the store.
        while let Ok(outcome) = res_rx.recv() {
            match outcome {
                HashOutcome::Failed { parts, error } => {
                    tracing::warn!(path = %parts.join("/"), error = %error, "hashing failed");
                    if store.signature(&parts)?.is_some() {
                        store.delete(keys::signature_key(&parts))?;
                    }
                }
                HashOutcome::Hashed {
                    abs,
                    parts,
                    mtime_ns,
                    digest,
                } => {
                    if commit_hashed(store, hasher, &abs, &parts, mtime_ns, digest)? {
                        indexed += 1;
                    }
                }
            }
        }
        Ok(())
    })?;

    tracing::info!(indexed, "refresh complete");
    Ok(())
}

/// Phase 1: walk the repository and queue files whose stored signature is
/// absent or stale. A stale entry is detached from its bucket and left
/// with its ec_id cleared until phase 2 completes it.
fn discover(store: &Store) -> Result<Vec<HashJob>> {
    let mut jobs = Vec::new();

    for file in walk_files(store.root(), true) {
        match store.signature(&file.parts)? {
            Some(sig) if sig.mtime_ns == file.mtime_ns && sig.ec_id.is_some() => {}
            Some(sig) => {
                let mut ops = detach_ops(store, &file.parts, &sig)?;
                ops.push(BatchOp::Put(
                    keys::signature_key(&file.parts),
                    FileSignature::new(sig.digest, sig.mtime_ns, None).encode()?,
                ));
                store.batch(ops)?;
                jobs.push(HashJob {
                    abs: file.abs,
                    parts: file.parts,
                });
            }
            None => {
                jobs.push(HashJob {
                    abs: file.abs,
                    parts: file.parts,
                });
            }
        }
    }

    Ok(jobs)
}

/// Remove signatures whose file is gone, shrinking their buckets.
fn prune_missing(store: &Store) -> Result<u64> {
    let mut pruned = 0u64;

    for (key, value) in store.iter_prefix(keys::SIGNATURE_PREFIX)? {
        let body = &key[keys::SIGNATURE_PREFIX.len()..];
        let parts = keys::decode_path(body).map_err(|e| RepoError::Corrupt {
            key: String::from_utf8_lossy(&key).into_owned(),
            reason: e.to_string(),
        })?;

        let abs = store.root().join(parts.join("/"));
        let alive = std::fs::symlink_metadata(&abs)
            .map(|md| md.is_file())
            .unwrap_or(false);
        if alive {
            continue;
        }

        let sig = FileSignature::decode(&value).map_err(|e| RepoError::Corrupt {
            key: String::from_utf8_lossy(&key).into_owned(),
            reason: e.to_string(),
        })?;

        let mut ops = detach_ops(store, &parts, &sig)?;
        ops.push(BatchOp::Delete(key));
        store.batch(ops)?;
        pruned += 1;
    }

    Ok(pruned)
}

fn worker_loop(rx: chan::Receiver<HashJob>, tx: chan::Sender<HashOutcome>, hasher: &dyn ContentHasher) {
    while let Ok(job) = rx.recv() {
        let outcome = hash_job(&job, hasher).unwrap_or_else(|e| HashOutcome::Failed {
            parts: job.parts.clone(),
            error: e.to_string(),
        });

        if tx.send(outcome).is_err() {
            break;
        }
    }
}

fn hash_job(job: &HashJob, hasher: &dyn ContentHasher) -> Result<HashOutcome> {
    // mtime is read immediately before opening, so a write racing the
    // hash produces a signature the next refresh recognizes as stale.
    let md = std::fs::symlink_metadata(&job.abs)?;
    if !md.is_file() {
        return Err(anyhow!("not a regular file"));
    }
    let mtime = mtime_ns(&md);

    let (digest, _) = hasher.digest_file(&job.abs)?;
    Ok(HashOutcome::Hashed {
        abs: job.abs.clone(),
        parts: job.parts.clone(),
        mtime_ns: mtime,
        digest,
    })
}

/// Writer-side completion of one hashed file, with one bounded retry when
/// the file keeps changing underneath us.
fn commit_hashed(
    store: &Store,
    hasher: &dyn ContentHasher,
    abs: &PathBuf,
    parts: &[String],
    mtime_at_hash: i64,
    digest: Vec<u8>,
) -> Result<bool> {
    let current = match std::fs::symlink_metadata(abs) {
        Ok(md) if md.is_file() => mtime_ns(&md),
        _ => {
            // Disappeared between hashing and resolution.
            if store.signature(parts)?.is_some() {
                store.delete(keys::signature_key(parts))?;
            }
            return Ok(false);
        }
    };

    if current == mtime_at_hash {
        return finish_resolution(store, abs, parts, &digest, mtime_at_hash);
    }

    // Retry once with a fresh mtime and digest.
    let md = match std::fs::symlink_metadata(abs) {
        Ok(md) if md.is_file() => md,
        _ => {
            if store.signature(parts)?.is_some() {
                store.delete(keys::signature_key(parts))?;
            }
            return Ok(false);
        }
    };
    let retry_mtime = mtime_ns(&md);
    let retry_digest = match hasher.digest_file(abs) {
        Ok((d, _)) => d,
        Err(e) => {
            tracing::warn!(path = %parts.join("/"), error = %e, "re-hash failed");
            if store.signature(parts)?.is_some() {
                store.delete(keys::signature_key(parts))?;
            }
            return Ok(false);
        }
    };

    let settled = std::fs::symlink_metadata(abs)
        .map(|md| md.is_file() && mtime_ns(&md) == retry_mtime)
        .unwrap_or(false);

    if settled {
        finish_resolution(store, abs, parts, &retry_digest, retry_mtime)
    } else {
        // Still being written to; leave the entry without an ec_id so the
        // next refresh picks it up.
        store.put(
            keys::signature_key(parts),
            FileSignature::new(retry_digest, retry_mtime, None).encode()?,
        )?;
        tracing::warn!(
            path = %parts.join("/"),
            "file kept changing during refresh; left unresolved"
        );
        Ok(false)
    }
}

fn finish_resolution(
    store: &Store,
    abs: &PathBuf,
    parts: &[String],
    digest: &[u8],
    mtime_ns: i64,
) -> Result<bool> {
    match resolve_file(store, abs, parts, digest, mtime_ns)? {
        Some(_) => Ok(true),
        None => {
            // The file vanished mid-resolution; drop the partial entry.
            if store.signature(parts)?.is_some() {
                store.delete(keys::signature_key(parts))?;
            }
            Ok(false)
        }
    }
}
