use crate::error::RepoError;
use crate::hashing::hasher_for;
use crate::keys;
use crate::signature::{decode_bucket, FileSignature};
use crate::store::Store;
use anyhow::Result;
use chrono::DateTime;
use std::io::Write;

/// Dump every index entry in the line format of the original tool:
///
/// ```text
/// config <name> <value>
/// file-hash <hex-digest> <ec-id> <quoted-paths>
/// file-metadata <quoted-path> digest:<hex> mtime:<iso8601> ec_id:<id>
/// ```
///
/// Paths are `+`-quoted per component and joined with `/`. When the
/// configured hash algorithm is unknown the digest and ec_id cannot be
/// split, and the whole key body is printed as `*<hex>`.
pub fn inspect(store: &Store, out: &mut impl Write) -> Result<()> {
    let algorithm = store.read_config(keys::CONFIG_HASH_ALGORITHM)?;
    let digest_len = algorithm
        .as_deref()
        .and_then(hasher_for)
        .map(|h| h.digest_len());

    for (key, value) in store.iter_prefix(b"")? {
        if let Some(name) = key.strip_prefix(keys::CONFIG_PREFIX) {
            writeln!(
                out,
                "config {} {}",
                String::from_utf8_lossy(name),
                String::from_utf8_lossy(&value)
            )?;
        } else if let Some(body) = key.strip_prefix(keys::BUCKET_PREFIX) {
            let members = decode_bucket(&value).map_err(|e| corrupt(&key, e))?;
            let paths = members.iter().map(|m| quote_rel(m)).collect::<Vec<_>>().join(" ");

            match digest_len {
                Some(len) if body.len() == len + 4 => {
                    let (digest, ec_id) = keys::parse_bucket_key(&key, len)?;
                    writeln!(out, "file-hash {} {} {}", hex::encode(digest), ec_id, paths)?;
                }
                _ => {
                    writeln!(out, "file-hash *{} {}", hex::encode(body), paths)?;
                }
            }
        } else if let Some(body) = key.strip_prefix(keys::SIGNATURE_PREFIX) {
            let parts = keys::decode_path(body).map_err(|e| corrupt(&key, e))?;
            let sig = FileSignature::decode(&value).map_err(|e| corrupt(&key, e))?;

            let quoted = parts
                .iter()
                .map(|p| quote_component(p))
                .collect::<Vec<_>>()
                .join("/");
            let ec_id = sig
                .ec_id
                .map(|i| i.to_string())
                .unwrap_or_else(|| "None".to_string());

            writeln!(
                out,
                "file-metadata {} digest:{} mtime:{} ec_id:{}",
                quoted,
                hex::encode(&sig.digest),
                format_mtime(sig.mtime_ns),
                ec_id
            )?;
        } else {
            writeln!(
                out,
                "OTHER {} {}",
                String::from_utf8_lossy(&key),
                String::from_utf8_lossy(&value)
            )?;
        }
    }

    Ok(())
}

fn corrupt(key: &[u8], e: anyhow::Error) -> anyhow::Error {
    RepoError::Corrupt {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    }
    .into()
}

fn quote_component(part: &str) -> String {
    form_urlencoded::byte_serialize(part.as_bytes()).collect()
}

fn quote_rel(path: &str) -> String {
    path.split('/')
        .map(quote_component)
        .collect::<Vec<_>>()
        .join("/")
}

fn format_mtime(mtime_ns: i64) -> String {
    DateTime::from_timestamp_nanos(mtime_ns)
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}
