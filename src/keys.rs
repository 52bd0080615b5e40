use anyhow::{anyhow, Result};

// Key prefixes of the index keyspace. The prefixes sort in the order
// c: < h: < m:, so a full scan yields config entries first.
pub const CONFIG_PREFIX: &[u8] = b"c:";
pub const BUCKET_PREFIX: &[u8] = b"h:";
pub const SIGNATURE_PREFIX: &[u8] = b"m:";

pub const CONFIG_HASH_ALGORITHM: &str = "hash-algorithm";
pub const CONFIG_TRUNCATING: &str = "truncating";
pub const TRUNCATING_VALUE: &str = "truncate";

/// Encode path components into the `m:` key body.
///
/// Every component is terminated by a null byte, including the last one,
/// so that `a` and `ab` never collide on prefix queries and the encoded
/// form of a directory is a strict prefix of all its descendants.
pub fn encode_path(parts: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        out.extend_from_slice(part.as_bytes());
        out.push(0);
    }
    out
}

/// Decode an `m:` key body back into path components.
pub fn decode_path(body: &[u8]) -> Result<Vec<String>> {
    let stripped = body
        .strip_suffix(&[0])
        .ok_or_else(|| anyhow!("path key missing terminator"))?;

    stripped
        .split(|&b| b == 0)
        .map(|part| {
            if part.is_empty() {
                return Err(anyhow!("empty component in path key"));
            }
            std::str::from_utf8(part)
                .map(str::to_string)
                .map_err(|_| anyhow!("path key is not valid UTF-8"))
        })
        .collect()
}

pub fn signature_key(parts: &[String]) -> Vec<u8> {
    let mut key = SIGNATURE_PREFIX.to_vec();
    key.extend_from_slice(&encode_path(parts));
    key
}

pub fn config_key(name: &str) -> Vec<u8> {
    let mut key = CONFIG_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

/// Key for one equivalent-class bucket. The ec_id is big-endian so the
/// lexicographic key order equals the numeric id order.
pub fn bucket_key(digest: &[u8], ec_id: u32) -> Vec<u8> {
    let mut key = BUCKET_PREFIX.to_vec();
    key.extend_from_slice(digest);
    key.extend_from_slice(&ec_id.to_be_bytes());
    key
}

/// Prefix matching every bucket of one digest.
pub fn bucket_prefix(digest: &[u8]) -> Vec<u8> {
    let mut key = BUCKET_PREFIX.to_vec();
    key.extend_from_slice(digest);
    key
}

/// Split a full `h:` key into (digest, ec_id) given the digest width.
pub fn parse_bucket_key(key: &[u8], digest_len: usize) -> Result<(Vec<u8>, u32)> {
    let body = key
        .strip_prefix(BUCKET_PREFIX)
        .ok_or_else(|| anyhow!("not a bucket key"))?;

    if body.len() != digest_len + 4 {
        return Err(anyhow!(
            "bucket key has length {}, expected {}",
            body.len(),
            digest_len + 4
        ));
    }

    let digest = body[..digest_len].to_vec();
    let mut ec_bytes = [0u8; 4];
    ec_bytes.copy_from_slice(&body[digest_len..]);
    Ok((digest, u32::from_be_bytes(ec_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn path_round_trip() {
        for case in [vec!["a"], vec!["a", "b"], vec!["a b", "c.d", "e"]] {
            let p = parts(&case);
            let encoded = encode_path(&p);
            assert_eq!(decode_path(&encoded).unwrap(), p);
            assert_eq!(encode_path(&decode_path(&encoded).unwrap()), encoded);
        }
    }

    #[test]
    fn directory_prefix_is_strict() {
        // m:a\0 must not be a prefix of m:ab\0
        let file_a = encode_path(&parts(&["a"]));
        let file_ab = encode_path(&parts(&["ab"]));
        let nested = encode_path(&parts(&["a", "b"]));
        assert!(!file_ab.starts_with(&file_a));
        assert!(nested.starts_with(&file_a));
    }

    #[test]
    fn bucket_key_orders_numerically() {
        let digest = vec![0xab; 32];
        let k0 = bucket_key(&digest, 0);
        let k1 = bucket_key(&digest, 1);
        let k256 = bucket_key(&digest, 256);
        assert!(k0 < k1 && k1 < k256);

        let (d, id) = parse_bucket_key(&k256, 32).unwrap();
        assert_eq!(d, digest);
        assert_eq!(id, 256);
    }
}
