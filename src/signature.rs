use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-file index record stored under the `m:` key of the file's path.
///
/// Serialized as the msgpack array `[digest, mtime_ns, ec_id]`; a missing
/// ec_id (the mid-operation window) is the msgpack nil marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    #[serde(with = "serde_bytes")]
    pub digest: Vec<u8>,
    pub mtime_ns: i64,
    pub ec_id: Option<u32>,
}

impl FileSignature {
    pub fn new(digest: Vec<u8>, mtime_ns: i64, ec_id: Option<u32>) -> Self {
        Self {
            digest,
            mtime_ns,
            ec_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).context("encode file signature")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).context("decode file signature")
    }
}

/// Bucket values are msgpack arrays of repository-relative path strings,
/// kept sorted so member order is stable across runs.
pub fn encode_bucket(paths: &[String]) -> Result<Vec<u8>> {
    rmp_serde::to_vec(paths).context("encode bucket")
}

pub fn decode_bucket(bytes: &[u8]) -> Result<Vec<String>> {
    rmp_serde::from_slice(bytes).context("decode bucket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        for ec_id in [None, Some(0), Some(7)] {
            let sig = FileSignature::new(vec![0x11; 32], 1_700_000_000_123_456_789, ec_id);
            let bytes = sig.encode().unwrap();
            assert_eq!(FileSignature::decode(&bytes).unwrap(), sig);
            // byte-stable re-encode
            assert_eq!(FileSignature::decode(&bytes).unwrap().encode().unwrap(), bytes);
        }
    }

    #[test]
    fn signature_negative_mtime() {
        let sig = FileSignature::new(vec![0; 32], -5, Some(1));
        let bytes = sig.encode().unwrap();
        assert_eq!(FileSignature::decode(&bytes).unwrap().mtime_ns, -5);
    }

    #[test]
    fn bucket_round_trip() {
        let paths = vec!["a".to_string(), "b/c".to_string(), "b/d".to_string()];
        let bytes = encode_bucket(&paths).unwrap();
        assert_eq!(decode_bucket(&bytes).unwrap(), paths);
    }
}
