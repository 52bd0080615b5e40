use anyhow::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

pub const DEFAULT_ALGORITHM: &str = "sha256";

/// Streaming content hash over a file's full bytes.
///
/// Implementations never stat the file; the caller reads the mtime
/// immediately before opening so a concurrent modification during hashing
/// yields a stale signature that the next refresh recomputes.
pub trait ContentHasher: Send + Sync {
    fn name(&self) -> &str;
    fn digest_len(&self) -> usize;

    /// Digest the file, returning the digest bytes and the number of
    /// bytes read.
    fn digest_file(&self, path: &Path) -> io::Result<(Vec<u8>, u64)>;
}

pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn name(&self) -> &str {
        DEFAULT_ALGORITHM
    }

    fn digest_len(&self) -> usize {
        32
    }

    fn digest_file(&self, path: &Path) -> io::Result<(Vec<u8>, u64)> {
        let f = File::open(path)?;
        let mut r = BufReader::new(f);

        let mut buf = vec![0u8; 1024 * 1024];
        let mut hasher = Sha256::new();
        let mut total = 0u64;

        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        Ok((hasher.finalize().to_vec(), total))
    }
}

/// Look up a hash algorithm by its configured name.
pub fn hasher_for(name: &str) -> Option<Box<dyn ContentHasher>> {
    match name {
        DEFAULT_ALGORITHM => Some(Box::new(Sha256Hasher)),
        _ => None,
    }
}

/// Byte-exact comparison of two files, streaming in fixed chunks.
pub fn compare_content(a: &Path, b: &Path) -> io::Result<bool> {
    const CHUNK: usize = 64 * 1024;

    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);

    let mut buf_a = vec![0u8; CHUNK];
    let mut buf_b = vec![0u8; CHUNK];

    loop {
        let na = read_full(&mut ra, &mut buf_a)?;
        let nb = read_full(&mut rb, &mut buf_b)?;

        if na != nb || buf_a[..na] != buf_b[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();

        let (digest, read) = Sha256Hasher.digest_file(&path).unwrap();
        assert_eq!(read, 0);
        // SHA-256 of the empty input
        assert_eq!(
            hex::encode(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn compare_content_detects_difference() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        std::fs::File::create(&a).unwrap().write_all(b"hello").unwrap();
        std::fs::File::create(&b).unwrap().write_all(b"hello").unwrap();
        std::fs::File::create(&c).unwrap().write_all(b"hellx").unwrap();

        assert!(compare_content(&a, &b).unwrap());
        assert!(!compare_content(&a, &c).unwrap());
    }

    #[test]
    fn compare_content_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::File::create(&a).unwrap().write_all(b"abc").unwrap();
        std::fs::File::create(&b).unwrap().write_all(b"abcd").unwrap();

        assert!(!compare_content(&a, &b).unwrap());
    }
}
