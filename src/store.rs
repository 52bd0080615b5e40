use crate::error::RepoError;
use crate::keys;
use crate::signature::FileSignature;
use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use redb::{Database, ReadableTable, TableDefinition};
use std::fs::{File, OpenOptions};
use std::ops::Bound;
use std::path::{Path, PathBuf};

pub const INDEX_DIR: &str = ".rededup";
pub const DB_FILE: &str = "index.redb";
pub const LOCK_FILE: &str = "lock";

// The whole §3 keyspace lives in one ordered byte table; the c:/h:/m:
// prefixes partition it.
const INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index");

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Typed adapter over the repository's redb database.
///
/// Holds the exclusive advisory lock for its whole lifetime, so two
/// processes can never mutate the same repository concurrently.
pub struct Store {
    root: PathBuf,
    db: Database,
    _lock_file: File,
}

impl Store {
    /// Open the index of the repository rooted at `root`.
    ///
    /// With `create`, a missing `.rededup` directory is initialized;
    /// otherwise its absence is a not-found error.
    pub fn open(root: &Path, create: bool) -> Result<Store> {
        if !root.is_dir() {
            return Err(anyhow!("repository {} is not a directory", root.display()));
        }

        let index_dir = root.join(INDEX_DIR);
        if !index_dir.exists() {
            if create {
                std::fs::create_dir(&index_dir)
                    .with_context(|| format!("create {}", index_dir.display()))?;
            } else {
                return Err(RepoError::NotFound.into());
            }
        }
        if !index_dir.is_dir() {
            return Err(anyhow!("{} is not a directory", index_dir.display()));
        }

        // Acquire the lock before touching the database, so two processes
        // cannot initialize concurrently.
        let lock_file = open_and_lock(&index_dir)?;

        let db_path = index_dir.join(DB_FILE);
        let db = Database::create(&db_path)
            .with_context(|| format!("open index database {}", db_path.display()))?;

        let store = Store {
            root: root.to_path_buf(),
            db,
            _lock_file: lock_file,
        };
        store.ensure_table()?;

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_table(&self) -> Result<()> {
        let tx = self.db.begin_write().context("begin_write() failed")?;
        {
            let _ = tx.open_table(INDEX_TABLE)?;
        }
        tx.commit().context("commit() failed")?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read().context("begin_read() failed")?;
        let table = tx.open_table(INDEX_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.batch(vec![BatchOp::Put(key, value)])
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.batch(vec![BatchOp::Delete(key)])
    }

    /// Apply a set of mutations atomically.
    ///
    /// All multi-key mutations that carry index invariants go through here.
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let tx = self.db.begin_write().context("begin_write() failed")?;
        {
            let mut table = tx.open_table(INDEX_TABLE)?;
            for op in &ops {
                match op {
                    BatchOp::Put(key, value) => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete(key) => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        tx.commit().context("commit() failed")?;
        Ok(())
    }

    /// All entries whose key starts with `prefix`, in lexicographic key
    /// order. The result is collected under a single read transaction, so
    /// it is a consistent snapshot with respect to concurrent batches.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let tx = self.db.begin_read().context("begin_read() failed")?;
        let table = tx.open_table(INDEX_TABLE)?;

        let upper = prefix_upper(prefix);
        let upper_bound = match &upper {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };

        let mut out = Vec::new();
        for item in table.range::<&[u8]>((Bound::Included(prefix), upper_bound))? {
            let (key, value) = item?;
            out.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(out)
    }

    pub fn read_config(&self, name: &str) -> Result<Option<String>> {
        match self.get(&keys::config_key(name))? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).context("config value is not valid UTF-8")?,
            )),
            None => Ok(None),
        }
    }

    /// Write or delete a configuration entry; `None` deletes.
    pub fn write_config(&self, name: &str, value: Option<&str>) -> Result<()> {
        let key = keys::config_key(name);
        match value {
            Some(v) => self.put(key, v.as_bytes().to_vec()),
            None => self.delete(key),
        }
    }

    pub fn is_truncating(&self) -> Result<bool> {
        Ok(self.read_config(keys::CONFIG_TRUNCATING)?.is_some())
    }

    /// Fail with the truncating error if a rebuild was interrupted.
    pub fn check_not_truncating(&self) -> Result<()> {
        if self.is_truncating()? {
            return Err(RepoError::Truncating.into());
        }
        Ok(())
    }

    /// The configured hash algorithm name, or a configuration error
    /// telling the user to rebuild when the index has never been built.
    pub fn hash_algorithm(&self) -> Result<String> {
        self.read_config(keys::CONFIG_HASH_ALGORITHM)?.ok_or_else(|| {
            RepoError::Config(
                "the index has not been built; run `rededup rebuild` first".to_string(),
            )
            .into()
        })
    }

    pub fn signature(&self, parts: &[String]) -> Result<Option<FileSignature>> {
        match self.get(&keys::signature_key(parts))? {
            Some(bytes) => Ok(Some(FileSignature::decode(&bytes).map_err(|e| {
                RepoError::Corrupt {
                    key: format!("m:{}", parts.join("/")),
                    reason: e.to_string(),
                }
            })?)),
            None => Ok(None),
        }
    }
}

fn open_and_lock(index_dir: &Path) -> Result<File> {
    let lock_path = index_dir.join(LOCK_FILE);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;

    // Exclusive lock: one rededup process per repository at a time.
    f.try_lock_exclusive()
        .with_context(|| format!("repository is locked (in use?): {}", index_dir.display()))?;

    Ok(f)
}

/// The smallest key strictly greater than every key starting with
/// `prefix`, or None when the prefix is all 0xff bytes.
fn prefix_upper(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xff {
            end.pop();
        } else {
            *end.last_mut().unwrap() = last + 1;
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_upper_carries() {
        assert_eq!(prefix_upper(b"m:"), Some(b"m;".to_vec()));
        assert_eq!(prefix_upper(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(prefix_upper(&[0xff, 0xff]), None);
    }
}
