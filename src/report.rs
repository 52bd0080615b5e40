use crate::policy::MatchPolicy;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta";
pub const DUPLICATES_FILE: &str = "duplicates";
pub const FILES_DIR: &str = "files";
pub const REPORT_SUFFIX: &str = ".report";

/// Report header, serialized as msgpack into `<input>.report/meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub created_ns: i64,
    pub analyzed_path: String,
    pub repository_root: String,
    pub policy: MatchPolicy,
    pub is_directory: bool,
}

/// Duplicate record for a file input (or one leaf under `files/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDuplicate {
    pub repository_path: String,
    pub ec_id: u32,
    pub identical: bool,
    pub size: u64,
}

/// Directory-level aggregate for a directory input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirDuplicate {
    pub repository_dir: String,
    pub duplicated_items: u64,
    pub duplicated_size: u64,
    pub identical: bool,
}

/// The report directory adjacent to an analyzed input.
pub fn report_dir_for(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.file_name().unwrap_or(input.as_os_str()));
    name.push(REPORT_SUFFIX);
    input.with_file_name(name)
}

pub fn write_meta(report_dir: &Path, meta: &ReportMeta) -> Result<()> {
    let bytes = rmp_serde::to_vec(meta).context("encode report meta")?;
    std::fs::write(report_dir.join(META_FILE), bytes)
        .with_context(|| format!("write {}", report_dir.join(META_FILE).display()))
}

pub fn read_meta(report_dir: &Path) -> Result<ReportMeta> {
    let path = report_dir.join(META_FILE);
    let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    rmp_serde::from_slice(&bytes).context("decode report meta")
}

pub fn write_file_duplicates(path: &Path, records: &[FileDuplicate]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = rmp_serde::to_vec(records).context("encode duplicate records")?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

pub fn read_file_duplicates(path: &Path) -> Result<Vec<FileDuplicate>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    rmp_serde::from_slice(&bytes).context("decode duplicate records")
}

pub fn write_dir_duplicates(path: &Path, records: &[DirDuplicate]) -> Result<()> {
    let bytes = rmp_serde::to_vec(records).context("encode directory duplicates")?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

pub fn read_dir_duplicates(path: &Path) -> Result<Vec<DirDuplicate>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    rmp_serde::from_slice(&bytes).context("decode directory duplicates")
}

/// Find the report covering `path` by upward search: the nearest ancestor
/// (including `path` itself) that has a sibling `.report` directory.
///
/// Returns (analyzed root, its report directory).
pub fn find_report_for(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let mut attempt = path.to_path_buf();
    loop {
        let report_dir = report_dir_for(&attempt);
        if report_dir.is_dir() {
            return Ok((attempt, report_dir));
        }
        if !attempt.pop() || attempt.file_name().is_none() {
            return Err(anyhow!(
                "no analysis report found for {}; run `rededup analyze` first",
                path.display()
            ));
        }
    }
}
