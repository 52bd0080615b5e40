use crate::error::RepoError;
use crate::path_utils::normalize_path;
use crate::store::INDEX_DIR;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub const REPOSITORY_ENV: &str = "REDEDUP_REPOSITORY";

/// Resolve the repository root.
///
/// Order: explicit `--repository` path, then the REDEDUP_REPOSITORY
/// environment variable, then upward search from the working directory for
/// a `.rededup` directory. Commands that build the index pass
/// `create_on_missing` and fall back to the working directory when the
/// search finds nothing.
pub fn find_repository(explicit: Option<&Path>, create_on_missing: bool) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return check_explicit(path, create_on_missing);
    }

    if let Some(env_path) = std::env::var_os(REPOSITORY_ENV) {
        return check_explicit(Path::new(&env_path), create_on_missing);
    }

    let cwd = std::env::current_dir()?;
    let mut attempt = cwd.as_path();
    loop {
        if attempt.join(INDEX_DIR).is_dir() {
            return Ok(attempt.to_path_buf());
        }
        match attempt.parent() {
            Some(parent) => attempt = parent,
            None => {
                return if create_on_missing {
                    Ok(cwd)
                } else {
                    Err(RepoError::NotFound.into())
                }
            }
        }
    }
}

fn check_explicit(path: &Path, create_on_missing: bool) -> Result<PathBuf> {
    let root = normalize_path(path)?;

    if !root.is_dir() {
        return Err(anyhow!("repository {} is not a directory", root.display()));
    }

    if !root.join(INDEX_DIR).is_dir() && !create_on_missing {
        return Err(RepoError::NotFound.into());
    }

    Ok(root)
}
