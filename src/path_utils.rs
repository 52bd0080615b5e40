use anyhow::{anyhow, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize a path:
/// - make absolute (relative to current working directory)
/// - remove `.` and `..` components
/// - do NOT resolve symlinks
pub fn normalize_path(p: &Path) -> std::io::Result<PathBuf> {
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };

    Ok(lexical_normalize(&abs))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }

    out
}

/// Split `abs` into its components relative to `root`.
///
/// Components must be valid UTF-8; the index stores them as strings.
pub fn rel_components(root: &Path, abs: &Path) -> Result<Vec<String>> {
    let rel = abs
        .strip_prefix(root)
        .map_err(|_| anyhow!("{} is not under {}", abs.display(), root.display()))?;

    components_of(rel)
}

/// Validate and collect the components of a relative path.
///
/// Empty components, `.` and `..` are rejected.
pub fn components_of(rel: &Path) -> Result<Vec<String>> {
    let mut parts = Vec::new();

    for comp in rel.components() {
        match comp {
            Component::Normal(os) => {
                let part = os
                    .to_str()
                    .ok_or_else(|| anyhow!("path {} is not valid UTF-8", rel.display()))?;
                if part.is_empty() {
                    return Err(anyhow!("empty path component in {}", rel.display()));
                }
                parts.push(part.to_string());
            }
            Component::CurDir | Component::ParentDir => {
                return Err(anyhow!(
                    "illegal component in relative path {}",
                    rel.display()
                ))
            }
            _ => return Err(anyhow!("{} is not a relative path", rel.display())),
        }
    }

    if parts.is_empty() {
        return Err(anyhow!("empty relative path"));
    }

    Ok(parts)
}

/// Join components back into a slash-separated relative path string.
pub fn join_components(parts: &[String]) -> String {
    parts.join("/")
}

/// Split a slash-separated relative path string into components.
pub fn split_rel(path: &str) -> Vec<String> {
    path.split('/').map(str::to_string).collect()
}
