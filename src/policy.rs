use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Which metadata fields must agree for two content-equal files to count
/// as identical. Size always participates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub mtime: bool,
    pub atime: bool,
    pub ctime: bool,
    pub mode: bool,
    pub owner: bool,
    pub group: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            mtime: true,
            atime: false,
            ctime: false,
            mode: true,
            owner: true,
            group: true,
        }
    }
}

/// Per-field equality between two stat results.
#[derive(Debug, Clone, Copy)]
pub struct FieldMatches {
    pub size: bool,
    pub mtime: bool,
    pub atime: bool,
    pub ctime: bool,
    pub mode: bool,
    pub owner: bool,
    pub group: bool,
}

pub fn compare_metadata(a: &Metadata, b: &Metadata) -> FieldMatches {
    FieldMatches {
        size: a.size() == b.size(),
        mtime: a.mtime() == b.mtime() && a.mtime_nsec() == b.mtime_nsec(),
        atime: a.atime() == b.atime() && a.atime_nsec() == b.atime_nsec(),
        ctime: a.ctime() == b.ctime() && a.ctime_nsec() == b.ctime_nsec(),
        mode: a.mode() == b.mode(),
        owner: a.uid() == b.uid(),
        group: a.gid() == b.gid(),
    }
}

impl MatchPolicy {
    /// Whether the enabled fields (and size, always) all match.
    pub fn identical(&self, m: &FieldMatches) -> bool {
        m.size
            && (!self.mtime || m.mtime)
            && (!self.atime || m.atime)
            && (!self.ctime || m.ctime)
            && (!self.mode || m.mode)
            && (!self.owner || m.owner)
            && (!self.group || m.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_true() -> FieldMatches {
        FieldMatches {
            size: true,
            mtime: true,
            atime: true,
            ctime: true,
            mode: true,
            owner: true,
            group: true,
        }
    }

    #[test]
    fn default_policy_ignores_atime_and_ctime() {
        let policy = MatchPolicy::default();
        let mut m = all_true();
        m.atime = false;
        m.ctime = false;
        assert!(policy.identical(&m));

        m.mtime = false;
        assert!(!policy.identical(&m));
    }

    #[test]
    fn size_always_counts() {
        let policy = MatchPolicy {
            mtime: false,
            atime: false,
            ctime: false,
            mode: false,
            owner: false,
            group: false,
        };
        let mut m = all_true();
        m.size = false;
        assert!(!policy.identical(&m));
    }
}
