use crate::hashing::compare_content;
use crate::path_utils::normalize_path;
use crate::policy::{compare_metadata, MatchPolicy};
use crate::report;
use anyhow::{anyhow, Result};
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShowFilter {
    Both,
    Analyzed,
    Repository,
}

#[derive(Debug, Clone, Copy)]
pub struct DiffTreeOptions {
    pub hide_content_match: bool,
    /// None means unlimited depth.
    pub max_depth: Option<usize>,
    pub show: ShowFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinClass {
    OnlyAnalyzed,
    OnlyRepository,
    ContentMatch,
    FullMatch,
    Differs,
}

impl JoinClass {
    fn label(self) -> &'static str {
        match self {
            JoinClass::OnlyAnalyzed => "only-analyzed",
            JoinClass::OnlyRepository => "only-repository",
            JoinClass::ContentMatch => "content-match",
            JoinClass::FullMatch => "content+metadata-match",
            JoinClass::Differs => "differs",
        }
    }
}

/// Render a side-by-side tree comparison of an analyzed directory and a
/// repository directory, joining entries by name at each level.
///
/// The metadata policy comes from the analyzed path's report when one
/// exists, so the rendering agrees with the analysis that found the
/// duplicate.
pub fn diff_tree(analyzed: &Path, repository: &Path, options: DiffTreeOptions) -> Result<()> {
    let analyzed = normalize_path(analyzed)?;
    let repository = normalize_path(repository)?;

    if !analyzed.is_dir() {
        return Err(anyhow!("{} is not a directory", analyzed.display()));
    }
    if !repository.is_dir() {
        return Err(anyhow!("{} is not a directory", repository.display()));
    }

    let policy = report::find_report_for(&analyzed)
        .and_then(|(_, report_dir)| report::read_meta(&report_dir))
        .map(|meta| meta.policy)
        .unwrap_or_default();

    println!("{} <> {}", analyzed.display(), repository.display());
    walk_level(&analyzed, &repository, &policy, &options, 1)
}

fn walk_level(
    analyzed: &Path,
    repository: &Path,
    policy: &MatchPolicy,
    options: &DiffTreeOptions,
    depth: usize,
) -> Result<()> {
    if let Some(max) = options.max_depth {
        if depth > max {
            println!("{}...", indent(depth));
            return Ok(());
        }
    }

    // Join children of both sides by name.
    let mut joined: BTreeMap<String, (bool, bool)> = BTreeMap::new();
    for (side, dir) in [(0, analyzed), (1, repository)] {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let slot = joined.entry(name).or_insert((false, false));
            if side == 0 {
                slot.0 = true;
            } else {
                slot.1 = true;
            }
        }
    }

    for (name, (in_analyzed, in_repository)) in joined {
        let a = analyzed.join(&name);
        let r = repository.join(&name);

        if in_analyzed && in_repository && a.is_dir() && r.is_dir() {
            println!("{}{}/", indent(depth), name);
            walk_level(&a, &r, policy, options, depth + 1)?;
            continue;
        }

        let class = classify(&a, &r, in_analyzed, in_repository, policy);
        if skip(class, options) {
            continue;
        }

        let suffix = if (in_analyzed && a.is_dir()) || (in_repository && r.is_dir()) {
            "/"
        } else {
            ""
        };
        println!("{}{}{} [{}]", indent(depth), name, suffix, class.label());

        // A one-sided directory still shows its subtree.
        if class == JoinClass::OnlyAnalyzed && a.is_dir() {
            walk_single(&a, options, depth + 1, JoinClass::OnlyAnalyzed)?;
        } else if class == JoinClass::OnlyRepository && r.is_dir() {
            walk_single(&r, options, depth + 1, JoinClass::OnlyRepository)?;
        }
    }

    Ok(())
}

fn classify(
    a: &Path,
    r: &Path,
    in_analyzed: bool,
    in_repository: bool,
    policy: &MatchPolicy,
) -> JoinClass {
    match (in_analyzed, in_repository) {
        (true, false) => JoinClass::OnlyAnalyzed,
        (false, true) => JoinClass::OnlyRepository,
        (true, true) => {
            let (Ok(md_a), Ok(md_r)) = (std::fs::symlink_metadata(a), std::fs::symlink_metadata(r))
            else {
                return JoinClass::Differs;
            };
            if !md_a.is_file() || !md_r.is_file() {
                // dir-vs-file and special-file joins
                return JoinClass::Differs;
            }
            match compare_content(a, r) {
                Ok(true) => {
                    if policy.identical(&compare_metadata(&md_a, &md_r)) {
                        JoinClass::FullMatch
                    } else {
                        JoinClass::ContentMatch
                    }
                }
                _ => JoinClass::Differs,
            }
        }
        (false, false) => unreachable!(),
    }
}

fn skip(class: JoinClass, options: &DiffTreeOptions) -> bool {
    match class {
        JoinClass::ContentMatch if options.hide_content_match => true,
        JoinClass::OnlyAnalyzed => options.show == ShowFilter::Repository,
        JoinClass::OnlyRepository => options.show == ShowFilter::Analyzed,
        _ => false,
    }
}

fn walk_single(
    dir: &Path,
    options: &DiffTreeOptions,
    depth: usize,
    class: JoinClass,
) -> Result<()> {
    if let Some(max) = options.max_depth {
        if depth > max {
            println!("{}...", indent(depth));
            return Ok(());
        }
    }

    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.flatten().collect(),
        Err(_) => return Ok(()),
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let is_dir = path.is_dir();
        println!(
            "{}{}{} [{}]",
            indent(depth),
            name,
            if is_dir { "/" } else { "" },
            class.label()
        );
        if is_dir {
            walk_single(&path, options, depth + 1, class)?;
        }
    }

    Ok(())
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}
