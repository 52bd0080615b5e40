use crate::error::RepoError;
use crate::path_utils::{normalize_path, rel_components};
use crate::report::{
    self, DirDuplicate, FileDuplicate, ReportMeta, DUPLICATES_FILE, FILES_DIR,
};
use crate::util::format_size;
use anyhow::Result;
use chrono::DateTime;
use clap::ValueEnum;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortBy {
    Size,
    Items,
    Identical,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortChildren {
    DupSize,
    DupItems,
    TotalSize,
    Name,
}

#[derive(Debug, Clone, Copy)]
pub struct DescribeOptions {
    /// None shows every duplicate.
    pub limit: Option<usize>,
    pub sort_by: SortBy,
    pub sort_children: SortChildren,
    pub use_bytes: bool,
    pub show_details: bool,
    pub directory_only: bool,
    pub keep_input_order: bool,
}

/// Print duplicate information from existing reports for each path.
pub fn describe(paths: &[PathBuf], options: DescribeOptions) -> Result<()> {
    if options.directory_only {
        if paths.len() > 1 {
            return Err(RepoError::Config(
                "--directory can only be used with a single path".into(),
            )
            .into());
        }
        for path in paths {
            if !path.is_dir() {
                return Err(RepoError::Config(format!(
                    "--directory can only be used with directories, not files: {}",
                    path.display()
                ))
                .into());
            }
        }
    }

    let mut entries = Vec::new();
    for path in paths {
        entries.push(normalize_path(path)?);
    }

    if entries.len() > 1 && !options.keep_input_order {
        entries.sort();
    }

    for (i, path) in entries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        describe_one(path, &options, entries.len() > 1)?;
    }

    Ok(())
}

fn describe_one(path: &Path, options: &DescribeOptions, compact: bool) -> Result<()> {
    let (base, report_dir) = report::find_report_for(path)?;
    let meta = report::read_meta(&report_dir)?;

    if options.show_details {
        print_details(&meta, &report_dir);
    }

    if path == base.as_path() {
        if meta.is_directory {
            let records = report::read_dir_duplicates(&report_dir.join(DUPLICATES_FILE))?;
            print_dir_records(path, records, options);
            if !options.directory_only && !compact {
                print_children(path, &report_dir.join(FILES_DIR), Path::new(""), options)?;
            }
        } else {
            let records = report::read_file_duplicates(&report_dir.join(DUPLICATES_FILE))?;
            print_file_records(path, records, options);
        }
        return Ok(());
    }

    let rel = rel_components(&base, path)?.join("/");
    let leaf = report_dir.join(FILES_DIR).join(&rel);

    if leaf.is_file() {
        let records = report::read_file_duplicates(&leaf)?;
        print_file_records(path, records, options);
    } else if leaf.is_dir() {
        println!("{}/", path.display());
        if !compact {
            print_children(path, &report_dir.join(FILES_DIR), Path::new(&rel), options)?;
        }
    } else {
        println!("{}: no duplicate record in report", path.display());
    }

    Ok(())
}

fn print_details(meta: &ReportMeta, report_dir: &Path) {
    println!("Report:     {}", report_dir.display());
    println!("Analyzed:   {}", meta.analyzed_path);
    println!("Repository: {}", meta.repository_root);
    println!(
        "Timestamp:  {}",
        DateTime::from_timestamp_nanos(meta.created_ns).format("%Y-%m-%dT%H:%M:%SZ")
    );
    println!(
        "Type:       {}",
        if meta.is_directory { "directory" } else { "file" }
    );
}

fn print_file_records(path: &Path, mut records: Vec<FileDuplicate>, options: &DescribeOptions) {
    match options.sort_by {
        SortBy::Size => records.sort_by(|a, b| b.size.cmp(&a.size)),
        SortBy::Items => records.sort_by(|a, b| b.size.cmp(&a.size)),
        SortBy::Identical => {
            records.sort_by(|a, b| b.identical.cmp(&a.identical).then(b.size.cmp(&a.size)))
        }
        SortBy::Path => records.sort_by(|a, b| {
            a.repository_path
                .len()
                .cmp(&b.repository_path.len())
                .then_with(|| a.repository_path.cmp(&b.repository_path))
        }),
    }

    println!("{}", path.display());
    if records.is_empty() {
        println!("  no duplicates");
        return;
    }

    let shown = options.limit.unwrap_or(records.len());
    for record in records.iter().take(shown) {
        println!(
            "  {} (ec {}{}, {})",
            record.repository_path,
            record.ec_id,
            if record.identical { ", identical" } else { "" },
            size_str(record.size, options),
        );
    }
    if records.len() > shown {
        println!("  ... {} more", records.len() - shown);
    }
}

fn print_dir_records(path: &Path, mut records: Vec<DirDuplicate>, options: &DescribeOptions) {
    match options.sort_by {
        SortBy::Size => records.sort_by(|a, b| b.duplicated_size.cmp(&a.duplicated_size)),
        SortBy::Items => records.sort_by(|a, b| b.duplicated_items.cmp(&a.duplicated_items)),
        SortBy::Identical => records.sort_by(|a, b| {
            b.identical
                .cmp(&a.identical)
                .then(b.duplicated_size.cmp(&a.duplicated_size))
        }),
        SortBy::Path => records.sort_by(|a, b| {
            a.repository_dir
                .len()
                .cmp(&b.repository_dir.len())
                .then_with(|| a.repository_dir.cmp(&b.repository_dir))
        }),
    }

    println!("{}/", path.display());
    if records.is_empty() {
        println!("  no duplicate directories");
        return;
    }

    let shown = options.limit.unwrap_or(records.len());
    for record in records.iter().take(shown) {
        println!(
            "  {} ({} items, {}{})",
            record.repository_dir,
            record.duplicated_items,
            size_str(record.duplicated_size, options),
            if record.identical { ", identical" } else { "" },
        );
    }
    if records.len() > shown {
        println!("  ... {} more", records.len() - shown);
    }
}

struct ChildLine {
    name: String,
    is_dir: bool,
    dup_items: u64,
    dup_size: u64,
    total_size: u64,
}

/// List the immediate children of an analyzed directory with their
/// duplicate aggregates, computed from the report's `files/` mirror.
fn print_children(
    path: &Path,
    files_root: &Path,
    rel: &Path,
    options: &DescribeOptions,
) -> Result<()> {
    let mirror = files_root.join(rel);
    if !mirror.is_dir() {
        return Ok(());
    }

    let mut lines = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(&mirror)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child = entry.path();
        let is_dir = child.is_dir();

        let (dup_items, dup_size) = if is_dir {
            aggregate_subtree(&child)?
        } else {
            let records = report::read_file_duplicates(&child)?;
            match records.first() {
                Some(first) => (1, first.size),
                None => (0, 0),
            }
        };

        let total_size = std::fs::metadata(path.join(&name)).map(|m| m.len()).unwrap_or(0);
        lines.push(ChildLine {
            name,
            is_dir,
            dup_items,
            dup_size,
            total_size,
        });
    }

    match options.sort_children {
        SortChildren::DupSize => lines.sort_by(|a, b| b.dup_size.cmp(&a.dup_size)),
        SortChildren::DupItems => lines.sort_by(|a, b| b.dup_items.cmp(&a.dup_items)),
        SortChildren::TotalSize => lines.sort_by(|a, b| b.total_size.cmp(&a.total_size)),
        SortChildren::Name => lines.sort_by(|a, b| a.name.cmp(&b.name)),
    }

    for line in lines {
        println!(
            "  {}{} ({} duplicated, {} items)",
            line.name,
            if line.is_dir { "/" } else { "" },
            size_str(line.dup_size, options),
            line.dup_items,
        );
    }

    Ok(())
}

/// Sum duplicate counts and sizes over every leaf below a `files/` subtree.
fn aggregate_subtree(dir: &Path) -> Result<(u64, u64)> {
    let mut items = 0u64;
    let mut size = 0u64;

    for entry in walkdir::WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let records = report::read_file_duplicates(entry.path())?;
        if let Some(first) = records.first() {
            items += 1;
            size += first.size;
        }
    }

    Ok((items, size))
}

fn size_str(bytes: u64, options: &DescribeOptions) -> String {
    if options.use_bytes {
        bytes.to_string()
    } else {
        format_size(bytes)
    }
}
