use anyhow::Result;
use clap::{Parser, Subcommand};
use rededup::describe::{DescribeOptions, SortBy, SortChildren};
use rededup::diff_tree::{DiffTreeOptions, ShowFilter};
use rededup::policy::MatchPolicy;
use rededup::store::Store;
use rededup::{analyze, describe, diff_tree, error, import, inspect, locate, logging, refresh};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rededup")]
#[command(
    version,
    about = "Index a collection of files with content hashes and deduplicate files against the indexed collection"
)]
struct Cli {
    /// Path to the repository directory. Defaults to REDEDUP_REPOSITORY
    /// or an upward search from the current directory.
    #[arg(long, value_name = "PATH", global = true)]
    repository: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    /// Path to a log file for operation logging
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Logging level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Completely rebuild the repository index from scratch
    Rebuild,

    /// Refresh the repository index with any changes
    Refresh,

    /// Import index entries from another repository
    Import {
        /// Path to the source repository directory
        source: PathBuf,
    },

    /// Generate analysis reports for files or directories
    Analyze {
        /// Files or directories to analyze against the repository
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Include access time when determining if files are identical
        #[arg(long)]
        include_atime: bool,

        /// Include change time when determining if files are identical
        #[arg(long)]
        include_ctime: bool,

        /// Exclude file owner when determining if files are identical
        #[arg(long)]
        exclude_owner: bool,

        /// Exclude file group when determining if files are identical
        #[arg(long)]
        exclude_group: bool,
    },

    /// Show duplicate information from existing analysis reports
    Describe {
        /// Files or directories to describe (default: current directory)
        paths: Vec<PathBuf>,

        /// Describe only the path itself, not its contents
        #[arg(long)]
        directory: bool,

        /// Show all duplicates
        #[arg(long)]
        all: bool,

        /// Maximum number of duplicates to show (default: 1 unless --all)
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Sort duplicates
        #[arg(long, value_enum, default_value = "size")]
        sort_by: SortBy,

        /// Sort directory children
        #[arg(long, value_enum, default_value = "dup-size")]
        sort_children: SortChildren,

        /// Keep the input order when multiple paths are given
        #[arg(long)]
        keep_input_order: bool,

        /// Show sizes in bytes instead of human-readable form
        #[arg(long)]
        bytes: bool,

        /// Show detailed report metadata
        #[arg(long)]
        details: bool,
    },

    /// Compare directory trees between an analyzed path and a repository duplicate
    DiffTree {
        /// Path to the analyzed directory
        analyzed: PathBuf,

        /// Path to the duplicate directory in the repository
        #[arg(value_name = "REPOSITORY_PATH")]
        duplicate: PathBuf,

        /// Hide files that match content but differ in metadata
        #[arg(long)]
        hide_content_match: bool,

        /// Maximum depth to display
        #[arg(long, value_name = "N", default_value_t = 3)]
        max_depth: usize,

        /// Show unlimited depth
        #[arg(long)]
        unlimited: bool,

        /// Filter which files to show
        #[arg(long, value_enum, default_value = "both")]
        show: ShowFilter,
    },

    /// Inspect and display repository index records
    Inspect,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{e:#}");
        std::process::exit(error::exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    logging::init(
        cli.verbose,
        cli.log_file.as_deref(),
        cli.log_level.as_deref(),
    )?;

    let repository = cli.repository.as_deref();

    match cli.cmd {
        Command::Rebuild => {
            let root = locate::find_repository(repository, true)?;
            let store = Store::open(&root, true)?;
            refresh::rebuild(&store, worker_threads())
        }

        Command::Refresh => {
            let root = locate::find_repository(repository, true)?;
            let store = Store::open(&root, true)?;
            store.check_not_truncating()?;
            refresh::refresh(&store, worker_threads())
        }

        Command::Import { source } => {
            let root = locate::find_repository(repository, false)?;
            let store = Store::open(&root, false)?;
            store.check_not_truncating()?;
            import::import(&store, &source)
        }

        Command::Analyze {
            paths,
            include_atime,
            include_ctime,
            exclude_owner,
            exclude_group,
        } => {
            let root = locate::find_repository(repository, false)?;
            let store = Store::open(&root, false)?;
            store.check_not_truncating()?;

            let policy = MatchPolicy {
                mtime: true,
                atime: include_atime,
                ctime: include_ctime,
                mode: true,
                owner: !exclude_owner,
                group: !exclude_group,
            };
            analyze::analyze(&store, &paths, policy)
        }

        Command::Describe {
            paths,
            directory,
            all,
            limit,
            sort_by,
            sort_children,
            keep_input_order,
            bytes,
            details,
        } => {
            let paths = if paths.is_empty() {
                vec![std::env::current_dir()?]
            } else {
                paths
            };

            let limit = if all {
                None
            } else if limit.is_some() {
                limit
            } else if details {
                None
            } else {
                Some(1)
            };

            describe::describe(
                &paths,
                DescribeOptions {
                    limit,
                    sort_by,
                    sort_children,
                    use_bytes: bytes,
                    show_details: details,
                    directory_only: directory,
                    keep_input_order,
                },
            )
        }

        Command::DiffTree {
            analyzed,
            duplicate,
            hide_content_match,
            max_depth,
            unlimited,
            show,
        } => diff_tree::diff_tree(
            &analyzed,
            &duplicate,
            DiffTreeOptions {
                hide_content_match,
                max_depth: if unlimited { None } else { Some(max_depth) },
                show,
            },
        ),

        Command::Inspect => {
            let root = locate::find_repository(repository, false)?;
            let store = Store::open(&root, false)?;
            store.check_not_truncating()?;

            let stdout = std::io::stdout();
            inspect::inspect(&store, &mut stdout.lock())
        }
    }
}

fn worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}
