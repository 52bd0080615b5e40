use thiserror::Error;

/// Error kinds that map onto the CLI exit codes.
///
/// Everything else travels as plain `anyhow` context and exits with 1.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no repository found (no .rededup directory in this or any parent directory)")]
    NotFound,

    #[error("the index is in a truncating state; run `rededup rebuild` to recover")]
    Truncating,

    #[error("{0}")]
    Config(String),

    #[error("index corrupt at key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_NO_REPOSITORY: i32 = 3;
pub const EXIT_TRUNCATING: i32 = 4;

/// Map an error chain to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RepoError>() {
        Some(RepoError::NotFound) => EXIT_NO_REPOSITORY,
        Some(RepoError::Truncating) => EXIT_TRUNCATING,
        Some(RepoError::Config(_)) => EXIT_USAGE,
        Some(RepoError::Corrupt { .. }) => EXIT_FAILURE,
        None => EXIT_FAILURE,
    }
}
