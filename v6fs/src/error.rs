use thiserror::Error;

/// Errors reported to callers.
///
/// Invariant violations (double free, exhausted tables, lock misuse,
/// corrupt metadata reached through a valid cache slot) are not errors;
/// they panic with a tagged message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("offset out of range")]
    InvalidOffset,
    #[error("name already exists")]
    AlreadyExists,
    #[error("no such device")]
    NoDevice,
}
