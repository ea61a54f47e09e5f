use thiserror::Error;

/// Errors reported by file system operations.
///
/// Every variant is a recoverable outcome. An operation that fails leaves the block pool, the
/// registry and the directory tree as they were before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file, directory, descriptor or handle: {0}")]
    NotFound(String),
    #[error("name already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("capacity exceeded (limit {0})")]
    CapacityExceeded(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("wrong kind of descriptor: {0}")]
    WrongKind(String),
    #[error("not enough free blocks (requested {requested}, {available} free)")]
    Exhausted { requested: usize, available: usize },
    #[error("directory is not empty: {0}")]
    NotEmpty(String),
    #[error("too many levels of symbolic links: {0}")]
    TooManyRedirections(String),
    #[error("corrupt file system: {0}")]
    Corrupt(String),
}

pub type Result<T, E = FsError> = std::result::Result<T, E>;
