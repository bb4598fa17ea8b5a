//! Typed failures that callers need to tell apart

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PagesError {
    /// Device nodes, sockets and FIFOs cannot be published
    #[error("cannot add {}: not a regular file, directory or symlink", .0.display())]
    UnsupportedFileType(PathBuf),

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid site URL: {0}")]
    InvalidUrl(String),

    #[error("server asked for missing blobs but listed none")]
    EmptyNegotiation,

    #[error("malformed blob hash in server response: {0:?}")]
    MalformedHash(String),

    #[error("server still missing blobs after {0} rounds")]
    TooManyRounds(u32),
}
