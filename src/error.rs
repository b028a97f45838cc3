//! Error taxonomy shared by all filesystem operations.

use std::io;

use thiserror::Error;

/// Convenient result alias used by all filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors produced by filesystem operations.
///
/// Each variant corresponds to one failure kind observable through the public
/// surface; the carried strings are display-form paths or human-readable
/// detail, never load-bearing data.
#[derive(Debug, Error)]
pub enum FsError {
    /// A lookup named a missing entry or a root that is not configured.
    #[error("no such file or directory: {0}")]
    NoSuchFile(String),

    /// An intermediate path component resolved to a non-directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A create operation named an entry that already exists.
    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    /// A directory delete or replace named a non-empty directory.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A symbolic link chain exceeded the resolution bound.
    #[error("too many levels of symbolic links: {0}")]
    SymlinkLoop(String),

    /// The operation contradicts the file mode or filesystem flags.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A mutating operation was attempted on a read-only target.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// Malformed input: bad attribute key, wrong value type, relative path
    /// where an absolute one is required, and similar caller mistakes.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The attribute or view is not supported, or the attribute cannot be
    /// set in the requested context.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The channel has been closed.
    #[error("channel is closed")]
    ClosedChannel,

    /// The filesystem has been closed.
    #[error("filesystem is closed")]
    ClosedFileSystem,

    /// The watch service has been closed.
    #[error("watch service is closed")]
    ClosedWatchService,

    /// A read was attempted on a channel opened without READ.
    #[error("channel is not open for reading")]
    NonReadable,

    /// A write was attempted on a channel opened without WRITE.
    #[error("channel is not open for writing")]
    NonWritable,

    /// The blocked operation was interrupted; the channel is now closed.
    #[error("interrupted while blocked; channel closed")]
    ClosedByInterrupt,

    /// The channel was closed by another thread while this operation was
    /// blocked on it.
    #[error("channel closed asynchronously by another thread")]
    AsynchronousClose,

    /// The disk cannot satisfy a block allocation request.
    #[error("out of disk space")]
    NoSpace,

    /// A glob or regex pattern failed to parse.
    #[error("pattern syntax error near index {index}: {message}")]
    PatternSyntax {
        /// Description of what went wrong.
        message: String,
        /// Offset into the pattern where parsing failed.
        index: usize,
    },

    /// Failures collected while closing the filesystem's open resources; the
    /// first failure is primary, the rest ride along as suppressed.
    #[error("errors while closing filesystem: {primary}")]
    CloseSuppressed {
        /// The first close failure observed.
        primary: Box<FsError>,
        /// Every later failure from the same close cascade.
        suppressed: Vec<FsError>,
    },

    /// An I/O failure surfaced by an external byte source or sink during a
    /// content transfer.
    #[error("transfer I/O error")]
    Io(#[from] io::Error),
}

impl FsError {
    pub(crate) fn no_such_file(path: impl Into<String>) -> Self {
        FsError::NoSuchFile(path.into())
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        FsError::IllegalArgument(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        FsError::UnsupportedOperation(message.into())
    }
}

impl From<FsError> for io::Error {
    fn from(error: FsError) -> Self {
        let kind = match &error {
            FsError::NoSuchFile(_) => io::ErrorKind::NotFound,
            FsError::FileAlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::AccessDenied(_) | FsError::ReadOnly(_) => io::ErrorKind::PermissionDenied,
            FsError::IllegalArgument(_) => io::ErrorKind::InvalidInput,
            FsError::NoSpace => io::ErrorKind::OutOfMemory,
            FsError::ClosedChannel
            | FsError::ClosedFileSystem
            | FsError::ClosedWatchService
            | FsError::AsynchronousClose => io::ErrorKind::NotConnected,
            FsError::ClosedByInterrupt => io::ErrorKind::Interrupted,
            FsError::Io(inner) => inner.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}
