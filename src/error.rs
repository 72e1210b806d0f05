//! Error types for zipstream

use std::io;
use std::path::PathBuf;

/// Result type for zipstream operations
pub type Result<T> = std::result::Result<T, ZipStreamError>;

/// Error types that can occur while building, streaming or reading archives
#[derive(Debug)]
pub enum ZipStreamError {
    /// I/O error (file read, sink write, client disconnect)
    Io(io::Error),
    /// Invalid ZIP format or structure
    InvalidFormat(String),
    /// Entry not found in ZIP archive
    EntryNotFound(String),
    /// Unsupported compression method
    UnsupportedCompression(u16),
    /// Source directory does not exist
    SourceNotFound(PathBuf),
    /// Source path exists but is not a directory
    NotADirectory(PathBuf),
    /// Directory walk failed (dangling symlink, loop, unreadable entry)
    Traversal(String),
    /// Illegal archive state transition
    InvalidState {
        from: &'static str,
        to: &'static str,
    },
}

impl ZipStreamError {
    /// True when the error means the receiving side of the sink went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ZipStreamError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            )
        )
    }
}

impl std::fmt::Display for ZipStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipStreamError::Io(e) => write!(f, "I/O error: {}", e),
            ZipStreamError::InvalidFormat(msg) => write!(f, "Invalid ZIP format: {}", msg),
            ZipStreamError::EntryNotFound(name) => write!(f, "Entry not found: {}", name),
            ZipStreamError::UnsupportedCompression(method) => {
                write!(f, "Unsupported compression method: {}", method)
            }
            ZipStreamError::SourceNotFound(path) => {
                write!(f, "Source directory not found: {}", path.display())
            }
            ZipStreamError::NotADirectory(path) => {
                write!(f, "Source path is not a directory: {}", path.display())
            }
            ZipStreamError::Traversal(msg) => write!(f, "Directory traversal failed: {}", msg),
            ZipStreamError::InvalidState { from, to } => {
                write!(f, "Invalid archive state transition: {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for ZipStreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ZipStreamError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ZipStreamError {
    fn from(err: io::Error) -> Self {
        ZipStreamError::Io(err)
    }
}

impl From<walkdir::Error> for ZipStreamError {
    fn from(err: walkdir::Error) -> Self {
        ZipStreamError::Traversal(err.to_string())
    }
}
