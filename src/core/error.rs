//! Error types for isofetch
//!
//! Every failure the download engine can report is a variant of [`Error`].
//! Some of them (stale or corrupt checkpoints, a disabled URL cache) are
//! absorbed inside the engine and turned into a fallback path; the rest are
//! returned to the caller with all partial state left on disk.

use std::fmt;
use std::path::PathBuf;

/// Main error type for isofetch operations
#[derive(Debug)]
pub enum Error {
    /// DNS, connect, TLS or mid-stream failure. Retryable by re-invoking
    /// the whole operation.
    Transport(String),

    /// The final response of a request carried a non-success status
    HttpStatus { url: String, status: u16 },

    /// Every mirror candidate failed probing
    NoReachableUrl {
        tried: usize,
        last: Option<Box<Error>>,
    },

    /// Remote content no longer matches the checkpoint
    StaleCheckpoint { url: String },

    /// The persisted checkpoint could not be parsed
    CorruptCheckpoint { path: PathBuf, reason: String },

    /// No remote URL cache is configured
    CacheDisabled,

    /// The stream ended before the expected number of bytes arrived
    ShortTransfer { expected: u64, received: u64 },

    /// Promoting the partial file to its destination failed
    FinalizeFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// Caller-requested cancellation
    Cancelled,

    /// File I/O error
    IoError(std::io::Error),

    /// Invalid configuration or parameters
    InvalidInput(String),
}

impl Error {
    /// Whether re-invoking the whole operation later can pick up where
    /// this attempt stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ShortTransfer { .. } | Error::IoError(_)
        )
    }

    /// Whether this is a rename that failed because source and destination
    /// live on different filesystems.
    pub fn is_cross_device(&self) -> bool {
        match self {
            Error::FinalizeFailed { source, .. } => source.raw_os_error() == Some(libc::EXDEV),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(msg) => write!(f, "Network error: {msg}"),
            Error::HttpStatus { url, status } => {
                if *status == 404 {
                    write!(f, "Not found (404): {url}")
                } else {
                    write!(f, "HTTP error {status}: {url}")
                }
            }
            Error::NoReachableUrl { tried, last } => match last {
                Some(last) => write!(f, "No reachable download URL ({tried} tried), last error: {last}"),
                None => write!(f, "No reachable download URL ({tried} tried)"),
            },
            Error::StaleCheckpoint { url } => {
                write!(f, "Checkpoint no longer matches remote content: {url}")
            }
            Error::CorruptCheckpoint { path, reason } => {
                write!(f, "Unreadable checkpoint {}: {reason}", path.display())
            }
            Error::CacheDisabled => write!(f, "Remote URL cache is disabled"),
            Error::ShortTransfer { expected, received } => {
                write!(f, "Transfer ended early: {received} of {expected} bytes")
            }
            Error::FinalizeFailed { from, to, source } => write!(
                f,
                "Failed to move {} to {}: {source}",
                from.display(),
                to.display()
            ),
            Error::Cancelled => write!(f, "Download cancelled"),
            Error::IoError(err) => write!(f, "I/O error: {err}"),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::FinalizeFailed { source, .. } => Some(source),
            Error::NoReachableUrl { last: Some(last), .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => Error::Transport(err.to_string()),
        }
    }
}

/// Convenience result type for isofetch operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resumable_classification() {
        assert!(Error::Transport("reset".into()).is_resumable());
        assert!(Error::ShortTransfer { expected: 10, received: 4 }.is_resumable());
        assert!(!Error::CacheDisabled.is_resumable());
        assert!(!Error::NoReachableUrl { tried: 3, last: None }.is_resumable());
        assert!(!Error::Cancelled.is_resumable());
    }

    #[test]
    fn test_cross_device_detection() {
        let exdev = Error::FinalizeFailed {
            from: "a.part".into(),
            to: "/mnt/b".into(),
            source: std::io::Error::from_raw_os_error(libc::EXDEV),
        };
        assert!(exdev.is_cross_device());

        let denied = Error::FinalizeFailed {
            from: "a.part".into(),
            to: "/root/b".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!denied.is_cross_device());
    }

    #[test]
    fn test_no_reachable_url_reports_last_error() {
        let err = Error::NoReachableUrl {
            tried: 2,
            last: Some(Box::new(Error::HttpStatus {
                url: "https://mirror.example/a.iso".into(),
                status: 404,
            })),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 tried"));
        assert!(msg.contains("Not found (404)"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
