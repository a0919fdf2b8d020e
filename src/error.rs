//! Error taxonomy for a sweep run.

use std::io;
use std::path::{Path, PathBuf};

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SweepError>;

/// Every failure a sweep can report. Any of these ends the run.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// Invalid root, threshold, category table or config file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A file or directory could not be read, written, renamed or removed.
    /// `path` is the artifact being processed; `target` is the staging file,
    /// archive or directory the failing call touched, when that differs.
    #[error("cannot access {}{}: {source}", .path.display(), describe_target(.target))]
    Access {
        path: PathBuf,
        target: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// The encoder failed, or the written archive did not decode to the original bytes.
    #[error("compression of {} failed: {message}", .path.display())]
    Compression { path: PathBuf, message: String },

    /// Another sweep currently holds the root lock.
    #[error("archive root is locked by another sweep ({})", .path.display())]
    Locked { path: PathBuf },
}

impl SweepError {
    pub fn config(message: impl Into<String>) -> Self {
        SweepError::Configuration(message.into())
    }

    pub fn access(path: &Path, source: io::Error) -> Self {
        SweepError::Access {
            path: path.to_path_buf(),
            target: None,
            source,
        }
    }

    /// Access failure on `target` while processing the artifact at `path`.
    pub fn access_via(path: &Path, target: &Path, source: io::Error) -> Self {
        SweepError::Access {
            path: path.to_path_buf(),
            target: (target != path).then(|| target.to_path_buf()),
            source,
        }
    }

    pub fn compression(path: &Path, message: impl Into<String>) -> Self {
        SweepError::Compression {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// The file the error is about, if it concerns one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SweepError::Configuration(_) => None,
            SweepError::Access { path, .. }
            | SweepError::Compression { path, .. }
            | SweepError::Locked { path } => Some(path),
        }
    }

    /// The secondary path an access error touched, if any.
    pub fn target(&self) -> Option<&Path> {
        match self {
            SweepError::Access { target, .. } => target.as_deref(),
            _ => None,
        }
    }
}

fn describe_target(target: &Option<PathBuf>) -> String {
    match target {
        Some(target) => format!(" (via {})", target.display()),
        None => String::new(),
    }
}
