use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainbakError {
    #[error("Snapshot directory already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("No usable backup chain at {path}: {source}")]
    ChainUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed chain record {path}: {reason}")]
    MalformedChainRecord { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("IO error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path escapes its root: {path}")]
    PathTraversal { path: PathBuf },

    #[error("Path is not valid UTF-8 and cannot be recorded: {path}")]
    NonUtf8Path { path: PathBuf },

    #[error("Path contains a newline and cannot be recorded: {path:?}")]
    UnrecordablePath { path: PathBuf },

    #[error("Symlink loop detected: {path}")]
    SymlinkLoop { path: PathBuf },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation interrupted by user")]
    Interrupted,

    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl ChainbakError {
    /// Create a configuration error with a custom message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error with a custom message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedChainRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach `path` to an I/O error, for use with `map_err`
    pub fn at(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::FileIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ChainbakError::Interrupted => 130,
            _ => 1,
        }
    }

    /// Provide helpful suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            ChainbakError::AlreadyExists { .. } => vec![
                "Wait a second and run the backup again".to_string(),
                "Snapshots are named by the current second; two runs in one second collide"
                    .to_string(),
            ],
            ChainbakError::ChainUnavailable { .. } => vec![
                "Run a full backup into this backup root first".to_string(),
                "Check that the full backup still exists and is readable".to_string(),
            ],
            ChainbakError::NonUtf8Path { .. } | ChainbakError::UnrecordablePath { .. } => vec![
                "Rename the file so its name can be written to the chain record".to_string(),
                "Nothing was written for this run".to_string(),
            ],
            ChainbakError::MalformedChainRecord { path, .. } => vec![format!(
                "Inspect or restore {} from another copy",
                path.display()
            )],
            ChainbakError::FileIo { source, .. } | ChainbakError::Io(source)
                if source.kind() == io::ErrorKind::PermissionDenied =>
            {
                vec![
                    "Check file permissions".to_string(),
                    "Run with appropriate privileges".to_string(),
                ]
            }
            _ => vec![],
        }
    }
}
