use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("malformed patch: {message}")]
    MalformedPatch { message: String, fragment: String },

    #[error("unsupported change in {path}: {reason}")]
    UnsupportedChangeKind { path: String, reason: String },

    #[error("cannot apply hunk #{hunk} to {path}\n{hunk_text}")]
    HunkApplicationFailure {
        path: PathBuf,
        hunk: usize,
        hunk_text: String,
    },

    #[error("cannot apply change to {path}: {reason}")]
    TargetConflict { path: PathBuf, reason: String },

    #[error("patch file {patch_filename} has changed since it was applied (expected {expected}, found {actual})")]
    IntegrityMismatch {
        patch_filename: String,
        expected: String,
        actual: String,
    },

    #[error("patch file {0} was deleted since it was applied")]
    MissingPatchFile(String),

    #[error("invalid patch series for {path_specifier}: {reason}")]
    InvalidSeries {
        path_specifier: String,
        reason: String,
    },

    #[error("failed to reapply {patch_filename} while finishing a rebase")]
    RebaseIncomplete { patch_filename: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state document {path:?}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        PatchError::MalformedPatch {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}

pub type PatchResult<T> = Result<T, PatchError>;
