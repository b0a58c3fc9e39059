//! Error taxonomy shared by every Context Keeper operation
//!
//! Handler-level failures never surface as `Err` past the builder or the
//! restore orchestrator: they are converted into [`Warning`]s attached to an
//! [`Outcome`]. An `Err(KeeperError)` is fatal only to the single operation
//! that returned it.
//!
//! [`Warning`]: crate::outcome::Warning
//! [`Outcome`]: crate::outcome::Outcome

use std::io;

use crate::outcome::WarningKind;

pub type Result<T> = std::result::Result<T, KeeperError>;

#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    /// Named context or environment snapshot is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Another keep/restore already holds the context's lock
    #[error("context '{0}' is busy: another operation holds its lock")]
    Busy(String),

    /// Insufficient privilege for a system-level step
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// An external dependency (debugging endpoint, session file, OS API) is unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A persisted document could not be parsed
    #[error("corrupt document {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// A blocking call did not return within its deadline
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Context name is empty after sanitization (or otherwise unusable)
    #[error("invalid context name: {0}")]
    InvalidName(String),

    /// The user refused a confirmation gate
    #[error("declined: {0}")]
    Declined(String),

    /// The operation was cancelled before it produced anything
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KeeperError {
    pub fn corrupt(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        KeeperError::Corrupt {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify an I/O error into the taxonomy
    pub fn from_io(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => KeeperError::NotFound(format!("{}: {}", context, err)),
            io::ErrorKind::PermissionDenied => {
                KeeperError::AccessDenied(format!("{}: {}", context, err))
            }
            io::ErrorKind::TimedOut => KeeperError::TimedOut(context.to_string()),
            _ => KeeperError::Io(err),
        }
    }

    /// Warning category used when this error is downgraded to a warning
    pub fn warning_kind(&self) -> WarningKind {
        match self {
            KeeperError::TimedOut(_) => WarningKind::Timeout,
            KeeperError::AccessDenied(_) => WarningKind::AccessDenied,
            KeeperError::Unavailable(_) | KeeperError::Busy(_) => WarningKind::Unavailable,
            KeeperError::NotFound(_) => WarningKind::Skipped,
            KeeperError::Cancelled => WarningKind::Cancelled,
            _ => WarningKind::Failed,
        }
    }
}
