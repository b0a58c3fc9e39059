//! Best-effort results: a value plus the warnings collected while producing it

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;

/// Longest cause text kept on a warning
const MAX_WARNING_MESSAGE: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Timeout,
    Unavailable,
    AccessDenied,
    Failed,
    Skipped,
    Cancelled,
}

/// One degraded sub-item: who degraded and an abbreviated cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub source: String,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(source: impl Into<String>, kind: WarningKind, message: impl AsRef<str>) -> Self {
        Self {
            source: source.into(),
            kind,
            message: abbreviate(message.as_ref()),
        }
    }

    pub fn from_error(source: impl Into<String>, err: &KeeperError) -> Self {
        Self::new(source, err.warning_kind(), err.to_string())
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.source, self.kind, self.message)
    }
}

/// Truncate on a char boundary so multi-byte titles never split
pub fn abbreviate(message: &str) -> String {
    let single_line = message.lines().next().unwrap_or("").trim();
    if single_line.chars().count() <= MAX_WARNING_MESSAGE {
        return single_line.to_string();
    }
    let mut out: String = single_line.chars().take(MAX_WARNING_MESSAGE - 3).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
    pub status: OutcomeStatus,
}

impl<T> Outcome<T> {
    /// Status follows the warnings: none means Success, any means Partial
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        let status = if warnings.is_empty() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Partial
        };
        Self {
            value,
            warnings,
            status,
        }
    }

    pub fn with_status(value: T, warnings: Vec<Warning>, status: OutcomeStatus) -> Self {
        Self {
            value,
            warnings,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
            status: self.status,
        }
    }
}
