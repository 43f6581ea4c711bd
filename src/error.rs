use thiserror::Error;

use crate::batch::BatchReport;

/// Failures reported by a browser session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The browser cannot be reached or has gone away. Fatal for a batch.
    #[error("browser session unavailable: {0}")]
    Unavailable(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Unavailable(_))
    }
}

/// The only failure that crosses the batch boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// `partial` holds the lessons finished before the session went away.
    #[error("browser session unavailable: {reason}")]
    SessionUnavailable {
        reason: String,
        partial: Option<Box<BatchReport>>,
    },
}

impl BatchError {
    pub fn with_partial(self, report: BatchReport) -> Self {
        match self {
            BatchError::SessionUnavailable { reason, .. } => BatchError::SessionUnavailable {
                reason,
                partial: Some(Box::new(report)),
            },
        }
    }

    pub fn partial_report(&self) -> Option<&BatchReport> {
        match self {
            BatchError::SessionUnavailable { partial, .. } => partial.as_deref(),
        }
    }
}

impl From<SessionError> for BatchError {
    fn from(err: SessionError) -> Self {
        let reason = match err {
            SessionError::Unavailable(reason) => reason,
            other => other.to_string(),
        };
        BatchError::SessionUnavailable {
            reason,
            partial: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no data received for {0} seconds")]
    Stalled(u64),
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("sheet is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error("failed to read sheet: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
