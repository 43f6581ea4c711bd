pub mod engine;
pub mod progress;

pub use engine::{TransferEngine, TransferOptions, part_path_for};
pub use progress::{DownloadProgress, ProgressTracker};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

use crate::lessons::LessonRecord;

/// One media file to fetch for one lesson.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub lesson: LessonRecord,
    pub media_url: String,
    pub destination: PathBuf,
    pub referer: Option<String>,
}

impl TransferRequest {
    pub fn new(lesson: LessonRecord, media_url: String, destination: PathBuf) -> Self {
        Self {
            lesson,
            media_url,
            destination,
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: String) -> Self {
        self.referer = Some(referer);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyExists,
    Interrupted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists => write!(f, "already exists"),
            SkipReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Skipped(SkipReason),
    Failed(String),
}

impl TransferStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TransferStatus::Success => "success",
            TransferStatus::Skipped(_) => "skipped",
            TransferStatus::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            TransferStatus::Success => String::new(),
            TransferStatus::Skipped(reason) => reason.to_string(),
            TransferStatus::Failed(reason) => reason.clone(),
        }
    }

    /// True when the lesson's file is on disk after this run.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            TransferStatus::Success | TransferStatus::Skipped(SkipReason::AlreadyExists)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub lesson: LessonRecord,
    pub status: TransferStatus,
    pub bytes_written: u64,
}

impl TransferOutcome {
    pub fn success(lesson: LessonRecord, bytes_written: u64) -> Self {
        Self {
            lesson,
            status: TransferStatus::Success,
            bytes_written,
        }
    }

    pub fn skipped(lesson: LessonRecord, reason: SkipReason) -> Self {
        Self {
            lesson,
            status: TransferStatus::Skipped(reason),
            bytes_written: 0,
        }
    }

    pub fn failed(lesson: LessonRecord, reason: impl Into<String>) -> Self {
        Self {
            lesson,
            status: TransferStatus::Failed(reason.into()),
            bytes_written: 0,
        }
    }
}

/// Fetches one media file to disk. Never fails as a call: every problem is
/// reported through the returned outcome.
#[async_trait]
pub trait MediaTransfer: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> TransferOutcome;
}
