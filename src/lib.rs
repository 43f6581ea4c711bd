pub mod batch;
pub mod browser;
pub mod config;
pub mod download;
pub mod error;
pub mod layout;
pub mod lessons;
pub mod locator;

// Re-export commonly used types for easier access in tests
pub use batch::{BatchEvent, BatchOrchestrator, BatchReport, BrokenSourceReporter, StopSignal};
pub use browser::{BrowserSession, ChromeSession, CookieSet, SessionCookie, SessionHandle};
pub use config::ConfigManager;
pub use download::{
    DownloadProgress, MediaTransfer, SkipReason, TransferEngine, TransferOptions, TransferOutcome,
    TransferRequest, TransferStatus,
};
pub use error::{BatchError, SessionError, SheetError, TransferError};
pub use layout::{DestinationLayout, EpisodeLayout};
pub use lessons::{ChapterRange, LessonEntry, LessonRecord, Selection};
pub use locator::{LessonLocator, LocatorOptions, MediaTarget, NotFoundReason};
