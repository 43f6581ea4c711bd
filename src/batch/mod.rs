pub mod report;

pub use report::{BatchReport, BatchSummary, save_broken_csv, write_broken_csv};

use chrono::Local;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SessionHandle};
use crate::download::{MediaTransfer, SkipReason, TransferOutcome, TransferRequest};
use crate::error::BatchError;
use crate::layout::DestinationLayout;
use crate::lessons::{LessonEntry, LessonRecord, Selection};
use crate::locator::{LessonLocator, MediaTarget};

pub const SOURCE_NOT_FOUND: &str = "source not found";

/// Per-lesson milestones, for whoever is drawing the terminal.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    LessonStarted {
        index: usize,
        total: usize,
        entry: LessonEntry,
    },
    SourceMissing {
        entry: LessonEntry,
        reason: String,
    },
    LessonFinished {
        index: usize,
        outcome: TransferOutcome,
    },
}

/// Shared flag the operator can raise to stop between lessons.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs lessons one at a time through locate then transfer.
///
/// Sequential on purpose: the browser has one working tab and two pages
/// loading at once would mix up extraction.
pub struct BatchOrchestrator<T, L> {
    locator: LessonLocator,
    transfer: T,
    layout: L,
    send_referer: bool,
    stop: StopSignal,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
}

impl<T: MediaTransfer, L: DestinationLayout> BatchOrchestrator<T, L> {
    pub fn new(locator: LessonLocator, transfer: T, layout: L) -> Self {
        Self {
            locator,
            transfer,
            layout,
            send_referer: true,
            stop: StopSignal::new(),
            events: None,
        }
    }

    pub fn with_referer(mut self, send_referer: bool) -> Self {
        self.send_referer = send_referer;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    /// Process every selected lesson. Only a lost browser session aborts the
    /// run; everything else is recorded in the report.
    pub async fn run<S: BrowserSession>(
        &self,
        session: &mut SessionHandle<S>,
        lessons: &[LessonRecord],
        selection: &Selection,
    ) -> Result<BatchReport, BatchError> {
        let started_at = Local::now();
        let entries = selection.apply(lessons);
        let total = entries.len();
        debug!("Starting batch of {} lessons", total);

        let mut outcomes = Vec::with_capacity(total);
        let mut not_found = Vec::new();

        let mut pending = entries.into_iter().enumerate();
        while let Some((index, entry)) = pending.next() {
            if self.stop.is_raised() {
                outcomes.push(TransferOutcome::skipped(entry.lesson, SkipReason::Interrupted));
                continue;
            }

            self.emit(BatchEvent::LessonStarted {
                index,
                total,
                entry: entry.clone(),
            });
            debug!(
                "[{}/{}] {} ({})",
                index + 1,
                total,
                entry.lesson,
                entry.lesson.source_ref
            );

            let target = match locate_entry(&self.locator, session.browser_mut(), &entry).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("Browser session lost at {}; {} lessons finished", entry.lesson, outcomes.len());
                    outcomes.extend(
                        std::iter::once(entry)
                            .chain(pending.map(|(_, rest)| rest))
                            .map(|rest| TransferOutcome::skipped(rest.lesson, SkipReason::Interrupted)),
                    );
                    return Err(e.with_partial(BatchReport::new(outcomes, not_found, started_at)));
                }
            };

            let outcome = match target.resolved_url {
                Some(media_url) => {
                    let destination = self.layout.destination(&entry, &media_url);
                    let mut request = TransferRequest::new(entry.lesson.clone(), media_url, destination);
                    if self.send_referer {
                        request = request.with_referer(entry.lesson.source_ref.clone());
                    }
                    self.transfer.transfer(request).await
                }
                None => {
                    let reason = target.miss.map(|m| m.to_string()).unwrap_or_default();
                    self.emit(BatchEvent::SourceMissing {
                        entry: entry.clone(),
                        reason,
                    });
                    not_found.push(entry.lesson.clone());
                    TransferOutcome::failed(entry.lesson, SOURCE_NOT_FOUND)
                }
            };

            self.emit(BatchEvent::LessonFinished {
                index,
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);
        }

        if self.stop.is_raised() {
            warn!("Batch interrupted; remaining lessons were not processed");
        }

        let report = BatchReport::new(outcomes, not_found, started_at);
        let summary = report.summary();
        debug!(
            "Batch finished: {} downloaded, {} already present, {} failed ({} without source)",
            summary.succeeded, summary.already_present, summary.failed, summary.not_found
        );
        Ok(report)
    }
}

/// Locate-only pass that lists lessons whose page has no media source.
pub struct BrokenSourceReporter {
    locator: LessonLocator,
    stop: StopSignal,
}

impl BrokenSourceReporter {
    pub fn new(locator: LessonLocator) -> Self {
        Self {
            locator,
            stop: StopSignal::new(),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub async fn report<S: BrowserSession>(
        &self,
        session: &mut SessionHandle<S>,
        lessons: &[LessonRecord],
        selection: &Selection,
    ) -> Result<Vec<LessonEntry>, BatchError> {
        let entries = selection.apply(lessons);
        let total = entries.len();
        let mut broken = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            if self.stop.is_raised() {
                warn!("Scan interrupted after {} of {} lessons", index, total);
                break;
            }
            info!("[{}/{}] Checking {}", index + 1, total, entry.lesson);

            let target = locate_entry(&self.locator, session.browser_mut(), &entry).await?;
            if !target.is_found() {
                warn!("Row {}: no source for {}", entry.sheet_row(), entry.lesson.source_ref);
                broken.push(entry);
            }
        }

        info!("Found {} lessons without a source", broken.len());
        Ok(broken)
    }
}

async fn locate_entry<S: BrowserSession>(
    locator: &LessonLocator,
    browser: &mut S,
    entry: &LessonEntry,
) -> Result<MediaTarget, BatchError> {
    locator
        .locate(browser, &entry.lesson)
        .await
        .map_err(BatchError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::SessionCookie;
    use crate::error::SessionError;
    use crate::download::TransferStatus;
    use crate::locator::LocatorOptions;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    const PLAYER: &str = r#"<select class="video-download-selector"><option value="https://cdn.test/{}.mp4">Source</option></select>"#;

    #[derive(Default)]
    struct FakeBrowser {
        pages: HashMap<String, String>,
        dies_at: Option<String>,
        current: Option<String>,
        visited: Vec<String>,
    }

    impl FakeBrowser {
        fn with_lessons(lessons: &[LessonRecord], missing: &[&str]) -> Self {
            let mut browser = Self::default();
            for lesson in lessons {
                let html = if missing.contains(&lesson.name.as_str()) {
                    "<p>gone</p>".to_string()
                } else {
                    PLAYER.replace("{}", &lesson.name.to_lowercase())
                };
                browser.pages.insert(lesson.source_ref.clone(), html);
            }
            browser
        }
    }

    #[async_trait]
    impl BrowserSession for FakeBrowser {
        async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
            if self.dies_at.as_deref() == Some(url) {
                return Err(SessionError::Unavailable("browser closed".to_string()));
            }
            self.visited.push(url.to_string());
            self.current = Some(url.to_string());
            Ok(())
        }

        async fn page_html(&self) -> Result<String, SessionError> {
            Ok(self
                .current
                .as_ref()
                .and_then(|u| self.pages.get(u))
                .cloned()
                .unwrap_or_default())
        }

        async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError> {
            Ok(vec![SessionCookie::new("session", "s3cret", "site.test", "/")])
        }
    }

    /// Pretends files named in `existing` are already on disk.
    #[derive(Default)]
    struct FakeTransfer {
        existing: HashSet<PathBuf>,
        fail: HashSet<String>,
        requests: Mutex<Vec<TransferRequest>>,
    }

    #[async_trait]
    impl MediaTransfer for FakeTransfer {
        async fn transfer(&self, request: TransferRequest) -> TransferOutcome {
            self.requests.lock().unwrap().push(request.clone());
            if self.existing.contains(&request.destination) {
                TransferOutcome::skipped(request.lesson, SkipReason::AlreadyExists)
            } else if self.fail.contains(&request.lesson.name) {
                TransferOutcome::failed(request.lesson, "HTTP 500 Internal Server Error")
            } else {
                TransferOutcome::success(request.lesson, 100)
            }
        }
    }

    struct FlatLayout;

    impl DestinationLayout for FlatLayout {
        fn destination(&self, entry: &LessonEntry, _media_url: &str) -> PathBuf {
            PathBuf::from(format!("/out/{}.mp4", entry.lesson.name))
        }
    }

    fn locator() -> LessonLocator {
        LessonLocator::new(LocatorOptions {
            marker_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        })
        .unwrap()
    }

    fn example_lessons() -> Vec<LessonRecord> {
        vec![
            LessonRecord::new(1, "Intro", "https://site.test/intro"),
            LessonRecord::new(1, "Setup", "https://site.test/setup"),
            LessonRecord::new(2, "Basics", "https://site.test/basics"),
        ]
    }

    async fn handle(browser: FakeBrowser) -> SessionHandle<FakeBrowser> {
        SessionHandle::bridge(browser, &[]).await.unwrap()
    }

    #[tokio::test]
    async fn test_example_batch() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &["Setup"])).await;
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout);

        let report = orchestrator.run(&mut session, &lessons, &Selection::all()).await.unwrap();

        let statuses: Vec<TransferStatus> = report.outcomes().iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Success,
                TransferStatus::Failed(SOURCE_NOT_FOUND.to_string()),
                TransferStatus::Success,
            ]
        );
        assert_eq!(report.not_found(), &[lessons[1].clone()]);
        assert!(!report.is_complete());

        let requests = orchestrator.transfer.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].media_url, "https://cdn.test/intro.mp4");
        assert_eq!(requests[0].referer.as_deref(), Some("https://site.test/intro"));
        assert_eq!(requests[1].destination, PathBuf::from("/out/Basics.mp4"));
    }

    #[tokio::test]
    async fn test_report_covers_every_selected_lesson() {
        let lessons: Vec<LessonRecord> = (1..=8)
            .flat_map(|c| {
                (0..2).map(move |i| {
                    LessonRecord::new(c, format!("L{}x{}", c, i), format!("https://site.test/{}/{}", c, i))
                })
            })
            .collect();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &["L3x1", "L5x0"])).await;
        let mut transfer = FakeTransfer::default();
        transfer.fail.insert("L4x0".to_string());
        let orchestrator = BatchOrchestrator::new(locator(), transfer, FlatLayout);

        let selections = [
            Selection::all(),
            Selection::all().with_chapters(crate::lessons::ChapterRange::new(2, 4)),
            Selection::all().skipping(5),
            Selection::all().skipping(16),
        ];
        for selection in &selections {
            let expected: Vec<LessonRecord> =
                selection.apply(&lessons).into_iter().map(|e| e.lesson).collect();
            let report = orchestrator.run(&mut session, &lessons, selection).await.unwrap();
            let reported: Vec<LessonRecord> =
                report.outcomes().iter().map(|o| o.lesson.clone()).collect();
            assert_eq!(reported, expected);
        }
    }

    #[tokio::test]
    async fn test_chapter_range_selection() {
        let lessons: Vec<LessonRecord> = (1..=8)
            .map(|c| LessonRecord::new(c, format!("Ch{}", c), format!("https://site.test/{}", c)))
            .collect();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &[])).await;
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout);

        let selection = Selection::all().with_chapters(crate::lessons::ChapterRange::new(2, 4));
        let report = orchestrator.run(&mut session, &lessons, &selection).await.unwrap();

        let chapters: Vec<u32> = report.outcomes().iter().map(|o| o.lesson.chapter_index).collect();
        assert_eq!(chapters, vec![2, 3, 4]);
        assert_eq!(
            session.browser().visited,
            vec!["https://site.test/2", "https://site.test/3", "https://site.test/4"]
        );
    }

    #[tokio::test]
    async fn test_skip_beyond_end_is_empty_report() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &[])).await;
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout);

        let report = orchestrator
            .run(&mut session, &lessons, &Selection::all().skipping(3))
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(report.is_complete());
        assert!(session.browser().visited.is_empty());
    }

    #[tokio::test]
    async fn test_rerun_skips_completed_lessons() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &[])).await;
        let mut transfer = FakeTransfer::default();
        transfer.existing.insert(PathBuf::from("/out/Intro.mp4"));
        let orchestrator = BatchOrchestrator::new(locator(), transfer, FlatLayout);

        let report = orchestrator.run(&mut session, &lessons, &Selection::all()).await.unwrap();
        assert_eq!(
            report.outcomes()[0].status,
            TransferStatus::Skipped(SkipReason::AlreadyExists)
        );
        assert!(report.is_complete());
        assert_eq!(report.summary().already_present, 1);
        assert_eq!(report.summary().succeeded, 2);
    }

    #[tokio::test]
    async fn test_session_loss_aborts_run() {
        let lessons = example_lessons();
        let mut browser = FakeBrowser::with_lessons(&lessons, &[]);
        browser.dies_at = Some("https://site.test/setup".to_string());
        let mut session = handle(browser).await;
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout);

        let err = orchestrator
            .run(&mut session, &lessons, &Selection::all())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "browser session unavailable: browser closed");
        assert_eq!(orchestrator.transfer.requests.lock().unwrap().len(), 1);

        let partial = err.partial_report().expect("finished lessons are kept");
        let statuses: Vec<TransferStatus> = partial.outcomes().iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Success,
                TransferStatus::Skipped(SkipReason::Interrupted),
                TransferStatus::Skipped(SkipReason::Interrupted),
            ]
        );
        assert_eq!(partial.outcomes()[0].lesson, lessons[0]);
        assert_eq!(partial.summary().interrupted, 2);
        assert!(!partial.is_complete());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lesson_progress_stays_below_info() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &[])).await;
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout);
        let report = orchestrator.run(&mut session, &lessons, &Selection::all()).await.unwrap();
        assert!(report.is_complete());

        let output = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        for lesson in &lessons {
            assert!(!output.contains(&lesson.name), "{}", output);
        }
    }

    #[tokio::test]
    async fn test_stop_signal_marks_remaining_interrupted() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &[])).await;
        let stop = StopSignal::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout)
            .with_stop_signal(stop.clone())
            .with_events(tx);

        stop.raise();
        let report = orchestrator.run(&mut session, &lessons, &Selection::all()).await.unwrap();

        assert_eq!(report.len(), 3);
        assert!(
            report
                .outcomes()
                .iter()
                .all(|o| o.status == TransferStatus::Skipped(SkipReason::Interrupted))
        );
        assert_eq!(report.summary().incomplete(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &["Setup"])).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator =
            BatchOrchestrator::new(locator(), FakeTransfer::default(), FlatLayout).with_events(tx);

        orchestrator.run(&mut session, &lessons, &Selection::all()).await.unwrap();
        drop(orchestrator);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                BatchEvent::LessonStarted { .. } => "start",
                BatchEvent::SourceMissing { .. } => "missing",
                BatchEvent::LessonFinished { .. } => "finish",
            });
        }
        assert_eq!(
            kinds,
            vec!["start", "finish", "start", "missing", "finish", "start", "finish"]
        );
    }

    #[tokio::test]
    async fn test_broken_source_reporter() {
        let lessons = example_lessons();
        let mut session = handle(FakeBrowser::with_lessons(&lessons, &["Setup"])).await;
        let reporter = BrokenSourceReporter::new(locator());

        let broken = reporter.report(&mut session, &lessons, &Selection::all()).await.unwrap();
        let records: Vec<LessonRecord> = broken.iter().map(|e| e.lesson.clone()).collect();
        assert_eq!(records, vec![lessons[1].clone()]);
        assert_eq!(broken[0].sheet_row(), 3);
    }
}
