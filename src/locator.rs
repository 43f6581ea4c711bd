//! Resolves a lesson page to the direct URL of its downloadable video.
//!
//! Each lesson runs through `Navigate -> WaitForSource` and ends either
//! `Found` or `NotFound`. Pages without a source are an expected
//! outcome, so the only error that escapes is a lost browser session.

use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::browser::BrowserSession;
use crate::error::SessionError;
use crate::lessons::LessonRecord;

#[derive(Debug, Clone)]
pub struct LocatorOptions {
    /// CSS selector of the download control that marks a rendered player
    pub marker_selector: String,
    /// Text identifying the source entry inside the control
    pub source_label: String,
    /// Attribute carrying the media URL
    pub url_attribute: String,
    pub marker_timeout: Duration,
    pub poll_interval: Duration,
    /// Extra navigation attempts after the first failure
    pub navigation_retries: u32,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            marker_selector: "select.video-download-selector".to_string(),
            source_label: "source".to_string(),
            url_attribute: "value".to_string(),
            marker_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            navigation_retries: 2,
        }
    }
}

/// Why a lesson ended without a media URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    NavigationFailed(String),
    MarkerTimeout,
    NoSourceEntry,
    EmptyUrl,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::NavigationFailed(reason) => write!(f, "navigation failed: {}", reason),
            NotFoundReason::MarkerTimeout => write!(f, "download control never appeared"),
            NotFoundReason::NoSourceEntry => write!(f, "no source entry in download control"),
            NotFoundReason::EmptyUrl => write!(f, "source entry has no usable URL"),
        }
    }
}

/// Result of locating one lesson. `resolved_url == None` is a valid outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTarget {
    pub lesson: LessonRecord,
    pub resolved_url: Option<String>,
    pub miss: Option<NotFoundReason>,
}

impl MediaTarget {
    pub fn found(lesson: LessonRecord, url: String) -> Self {
        Self {
            lesson,
            resolved_url: Some(url),
            miss: None,
        }
    }

    pub fn not_found(lesson: LessonRecord, reason: NotFoundReason) -> Self {
        Self {
            lesson,
            resolved_url: None,
            miss: Some(reason),
        }
    }

    pub fn is_found(&self) -> bool {
        self.resolved_url.is_some()
    }
}

#[derive(Debug)]
enum LocateState {
    Navigate { attempt: u32 },
    /// `last_miss` is why the most recent snapshot had no usable source.
    WaitForSource {
        deadline: Instant,
        last_miss: Option<NotFoundReason>,
    },
    Found(String),
    NotFound(NotFoundReason),
}

pub struct LessonLocator {
    options: LocatorOptions,
    marker: Selector,
    option: Selector,
}

impl LessonLocator {
    pub fn new(options: LocatorOptions) -> anyhow::Result<Self> {
        let marker = Selector::parse(&options.marker_selector).map_err(|e| {
            anyhow::anyhow!("invalid marker selector '{}': {}", options.marker_selector, e)
        })?;
        let option = Selector::parse("option")
            .map_err(|e| anyhow::anyhow!("invalid option selector: {}", e))?;
        Ok(Self {
            options,
            marker,
            option,
        })
    }

    pub fn options(&self) -> &LocatorOptions {
        &self.options
    }

    /// Drive the browser to the lesson page and classify it.
    pub async fn locate<S: BrowserSession + ?Sized>(
        &self,
        session: &mut S,
        lesson: &LessonRecord,
    ) -> Result<MediaTarget, SessionError> {
        let mut state = LocateState::Navigate { attempt: 0 };

        loop {
            state = match state {
                LocateState::Navigate { attempt } => {
                    match session.navigate(&lesson.source_ref).await {
                        Ok(()) => LocateState::WaitForSource {
                            deadline: Instant::now() + self.options.marker_timeout,
                            last_miss: None,
                        },
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) if attempt < self.options.navigation_retries => {
                            warn!(
                                "Navigation attempt {}/{} for '{}' failed: {}",
                                attempt + 1,
                                self.options.navigation_retries + 1,
                                lesson.name,
                                e
                            );
                            LocateState::Navigate {
                                attempt: attempt + 1,
                            }
                        }
                        Err(e) => LocateState::NotFound(NotFoundReason::NavigationFailed(
                            e.to_string(),
                        )),
                    }
                }
                LocateState::WaitForSource {
                    deadline,
                    mut last_miss,
                } => {
                    let mut found = None;
                    match session.page_html().await {
                        Ok(html) if self.has_marker(&html) => match self.extract_source(&html) {
                            Ok(url) => found = Some(url),
                            // The control may still be filling in its entries.
                            Err(reason) => last_miss = Some(reason),
                        },
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => debug!("Could not read page for '{}': {}", lesson.name, e),
                    }

                    if let Some(url) = found {
                        LocateState::Found(url)
                    } else if Instant::now() >= deadline {
                        LocateState::NotFound(last_miss.unwrap_or(NotFoundReason::MarkerTimeout))
                    } else {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        tokio::time::sleep(self.options.poll_interval.min(remaining)).await;
                        LocateState::WaitForSource {
                            deadline,
                            last_miss,
                        }
                    }
                }
                LocateState::Found(url) => {
                    debug!("Found source for '{}': {}", lesson.name, url);
                    return Ok(MediaTarget::found(lesson.clone(), url));
                }
                LocateState::NotFound(reason) => {
                    debug!("No source for '{}': {}", lesson.name, reason);
                    return Ok(MediaTarget::not_found(lesson.clone(), reason));
                }
            };
        }
    }

    fn has_marker(&self, html: &str) -> bool {
        Html::parse_document(html).select(&self.marker).next().is_some()
    }

    /// Pull the media URL out of a rendered page.
    pub fn extract_source(&self, html: &str) -> Result<String, NotFoundReason> {
        let document = Html::parse_document(html);
        let label = self.options.source_label.to_lowercase();

        let mut candidates: Vec<ElementRef> = Vec::new();
        for marker in document.select(&self.marker) {
            if marker.value().name().eq_ignore_ascii_case("select") {
                candidates.extend(marker.select(&self.option));
            } else {
                candidates.push(marker);
            }
        }

        let entry = candidates
            .into_iter()
            .find(|el| {
                label.is_empty() || el.text().collect::<String>().to_lowercase().contains(&label)
            })
            .ok_or(NotFoundReason::NoSourceEntry)?;

        let url = entry
            .value()
            .attr(&self.options.url_attribute)
            .map(str::trim)
            .unwrap_or_default();

        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url.to_string())
        } else {
            Err(NotFoundReason::EmptyUrl)
        }
    }
}
