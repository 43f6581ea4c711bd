use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::Cookie;
use chromiumoxide::{Handler, Page};
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrowserSession, SessionCookie};
use crate::error::SessionError;

/// Where the operator's browser exposes its DevTools protocol.
#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl DevToolsEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, navigation: Duration) -> Self {
        self.connect_timeout = connect;
        self.navigation_timeout = navigation;
        self
    }

    pub fn version_url(&self) -> String {
        format!("http://{}:{}/json/version", self.host, self.port)
    }
}

/// One working tab inside a Chrome that someone else started and logged in.
///
/// The browser process is never launched or closed from here; shutting the
/// session down only closes the tab it opened.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    closed: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromeSession {
    pub async fn connect(endpoint: &DevToolsEndpoint) -> Result<Self, SessionError> {
        let ws_url = discover_ws_url(endpoint).await?;
        debug!("Discovered DevTools endpoint: {}", ws_url);

        let (browser, handler) = tokio::time::timeout(endpoint.connect_timeout, Browser::connect(ws_url))
            .await
            .map_err(|_| {
                SessionError::Unavailable(format!(
                    "timed out connecting to browser on port {}",
                    endpoint.port
                ))
            })?
            .map_err(|e| SessionError::Unavailable(format!("browser connect failed: {}", e)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(SessionError::Unavailable(format!(
                    "could not open a working tab: {}",
                    e
                )));
            }
        };
        debug!("Opened working tab");

        Ok(Self {
            browser,
            page,
            closed,
            handler_task,
            navigation_timeout: endpoint.navigation_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the working tab and drop the protocol connection.
    pub async fn shutdown(self) {
        if !self.is_closed() {
            if let Err(e) = self.page.close().await {
                debug!("Failed to close working tab: {}", e);
            }
        }
        self.handler_task.abort();
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Unavailable("browser connection closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn protocol_error(&self, err: impl std::fmt::Display) -> SessionError {
        if self.is_closed() {
            SessionError::Unavailable(format!("browser connection closed: {}", err))
        } else {
            SessionError::Protocol(err.to_string())
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        debug!("Navigating to {}", url);

        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                self.ensure_open()?;
                Err(SessionError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => Err(SessionError::Navigation {
                url: url.to_string(),
                reason: format!(
                    "page load exceeded {}s",
                    self.navigation_timeout.as_secs()
                ),
            }),
        }
    }

    async fn page_html(&self) -> Result<String, SessionError> {
        self.ensure_open()?;
        self.page.content().await.map_err(|e| self.protocol_error(e))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError> {
        self.ensure_open()?;
        // Storage.getCookies covers the whole browser jar, not just the tab's origin.
        let cookies = self
            .browser
            .get_cookies()
            .await
            .map_err(|e| self.protocol_error(e))?;
        debug!("Browser holds {} cookies", cookies.len());

        Ok(cookies.iter().map(session_cookie).collect())
    }
}

fn session_cookie(cookie: &Cookie) -> SessionCookie {
    SessionCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        secure: cookie.secure,
    }
}

async fn discover_ws_url(endpoint: &DevToolsEndpoint) -> Result<String, SessionError> {
    let unavailable = |reason: String| {
        SessionError::Unavailable(format!(
            "no browser listening for remote debugging on {}:{} ({})",
            endpoint.host, endpoint.port, reason
        ))
    };

    let client = reqwest::Client::builder()
        .timeout(endpoint.connect_timeout)
        .build()
        .map_err(|e| unavailable(e.to_string()))?;

    let json: serde_json::Value = client
        .get(endpoint.version_url())
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?
        .json()
        .await
        .map_err(|e| unavailable(format!("unexpected /json/version response: {}", e)))?;

    json["webSocketDebuggerUrl"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| unavailable("no webSocketDebuggerUrl in /json/version".to_string()))
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("DevTools handler event error: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}
