pub mod chrome;

pub use chrome::{ChromeSession, DevToolsEndpoint};

use async_trait::async_trait;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::SessionError;

/// Control over one page of an already-authenticated browser.
///
/// The pipeline only needs to load pages, read the rendered DOM, and copy
/// cookies out; anything that can do those three things can stand in for a
/// real browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in the working tab and wait for the page load to finish.
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Current serialized DOM of the working tab.
    async fn page_html(&self) -> Result<String, SessionError>;

    /// Every cookie currently held by the browser.
    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
}

impl SessionCookie {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            secure: false,
        }
    }

    fn bare_domain(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    /// Suffix match, the way browsers scope a cookie to a host.
    pub fn matches_domain(&self, domain: &str) -> bool {
        let wanted = domain.trim_start_matches('.').to_ascii_lowercase();
        let own = self.bare_domain().to_ascii_lowercase();
        own == wanted || own.ends_with(&format!(".{}", wanted))
    }
}

/// Transport-agnostic copy of the browser's cookie jar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    cookies: Vec<SessionCookie>,
}

impl CookieSet {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self { cookies }
    }

    /// Keep only cookies scoped to one of `domains`. An empty list keeps all.
    pub fn restricted_to(self, domains: &[String]) -> Self {
        if domains.is_empty() {
            return self;
        }
        let cookies = self
            .cookies
            .into_iter()
            .filter(|c| domains.iter().any(|d| c.matches_domain(d)))
            .collect();
        Self { cookies }
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionCookie> {
        self.cookies.iter()
    }

    /// Build a reqwest cookie jar that sends each cookie only to the hosts
    /// and paths its browser scope allows.
    pub fn to_jar(&self) -> Jar {
        let jar = Jar::default();
        for cookie in &self.cookies {
            let host = cookie.bare_domain();
            if host.is_empty() {
                continue;
            }
            let scheme = if cookie.secure { "https" } else { "http" };
            let Ok(origin) = Url::parse(&format!("{}://{}/", scheme, host)) else {
                debug!("Skipping cookie {} with unusable domain {}", cookie.name, cookie.domain);
                continue;
            };
            let path = if cookie.path.is_empty() { "/" } else { &cookie.path };
            let mut header = format!("{}={}; Path={}", cookie.name, cookie.value, path);
            // A leading dot marks a domain cookie; anything else is host-only.
            if cookie.domain.starts_with('.') {
                header.push_str(&format!("; Domain={}", host));
            }
            if cookie.secure {
                header.push_str("; Secure");
            }
            jar.add_cookie_str(&header, &origin);
        }
        jar
    }
}

/// A live browser connection plus the cookies copied from it when attached.
///
/// Not persisted: cookies expire and the browser lives outside this process,
/// so every run attaches afresh.
pub struct SessionHandle<S: BrowserSession> {
    browser: S,
    cookies: CookieSet,
}

impl<S: BrowserSession> SessionHandle<S> {
    /// Wrap an attached browser and copy its cookie jar.
    pub async fn bridge(browser: S, cookie_domains: &[String]) -> Result<Self, SessionError> {
        let cookies = CookieSet::new(browser.cookies().await?).restricted_to(cookie_domains);
        debug!("Bridged {} browser cookies", cookies.len());
        Ok(Self { browser, cookies })
    }

    pub fn cookies(&self) -> &CookieSet {
        &self.cookies
    }

    pub fn browser(&self) -> &S {
        &self.browser
    }

    pub fn browser_mut(&mut self) -> &mut S {
        &mut self.browser
    }

    pub fn into_browser(self) -> S {
        self.browser
    }
}

/// Attach to a Chrome instance already running with remote debugging on
/// `endpoint` and copy its cookies.
pub async fn attach(
    endpoint: &DevToolsEndpoint,
    cookie_domains: &[String],
) -> Result<SessionHandle<ChromeSession>, SessionError> {
    let browser = ChromeSession::connect(endpoint).await?;
    SessionHandle::bridge(browser, cookie_domains).await
}
