#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use coursedl::{BrowserSession, SessionCookie, SessionError};
use tokio::net::TcpListener;

pub const SESSION_COOKIE: &str = "session=s3cret";

/// Headers seen by the media route, one entry per request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub cookie: Option<String>,
    pub referer: Option<String>,
}

#[derive(Clone, Default)]
pub struct ServerLog(Arc<Mutex<Vec<SeenRequest>>>);

impl ServerLog {
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.0.lock().unwrap().clone()
    }
}

pub fn media_body(name: &str) -> Vec<u8> {
    format!("video:{}\n", name).repeat(2048).into_bytes()
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn serve_media(
    State(log): State<ServerLog>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let cookie = header_string(&headers, header::COOKIE);
    log.0.lock().unwrap().push(SeenRequest {
        path: format!("/media/{}", name),
        cookie: cookie.clone(),
        referer: header_string(&headers, header::REFERER),
    });

    // Only a logged-in client gets the file.
    if !cookie.is_some_and(|c| c.contains(SESSION_COOKIE)) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let body = media_body(&name);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, body.len().to_string()),
        ],
        body,
    )
        .into_response()
}

async fn serve_missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Announces 64 KiB but dies after the first chunk.
async fn serve_cut() -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(vec![7u8; 4096])),
        Err(std::io::Error::other("connection reset")),
    ];
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, (64 * 1024).to_string())
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

pub async fn start_server() -> (SocketAddr, ServerLog, tokio::task::JoinHandle<()>) {
    let log = ServerLog::default();
    let app = Router::new()
        .route("/media/{name}", get(serve_media))
        .route("/missing.mp4", get(serve_missing))
        .route("/cut.mp4", get(serve_cut))
        .with_state(log.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, log, handle)
}

/// Browser cookie for the local test server.
pub fn session_cookie() -> SessionCookie {
    SessionCookie::new("session", "s3cret", "127.0.0.1", "/")
}

/// Lesson page showing the player with a single SOURCE option.
pub fn player_page(media_url: &str) -> String {
    format!(
        r#"<html><body>
        <select class="video-download-selector">
          <option value="">Choose quality</option>
          <option value="{}">Source (1080p)</option>
        </select>
        </body></html>"#,
        media_url
    )
}

/// In-memory stand-in for the operator's browser.
#[derive(Default)]
pub struct PageBrowser {
    pages: HashMap<String, String>,
    current: Option<String>,
    pub visited: Vec<String>,
}

impl PageBrowser {
    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }
}

#[async_trait]
impl BrowserSession for PageBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.visited.push(url.to_string());
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn page_html(&self) -> Result<String, SessionError> {
        Ok(self
            .current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .cloned()
            .unwrap_or_else(|| "<html><body>Lesson</body></html>".to_string()))
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError> {
        Ok(vec![
            session_cookie(),
            SessionCookie::new("tracker", "x", ".ads.example", "/"),
        ])
    }
}
