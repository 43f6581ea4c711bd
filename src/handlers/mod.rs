pub mod config;
pub mod download;
pub mod report;

use anyhow::{Context, Result};
use console::{Term, style};
use coursedl::browser::{self, ChromeSession, SessionHandle};
use coursedl::config::Config;
use coursedl::lessons::{self, ChapterRange, LessonRecord, Selection};
use coursedl::StopSignal;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

// Re-export all handlers
pub use config::handle_config;
pub use download::handle_download;
pub use report::handle_report;

pub(crate) fn load_lessons(term: &Term, sheet: &Path) -> Result<Vec<LessonRecord>> {
    let lessons = lessons::load_sheet(sheet)
        .with_context(|| format!("Failed to load lesson sheet {:?}", sheet))?;
    term.write_line(&format!(
        "{} Loaded {} lessons from {}",
        style("📄").cyan(),
        lessons.len(),
        style(sheet.display()).cyan()
    ))?;
    Ok(lessons)
}

pub(crate) fn build_selection(chapters: Option<ChapterRange>, skip_first: usize) -> Selection {
    let mut selection = Selection::all().skipping(skip_first);
    if let Some(range) = chapters {
        selection = selection.with_chapters(range);
    }
    selection
}

/// Attach to the operator's browser, explaining how to start it when it is
/// not there.
pub(crate) async fn attach_browser(
    term: &Term,
    config: &Config,
    port: Option<u16>,
) -> Result<SessionHandle<ChromeSession>> {
    let endpoint = config.endpoint(port);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.set_message(format!(
        "Attaching to browser on {}:{}...",
        endpoint.host, endpoint.port
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let attached = browser::attach(&endpoint, &config.browser.cookie_domains).await;
    spinner.finish_and_clear();

    match attached {
        Ok(session) => {
            term.write_line(&format!(
                "{} Attached to browser, {} cookies bridged",
                style("🔗").green(),
                session.cookies().len()
            ))?;
            Ok(session)
        }
        Err(e) => {
            term.write_line(&format!("{} {}", style("❌").red(), e))?;
            term.write_line(&format!("{} Please ensure:", style("💡").yellow()))?;
            term.write_line(&format!(
                "   • Chrome is running with --remote-debugging-port={}",
                endpoint.port
            ))?;
            term.write_line("   • You are logged in to the course site in that browser")?;
            Err(e).context("Cannot continue without a browser session")
        }
    }
}

/// First Ctrl-C stops after the current lesson; a second one exits at once.
pub(crate) fn install_interrupt_handler(stop: StopSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        stop.raise();
        eprintln!(
            "\n{} Stopping after the current lesson (Ctrl-C again to quit now)",
            style("⏸").yellow()
        );
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}
