use anyhow::Result;
use console::{Term, style};
use coursedl::batch::{BrokenSourceReporter, save_broken_csv};
use coursedl::config::Config;
use coursedl::lessons::ChapterRange;
use coursedl::locator::LessonLocator;
use coursedl::StopSignal;
use std::path::PathBuf;

use super::{attach_browser, build_selection, install_interrupt_handler, load_lessons};

/// Visit every selected lesson page without downloading and write the ones
/// lacking a source to `output`.
pub async fn handle_report(
    config: &Config,
    sheet: PathBuf,
    output: PathBuf,
    chapters: Option<ChapterRange>,
    skip_first: usize,
    port: Option<u16>,
) -> Result<()> {
    let term = Term::stdout();
    term.write_line(&format!(
        "{} Checking lesson pages for a downloadable source",
        style("🔍").cyan()
    ))?;

    let lessons = load_lessons(&term, &sheet)?;
    let selection = build_selection(chapters, skip_first);
    let selected = selection.apply(&lessons).len();
    term.write_line(&format!(
        "{} {} lessons to check",
        style("🎯").cyan(),
        selected
    ))?;

    let mut session = attach_browser(&term, config, port).await?;

    let stop = StopSignal::new();
    let reporter = BrokenSourceReporter::new(LessonLocator::new(config.locator_options())?)
        .with_stop_signal(stop.clone());
    let interrupt = install_interrupt_handler(stop.clone());

    let result = reporter.report(&mut session, &lessons, &selection).await;
    interrupt.abort();
    session.into_browser().shutdown().await;
    let broken = result?;

    save_broken_csv(&broken, &output)?;

    if stop.is_raised() {
        term.write_line(&format!(
            "{} Scan interrupted; the list below is partial",
            style("⏸").yellow()
        ))?;
    }

    if broken.is_empty() {
        term.write_line(&format!(
            "{} Every checked lesson has a source",
            style("✅").green()
        ))?;
    } else {
        term.write_line(&format!(
            "{} {} lessons without a source:",
            style("⚠️").yellow(),
            broken.len()
        ))?;
        for entry in &broken {
            term.write_line(&format!(
                "   row {:>4}  {}  {}",
                entry.sheet_row(),
                style(&entry.lesson).bold(),
                style(&entry.lesson.source_ref).dim()
            ))?;
        }
    }

    term.write_line(&format!(
        "{} Written to {}",
        style("📝").cyan(),
        style(output.display()).cyan()
    ))?;
    Ok(())
}
