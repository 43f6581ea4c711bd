use anyhow::{Context, Result};
use chrono::Local;
use console::{Term, style};
use coursedl::batch::{BatchEvent, BatchOrchestrator, BatchReport, StopSignal};
use coursedl::config::Config;
use coursedl::download::{DownloadProgress, ProgressTracker, TransferEngine, TransferStatus};
use coursedl::lessons::ChapterRange;
use coursedl::locator::LessonLocator;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use super::{attach_browser, build_selection, install_interrupt_handler, load_lessons};

/// Run a full download batch. Returns whether every selected lesson ended
/// up on disk.
pub async fn handle_download(
    config: &Config,
    sheet: PathBuf,
    output: PathBuf,
    chapters: Option<ChapterRange>,
    skip_first: usize,
    port: Option<u16>,
    report_path: Option<PathBuf>,
    verbose: bool,
) -> Result<bool> {
    let term = Term::stdout();
    term.write_line(&format!(
        "{} Downloading lessons to {}",
        style("⬇️").cyan(),
        style(output.display()).cyan().bold()
    ))?;

    let lessons = load_lessons(&term, &sheet)?;
    let selection = build_selection(chapters, skip_first);
    let selected = selection.apply(&lessons).len();

    if let Some(range) = chapters {
        term.write_line(&format!("{} Chapters: {}", style("📚").cyan(), range))?;
    }
    if skip_first > 0 {
        term.write_line(&format!(
            "{} Skipping first {} rows",
            style("⏭").cyan(),
            skip_first
        ))?;
    }
    term.write_line(&format!(
        "{} {} lessons selected",
        style("🎯").cyan(),
        selected
    ))?;

    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output directory: {:?}", output))?;

    let mut session = attach_browser(&term, config, port).await?;

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let engine = TransferEngine::new(session.cookies(), config.transfer_options())?
        .with_progress(progress_tx);
    let locator = LessonLocator::new(config.locator_options())?;
    let stop = StopSignal::new();
    let orchestrator = BatchOrchestrator::new(locator, engine, config.layout(&output))
        .with_referer(config.transfer.send_referer)
        .with_stop_signal(stop.clone())
        .with_events(events_tx);

    let interrupt = install_interrupt_handler(stop);
    let ui = tokio::spawn(render_batch(events_rx, progress_rx, verbose));

    let result = orchestrator.run(&mut session, &lessons, &selection).await;

    // Dropping the orchestrator closes both channels so the renderer drains.
    drop(orchestrator);
    let _ = ui.await;
    interrupt.abort();
    session.into_browser().shutdown().await;

    let report_path = report_path.unwrap_or_else(|| {
        output.join(format!(
            "coursedl-report-{}.csv",
            Local::now().format("%Y%m%d-%H%M%S")
        ))
    });

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            // Keep what finished before the browser went away.
            if let Some(partial) = err.partial_report() {
                write_report(&term, partial, &report_path)?;
            }
            return Err(err.into());
        }
    };
    write_report(&term, &report, &report_path)?;

    Ok(report.is_complete())
}

fn write_report(term: &Term, report: &BatchReport, path: &Path) -> Result<()> {
    report.save_csv(path)?;
    print_summary(term, report)?;
    term.write_line(&format!(
        "{} Report written to {}",
        style("📝").cyan(),
        style(path.display()).cyan()
    ))?;
    Ok(())
}

fn print_summary(term: &Term, report: &BatchReport) -> Result<()> {
    let summary = report.summary();
    let elapsed = (report.finished_at() - report.started_at())
        .to_std()
        .unwrap_or_default();

    term.write_line("")?;
    term.write_line(&format!(
        "{} {} lessons in {}",
        style("📊").cyan(),
        report.len(),
        ProgressTracker::format_duration(elapsed)
    ))?;
    term.write_line(&format!(
        "   {}: {} ({})",
        style("Downloaded").dim(),
        style(summary.succeeded).green(),
        ProgressTracker::format_bytes(summary.bytes_written)
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Already present").dim(),
        summary.already_present
    ))?;
    if summary.interrupted > 0 {
        term.write_line(&format!(
            "   {}: {}",
            style("Not processed (interrupted)").dim(),
            style(summary.interrupted).yellow()
        ))?;
    }
    term.write_line(&format!(
        "   {}: {}",
        style("Failed").dim(),
        if summary.failed > 0 {
            style(summary.failed).red()
        } else {
            style(summary.failed).green()
        }
    ))?;

    if report.is_complete() {
        term.write_line(&format!("{} All lessons downloaded", style("🎉").green()))?;
        return Ok(());
    }

    if summary.not_found > 0 {
        term.write_line(&format!(
            "{} {} lessons had no SOURCE; run 'coursedl report' with the same sheet to list them",
            style("💡").yellow(),
            summary.not_found
        ))?;
    }
    term.write_line(&format!(
        "{} Re-run the same command to retry; finished files are skipped",
        style("🔁").cyan()
    ))?;
    Ok(())
}

fn transfer_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

async fn render_batch(
    mut events: mpsc::UnboundedReceiver<BatchEvent>,
    mut progress: mpsc::UnboundedReceiver<DownloadProgress>,
    verbose: bool,
) {
    let term = Term::stdout();
    let mut bar: Option<ProgressBar> = None;

    loop {
        tokio::select! {
            // Transfer events for a lesson always precede its LessonFinished.
            biased;
            Some(event) = progress.recv() => match event {
                DownloadProgress::Started { url, output_path, .. } => {
                    if verbose {
                        let _ = term.write_line(&format!("   {} {}", style("↓").dim(), url));
                    }
                    let _ = term.write_line(&format!(
                        "   {} {}",
                        style("→").dim(),
                        output_path.display()
                    ));
                    bar = Some(transfer_bar());
                }
                DownloadProgress::Progress { bytes_downloaded, total_bytes, .. } => {
                    if let Some(bar) = &bar {
                        if total_bytes > 0 {
                            bar.set_length(total_bytes);
                        }
                        bar.set_position(bytes_downloaded);
                    }
                }
                other if other.is_terminal() => {
                    if let Some(bar) = bar.take() {
                        bar.finish_and_clear();
                    }
                }
                _ => {}
            },
            Some(event) = events.recv() => match event {
                BatchEvent::LessonStarted { index, total, entry } => {
                    let _ = term.write_line(&format!(
                        "\n{} [{}/{}] s{:02}e{:02} {}",
                        style("➡️").cyan(),
                        index + 1,
                        total,
                        entry.lesson.chapter_index,
                        entry.episode,
                        style(&entry.lesson.name).bold()
                    ));
                }
                BatchEvent::SourceMissing { reason, .. } => {
                    let _ = term.write_line(&format!(
                        "   {} No SOURCE found ({})",
                        style("⚠️").yellow(),
                        reason
                    ));
                }
                BatchEvent::LessonFinished { outcome, .. } => {
                    let line = match &outcome.status {
                        TransferStatus::Success => format!(
                            "   {} Saved ({})",
                            style("✔").green(),
                            ProgressTracker::format_bytes(outcome.bytes_written)
                        ),
                        TransferStatus::Skipped(reason) => {
                            format!("   {} Skipped: {}", style("⏭").cyan(), reason)
                        }
                        TransferStatus::Failed(reason) => {
                            format!("   {} Failed: {}", style("❌").red(), reason)
                        }
                    };
                    let _ = term.write_line(&line);
                }
            },
            else => break,
        }
    }
}
