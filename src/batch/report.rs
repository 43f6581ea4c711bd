use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::download::{SkipReason, TransferOutcome, TransferStatus};
use crate::lessons::{LessonEntry, LessonRecord};

/// Outcome of one batch, one entry per selected lesson in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    outcomes: Vec<TransferOutcome>,
    not_found: Vec<LessonRecord>,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub already_present: usize,
    pub interrupted: usize,
    pub failed: usize,
    pub not_found: usize,
    pub bytes_written: u64,
}

impl BatchSummary {
    pub fn incomplete(&self) -> usize {
        self.failed + self.interrupted
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    chapter_index: u32,
    name: &'a str,
    status: &'static str,
    reason: String,
    bytes_written: u64,
}

#[derive(Serialize)]
struct BrokenRow<'a> {
    row: usize,
    chapter_index: u32,
    name: &'a str,
    link: &'a str,
}

impl BatchReport {
    pub(crate) fn new(
        outcomes: Vec<TransferOutcome>,
        not_found: Vec<LessonRecord>,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            outcomes,
            not_found,
            started_at,
            finished_at: Local::now(),
        }
    }

    pub fn outcomes(&self) -> &[TransferOutcome] {
        &self.outcomes
    }

    /// Lessons whose page yielded no media URL.
    pub fn not_found(&self) -> &[LessonRecord] {
        &self.not_found
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Local> {
        self.finished_at
    }

    /// Every selected lesson has its file on disk.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_complete())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            not_found: self.not_found.len(),
            ..Default::default()
        };
        for outcome in &self.outcomes {
            match &outcome.status {
                TransferStatus::Success => summary.succeeded += 1,
                TransferStatus::Skipped(SkipReason::AlreadyExists) => summary.already_present += 1,
                TransferStatus::Skipped(SkipReason::Interrupted) => summary.interrupted += 1,
                TransferStatus::Failed(_) => summary.failed += 1,
            }
            summary.bytes_written += outcome.bytes_written;
        }
        summary
    }

    /// Render as CSV: `chapter_index,name,status,reason,bytes_written`.
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for outcome in &self.outcomes {
            csv_writer.serialize(ReportRow {
                chapter_index: outcome.lesson.chapter_index,
                name: &outcome.lesson.name,
                status: outcome.status.label(),
                reason: outcome.status.reason(),
                bytes_written: outcome.bytes_written,
            })?;
        }
        // An empty report still gets its header row.
        if self.outcomes.is_empty() {
            csv_writer.write_record(["chapter_index", "name", "status", "reason", "bytes_written"])?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> anyhow::Result<()> {
        save_with(path, |file| self.write_csv(file))
    }
}

/// Render broken sources as CSV: `row,chapter_index,name,link`, where `row`
/// is the spreadsheet row number.
pub fn write_broken_csv<W: Write>(entries: &[LessonEntry], writer: W) -> csv::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for entry in entries {
        csv_writer.serialize(BrokenRow {
            row: entry.sheet_row(),
            chapter_index: entry.lesson.chapter_index,
            name: &entry.lesson.name,
            link: &entry.lesson.source_ref,
        })?;
    }
    if entries.is_empty() {
        csv_writer.write_record(["row", "chapter_index", "name", "link"])?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_broken_csv(entries: &[LessonEntry], path: &Path) -> anyhow::Result<()> {
    save_with(path, |file| write_broken_csv(entries, file))
}

fn save_with<F>(path: &Path, render: F) -> anyhow::Result<()>
where
    F: FnOnce(std::fs::File) -> csv::Result<()>,
{
    use anyhow::Context;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {:?}", path))?;
    render(file).with_context(|| format!("Failed to write report: {:?}", path))?;
    Ok(())
}
