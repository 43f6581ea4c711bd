use std::path::PathBuf;
use std::time::Duration;

/// Events emitted by the transfer engine while it works.
#[derive(Debug, Clone)]
pub enum DownloadProgress {
    Started {
        id: String,
        url: String,
        output_path: PathBuf,
    },
    Progress {
        id: String,
        bytes_downloaded: u64,
        total_bytes: u64,
        progress_percent: u8,
        speed_bps: u64,
    },
    Completed {
        id: String,
        bytes_downloaded: u64,
    },
    Skipped {
        id: String,
        reason: String,
    },
    Failed {
        id: String,
        error: String,
    },
}

impl DownloadProgress {
    pub fn id(&self) -> &str {
        match self {
            DownloadProgress::Started { id, .. }
            | DownloadProgress::Progress { id, .. }
            | DownloadProgress::Completed { id, .. }
            | DownloadProgress::Skipped { id, .. }
            | DownloadProgress::Failed { id, .. } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadProgress::Completed { .. }
                | DownloadProgress::Skipped { .. }
                | DownloadProgress::Failed { .. }
        )
    }
}

pub struct ProgressTracker;

impl ProgressTracker {
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    pub fn percent(bytes_downloaded: u64, total_bytes: u64) -> u8 {
        if total_bytes == 0 {
            return 0;
        }
        ((bytes_downloaded as f64 / total_bytes as f64) * 100.0).min(100.0) as u8
    }

    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}
