use clap::{Parser, Subcommand};
use coursedl::ChapterRange;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coursedl")]
#[command(about = "Download course lesson videos through your logged-in browser")]
#[command(long_about = "
coursedl reads a lesson sheet (CSV with chapter_index, name and link columns),
opens every lesson page in a Chrome you have already logged into, finds the
SOURCE video of each lesson and downloads it with that browser's cookies.

Start Chrome with remote debugging first and log in by hand:
  google-chrome --remote-debugging-port=9222 --user-data-dir=/tmp/coursedl-chrome

Examples:
  coursedl download lessons.csv -o ~/Videos/course
  coursedl download lessons.csv -o ~/Videos/course --chapters 2-4
  coursedl download lessons.csv -o ~/Videos/course --skip-first 37
  coursedl report lessons.csv -o broken.csv
")]
#[command(version)]
pub struct Cli {
    /// Override config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the video of every selected lesson
    #[command(visible_alias = "dl")]
    Download {
        /// Lesson sheet (CSV with chapter_index, name, link)
        sheet: PathBuf,

        /// Destination root directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Only process these chapters (N or LOW-HIGH)
        #[arg(long, value_name = "RANGE")]
        chapters: Option<ChapterRange>,

        /// Skip this many leading rows of the sheet
        #[arg(short, long, default_value = "0", value_name = "N")]
        skip_first: usize,

        /// Remote debugging port of the running browser
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,

        /// Where to write the batch report (defaults to the output directory)
        #[arg(short, long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// List lessons whose page has no downloadable source
    #[command(visible_alias = "check")]
    Report {
        /// Lesson sheet (CSV with chapter_index, name, link)
        sheet: PathBuf,

        /// Output CSV file
        #[arg(short, long, default_value = "broken_sources.csv", value_name = "FILE")]
        output: PathBuf,

        /// Only check these chapters (N or LOW-HIGH)
        #[arg(long, value_name = "RANGE")]
        chapters: Option<ChapterRange>,

        /// Skip this many leading rows of the sheet
        #[arg(short, long, default_value = "0", value_name = "N")]
        skip_first: usize,

        /// Remote debugging port of the running browser
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Manage configuration
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,

    /// Validate configuration
    #[command(visible_alias = "check")]
    Validate,

    /// Create sample configuration next to the active one
    Sample,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

// Helper functions for CLI validation
impl Cli {
    /// Validate CLI arguments and show helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Download {
                chapters, port, ..
            }
            | Commands::Report {
                chapters, port, ..
            } => {
                if let Some(range) = chapters {
                    range.validate()?;
                }
                if *port == Some(0) {
                    return Err("Port must be greater than 0".to_string());
                }
            }
            Commands::Config { .. } => {}
        }
        Ok(())
    }

    /// Commands that repair or replace the config must run even when it is invalid
    pub fn skips_config_validation(&self) -> bool {
        matches!(
            self.command,
            Commands::Config {
                action: ConfigAction::Reset { .. }
                    | ConfigAction::Path
                    | ConfigAction::Validate
                    | ConfigAction::Show
            }
        )
    }
}
