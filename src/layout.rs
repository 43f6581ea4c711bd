use std::path::{Path, PathBuf};
use url::Url;

use crate::lessons::LessonEntry;

/// Decides where a lesson's media file lives under the output root.
pub trait DestinationLayout: Send + Sync {
    fn destination(&self, entry: &LessonEntry, media_url: &str) -> PathBuf;
}

/// `<root>/<prefix>_NN/sNNeMM_<slug>.<ext>`
#[derive(Debug, Clone)]
pub struct EpisodeLayout {
    root: PathBuf,
    chapter_folder_prefix: String,
    default_extension: String,
}

impl EpisodeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chapter_folder_prefix: "Chapter".to_string(),
            default_extension: "mp4".to_string(),
        }
    }

    pub fn with_chapter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.chapter_folder_prefix = prefix.into();
        self
    }

    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn extension_for(&self, media_url: &str) -> String {
        Url::parse(media_url)
            .ok()
            .and_then(|url| {
                Path::new(url.path())
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.to_ascii_lowercase())
            })
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| self.default_extension.clone())
    }
}

impl DestinationLayout for EpisodeLayout {
    fn destination(&self, entry: &LessonEntry, media_url: &str) -> PathBuf {
        let chapter = entry.lesson.chapter_index;
        let folder = format!("{}_{:02}", self.chapter_folder_prefix, chapter);
        let filename = format!(
            "s{:02}e{:02}_{}.{}",
            chapter,
            entry.episode,
            slugify(&entry.lesson.name),
            self.extension_for(media_url)
        );
        self.root.join(folder).join(filename)
    }
}

/// Lowercase, with anything but letters, digits and spaces turned into `_`,
/// then spaces into `_`.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .replace(' ', "_");

    if slug.is_empty() { "lesson".to_string() } else { slug }
}
