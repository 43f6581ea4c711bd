use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::error::SheetError;

pub const REQUIRED_COLUMNS: &[&str] = &["chapter_index", "name", "link"];

const RANGE_PATTERN: &str = r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$";

/// One row of the lesson sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonRecord {
    pub chapter_index: u32,
    pub name: String,
    /// Lesson page URL (the sheet's `link` column)
    #[serde(rename = "link")]
    pub source_ref: String,
}

impl LessonRecord {
    pub fn new(chapter_index: u32, name: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            chapter_index,
            name: name.into(),
            source_ref: source_ref.into(),
        }
    }
}

impl fmt::Display for LessonRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chapter {} / {}", self.chapter_index, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RawRow {
    chapter_index: String,
    name: String,
    link: String,
}

/// Load lessons from a CSV sheet on disk.
pub fn load_sheet(path: &Path) -> Result<Vec<LessonRecord>, SheetError> {
    let file = File::open(path)?;
    read_sheet(file)
}

/// Parse lessons from CSV with a header row. Row order is preserved.
pub fn read_sheet<R: Read>(reader: R) -> Result<Vec<LessonRecord>, SheetError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h.eq_ignore_ascii_case(col)))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SheetError::MissingColumns(missing));
    }

    // Header matching is case-insensitive; normalize before deserializing.
    let normalized: csv::StringRecord = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    csv_reader.set_headers(normalized);

    let mut lessons = Vec::new();
    for (index, result) in csv_reader.deserialize::<RawRow>().enumerate() {
        // Spreadsheet row number: 1-based, header is row 1
        let row = index + 2;
        let raw = result?;
        let chapter_index = parse_chapter_index(&raw.chapter_index).ok_or_else(|| {
            SheetError::InvalidRow {
                row,
                reason: format!("invalid chapter_index '{}'", raw.chapter_index),
            }
        })?;
        if raw.link.is_empty() {
            return Err(SheetError::InvalidRow {
                row,
                reason: "empty link".to_string(),
            });
        }
        lessons.push(LessonRecord {
            chapter_index,
            name: raw.name,
            source_ref: raw.link,
        });
    }

    Ok(lessons)
}

// Spreadsheet exports often write integers as "2.0".
fn parse_chapter_index(value: &str) -> Option<u32> {
    let parsed = value.parse::<u32>().ok().or_else(|| {
        let float = value.parse::<f64>().ok()?;
        (float.fract() == 0.0 && float >= 0.0 && float <= u32::MAX as f64).then_some(float as u32)
    })?;
    (parsed >= 1).then_some(parsed)
}

/// Inclusive chapter-index bound, parsed from `low-high` or a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: u32,
    pub end: u32,
}

impl ChapterRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(chapter: u32) -> Self {
        Self::new(chapter, chapter)
    }

    pub fn contains(&self, chapter: u32) -> bool {
        (self.start..=self.end).contains(&chapter)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.start == 0 {
            return Err("Chapter indices start at 1".to_string());
        }
        if self.start > self.end {
            return Err(format!(
                "Chapter range start {} is greater than end {}",
                self.start, self.end
            ));
        }
        Ok(())
    }
}

impl FromStr for ChapterRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = Regex::new(RANGE_PATTERN).map_err(|e| e.to_string())?;
        let caps = pattern
            .captures(s)
            .ok_or_else(|| format!("invalid chapter range '{}', expected N or LOW-HIGH", s))?;
        let start: u32 = caps[1]
            .parse()
            .map_err(|_| format!("chapter index out of range in '{}'", s))?;
        let end: u32 = match caps.get(2) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| format!("chapter index out of range in '{}'", s))?,
            None => start,
        };
        Ok(Self { start, end })
    }
}

impl fmt::Display for ChapterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A lesson picked for processing, with its position in the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonEntry {
    /// 0-based position in the input sheet
    pub position: usize,
    /// 1-based position of the lesson within its chapter, over the whole sheet
    pub episode: u32,
    pub lesson: LessonRecord,
}

impl LessonEntry {
    /// Spreadsheet row number (header is row 1).
    pub fn sheet_row(&self) -> usize {
        self.position + 2
    }
}

/// Narrows the lesson list for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub chapters: Option<ChapterRange>,
    pub skip_first: usize,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_chapters(mut self, range: ChapterRange) -> Self {
        self.chapters = Some(range);
        self
    }

    pub fn skipping(mut self, rows: usize) -> Self {
        self.skip_first = rows;
        self
    }

    /// Select lessons in input order. `skip_first` counts rows of the full
    /// sheet; the chapter filter applies to the rows that remain.
    pub fn apply(&self, lessons: &[LessonRecord]) -> Vec<LessonEntry> {
        let mut episodes: HashMap<u32, u32> = HashMap::new();

        lessons
            .iter()
            .enumerate()
            .filter_map(|(position, lesson)| {
                let counter = episodes.entry(lesson.chapter_index).or_insert(0);
                *counter += 1;
                let episode = *counter;

                if position < self.skip_first {
                    return None;
                }
                if let Some(range) = &self.chapters {
                    if !range.contains(lesson.chapter_index) {
                        return None;
                    }
                }
                Some(LessonEntry {
                    position,
                    episode,
                    lesson: lesson.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(chapters: &[u32]) -> Vec<LessonRecord> {
        chapters
            .iter()
            .enumerate()
            .map(|(i, c)| LessonRecord::new(*c, format!("Lesson {}", i + 1), format!("https://x.test/{}", i)))
            .collect()
    }

    #[test]
    fn test_read_sheet() {
        let data = "chapter_index,name,link,extra\n1,Intro,https://a.test/1,x\n1,Setup,https://a.test/2,y\n2.0,Basics,https://a.test/3,z\n";
        let lessons = read_sheet(data.as_bytes()).unwrap();
        assert_eq!(lessons.len(), 3);
        assert_eq!(lessons[0], LessonRecord::new(1, "Intro", "https://a.test/1"));
        assert_eq!(lessons[2].chapter_index, 2);
        assert_eq!(lessons[2].name, "Basics");
    }

    #[test]
    fn test_read_sheet_column_order_and_case() {
        let data = "Link,Name,Chapter_Index\nhttps://a.test/1,Intro,3\n";
        let lessons = read_sheet(data.as_bytes()).unwrap();
        assert_eq!(lessons, vec![LessonRecord::new(3, "Intro", "https://a.test/1")]);
    }

    #[test]
    fn test_read_sheet_missing_columns() {
        let data = "chapter_index,title\n1,Intro\n";
        match read_sheet(data.as_bytes()) {
            Err(SheetError::MissingColumns(cols)) => {
                assert_eq!(cols, vec!["name".to_string(), "link".to_string()]);
            }
            other => panic!("Expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_read_sheet_invalid_chapter() {
        let data = "chapter_index,name,link\n1,Intro,https://a.test/1\n0,Bad,https://a.test/2\n";
        match read_sheet(data.as_bytes()) {
            Err(SheetError::InvalidRow { row, .. }) => assert_eq!(row, 3),
            other => panic!("Expected InvalidRow, got {:?}", other),
        }

        let data = "chapter_index,name,link\nabc,Intro,https://a.test/1\n";
        assert!(matches!(
            read_sheet(data.as_bytes()),
            Err(SheetError::InvalidRow { row: 2, .. })
        ));
    }

    #[test]
    fn test_chapter_range_parsing() {
        assert_eq!("2-4".parse::<ChapterRange>().unwrap(), ChapterRange::new(2, 4));
        assert_eq!(" 3 ".parse::<ChapterRange>().unwrap(), ChapterRange::single(3));
        assert_eq!("1 - 10".parse::<ChapterRange>().unwrap(), ChapterRange::new(1, 10));
        assert!("a-b".parse::<ChapterRange>().is_err());
        assert!("2-".parse::<ChapterRange>().is_err());
        assert!("-3".parse::<ChapterRange>().is_err());

        assert!(ChapterRange::new(4, 2).validate().is_err());
        assert!(ChapterRange::new(0, 2).validate().is_err());
        assert!(ChapterRange::new(2, 2).validate().is_ok());
        assert_eq!(ChapterRange::new(2, 4).to_string(), "2-4");
        assert_eq!(ChapterRange::single(7).to_string(), "7");
    }

    #[test]
    fn test_range_filter_keeps_order() {
        let lessons = sheet(&[1, 2, 3, 4, 5, 6, 7, 8, 2, 4]);
        let selected = Selection::all()
            .with_chapters(ChapterRange::new(2, 4))
            .apply(&lessons);

        let chapters: Vec<u32> = selected.iter().map(|e| e.lesson.chapter_index).collect();
        assert_eq!(chapters, vec![2, 3, 4, 2, 4]);
        let positions: Vec<usize> = selected.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 8, 9]);
    }

    #[test]
    fn test_skip_first() {
        let lessons = sheet(&[1; 10]);
        let selected = Selection::all().skipping(3).apply(&lessons);
        assert_eq!(selected.len(), 7);
        assert_eq!(selected[0].position, 3);
        assert_eq!(selected.last().unwrap().position, 9);

        assert!(Selection::all().skipping(10).apply(&lessons).is_empty());
        assert!(Selection::all().skipping(25).apply(&lessons).is_empty());
    }

    #[test]
    fn test_episode_numbers_survive_selection() {
        let lessons = sheet(&[1, 1, 2, 2, 2]);
        let selected = Selection::all().skipping(3).apply(&lessons);
        let episodes: Vec<(u32, u32)> = selected
            .iter()
            .map(|e| (e.lesson.chapter_index, e.episode))
            .collect();
        assert_eq!(episodes, vec![(2, 2), (2, 3)]);
        assert_eq!(selected[0].sheet_row(), 5);
    }
}
