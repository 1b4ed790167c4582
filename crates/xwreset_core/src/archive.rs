use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Serialize, Serializer};

pub const DEFAULT_LIST_FILENAME: &str = "incomplete_puzzles.txt";
/// Forty years, which reaches past the oldest puzzle in the archive.
pub const MAX_ARCHIVE_MONTHS: u32 = 12 * 40;

/// One archive month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("month out of range: {month} (expected 1-12)");
        }
        Ok(Self { year, month })
    }

    /// Accepts `YYYY-MM`, `YYYY/MM` and the legacy `MM/YYYY`.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let (left, right) = trimmed
            .split_once(['-', '/'])
            .ok_or_else(|| anyhow::anyhow!("invalid month: {trimmed} (expected YYYY-MM)"))?;
        let (year, month) = if left.len() == 4 {
            (left, right)
        } else if right.len() == 4 {
            (right, left)
        } else {
            bail!("invalid month: {trimmed} (expected YYYY-MM)");
        };
        let year = year
            .parse::<i32>()
            .with_context(|| format!("invalid year in {trimmed}"))?;
        let month = month
            .parse::<u32>()
            .with_context(|| format!("invalid month in {trimmed}"))?;
        Self::new(year, month)
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn current() -> Self {
        Self::of(Local::now().date_naive())
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        Self::of(date) == self
    }

    /// Path segment used by the archive calendar, e.g. `2023/5`.
    pub fn archive_path(self) -> String {
        format!("{}/{}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The `count` most recent months ending at `through`, oldest first.
/// `count` is capped at [`MAX_ARCHIVE_MONTHS`].
pub fn recent_months(through: YearMonth, count: u32) -> Vec<YearMonth> {
    let count = count.min(MAX_ARCHIVE_MONTHS);
    let mut months = Vec::with_capacity(count as usize);
    let mut cursor = through;
    for _ in 0..count {
        months.push(cursor);
        cursor = cursor.previous();
    }
    months.reverse();
    months
}

/// A calendar entry as shown by the archive view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveDay {
    pub date: NaiveDate,
    pub marked_complete: bool,
}

/// Filled cells over fillable (non-block) cells of a puzzle grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FillRatio {
    pub filled: u32,
    pub total: u32,
}

impl FillRatio {
    pub fn new(filled: u32, total: u32) -> Self {
        Self {
            filled: filled.min(total),
            total,
        }
    }

    pub fn is_full(self) -> bool {
        self.total > 0 && self.filled >= self.total
    }

    pub fn percent(self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.filled) * 100.0 / f64::from(self.total)
    }
}

impl fmt::Display for FillRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.0}%)", self.filled, self.total, self.percent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PuzzleEntry {
    pub date: NaiveDate,
    pub marked_complete: bool,
    pub fill: Option<FillRatio>,
}

impl PuzzleEntry {
    pub fn is_falsely_complete(&self) -> bool {
        is_falsely_complete(self.marked_complete, self.fill)
    }
}

/// Marked complete while the grid holds fewer letters than it has cells.
/// An unread grid is never classified.
pub fn is_falsely_complete(marked_complete: bool, fill: Option<FillRatio>) -> bool {
    marked_complete && fill.is_some_and(|fill| !fill.is_full())
}

/// Parses `YYYY/MM/DD` or `YYYY-MM-DD`.
pub fn parse_puzzle_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .with_context(|| format!("invalid puzzle date: {trimmed} (expected YYYY-MM-DD)"))
}

/// Path segment used by puzzle pages, e.g. `2023/05/10`.
pub fn puzzle_path(date: NaiveDate) -> String {
    date.format("%Y/%m/%d").to_string()
}

/// Extracts the date from a puzzle link such as
/// `https://www.nytimes.com/crosswords/game/mini/2023/05/10`.
pub fn date_from_puzzle_href(href: &str) -> Option<NaiveDate> {
    let path = href.split(['?', '#']).next()?.trim_end_matches('/');
    let mut segments = path.rsplit('/');
    let day = segments.next()?;
    let month = segments.next()?;
    let year = segments.next()?;
    if year.len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(
        year.parse().ok()?,
        month.parse().ok()?,
        day.parse().ok()?,
    )
}

/// Replaces the list file with one `YYYY/MM/DD` line per date.
pub fn write_date_list(path: &Path, dates: &[NaiveDate]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut rendered = String::with_capacity(dates.len() * 11);
    for date in dates {
        rendered.push_str(&puzzle_path(*date));
        rendered.push('\n');
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

pub fn read_date_list(path: &Path) -> Result<Vec<NaiveDate>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut dates = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let date = parse_puzzle_date(line)
            .with_context(|| format!("{}:{}", path.display(), index + 1))?;
        dates.push(date);
    }
    Ok(dates)
}
