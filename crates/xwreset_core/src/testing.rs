use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, bail};
use chrono::NaiveDate;

use crate::archive::{ArchiveDay, FillRatio, YearMonth};
use crate::prompt::Prompter;
use crate::site::PuzzleSite;

/// Answers prompts from a queue and records every question and warning.
#[derive(Default)]
pub(crate) struct ScriptedPrompter {
    pub answers: VecDeque<String>,
    pub asked: Vec<String>,
    pub warnings: Vec<String>,
}

impl ScriptedPrompter {
    pub fn with(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.asked.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("unexpected prompt: {question}"))
    }

    fn warn(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MockDay {
    pub marked_complete: bool,
    pub fill: FillRatio,
    /// Whether a reset actually clears the completion indicator.
    pub reset_clears: bool,
}

#[derive(Default)]
pub(crate) struct MockSite {
    pub accepted_tokens: Vec<String>,
    pub current_token: Option<String>,
    pub injected: Vec<String>,
    pub days: BTreeMap<NaiveDate, MockDay>,
    pub visited_months: Vec<YearMonth>,
    pub fill_reads: Vec<NaiveDate>,
    pub completion_checks: Vec<NaiveDate>,
    pub resets: Vec<NaiveDate>,
    pub broken_month: Option<YearMonth>,
    pub request_count: usize,
}

impl MockSite {
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted_tokens: tokens.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn with_day(mut self, date: NaiveDate, marked_complete: bool, filled: u32) -> Self {
        self.days.insert(
            date,
            MockDay {
                marked_complete,
                fill: FillRatio::new(filled, 100),
                reset_clears: true,
            },
        );
        self
    }

    pub fn stuck(mut self, date: NaiveDate) -> Self {
        if let Some(day) = self.days.get_mut(&date) {
            day.reset_clears = false;
        }
        self
    }
}

impl PuzzleSite for MockSite {
    fn inject_auth_cookie(&mut self, token: &str) -> Result<()> {
        self.request_count += 1;
        self.injected.push(token.to_string());
        self.current_token = Some(token.to_string());
        Ok(())
    }

    fn is_authenticated(&mut self) -> Result<bool> {
        self.request_count += 1;
        Ok(self
            .current_token
            .as_ref()
            .is_some_and(|token| self.accepted_tokens.contains(token)))
    }

    fn archive_month(&mut self, month: YearMonth) -> Result<Vec<ArchiveDay>> {
        self.request_count += 1;
        self.visited_months.push(month);
        if self.broken_month == Some(month) {
            bail!("timed out after 10000ms waiting for .calendar");
        }
        Ok(self
            .days
            .iter()
            .filter(|(date, _)| month.contains(**date))
            .map(|(date, day)| ArchiveDay {
                date: *date,
                marked_complete: day.marked_complete,
            })
            .collect())
    }

    fn read_fill(&mut self, date: NaiveDate) -> Result<FillRatio> {
        self.request_count += 1;
        self.fill_reads.push(date);
        self.days
            .get(&date)
            .map(|day| day.fill)
            .ok_or_else(|| anyhow::anyhow!("no puzzle for {date}"))
    }

    fn is_marked_complete(&mut self, date: NaiveDate) -> Result<bool> {
        self.request_count += 1;
        self.completion_checks.push(date);
        self.days
            .get(&date)
            .map(|day| day.marked_complete)
            .ok_or_else(|| anyhow::anyhow!("no archive entry for {date}"))
    }

    fn reset_puzzle(&mut self, date: NaiveDate) -> Result<()> {
        self.request_count += 1;
        self.resets.push(date);
        let day = self
            .days
            .get_mut(&date)
            .ok_or_else(|| anyhow::anyhow!("reset control not found for {date}"))?;
        if day.reset_clears {
            day.marked_complete = false;
            day.fill = FillRatio::new(0, day.fill.total);
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
