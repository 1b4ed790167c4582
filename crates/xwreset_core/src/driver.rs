use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{
    PuzzleEntry, YearMonth, read_date_list, recent_months, write_date_list,
};
use crate::error::ResetError;
use crate::runtime::{Mode, Settings};
use crate::site::PuzzleSite;

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub months: Vec<YearMonth>,
    pub days_seen: usize,
    pub marked_complete: usize,
    pub falsely_complete: Vec<PuzzleEntry>,
}

impl ScanReport {
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.falsely_complete.iter().map(|entry| entry.date).collect()
    }
}

/// Per-date progress while fixing. `Verified`, `FailedVerification` and
/// `AlreadyClear` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    Pending,
    ResetRequested,
    Verified,
    FailedVerification,
    /// The indicator was not showing complete; nothing was reset.
    AlreadyClear,
}

impl FixState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Verified | Self::FailedVerification | Self::AlreadyClear
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResetRequested => "reset_requested",
            Self::Verified => "verified",
            Self::FailedVerification => "failed_verification",
            Self::AlreadyClear => "already_clear",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixResult {
    pub date: NaiveDate,
    pub state: FixState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixReport {
    pub requested: usize,
    pub verified: usize,
    pub already_clear: usize,
    pub failed: Vec<NaiveDate>,
    pub results: Vec<FixResult>,
}

impl FixReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub scan: Option<ScanReport>,
    pub fix: Option<FixReport>,
    pub list_written: Option<String>,
    pub request_count: usize,
}

/// What to do once the session is authenticated.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub mode: Mode,
    pub months: Vec<YearMonth>,
    /// Dates to fix; read from `list_path` when absent.
    pub dates: Option<Vec<NaiveDate>>,
    pub list_path: PathBuf,
}

impl RunPlan {
    pub fn from_settings(settings: &Settings) -> Self {
        let months = match settings.months {
            Some(count) if settings.mode.scans() => recent_months(settings.through, count),
            _ => Vec::new(),
        };
        Self {
            mode: settings.mode,
            months,
            dates: settings.fix_dates.clone(),
            list_path: settings.list_path.clone(),
        }
    }
}

pub fn run<S: PuzzleSite + ?Sized>(site: &mut S, plan: &RunPlan) -> Result<RunReport, ResetError> {
    let mut report = RunReport {
        mode: plan.mode,
        scan: None,
        fix: None,
        list_written: None,
        request_count: 0,
    };

    let scanned_dates = if plan.mode.scans() {
        let scan_report = scan(site, &plan.months)?;
        let dates = scan_report.dates();
        // The scan result is still reported, and fed to fix, when the list cannot be saved.
        match write_date_list(&plan.list_path, &dates) {
            Ok(()) => {
                info!(
                    count = dates.len(),
                    path = %plan.list_path.display(),
                    "wrote falsely complete dates"
                );
                report.list_written = Some(plan.list_path.to_string_lossy().replace('\\', "/"));
            }
            Err(error) => warn!("failed to save date list: {error:#}"),
        }
        report.scan = Some(scan_report);
        Some(dates)
    } else {
        None
    };

    if plan.mode.fixes() {
        let dates = match (scanned_dates, &plan.dates) {
            (Some(dates), _) => dates,
            (None, Some(dates)) => dates.clone(),
            (None, None) => read_date_list(&plan.list_path).map_err(ResetError::configuration)?,
        };
        if dates.is_empty() {
            info!("nothing to fix");
            report.fix = Some(FixReport::default());
        } else {
            report.fix = Some(fix(site, &dates)?);
        }
    }

    report.request_count = site.request_count();
    Ok(report)
}

/// Visits each month in order and classifies every displayed-complete day by its grid.
pub fn scan<S: PuzzleSite + ?Sized>(
    site: &mut S,
    months: &[YearMonth],
) -> Result<ScanReport, ResetError> {
    let mut report = ScanReport {
        months: months.to_vec(),
        days_seen: 0,
        marked_complete: 0,
        falsely_complete: Vec::new(),
    };

    for month in months {
        info!("scanning archive for {month}");
        let days = site
            .archive_month(*month)
            .with_context(|| format!("failed to read archive for {month}"))
            .map_err(ResetError::navigation)?;
        report.days_seen += days.len();

        for day in days {
            if !day.marked_complete {
                continue;
            }
            report.marked_complete += 1;
            let fill = site
                .read_fill(day.date)
                .with_context(|| format!("failed to read puzzle grid for {}", day.date))
                .map_err(ResetError::navigation)?;
            let entry = PuzzleEntry {
                date: day.date,
                marked_complete: true,
                fill: Some(fill),
            };
            if entry.is_falsely_complete() {
                info!(date = %day.date, %fill, "marked complete but grid is not full");
                report.falsely_complete.push(entry);
            } else {
                debug!(date = %day.date, %fill, "complete");
            }
        }
    }

    info!(
        months = months.len(),
        days = report.days_seen,
        marked_complete = report.marked_complete,
        falsely_complete = report.falsely_complete.len(),
        "scan finished"
    );
    Ok(report)
}

/// Resets each date in order. A reset that does not verify is recorded and
/// the run moves on; navigation failures abort.
pub fn fix<S: PuzzleSite + ?Sized>(
    site: &mut S,
    dates: &[NaiveDate],
) -> Result<FixReport, ResetError> {
    let mut report = FixReport::default();
    let mut seen = BTreeSet::new();

    for date in dates {
        if !seen.insert(*date) {
            debug!(%date, "duplicate date skipped");
            continue;
        }
        report.requested += 1;
        let state = fix_one(site, *date)
            .with_context(|| format!("failed to fix {date}"))
            .map_err(ResetError::navigation)?;
        match state {
            FixState::Verified => report.verified += 1,
            FixState::AlreadyClear => report.already_clear += 1,
            _ => report.failed.push(*date),
        }
        report.results.push(FixResult { date: *date, state });
    }

    info!(
        requested = report.requested,
        verified = report.verified,
        already_clear = report.already_clear,
        failed = report.failed.len(),
        "fix finished"
    );
    Ok(report)
}

fn fix_one<S: PuzzleSite + ?Sized>(site: &mut S, date: NaiveDate) -> anyhow::Result<FixState> {
    let mut state = FixState::Pending;
    debug!(%date, state = state.as_str());

    if !site.is_marked_complete(date)? {
        info!(%date, "not marked complete, nothing to reset");
        return Ok(FixState::AlreadyClear);
    }

    site.reset_puzzle(date)?;
    state = FixState::ResetRequested;
    debug!(%date, state = state.as_str());

    if site.is_marked_complete(date)? {
        warn!(%date, "reset did not clear the completion indicator");
        Ok(FixState::FailedVerification)
    } else {
        info!(%date, "reset verified");
        Ok(FixState::Verified)
    }
}
