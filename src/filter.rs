//! Acquisition-date window filtering.
//!
//! The published catalog is ordered by acquisition date, newest first. That
//! ordering is what makes early termination sound: the first row dated before
//! the window start ends the read, because nothing after it can match.
//! Rows newer than the window end are skipped without stopping, since the
//! catalog tolerates a few out-of-order rows near the boundary.

use chrono::{Duration, NaiveDate};

/// Inclusive acquisition-date window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Window covering the last `days` days up to and including `today`.
    pub fn recent(today: NaiveDate, days: u32) -> Self {
        Self {
            start: Some(today - Duration::days(i64::from(days))),
            end: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// What to do with one catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Include,
    Skip,
    /// The window has been fully consumed; stop reading the catalog.
    Stop,
}

pub fn decide(date: NaiveDate, window: &DateWindow) -> Decision {
    if let Some(start) = window.start {
        if date < start {
            return Decision::Stop;
        }
    }
    if let Some(end) = window.end {
        if date > end {
            return Decision::Skip;
        }
    }
    Decision::Include
}
