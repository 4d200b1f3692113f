//! Bookability rules and month enumeration. Everything here is pure.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::model::{CalendarDay, SlotLabel};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Observed holidays shipped with the binary. Further years are added through
/// a holidays file rather than by editing this table.
const BUILTIN_HOLIDAYS: &[&str] = &[
    // 2023
    "2023-01-01", "2023-01-16", "2023-02-20", "2023-05-29", "2023-07-04",
    "2023-09-04", "2023-10-09", "2023-11-11", "2023-11-23", "2023-12-25",
    // 2024
    "2024-01-01", "2024-01-15", "2024-02-19", "2024-05-27", "2024-07-04",
    "2024-09-02", "2024-10-14", "2024-11-11", "2024-11-28", "2024-12-25",
    // 2025
    "2025-01-01", "2025-01-20", "2025-02-17", "2025-05-26", "2025-07-04",
    "2025-09-01", "2025-10-13", "2025-11-11", "2025-11-27", "2025-12-25",
];

/// Static holiday lookup table.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn builtin() -> Self {
        let dates = BUILTIN_HOLIDAYS
            .iter()
            .filter_map(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
            .collect();
        Self { dates }
    }

    pub fn extend(&mut self, dates: impl IntoIterator<Item = NaiveDate>) {
        self.dates.extend(dates);
    }

    /// Parse one `YYYY-MM-DD` per line. Blank lines and `#` comments are skipped.
    pub fn parse_list(text: &str) -> io::Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let date = NaiveDate::parse_from_str(line, DATE_FORMAT).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("holidays line {}: {line:?}: {e}", lineno + 1),
                )
            })?;
            dates.push(date);
        }
        Ok(dates)
    }

    /// Built-in table extended with the dates listed in `path`.
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut calendar = Self::builtin();
        calendar.extend(Self::parse_list(&text)?);
        Ok(calendar)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn holiday_count(&self) -> usize {
        self.dates.len()
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// First and last day of a calendar month. `None` for an invalid month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

/// Inclusive day iterator; empty when `end < start`.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

/// Every day in `[month_start, month_end]` crossed with every slot label.
pub fn enumerate_slots(month_start: NaiveDate, month_end: NaiveDate) -> Vec<(NaiveDate, SlotLabel)> {
    days_between(month_start, month_end)
        .flat_map(|d| SlotLabel::ALL.into_iter().map(move |label| (d, label)))
        .collect()
}

/// Decides which dates can be booked.
#[derive(Debug, Clone, Default)]
pub struct CalendarPolicy {
    holidays: HolidayCalendar,
}

impl CalendarPolicy {
    pub fn new(holidays: HolidayCalendar) -> Self {
        Self { holidays }
    }

    pub fn holidays(&self) -> &HolidayCalendar {
        &self.holidays
    }

    pub fn is_bookable(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.holidays.is_holiday(date)
    }

    /// Sunday-first week grid covering the month containing `anchor`.
    /// Padding days from neighbouring months have `is_current_month == false`.
    pub fn month_grid(&self, anchor: NaiveDate, today: NaiveDate) -> Vec<CalendarDay> {
        let Some((first, last)) = month_bounds(anchor.year(), anchor.month()) else {
            return Vec::new();
        };
        let lead = u64::from(first.weekday().num_days_from_sunday());
        let trail = u64::from(6 - last.weekday().num_days_from_sunday());
        let start = first.checked_sub_days(Days::new(lead)).unwrap_or(first);
        let end = last.checked_add_days(Days::new(trail)).unwrap_or(last);

        days_between(start, end)
            .map(|date| CalendarDay {
                date,
                is_bookable: self.is_bookable(date),
                is_current_month: date.month() == anchor.month() && date.year() == anchor.year(),
                is_today: date == today,
            })
            .collect()
    }
}
