//! Read-side projection of store snapshots for one viewer.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::{CalendarPolicy, enumerate_slots};
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionView {
    Disabled,
    Available,
    HeldByMe,
    HeldByOther,
}

impl PositionView {
    pub fn color(&self) -> &'static str {
        match self {
            PositionView::Disabled => "gray",
            PositionView::Available => "green",
            PositionView::HeldByMe => "amber",
            PositionView::HeldByOther => "red",
        }
    }
}

pub fn project_position(bookable: bool, occupant: &str, viewer_id: &str) -> PositionView {
    if !bookable {
        PositionView::Disabled
    } else if occupant.is_empty() {
        PositionView::Available
    } else if occupant == viewer_id {
        PositionView::HeldByMe
    } else {
        PositionView::HeldByOther
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub date: NaiveDate,
    pub label: SlotLabel,
    pub time_range: &'static str,
    pub positions: [PositionView; POSITIONS],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    #[serde(flatten)]
    pub day: CalendarDay,
    /// Empty for padding days outside the displayed month.
    pub slots: Vec<SlotView>,
}

type EntryIndex<'a> = HashMap<(NaiveDate, SlotLabel), &'a SlotEntry>;

fn index(entries: &[SlotEntry]) -> EntryIndex<'_> {
    entries.iter().map(|e| ((e.date, e.label), e)).collect()
}

fn project_slot(
    policy: &CalendarPolicy,
    by_key: &EntryIndex<'_>,
    date: NaiveDate,
    label: SlotLabel,
    viewer_id: &str,
) -> SlotView {
    let bookable = policy.is_bookable(date);
    let entry = by_key.get(&(date, label));
    SlotView {
        date,
        label,
        time_range: label.time_range(),
        positions: std::array::from_fn(|i| {
            project_position(bookable, entry.map_or("", |e| e.occupant(i)), viewer_id)
        }),
    }
}

/// One view per (date, label) in `[start, end]`.
pub fn project_slots(
    policy: &CalendarPolicy,
    entries: &[SlotEntry],
    start: NaiveDate,
    end: NaiveDate,
    viewer_id: &str,
) -> Vec<SlotView> {
    let by_key = index(entries);
    enumerate_slots(start, end)
        .into_iter()
        .map(|(date, label)| project_slot(policy, &by_key, date, label, viewer_id))
        .collect()
}

/// Week grid for the month containing `anchor`, with slot views filled in
/// for days of that month.
pub fn project_month(
    policy: &CalendarPolicy,
    entries: &[SlotEntry],
    anchor: NaiveDate,
    today: NaiveDate,
    viewer_id: &str,
) -> Vec<DayView> {
    let by_key = index(entries);
    policy
        .month_grid(anchor, today)
        .into_iter()
        .map(|day| {
            let slots = if day.is_current_month {
                SlotLabel::ALL
                    .iter()
                    .map(|&label| project_slot(policy, &by_key, day.date, label, viewer_id))
                    .collect()
            } else {
                Vec::new()
            };
            DayView { day, slots }
        })
        .collect()
}
