use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Occupant positions per slot entry.
pub const POSITIONS: usize = 4;

/// Occupant ids by position. `""` marks a vacant position.
pub type Occupants = [String; POSITIONS];

pub fn vacant_occupants() -> Occupants {
    Default::default()
}

pub fn all_vacant(occupants: &Occupants) -> bool {
    occupants.iter().all(|o| o.is_empty())
}

/// The fixed set of daily time slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotLabel {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

impl SlotLabel {
    pub const ALL: [SlotLabel; 2] = [SlotLabel::Am, SlotLabel::Pm];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotLabel::Am => "AM",
            SlotLabel::Pm => "PM",
        }
    }

    /// Human-readable time range shown next to the label.
    pub fn time_range(&self) -> &'static str {
        match self {
            SlotLabel::Am => "8:00 AM - 9:00 AM",
            SlotLabel::Pm => "2:15 PM - 3:15 PM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Some(SlotLabel::Am),
            "PM" => Some(SlotLabel::Pm),
            _ => None,
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bookable (date, label) record with its four occupant positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub id: Ulid,
    pub date: NaiveDate,
    pub label: SlotLabel,
    pub occupants: Occupants,
    /// Bumped on every occupant update; conditional writes compare against it.
    pub version: u64,
}

impl SlotEntry {
    pub fn occupant(&self, position: usize) -> &str {
        self.occupants.get(position).map_or("", String::as_str)
    }

    pub fn is_vacant(&self) -> bool {
        all_vacant(&self.occupants)
    }
}

/// An authenticated volunteer, with privilege resolved once at sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_privileged: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>, is_privileged: bool) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            phone_number: None,
            is_privileged,
        }
    }
}

/// A date annotated for calendar rendering. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_bookable: bool,
    pub is_current_month: bool,
    pub is_today: bool,
}

/// Directory record for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

/// Slot store mutations. This is the WAL record format and the feed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    EntryCreated {
        id: Ulid,
        date: NaiveDate,
        label: SlotLabel,
        occupants: Occupants,
    },
    OccupantsUpdated {
        id: Ulid,
        date: NaiveDate,
        label: SlotLabel,
        occupants: Occupants,
        version: u64,
    },
    EntryDeleted {
        id: Ulid,
        date: NaiveDate,
        label: SlotLabel,
    },
}

impl StoreEvent {
    pub fn date(&self) -> NaiveDate {
        match self {
            StoreEvent::EntryCreated { date, .. }
            | StoreEvent::OccupantsUpdated { date, .. }
            | StoreEvent::EntryDeleted { date, .. } => *date,
        }
    }
}
