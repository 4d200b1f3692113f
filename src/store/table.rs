use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

pub(crate) type SlotKey = (NaiveDate, SlotLabel);

/// In-memory image of the slot store: entries keyed by (date, label), with an
/// id index and a revision counter bumped on every applied event.
#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    by_key: BTreeMap<SlotKey, SlotEntry>,
    by_id: HashMap<Ulid, SlotKey>,
    revision: u64,
}

impl SlotTable {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn get(&self, date: NaiveDate, label: SlotLabel) -> Option<&SlotEntry> {
        self.by_key.get(&(date, label))
    }

    pub fn get_by_id(&self, id: &Ulid) -> Option<&SlotEntry> {
        self.by_id.get(id).and_then(|key| self.by_key.get(key))
    }

    /// Entries dated within `[start, end]`, ordered by (date, label).
    pub fn range(&self, start: NaiveDate, end: NaiveDate) -> Vec<SlotEntry> {
        if end < start {
            return Vec::new();
        }
        let lo = Bound::Included((start, SlotLabel::ALL[0]));
        let hi = Bound::Included((end, SlotLabel::ALL[SlotLabel::ALL.len() - 1]));
        self.by_key.range((lo, hi)).map(|(_, e)| e.clone()).collect()
    }

    /// Apply an already-validated event. Used for both replay and live writes.
    pub fn apply(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::EntryCreated {
                id,
                date,
                label,
                occupants,
            } => {
                self.by_key.insert(
                    (*date, *label),
                    SlotEntry {
                        id: *id,
                        date: *date,
                        label: *label,
                        occupants: occupants.clone(),
                        version: 1,
                    },
                );
                self.by_id.insert(*id, (*date, *label));
            }
            StoreEvent::OccupantsUpdated {
                id,
                occupants,
                version,
                ..
            } => {
                if let Some(key) = self.by_id.get(id)
                    && let Some(entry) = self.by_key.get_mut(key)
                {
                    entry.occupants = occupants.clone();
                    entry.version = *version;
                }
            }
            StoreEvent::EntryDeleted { id, .. } => {
                if let Some(key) = self.by_id.remove(id) {
                    self.by_key.remove(&key);
                }
            }
        }
        self.revision += 1;
    }

    /// Minimal event list that rebuilds the current entries.
    pub fn compacted_events(&self) -> Vec<StoreEvent> {
        let mut events = Vec::with_capacity(self.by_key.len() * 2);
        for entry in self.by_key.values() {
            events.push(StoreEvent::EntryCreated {
                id: entry.id,
                date: entry.date,
                label: entry.label,
                occupants: entry.occupants.clone(),
            });
            if entry.version > 1 {
                events.push(StoreEvent::OccupantsUpdated {
                    id: entry.id,
                    date: entry.date,
                    label: entry.label,
                    occupants: entry.occupants.clone(),
                    version: entry.version,
                });
            }
        }
        events
    }
}
