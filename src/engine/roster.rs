use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::directory::DirectoryService;
use crate::model::*;
use crate::store::SlotStore;

use super::{BookingEngine, BookingError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterRow {
    pub date: NaiveDate,
    pub label: SlotLabel,
    pub time_range: &'static str,
    pub position: usize,
    pub occupant_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Every assignment in a date range with occupant details resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Roster {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub entries: Vec<SlotEntry>,
    pub people: BTreeMap<String, DisplayInfo>,
    /// Occupants the directory has no record for.
    pub unresolved: Vec<String>,
    pub rows: Vec<RosterRow>,
}

fn distinct_occupants(entries: &[SlotEntry]) -> BTreeSet<&str> {
    entries
        .iter()
        .flat_map(|e| e.occupants.iter())
        .map(String::as_str)
        .filter(|o| !o.is_empty())
        .collect()
}

impl<S: SlotStore, D: DirectoryService> BookingEngine<S, D> {
    /// Admin-only. Each distinct occupant is looked up once, however many
    /// positions they fill.
    pub async fn admin_roster(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        principal: &Principal,
    ) -> Result<Roster, BookingError> {
        if !principal.is_privileged {
            return Err(BookingError::Forbidden);
        }
        let entries = self.store.query_range(start, end).await?;

        let mut people = BTreeMap::new();
        let mut unresolved = Vec::new();
        for id in distinct_occupants(&entries) {
            metrics::counter!(crate::observability::DIRECTORY_LOOKUPS_TOTAL).increment(1);
            match self.directory.get_display_info(id).await {
                Some(info) => {
                    people.insert(id.to_string(), info);
                }
                None => unresolved.push(id.to_string()),
            }
        }

        let mut rows = Vec::new();
        for entry in &entries {
            for (position, occupant) in entry.occupants.iter().enumerate() {
                if occupant.is_empty() {
                    continue;
                }
                let info = people.get(occupant);
                rows.push(RosterRow {
                    date: entry.date,
                    label: entry.label,
                    time_range: entry.label.time_range(),
                    position,
                    occupant_id: occupant.clone(),
                    name: info.map(|i| i.name.clone()),
                    email: info.map(|i| i.email.clone()),
                });
            }
        }

        tracing::debug!(
            "roster {start}..={end}: {} entries, {} people, {} unresolved",
            entries.len(),
            people.len(),
            unresolved.len()
        );
        Ok(Roster {
            start,
            end,
            entries,
            people,
            unresolved,
            rows,
        })
    }
}
