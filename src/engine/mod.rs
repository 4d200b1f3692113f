mod confirm;
mod decision;
mod error;
mod roster;
mod view;

pub use confirm::{AskFirst, Confirm, ConfirmedAs, Prompt, PromptKind};
pub use decision::{Decision, Mutation, PositionState, decide, plan, position_state};
pub use error::BookingError;
pub use roster::{Roster, RosterRow};
pub use view::{DayView, PositionView, SlotView, project_month, project_position, project_slots};

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::calendar::{CalendarPolicy, month_bounds};
use crate::directory::DirectoryService;
use crate::limits::MAX_OCCUPANT_ID_LEN;
use crate::model::*;
use crate::store::{SlotStore, StoreError, Subscription};

/// Result of a `claim_or_release` that did not error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Claimed,
    Released,
    Overridden { previous: String },
    /// The user declined the confirmation; nothing was written.
    Declined,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Claimed => "claimed",
            Outcome::Released => "released",
            Outcome::Overridden { .. } => "overridden",
            Outcome::Declined => "declined",
        }
    }
}

/// Applies booking actions against an injected slot store.
///
/// Holds no slot state of its own: every decision is made from a store read
/// taken during that call, and every write is conditioned on that read.
pub struct BookingEngine<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    policy: Arc<CalendarPolicy>,
}

impl<S, D> Clone for BookingEngine<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            directory: self.directory.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<S: SlotStore, D: DirectoryService> BookingEngine<S, D> {
    pub fn new(store: Arc<S>, directory: Arc<D>, policy: Arc<CalendarPolicy>) -> Self {
        Self {
            store,
            directory,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub fn policy(&self) -> &CalendarPolicy {
        &self.policy
    }

    /// Claim a vacant position, release one's own, or (privileged only)
    /// vacate someone else's. Mutating actions go through `confirm` first.
    pub async fn claim_or_release<C: Confirm + ?Sized>(
        &self,
        date: NaiveDate,
        label: SlotLabel,
        position: usize,
        principal: &Principal,
        confirm: &C,
    ) -> Result<Outcome, BookingError> {
        if principal.id.is_empty() || principal.id.len() > MAX_OCCUPANT_ID_LEN {
            return Err(BookingError::InvalidPrincipal);
        }
        if position >= POSITIONS {
            return Err(BookingError::InvalidPosition(position));
        }
        if !self.policy.is_bookable(date) {
            debug!("{} tried {date} {label}: not bookable", principal.id);
            return Err(BookingError::PolicyViolation(date));
        }

        let observed = self.store.find(date, label).await?;
        let decision = decide(
            &position_state(observed.as_ref(), position, &principal.id),
            principal,
        );
        if let Decision::Reject { holder } = decision {
            metrics::counter!(crate::observability::ACTIONS_TOTAL, "outcome" => "slot_taken")
                .increment(1);
            return Err(BookingError::SlotTaken { position, holder });
        }

        let prompt = self.prompt_for(&decision, date, label, position).await;
        if !confirm.confirm(&prompt).await {
            metrics::counter!(crate::observability::ACTIONS_TOTAL, "outcome" => "declined")
                .increment(1);
            return Ok(Outcome::Declined);
        }

        // The user may have taken a while; decide again from fresh state.
        let fresh = self.store.find(date, label).await?;
        let fresh_decision = decide(
            &position_state(fresh.as_ref(), position, &principal.id),
            principal,
        );
        if fresh_decision != decision {
            debug!(
                "{date} {label} #{position} moved while confirming: {decision:?} -> {fresh_decision:?}"
            );
            return Err(self.conflict());
        }

        let outcome = match &decision {
            Decision::Claim => Outcome::Claimed,
            Decision::Release => Outcome::Released,
            Decision::Override { holder } => Outcome::Overridden {
                previous: holder.clone(),
            },
            Decision::Reject { .. } => unreachable!("rejected before confirmation"),
        };
        if let Some(mutation) = plan(fresh.as_ref(), position, &decision, &principal.id) {
            self.apply(date, label, mutation).await?;
        }

        info!(
            "{} {} {date} {label} #{position}",
            principal.id,
            outcome.label()
        );
        metrics::counter!(crate::observability::ACTIONS_TOTAL, "outcome" => outcome.label())
            .increment(1);
        Ok(outcome)
    }

    async fn prompt_for(
        &self,
        decision: &Decision,
        date: NaiveDate,
        label: SlotLabel,
        position: usize,
    ) -> Prompt {
        let (kind, holder, holder_id) = match decision {
            Decision::Claim | Decision::Reject { .. } => (PromptKind::Claim, None, None),
            Decision::Release => (PromptKind::Release, None, None),
            Decision::Override { holder } => {
                metrics::counter!(crate::observability::DIRECTORY_LOOKUPS_TOTAL).increment(1);
                let name = self
                    .directory
                    .get_display_info(holder)
                    .await
                    .map(|info| info.name)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| holder.clone());
                (PromptKind::Override, Some(name), Some(holder.clone()))
            }
        };
        Prompt {
            kind,
            date,
            label,
            position,
            holder,
            holder_id,
        }
    }

    async fn apply(
        &self,
        date: NaiveDate,
        label: SlotLabel,
        mutation: Mutation,
    ) -> Result<(), BookingError> {
        let result = match mutation {
            Mutation::Create { occupants } => self
                .store
                .create_entry(date, label, occupants)
                .await
                .map(|_| ()),
            Mutation::Update {
                id,
                expected_version,
                occupants,
            } => self
                .store
                .update_occupants(id, expected_version, occupants)
                .await
                .map(|_| ()),
            Mutation::Delete {
                id,
                expected_version,
            } => match self.store.delete_entry(id, expected_version).await {
                // Already gone is the state we wanted.
                Err(StoreError::NotFound(_)) => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict) => Err(self.conflict()),
            Err(e) => Err(e.into()),
        }
    }

    fn conflict(&self) -> BookingError {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        BookingError::Conflict
    }

    fn month_range(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), BookingError> {
        month_bounds(year, month).ok_or(BookingError::InvalidMonth { year, month })
    }

    /// Live feed over one calendar month.
    pub async fn subscribe_month(&self, year: i32, month: u32) -> Result<Subscription, BookingError> {
        let (start, end) = Self::month_range(year, month)?;
        Ok(self.store.subscribe(start, end).await?)
    }

    /// Project a month snapshot for `viewer`.
    pub fn project_month(
        &self,
        entries: &[SlotEntry],
        year: i32,
        month: u32,
        today: NaiveDate,
        viewer: &Principal,
    ) -> Result<Vec<DayView>, BookingError> {
        let (first, _) = Self::month_range(year, month)?;
        Ok(project_month(&self.policy, entries, first, today, &viewer.id))
    }

    /// Read a month from the store and project it for `viewer`.
    pub async fn month_view(
        &self,
        year: i32,
        month: u32,
        today: NaiveDate,
        viewer: &Principal,
    ) -> Result<Vec<DayView>, BookingError> {
        let (first, last) = Self::month_range(year, month)?;
        let entries = self.store.query_range(first, last).await?;
        self.project_month(&entries, year, month, today, viewer)
    }
}
