//! The claim/release decision table, kept free of I/O.

use ulid::Ulid;

use crate::model::*;

/// A position as seen by one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionState {
    Vacant,
    HeldBySelf,
    HeldByOther(String),
}

pub fn position_state(entry: Option<&SlotEntry>, position: usize, principal_id: &str) -> PositionState {
    let occupant = entry.map_or("", |e| e.occupant(position));
    if occupant.is_empty() {
        PositionState::Vacant
    } else if occupant == principal_id {
        PositionState::HeldBySelf
    } else {
        PositionState::HeldByOther(occupant.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Claim,
    Release,
    /// Privileged removal of another principal's claim.
    Override { holder: String },
    Reject { holder: String },
}

pub fn decide(state: &PositionState, principal: &Principal) -> Decision {
    match state {
        PositionState::Vacant => Decision::Claim,
        PositionState::HeldBySelf => Decision::Release,
        PositionState::HeldByOther(holder) if principal.is_privileged => Decision::Override {
            holder: holder.clone(),
        },
        PositionState::HeldByOther(holder) => Decision::Reject {
            holder: holder.clone(),
        },
    }
}

/// Store write realizing a decision, conditioned on what was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create { occupants: Occupants },
    Update { id: Ulid, expected_version: u64, occupants: Occupants },
    Delete { id: Ulid, expected_version: u64 },
}

/// Plan the write for `decision` against the observed `entry`.
/// `None` for `Reject`, which never mutates.
pub fn plan(
    entry: Option<&SlotEntry>,
    position: usize,
    decision: &Decision,
    principal_id: &str,
) -> Option<Mutation> {
    let value = match decision {
        Decision::Claim => principal_id.to_string(),
        Decision::Release | Decision::Override { .. } => String::new(),
        Decision::Reject { .. } => return None,
    };
    let Some(entry) = entry else {
        // Without an entry every position is vacant, so only a claim can land here.
        let mut occupants = vacant_occupants();
        occupants[position] = value;
        return (!all_vacant(&occupants)).then_some(Mutation::Create { occupants });
    };
    let mut occupants = entry.occupants.clone();
    occupants[position] = value;
    if all_vacant(&occupants) {
        Some(Mutation::Delete {
            id: entry.id,
            expected_version: entry.version,
        })
    } else {
        Some(Mutation::Update {
            id: entry.id,
            expected_version: entry.version,
            occupants,
        })
    }
}
