use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_OCCUPANT_ID_LEN;
use crate::store::StoreError;

#[derive(Debug)]
pub enum BookingError {
    /// The date is a weekend or holiday.
    PolicyViolation(NaiveDate),
    /// The slot changed between read and write; refresh from the feed.
    Conflict,
    NotFound(Ulid),
    /// Someone else holds the position and the caller may not override.
    SlotTaken { position: usize, holder: String },
    Forbidden,
    InvalidPosition(usize),
    InvalidMonth { year: i32, month: u32 },
    /// The caller's id is empty or longer than an occupant id may be.
    InvalidPrincipal,
    /// Store failure with nothing committed.
    Store(StoreError),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::PolicyViolation(date) => {
                write!(f, "{date} is not bookable (weekend or holiday)")
            }
            BookingError::Conflict => {
                write!(f, "conflict: the slot changed, refresh and try again")
            }
            BookingError::NotFound(id) => write!(f, "entry not found: {id}"),
            BookingError::SlotTaken { position, holder } => {
                write!(f, "position {} is already taken by {holder}", position + 1)
            }
            BookingError::Forbidden => write!(f, "admin privileges required"),
            BookingError::InvalidPosition(p) => write!(f, "no such position: {p}"),
            BookingError::InvalidMonth { year, month } => {
                write!(f, "no such month: {year}-{month:02}")
            }
            BookingError::InvalidPrincipal => {
                write!(f, "user id must be 1..={MAX_OCCUPANT_ID_LEN} bytes")
            }
            BookingError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => BookingError::Conflict,
            StoreError::NotFound(id) => BookingError::NotFound(id),
            other => BookingError::Store(other),
        }
    }
}

impl BookingError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::PolicyViolation(_) => "policy_violation",
            BookingError::Conflict => "conflict",
            BookingError::NotFound(_) => "not_found",
            BookingError::SlotTaken { .. } => "slot_taken",
            BookingError::Forbidden => "forbidden",
            BookingError::InvalidPosition(_) => "invalid_position",
            BookingError::InvalidMonth { .. }
            | BookingError::InvalidPrincipal
            | BookingError::Store(StoreError::Invalid(_) | StoreError::LimitExceeded(_)) => {
                "bad_request"
            }
            BookingError::Store(_) => "internal",
        }
    }
}
