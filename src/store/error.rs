use ulid::Ulid;

#[derive(Debug)]
pub enum StoreError {
    /// The conditional write lost: the entry exists, or its version moved.
    Conflict,
    NotFound(Ulid),
    /// The write would break an entry invariant (e.g. an all-vacant entry).
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "conflict: slot changed since it was read"),
            StoreError::NotFound(id) => write!(f, "entry not found: {id}"),
            StoreError::Invalid(msg) => write!(f, "invalid entry: {msg}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
