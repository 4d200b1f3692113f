/// Longest accepted principal id stored in an occupant position.
pub const MAX_OCCUPANT_ID_LEN: usize = 128;

/// Widest date range a single query or subscription may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Live month feeds a single connection may hold at once.
pub const MAX_SUBSCRIPTIONS_PER_CONNECTION: usize = 8;

/// Longest request line accepted on the wire.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Longest display name accepted for a directory record.
pub const MAX_NAME_LEN: usize = 256;
