use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::model::StoreEvent;

struct Subscriber {
    start: NaiveDate,
    end: NaiveDate,
    tx: mpsc::Sender<u64>,
}

/// Routes store revisions to the live feeds whose date range they touch.
///
/// Each feed gets a single-slot channel: a revision that arrives while an
/// earlier one is still pending is dropped, since the reader re-snapshots the
/// whole range anyway.
pub struct NotifyHub {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a feed over `[start, end]`.
    pub fn register(&self, start: NaiveDate, end: NaiveDate) -> (u64, mpsc::Receiver<u64>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.insert(id, Subscriber { start, end, tx });
        metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).increment(1.0);
        (id, rx)
    }

    /// Publish `event` at store `revision`. No-op if no feed covers its date.
    pub fn send(&self, event: &StoreEvent, revision: u64) {
        let date = event.date();
        let mut closed = Vec::new();
        for sub in self.subscribers.iter() {
            if date < sub.start || date > sub.end {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Closed(_)) = sub.tx.try_send(revision) {
                closed.push(*sub.key());
            }
        }
        for id in closed {
            self.remove(id);
        }
    }

    pub fn remove(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        }
    }

    /// Drop every feed; each receiver then sees its channel close.
    pub fn close(&self) {
        let ids: Vec<u64> = self.subscribers.iter().map(|sub| *sub.key()).collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// Live feed count.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
