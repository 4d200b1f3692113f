mod error;
mod table;
mod writer;

pub use error::StoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use table::{SlotKey, SlotTable};
use writer::{WalCommand, wal_writer_loop};

pub use writer::WalStats;

/// The shared, durable record of bookings.
///
/// Writes are conditional: `create_entry` requires the (date, label) key to be
/// absent, and `update_occupants` / `delete_entry` require the caller's
/// `expected_version` to match. A lost race surfaces as `StoreError::Conflict`.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Entries dated within `[start, end]`, ordered by (date, label).
    async fn query_range(&self, start: NaiveDate, end: NaiveDate)
    -> Result<Vec<SlotEntry>, StoreError>;

    async fn find(&self, date: NaiveDate, label: SlotLabel)
    -> Result<Option<SlotEntry>, StoreError>;

    /// Live feed over `[start, end]`. Dropping the handle releases it.
    async fn subscribe(&self, start: NaiveDate, end: NaiveDate)
    -> Result<Subscription, StoreError>;

    async fn create_entry(
        &self,
        date: NaiveDate,
        label: SlotLabel,
        occupants: Occupants,
    ) -> Result<SlotEntry, StoreError>;

    async fn update_occupants(
        &self,
        id: Ulid,
        expected_version: u64,
        occupants: Occupants,
    ) -> Result<SlotEntry, StoreError>;

    async fn delete_entry(&self, id: Ulid, expected_version: u64) -> Result<(), StoreError>;
}

/// Full contents of a subscribed range as of `revision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub revision: u64,
    pub entries: Vec<SlotEntry>,
}

/// Handle to a live range feed.
///
/// The first `next()` yields the current snapshot immediately; later calls
/// wait for a change inside the range. Revisions never go backwards, and a
/// burst of writes may be folded into one snapshot.
pub struct Subscription {
    id: u64,
    start: NaiveDate,
    end: NaiveDate,
    rx: mpsc::Receiver<u64>,
    table: Arc<RwLock<SlotTable>>,
    hub: Arc<NotifyHub>,
    delivered: Option<u64>,
}

impl Subscription {
    /// Next snapshot. After the initial one, returns `None` once the store
    /// has been dropped.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if let Some(delivered) = self.delivered {
            loop {
                let revision = self.rx.recv().await?;
                if revision > delivered {
                    break;
                }
            }
        }
        let table = self.table.read().await;
        let snapshot = Snapshot {
            revision: table.revision(),
            entries: table.range(self.start, self.end),
        };
        drop(table);
        self.delivered = Some(snapshot.revision);
        Some(snapshot)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

fn validate_occupants(occupants: &Occupants) -> Result<(), StoreError> {
    if occupants.iter().any(|o| o.len() > MAX_OCCUPANT_ID_LEN) {
        return Err(StoreError::LimitExceeded("occupant id too long"));
    }
    if all_vacant(occupants) {
        return Err(StoreError::Invalid("every position is vacant"));
    }
    Ok(())
}

fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<(), StoreError> {
    if (end - start).num_days() > MAX_QUERY_WINDOW_DAYS {
        return Err(StoreError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// `SlotStore` backed by an in-memory table and a group-committed WAL.
///
/// Writers serialize per (date, label) key and hold no table lock while
/// waiting on the WAL, so writes to different keys share one fsync. The
/// table write lock is taken only to apply an acknowledged event.
pub struct WalSlotStore {
    table: Arc<RwLock<SlotTable>>,
    key_locks: DashMap<SlotKey, Arc<Mutex<()>>>,
    /// Held shared by every write and exclusively by `compact`, so a
    /// rewrite never races an acknowledged but unapplied append.
    write_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
}

impl WalSlotStore {
    /// Replay the WAL at `path` and start its writer task. Must be called
    /// from within a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&path)?;
        let mut table = SlotTable::default();
        for event in &events {
            table.apply(event);
        }
        tracing::info!(
            "slot store replayed {} events into {} entries from {}",
            events.len(),
            table.len(),
            path.display()
        );

        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            table: Arc::new(RwLock::new(table)),
            key_locks: DashMap::new(),
            write_gate: RwLock::new(()),
            wal_tx,
            notify: Arc::new(NotifyHub::new()),
        })
    }

    pub fn notify_hub(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub async fn entry_count(&self) -> usize {
        self.table.read().await.len()
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, StoreError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))
    }

    async fn lock_key(&self, key: SlotKey) -> OwnedMutexGuard<()> {
        let lock = self.key_locks.entry(key).or_default().clone();
        lock.lock_owned().await
    }

    /// Key of the entry `id`, as seen right now.
    async fn key_of(&self, id: Ulid) -> Result<SlotKey, StoreError> {
        self.table
            .read()
            .await
            .get_by_id(&id)
            .map(|e| (e.date, e.label))
            .ok_or(StoreError::NotFound(id))
    }

    /// Current entry `id` checked against `expected_version`. The caller
    /// holds the entry's key lock.
    async fn current(&self, id: Ulid, expected_version: u64) -> Result<SlotEntry, StoreError> {
        let table = self.table.read().await;
        let current = table.get_by_id(&id).ok_or(StoreError::NotFound(id))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict);
        }
        Ok(current.clone())
    }

    /// Durably log, then apply and publish. The caller holds the key lock
    /// and a share of the write gate; nothing is applied if the append fails.
    async fn persist_and_apply(&self, event: StoreEvent) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_request(
            WalCommand::Append {
                event: event.clone(),
                response: tx,
            },
            rx,
        )
        .await?
        .map_err(|e| StoreError::WalError(e.to_string()))?;
        let mut table = self.table.write().await;
        table.apply(&event);
        self.notify.send(&event, table.revision());
        Ok(())
    }

    /// Rewrite the WAL with just the events needed for the live entries.
    /// Holds the write gate exclusively so no write can interleave.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _gate = self.write_gate.write().await;
        let events = self.table.read().await.compacted_events();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Rewrite { events, response: tx }, rx)
            .await?
            .map_err(|e| StoreError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_stats(&self) -> Result<WalStats, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Stats { response: tx }, rx).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal_stats()
            .await
            .map_or(0, |stats| stats.appends_since_compact)
    }
}

impl Drop for WalSlotStore {
    fn drop(&mut self) {
        self.notify.close();
    }
}

#[async_trait]
impl SlotStore for WalSlotStore {
    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SlotEntry>, StoreError> {
        validate_window(start, end)?;
        Ok(self.table.read().await.range(start, end))
    }

    async fn find(
        &self,
        date: NaiveDate,
        label: SlotLabel,
    ) -> Result<Option<SlotEntry>, StoreError> {
        Ok(self.table.read().await.get(date, label).cloned())
    }

    async fn subscribe(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Subscription, StoreError> {
        validate_window(start, end)?;
        let (id, rx) = self.notify.register(start, end);
        Ok(Subscription {
            id,
            start,
            end,
            rx,
            table: self.table.clone(),
            hub: self.notify.clone(),
            delivered: None,
        })
    }

    async fn create_entry(
        &self,
        date: NaiveDate,
        label: SlotLabel,
        occupants: Occupants,
    ) -> Result<SlotEntry, StoreError> {
        validate_occupants(&occupants)?;
        let _gate = self.write_gate.read().await;
        let _key = self.lock_key((date, label)).await;
        if self.table.read().await.get(date, label).is_some() {
            return Err(StoreError::Conflict);
        }
        let entry = SlotEntry {
            id: Ulid::new(),
            date,
            label,
            occupants,
            version: 1,
        };
        let event = StoreEvent::EntryCreated {
            id: entry.id,
            date,
            label,
            occupants: entry.occupants.clone(),
        };
        self.persist_and_apply(event).await?;
        Ok(entry)
    }

    async fn update_occupants(
        &self,
        id: Ulid,
        expected_version: u64,
        occupants: Occupants,
    ) -> Result<SlotEntry, StoreError> {
        validate_occupants(&occupants)?;
        let _gate = self.write_gate.read().await;
        let _key = self.lock_key(self.key_of(id).await?).await;
        let entry = SlotEntry {
            occupants,
            version: expected_version + 1,
            ..self.current(id, expected_version).await?
        };
        let event = StoreEvent::OccupantsUpdated {
            id,
            date: entry.date,
            label: entry.label,
            occupants: entry.occupants.clone(),
            version: entry.version,
        };
        self.persist_and_apply(event).await?;
        Ok(entry)
    }

    async fn delete_entry(&self, id: Ulid, expected_version: u64) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        let _key = self.lock_key(self.key_of(id).await?).await;
        let current = self.current(id, expected_version).await?;
        let event = StoreEvent::EntryDeleted {
            id,
            date: current.date,
            label: current.label,
        };
        self.persist_and_apply(event).await
    }
}
