use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::StoreEvent;
use crate::wal::Wal;

type Ack = oneshot::Sender<io::Result<()>>;

pub(crate) enum WalCommand {
    Append { event: StoreEvent, response: Ack },
    Rewrite { events: Vec<StoreEvent>, response: Ack },
    Stats { response: oneshot::Sender<WalStats> },
}

/// Writer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub appends_since_compact: u64,
    /// Batches committed since the writer started, one fsync each.
    pub batches: u64,
}

/// Owns the WAL and group-commits appends: take the first append, drain
/// whatever else is already queued, then fsync once for the whole batch.
pub(crate) async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batches = 0u64;
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_other(&mut wal, other, &mut batches);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        batches += 1;
        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd, &mut batches);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(StoreEvent, Ack)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so stale buffered bytes never leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(ref e) = result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
    }
    for (_, ack) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = ack.send(r);
    }
}

fn handle_other(wal: &mut Wal, cmd: WalCommand, batches: &mut u64) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::Stats { response } => {
            let _ = response.send(WalStats {
                appends_since_compact: wal.appends_since_compact(),
                batches: *batches,
            });
        }
        WalCommand::Append { event, response } => {
            commit_batch(wal, vec![(event, response)]);
            *batches += 1;
        }
    }
}
