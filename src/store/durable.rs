use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::ReservationLog;

use super::{ReservationIndex, ReservationStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: ReservationLog, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for append in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = append.response.send(r);
        }
    }
    tracing::debug!("WAL writer for {} stopped after {} appends", wal.path().display(), wal.appends());
}

/// Write and fsync a batch. On failure the whole batch is rolled back off the
/// file, so no unacknowledged reservation can resurface on replay and later
/// entries never sit behind a torn one.
fn flush_batch(wal: &mut ReservationLog, batch: &[WalAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|append| wal.append_buffered(&append.event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        match wal.rollback() {
            Ok(()) => warn!("rolled back batch of {} after WAL write failure: {e}", batch.len()),
            Err(rollback_err) => {
                error!("WAL rollback failed, refusing further writes: {rollback_err}");
            }
        }
    }
    result
}

/// Reservation store backed by a write-ahead log.
///
/// Reads are served from the in-memory index. An insert is acknowledged only
/// once its event has been fsynced, and only then becomes visible to reads.
pub struct DurableStore {
    index: ReservationIndex,
    wal_tx: mpsc::Sender<WalAppend>,
}

impl DurableStore {
    /// Replay the WAL at `path` and start its writer. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = ReservationLog::open(path)?;

        let index = ReservationIndex::new();
        for event in &events {
            index.apply_event(event);
        }
        info!("replayed {} reservations from {}", index.len(), path.display());

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self { index, wal_tx })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }
}

#[async_trait]
impl ReservationStore for DurableStore {
    async fn count_reservations_for_user_in_month(
        &self,
        user_id: UserId,
        year: i32,
        month: u32,
    ) -> Result<usize, StoreError> {
        Ok(self
            .index
            .count_for_user_in_month(user_id, YearMonth { year, month }))
    }

    async fn find_reservations(
        &self,
        lab: &str,
        room: &str,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.index.find(lab, room, date))
    }

    async fn insert_reservation(
        &self,
        record: NewReservation,
    ) -> Result<ReservationId, StoreError> {
        self.index.ensure_capacity()?;
        let id = Ulid::new();
        let event = Event::ReservationCreated(Reservation::from_new(id, record));
        self.wal_append(&event).await?;
        self.index.apply_event(&event);
        Ok(id)
    }

    async fn list_reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut rows = self.index.for_user(user_id);
        sort_for_listing(&mut rows);
        Ok(rows)
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let mut rows = self.index.all();
        sort_for_listing(&mut rows);
        Ok(rows)
    }
}
