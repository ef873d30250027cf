use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{ReservationIndex, ReservationStore, StoreError};

/// Volatile store. Same indices as `DurableStore`, nothing written to disk.
#[derive(Default)]
pub struct MemoryStore {
    index: ReservationIndex,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
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
        self.index.insert(Reservation::from_new(id, record));
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
