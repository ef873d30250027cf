mod durable;
mod error;
mod index;
mod memory;

pub use durable::DurableStore;
pub use error::StoreError;
pub use index::ReservationIndex;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

/// Persistent collection of reservations consulted by admission.
///
/// Implementations only answer queries and append records; atomicity of
/// check-then-insert is the caller's job (see `ReservationAdmission`).
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn count_reservations_for_user_in_month(
        &self,
        user_id: UserId,
        year: i32,
        month: u32,
    ) -> Result<usize, StoreError>;

    /// Reservations whose lab, room and date all match exactly.
    async fn find_reservations(
        &self,
        lab: &str,
        room: &str,
        date: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Persist a record and return the id assigned to it.
    async fn insert_reservation(&self, record: NewReservation)
    -> Result<ReservationId, StoreError>;

    /// Ordered by date, then start time.
    async fn list_reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Ordered by date, then start time.
    async fn list_reservations(&self) -> Result<Vec<Reservation>, StoreError>;
}

/// Run a listing filter against the narrowest store query that covers it.
pub async fn select_reservations(
    store: &dyn ReservationStore,
    filter: &ReservationFilter,
) -> Result<Vec<Reservation>, StoreError> {
    let mut rows = if let Some(slot) = filter.slot_key() {
        store.find_reservations(&slot.lab, &slot.room, slot.date).await?
    } else if let Some(user_id) = filter.user_id {
        store.list_reservations_for_user(user_id).await?
    } else {
        store.list_reservations().await?
    };
    rows.retain(|r| filter.matches(r));
    sort_for_listing(&mut rows);
    Ok(rows)
}
