use chrono::NaiveDate;
use dashmap::DashMap;

use crate::limits::MAX_RESERVATIONS;
use crate::model::*;

use super::StoreError;

/// In-memory reservation indices shared by every store backend.
pub struct ReservationIndex {
    by_id: DashMap<ReservationId, Reservation>,
    by_slot: DashMap<SlotKey, Vec<ReservationId>>,
    by_user: DashMap<UserId, Vec<ReservationId>>,
}

impl Default for ReservationIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationIndex {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_slot: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn ensure_capacity(&self) -> Result<(), StoreError> {
        if self.by_id.len() >= MAX_RESERVATIONS {
            return Err(StoreError::LimitExceeded("too many reservations"));
        }
        Ok(())
    }

    pub fn get(&self, id: &ReservationId) -> Option<Reservation> {
        self.by_id.get(id).map(|e| e.value().clone())
    }

    pub fn insert(&self, reservation: Reservation) {
        let id = reservation.id;
        self.by_slot
            .entry(reservation.slot_key())
            .or_default()
            .push(id);
        self.by_user.entry(reservation.user_id).or_default().push(id);
        self.by_id.insert(id, reservation);
    }

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::ReservationCreated(reservation) => self.insert(reservation.clone()),
        }
    }

    pub fn count_for_user_in_month(&self, user_id: UserId, month: YearMonth) -> usize {
        let ids = self.ids_for_user(user_id);
        ids.iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|r| month.contains(r.date))
            .count()
    }

    pub fn find(&self, lab: &str, room: &str, date: NaiveDate) -> Vec<Reservation> {
        let ids = self
            .by_slot
            .get(&SlotKey::new(lab, room, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        self.resolve(&ids)
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<Reservation> {
        let ids = self.ids_for_user(user_id);
        self.resolve(&ids)
    }

    pub fn all(&self) -> Vec<Reservation> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }

    fn ids_for_user(&self, user_id: UserId) -> Vec<ReservationId> {
        self.by_user
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn resolve(&self, ids: &[ReservationId]) -> Vec<Reservation> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }
}
