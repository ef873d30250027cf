mod conflict;
mod error;
mod locks;
mod validate;

pub use error::{AdmissionError, Rejection};

use std::sync::Arc;
use std::time::Instant;

use chrono::TimeDelta;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::limits::{BUFFER_AFTER_MINUTES, MONTHLY_QUOTA};
use crate::model::*;
use crate::observability;
use crate::store::ReservationStore;

use conflict::{check_no_conflict, check_quota};
use locks::LockTable;
use validate::validate_request;

/// A booking as submitted by an already-authenticated requester.
/// Temporal fields are raw text and are validated here, not by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub requester_user_id: UserId,
    pub requester_name: String,
    pub lab: String,
    pub room: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`, 24-hour
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted { reservation_id: ReservationId },
    /// Reasons in the order they were found. Never empty.
    Rejected { reasons: Vec<Rejection> },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }

    fn rejected(reason: Rejection) -> Self {
        Admission::Rejected {
            reasons: vec![reason],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub monthly_quota: usize,
    /// Gap required after an existing reservation ends.
    pub buffer_after: TimeDelta,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            monthly_quota: MONTHLY_QUOTA,
            buffer_after: TimeDelta::minutes(BUFFER_AFTER_MINUTES),
        }
    }
}

/// Decides whether a booking may be persisted, and persists it if so.
///
/// Order of checks:
/// 1. date and time validation (all problems reported together)
/// 2. monthly quota of the requester
/// 3. overlap with existing reservations of the same lab, room and date
///
/// Steps 2 and 3 stop at the first failure. Quota count, overlap scan and
/// insert run while holding the requester's month lock and then the slot lock,
/// always in that order, so concurrent admissions cannot both pass and insert.
pub struct ReservationAdmission {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    policy: AdmissionPolicy,
    month_locks: LockTable<(UserId, YearMonth)>,
    slot_locks: LockTable<SlotKey>,
}

impl ReservationAdmission {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(store, clock, AdmissionPolicy::default())
    }

    pub fn with_policy(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        policy: AdmissionPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            month_locks: LockTable::new(),
            slot_locks: LockTable::new(),
        }
    }

    pub fn store(&self) -> &dyn ReservationStore {
        self.store.as_ref()
    }

    pub async fn admit(&self, request: BookingRequest) -> Result<Admission, AdmissionError> {
        let start = Instant::now();
        let result = self.decide(request).await;
        metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(Admission::Accepted { .. }) => {
                metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "accepted").increment(1);
            }
            Ok(Admission::Rejected { reasons }) => {
                metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "rejected").increment(1);
                for reason in reasons {
                    metrics::counter!(observability::REJECTIONS_TOTAL, "reason" => reason.label())
                        .increment(1);
                }
            }
            Err(_) => {
                metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => "error").increment(1);
            }
        }
        result
    }

    async fn decide(&self, request: BookingRequest) -> Result<Admission, AdmissionError> {
        let candidate = match validate_request(&request, self.clock.today()) {
            Ok(candidate) => candidate,
            Err(reasons) => {
                debug!("user {} booking failed validation: {reasons:?}", request.requester_user_id);
                return Ok(Admission::Rejected { reasons });
            }
        };

        let month = YearMonth::of(candidate.date);
        let slot = SlotKey::new(&request.lab, &request.room, candidate.date);
        let _month_guard = self.month_locks.lock((request.requester_user_id, month)).await;
        let _slot_guard = self.slot_locks.lock(slot.clone()).await;

        let booked_this_month = self
            .store
            .count_reservations_for_user_in_month(request.requester_user_id, month.year, month.month)
            .await?;
        if let Err(reason) = check_quota(booked_this_month, self.policy.monthly_quota) {
            debug!("user {} already has {booked_this_month} reservations in {}-{:02}", request.requester_user_id, month.year, month.month);
            return Ok(Admission::rejected(reason));
        }

        let same_slot = self
            .store
            .find_reservations(&slot.lab, &slot.room, slot.date)
            .await?;
        if let Err(reason) = check_no_conflict(&same_slot, &candidate.span, self.policy.buffer_after) {
            debug!("{}/{} on {}: {reason}", slot.lab, slot.room, slot.date);
            return Ok(Admission::rejected(reason));
        }

        let reservation_id = self
            .store
            .insert_reservation(NewReservation {
                owner_name: request.requester_name,
                lab: slot.lab.clone(),
                room: slot.room.clone(),
                date: candidate.date,
                start_time: candidate.span.start.time(),
                end_time: candidate.span.end.time(),
                user_id: request.requester_user_id,
            })
            .await?;
        info!("admitted reservation {reservation_id}: {}/{} on {}", slot.lab, slot.room, slot.date);
        Ok(Admission::Accepted { reservation_id })
    }
}
