use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type ReservationId = Ulid;

/// Owning user, as known to the external credential store.
pub type UserId = i64;

/// Half-open wall-clock interval `[start, end)`. No timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of `start..end` on a single calendar day.
    pub fn on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(date.and_time(start), date.and_time(end))
    }

    /// Same start, end pushed out by `by`. May run past midnight.
    pub fn extend_end(&self, by: TimeDelta) -> Self {
        Self {
            start: self.start,
            end: self.end + by,
        }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Calendar month used for quota accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

/// The contended resource-slot: one room of one lab on one day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub lab: String,
    pub room: String,
    pub date: NaiveDate,
}

impl SlotKey {
    pub fn new(lab: &str, room: &str, date: NaiveDate) -> Self {
        Self {
            lab: lab.to_string(),
            room: room.to_string(),
            date,
        }
    }
}

/// A reservation as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    /// Display name copied from the requester at booking time.
    pub owner_name: String,
    pub lab: String,
    pub room: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub user_id: UserId,
}

impl Reservation {
    pub fn from_new(id: ReservationId, record: NewReservation) -> Self {
        Self {
            id,
            owner_name: record.owner_name,
            lab: record.lab,
            room: record.room,
            date: record.date,
            start_time: record.start_time,
            end_time: record.end_time,
            user_id: record.user_id,
        }
    }

    pub fn span(&self) -> Span {
        Span::on(self.date, self.start_time, self.end_time)
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(&self.lab, &self.room, self.date)
    }
}

/// A reservation the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub owner_name: String,
    pub lab: String,
    pub room: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub user_id: UserId,
}

/// Listing order: by date, then start time, then id for a stable tie-break.
pub fn sort_for_listing(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| {
        (a.date, a.start_time, a.id).cmp(&(b.date, b.start_time, b.id))
    });
}

/// Equality filters for reservation listings. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub user_id: Option<UserId>,
    pub lab: Option<String>,
    pub room: Option<String>,
    pub date: Option<NaiveDate>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.user_id.is_none_or(|u| r.user_id == u)
            && self.lab.as_deref().is_none_or(|l| r.lab == l)
            && self.room.as_deref().is_none_or(|m| r.room == m)
            && self.date.is_none_or(|d| r.date == d)
    }

    /// The slot key, when the filter pins lab, room and date together.
    pub fn slot_key(&self) -> Option<SlotKey> {
        match (&self.lab, &self.room, self.date) {
            (Some(lab), Some(room), Some(date)) => Some(SlotKey::new(lab, room, date)),
            _ => None,
        }
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated(Reservation),
}
