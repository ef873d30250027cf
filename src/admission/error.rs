use crate::model::ReservationId;
use crate::store::StoreError;

/// Why a booking was refused. Closed set; every variant is user-facing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidDate,
    DateInPast,
    InvalidTime,
    EndNotAfterStart,
    MonthlyQuotaExceeded { quota: usize },
    /// First existing reservation found to collide, buffer included.
    SlotConflict(ReservationId),
}

impl Rejection {
    /// Short stable label, used as a metrics tag.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidDate => "invalid_date",
            Rejection::DateInPast => "date_in_past",
            Rejection::InvalidTime => "invalid_time",
            Rejection::EndNotAfterStart => "end_not_after_start",
            Rejection::MonthlyQuotaExceeded { .. } => "monthly_quota_exceeded",
            Rejection::SlotConflict(_) => "slot_conflict",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidDate => write!(f, "invalid date"),
            Rejection::DateInPast => write!(f, "date cannot be in the past"),
            Rejection::InvalidTime => write!(f, "invalid time"),
            Rejection::EndNotAfterStart => write!(f, "end time must be after start time"),
            Rejection::MonthlyQuotaExceeded { quota } => {
                write!(f, "monthly quota of {quota} reservations already used")
            }
            Rejection::SlotConflict(id) => write!(f, "conflicts with reservation {id}"),
        }
    }
}

/// Fault while deciding. Not a rejection: the booking was neither accepted nor refused.
#[derive(Debug)]
pub enum AdmissionError {
    StoreUnavailable(StoreError),
}

impl From<StoreError> for AdmissionError {
    fn from(e: StoreError) -> Self {
        AdmissionError::StoreUnavailable(e)
    }
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::StoreUnavailable(e) => write!(f, "reservation store unavailable: {e}"),
        }
    }
}

impl std::error::Error for AdmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdmissionError::StoreUnavailable(e) => Some(e),
        }
    }
}
