use chrono::TimeDelta;

use crate::model::*;

use super::Rejection;

pub(crate) fn check_quota(existing_in_month: usize, quota: usize) -> Result<(), Rejection> {
    if existing_in_month >= quota {
        return Err(Rejection::MonthlyQuotaExceeded { quota });
    }
    Ok(())
}

/// Reject `span` if it collides with any existing reservation of the same slot.
///
/// Only the existing reservation's trailing edge is extended by `buffer_after`:
/// a booking may end right when an existing one starts, but may not start until
/// `buffer_after` has passed since an existing one ended.
pub(crate) fn check_no_conflict(
    existing: &[Reservation],
    span: &Span,
    buffer_after: TimeDelta,
) -> Result<(), Rejection> {
    for reservation in existing {
        let effective = reservation.span().extend_end(buffer_after);
        if effective.overlaps(span) {
            return Err(Rejection::SlotConflict(reservation.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn buffer() -> TimeDelta {
        TimeDelta::minutes(5)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 7, 1).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn existing(start: NaiveTime, end: NaiveTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            owner_name: "Fabi".into(),
            lab: "Lab".into(),
            room: "A".into(),
            date: day(),
            start_time: start,
            end_time: end,
            user_id: 99,
        }
    }

    fn candidate(start: NaiveTime, end: NaiveTime) -> Span {
        Span::on(day(), start, end)
    }

    #[test]
    fn quota_boundary() {
        assert!(check_quota(0, 3).is_ok());
        assert!(check_quota(2, 3).is_ok());
        assert_eq!(check_quota(3, 3), Err(Rejection::MonthlyQuotaExceeded { quota: 3 }));
        assert!(check_quota(4, 3).is_err());
    }

    #[test]
    fn same_start_conflicts() {
        let booked = existing(t(10, 0), t(11, 0));
        let r = check_no_conflict(&[booked.clone()], &candidate(t(10, 0), t(10, 30)), buffer());
        assert_eq!(r, Err(Rejection::SlotConflict(booked.id)));
    }

    #[test]
    fn inside_trailing_buffer_conflicts() {
        let booked = vec![existing(t(10, 0), t(11, 0))];
        assert!(check_no_conflict(&booked, &candidate(t(11, 0), t(11, 4)), buffer()).is_err());
        assert!(check_no_conflict(&booked, &candidate(t(11, 4), t(11, 30)), buffer()).is_err());
    }

    #[test]
    fn after_buffer_is_free() {
        let booked = vec![existing(t(10, 0), t(11, 0))];
        assert!(check_no_conflict(&booked, &candidate(t(11, 5), t(11, 30)), buffer()).is_ok());
        assert!(check_no_conflict(&booked, &candidate(t(11, 5), t(11, 6)), buffer()).is_ok());
    }

    #[test]
    fn no_buffer_before_existing_start() {
        // Ending exactly when the existing booking starts is allowed
        let booked = vec![existing(t(10, 0), t(11, 0))];
        assert!(check_no_conflict(&booked, &candidate(t(9, 0), t(10, 0)), buffer()).is_ok());
        assert!(check_no_conflict(&booked, &candidate(t(9, 0), t(10, 1)), buffer()).is_err());
    }

    #[test]
    fn enclosing_candidate_conflicts() {
        let booked = vec![existing(t(10, 0), t(11, 0))];
        assert!(check_no_conflict(&booked, &candidate(t(9, 0), t(12, 0)), buffer()).is_err());
    }

    #[test]
    fn reports_first_conflict_only() {
        let first = existing(t(8, 0), t(9, 0));
        let second = existing(t(9, 30), t(10, 0));
        let r = check_no_conflict(
            &[first.clone(), second],
            &candidate(t(8, 30), t(9, 45)),
            buffer(),
        );
        assert_eq!(r, Err(Rejection::SlotConflict(first.id)));
    }

    #[test]
    fn buffer_past_midnight_still_blocks_late_start() {
        let booked = vec![existing(t(23, 0), t(23, 57))];
        assert!(check_no_conflict(&booked, &candidate(t(23, 58), t(23, 59)), buffer()).is_err());
    }

    #[test]
    fn zero_buffer_allows_back_to_back() {
        let booked = vec![existing(t(10, 0), t(11, 0))];
        assert!(check_no_conflict(&booked, &candidate(t(11, 0), t(12, 0)), TimeDelta::zero()).is_ok());
    }

    #[test]
    fn empty_slot_never_conflicts() {
        assert!(check_no_conflict(&[], &candidate(t(0, 0), t(23, 59)), buffer()).is_ok());
    }
}
