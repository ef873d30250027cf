use chrono::{NaiveDate, NaiveDateTime};

use crate::model::Span;

use super::{BookingRequest, Rejection};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A request whose date and times parsed and make temporal sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub date: NaiveDate,
    pub span: Span,
}

/// Parse and sanity-check the temporal fields.
///
/// Date and time problems are collected together rather than stopping at the
/// first: a bad date and a bad time come back as two reasons. Times are parsed
/// together with the date, so an unparseable date also makes the times invalid.
pub(crate) fn validate_request(
    request: &BookingRequest,
    today: NaiveDate,
) -> Result<Candidate, Vec<Rejection>> {
    let mut reasons = Vec::new();

    let date = match NaiveDate::parse_from_str(&request.date, DATE_FORMAT) {
        Ok(date) => {
            if date < today {
                reasons.push(Rejection::DateInPast);
            }
            Some(date)
        }
        Err(_) => {
            reasons.push(Rejection::InvalidDate);
            None
        }
    };

    let start = parse_on_date(&request.date, &request.start_time);
    let end = parse_on_date(&request.date, &request.end_time);
    let span = match (start, end) {
        (Some(start), Some(end)) => {
            if end <= start {
                reasons.push(Rejection::EndNotAfterStart);
                None
            } else {
                Some(Span::new(start, end))
            }
        }
        _ => {
            reasons.push(Rejection::InvalidTime);
            None
        }
    };

    match (date, span) {
        (Some(date), Some(span)) if reasons.is_empty() => Ok(Candidate { date, span }),
        _ => Err(reasons),
    }
}

fn parse_on_date(date: &str, time: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), DATE_TIME_FORMAT).ok()
}
