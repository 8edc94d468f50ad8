use chrono::{DateTime, Days, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::availability::first_conflict;
use super::EngineError;

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part is kept).
pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(d);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .map_err(|_| EngineError::InvalidRange("dates must be YYYY-MM-DD"))
}

/// Checks a requested rental window against the booking policy and turns it
/// into a span.
pub(crate) fn validate_range(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<DateSpan, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidRange("pickup date must be before return date"));
    }
    if start < today {
        return Err(EngineError::InvalidRange("pickup date is in the past"));
    }
    let span = DateSpan::new(start, end);
    if span.days() > MAX_RENTAL_DAYS {
        return Err(EngineError::InvalidRange("rental period too long"));
    }
    let horizon = today
        .checked_add_days(Days::new(MAX_ADVANCE_DAYS as u64))
        .unwrap_or(NaiveDate::MAX);
    if start > horizon {
        return Err(EngineError::InvalidRange("pickup date too far in the future"));
    }
    Ok(span)
}

pub(crate) fn validate_id(id: &str, what: &'static str) -> Result<(), EngineError> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn check_no_conflict(ledger: &VehicleLedger, span: &DateSpan) -> Result<(), EngineError> {
    match first_conflict(ledger, span) {
        Some(existing) => Err(EngineError::SlotUnavailable(existing)),
        None => Ok(()),
    }
}

/// Owner-driven state machine. `Ok(true)` means the status changes,
/// `Ok(false)` is the pending → pending no-op.
pub(crate) fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<bool, EngineError> {
    match (from, to) {
        (BookingStatus::Pending, BookingStatus::Pending) => Ok(false),
        (BookingStatus::Pending, BookingStatus::Confirmed | BookingStatus::Cancelled) => Ok(true),
        (BookingStatus::Confirmed | BookingStatus::Cancelled, _) => {
            Err(EngineError::InvalidTransition { from, to })
        }
    }
}
