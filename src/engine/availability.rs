use ulid::Ulid;

use crate::model::*;

/// First booking that still holds dates overlapping `span`.
/// Cancelled bookings have released their range and never conflict.
pub fn first_conflict(ledger: &VehicleLedger, span: &DateSpan) -> Option<Ulid> {
    ledger
        .overlapping(span)
        .find(|b| b.status.holds_dates())
        .map(|b| b.id)
}

/// `true` iff no pending or confirmed booking overlaps `[span.start, span.end)`.
pub fn is_free(ledger: &VehicleLedger, span: &DateSpan) -> bool {
    first_conflict(ledger, span).is_none()
}

/// Whole days billed for a rental. Never below one.
pub fn rental_days(span: &DateSpan) -> u64 {
    span.days().max(1) as u64
}

/// `daily_rate * days`, or `None` on overflow.
pub fn quote(daily_rate: u64, span: &DateSpan) -> Option<u64> {
    daily_rate.checked_mul(rental_days(span))
}

/// Ranges currently held on the ledger that intersect `window`, merged and
/// clamped to it. Used to render a vehicle's booked calendar.
pub fn held_ranges(ledger: &VehicleLedger, window: &DateSpan) -> Vec<DateSpan> {
    let mut held: Vec<DateSpan> = ledger
        .overlapping(window)
        .filter(|b| b.status.holds_dates())
        .map(|b| DateSpan::new(b.pickup_date.max(window.start), b.return_date.min(window.end)))
        .collect();
    held.sort_by_key(|s| s.start);
    merge_touching(&held)
}

/// Merge sorted ranges that overlap or touch.
pub fn merge_touching(sorted: &[DateSpan]) -> Vec<DateSpan> {
    let mut merged: Vec<DateSpan> = Vec::with_capacity(sorted.len());
    for span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(*span);
    }
    merged
}
