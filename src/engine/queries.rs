use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{held_ranges, is_free};
use super::conflict::validate_range;
use super::{Engine, EngineError};

/// Newest first; ties fall back to the id, which also encodes creation time.
fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

impl Engine {
    /// Is `vehicle_id` free for `[start, end)`? Read-only.
    ///
    /// Only pending and confirmed bookings count; a return on the same day as
    /// another pickup is not a conflict.
    pub async fn is_available(
        &self,
        vehicle_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, EngineError> {
        let span = validate_range(start, end, self.today())?;
        Ok(self.is_span_free(vehicle_id, &span).await)
    }

    async fn is_span_free(&self, vehicle_id: &str, span: &DateSpan) -> bool {
        match self.get_ledger(vehicle_id) {
            Some(ledger) => is_free(&*ledger.read().await, span),
            None => true,
        }
    }

    /// Listed vehicles (optionally in `location`) that are free for the range.
    /// Advisory: a later `create_booking` re-checks under the vehicle lock.
    pub async fn available_vehicles(
        &self,
        location: Option<&str>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Vehicle>, EngineError> {
        let span = validate_range(start, end, self.today())?;
        let candidates = self.directory.listed_vehicles(location).await?;
        let mut free = Vec::with_capacity(candidates.len());
        for vehicle in candidates {
            if self.is_span_free(&vehicle.id, &span).await {
                free.push(vehicle);
            }
        }
        Ok(free)
    }

    /// Merged date ranges held by pending/confirmed bookings within
    /// `[from, to)`, for calendar display.
    pub async fn booked_ranges(
        &self,
        vehicle_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateSpan>, EngineError> {
        if from >= to {
            return Err(EngineError::InvalidRange("window start must be before window end"));
        }
        let window = DateSpan::new(from, to);
        if window.days() > MAX_ADVANCE_DAYS + MAX_RENTAL_DAYS {
            return Err(EngineError::InvalidRange("window too wide"));
        }
        Ok(match self.get_ledger(vehicle_id) {
            Some(ledger) => held_ranges(&*ledger.read().await, &window),
            None => Vec::new(),
        })
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let vehicle_id = self.booking_to_vehicle.get(&id).map(|e| e.value().clone())?;
        let ledger = self.get_ledger(&vehicle_id)?;
        let guard = ledger.read().await;
        guard.get(id).cloned()
    }

    /// Every booking made by `renter_id`, any status, newest first.
    /// Each call is a fresh full read.
    pub async fn list_bookings_for_renter(&self, renter_id: &str) -> Vec<Booking> {
        let ids = self
            .renter_bookings
            .get(renter_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(b) = self.get_booking(id).await {
                out.push(b);
            }
        }
        newest_first(&mut out);
        out
    }

    /// Every booking on vehicles the directory says `owner_id` owns, any
    /// status, newest first.
    pub async fn list_bookings_for_owner(&self, owner_id: &str) -> Result<Vec<Booking>, EngineError> {
        let vehicles = self.directory.vehicles_owned_by(owner_id).await?;
        let mut out = Vec::new();
        for vehicle in vehicles {
            if let Some(ledger) = self.get_ledger(&vehicle.id) {
                out.extend(ledger.read().await.bookings.iter().cloned());
            }
        }
        newest_first(&mut out);
        Ok(out)
    }
}
