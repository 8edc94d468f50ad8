use chrono::{NaiveDate, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::quote;
use super::conflict::{check_no_conflict, check_transition, validate_id, validate_range};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Create a pending booking for `renter_id` over `[start, end)`.
    ///
    /// The overlap check, price computation and durable write all happen under
    /// the vehicle's write lock. Either a complete booking is stored or nothing
    /// is.
    pub async fn create_booking(
        &self,
        vehicle_id: &str,
        renter_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let result = self.try_create_booking(vehicle_id, renter_id, start, end).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
                metrics::gauge!(crate::observability::BOOKINGS_TRACKED)
                    .set(self.booking_to_vehicle.len() as f64);
                info!(
                    booking = %booking.id,
                    vehicle = %booking.vehicle_id,
                    renter = %booking.renter_id,
                    "booking created [{}, {}) price {}",
                    booking.pickup_date,
                    booking.return_date,
                    booking.price
                );
            }
            Err(e) => {
                metrics::counter!(crate::observability::BOOKING_REJECTIONS_TOTAL, "reason" => e.reason())
                    .increment(1);
                match e {
                    EngineError::StoreUnavailable(_) => warn!(vehicle = %vehicle_id, "booking failed: {e}"),
                    _ => warn!(vehicle = %vehicle_id, "booking rejected: {e}"),
                }
            }
        }
        result
    }

    async fn try_create_booking(
        &self,
        vehicle_id: &str,
        renter_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        validate_id(vehicle_id, "vehicle id length")?;
        validate_id(renter_id, "renter id length")?;
        let span = validate_range(start, end, self.today())?;

        let vehicle = self
            .directory
            .vehicle(vehicle_id)
            .await?
            .ok_or_else(|| EngineError::VehicleNotFound(vehicle_id.to_string()))?;
        if !vehicle.listed {
            return Err(EngineError::VehicleNotListed(vehicle.id));
        }
        let price = quote(vehicle.daily_rate, &span)
            .ok_or(EngineError::InvalidRange("price overflow"))?;

        // Critical section: check → write must not interleave with another
        // attempt on this vehicle.
        let gate = self.mutation_gate().await;
        let guard = self.ledger_for(&vehicle.id).write_owned().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_VEHICLE {
            return Err(EngineError::LimitExceeded("too many bookings on vehicle"));
        }
        check_no_conflict(&guard, &span)?;

        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            vehicle_id: vehicle.id,
            renter_id: renter_id.to_string(),
            pickup_date: span.start,
            return_date: span.end,
            price,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(gate, guard, event).await?;
        Ok(booking)
    }

    /// Owner-initiated status change. Only `pending` bookings move; confirmed
    /// and cancelled are terminal. Cancelling releases the dates because
    /// cancelled bookings are ignored by every overlap check.
    pub async fn change_status(
        &self,
        booking_id: Ulid,
        requested_by: &str,
        new_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let result = self.try_change_status(booking_id, requested_by, new_status).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(
                    crate::observability::STATUS_TRANSITIONS_TOTAL,
                    "status" => booking.status.as_str()
                )
                .increment(1);
            }
            Err(e) => {
                metrics::counter!(crate::observability::TRANSITION_REJECTIONS_TOTAL, "reason" => e.reason())
                    .increment(1);
                warn!(booking = %booking_id, by = %requested_by, "status change rejected: {e}");
            }
        }
        result
    }

    async fn try_change_status(
        &self,
        booking_id: Ulid,
        requested_by: &str,
        new_status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let vehicle_id = self
            .booking_to_vehicle
            .get(&booking_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let vehicle = self
            .directory
            .vehicle(&vehicle_id)
            .await?
            .ok_or_else(|| EngineError::VehicleNotFound(vehicle_id.clone()))?;
        if vehicle.owner_id != requested_by {
            return Err(EngineError::Unauthorized);
        }

        let gate = self.mutation_gate().await;
        let (vehicle_id, guard) = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .get(booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?
            .status;

        if !check_transition(current, new_status)? {
            debug!(booking = %booking_id, "status unchanged ({current})");
            return guard
                .get(booking_id)
                .cloned()
                .ok_or(EngineError::BookingNotFound(booking_id));
        }

        let event = Event::BookingStatusChanged {
            id: booking_id,
            vehicle_id: vehicle_id.clone(),
            status: new_status,
            at: Utc::now(),
        };
        let guard = self.persist_and_apply(gate, guard, event).await?;
        info!(booking = %booking_id, vehicle = %vehicle_id, "booking {current} -> {new_status}");
        guard
            .get(booking_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    /// Rewrite the WAL as one `BookingCreated` per booking, carrying its
    /// current status.
    ///
    /// The compaction gate is held exclusively until the writer acknowledges
    /// the swap. No mutation can create a ledger or append between the
    /// snapshot and the rename.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let gate = self.compaction_gate.write().await;
        let mut vehicle_ids: Vec<VehicleId> = self.ledgers.iter().map(|e| e.key().clone()).collect();
        vehicle_ids.sort();

        let mut guards = Vec::with_capacity(vehicle_ids.len());
        for vid in &vehicle_ids {
            if let Some(ledger) = self.get_ledger(vid) {
                guards.push(ledger.read_owned().await);
            }
        }

        let mut events: Vec<Event> = guards
            .iter()
            .flat_map(|g| g.bookings.iter())
            .map(|b| Event::BookingCreated { booking: b.clone() })
            .collect();
        // ULIDs sort by creation time.
        events.sort_by_key(|e| match e {
            Event::BookingCreated { booking } => booking.id,
            Event::BookingStatusChanged { id, .. } => *id,
        });
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
        drop(guards);
        drop(gate);

        info!("WAL compacted to {count} bookings");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
