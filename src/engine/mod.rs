mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{first_conflict, held_ranges, is_free, merge_touching, quote, rental_days};
pub use conflict::parse_date;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::directory::VehicleDirectory;
use crate::model::*;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<VehicleLedger>>;

/// Source of "today" for range validation.
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().date_naive())
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Each wakeup drains every append already queued and commits
/// them with one fsync, so concurrent bookings on different vehicles share
/// the cost of durability.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        // Commands queued behind the batch run after it, preserving order.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // Every caller in the batch is told it failed, so none of it may
        // reach a later fsync.
        if let Err(e) = wal.discard_unflushed() {
            tracing::error!("discarding failed WAL batch: {e}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Availability Index, Booking Store and Lifecycle Controller.
///
/// Each vehicle's bookings sit behind their own `RwLock`; a booking attempt
/// holds that vehicle's write lock across check, price and persist, so two
/// requests for the same vehicle serialize while other vehicles proceed in
/// parallel.
///
/// Every mutation also holds `compaction_gate` shared from before it looks up
/// a ledger until its event is applied; compaction takes it exclusively.
pub struct Engine {
    pub(super) ledgers: DashMap<VehicleId, SharedLedger>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) directory: Arc<dyn VehicleDirectory>,
    pub(super) clock: Clock,
    /// booking id → vehicle id
    pub(super) booking_to_vehicle: Arc<DashMap<Ulid, VehicleId>>,
    /// renter id → booking ids, in creation order
    pub(super) renter_bookings: Arc<DashMap<UserId, Vec<Ulid>>>,
    pub(super) compaction_gate: Arc<RwLock<()>>,
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
}

/// Apply an event to a ledger. Caller holds the ledger's write lock.
fn apply_to_ledger(
    ledger: &mut VehicleLedger,
    event: &Event,
    booking_to_vehicle: &DashMap<Ulid, VehicleId>,
    renter_bookings: &DashMap<UserId, Vec<Ulid>>,
) {
    match event {
        Event::BookingCreated { booking } => {
            booking_to_vehicle.insert(booking.id, booking.vehicle_id.clone());
            renter_bookings
                .entry(booking.renter_id.clone())
                .or_default()
                .push(booking.id);
            ledger.insert(booking.clone());
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = ledger.get_mut(*id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
    }
}

impl Engine {
    /// Replay the log at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, directory: Arc<dyn VehicleDirectory>) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            ledgers: DashMap::new(),
            wal_tx,
            directory,
            clock: system_clock(),
            booking_to_vehicle: Arc::new(DashMap::new()),
            renter_bookings: Arc::new(DashMap::new()),
            compaction_gate: Arc::new(RwLock::new(())),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // blocking_write would panic here when called from async context.
        for event in &events {
            let ledger = engine.ledger_for(event.vehicle_id());
            let mut guard = ledger
                .try_write()
                .map_err(|_| io::Error::other("replay: ledger lock contended"))?;
            apply_to_ledger(
                &mut guard,
                event,
                &engine.booking_to_vehicle,
                &engine.renter_bookings,
            );
        }
        metrics::gauge!(crate::observability::BOOKINGS_TRACKED)
            .set(engine.booking_to_vehicle.len() as f64);
        tracing::info!(
            "replayed {} events: {} bookings across {} vehicles",
            events.len(),
            engine.booking_to_vehicle.len(),
            engine.ledgers.len()
        );

        Ok(engine)
    }

    /// Replace the clock used to decide what "today" is.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn directory(&self) -> &Arc<dyn VehicleDirectory> {
        &self.directory
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_vehicle.len()
    }

    /// Existing ledger, if the vehicle has ever been booked.
    pub(super) fn get_ledger(&self, vehicle_id: &str) -> Option<SharedLedger> {
        self.ledgers.get(vehicle_id).map(|e| e.value().clone())
    }

    /// Ledger for a vehicle, created empty on first use.
    pub(super) fn ledger_for(&self, vehicle_id: &str) -> SharedLedger {
        if let Some(existing) = self.get_ledger(vehicle_id) {
            return existing;
        }
        self.ledgers
            .entry(vehicle_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(VehicleLedger::new(vehicle_id.to_string()))))
            .value()
            .clone()
    }

    /// Shared hold on the compaction gate. Take it before any ledger lock.
    pub(super) async fn mutation_gate(&self) -> OwnedRwLockReadGuard<()> {
        self.compaction_gate.clone().read_owned().await
    }

    /// Durably log `event`, then apply it. Nothing changes in memory if the
    /// append fails.
    ///
    /// Both steps run on their own task, which owns the gate and the ledger
    /// guard, so once the append is queued the event is applied even if the
    /// caller's future is dropped. The guard comes back for reading the
    /// result.
    pub(super) async fn persist_and_apply(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        mut guard: OwnedRwLockWriteGuard<VehicleLedger>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<VehicleLedger>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let booking_to_vehicle = self.booking_to_vehicle.clone();
        let renter_bookings = self.renter_bookings.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            wal_append(&wal_tx, &event).await?;
            apply_to_ledger(&mut guard, &event, &booking_to_vehicle, &renter_bookings);
            Ok::<_, EngineError>(guard)
        });
        task.await
            .map_err(|e| EngineError::StoreUnavailable(format!("persist task failed: {e}")))?
    }

    /// Booking id → its vehicle's ledger, write-locked.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(VehicleId, OwnedRwLockWriteGuard<VehicleLedger>), EngineError> {
        let vehicle_id = self
            .booking_to_vehicle
            .get(booking_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let ledger = self
            .get_ledger(&vehicle_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let guard = ledger.write_owned().await;
        Ok((vehicle_id, guard))
    }
}
