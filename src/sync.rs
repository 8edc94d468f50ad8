//! Client-side convergence with server state.
//!
//! There is no push channel. A [`BookingPoller`] re-fetches a booking list on
//! a fixed interval and whenever asked to, and publishes each result as a
//! snapshot. The UI component that needs the list owns the poller; dropping
//! it stops the polling task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

use crate::api::StatusResponse;
use crate::client::{ApiClient, ClientError};
use crate::model::{Booking, BookingStatus};

/// Matches the owner dashboard's refresh cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Something that can produce a fresh, complete booking list.
#[async_trait]
pub trait BookingFeed: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Vec<Booking>, ClientError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    /// "My bookings" as a renter.
    Renter,
    /// Bookings on the caller's vehicles.
    Owner,
}

/// Feed backed by the HTTP API.
pub struct ApiFeed {
    client: ApiClient,
    scope: FeedScope,
}

impl ApiFeed {
    pub fn new(client: ApiClient, scope: FeedScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl BookingFeed for ApiFeed {
    async fn fetch(&self) -> Result<Vec<Booking>, ClientError> {
        match self.scope {
            FeedScope::Renter => self.client.my_bookings().await,
            FeedScope::Owner => self.client.owner_bookings().await,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    /// Last successfully fetched list.
    pub bookings: Vec<Booking>,
    /// When `bookings` was fetched; `None` until the first success.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Error from the most recent attempt, cleared on success.
    pub last_error: Option<String>,
    /// Number of completed fetch attempts.
    pub generation: u64,
}

/// Scheduled re-fetch of one booking list.
pub struct BookingPoller {
    snapshot: watch::Receiver<SyncSnapshot>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BookingPoller {
    /// Fetch immediately, then every `interval` and on each `refresh_now`.
    pub fn spawn<F: BookingFeed>(feed: F, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(SyncSnapshot::default());
        let refresh = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(feed, interval, tx, refresh.clone(), cancel.clone()));
        Self {
            snapshot: rx,
            refresh,
            cancel,
            handle: Some(handle),
        }
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver for awaiting new snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    /// Fetch again without waiting for the next tick. Coalesces when a fetch
    /// is already pending.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// Stop polling and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BookingPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop<F: BookingFeed>(
    feed: F,
    interval: Duration,
    tx: watch::Sender<SyncSnapshot>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => {
                // A manual refresh restarts the interval.
                ticker.reset();
            }
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = feed.fetch() => r,
        };
        tx.send_modify(|snap| {
            snap.generation += 1;
            match result {
                Ok(bookings) => {
                    snap.bookings = bookings;
                    snap.fetched_at = Some(Utc::now());
                    snap.last_error = None;
                }
                Err(e) => {
                    debug!("booking refresh failed: {e}");
                    snap.last_error = Some(e.to_string());
                }
            }
        });
    }
    debug!("booking poller stopped");
}

/// Owner-side view: mutations trigger an immediate re-fetch so the list
/// reflects them without waiting for the next tick.
pub struct OwnerConsole {
    client: ApiClient,
    poller: BookingPoller,
}

impl OwnerConsole {
    pub fn start(client: ApiClient, interval: Duration) -> Self {
        let client = client.as_owner();
        let poller = BookingPoller::spawn(ApiFeed::new(client.clone(), FeedScope::Owner), interval);
        Self { client, poller }
    }

    pub fn poller(&self) -> &BookingPoller {
        &self.poller
    }

    pub async fn change_status(
        &self,
        booking_id: Ulid,
        status: BookingStatus,
    ) -> Result<StatusResponse, ClientError> {
        let result = self.client.change_status(booking_id, status).await;
        self.poller.refresh_now();
        result
    }

    pub async fn shutdown(self) {
        self.poller.shutdown().await;
    }
}
