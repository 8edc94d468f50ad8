use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier issued by the Vehicle Directory.
pub type VehicleId = String;

/// Identifier issued by the auth collaborator (renters and owners alike).
pub type UserId = String;

/// Half-open calendar range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Whole calendar days covered. A return on the day after pickup is one day.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Confirmed and cancelled bookings never change again.
    pub fn is_terminal(self) -> bool {
        match self {
            BookingStatus::Pending => false,
            BookingStatus::Confirmed | BookingStatus::Cancelled => true,
        }
    }

    /// Whether a booking in this status holds its date range.
    pub fn holds_dates(self) -> bool {
        match self {
            BookingStatus::Pending | BookingStatus::Confirmed => true,
            BookingStatus::Cancelled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub vehicle_id: VehicleId,
    pub renter_id: UserId,
    pub pickup_date: NaiveDate,
    pub return_date: NaiveDate,
    pub price: u64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.pickup_date, self.return_date)
    }
}

/// Read-only view of a vehicle as supplied by the Vehicle Directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: VehicleId,
    pub owner_id: UserId,
    pub daily_rate: u64,
    pub listed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// All bookings of one vehicle, any status, sorted by pickup date.
#[derive(Debug, Clone)]
pub struct VehicleLedger {
    pub vehicle_id: VehicleId,
    pub bookings: Vec<Booking>,
}

impl VehicleLedger {
    pub fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by pickup date.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.pickup_date <= booking.pickup_date);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose range overlaps `query`.
    /// Binary search skips everything picking up on or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.pickup_date < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.return_date > query.start)
    }
}

/// WAL record format. One record per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        vehicle_id: VehicleId,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn vehicle_id(&self) -> &str {
        match self {
            Event::BookingCreated { booking } => &booking.vehicle_id,
            Event::BookingStatusChanged { vehicle_id, .. } => vehicle_id,
        }
    }
}
