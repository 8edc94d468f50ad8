use ulid::Ulid;

use crate::model::{BookingStatus, VehicleId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid date range: {0}")]
    InvalidRange(&'static str),
    #[error("vehicle not found: {0}")]
    VehicleNotFound(VehicleId),
    #[error("vehicle is not listed for booking: {0}")]
    VehicleNotListed(VehicleId),
    #[error("vehicle is already booked for these dates (conflicts with booking {0})")]
    SlotUnavailable(Ulid),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("cannot change booking status from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("only the vehicle owner can change this booking")]
    Unauthorized,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("booking store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::VehicleNotFound(_) => "vehicle_not_found",
            EngineError::VehicleNotListed(_) => "vehicle_not_listed",
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Unauthorized => "unauthorized",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<crate::directory::DirectoryError> for EngineError {
    fn from(e: crate::directory::DirectoryError) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}
