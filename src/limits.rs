/// Longest single rental, in days.
pub const MAX_RENTAL_DAYS: i64 = 365;

/// How far ahead of today a pickup may be scheduled, in days.
pub const MAX_ADVANCE_DAYS: i64 = 730;

/// Bookings retained per vehicle ledger (cancelled ones included).
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 100_000;

/// Vehicle and user identifiers are opaque strings from collaborators.
pub const MAX_ID_LEN: usize = 128;
