/// Reservations a single user may hold within one calendar month.
pub const MONTHLY_QUOTA: usize = 3;

/// Mandatory gap after an existing reservation ends, in minutes.
pub const BUFFER_AFTER_MINUTES: i64 = 5;

pub const MAX_OWNER_NAME_LEN: usize = 256;
pub const MAX_LAB_LEN: usize = 128;
pub const MAX_ROOM_LEN: usize = 128;

pub const MAX_RESERVATIONS: usize = 1_000_000;
