use crate::model::{DAY_MS, Ms};

// ── Time ─────────────────────────────────────────────────────────

/// Earliest accepted instant (Unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted instant (year 10000).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_800_000;

/// A single booking may not run longer than a year.
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * DAY_MS;

/// Widest window a conflict or booking query may scan.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * DAY_MS;

/// Widest date range a report may cover, in days.
pub const MAX_REPORT_DAYS: i64 = 2 * 366;

/// Window of the overview report when no range is given, in days.
pub const DEFAULT_REPORT_DAYS: i64 = 30;

// ── Sizes ────────────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_SPACES_PER_ORG: usize = 10_000;
pub const MAX_CLIENTS_PER_ORG: usize = 100_000;
pub const MAX_BOOKINGS_PER_SPACE: usize = 100_000;
pub const MAX_ORGANIZATIONS: usize = 1024;
pub const MAX_ORG_NAME_LEN: usize = 63;

// ── Paging and rankings ──────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// Length of the top-N rankings in the space and client reports.
pub const TOP_N: usize = 10;
