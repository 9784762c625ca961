use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input; `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Fractional hours covered by the span.
    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / HOUR_MS as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Enumerations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::CheckedOut,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::CheckedIn => "CHECKED_IN",
            BookingStatus::CheckedOut => "CHECKED_OUT",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// A booking that still holds its interval: not CANCELLED, not CHECKED_OUT.
    /// Only active bookings take part in conflict detection.
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::CheckedOut)
    }

    /// Everything except CANCELLED counts toward revenue and day windows.
    pub fn counts_toward_revenue(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown booking status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpaceType {
    Office,
    MeetingRoom,
    Desk,
    PhoneBooth,
    EventSpace,
    CommonArea,
    Coworking,
}

impl SpaceType {
    pub const ALL: [SpaceType; 7] = [
        SpaceType::Office,
        SpaceType::MeetingRoom,
        SpaceType::Desk,
        SpaceType::PhoneBooth,
        SpaceType::EventSpace,
        SpaceType::CommonArea,
        SpaceType::Coworking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::Office => "OFFICE",
            SpaceType::MeetingRoom => "MEETING_ROOM",
            SpaceType::Desk => "DESK",
            SpaceType::PhoneBooth => "PHONE_BOOTH",
            SpaceType::EventSpace => "EVENT_SPACE",
            SpaceType::CommonArea => "COMMON_AREA",
            SpaceType::Coworking => "COWORKING",
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown space type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "PAID" => Ok(InvoiceStatus::Paid),
            _ => Err(format!("unknown invoice status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Manager,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Staff => "STAFF",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" => Ok(Role::Manager),
            "STAFF" => Ok(Role::Staff),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Roles allowed to run back-office operations (space maintenance,
/// cancellations, invoicing, detailed reports).
pub const BACK_OFFICE: &[Role] = &[Role::Admin, Role::Manager];

/// Who is calling. Resolved once per connection and handed to every guarded
/// engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub organization_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            organization_id: organization_id.into(),
        }
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub space_type: SpaceType,
    pub capacity: u32,
    pub hourly_rate: f64,
    pub daily_rate: f64,
    pub monthly_rate: f64,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub segment: Option<String>,
    pub active: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub space_id: Ulid,
    pub client_id: Ulid,
    pub span: Span,
    pub total_amount: f64,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Ulid,
    pub number: String,
    pub client_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub amount: f64,
    pub tax_amount: f64,
    pub due_date: Ms,
    pub status: InvoiceStatus,
    pub paid_at: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
}

/// One space plus its bookings, guarded by a single lock in the engine.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space: Space,
    /// All bookings of this space (any status), sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl SpaceState {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window, in start order.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.is_active())
    }
}

// ── Inputs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewSpace {
    pub id: Ulid,
    pub name: String,
    pub space_type: SpaceType,
    pub capacity: u32,
    pub hourly_rate: f64,
    pub daily_rate: f64,
    pub monthly_rate: f64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpacePatch {
    pub name: Option<String>,
    pub space_type: Option<SpaceType>,
    pub capacity: Option<u32>,
    pub hourly_rate: Option<f64>,
    pub daily_rate: Option<f64>,
    pub monthly_rate: Option<f64>,
    pub description: Option<Option<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub segment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<Option<String>>,
    pub company: Option<Option<String>>,
    pub segment: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Ulid,
    pub space_id: Ulid,
    pub client_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub notes: Option<String>,
}

/// Partial booking update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub space_id: Option<Ulid>,
    pub client_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub notes: Option<Option<String>>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self == &BookingPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub id: Ulid,
    pub client_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub due_date: Option<Ms>,
    pub notes: Option<String>,
}

// ── Filters ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingFilter {
    pub space_id: Option<Ulid>,
    pub client_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Drop CANCELLED bookings.
    pub exclude_cancelled: bool,
    /// Keep bookings whose interval overlaps this window.
    pub overlaps: Option<Span>,
    /// Keep bookings whose start falls inside this window.
    pub starts_within: Option<Span>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.space_id.is_none_or(|id| b.space_id == id)
            && self.client_id.is_none_or(|id| b.client_id == id)
            && self.status.is_none_or(|s| b.status == s)
            && (!self.exclude_cancelled || b.status.counts_toward_revenue())
            && self.overlaps.is_none_or(|w| w.overlaps(&b.span))
            && self.starts_within.is_none_or(|w| w.contains_instant(b.span.start))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpaceFilter {
    pub space_type: Option<SpaceType>,
    pub active: Option<bool>,
    pub min_capacity: Option<u32>,
    pub max_capacity: Option<u32>,
}

impl SpaceFilter {
    pub fn matches(&self, s: &Space) -> bool {
        self.space_type.is_none_or(|t| s.space_type == t)
            && self.active.is_none_or(|a| s.active == a)
            && self.min_capacity.is_none_or(|c| s.capacity >= c)
            && self.max_capacity.is_none_or(|c| s.capacity <= c)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientFilter {
    pub active: Option<bool>,
    pub segment: Option<String>,
    /// Case-insensitive substring over name, email and company.
    pub search: Option<String>,
}

impl ClientFilter {
    pub fn matches(&self, c: &Client) -> bool {
        if self.active.is_some_and(|a| c.active != a) {
            return false;
        }
        if let Some(seg) = &self.segment
            && c.segment.as_deref() != Some(seg.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let hit = c.name.to_lowercase().contains(&needle)
                || c.email.to_lowercase().contains(&needle)
                || c
                    .company
                    .as_deref()
                    .is_some_and(|co| co.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceFilter {
    pub client_id: Option<Ulid>,
    pub booking_id: Option<Ulid>,
    pub status: Option<InvoiceStatus>,
    /// Keep invoices created inside this window.
    pub created_within: Option<Span>,
}

impl InvoiceFilter {
    pub fn matches(&self, i: &Invoice) -> bool {
        self.client_id.is_none_or(|id| i.client_id == id)
            && self.booking_id.is_none_or(|id| i.booking_id == Some(id))
            && self.status.is_none_or(|s| i.status == s)
            && self.created_within.is_none_or(|w| w.contains_instant(i.created_at))
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: crate::limits::DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// Numeric booking column that can be summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingField {
    TotalAmount,
    Hours,
}

/// Inclusive calendar-date range used by reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

// ── WAL record format ────────────────────────────────────────────

/// WAL record format: flat, full records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpaceCreated(Space),
    SpaceUpdated(Space),
    SpaceDeleted {
        id: Ulid,
    },
    ClientCreated(Client),
    ClientUpdated(Client),
    BookingCreated(Booking),
    BookingUpdated {
        previous_space_id: Ulid,
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        space_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    InvoiceIssued(Invoice),
    InvoicePaid {
        id: Ulid,
        paid_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedSlot {
    pub booking_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub space_id: Ulid,
    pub date: NaiveDate,
    pub bookings: Vec<OccupiedSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BookingTotals {
    pub count: u64,
    pub total_amount: f64,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookingStats {
    pub total: u64,
    pub confirmed: u64,
    pub checked_in: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub total_revenue: f64,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverviewStats {
    pub total_revenue: f64,
    pub total_bookings: u64,
    pub active_clients: u64,
    pub total_spaces: u64,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyRevenue {
    pub date: NaiveDate,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRevenue {
    pub space_type: SpaceType,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevenueReport {
    pub daily: Vec<DailyRevenue>,
    pub by_type: Vec<TypeRevenue>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyOccupancy {
    pub date: NaiveDate,
    pub bookings: u64,
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccupancyReport {
    pub daily: Vec<DailyOccupancy>,
    pub average_occupancy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceUsage {
    pub id: Ulid,
    pub name: String,
    pub space_type: SpaceType,
    pub bookings_count: u64,
    pub total_hours: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceTypeCount {
    pub space_type: SpaceType,
    pub spaces: u64,
    pub bookings: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpacesReport {
    pub types: Vec<SpaceTypeCount>,
    pub top_spaces: Vec<SpaceUsage>,
    pub total_spaces: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientRevenue {
    pub id: Ulid,
    pub name: String,
    pub company: Option<String>,
    pub bookings_count: u64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCount {
    pub segment: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientsReport {
    pub segments: Vec<SegmentCount>,
    pub top_clients: Vec<ClientRevenue>,
    pub total_clients: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashboardStats {
    pub total_spaces: u64,
    pub total_clients: u64,
    pub today_bookings: u64,
    pub today_revenue: f64,
    pub pending_invoices: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BillingStats {
    pub total_invoices: u64,
    pub pending_invoices: u64,
    pub paid_invoices: u64,
    pub overdue_invoices: u64,
    pub total_amount: f64,
    pub pending_amount: f64,
    pub paid_amount: f64,
    pub collection_rate: f64,
}
