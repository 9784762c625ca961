use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_slots, occupied_slots};
use super::conflict::{find_conflict, validate_query_window, validate_span};
use super::pricing::round2;
use super::{Engine, EngineError, SharedSpaceState};

impl Engine {
    // ── Spaces and clients ───────────────────────────────────────

    pub async fn get_space(&self, id: &Ulid) -> Option<Space> {
        let arc = self.space_arc(id)?;
        let guard = arc.read().await;
        Some(guard.space.clone())
    }

    /// Matching spaces ordered by name.
    pub async fn list_spaces(&self, filter: &SpaceFilter) -> Vec<Space> {
        let mut out = Vec::new();
        for arc in self.space_arcs() {
            let guard = arc.read().await;
            if filter.matches(&guard.space) {
                out.push(guard.space.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn get_client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|c| c.value().clone())
    }

    /// Matching clients ordered by name.
    pub fn list_clients(&self, filter: &ClientFilter) -> Vec<Client> {
        let mut out: Vec<Client> = self
            .clients
            .iter()
            .filter(|c| filter.matches(c.value()))
            .map(|c| c.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    // ── Bookings ─────────────────────────────────────────────────

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let space_id = *self.booking_to_space.get(id)?.value();
        let arc = self.space_arc(&space_id)?;
        let guard = arc.read().await;
        guard.booking(*id).cloned()
    }

    fn space_arcs(&self) -> Vec<SharedSpaceState> {
        self.spaces.iter().map(|e| e.value().clone()).collect()
    }

    /// Every booking matching `filter`, ordered by start then id.
    pub async fn collect_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let arcs = match filter.space_id {
            Some(id) => self.space_arc(&id).into_iter().collect(),
            None => self.space_arcs(),
        };
        let mut out = Vec::new();
        for arc in arcs {
            let guard = arc.read().await;
            match filter.overlaps {
                Some(window) => out.extend(guard.overlapping(&window).filter(|b| filter.matches(b)).cloned()),
                None => out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned()),
            }
        }
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        out
    }

    /// One page of matching bookings, ordered by start.
    pub async fn list_bookings(&self, filter: &BookingFilter, page: Page) -> Result<Paged<Booking>, EngineError> {
        if page.page == 0 || page.per_page == 0 {
            return Err(EngineError::Validation("page and per_page start at 1".into()));
        }
        if page.per_page > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page too large"));
        }
        let all = self.collect_bookings(filter).await;
        let total = all.len() as u64;
        let per_page = page.per_page as u64;
        let skip = (page.page as u64 - 1).saturating_mul(per_page);
        let items = all
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(page.per_page as usize)
            .collect();
        Ok(Paged {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// First active booking of `space_id` overlapping `[start, end)`, if any,
    /// ignoring `exclude`. Pure query.
    pub async fn find_overlapping(
        &self,
        space_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Option<Booking>, EngineError> {
        let span = validate_span(start, end)?;
        validate_query_window(&span)?;
        let arc = self.space_arc_or_404(&space_id)?;
        let guard = arc.read().await;
        Ok(find_conflict(&guard, &span, exclude).cloned())
    }

    pub async fn count_bookings(&self, filter: &BookingFilter) -> u64 {
        self.booking_totals(filter).await.count
    }

    pub async fn sum_bookings(&self, filter: &BookingFilter, field: BookingField) -> f64 {
        let totals = self.booking_totals(filter).await;
        match field {
            BookingField::TotalAmount => totals.total_amount,
            BookingField::Hours => totals.total_hours,
        }
    }

    pub async fn booking_totals(&self, filter: &BookingFilter) -> BookingTotals {
        let bookings = self.collect_bookings(filter).await;
        let mut totals = BookingTotals::default();
        for b in &bookings {
            totals.count += 1;
            totals.total_amount += b.total_amount;
            totals.total_hours += b.span.hours();
        }
        totals.total_amount = round2(totals.total_amount);
        totals.total_hours = round2(totals.total_hours);
        totals
    }

    // ── Availability ─────────────────────────────────────────────

    /// Non-cancelled bookings of a space intersecting the calendar day.
    pub async fn day_availability(&self, space_id: Ulid, date: NaiveDate) -> Result<DayAvailability, EngineError> {
        let arc = self.space_arc_or_404(&space_id)?;
        let guard = arc.read().await;
        Ok(DayAvailability {
            space_id,
            date,
            bookings: occupied_slots(&guard, &self.calendar().day_span(date)),
        })
    }

    /// Unbooked gaps of a calendar day, at least `min_duration` long.
    pub async fn free_slots(
        &self,
        space_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if min_duration.is_some_and(|d| d < 0) {
            return Err(EngineError::Validation("min_duration must not be negative".into()));
        }
        let arc = self.space_arc_or_404(&space_id)?;
        let guard = arc.read().await;
        Ok(free_slots(&guard, &self.calendar().day_span(date), min_duration))
    }

    // ── Invoices ─────────────────────────────────────────────────

    pub fn get_invoice(&self, id: &Ulid) -> Option<Invoice> {
        self.invoices.get(id).map(|i| i.value().clone())
    }

    pub fn invoice_for_booking(&self, booking_id: &Ulid) -> Option<Invoice> {
        let invoice_id = *self.booking_invoice.get(booking_id)?.value();
        self.get_invoice(&invoice_id)
    }

    /// Matching invoices, newest first.
    pub fn list_invoices(&self, filter: &InvoiceFilter) -> Vec<Invoice> {
        let mut out: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| filter.matches(i.value()))
            .map(|i| i.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.number.cmp(&a.number)));
        out
    }
}
