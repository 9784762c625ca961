mod availability;
mod billing;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;
mod reports;
#[cfg(test)]
mod tests;

pub use availability::{free_slots, merge_overlapping, occupied_slots, subtract_intervals};
pub use error::{EngineError, Entity, ErrorKind};
pub use lifecycle::{Action, CHECK_IN_WINDOW_MS};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;
use crate::wal::{Wal, WalHandle};

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

/// All state of one organization: spaces with their bookings, clients and
/// invoices, rebuilt from the WAL on startup.
pub struct Engine {
    organization_id: String,
    calendar: Calendar,
    pub(super) spaces: DashMap<Ulid, SharedSpaceState>,
    pub(super) clients: DashMap<Ulid, Client>,
    pub(super) invoices: DashMap<Ulid, Invoice>,
    /// Reverse lookup: booking id → space id
    pub(super) booking_to_space: DashMap<Ulid, Ulid>,
    /// booking id → invoice id
    pub(super) booking_invoice: DashMap<Ulid, Ulid>,
    /// Serializes invoice numbering.
    pub(super) ledger_lock: tokio::sync::Mutex<()>,
    /// Shared by booking writes that name a client, exclusive while a client
    /// is deactivated. Taken after `ledger_lock`, before any space lock.
    pub(super) client_gate: RwLock<()>,
    /// Shared by every mutation, exclusive for compaction, so a snapshot
    /// never misses an event appended while it is written.
    /// Always taken before any space lock.
    pub(super) commit_gate: RwLock<()>,
    wal: WalHandle,
}

/// Apply a space-local event. Caller holds the space's write lock.
fn apply_to_space(ss: &mut SpaceState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SpaceUpdated(space) => ss.space = space.clone(),
        Event::BookingCreated(booking) => {
            booking_map.insert(booking.id, ss.space.id);
            ss.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking, .. } => {
            ss.remove_booking(booking.id);
            booking_map.insert(booking.id, ss.space.id);
            ss.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = ss.booking_mut(*id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
        Event::SpaceCreated(_)
        | Event::SpaceDeleted { .. }
        | Event::ClientCreated(_)
        | Event::ClientUpdated(_)
        | Event::InvoiceIssued(_)
        | Event::InvoicePaid { .. } => {}
    }
}

/// Space whose lock an event needs, for space-local events.
fn event_space_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SpaceUpdated(space) => Some(space.id),
        Event::BookingCreated(b) => Some(b.space_id),
        Event::BookingUpdated { booking, .. } => Some(booking.space_id),
        Event::BookingStatusChanged { space_id, .. } => Some(*space_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(organization_id: impl Into<String>, wal_path: PathBuf, calendar: Calendar) -> io::Result<Self> {
        let organization_id = organization_id.into();
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replay.valid_len)?;

        let engine = Self {
            organization_id,
            calendar,
            spaces: DashMap::new(),
            clients: DashMap::new(),
            invoices: DashMap::new(),
            booking_to_space: DashMap::new(),
            booking_invoice: DashMap::new(),
            ledger_lock: tokio::sync::Mutex::new(()),
            client_gate: RwLock::new(()),
            commit_gate: RwLock::new(()),
            wal: WalHandle::spawn(wal),
        };

        for event in &replay.events {
            engine.replay_event(event);
        }
        info!(
            organization = %engine.organization_id,
            events = replay.events.len(),
            spaces = engine.spaces.len(),
            bookings = engine.booking_to_space.len(),
            "organization loaded"
        );
        Ok(engine)
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    /// Rebuild state from one logged event. This engine is the sole owner of
    /// every lock at this point, so `try_*` always succeeds; blocking variants
    /// would panic inside the async context tenants are created in.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::BookingUpdated {
                previous_space_id,
                booking,
            } if *previous_space_id != booking.space_id => {
                if let Some(from) = self.space_arc(previous_space_id)
                    && let Ok(mut guard) = from.try_write()
                {
                    guard.remove_booking(booking.id);
                }
                self.replay_on_space(booking.space_id, event);
            }
            other => match event_space_id(other) {
                Some(space_id) => self.replay_on_space(space_id, other),
                None => self.apply_org(other),
            },
        }
    }

    fn replay_on_space(&self, space_id: Ulid, event: &Event) {
        let Some(arc) = self.space_arc(&space_id) else {
            warn!(%space_id, "replay: event for unknown space skipped");
            return;
        };
        match arc.try_write() {
            Ok(mut guard) => apply_to_space(&mut guard, event, &self.booking_to_space),
            Err(_) => warn!(%space_id, "replay: space locked, event skipped"),
        }
    }

    /// Apply an event that touches no space lock.
    fn apply_org(&self, event: &Event) {
        match event {
            Event::ClientCreated(client) | Event::ClientUpdated(client) => {
                self.clients.insert(client.id, client.clone());
            }
            Event::InvoiceIssued(invoice) => {
                if let Some(bid) = invoice.booking_id {
                    self.booking_invoice.insert(bid, invoice.id);
                }
                self.invoices.insert(invoice.id, invoice.clone());
            }
            Event::InvoicePaid { id, paid_at } => {
                if let Some(mut inv) = self.invoices.get_mut(id) {
                    inv.status = InvoiceStatus::Paid;
                    inv.paid_at = Some(*paid_at);
                }
            }
            Event::SpaceCreated(space) => {
                self.spaces
                    .insert(space.id, Arc::new(RwLock::new(SpaceState::new(space.clone()))));
            }
            Event::SpaceDeleted { id } => self.drop_space(*id),
            _ => {}
        }
    }

    fn drop_space(&self, id: Ulid) {
        if let Some((_, arc)) = self.spaces.remove(&id)
            && let Ok(guard) = arc.try_read()
        {
            for b in &guard.bookings {
                self.booking_to_space.remove(&b.id);
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply under the caller's space lock.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_space(ss, event, &self.booking_to_space);
        Ok(())
    }

    /// WAL-append, then apply an organization-level event.
    pub(super) async fn persist_org(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_org(event);
        Ok(())
    }

    /// WAL-append a cross-space move, then apply to both locked spaces.
    pub(super) async fn persist_move(
        &self,
        from: &mut SpaceState,
        to: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Event::BookingUpdated { booking, .. } = event {
            from.remove_booking(booking.id);
        }
        apply_to_space(to, event, &self.booking_to_space);
        Ok(())
    }

    pub(super) fn space_arc(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub(super) fn space_arc_or_404(&self, id: &Ulid) -> Result<SharedSpaceState, EngineError> {
        self.space_arc(id)
            .ok_or(EngineError::not_found(Entity::Space, *id))
    }

    /// False once the space was deleted (or replaced) after `arc` was taken.
    fn is_live(&self, id: &Ulid, arc: &SharedSpaceState) -> bool {
        self.spaces
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), arc))
    }

    /// Write lock on a space that still exists once the lock is held.
    pub(super) async fn space_write(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        let arc = self.space_arc_or_404(id)?;
        let guard = arc.clone().write_owned().await;
        if !self.is_live(id, &arc) {
            return Err(EngineError::not_found(Entity::Space, *id));
        }
        Ok(guard)
    }

    /// Write locks on two distinct spaces, taken in id order.
    pub(super) async fn space_write_pair(
        &self,
        a: &Ulid,
        b: &Ulid,
    ) -> Result<(OwnedRwLockWriteGuard<SpaceState>, OwnedRwLockWriteGuard<SpaceState>), EngineError> {
        let a_arc = self.space_arc_or_404(a)?;
        let b_arc = self.space_arc_or_404(b)?;
        let (ga, gb) = if a < b {
            let ga = a_arc.clone().write_owned().await;
            let gb = b_arc.clone().write_owned().await;
            (ga, gb)
        } else {
            let gb = b_arc.clone().write_owned().await;
            let ga = a_arc.clone().write_owned().await;
            (ga, gb)
        };
        if !self.is_live(a, &a_arc) {
            return Err(EngineError::not_found(Entity::Space, *a));
        }
        if !self.is_live(b, &b_arc) {
            return Err(EngineError::not_found(Entity::Space, *b));
        }
        Ok((ga, gb))
    }

    /// Lookup booking → space and take that space's write lock. Retries if the
    /// booking moved to another space while waiting for the lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        for _ in 0..3 {
            let space_id = self
                .booking_to_space
                .get(booking_id)
                .map(|e| *e.value())
                .ok_or(EngineError::not_found(Entity::Booking, *booking_id))?;
            let arc = self.space_arc_or_404(&space_id)?;
            let guard = arc.clone().write_owned().await;
            if self.is_live(&space_id, &arc) && guard.booking(*booking_id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::not_found(Entity::Booking, *booking_id))
    }

    /// The client exists and is active. Caller holds `client_gate`.
    pub(super) fn active_client(&self, id: &Ulid) -> Result<(), EngineError> {
        let client = self
            .clients
            .get(id)
            .ok_or(EngineError::not_found(Entity::Client, *id))?;
        if !client.active {
            return Err(EngineError::Validation(format!("client {id} is inactive")));
        }
        Ok(())
    }

    /// The principal must belong to this organization.
    pub(super) fn check_member(&self, principal: &Principal) -> Result<(), EngineError> {
        if principal.organization_id != self.organization_id {
            warn!(
                user = %principal.user_id,
                organization = %principal.organization_id,
                expected = %self.organization_id,
                "cross-organization access rejected"
            );
            return Err(EngineError::WrongOrganization(principal.organization_id.clone()));
        }
        Ok(())
    }

    /// Membership plus one of `roles`.
    pub(super) fn authorize(
        &self,
        principal: &Principal,
        roles: &[Role],
        action: &'static str,
    ) -> Result<(), EngineError> {
        self.check_member(principal)?;
        if !principal.has_role(roles) {
            warn!(user = %principal.user_id, role = %principal.role, action, "forbidden");
            return Err(EngineError::Forbidden {
                role: principal.role,
                action,
            });
        }
        Ok(())
    }

    pub(super) fn is_paid_invoice(&self, booking_id: &Ulid) -> Option<Ulid> {
        let invoice_id = *self.booking_invoice.get(booking_id)?.value();
        let inv = self.invoices.get(&invoice_id)?;
        (inv.status == InvoiceStatus::Paid).then_some(invoice_id)
    }

    // ── Compaction ───────────────────────────────────────────────

    /// Events recreating the current state: clients, then each space followed
    /// by its bookings, then invoices (with their payment).
    async fn snapshot(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .clients
            .iter()
            .map(|c| Event::ClientCreated(c.value().clone()))
            .collect();

        let arcs: Vec<SharedSpaceState> = self.spaces.iter().map(|e| e.value().clone()).collect();
        for arc in arcs {
            let guard = arc.read().await;
            events.push(Event::SpaceCreated(guard.space.clone()));
            events.extend(guard.bookings.iter().cloned().map(Event::BookingCreated));
        }

        events.extend(
            self.invoices
                .iter()
                .map(|inv| Event::InvoiceIssued(inv.value().clone())),
        );
        events
    }

    /// Replace the WAL with a snapshot of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let snapshot = self.snapshot().await;
        let records = snapshot.len();
        self.wal
            .rewrite(snapshot)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(organization = %self.organization_id, records, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await.unwrap_or(0)
    }
}
