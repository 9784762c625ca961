use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_booking_span, validate_span};
use super::lifecycle::{self, Action};
use super::pricing::booking_amount;
use super::{Engine, EngineError, Entity};

fn validate_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

fn validate_optional(value: &Option<String>, max: usize) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded("text field too long")),
        _ => Ok(()),
    }
}

fn validate_rate(field: &str, rate: f64) -> Result<(), EngineError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(EngineError::Validation(format!("{field} must be a non-negative number")));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    validate_text("email", email, MAX_NAME_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::Validation(format!("invalid email: {email}"))),
    }
}

fn validate_space(space: &Space) -> Result<(), EngineError> {
    validate_text("name", &space.name, MAX_NAME_LEN)?;
    validate_optional(&space.description, MAX_NOTES_LEN)?;
    if space.capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1".into()));
    }
    validate_rate("hourly_rate", space.hourly_rate)?;
    validate_rate("daily_rate", space.daily_rate)?;
    validate_rate("monthly_rate", space.monthly_rate)
}

fn validate_client(client: &Client) -> Result<(), EngineError> {
    validate_text("name", &client.name, MAX_NAME_LEN)?;
    validate_email(&client.email)?;
    validate_optional(&client.phone, MAX_NAME_LEN)?;
    validate_optional(&client.company, MAX_NAME_LEN)?;
    validate_optional(&client.segment, MAX_NAME_LEN)
}

impl Engine {
    // ── Spaces ───────────────────────────────────────────────────

    pub async fn create_space(&self, principal: &Principal, new: NewSpace) -> Result<Space, EngineError> {
        self.authorize(principal, BACK_OFFICE, "create spaces")?;
        let now = now_ms();
        let space = Space {
            id: new.id,
            name: new.name,
            space_type: new.space_type,
            capacity: new.capacity,
            hourly_rate: new.hourly_rate,
            daily_rate: new.daily_rate,
            monthly_rate: new.monthly_rate,
            description: new.description,
            active: true,
            created_at: now,
            updated_at: now,
        };
        validate_space(&space)?;

        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        if self.spaces.contains_key(&space.id) {
            return Err(EngineError::AlreadyExists(space.id));
        }
        if self.spaces.len() >= MAX_SPACES_PER_ORG {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        self.persist_org(&Event::SpaceCreated(space.clone())).await?;
        info!(space = %space.id, name = %space.name, kind = %space.space_type, "space created");
        Ok(space)
    }

    pub async fn update_space(
        &self,
        principal: &Principal,
        id: Ulid,
        patch: SpacePatch,
    ) -> Result<Space, EngineError> {
        self.authorize(principal, BACK_OFFICE, "update spaces")?;
        let _commit = self.commit_gate.read().await;
        let mut guard = self.space_write(&id).await?;

        let mut space = guard.space.clone();
        if let Some(name) = patch.name {
            space.name = name;
        }
        if let Some(t) = patch.space_type {
            space.space_type = t;
        }
        if let Some(c) = patch.capacity {
            space.capacity = c;
        }
        if let Some(r) = patch.hourly_rate {
            space.hourly_rate = r;
        }
        if let Some(r) = patch.daily_rate {
            space.daily_rate = r;
        }
        if let Some(r) = patch.monthly_rate {
            space.monthly_rate = r;
        }
        if let Some(d) = patch.description {
            space.description = d;
        }
        if let Some(a) = patch.active {
            space.active = a;
        }
        validate_space(&space)?;
        space.updated_at = now_ms();

        self.persist_and_apply(&mut guard, &Event::SpaceUpdated(space.clone()))
            .await?;
        info!(space = %id, "space updated");
        Ok(space)
    }

    /// Remove a space and its historical bookings. Refused while any booking
    /// of the space is still active or has been invoiced.
    pub async fn delete_space(&self, principal: &Principal, id: Ulid) -> Result<(), EngineError> {
        self.authorize(principal, BACK_OFFICE, "delete spaces")?;
        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        let guard = self.space_write(&id).await?;
        if guard.has_active_bookings() {
            return Err(EngineError::HasActiveBookings {
                entity: Entity::Space,
                id,
            });
        }
        if let Some((booking_id, invoice_id)) = guard
            .bookings
            .iter()
            .find_map(|b| self.booking_invoice.get(&b.id).map(|inv| (b.id, *inv.value())))
        {
            return Err(EngineError::AlreadyInvoiced {
                booking_id,
                invoice_id,
            });
        }

        self.wal_append(&Event::SpaceDeleted { id }).await?;
        for b in &guard.bookings {
            self.booking_to_space.remove(&b.id);
        }
        self.spaces.remove(&id);
        info!(space = %id, dropped_bookings = guard.bookings.len(), "space deleted");
        Ok(())
    }

    // ── Clients ──────────────────────────────────────────────────

    pub async fn create_client(&self, principal: &Principal, new: NewClient) -> Result<Client, EngineError> {
        self.check_member(principal)?;
        let now = now_ms();
        let client = Client {
            id: new.id,
            name: new.name,
            email: new.email,
            phone: new.phone,
            company: new.company,
            segment: new.segment,
            active: true,
            created_at: now,
            updated_at: now,
        };
        validate_client(&client)?;

        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        if self.clients.contains_key(&client.id) {
            return Err(EngineError::AlreadyExists(client.id));
        }
        if self.clients.len() >= MAX_CLIENTS_PER_ORG {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        self.persist_org(&Event::ClientCreated(client.clone())).await?;
        info!(client = %client.id, "client created");
        Ok(client)
    }

    pub async fn update_client(
        &self,
        principal: &Principal,
        id: Ulid,
        patch: ClientPatch,
    ) -> Result<Client, EngineError> {
        self.check_member(principal)?;
        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        let mut client = self
            .clients
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::not_found(Entity::Client, id))?;
        if let Some(name) = patch.name {
            client.name = name;
        }
        if let Some(email) = patch.email {
            client.email = email;
        }
        if let Some(phone) = patch.phone {
            client.phone = phone;
        }
        if let Some(company) = patch.company {
            client.company = company;
        }
        if let Some(segment) = patch.segment {
            client.segment = segment;
        }
        validate_client(&client)?;
        client.updated_at = now_ms();

        self.persist_org(&Event::ClientUpdated(client.clone())).await?;
        Ok(client)
    }

    /// Clients are never hard-deleted. Refused while the client holds an
    /// active booking.
    pub async fn deactivate_client(&self, principal: &Principal, id: Ulid) -> Result<Client, EngineError> {
        self.authorize(principal, BACK_OFFICE, "deactivate clients")?;
        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        let _clients = self.client_gate.write().await;
        let mut client = self
            .clients
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::not_found(Entity::Client, id))?;

        let filter = BookingFilter {
            client_id: Some(id),
            ..Default::default()
        };
        let has_active = self
            .collect_bookings(&filter)
            .await
            .iter()
            .any(|b| b.status.is_active());
        if has_active {
            return Err(EngineError::HasActiveBookings {
                entity: Entity::Client,
                id,
            });
        }

        client.active = false;
        client.updated_at = now_ms();
        self.persist_org(&Event::ClientUpdated(client.clone())).await?;
        info!(client = %id, "client deactivated");
        Ok(client)
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// Validate, check for conflicts, price and persist a new booking.
    /// The conflict check and the append happen under the space's write lock,
    /// so two requests for the same slot cannot both succeed.
    pub async fn create_booking(&self, principal: &Principal, new: NewBooking) -> Result<Booking, EngineError> {
        self.check_member(principal)?;
        let now = now_ms();
        let span = validate_booking_span(new.start, new.end, now)?;
        validate_optional(&new.notes, MAX_NOTES_LEN)?;

        let _commit = self.commit_gate.read().await;
        let _clients = self.client_gate.read().await;
        self.active_client(&new.client_id)?;
        let mut guard = self.space_write(&new.space_id).await?;
        if self.booking_to_space.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if !guard.space.active {
            return Err(EngineError::Validation(format!("space {} is inactive", new.space_id)));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many bookings on space"));
        }
        check_no_conflict(&guard, &span, None)?;

        let booking = Booking {
            id: new.id,
            space_id: new.space_id,
            client_id: new.client_id,
            span,
            total_amount: booking_amount(&span, guard.space.hourly_rate),
            status: BookingStatus::Confirmed,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &Event::BookingCreated(booking.clone()))
            .await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking = %booking.id,
            space = %booking.space_id,
            start = booking.span.start,
            end = booking.span.end,
            amount = booking.total_amount,
            "booking created"
        );
        Ok(booking)
    }

    /// Change interval, space, client or notes of a booking that has not been
    /// checked in yet. The booking never conflicts with itself; the amount is
    /// recomputed whenever the interval or the space changes.
    pub async fn update_booking(
        &self,
        principal: &Principal,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        self.check_member(principal)?;
        validate_optional(&patch.notes.clone().flatten(), MAX_NOTES_LEN)?;

        let _commit = self.commit_gate.read().await;
        let _clients = self.client_gate.read().await;
        if let Some(client_id) = &patch.client_id {
            self.active_client(client_id)?;
        }

        // The booking may move while we wait for a lock; retry on the space
        // it lives in now.
        for _ in 0..3 {
            let current_space = self
                .booking_to_space
                .get(&id)
                .map(|e| *e.value())
                .ok_or(EngineError::not_found(Entity::Booking, id))?;
            let target_space = patch.space_id.unwrap_or(current_space);

            if target_space == current_space {
                let mut guard = self.resolve_booking_write(&id).await?;
                if guard.space.id != target_space {
                    continue;
                }
                let updated = {
                    let current = guard
                        .booking(id)
                        .ok_or(EngineError::not_found(Entity::Booking, id))?;
                    let updated = apply_patch(current, &patch, &guard.space)?;
                    check_no_conflict(&guard, &updated.span, Some(id))?;
                    updated
                };
                let event = Event::BookingUpdated {
                    previous_space_id: target_space,
                    booking: updated.clone(),
                };
                self.persist_and_apply(&mut guard, &event).await?;
                info!(booking = %id, "booking updated");
                return Ok(updated);
            }

            let (mut from, mut to) = self.space_write_pair(&current_space, &target_space).await?;
            let Some(current) = from.booking(id) else {
                continue;
            };
            if !to.space.active {
                return Err(EngineError::Validation(format!("space {target_space} is inactive")));
            }
            if to.bookings.len() >= MAX_BOOKINGS_PER_SPACE {
                return Err(EngineError::LimitExceeded("too many bookings on space"));
            }
            let updated = apply_patch(current, &patch, &to.space)?;
            check_no_conflict(&to, &updated.span, Some(id))?;

            let event = Event::BookingUpdated {
                previous_space_id: current_space,
                booking: updated.clone(),
            };
            self.persist_move(&mut from, &mut to, &event).await?;
            info!(booking = %id, from = %current_space, to = %target_space, "booking moved");
            return Ok(updated);
        }
        Err(EngineError::not_found(Entity::Booking, id))
    }

    pub async fn check_in(&self, principal: &Principal, id: Ulid) -> Result<Booking, EngineError> {
        self.check_member(principal)?;
        self.transition(id, Action::CheckIn).await
    }

    pub async fn check_out(&self, principal: &Principal, id: Ulid) -> Result<Booking, EngineError> {
        self.check_member(principal)?;
        self.transition(id, Action::CheckOut).await
    }

    /// Soft delete: the booking stays, with status CANCELLED.
    pub async fn cancel_booking(&self, principal: &Principal, id: Ulid) -> Result<Booking, EngineError> {
        self.authorize(principal, BACK_OFFICE, "cancel bookings")?;
        self.transition(id, Action::Cancel).await
    }

    /// Move a booking to `target` (CHECKED_IN, CHECKED_OUT or CANCELLED)
    /// under the same rules as the dedicated operations.
    pub async fn set_booking_status(
        &self,
        principal: &Principal,
        id: Ulid,
        target: BookingStatus,
    ) -> Result<Booking, EngineError> {
        match Action::reaching(target)? {
            Action::CheckIn => self.check_in(principal, id).await,
            Action::CheckOut => self.check_out(principal, id).await,
            _ => self.cancel_booking(principal, id).await,
        }
    }

    async fn transition(&self, id: Ulid, action: Action) -> Result<Booking, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let now = now_ms();
        let current = guard
            .booking(id)
            .ok_or(EngineError::not_found(Entity::Booking, id))?;
        let status = lifecycle::next_status(current, action, now, self.is_paid_invoice(&id))?;

        let event = Event::BookingStatusChanged {
            id,
            space_id: guard.space.id,
            status,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKING_TRANSITIONS_TOTAL, "status" => status.as_str())
            .increment(1);
        info!(booking = %id, %status, "booking status changed");

        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::not_found(Entity::Booking, id))
    }
}

/// Patched copy of `current`, validated and repriced against `space`.
fn apply_patch(current: &Booking, patch: &BookingPatch, space: &Space) -> Result<Booking, EngineError> {
    lifecycle::ensure_editable(current)?;
    let mut updated = current.clone();
    let start = patch.start.unwrap_or(current.span.start);
    let end = patch.end.unwrap_or(current.span.end);
    updated.span = validate_span(start, end)?;
    if updated.span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    updated.space_id = space.id;
    if let Some(client_id) = patch.client_id {
        updated.client_id = client_id;
    }
    if let Some(notes) = &patch.notes {
        updated.notes = notes.clone();
    }
    if updated.span != current.span || updated.space_id != current.space_id {
        updated.total_amount = booking_amount(&updated.span, space.hourly_rate);
    }
    updated.updated_at = now_ms();
    Ok(updated)
}
