use chrono::Datelike;
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::pricing::round2;
use super::{Engine, EngineError, Entity};

/// VAT applied to invoices generated from completed bookings.
pub const GENERATED_TAX_RATE: f64 = 0.22;

/// Payment term of generated invoices.
pub const PAYMENT_TERM_MS: Ms = 30 * DAY_MS;

/// `INV-<year>-<seq>`, seq zero-padded to four digits.
pub fn invoice_number(year: i32, seq: usize) -> String {
    format!("INV-{year}-{seq:04}")
}

impl Engine {
    /// Issue an invoice to a client, optionally for one of the client's bookings.
    /// The amount defaults to the booking's total.
    pub async fn issue_invoice(&self, principal: &Principal, new: NewInvoice) -> Result<Invoice, EngineError> {
        self.authorize(principal, BACK_OFFICE, "issue invoices")?;
        if !self.clients.contains_key(&new.client_id) {
            return Err(EngineError::not_found(Entity::Client, new.client_id));
        }
        let booking = match new.booking_id {
            Some(bid) => {
                let booking = self
                    .get_booking(&bid)
                    .await
                    .ok_or(EngineError::not_found(Entity::Booking, bid))?;
                if booking.client_id != new.client_id {
                    return Err(EngineError::Validation(format!(
                        "booking {bid} does not belong to client {}",
                        new.client_id
                    )));
                }
                Some(booking)
            }
            None => None,
        };
        let amount = new
            .amount
            .or(booking.as_ref().map(|b| b.total_amount))
            .ok_or_else(|| EngineError::Validation("amount is required".into()))?;
        let tax_amount = new.tax_amount.unwrap_or(0.0);
        for (field, v) in [("amount", amount), ("tax_amount", tax_amount)] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::Validation(format!("{field} must be a non-negative number")));
            }
        }
        let now = now_ms();

        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        if self.invoices.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        let invoice = Invoice {
            id: new.id,
            number: self.next_invoice_number(now),
            client_id: new.client_id,
            booking_id: new.booking_id,
            amount: round2(amount),
            tax_amount: round2(tax_amount),
            due_date: new.due_date.unwrap_or(now + PAYMENT_TERM_MS),
            status: InvoiceStatus::Pending,
            paid_at: None,
            notes: new.notes,
            created_at: now,
        };
        self.record_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// PENDING → PAID. Any role may record a payment.
    pub async fn mark_invoice_paid(&self, principal: &Principal, id: Ulid) -> Result<Invoice, EngineError> {
        self.check_member(principal)?;
        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        let status = self
            .invoices
            .get(&id)
            .map(|inv| inv.status)
            .ok_or(EngineError::not_found(Entity::Invoice, id))?;
        if status == InvoiceStatus::Paid {
            return Err(EngineError::InvoicePaid(id));
        }
        let paid_at = now_ms();
        self.persist_org(&Event::InvoicePaid { id, paid_at }).await?;
        info!(invoice = %id, "invoice paid");
        self.invoices
            .get(&id)
            .map(|inv| inv.value().clone())
            .ok_or(EngineError::not_found(Entity::Invoice, id))
    }

    /// Invoice every CHECKED_OUT booking that has none yet, with 22% tax and
    /// a 30-day term. Returns how many invoices were issued.
    pub async fn generate_invoices(&self, principal: &Principal) -> Result<usize, EngineError> {
        self.authorize(principal, BACK_OFFICE, "generate invoices")?;
        let filter = BookingFilter {
            status: Some(BookingStatus::CheckedOut),
            ..Default::default()
        };
        let completed = self.collect_bookings(&filter).await;

        let _commit = self.commit_gate.read().await;
        let _ledger = self.ledger_lock.lock().await;
        let mut generated = 0;
        for booking in completed {
            if self.booking_invoice.contains_key(&booking.id) {
                continue;
            }
            let now = now_ms();
            let invoice = Invoice {
                id: Ulid::new(),
                number: self.next_invoice_number(now),
                client_id: booking.client_id,
                booking_id: Some(booking.id),
                amount: booking.total_amount,
                tax_amount: round2(booking.total_amount * GENERATED_TAX_RATE),
                due_date: now + PAYMENT_TERM_MS,
                status: InvoiceStatus::Pending,
                paid_at: None,
                notes: None,
                created_at: now,
            };
            self.record_invoice(&invoice).await?;
            generated += 1;
        }
        info!(generated, "invoices generated from completed bookings");
        Ok(generated)
    }

    /// Caller holds `ledger_lock`.
    fn next_invoice_number(&self, now: Ms) -> String {
        invoice_number(self.calendar().date_of(now).year(), self.invoices.len() + 1)
    }

    /// Caller holds `ledger_lock`.
    async fn record_invoice(&self, invoice: &Invoice) -> Result<(), EngineError> {
        if let Some(bid) = invoice.booking_id
            && let Some(existing) = self.booking_invoice.get(&bid)
        {
            return Err(EngineError::AlreadyInvoiced {
                booking_id: bid,
                invoice_id: *existing.value(),
            });
        }
        self.persist_org(&Event::InvoiceIssued(invoice.clone())).await?;
        info!(invoice = %invoice.id, number = %invoice.number, amount = invoice.amount, "invoice issued");
        Ok(())
    }
}
