use crate::model::*;

use super::EngineError;

/// How early before its start a booking may be checked in.
pub const CHECK_IN_WINDOW_MS: Ms = 15 * MINUTE_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CheckIn,
    CheckOut,
    Cancel,
    Edit,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::CheckIn => "check in",
            Action::CheckOut => "check out",
            Action::Cancel => "cancel",
            Action::Edit => "edit",
        }
    }

    /// Action that moves a booking into `target`, if any.
    pub fn reaching(target: BookingStatus) -> Result<Self, EngineError> {
        match target {
            BookingStatus::CheckedIn => Ok(Action::CheckIn),
            BookingStatus::CheckedOut => Ok(Action::CheckOut),
            BookingStatus::Cancelled => Ok(Action::Cancel),
            other => Err(EngineError::Validation(format!(
                "status {other} cannot be set directly"
            ))),
        }
    }
}

fn invalid(b: &Booking, action: Action) -> EngineError {
    EngineError::InvalidTransition {
        id: b.id,
        from: b.status,
        action: action.label(),
    }
}

/// Interval, space, client and notes may change only before check-in.
pub fn ensure_editable(b: &Booking) -> Result<(), EngineError> {
    match b.status {
        BookingStatus::Pending | BookingStatus::Confirmed => Ok(()),
        _ => Err(invalid(b, Action::Edit)),
    }
}

/// Status a booking moves to when `action` is applied at `now`.
/// `paid_invoice` is the booking's invoice when it is already settled.
pub fn next_status(
    b: &Booking,
    action: Action,
    now: Ms,
    paid_invoice: Option<ulid::Ulid>,
) -> Result<BookingStatus, EngineError> {
    match (action, b.status) {
        (Action::CheckIn, BookingStatus::Confirmed) => {
            let opens_at = b.span.start - CHECK_IN_WINDOW_MS;
            if now < opens_at {
                return Err(EngineError::CheckInTooEarly { id: b.id, opens_at });
            }
            Ok(BookingStatus::CheckedIn)
        }
        (Action::CheckOut, BookingStatus::CheckedIn) => Ok(BookingStatus::CheckedOut),
        (Action::Cancel, BookingStatus::Pending | BookingStatus::Confirmed) => {
            if let Some(invoice_id) = paid_invoice {
                return Err(EngineError::PaidInvoice {
                    booking_id: b.id,
                    invoice_id,
                });
            }
            Ok(BookingStatus::Cancelled)
        }
        (Action::Edit, _) => ensure_editable(b).map(|()| b.status),
        _ => Err(invalid(b, action)),
    }
}
