use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Ms, Role, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Space,
    Client,
    Booking,
    Invoice,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Space => "space",
            Entity::Client => "client",
            Entity::Booking => "booking",
            Entity::Invoice => "invoice",
        })
    }
}

/// Coarse classification used at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    Limit,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: Ulid },

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("space already booked by {id} for [{}, {})", span.start, span.end)]
    Overlap { id: Ulid, span: Span },

    #[error("booking {id} is {from}; cannot {action}")]
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        action: &'static str,
    },

    #[error("booking {id} cannot be checked in before {opens_at}")]
    CheckInTooEarly { id: Ulid, opens_at: Ms },

    #[error("invoice {0} is already paid")]
    InvoicePaid(Ulid),

    #[error("booking {booking_id} has paid invoice {invoice_id}")]
    PaidInvoice { booking_id: Ulid, invoice_id: Ulid },

    #[error("{entity} {id} has active bookings")]
    HasActiveBookings { entity: Entity, id: Ulid },

    #[error("booking {booking_id} already invoiced as {invoice_id}")]
    AlreadyInvoiced { booking_id: Ulid, invoice_id: Ulid },

    #[error("role {role} may not {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("principal belongs to organization {0:?}")]
    WrongOrganization(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::Overlap { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::CheckInTooEarly { .. }
            | EngineError::InvoicePaid(_)
            | EngineError::PaidInvoice { .. }
            | EngineError::HasActiveBookings { .. }
            | EngineError::AlreadyInvoiced { .. } => ErrorKind::Conflict,
            EngineError::Forbidden { .. } | EngineError::WrongOrganization(_) => {
                ErrorKind::Forbidden
            }
            EngineError::LimitExceeded(_) => ErrorKind::Limit,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}
