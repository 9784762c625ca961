use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Turn raw bounds into a span, rejecting empty/inverted and out-of-range input.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::checked(start, end).ok_or_else(|| {
        EngineError::Validation(format!("start ({start}) must be before end ({end})"))
    })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(span)
}

/// Validation for an interval a booking is about to occupy.
pub(crate) fn validate_booking_span(start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    let span = validate_span(start, end)?;
    if span.start < now {
        return Err(EngineError::Validation("cannot book in the past".into()));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(span)
}

pub(crate) fn validate_query_window(span: &Span) -> Result<(), EngineError> {
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// First active booking (in start order) overlapping `span`, skipping `exclude`.
/// Adjacent bookings (`existing.end == span.start`) never conflict.
pub(crate) fn find_conflict<'a>(
    ss: &'a SpaceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    ss.overlapping(span)
        .filter(|b| b.status.is_active())
        .find(|b| Some(b.id) != exclude)
}

/// Caller must hold the space's write lock for the check to stay valid
/// until the booking is persisted.
pub(crate) fn check_no_conflict(
    ss: &SpaceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(ss, span, exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Overlap {
                id: existing.id,
                span: existing.span,
            })
        }
        None => Ok(()),
    }
}
