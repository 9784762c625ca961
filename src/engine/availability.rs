use crate::model::*;

// ── Day window and free time ─────────────────────────────────────

/// Bookings of one space intersecting `window`, CANCELLED excluded, in start order.
/// CHECKED_OUT bookings are still listed: they describe how the day was used.
pub fn occupied_slots(ss: &SpaceState, window: &Span) -> Vec<OccupiedSlot> {
    ss.overlapping(window)
        .filter(|b| b.status.counts_toward_revenue())
        .map(|b| OccupiedSlot {
            booking_id: b.id,
            start: b.span.start,
            end: b.span.end,
            status: b.status,
        })
        .collect()
}

/// Gaps of `window` not covered by any active booking, clamped to the window.
/// Gaps shorter than `min_duration` are dropped.
pub fn free_slots(ss: &SpaceState, window: &Span, min_duration: Option<Ms>) -> Vec<Span> {
    let busy: Vec<Span> = ss
        .overlapping(window)
        .filter(|b| b.status.is_active())
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();
    // `overlapping` yields start order and clamping keeps it.
    let busy = merge_overlapping(&busy);
    let min = min_duration.unwrap_or(0);
    subtract_intervals(&[*window], &busy)
        .into_iter()
        .filter(|s| s.duration_ms() >= min)
        .collect()
}

// ── Interval helpers ─────────────────────────────────────────────

/// Merge a start-sorted list; touching spans coalesce.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base − to_remove`; both inputs sorted and non-overlapping.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut skip = 0;

    for b in base {
        let mut cursor = b.start;
        while skip < to_remove.len() && to_remove[skip].end <= cursor {
            skip += 1;
        }
        for r in to_remove[skip..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}
