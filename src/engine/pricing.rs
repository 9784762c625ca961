use crate::model::Span;

/// Round half away from zero to two decimals (currency).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round half away from zero to one decimal (percentages, hours).
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Price of occupying `span` at `hourly_rate`. Fractional hours are billed
/// pro rata; only the final amount is rounded.
pub fn booking_amount(span: &Span, hourly_rate: f64) -> f64 {
    round2(span.hours() * hourly_rate)
}

/// `part / whole` as a percentage; 0 when `whole` is 0.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 { 0.0 } else { part / whole * 100.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HOUR_MS, MINUTE_MS};

    #[test]
    fn whole_hours() {
        assert_eq!(booking_amount(&Span::new(0, 2 * HOUR_MS), 25.0), 50.0);
    }

    #[test]
    fn fractional_hours() {
        assert_eq!(booking_amount(&Span::new(0, 90 * MINUTE_MS), 20.0), 30.0);
        // 10 minutes at 10.00/h = 1.666.. → 1.67
        assert_eq!(booking_amount(&Span::new(0, 10 * MINUTE_MS), 10.0), 1.67);
    }

    #[test]
    fn zero_rate_is_free() {
        assert_eq!(booking_amount(&Span::new(0, 3 * HOUR_MS), 0.0), 0.0);
    }

    #[test]
    fn rounding_helpers() {
        assert_eq!(round2(12.345_6), 12.35);
        assert_eq!(round1(66.66), 66.7);
        assert_eq!(round1(2.25), 2.3);
        assert_eq!(percentage(1.0, 4.0), 25.0);
        assert_eq!(percentage(3.0, 0.0), 0.0);
    }
}
