use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::pricing::{percentage, round1, round2};
use super::{Engine, EngineError};

/// Day's bookings over active spaces, as a percentage capped at 100.
/// A count-based proxy for utilization, not time-weighted.
pub fn occupancy_rate(bookings: u64, active_spaces: u64) -> f64 {
    percentage(bookings as f64, active_spaces as f64).min(100.0)
}

/// One row per date of `range`, zero-filled, from per-date booking counts.
pub fn daily_occupancy(
    range: &DateRange,
    counts: &HashMap<NaiveDate, u64>,
    active_spaces: u64,
) -> OccupancyReport {
    let daily: Vec<DailyOccupancy> = Calendar::dates(range)
        .map(|date| {
            let bookings = counts.get(&date).copied().unwrap_or(0);
            DailyOccupancy {
                date,
                bookings,
                occupancy_rate: occupancy_rate(bookings, active_spaces),
            }
        })
        .collect();
    let average_occupancy = if daily.is_empty() {
        0.0
    } else {
        daily.iter().map(|d| d.occupancy_rate).sum::<f64>() / daily.len() as f64
    };
    OccupancyReport {
        daily,
        average_occupancy,
    }
}

fn check_range(range: &DateRange) -> Result<(), EngineError> {
    if range.days() > MAX_REPORT_DAYS {
        return Err(EngineError::LimitExceeded("report range too wide"));
    }
    Ok(())
}

fn revenue_of(bookings: &[Booking]) -> f64 {
    round2(bookings.iter().map(|b| b.total_amount).sum())
}

impl Engine {
    /// Non-cancelled bookings starting inside `range`.
    fn revenue_filter(&self, range: Option<&DateRange>) -> BookingFilter {
        BookingFilter {
            exclude_cancelled: true,
            starts_within: range.map(|r| self.calendar().range_span(r)),
            ..Default::default()
        }
    }

    /// Each space (active ones only when `active_only`) with its bookings
    /// matching `filter`.
    async fn bookings_by_space(&self, filter: &BookingFilter, active_only: bool) -> Vec<(Space, Vec<Booking>)> {
        let arcs: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let guard = arc.read().await;
            if active_only && !guard.space.active {
                continue;
            }
            let bookings = guard.bookings.iter().filter(|b| filter.matches(b)).cloned().collect();
            out.push((guard.space.clone(), bookings));
        }
        out
    }

    async fn active_space_count(&self) -> u64 {
        self.list_spaces(&SpaceFilter {
            active: Some(true),
            ..Default::default()
        })
        .await
        .len() as u64
    }

    fn active_client_count(&self) -> u64 {
        self.clients.iter().filter(|c| c.active).count() as u64
    }

    /// Counts by status, non-cancelled revenue and the share of bookings
    /// that were not cancelled.
    pub async fn booking_stats(
        &self,
        principal: &Principal,
        range: Option<DateRange>,
        space_id: Option<Ulid>,
    ) -> Result<BookingStats, EngineError> {
        self.check_member(principal)?;
        let filter = BookingFilter {
            space_id,
            starts_within: range.map(|r| self.calendar().range_span(&r)),
            ..Default::default()
        };
        let bookings = self.collect_bookings(&filter).await;

        let mut stats = BookingStats {
            total: bookings.len() as u64,
            ..Default::default()
        };
        let mut revenue = 0.0;
        for b in &bookings {
            match b.status {
                BookingStatus::Confirmed => stats.confirmed += 1,
                BookingStatus::CheckedIn => stats.checked_in += 1,
                BookingStatus::CheckedOut => stats.completed += 1,
                BookingStatus::Cancelled => stats.cancelled += 1,
                BookingStatus::Pending => {}
            }
            if b.status.counts_toward_revenue() {
                revenue += b.total_amount;
            }
        }
        stats.total_revenue = round2(revenue);
        stats.occupancy_rate = round1(percentage(
            (stats.total - stats.cancelled) as f64,
            stats.total as f64,
        ));
        Ok(stats)
    }

    /// Headline numbers. Occupancy is bookings over (active spaces × days),
    /// with 30 days when no range is given.
    pub async fn overview(&self, principal: &Principal, range: Option<DateRange>) -> Result<OverviewStats, EngineError> {
        self.authorize(principal, BACK_OFFICE, "view reports")?;
        if let Some(r) = &range {
            check_range(r)?;
        }
        let totals = self.booking_totals(&self.revenue_filter(range.as_ref())).await;
        let total_spaces = self.active_space_count().await;
        let days = range.map_or(DEFAULT_REPORT_DAYS, |r| r.days()) as u64;
        Ok(OverviewStats {
            total_revenue: totals.total_amount,
            total_bookings: totals.count,
            active_clients: self.active_client_count(),
            total_spaces,
            occupancy_rate: percentage(totals.count as f64, (total_spaces * days) as f64),
        })
    }

    /// Revenue per booking start date (dates with bookings only) and per space type.
    pub async fn revenue_report(&self, principal: &Principal, range: DateRange) -> Result<RevenueReport, EngineError> {
        self.authorize(principal, BACK_OFFICE, "view reports")?;
        check_range(&range)?;
        let per_space = self.bookings_by_space(&self.revenue_filter(Some(&range)), false).await;

        let mut daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        let mut by_type: BTreeMap<SpaceType, f64> = BTreeMap::new();
        let mut total = 0.0;
        for (space, bookings) in &per_space {
            for b in bookings {
                *daily.entry(self.calendar().date_of(b.span.start)).or_default() += b.total_amount;
                *by_type.entry(space.space_type).or_default() += b.total_amount;
                total += b.total_amount;
            }
        }
        Ok(RevenueReport {
            daily: daily
                .into_iter()
                .map(|(date, revenue)| DailyRevenue {
                    date,
                    revenue: round2(revenue),
                })
                .collect(),
            by_type: by_type
                .into_iter()
                .map(|(space_type, revenue)| TypeRevenue {
                    space_type,
                    revenue: round2(revenue),
                })
                .collect(),
            total: round2(total),
        })
    }

    pub async fn occupancy_report(&self, principal: &Principal, range: DateRange) -> Result<OccupancyReport, EngineError> {
        self.authorize(principal, BACK_OFFICE, "view reports")?;
        check_range(&range)?;
        let bookings = self.collect_bookings(&self.revenue_filter(Some(&range))).await;
        let mut counts: HashMap<NaiveDate, u64> = HashMap::new();
        for b in &bookings {
            *counts.entry(self.calendar().date_of(b.span.start)).or_default() += 1;
        }
        Ok(daily_occupancy(&range, &counts, self.active_space_count().await))
    }

    /// Active spaces by type and the ten most booked active spaces.
    pub async fn spaces_report(&self, principal: &Principal, range: Option<DateRange>) -> Result<SpacesReport, EngineError> {
        self.authorize(principal, BACK_OFFICE, "view reports")?;
        if let Some(r) = &range {
            check_range(r)?;
        }
        let per_space = self.bookings_by_space(&self.revenue_filter(range.as_ref()), true).await;

        let mut types: BTreeMap<SpaceType, SpaceTypeCount> = BTreeMap::new();
        let mut usage: Vec<SpaceUsage> = Vec::with_capacity(per_space.len());
        for (space, bookings) in &per_space {
            let entry = types.entry(space.space_type).or_insert(SpaceTypeCount {
                space_type: space.space_type,
                spaces: 0,
                bookings: 0,
            });
            entry.spaces += 1;
            entry.bookings += bookings.len() as u64;
            usage.push(SpaceUsage {
                id: space.id,
                name: space.name.clone(),
                space_type: space.space_type,
                bookings_count: bookings.len() as u64,
                total_hours: round1(bookings.iter().map(|b| b.span.hours()).sum()),
                revenue: revenue_of(bookings),
            });
        }
        usage.sort_by(|a, b| {
            b.bookings_count
                .cmp(&a.bookings_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        usage.truncate(TOP_N);

        Ok(SpacesReport {
            types: types.into_values().collect(),
            top_spaces: usage,
            total_spaces: per_space.len() as u64,
        })
    }

    /// Active clients by segment and the ten active clients with the most revenue.
    pub async fn clients_report(&self, principal: &Principal, range: Option<DateRange>) -> Result<ClientsReport, EngineError> {
        self.authorize(principal, BACK_OFFICE, "view reports")?;
        if let Some(r) = &range {
            check_range(r)?;
        }
        let active = self.list_clients(&ClientFilter {
            active: Some(true),
            ..Default::default()
        });

        let mut segments: BTreeMap<Option<String>, u64> = BTreeMap::new();
        for c in &active {
            *segments.entry(c.segment.clone()).or_default() += 1;
        }

        let bookings = self.collect_bookings(&self.revenue_filter(range.as_ref())).await;
        let mut per_client: HashMap<Ulid, (u64, f64)> = HashMap::new();
        for b in &bookings {
            let e = per_client.entry(b.client_id).or_default();
            e.0 += 1;
            e.1 += b.total_amount;
        }
        let mut top: Vec<ClientRevenue> = active
            .iter()
            .filter_map(|c| {
                let &(bookings_count, revenue) = per_client.get(&c.id)?;
                (revenue > 0.0).then(|| ClientRevenue {
                    id: c.id,
                    name: c.name.clone(),
                    company: c.company.clone(),
                    bookings_count,
                    total_revenue: round2(revenue),
                })
            })
            .collect();
        top.sort_by(|a, b| {
            b.total_revenue
                .total_cmp(&a.total_revenue)
                .then_with(|| a.name.cmp(&b.name))
        });
        top.truncate(TOP_N);

        Ok(ClientsReport {
            segments: segments
                .into_iter()
                .map(|(segment, count)| SegmentCount { segment, count })
                .collect(),
            top_clients: top,
            total_clients: active.len() as u64,
        })
    }

    /// Today's figures, open to every role.
    pub async fn dashboard(&self, principal: &Principal) -> Result<DashboardStats, EngineError> {
        self.check_member(principal)?;
        let today = self.calendar().date_of(now_ms());
        let filter = BookingFilter {
            exclude_cancelled: true,
            starts_within: Some(self.calendar().day_span(today)),
            ..Default::default()
        };
        let totals = self.booking_totals(&filter).await;
        Ok(DashboardStats {
            total_spaces: self.active_space_count().await,
            total_clients: self.active_client_count(),
            today_bookings: totals.count,
            today_revenue: totals.total_amount,
            pending_invoices: self
                .invoices
                .iter()
                .filter(|i| i.status == InvoiceStatus::Pending)
                .count() as u64,
        })
    }

    /// Invoice counts and amounts (tax included) for invoices created in `range`.
    pub async fn billing_stats(&self, principal: &Principal, range: Option<DateRange>) -> Result<BillingStats, EngineError> {
        self.check_member(principal)?;
        let now = now_ms();
        let invoices = self.list_invoices(&InvoiceFilter {
            created_within: range.map(|r| self.calendar().range_span(&r)),
            ..Default::default()
        });

        let mut stats = BillingStats::default();
        for inv in &invoices {
            let gross = inv.amount + inv.tax_amount;
            stats.total_invoices += 1;
            stats.total_amount += gross;
            match inv.status {
                InvoiceStatus::Pending => {
                    stats.pending_invoices += 1;
                    stats.pending_amount += gross;
                    if inv.due_date < now {
                        stats.overdue_invoices += 1;
                    }
                }
                InvoiceStatus::Paid => {
                    stats.paid_invoices += 1;
                    stats.paid_amount += gross;
                }
            }
        }
        stats.total_amount = round2(stats.total_amount);
        stats.pending_amount = round2(stats.pending_amount);
        stats.paid_amount = round2(stats.paid_amount);
        stats.collection_rate = round1(percentage(
            stats.paid_invoices as f64,
            stats.total_invoices as f64,
        ));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;

    #[test]
    fn occupancy_is_capped_and_zero_without_spaces() {
        assert_eq!(occupancy_rate(1, 4), 25.0);
        assert_eq!(occupancy_rate(9, 4), 100.0);
        assert_eq!(occupancy_rate(3, 0), 0.0);
    }

    #[test]
    fn daily_occupancy_zero_fills_and_averages() {
        let range = DateRange::new(parse_date("2026-05-01").unwrap(), parse_date("2026-05-04").unwrap()).unwrap();
        let mut counts = HashMap::new();
        counts.insert(parse_date("2026-05-01").unwrap(), 1);
        counts.insert(parse_date("2026-05-03").unwrap(), 5);
        // Outside the range: ignored.
        counts.insert(parse_date("2026-06-01").unwrap(), 7);

        let report = daily_occupancy(&range, &counts, 2);
        let rates: Vec<f64> = report.daily.iter().map(|d| d.occupancy_rate).collect();
        assert_eq!(rates, vec![50.0, 0.0, 100.0, 0.0]);
        assert_eq!(report.daily[2].bookings, 5);
        assert_eq!(report.average_occupancy, 37.5);
    }
}
