//! Snapshot feature builder — leakage-free, as-of customer features.
//!
//! For each month-end as-of date this stage computes, per customer:
//!   1. Lifetime aggregates from the FULL history at or before the as-of
//!      date (tenure, recency, order/revenue/item/SKU totals).
//!   2. Behavioral stats from a bounded lookback window ending at the as-of
//!      date (basket averages, inter-order gap statistics).
//!   3. Rolling 30/90-day revenue and order counts anchored at the as-of
//!      date (zero-filled, never missing).
//!
//! RULE: no value may be derived from an event dated after the as-of date.
//! A customer absent from the lookback window keeps lifetime fields and gets
//! missing behavioral fields — long-inactive customers still have a history.

use crate::{
    calendar::month_ends_between,
    event::{EventLog, TransactionEvent},
    types::CustomerId,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Model feature columns, in the order `model_vector` emits them.
pub const FEATURE_NAMES: [&str; 13] = [
    "tenure_days",
    "total_orders",
    "total_revenue",
    "avg_basket_value",
    "avg_items_per_order",
    "avg_unique_skus",
    "avg_days_between_orders",
    "median_days_between_orders",
    "recency_days",
    "revenue_last_30d",
    "orders_last_30d",
    "revenue_last_90d",
    "orders_last_90d",
];

/// Point-in-time feature row, keyed by (customer_id, snapshot_date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshotFeature {
    pub customer_id:   CustomerId,
    pub snapshot_date: NaiveDate,

    // Lifetime (full history ≤ snapshot)
    pub first_purchase: NaiveDate,
    pub last_purchase:  NaiveDate,
    pub tenure_days:    i64,
    pub recency_days:   i64,
    pub total_orders:   i64,
    pub total_revenue:  f64,
    pub total_items:    f64,
    pub unique_skus:    i64,

    // Behavioral (lookback window ≤ snapshot); None when the customer has
    // no activity inside the window.
    pub avg_basket_value:           Option<f64>,
    pub avg_items_per_order:        Option<f64>,
    pub avg_unique_skus:            Option<f64>,
    pub avg_days_between_orders:    Option<f64>,
    pub median_days_between_orders: Option<f64>,

    // Rolling windows anchored at the snapshot (zero-filled)
    pub revenue_last_30d: f64,
    pub orders_last_30d:  i64,
    pub revenue_last_90d: f64,
    pub orders_last_90d:  i64,
}

impl CustomerSnapshotFeature {
    /// Dense model input in `FEATURE_NAMES` order. Missing and non-finite
    /// values are zero-filled — the classifier contract takes clean floats.
    pub fn model_vector(&self) -> Vec<f64> {
        let fill = |v: Option<f64>| match v {
            Some(x) if x.is_finite() => x,
            _ => 0.0,
        };
        vec![
            self.tenure_days as f64,
            self.total_orders as f64,
            fill(Some(self.total_revenue)),
            fill(self.avg_basket_value),
            fill(self.avg_items_per_order),
            fill(self.avg_unique_skus),
            fill(self.avg_days_between_orders),
            fill(self.median_days_between_orders),
            self.recency_days as f64,
            fill(Some(self.revenue_last_30d)),
            self.orders_last_30d as f64,
            fill(Some(self.revenue_last_90d)),
            self.orders_last_90d as f64,
        ]
    }
}

// ── Per-customer accumulators ────────────────────────────────────────────────

#[derive(Debug)]
struct LifetimeAgg<'a> {
    first:      NaiveDate,
    last:       NaiveDate,
    invoices:   BTreeSet<&'a str>,
    revenue:    f64,
    items:      f64,
    skus:       BTreeSet<&'a str>,
    line_count: i64,
}

#[derive(Debug)]
struct OrderAgg<'a> {
    date:       NaiveDate,
    revenue:    f64,
    items:      f64,
    skus:       BTreeSet<&'a str>,
    line_count: i64,
}

impl OrderAgg<'_> {
    /// Distinct SKU count, falling back to line count when the feed carries
    /// no stock codes at all.
    fn unique_skus(&self) -> i64 {
        if self.skus.is_empty() {
            self.line_count
        } else {
            self.skus.len() as i64
        }
    }
}

#[derive(Debug, Default)]
struct RollingAgg<'a> {
    revenue:  f64,
    invoices: BTreeSet<&'a str>,
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Compute one snapshot's feature rows. `lookback_days <= 0` means the
/// behavioral window covers the full history.
///
/// Returns one row per customer with any activity at or before `as_of`,
/// sorted by customer id; an empty vec when no history exists yet.
pub fn build_features(
    log: &EventLog,
    as_of: NaiveDate,
    lookback_days: i64,
) -> Vec<CustomerSnapshotFeature> {
    let hist = log.through(as_of);
    if hist.is_empty() {
        return Vec::new();
    }

    // 1. Lifetime aggregates over the full history.
    let mut lifetime: BTreeMap<&str, LifetimeAgg> = BTreeMap::new();
    for e in hist {
        let agg = lifetime
            .entry(e.customer_id.as_str())
            .or_insert_with(|| LifetimeAgg {
                first:      e.date,
                last:       e.date,
                invoices:   BTreeSet::new(),
                revenue:    0.0,
                items:      0.0,
                skus:       BTreeSet::new(),
                line_count: 0,
            });
        agg.first = agg.first.min(e.date);
        agg.last = agg.last.max(e.date);
        agg.invoices.insert(e.invoice_id.as_str());
        agg.revenue += e.total_price;
        agg.items += e.quantity;
        if let Some(code) = e.stock_code.as_deref() {
            agg.skus.insert(code);
        }
        agg.line_count += 1;
    }

    // 2. Order-level aggregates inside the lookback window.
    let lookback_events: &[TransactionEvent] = if lookback_days > 0 {
        let start = as_of - Duration::days(lookback_days);
        let skip = hist.partition_point(|e| e.date < start);
        &hist[skip..]
    } else {
        hist
    };

    let mut orders: BTreeMap<(&str, &str), OrderAgg> = BTreeMap::new();
    for e in lookback_events {
        let agg = orders
            .entry((e.customer_id.as_str(), e.invoice_id.as_str()))
            .or_insert_with(|| OrderAgg {
                date:       e.date,
                revenue:    0.0,
                items:      0.0,
                skus:       BTreeSet::new(),
                line_count: 0,
            });
        agg.date = agg.date.min(e.date);
        agg.revenue += e.total_price;
        agg.items += e.quantity;
        if let Some(code) = e.stock_code.as_deref() {
            agg.skus.insert(code);
        }
        agg.line_count += 1;
    }

    let mut behavioral: BTreeMap<&str, Vec<&OrderAgg>> = BTreeMap::new();
    for ((customer, _invoice), agg) in &orders {
        behavioral.entry(customer).or_default().push(agg);
    }

    // 3. Rolling 30/90-day windows (strictly after as_of − days).
    let rolling = |days: i64| -> BTreeMap<&str, RollingAgg> {
        let start_excl = as_of - Duration::days(days);
        let skip = hist.partition_point(|e| e.date <= start_excl);
        let mut out: BTreeMap<&str, RollingAgg> = BTreeMap::new();
        for e in &hist[skip..] {
            let agg = out.entry(e.customer_id.as_str()).or_default();
            agg.revenue += e.total_price;
            agg.invoices.insert(e.invoice_id.as_str());
        }
        out
    };
    let r30 = rolling(30);
    let r90 = rolling(90);

    lifetime
        .iter()
        .map(|(customer, life)| {
            let (avg_basket, avg_items, avg_skus, gap_mean, gap_median) =
                match behavioral.get(customer) {
                    Some(cust_orders) => behavioral_stats(cust_orders),
                    None => (None, None, None, None, None),
                };

            let (rev30, ord30) = r30
                .get(customer)
                .map(|a| (a.revenue, a.invoices.len() as i64))
                .unwrap_or((0.0, 0));
            let (rev90, ord90) = r90
                .get(customer)
                .map(|a| (a.revenue, a.invoices.len() as i64))
                .unwrap_or((0.0, 0));

            let unique_skus = if life.skus.is_empty() {
                life.line_count
            } else {
                life.skus.len() as i64
            };

            CustomerSnapshotFeature {
                customer_id: customer.to_string(),
                snapshot_date: as_of,
                first_purchase: life.first,
                last_purchase: life.last,
                tenure_days: (life.last - life.first).num_days(),
                recency_days: (as_of - life.last).num_days(),
                total_orders: life.invoices.len() as i64,
                total_revenue: life.revenue,
                total_items: life.items,
                unique_skus,
                avg_basket_value: avg_basket,
                avg_items_per_order: avg_items,
                avg_unique_skus: avg_skus,
                avg_days_between_orders: gap_mean,
                median_days_between_orders: gap_median,
                revenue_last_30d: rev30,
                orders_last_30d: ord30,
                revenue_last_90d: rev90,
                orders_last_90d: ord90,
            }
        })
        .collect()
}

/// Per-order means and consecutive inter-order gap statistics for one
/// customer's lookback orders. Gap stats need at least two orders.
fn behavioral_stats(
    orders: &[&OrderAgg],
) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let n = orders.len() as f64;
    let avg_basket = orders.iter().map(|o| o.revenue).sum::<f64>() / n;
    let avg_items = orders.iter().map(|o| o.items).sum::<f64>() / n;
    let avg_skus = orders.iter().map(|o| o.unique_skus() as f64).sum::<f64>() / n;

    let mut dates: Vec<NaiveDate> = orders.iter().map(|o| o.date).collect();
    dates.sort();
    let gaps: Vec<f64> = dates
        .windows(2)
        .map(|w| (w[1] - w[0]).num_days() as f64)
        .collect();

    let (gap_mean, gap_median) = if gaps.is_empty() {
        (None, None)
    } else {
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        (Some(mean), Some(median(&gaps)))
    };

    (
        Some(avg_basket),
        Some(avg_items),
        Some(avg_skus),
        gap_mean,
        gap_median,
    )
}

fn median(sorted_input: &[f64]) -> f64 {
    let mut v = sorted_input.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).expect("gap days are finite"));
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        v[mid]
    } else {
        (v[mid - 1] + v[mid]) / 2.0
    }
}

/// Run the builder once per month-end across the observed span (optionally
/// clamped to `[start, end]`) and concatenate the per-snapshot rows.
pub fn build_monthly_features(
    log: &EventLog,
    lookback_days: i64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<CustomerSnapshotFeature> {
    let (Some(mut first), Some(mut last)) = (log.min_date(), log.max_date()) else {
        return Vec::new();
    };
    if let Some(s) = start {
        first = first.max(s);
    }
    if let Some(e) = end {
        last = last.min(e);
    }

    let mut out = Vec::new();
    for as_of in month_ends_between(first, last) {
        let rows = build_features(log, as_of, lookback_days);
        log::debug!(
            "features: as_of={as_of} rows={} (lookback={lookback_days}d)",
            rows.len()
        );
        out.extend(rows);
    }
    out
}
