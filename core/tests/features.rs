//! Snapshot feature builder: leakage boundary, lookback behavior, rolling
//! windows, gap statistics.

use chrono::NaiveDate;
use retention_core::event::{EventLog, TransactionEvent};
use retention_core::features::{build_features, build_monthly_features};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn purchase(customer: &str, invoice: &str, date: NaiveDate, total: f64) -> TransactionEvent {
    TransactionEvent {
        customer_id: customer.into(),
        invoice_id:  invoice.into(),
        date,
        quantity:    1.0,
        unit_price:  total,
        total_price: total,
        stock_code:  Some("SKU-1".into()),
        country:     None,
    }
}

/// Events dated after the as-of date must not influence any feature value.
#[test]
fn no_leakage_past_as_of() {
    let log = EventLog::from_rows(vec![
        purchase("1", "A", d(2024, 1, 10), 50.0),
        purchase("1", "B", d(2024, 2, 10), 999.0),
    ]);
    let rows = build_features(&log, d(2024, 1, 31), 365);
    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r.total_orders, 1);
    assert_eq!(r.total_revenue, 50.0);
    assert_eq!(r.last_purchase, d(2024, 1, 10));
    assert_eq!(r.recency_days, 21);
}

/// Rolling 30/90-day windows are zero-filled, never missing.
#[test]
fn rolling_windows_zero_filled_for_inactive() {
    let log = EventLog::from_rows(vec![purchase("1", "A", d(2024, 1, 10), 50.0)]);
    // 200+ days later: no recent activity at all.
    let rows = build_features(&log, d(2024, 8, 31), 365);
    let r = &rows[0];
    assert_eq!(r.revenue_last_30d, 0.0);
    assert_eq!(r.orders_last_30d, 0);
    assert_eq!(r.revenue_last_90d, 0.0);
    assert_eq!(r.orders_last_90d, 0);
}

/// A customer with history but no lookback-window activity keeps lifetime
/// fields and gets missing behavioral fields.
#[test]
fn lookback_absence_keeps_lifetime_fields() {
    let log = EventLog::from_rows(vec![purchase("1", "A", d(2024, 1, 10), 50.0)]);
    let rows = build_features(&log, d(2024, 3, 31), 30);
    let r = &rows[0];
    assert_eq!(r.total_orders, 1);
    assert_eq!(r.total_revenue, 50.0);
    assert!(r.avg_basket_value.is_none());
    assert!(r.avg_days_between_orders.is_none());
}

/// Inter-order gap statistics: consecutive day gaps, mean and median.
#[test]
fn gap_statistics_from_consecutive_orders() {
    let log = EventLog::from_rows(vec![
        purchase("1", "A", d(2024, 1, 1), 10.0),
        purchase("1", "B", d(2024, 1, 11), 10.0),
        purchase("1", "C", d(2024, 1, 31), 10.0),
    ]);
    let rows = build_features(&log, d(2024, 2, 28), 365);
    let r = &rows[0];
    // gaps: 10 and 20 days
    assert_eq!(r.avg_days_between_orders, Some(15.0));
    assert_eq!(r.median_days_between_orders, Some(15.0));
    assert_eq!(r.total_orders, 3);
}

/// Gap statistics need at least two orders.
#[test]
fn single_order_has_no_gap_stats() {
    let log = EventLog::from_rows(vec![purchase("1", "A", d(2024, 1, 10), 50.0)]);
    let rows = build_features(&log, d(2024, 1, 31), 365);
    let r = &rows[0];
    assert!(r.avg_days_between_orders.is_none());
    assert!(r.median_days_between_orders.is_none());
    assert!(r.avg_basket_value.is_some());
}

/// A snapshot before any history produces no rows.
#[test]
fn empty_history_yields_no_rows() {
    let log = EventLog::from_rows(vec![purchase("1", "A", d(2024, 6, 10), 50.0)]);
    assert!(build_features(&log, d(2024, 1, 31), 365).is_empty());
}

/// Monthly grid covers every month-end between first and last event, and a
/// customer appears in every snapshot from their first purchase onward.
#[test]
fn monthly_grid_carries_customers_forward() {
    let log = EventLog::from_rows(vec![
        purchase("1", "A", d(2024, 1, 10), 50.0),
        purchase("2", "B", d(2024, 3, 5), 20.0),
    ]);
    let rows = build_monthly_features(&log, 365, None, None);
    let snapshots: Vec<_> = rows
        .iter()
        .filter(|r| r.customer_id == "1")
        .map(|r| r.snapshot_date)
        .collect();
    assert_eq!(snapshots, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31)]);
    // customer 2 only exists from March
    assert_eq!(
        rows.iter().filter(|r| r.customer_id == "2").count(),
        1
    );
}
