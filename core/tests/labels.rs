//! Censored label engine: forward window membership and right-censoring.

use chrono::NaiveDate;
use retention_core::event::{EventLog, TransactionEvent};
use retention_core::features::build_monthly_features;
use retention_core::labels::{label_features, ChurnLabel};

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
        stock_code:  None,
        country:     None,
    }
}

fn sample_log() -> EventLog {
    EventLog::from_rows(vec![
        // A buys in January and again in March (inside the 90d window).
        purchase("A", "A1", d(2024, 1, 10), 50.0),
        purchase("A", "A2", d(2024, 3, 1), 30.0),
        // B buys once in January and never returns.
        purchase("B", "B1", d(2024, 1, 15), 20.0),
        // C extends the observation horizon to mid-June.
        purchase("C", "C1", d(2024, 6, 15), 10.0),
    ])
}

fn label_of(rows: &[retention_core::labels::LabeledFeature], customer: &str, snap: NaiveDate) -> ChurnLabel {
    rows.iter()
        .find(|r| r.feature.customer_id == customer && r.feature.snapshot_date == snap)
        .map(|r| r.label)
        .unwrap()
}

/// Retained when the (S, S+90] window holds an event, churned otherwise.
#[test]
fn window_membership_decides_label() {
    let log = sample_log();
    let features = build_monthly_features(&log, 365, None, None);
    let rows = label_features(&log, &features, 90, false).unwrap();

    // January snapshot: window is (Jan 31, Apr 30], well inside the horizon.
    assert_eq!(label_of(&rows, "A", d(2024, 1, 31)), ChurnLabel::Retained);
    assert_eq!(label_of(&rows, "B", d(2024, 1, 31)), ChurnLabel::Churned);
}

/// A window reaching past the global max date censors the whole snapshot.
#[test]
fn windows_past_horizon_are_unobservable() {
    let log = sample_log();
    let features = build_monthly_features(&log, 365, None, None);
    let rows = label_features(&log, &features, 90, false).unwrap();

    // June snapshot: window ends in late September, past the June 15 horizon.
    assert_eq!(
        label_of(&rows, "A", d(2024, 6, 30)),
        ChurnLabel::Unobservable
    );
    assert_eq!(
        label_of(&rows, "C", d(2024, 6, 30)),
        ChurnLabel::Unobservable
    );
}

/// The window starts the day AFTER the snapshot: an event on the snapshot
/// date itself does not count as retention.
#[test]
fn snapshot_day_event_is_outside_window() {
    let log = EventLog::from_rows(vec![
        purchase("A", "A1", d(2024, 1, 31), 50.0),
        purchase("B", "B1", d(2024, 6, 1), 10.0),
    ]);
    let features = build_monthly_features(&log, 365, None, None);
    let rows = label_features(&log, &features, 90, false).unwrap();
    assert_eq!(label_of(&rows, "A", d(2024, 1, 31)), ChurnLabel::Churned);
}

/// Flag mapping: censored labels carry no 0/1 flag.
#[test]
fn flag_round_trip() {
    assert_eq!(ChurnLabel::Retained.as_flag(), Some(0));
    assert_eq!(ChurnLabel::Churned.as_flag(), Some(1));
    assert_eq!(ChurnLabel::Unobservable.as_flag(), None);
    assert_eq!(ChurnLabel::from_flag(Some(1)), ChurnLabel::Churned);
    assert_eq!(ChurnLabel::from_flag(None), ChurnLabel::Unobservable);
}
