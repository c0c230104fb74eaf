//! Temporal split & risk scorer: cutoff selection, thresholds, action
//! flagging, and the full fit/select/score path.

use chrono::NaiveDate;
use retention_core::campaign::ValueTier;
use retention_core::config::PipelineConfig;
use retention_core::error::PipelineError;
use retention_core::features::CustomerSnapshotFeature;
use retention_core::labels::{ChurnLabel, LabeledFeature};
use retention_core::scoring::{
    add_action_flags, choose_cutoff, dynamic_threshold, score_snapshots, RiskBucket, ScoredRecord,
};
use retention_core::segmentation::Segment;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn feature(customer: &str, snap: NaiveDate, recency: i64, revenue: f64) -> CustomerSnapshotFeature {
    CustomerSnapshotFeature {
        customer_id:    customer.into(),
        snapshot_date:  snap,
        first_purchase: d(2022, 1, 1),
        last_purchase:  snap,
        tenure_days:    300,
        recency_days:   recency,
        total_orders:   4,
        total_revenue:  revenue,
        total_items:    10.0,
        unique_skus:    3,
        avg_basket_value:           Some(revenue / 4.0),
        avg_items_per_order:        Some(2.5),
        avg_unique_skus:            Some(2.0),
        avg_days_between_orders:    Some(30.0),
        median_days_between_orders: Some(28.0),
        revenue_last_30d: if recency < 30 { revenue / 4.0 } else { 0.0 },
        orders_last_30d:  if recency < 30 { 1 } else { 0 },
        revenue_last_90d: if recency < 90 { revenue / 2.0 } else { 0.0 },
        orders_last_90d:  if recency < 90 { 2 } else { 0 },
    }
}

fn scored(customer: &str, snap: NaiveDate, p: f64, revenue: f64) -> ScoredRecord {
    ScoredRecord {
        customer_id:       customer.into(),
        snapshot_date:     snap,
        churn_label:       ChurnLabel::Retained,
        churn_probability: p,
        risk_bucket:       RiskBucket::from_probability(p),
        total_revenue:     revenue,
        total_orders:      4,
        recency_days:      10,
        tenure_days:       300,
        segment:           None,
        rfm_score:         None,
        dynamic_threshold: 0.5,
        churn_flag:        false,
        expected_loss:     p * revenue.max(0.0),
        action_flag_top15: false,
    }
}

/// Derived cutoff is the earliest snapshot of the last 3 distinct months.
#[test]
fn cutoff_from_last_three_months() {
    let dates = vec![
        d(2023, 1, 31),
        d(2023, 2, 28),
        d(2023, 3, 31),
        d(2023, 4, 30),
        d(2023, 5, 31),
    ];
    assert_eq!(choose_cutoff(&dates, None), d(2023, 3, 31));
}

/// With 3 or fewer distinct months only the last month becomes test.
#[test]
fn cutoff_short_history_uses_last_month() {
    let dates = vec![d(2023, 1, 31), d(2023, 2, 28), d(2023, 3, 31)];
    assert_eq!(choose_cutoff(&dates, None), d(2023, 3, 31));
}

/// An explicit cutoff always wins.
#[test]
fn explicit_cutoff_wins() {
    let dates = vec![d(2023, 1, 31), d(2023, 5, 31)];
    assert_eq!(choose_cutoff(&dates, Some(d(2023, 2, 15))), d(2023, 2, 15));
}

/// Risk bucket boundaries are inclusive at 0.50 and 0.80.
#[test]
fn risk_bucket_boundaries() {
    assert_eq!(RiskBucket::from_probability(0.80), RiskBucket::High);
    assert_eq!(RiskBucket::from_probability(0.79), RiskBucket::Medium);
    assert_eq!(RiskBucket::from_probability(0.50), RiskBucket::Medium);
    assert_eq!(RiskBucket::from_probability(0.49), RiskBucket::Low);
}

/// Value tier dominates the dynamic threshold; segment is the fallback.
#[test]
fn dynamic_threshold_tier_and_segment() {
    assert_eq!(dynamic_threshold(Some(ValueTier::High), None), 0.30);
    assert_eq!(dynamic_threshold(Some(ValueTier::Mid), None), 0.50);
    assert_eq!(dynamic_threshold(Some(ValueTier::Low), None), 0.70);
    assert_eq!(
        dynamic_threshold(Some(ValueTier::Unknown), Some(Segment::Champions)),
        0.30
    );
    assert_eq!(dynamic_threshold(None, Some(Segment::Loyal)), 0.30);
    assert_eq!(dynamic_threshold(None, Some(Segment::Promising)), 0.50);
    assert_eq!(dynamic_threshold(None, Some(Segment::AtRisk)), 0.70);
    assert_eq!(dynamic_threshold(None, None), 0.50);
}

/// Per snapshot, exactly ceil(N * pct) rows are flagged, ranked by expected
/// loss when revenue exists.
#[test]
fn action_flags_top_share_per_snapshot() {
    let snap = d(2023, 5, 31);
    let mut records: Vec<ScoredRecord> = (0..10)
        .map(|i| scored(&format!("c{i}"), snap, 0.1 * i as f64, 100.0))
        .collect();
    add_action_flags(&mut records, 0.15);

    let flagged: Vec<&str> = records
        .iter()
        .filter(|r| r.action_flag_top15)
        .map(|r| r.customer_id.as_str())
        .collect();
    // ceil(10 * 0.15) = 2, highest expected loss first
    assert_eq!(flagged, vec!["c8", "c9"]);
}

/// Tiny snapshots still flag at least one row.
#[test]
fn action_flags_minimum_one() {
    let snap = d(2023, 5, 31);
    let mut records: Vec<ScoredRecord> = (0..3)
        .map(|i| scored(&format!("c{i}"), snap, 0.2 * i as f64, 0.0))
        .collect();
    add_action_flags(&mut records, 0.15);
    assert_eq!(records.iter().filter(|r| r.action_flag_top15).count(), 1);
    // revenue-free table ranks by raw probability
    assert!(records.iter().find(|r| r.customer_id == "c2").unwrap().action_flag_top15);
}

/// Flags are computed within each snapshot independently.
#[test]
fn action_flags_group_by_snapshot() {
    let mut records = Vec::new();
    for snap in [d(2023, 4, 30), d(2023, 5, 31)] {
        for i in 0..4 {
            records.push(scored(&format!("c{i}"), snap, 0.2 * i as f64, 50.0));
        }
    }
    add_action_flags(&mut records, 0.15);
    for snap in [d(2023, 4, 30), d(2023, 5, 31)] {
        let flagged = records
            .iter()
            .filter(|r| r.snapshot_date == snap && r.action_flag_top15)
            .count();
        assert_eq!(flagged, 1);
    }
}

fn synthetic_rows() -> Vec<LabeledFeature> {
    // Five snapshot months, eight customers each. Low-recency customers are
    // retained, high-recency ones churn — a cleanly learnable signal.
    let snaps = [
        d(2023, 1, 31),
        d(2023, 2, 28),
        d(2023, 3, 31),
        d(2023, 4, 30),
        d(2023, 5, 31),
    ];
    let mut rows = Vec::new();
    for snap in snaps {
        for i in 0..8 {
            let churner = i >= 4;
            let recency = if churner { 150 + i as i64 * 10 } else { 5 + i as i64 };
            let label = if churner {
                ChurnLabel::Churned
            } else {
                ChurnLabel::Retained
            };
            rows.push(LabeledFeature {
                feature: feature(&format!("c{i}"), snap, recency, 100.0 + i as f64 * 50.0),
                label,
            });
        }
    }
    rows
}

/// Full fit/select/score path: every row scored, report consistent, flags
/// applied per snapshot.
#[test]
fn score_snapshots_end_to_end() {
    let rows = synthetic_rows();
    let config = PipelineConfig::default_test();
    let (records, report) = score_snapshots(&rows, &[], &config).unwrap();

    assert_eq!(records.len(), 40);
    assert_eq!(report.total_rows, 40);
    assert_eq!(report.labeled_rows, 40);
    // Last 3 of 5 months are test: cutoff at March 31.
    assert_eq!(report.cutoff, d(2023, 3, 31));
    assert_eq!(report.train_rows, 16);
    assert_eq!(report.test_rows, 24);

    for r in &records {
        assert!((0.0..=1.0).contains(&r.churn_probability));
        assert!(r.expected_loss >= 0.0);
        assert_eq!(r.dynamic_threshold, 0.50); // no segment join supplied
    }
    // ceil(8 * 0.15) = 2 flags per snapshot
    for snap in [d(2023, 1, 31), d(2023, 5, 31)] {
        let flagged = records
            .iter()
            .filter(|r| r.snapshot_date == snap && r.action_flag_top15)
            .count();
        assert_eq!(flagged, 2);
    }
}

/// Too few labeled rows is a hard data-sufficiency error.
#[test]
fn too_few_labeled_rows_errors() {
    let rows: Vec<LabeledFeature> = synthetic_rows().into_iter().take(5).collect();
    let config = PipelineConfig::default_test();
    match score_snapshots(&rows, &[], &config) {
        Err(PipelineError::DataSufficiency(_)) => {}
        other => panic!("expected DataSufficiency, got {other:?}"),
    }
}

/// A single-class test window triggers the last-month fallback; when even
/// that is single-class the run fails instead of reporting junk metrics.
#[test]
fn single_class_everywhere_errors() {
    let rows: Vec<LabeledFeature> = synthetic_rows()
        .into_iter()
        .map(|mut r| {
            r.label = ChurnLabel::Churned;
            r
        })
        .collect();
    let config = PipelineConfig::default_test();
    match score_snapshots(&rows, &[], &config) {
        Err(PipelineError::DataSufficiency(_)) => {}
        other => panic!("expected DataSufficiency, got {other:?}"),
    }
}

/// Censored rows are excluded from fitting but still scored.
#[test]
fn censored_rows_scored_but_not_trained() {
    let mut rows = synthetic_rows();
    // Censor an extra trailing month.
    for i in 0..8 {
        rows.push(LabeledFeature {
            feature: feature(&format!("c{i}"), d(2023, 6, 30), 10 + i as i64, 200.0),
            label:   ChurnLabel::Unobservable,
        });
    }
    let config = PipelineConfig::default_test();
    let (records, report) = score_snapshots(&rows, &[], &config).unwrap();

    assert_eq!(report.labeled_rows, 40);
    assert_eq!(report.unlabeled_rows, 8);
    assert_eq!(records.len(), 48);
    let june: Vec<_> = records
        .iter()
        .filter(|r| r.snapshot_date == d(2023, 6, 30))
        .collect();
    assert_eq!(june.len(), 8);
    for r in june {
        assert_eq!(r.churn_label, ChurnLabel::Unobservable);
        assert!((0.0..=1.0).contains(&r.churn_probability));
    }
}
