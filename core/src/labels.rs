//! Censored label engine — forward-looking churn outcomes.
//!
//! For snapshot S the outcome window is (S, S + window_days]. A customer is
//! Retained when the window holds at least one of their events, Churned
//! otherwise — UNLESS the window reaches past the global observation
//! horizon, in which case every customer at S is Unobservable. A snapshot
//! too recent to judge must never be silently treated as non-churn.

use crate::{
    error::{PipelineError, PipelineResult},
    event::EventLog,
    features::CustomerSnapshotFeature,
    types::CustomerId,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnLabel {
    Retained,
    Churned,
    /// Right-censored: the outcome window exceeds known history.
    Unobservable,
}

impl ChurnLabel {
    /// 0/1 for observable outcomes, None for censored rows.
    pub fn as_flag(self) -> Option<u8> {
        match self {
            ChurnLabel::Retained => Some(0),
            ChurnLabel::Churned => Some(1),
            ChurnLabel::Unobservable => None,
        }
    }

    pub fn from_flag(flag: Option<u8>) -> Self {
        match flag {
            Some(0) => ChurnLabel::Retained,
            Some(_) => ChurnLabel::Churned,
            None => ChurnLabel::Unobservable,
        }
    }
}

/// Label keyed by (customer_id, snapshot_date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub customer_id:   CustomerId,
    pub snapshot_date: NaiveDate,
    pub label:         ChurnLabel,
}

/// Feature row joined with its outcome — the scorer's input unit.
#[derive(Debug, Clone)]
pub struct LabeledFeature {
    pub feature: CustomerSnapshotFeature,
    pub label:   ChurnLabel,
}

/// Attach a churn label to every feature row. Labels cover exactly the
/// customers present in the feature table — a customer must have qualifying
/// activity to be scored.
///
/// With `require_lifetime_orders`, rows whose lifetime order count is zero
/// are dropped before labeling.
pub fn label_features(
    log: &EventLog,
    features: &[CustomerSnapshotFeature],
    window_days: i64,
    require_lifetime_orders: bool,
) -> PipelineResult<Vec<LabeledFeature>> {
    let horizon = log.max_date().ok_or_else(|| {
        PipelineError::DataSufficiency("no valid event dates in transaction log".into())
    })?;

    // Buyer sets are shared by every customer at the same snapshot.
    let mut buyers_cache: BTreeMap<NaiveDate, Option<Vec<String>>> = BTreeMap::new();

    let mut out = Vec::with_capacity(features.len());
    let mut censored_snapshots = 0usize;

    for feat in features {
        if require_lifetime_orders && feat.total_orders == 0 {
            continue;
        }

        let snap = feat.snapshot_date;
        let buyers = buyers_cache.entry(snap).or_insert_with(|| {
            let window_end = snap + Duration::days(window_days);
            if window_end > horizon {
                censored_snapshots += 1;
                None
            } else {
                Some(
                    log.buyers_between(snap + Duration::days(1), window_end)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                )
            }
        });

        let label = match buyers {
            None => ChurnLabel::Unobservable,
            Some(set) => {
                if set.binary_search(&feat.customer_id).is_ok() {
                    ChurnLabel::Retained
                } else {
                    ChurnLabel::Churned
                }
            }
        };

        out.push(LabeledFeature {
            feature: feat.clone(),
            label,
        });
    }

    if censored_snapshots > 0 {
        log::info!(
            "labels: {censored_snapshots} snapshot(s) right-censored (window {window_days}d past horizon {horizon})"
        );
    }

    Ok(out)
}
