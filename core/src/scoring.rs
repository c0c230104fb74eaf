//! Temporal split & risk scorer.
//!
//! Takes labeled + unlabeled feature rows, performs the time-based
//! train/test split, fits the candidate classifiers, selects the best by
//! held-out ranking quality, then scores EVERY row (censored ones included)
//! and derives the decision columns: risk bucket, dynamic threshold, churn
//! flag, expected loss, and the per-snapshot top-percent action flag.
//!
//! RULE: the split is by snapshot date, never random — rows at or after the
//! cutoff are test, everything earlier is train.

use crate::{
    calendar::year_month,
    campaign::ValueTier,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    features::FEATURE_NAMES,
    labels::{ChurnLabel, LabeledFeature},
    model::{average_precision, roc_auc, ChurnClassifier, GradientBoostedStumps, LogisticRegressionModel},
    segmentation::{RfmSnapshot, Segment},
    types::CustomerId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Output types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "Low" => RiskBucket::Low,
            "Medium" => RiskBucket::Medium,
            "High" => RiskBucket::High,
            _ => return None,
        })
    }

    pub fn from_probability(p: f64) -> Self {
        if p >= 0.80 {
            RiskBucket::High
        } else if p >= 0.50 {
            RiskBucket::Medium
        } else {
            RiskBucket::Low
        }
    }
}

impl fmt::Display for RiskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskBucket::Low => "Low",
            RiskBucket::Medium => "Medium",
            RiskBucket::High => "High",
        })
    }
}

/// Scored decision row keyed by (customer_id, snapshot_date). Carries the
/// BI passthrough columns so downstream consumers never re-join features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub customer_id:   CustomerId,
    pub snapshot_date: NaiveDate,
    pub churn_label:   ChurnLabel,
    pub churn_probability: f64,
    pub risk_bucket:   RiskBucket,

    // BI passthrough
    pub total_revenue: f64,
    pub total_orders:  i64,
    pub recency_days:  i64,
    pub tenure_days:   i64,

    // Optional segment join
    pub segment:   Option<Segment>,
    pub rfm_score: Option<u8>,

    // Decisioning
    pub dynamic_threshold: f64,
    pub churn_flag:        bool,
    pub expected_loss:     f64,
    pub action_flag_top15: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub name:    String,
    pub roc_auc: f64,
    pub pr_auc:  f64,
}

/// Human-readable companion artifact for a scoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub cutoff:           NaiveDate,
    pub train_rows:       usize,
    pub test_rows:        usize,
    pub churn_rate_train: f64,
    pub churn_rate_test:  f64,
    pub candidates:       Vec<CandidateMetrics>,
    pub selected:         String,
    pub feature_names:    Vec<String>,
    pub total_rows:       usize,
    pub labeled_rows:     usize,
    pub unlabeled_rows:   usize,
}

impl ModelReport {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Cutoff date (test starts): {}", self.cutoff),
            format!(
                "Train rows (labeled): {} | Test rows (labeled): {}",
                self.train_rows, self.test_rows
            ),
            format!(
                "Churn rate train: {:.4} | test: {:.4}",
                self.churn_rate_train, self.churn_rate_test
            ),
        ];
        for c in &self.candidates {
            lines.push(format!(
                "{} ROC-AUC: {:.4} | PR-AUC: {:.4}",
                c.name, c.roc_auc, c.pr_auc
            ));
        }
        lines.push(format!("Selected model: {}", self.selected));
        lines.push(format!(
            "Features ({}): {:?}",
            self.feature_names.len(),
            self.feature_names
        ));
        lines.push(format!(
            "Total rows scored (incl. unlabeled): {}",
            self.total_rows
        ));
        lines.push(format!(
            "Rows labeled for training/eval: {} | Unlabeled (unobservable): {}",
            self.labeled_rows, self.unlabeled_rows
        ));
        lines.join("\n")
    }
}

// ── Cutoff selection ─────────────────────────────────────────────────────────

/// Earliest snapshot date among the last `month_count` distinct calendar
/// months present in `dates`. When fewer distinct months exist, the last
/// month alone is used.
fn cutoff_from_last_months(dates: &[NaiveDate], month_count: usize) -> NaiveDate {
    let months: Vec<String> = {
        let mut set: Vec<String> = dates.iter().map(|d| year_month(*d)).collect();
        set.sort();
        set.dedup();
        set
    };
    let take = if months.len() <= month_count {
        1
    } else {
        month_count
    };
    let tail = &months[months.len() - take..];

    dates
        .iter()
        .filter(|d| tail.binary_search(&year_month(**d)).is_ok())
        .min()
        .copied()
        .expect("dates is non-empty")
}

/// Explicit cutoff when configured, otherwise the start of the last-3-months
/// test window.
pub fn choose_cutoff(
    labeled_dates: &[NaiveDate],
    explicit: Option<NaiveDate>,
) -> NaiveDate {
    match explicit {
        Some(c) => c,
        None => cutoff_from_last_months(labeled_dates, 3),
    }
}

// ── Dynamic threshold ────────────────────────────────────────────────────────

/// Per-row decision threshold, derived from value tier / segment rather than
/// the probability itself (avoids circularity). High-loyalty customers get
/// the lenient 0.30 threshold, cold segments the strict 0.70.
pub fn dynamic_threshold(tier: Option<ValueTier>, segment: Option<Segment>) -> f64 {
    match tier {
        Some(ValueTier::High) => return 0.30,
        Some(ValueTier::Mid) => return 0.50,
        Some(ValueTier::Low) => return 0.70,
        Some(ValueTier::Unknown) | None => {}
    }
    match segment {
        Some(Segment::Champions) | Some(Segment::Loyal) => 0.30,
        Some(Segment::PotentialLoyalist)
        | Some(Segment::Promising)
        | Some(Segment::NewCustomers)
        | Some(Segment::NeedsAttention) => 0.50,
        Some(Segment::AtRisk) | Some(Segment::Lost) | Some(Segment::AboutToSleep) => 0.70,
        None => 0.50,
    }
}

// ── Action flag ──────────────────────────────────────────────────────────────

/// Flag the top `ceil(N · pct)` rows (minimum 1) of each snapshot, ranked
/// descending by expected loss with stable first-occurrence tie-breaking.
///
/// The ranking metric is chosen once for the whole table: expected loss when
/// any row carries revenue, raw probability otherwise — mixing the two
/// within one table would make rankings incomparable.
pub fn add_action_flags(records: &mut [ScoredRecord], top_pct: f64) {
    let use_expected_loss = records.iter().any(|r| r.total_revenue > 0.0);

    let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        groups.entry(r.snapshot_date).or_default().push(i);
    }

    for indices in groups.values() {
        let metric = |i: usize| -> f64 {
            if use_expected_loss {
                records[i].expected_loss
            } else {
                records[i].churn_probability
            }
        };
        let mut ranked: Vec<usize> = indices.clone();
        ranked.sort_by(|&a, &b| {
            metric(b)
                .partial_cmp(&metric(a))
                .expect("ranking metric is finite")
                .then(a.cmp(&b)) // stable first-occurrence tie-break
        });

        let n = ranked.len();
        let flag_count = ((n as f64 * top_pct).ceil() as usize).max(1);
        for (pos, &i) in ranked.iter().enumerate() {
            records[i].action_flag_top15 = pos < flag_count;
        }
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Fit, evaluate, select, and score. `rows` holds every (customer, snapshot)
/// feature row with its label (censored rows included); `segments` is the
/// optional RFM join.
pub fn score_snapshots(
    rows: &[LabeledFeature],
    segments: &[RfmSnapshot],
    config: &PipelineConfig,
) -> PipelineResult<(Vec<ScoredRecord>, ModelReport)> {
    // Snapshot-date sort first: index alignment below depends on it.
    let mut ordered: Vec<&LabeledFeature> = rows.iter().collect();
    ordered.sort_by(|a, b| {
        (a.feature.snapshot_date, &a.feature.customer_id)
            .cmp(&(b.feature.snapshot_date, &b.feature.customer_id))
    });

    let x_all: Vec<Vec<f64>> = ordered.iter().map(|r| r.feature.model_vector()).collect();

    let labeled_idx: Vec<usize> = ordered
        .iter()
        .enumerate()
        .filter(|(_, r)| r.label != ChurnLabel::Unobservable)
        .map(|(i, _)| i)
        .collect();

    if labeled_idx.len() < config.min_labeled_rows {
        return Err(PipelineError::DataSufficiency(format!(
            "only {} labeled rows after right-censoring (minimum {})",
            labeled_idx.len(),
            config.min_labeled_rows
        )));
    }

    let labeled_dates: Vec<NaiveDate> = labeled_idx
        .iter()
        .map(|&i| ordered[i].feature.snapshot_date)
        .collect();
    let y: Vec<u8> = labeled_idx
        .iter()
        .map(|&i| match ordered[i].label {
            ChurnLabel::Churned => 1,
            _ => 0,
        })
        .collect();

    // Time-based split with the single-class fallback reselection.
    let mut cutoff = choose_cutoff(&labeled_dates, config.parsed_cutoff()?);
    let single_class = |test_y: &[u8]| -> bool {
        test_y.windows(2).all(|w| w[0] == w[1])
    };
    let split = |cut: NaiveDate| -> (Vec<usize>, Vec<usize>) {
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (pos, &date) in labeled_dates.iter().enumerate() {
            if date < cut {
                train.push(pos);
            } else {
                test.push(pos);
            }
        }
        (train, test)
    };

    let (mut train_pos, mut test_pos) = split(cutoff);
    let test_y: Vec<u8> = test_pos.iter().map(|&p| y[p]).collect();
    if test_pos.is_empty() || single_class(&test_y) {
        cutoff = cutoff_from_last_months(&labeled_dates, 1);
        let (t, s) = split(cutoff);
        train_pos = t;
        test_pos = s;
        let retry_y: Vec<u8> = test_pos.iter().map(|&p| y[p]).collect();
        if test_pos.is_empty() || single_class(&retry_y) {
            return Err(PipelineError::DataSufficiency(
                "test split holds a single class even after last-month fallback".into(),
            ));
        }
    }
    if train_pos.is_empty() {
        return Err(PipelineError::DataSufficiency(
            "train split is empty — cutoff precedes all labeled snapshots".into(),
        ));
    }

    let x_train: Vec<Vec<f64>> = train_pos
        .iter()
        .map(|&p| x_all[labeled_idx[p]].clone())
        .collect();
    let y_train: Vec<u8> = train_pos.iter().map(|&p| y[p]).collect();
    let x_test: Vec<Vec<f64>> = test_pos
        .iter()
        .map(|&p| x_all[labeled_idx[p]].clone())
        .collect();
    let y_test: Vec<u8> = test_pos.iter().map(|&p| y[p]).collect();

    // Candidate models. The boosted model is a soft dependency: fit failure
    // degrades to logistic regression instead of failing the run.
    let mut lr = LogisticRegressionModel::default();
    lr.fit(&x_train, &y_train)?;

    let mut candidates: Vec<(Box<dyn ChurnClassifier>, CandidateMetrics)> = Vec::new();
    let evaluate = |model: &dyn ChurnClassifier| -> CandidateMetrics {
        let proba = model.predict_proba(&x_test);
        CandidateMetrics {
            name: model.name().to_string(),
            roc_auc: roc_auc(&y_test, &proba).unwrap_or(0.5),
            pr_auc: average_precision(&y_test, &proba).unwrap_or(0.0),
        }
    };
    let lr_metrics = evaluate(&lr);
    candidates.push((Box::new(lr), lr_metrics));

    if config.enable_boosted_model {
        let mut boosted = GradientBoostedStumps::new(config.seed);
        match boosted.fit(&x_train, &y_train) {
            Ok(()) => {
                let metrics = evaluate(&boosted);
                candidates.push((Box::new(boosted), metrics));
            }
            Err(e) => {
                log::warn!("scoring: boosted model unavailable ({e}); using logistic regression");
            }
        }
    }

    // Selection: highest ROC-AUC; a later candidate replaces the incumbent
    // on a near-tie only when its PR-AUC is at least as good.
    let mut selected = 0usize;
    for i in 1..candidates.len() {
        let (inc, cand) = (&candidates[selected].1, &candidates[i].1);
        let auc_gap = cand.roc_auc - inc.roc_auc;
        if auc_gap > 1e-9 || (auc_gap.abs() <= 1e-9 && cand.pr_auc >= inc.pr_auc) {
            selected = i;
        }
    }
    let (model, _) = &candidates[selected];
    log::info!(
        "scoring: selected {} (cutoff {cutoff}, train {}, test {})",
        model.name(),
        train_pos.len(),
        test_pos.len()
    );

    let report = ModelReport {
        cutoff,
        train_rows: train_pos.len(),
        test_rows: test_pos.len(),
        churn_rate_train: mean_label(&y_train),
        churn_rate_test: mean_label(&y_test),
        candidates: candidates.iter().map(|(_, m)| m.clone()).collect(),
        selected: model.name().to_string(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        total_rows: ordered.len(),
        labeled_rows: labeled_idx.len(),
        unlabeled_rows: ordered.len() - labeled_idx.len(),
    };

    // Score ALL rows, join segments, derive decision columns.
    let proba_all = model.predict_proba(&x_all);
    let segment_join: BTreeMap<(&str, NaiveDate), &RfmSnapshot> = segments
        .iter()
        .map(|s| ((s.customer_id.as_str(), s.snapshot_date), s))
        .collect();

    let mut records: Vec<ScoredRecord> = ordered
        .iter()
        .zip(&proba_all)
        .map(|(row, &p)| {
            let feat = &row.feature;
            let joined =
                segment_join.get(&(feat.customer_id.as_str(), feat.snapshot_date));
            let segment = joined.map(|s| s.segment);
            let threshold = dynamic_threshold(None, segment);
            ScoredRecord {
                customer_id: feat.customer_id.clone(),
                snapshot_date: feat.snapshot_date,
                churn_label: row.label,
                churn_probability: p,
                risk_bucket: RiskBucket::from_probability(p),
                total_revenue: feat.total_revenue,
                total_orders: feat.total_orders,
                recency_days: feat.recency_days,
                tenure_days: feat.tenure_days,
                segment,
                rfm_score: joined.map(|s| s.rfm_score),
                dynamic_threshold: threshold,
                churn_flag: p >= threshold,
                expected_loss: p * feat.total_revenue.max(0.0),
                action_flag_top15: false,
            }
        })
        .collect();

    add_action_flags(&mut records, config.top_pct);

    Ok((records, report))
}

fn mean_label(y: &[u8]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    y.iter().map(|&v| v as f64).sum::<f64>() / y.len() as f64
}
