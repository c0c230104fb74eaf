//! RFM segmentation engine — quantile scores and the 9-segment cascade.
//!
//! Per month-end snapshot, each customer gets Recency/Frequency/Monetary
//! raw metrics from events at or before the snapshot, a 1..5 quantile score
//! per metric, and a named behavioral segment.
//!
//! RULE: segment assignment is an ORDERED first-match-wins cascade. Later
//! rules assume earlier ones failed; the table order is part of the contract
//! and must never be rearranged.

use crate::{
    calendar::{month_ends_between, year_month},
    event::EventLog,
    types::CustomerId,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Segments ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Champions,
    Loyal,
    NewCustomers,
    PotentialLoyalist,
    Promising,
    NeedsAttention,
    AboutToSleep,
    AtRisk,
    Lost,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Segment::Champions => "Champions",
            Segment::Loyal => "Loyal",
            Segment::NewCustomers => "New Customers",
            Segment::PotentialLoyalist => "Potential Loyalist",
            Segment::Promising => "Promising",
            Segment::NeedsAttention => "Needs Attention",
            Segment::AboutToSleep => "About To Sleep",
            Segment::AtRisk => "At Risk",
            Segment::Lost => "Lost",
        })
    }
}

impl Segment {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "Champions" => Segment::Champions,
            "Loyal" => Segment::Loyal,
            "New Customers" => Segment::NewCustomers,
            "Potential Loyalist" => Segment::PotentialLoyalist,
            "Promising" => Segment::Promising,
            "Needs Attention" => Segment::NeedsAttention,
            "About To Sleep" => Segment::AboutToSleep,
            "At Risk" => Segment::AtRisk,
            "Lost" => Segment::Lost,
            _ => return None,
        })
    }

    /// Segments whose customers warrant the lenient 0.30 decision threshold.
    pub fn is_high_loyalty(self) -> bool {
        matches!(self, Segment::Champions | Segment::Loyal)
    }
}

type SegmentRule = fn(u8, u8, u8) -> bool;

fn champions(r: u8, f: u8, m: u8) -> bool {
    r >= 4 && f >= 4 && m >= 4
}
fn loyal(r: u8, f: u8, _m: u8) -> bool {
    r >= 4 && f >= 4
}
fn new_customers(r: u8, f: u8, _m: u8) -> bool {
    r >= 4 && f == 1
}
fn potential_loyalist(r: u8, f: u8, _m: u8) -> bool {
    r >= 4 && (f == 2 || f == 3)
}
fn promising(r: u8, f: u8, _m: u8) -> bool {
    r == 3 && f <= 2
}
fn needs_attention(r: u8, f: u8, m: u8) -> bool {
    r == 3 && (f >= 3 || m >= 4)
}
fn about_to_sleep(r: u8, f: u8, m: u8) -> bool {
    r == 2 && f <= 2 && m <= 3
}
fn at_risk(r: u8, f: u8, m: u8) -> bool {
    r <= 2 && (m >= 4 || f >= 3)
}
fn lost(_r: u8, _f: u8, _m: u8) -> bool {
    true
}

/// The cascade. First matching rule wins; `Lost` is the unconditional tail.
static SEGMENT_RULES: [(SegmentRule, Segment); 9] = [
    (champions, Segment::Champions),
    (loyal, Segment::Loyal),
    (new_customers, Segment::NewCustomers),
    (potential_loyalist, Segment::PotentialLoyalist),
    (promising, Segment::Promising),
    (needs_attention, Segment::NeedsAttention),
    (about_to_sleep, Segment::AboutToSleep),
    (at_risk, Segment::AtRisk),
    (lost, Segment::Lost),
];

/// Pure function of the three 1..5 scores.
pub fn segment_from_scores(r: u8, f: u8, m: u8) -> Segment {
    for (rule, segment) in &SEGMENT_RULES {
        if rule(r, f, m) {
            return *segment;
        }
    }
    unreachable!("cascade ends in an unconditional rule");
}

// ── Quantile scoring ─────────────────────────────────────────────────────────

/// Ascending ranks with stable first-occurrence tie-breaking (1-based).
/// Non-finite inputs are treated as zero before ranking.
fn rank_first(values: &[f64]) -> Vec<f64> {
    let cleaned: Vec<f64> = values
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();
    let mut idx: Vec<usize> = (0..cleaned.len()).collect();
    idx.sort_by(|&a, &b| {
        cleaned[a]
            .partial_cmp(&cleaned[b])
            .expect("cleaned values are finite")
            .then(a.cmp(&b))
    });
    let mut ranks = vec![0.0; cleaned.len()];
    for (rank0, &i) in idx.iter().enumerate() {
        ranks[i] = (rank0 + 1) as f64;
    }
    ranks
}

/// Linear-interpolation quantile of a sorted slice at fraction `q`.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Bin ranks into 5 equal-population quantile buckets labeled 1..5. When the
/// quantile edges collapse (degenerate distribution), fall back to
/// equal-width binning over the ranks instead of failing.
fn quantile_bins_5(ranks: &[f64]) -> Vec<u8> {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("ranks are finite"));

    let edges: Vec<f64> = (0..=5)
        .map(|i| quantile_sorted(&sorted, i as f64 / 5.0))
        .collect();
    let degenerate = edges.windows(2).any(|w| w[0] >= w[1]);

    if degenerate {
        // Equal-width cut over the rank range, lowest value included in bin 1.
        let min = sorted[0];
        let max = *sorted.last().expect("non-empty");
        let width = (max - min).max(f64::EPSILON) / 5.0;
        return ranks
            .iter()
            .map(|&x| {
                let bin = ((x - min) / width).ceil() as i64;
                bin.clamp(1, 5) as u8
            })
            .collect();
    }

    ranks
        .iter()
        .map(|&x| {
            // Interval (edges[i-1], edges[i]]; bin 1 includes the lowest edge.
            let mut bin = 1u8;
            for i in 1..=5 {
                if x <= edges[i] {
                    bin = i as u8;
                    break;
                }
            }
            bin
        })
        .collect()
}

/// Quantile score 1..5 for one metric, ascending. Callers flip recency
/// afterwards (`6 − bin`) so that more-recent customers score higher.
pub fn quantile_score(values: &[f64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    quantile_bins_5(&rank_first(values))
}

// ── Snapshot computation ─────────────────────────────────────────────────────

/// RFM row keyed by (customer_id, snapshot_date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmSnapshot {
    pub customer_id:   CustomerId,
    pub snapshot_date: NaiveDate,
    pub year_month:    String,
    pub recency_days:  i64,
    pub frequency:     i64,
    pub monetary:      f64,
    pub r_score:       u8,
    pub f_score:       u8,
    pub m_score:       u8,
    pub rfm_score:     u8,
    pub segment:       Segment,
}

#[derive(Debug)]
struct RawRfm {
    last_purchase: NaiveDate,
    invoices:      std::collections::BTreeSet<String>,
    monetary:      f64,
}

/// Compute one snapshot's RFM rows, sorted by customer id. The recency
/// reference date is snapshot + 1 day, clamped at zero.
pub fn segment_snapshot(log: &EventLog, snapshot_date: NaiveDate) -> Vec<RfmSnapshot> {
    let hist = log.through(snapshot_date);
    if hist.is_empty() {
        return Vec::new();
    }
    let ref_date = snapshot_date + Duration::days(1);

    let mut raw: BTreeMap<&str, RawRfm> = BTreeMap::new();
    for e in hist {
        let agg = raw.entry(e.customer_id.as_str()).or_insert_with(|| RawRfm {
            last_purchase: e.date,
            invoices:      Default::default(),
            monetary:      0.0,
        });
        agg.last_purchase = agg.last_purchase.max(e.date);
        agg.invoices.insert(e.invoice_id.clone());
        agg.monetary += e.total_price;
    }

    let customers: Vec<&str> = raw.keys().copied().collect();
    let recency: Vec<f64> = customers
        .iter()
        .map(|c| ((ref_date - raw[c].last_purchase).num_days().max(0)) as f64)
        .collect();
    let frequency: Vec<f64> = customers
        .iter()
        .map(|c| raw[c].invoices.len() as f64)
        .collect();
    let monetary: Vec<f64> = customers.iter().map(|c| raw[c].monetary).collect();

    let r_bins = quantile_score(&recency);
    let f_bins = quantile_score(&frequency);
    let m_bins = quantile_score(&monetary);

    customers
        .iter()
        .enumerate()
        .map(|(i, customer)| {
            let r = 6 - r_bins[i]; // recent customers score high
            let f = f_bins[i];
            let m = m_bins[i];
            RfmSnapshot {
                customer_id: customer.to_string(),
                snapshot_date,
                year_month: year_month(snapshot_date),
                recency_days: recency[i] as i64,
                frequency: frequency[i] as i64,
                monetary: monetary[i],
                r_score: r,
                f_score: f,
                m_score: m,
                rfm_score: r + f + m,
                segment: segment_from_scores(r, f, m),
            }
        })
        .collect()
}

/// One RFM snapshot per month-end across the observed span, concatenated.
pub fn segment_monthly(
    log: &EventLog,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<RfmSnapshot> {
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
    for me in month_ends_between(first, last) {
        let rows = segment_snapshot(log, me);
        log::debug!("segments: snapshot={me} rows={}", rows.len());
        out.extend(rows);
    }
    out
}
