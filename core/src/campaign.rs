//! Campaign decision engine — from risk score to concrete outreach.
//!
//! Maps each scored customer's value tier, segment, recency, order count,
//! churn flag, and probability to a priority bucket, an action/offer/message
//! triple, and a budget suggestion.
//!
//! RULE: the priority and action cascades are ORDERED first-match-wins
//! tables. Order is part of the contract — later rules assume earlier ones
//! failed — and must stay auditable in one place, never as nested
//! conditionals scattered through the code.

use crate::{
    config::{BudgetBand, BudgetConfig, PipelineConfig},
    labels::ChurnLabel,
    scoring::{RiskBucket, ScoredRecord},
    segmentation::Segment,
    types::CustomerId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Value tier ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueTier {
    High,
    Mid,
    Low,
    Unknown,
}

impl fmt::Display for ValueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueTier::High => "High Value",
            ValueTier::Mid => "Mid Value",
            ValueTier::Low => "Low Value",
            ValueTier::Unknown => "Unknown",
        })
    }
}

impl ValueTier {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "High Value" => ValueTier::High,
            "Mid Value" => ValueTier::Mid,
            "Low Value" => ValueTier::Low,
            "Unknown" => ValueTier::Unknown,
            _ => return None,
        })
    }
}

/// Linear-interpolation percentile of unsorted values.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("revenues are finite"));
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

/// Revenue terciles over the whole score table: ≥66th percentile is High,
/// ≥33rd is Mid, below is Low. Non-finite revenue maps to Unknown.
pub fn compute_value_tiers(scores: &[ScoredRecord]) -> Vec<ValueTier> {
    let revenues: Vec<f64> = scores
        .iter()
        .map(|s| if s.total_revenue.is_finite() { s.total_revenue } else { 0.0 })
        .collect();
    if revenues.is_empty() {
        return Vec::new();
    }
    let q1 = percentile(&revenues, 0.33);
    let q2 = percentile(&revenues, 0.66);

    scores
        .iter()
        .map(|s| {
            let v = s.total_revenue;
            if !v.is_finite() {
                ValueTier::Unknown
            } else if v >= q2 {
                ValueTier::High
            } else if v >= q1 {
                ValueTier::Mid
            } else {
                ValueTier::Low
            }
        })
        .collect()
}

// ── Priority cascade ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        })
    }
}

impl Priority {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "P1" => Priority::P1,
            "P2" => Priority::P2,
            "P3" => Priority::P3,
            "P4" => Priority::P4,
            _ => return None,
        })
    }

    fn budget_factor(self) -> f64 {
        match self {
            Priority::P1 => 1.5,
            Priority::P2 => 1.2,
            Priority::P3 => 1.0,
            Priority::P4 => 0.6,
        }
    }
}

/// Everything the decision tables look at for one row.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs {
    pub churn_flag:   bool,
    pub probability:  f64,
    pub tier:         ValueTier,
    pub segment:      Option<Segment>,
    pub recency_days: i64,
    pub total_orders: i64,
}

impl DecisionInputs {
    fn high_value(&self) -> bool {
        self.tier == ValueTier::High
            || self.segment.map(Segment::is_high_loyalty).unwrap_or(false)
    }

    fn very_inactive(&self) -> bool {
        self.recency_days >= 180
    }

    fn new_or_one_timer(&self) -> bool {
        self.total_orders <= 1
    }
}

type DecisionRule = fn(&DecisionInputs) -> bool;

fn churned_top_value(d: &DecisionInputs) -> bool {
    d.churn_flag && d.high_value()
}
fn churned_mid_tier(d: &DecisionInputs) -> bool {
    d.churn_flag && d.tier == ValueTier::Mid
}
fn churned(d: &DecisionInputs) -> bool {
    d.churn_flag
}
fn retained_high_prob_high_value(d: &DecisionInputs) -> bool {
    !d.churn_flag && d.probability >= 0.60 && d.high_value()
}
fn always(_d: &DecisionInputs) -> bool {
    true
}

static PRIORITY_RULES: [(DecisionRule, Priority); 5] = [
    (churned_top_value, Priority::P1),
    (churned_mid_tier, Priority::P2),
    (churned, Priority::P3),
    (retained_high_prob_high_value, Priority::P2),
    (always, Priority::P4),
];

pub fn compute_priority(inputs: &DecisionInputs) -> Priority {
    for (rule, priority) in &PRIORITY_RULES {
        if rule(inputs) {
            return *priority;
        }
    }
    unreachable!("cascade ends in an unconditional rule");
}

// ── Action / offer / message cascade ─────────────────────────────────────────

/// One row of the fixed outreach catalogue.
#[derive(Debug, Clone, Copy)]
pub struct OutreachPlay {
    pub action:        &'static str,
    pub offer_type:    &'static str,
    pub message_angle: &'static str,
}

fn churned_hv_inactive(d: &DecisionInputs) -> bool {
    d.churn_flag && d.high_value() && d.very_inactive()
}
fn churned_hv(d: &DecisionInputs) -> bool {
    d.churn_flag && d.high_value()
}
fn churned_inactive(d: &DecisionInputs) -> bool {
    d.churn_flag && d.very_inactive()
}
fn churned_one_timer(d: &DecisionInputs) -> bool {
    d.churn_flag && d.new_or_one_timer()
}
fn retained_warm(d: &DecisionInputs) -> bool {
    !d.churn_flag && d.probability >= 0.40
}

static ACTION_RULES: [(DecisionRule, OutreachPlay); 8] = [
    (churned_hv_inactive, OutreachPlay {
        action:        "Win-back (1:1 outreach)",
        offer_type:    "Personalized discount (10–15%)",
        message_angle: "We miss you + tailored picks",
    }),
    (churned_hv, OutreachPlay {
        action:        "Win-back (priority queue)",
        offer_type:    "Personalized voucher (10%)",
        message_angle: "Exclusive comeback: curated bestsellers",
    }),
    (churned_inactive, OutreachPlay {
        action:        "Reactivation campaign",
        offer_type:    "Free shipping / limited-time voucher",
        message_angle: "Limited-time comeback offer",
    }),
    (churned_one_timer, OutreachPlay {
        action:        "Second-purchase nudge",
        offer_type:    "Small voucher (5–10%)",
        message_angle: "Complete your set / popular add-ons",
    }),
    (churned, OutreachPlay {
        action:        "Re-engagement email",
        offer_type:    "Small voucher (5–10%)",
        message_angle: "New arrivals + reminder",
    }),
    (retained_high_prob_high_value, OutreachPlay {
        action:        "Proactive retention",
        offer_type:    "Perks / early access",
        message_angle: "VIP early access + tailored picks",
    }),
    (retained_warm, OutreachPlay {
        action:        "Cross-sell / upsell",
        offer_type:    "Bundle offer",
        message_angle: "Recommended bundles based on your history",
    }),
    (always, OutreachPlay {
        action:        "Growth nurture",
        offer_type:    "Content / recommendations",
        message_angle: "New arrivals + personalized recommendations",
    }),
];

pub fn choose_play(inputs: &DecisionInputs) -> OutreachPlay {
    for (rule, play) in &ACTION_RULES {
        if rule(inputs) {
            return *play;
        }
    }
    unreachable!("cascade ends in an unconditional rule");
}

// ── Budget ───────────────────────────────────────────────────────────────────

fn band_for(tier: ValueTier, cfg: &BudgetConfig) -> BudgetBand {
    match tier {
        ValueTier::High => cfg.high,
        ValueTier::Mid => cfg.mid,
        ValueTier::Low => cfg.low,
        ValueTier::Unknown => cfg.unknown,
    }
}

/// Recommended spend for one customer: a revenue-proportional base scaled by
/// priority and probability, clamped into the tier's band. Zero or negative
/// revenue returns the tier floor directly.
pub fn budget_suggestion(
    tier: ValueTier,
    revenue: f64,
    probability: f64,
    priority: Priority,
    cfg: &BudgetConfig,
) -> f64 {
    let band = band_for(tier, cfg);
    if revenue <= 0.0 {
        return band.floor;
    }

    let mut base = cfg.revenue_rate * revenue;
    base *= priority.budget_factor();
    base *= 0.8 + 0.4 * probability.clamp(0.0, 1.0);

    let clamped = base.clamp(band.floor, band.cap);
    (clamped * 100.0).round() / 100.0
}

// ── Record assembly ──────────────────────────────────────────────────────────

/// Final campaign row keyed by (customer_id, snapshot_date). Carries the
/// churn columns through so the action table is self-contained for BI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignActionRecord {
    pub customer_id:   CustomerId,
    pub snapshot_date: NaiveDate,

    pub churn_label:       ChurnLabel,
    pub churn_probability: f64,
    pub risk_bucket:       RiskBucket,
    pub dynamic_threshold: f64,
    pub churn_flag:        bool,
    pub expected_loss:     f64,
    pub action_flag_top15: bool,

    pub total_revenue: f64,
    pub total_orders:  i64,
    pub recency_days:  i64,
    pub tenure_days:   i64,
    pub segment:       Option<Segment>,
    pub rfm_score:     Option<u8>,

    pub value_tier:        ValueTier,
    pub priority:          Priority,
    pub action:            String,
    pub offer_type:        String,
    pub message_angle:     String,
    pub budget_suggestion: f64,
}

/// Decide an action for every scored row. Value tiers are computed from the
/// whole table's revenue terciles unless already carried on the input.
pub fn decide_actions(
    scores: &[ScoredRecord],
    config: &PipelineConfig,
) -> Vec<CampaignActionRecord> {
    let tiers = compute_value_tiers(scores);

    scores
        .iter()
        .zip(tiers)
        .map(|(s, tier)| {
            let inputs = DecisionInputs {
                churn_flag: s.churn_flag,
                probability: s.churn_probability,
                tier,
                segment: s.segment,
                recency_days: s.recency_days,
                total_orders: s.total_orders,
            };
            let priority = compute_priority(&inputs);
            let play = choose_play(&inputs);
            let budget = budget_suggestion(
                tier,
                s.total_revenue,
                s.churn_probability,
                priority,
                &config.budget,
            );

            CampaignActionRecord {
                customer_id: s.customer_id.clone(),
                snapshot_date: s.snapshot_date,
                churn_label: s.churn_label,
                churn_probability: s.churn_probability,
                risk_bucket: s.risk_bucket,
                dynamic_threshold: s.dynamic_threshold,
                churn_flag: s.churn_flag,
                expected_loss: s.expected_loss,
                action_flag_top15: s.action_flag_top15,
                total_revenue: s.total_revenue,
                total_orders: s.total_orders,
                recency_days: s.recency_days,
                tenure_days: s.tenure_days,
                segment: s.segment,
                rfm_score: s.rfm_score,
                value_tier: tier,
                priority,
                action: play.action.to_string(),
                offer_type: play.offer_type.to_string(),
                message_angle: play.message_angle.to_string(),
                budget_suggestion: budget,
            }
        })
        .collect()
}
