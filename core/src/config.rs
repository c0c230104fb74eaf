//! Pipeline configuration.
//!
//! Loaded from a single JSON file; every field has a production default so a
//! partial config (or none at all) is valid. In tests, use
//! `PipelineConfig::default_test()`.

use crate::error::{PipelineError, PipelineResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-tier clamp band for campaign budget suggestions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetBand {
    pub floor: f64,
    pub cap:   f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Base spend as a fraction of lifetime revenue.
    pub revenue_rate: f64,
    pub high:    BudgetBand,
    pub mid:     BudgetBand,
    pub low:     BudgetBand,
    pub unknown: BudgetBand,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            revenue_rate: 0.03,
            high:    BudgetBand { floor: 80.0, cap: 500.0 },
            mid:     BudgetBand { floor: 25.0, cap: 200.0 },
            low:     BudgetBand { floor: 10.0, cap: 80.0 },
            unknown: BudgetBand { floor: 15.0, cap: 150.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing window for behavioral feature stats (basket sizes, gaps).
    pub lookback_days: i64,
    /// Forward window for churn label observation.
    pub label_window_days: i64,
    /// Fraction of each snapshot flagged for operational outreach.
    pub top_pct: f64,
    /// Minimum labeled rows required before model fitting.
    pub min_labeled_rows: usize,
    /// Drop labeled rows whose lifetime order count is zero.
    pub require_lifetime_orders: bool,
    /// Explicit train/test cutoff ("YYYY-MM-DD"). Empty → derived from the
    /// last snapshot months.
    pub cutoff_date: Option<String>,
    /// Optional clamp on the snapshot grid ("YYYY-MM-DD").
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Fit the gradient-boosted candidate alongside logistic regression.
    pub enable_boosted_model: bool,
    /// Master seed for the boosted model's column subsampling — the only
    /// randomness in a run.
    pub seed: u64,
    pub budget: BudgetConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            label_window_days: 90,
            top_pct: 0.15,
            min_labeled_rows: 100,
            require_lifetime_orders: false,
            cutoff_date: None,
            start_date: None,
            end_date: None,
            enable_boosted_model: true,
            seed: 42,
            budget: BudgetConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            min_labeled_rows: 10,
            ..Self::default()
        }
    }

    pub fn parsed_cutoff(&self) -> PipelineResult<Option<NaiveDate>> {
        Self::parse_date_field(&self.cutoff_date, "cutoff_date")
    }

    pub fn parsed_start(&self) -> PipelineResult<Option<NaiveDate>> {
        Self::parse_date_field(&self.start_date, "start_date")
    }

    pub fn parsed_end(&self) -> PipelineResult<Option<NaiveDate>> {
        Self::parse_date_field(&self.end_date, "end_date")
    }

    fn parse_date_field(
        value: &Option<String>,
        field: &str,
    ) -> PipelineResult<Option<NaiveDate>> {
        match value {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| {
                    PipelineError::Configuration(format!(
                        "Malformed {field} '{raw}': expected YYYY-MM-DD"
                    ))
                }),
        }
    }
}
