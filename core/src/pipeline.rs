//! The pipeline engine — one synchronous run, stage by stage.
//!
//! STAGE ORDER (fixed, documented, never reordered):
//!   1. Load the transaction log
//!   2. Snapshot feature builder
//!   3. Censored label engine
//!   4. RFM segmentation engine
//!   5. Temporal split & risk scorer
//!   6. Campaign decision engine
//!
//! RULES:
//!   - Each stage reads ONLY its predecessors' outputs.
//!   - Every stage's output is persisted before the next stage starts, so a
//!     failed run leaves inspectable intermediate tables.
//!   - Any stage error aborts the run; there are no partial retries.

use crate::{
    campaign::decide_actions,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    event::EventLog,
    features::build_monthly_features,
    labels::label_features,
    scoring::{score_snapshots, ModelReport},
    segmentation::segment_monthly,
    store::PipelineStore,
    types::RunId,
};
use serde::Serialize;
use uuid::Uuid;

/// Stage row counts and the model report for one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id:        RunId,
    pub transactions:  usize,
    pub customers:     usize,
    pub feature_rows:  usize,
    pub labeled_rows:  usize,
    pub segment_rows:  usize,
    pub score_rows:    usize,
    pub action_rows:   usize,
    pub report:        ModelReport,
}

pub struct Pipeline {
    pub run_id: RunId,
    config:     PipelineConfig,
    store:      PipelineStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: PipelineStore) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            config,
            store,
        }
    }

    /// Execute all stages against the transactions already in the store.
    pub fn run(&self, started_at: &str) -> PipelineResult<RunSummary> {
        self.store.insert_run(
            &self.run_id,
            self.config.seed,
            env!("CARGO_PKG_VERSION"),
            started_at,
        )?;

        // 1. Transaction log
        let raw = self.store.load_transactions()?;
        if raw.is_empty() {
            return Err(PipelineError::DataSufficiency(
                "transactions table is empty".into(),
            ));
        }
        let log = EventLog::from_rows(raw);
        let transactions = log.len();
        let customers = log.customer_count();
        log::info!(
            "pipeline {}: {transactions} events, {customers} customers",
            self.run_id
        );

        let start = self.config.parsed_start()?;
        let end = self.config.parsed_end()?;

        // 2. Features
        let features = build_monthly_features(&log, self.config.lookback_days, start, end);
        log::info!("pipeline {}: {} feature rows", self.run_id, features.len());

        // 3. Labels
        let labeled = label_features(
            &log,
            &features,
            self.config.label_window_days,
            self.config.require_lifetime_orders,
        )?;
        self.store.insert_features(&self.run_id, &labeled)?;

        // 4. Segments
        let segments = segment_monthly(&log, start, end);
        self.store.insert_segments(&self.run_id, &segments)?;
        log::info!("pipeline {}: {} segment rows", self.run_id, segments.len());

        // 5. Scores
        let (scores, report) = score_snapshots(&labeled, &segments, &self.config)?;
        self.store.insert_scores(&self.run_id, &scores)?;

        // 6. Campaign actions
        let actions = decide_actions(&scores, &self.config);
        self.store.insert_actions(&self.run_id, &actions)?;
        log::info!("pipeline {}: {} campaign actions", self.run_id, actions.len());

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            transactions,
            customers,
            feature_rows: features.len(),
            labeled_rows: labeled
                .iter()
                .filter(|r| r.label.as_flag().is_some())
                .count(),
            segment_rows: segments.len(),
            score_rows: scores.len(),
            action_rows: actions.len(),
            report,
        })
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }
}
