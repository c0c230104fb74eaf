//! retention-core: customer churn retention pipeline.
//!
//! A batch pipeline over an immutable transaction log: month-end snapshot
//! features, right-censored churn labels, RFM segmentation, a time-based
//! model split with risk scoring, and a campaign decision cascade. All
//! stage outputs live in SQLite; `pipeline::Pipeline` runs the stages in
//! their fixed order.

pub mod calendar;
pub mod campaign;
pub mod config;
pub mod error;
pub mod event;
pub mod features;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod scoring;
pub mod segmentation;
pub mod store;
pub mod types;
