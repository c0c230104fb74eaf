//! Shared primitive types used across the entire pipeline.

/// A stable, normalized customer identifier.
pub type CustomerId = String;

/// The canonical pipeline-run identifier.
pub type RunId = String;
