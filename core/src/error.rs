use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Required column '{column}' is missing")]
    Schema { column: String },

    #[error("Insufficient data: {0}")]
    DataSufficiency(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
