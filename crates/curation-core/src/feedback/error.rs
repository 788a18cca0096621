use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("LMM error: {0}")]
    Lmm(#[from] crate::lmm_gateway::LmmError),

    #[error("unknown decision table: {0}")]
    UnknownTable(String),
}
