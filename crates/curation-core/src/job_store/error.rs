use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("job not found: {session_id}/{job_id}")]
    JobNotFound { session_id: String, job_id: String },

    #[error("refusing to move terminal job {session_id}/{job_id} backwards from {from:?} to {to:?}")]
    TerminalJobImmutable {
        session_id: String,
        job_id: String,
        from: super::model::JobStatus,
        to: super::model::JobStatus,
    },

    #[error("duplicate FileResult for ({session_id}, {job_id}, {original_key})")]
    DuplicateFileResult {
        session_id: String,
        job_id: String,
        original_key: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to (de)serialize job record: {0}")]
    Serde(#[from] serde_json::Error),
}
