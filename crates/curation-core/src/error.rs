use thiserror::Error;

use crate::{
    job_store::JobStoreError, lmm_gateway::LmmError, object_store::ObjectStoreError,
    pipeline::batch::BatchError, pipeline::per_file::PerFileError,
};

/// Aggregates every component error into a single type, so the binary can
/// propagate one error enum through `run_event` instead of matching on each
/// component's error type separately.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    JobStore(#[from] JobStoreError),

    #[error(transparent)]
    Lmm(#[from] LmmError),

    #[error(transparent)]
    PerFile(#[from] PerFileError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    #[error(transparent)]
    Feedback(#[from] crate::feedback::FeedbackError),
}

/// Errors raised by the media inspector. Input errors fail the
/// `FileResult`, never the job — callers must not bubble these up through
/// `run_event` as job-fatal.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read local file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode container metadata for {path}: {reason}")]
    DecodeFailed { path: String, reason: String },
}

/// Errors raised by the transcoder.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg binary not found on PATH")]
    TranscoderUnavailable,

    #[error("failed to decode {path}: {reason}")]
    DecodeFailed { path: String, reason: String },

    #[error("failed to encode {path}: {reason}")]
    EncodeFailed { path: String, reason: String },
}
