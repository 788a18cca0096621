//! Per-File Pipeline. Download -> inspect -> transcode/thumbnail -> store
//! artifacts -> write FileResult -> increment job counter -> cleanup. Safe
//! to run for many files concurrently: each run owns only its own
//! FileResult row.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::EngineConfig;
use crate::error::{InspectError, TranscodeError};
use crate::job_store::{FileResult, FileResultStatus, JobStore};
use crate::media::MediaMetadata;
use crate::media_inspector;
use crate::object_store::{ObjectStoreError, ObjectStoreGateway, PREFIX_COMPRESSED, PREFIX_PROCESSED, PREFIX_THUMBNAILS};
use crate::transcoder;

#[derive(Error, Debug)]
pub enum PerFileError {
    #[error("job store error: {0}")]
    JobStore(#[from] crate::job_store::JobStoreError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),

    #[error("failed to materialize a local working copy of {original_key}: {source}")]
    Download {
        original_key: String,
        #[source]
        source: crate::object_store::ObjectStoreError,
    },
}

/// One uploaded item awaiting per-file processing.
pub struct PendingFile {
    pub original_key: String,
    pub filename: String,
}

/// Runs the full per-file pipeline for a single uploaded item. Every exit
/// path — success, input error, or infrastructure failure — writes exactly
/// one terminal [`FileResult`] row and increments `processedCount` exactly
/// once, so the Orchestrator's wait loop always terminates. Input errors
/// (unsupported format, corrupt media) land as `invalid` without touching
/// `errorCount`; infrastructure failures (storage, transport, missing
/// tooling) land as `error` and count toward it.
#[instrument(skip(store, jobs, config), fields(session_id, job_id, original_key = %pending.original_key), err)]
pub async fn process_file(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
    pending: PendingFile,
) -> Result<(), PerFileError> {
    let outcome = run_steps(store, config, session_id, job_id, &pending).await;

    let (status, processed_key, thumbnail_key, mime_type, file_size, metadata, error_message) = match outcome {
        Ok(artifacts) => (
            FileResultStatus::Valid,
            artifacts.processed_key,
            artifacts.thumbnail_key,
            artifacts.mime_type,
            artifacts.file_size,
            Some(artifacts.metadata),
            None,
        ),
        Err(Failure::Invalid { reason, mime_type, file_size }) => {
            (FileResultStatus::Invalid, None, None, mime_type, file_size, None, Some(reason))
        }
        Err(Failure::Infrastructure { reason, mime_type, file_size }) => {
            (FileResultStatus::Error, None, None, mime_type, file_size, None, Some(reason))
        }
    };

    let result = FileResult {
        session_id: session_id.to_string(),
        job_id: job_id.to_string(),
        filename: pending.filename.clone(),
        original_key: pending.original_key.clone(),
        processed_key,
        thumbnail_key,
        mime_type,
        file_size,
        status,
        metadata,
        error_message,
    };

    jobs.file_results().put(&result).await?;

    let is_error = matches!(status, FileResultStatus::Error | FileResultStatus::Invalid);
    jobs.jobs()
        .increment_processed_count(session_id, job_id, is_error)
        .await?;

    Ok(())
}

struct Artifacts {
    processed_key: Option<String>,
    thumbnail_key: Option<String>,
    mime_type: String,
    file_size: u64,
    metadata: MediaMetadata,
}

/// Either the input was bad (unsupported format, corrupt container) or the
/// infrastructure failed (storage, transport, missing tooling). Only the
/// latter counts toward `errorCount`.
enum Failure {
    Invalid { reason: String, mime_type: String, file_size: u64 },
    Infrastructure { reason: String, mime_type: String, file_size: u64 },
}

fn invalid(reason: impl Into<String>, mime_type: &str, file_size: u64) -> Failure {
    Failure::Invalid {
        reason: reason.into(),
        mime_type: mime_type.to_string(),
        file_size,
    }
}

fn infra(reason: impl Into<String>, mime_type: &str, file_size: u64) -> Failure {
    Failure::Infrastructure {
        reason: reason.into(),
        mime_type: mime_type.to_string(),
        file_size,
    }
}

async fn run_steps(
    store: &dyn ObjectStoreGateway,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
    pending: &PendingFile,
) -> Result<Artifacts, Failure> {
    let local_path = download_to_temp(store, &pending.original_key)
        .await
        .map_err(|err| infra(err.to_string(), "", 0))?;

    let cleanup = TempFileGuard(local_path.clone());

    let media = media_inspector::inspect(&local_path).await.map_err(|err| match err {
        InspectError::UnsupportedFormat(_) | InspectError::DecodeFailed { .. } => invalid(err.to_string(), "", 0),
        InspectError::Io { .. } => infra(err.to_string(), "", 0),
    })?;

    let artifacts = match &media.metadata {
        MediaMetadata::Image(image_meta) => {
            let thumb = transcoder::image_thumbnail(&local_path, image_meta.orientation, config.thumbnail_max_dim)
                .await
                .map_err(|err| match err {
                    TranscodeError::DecodeFailed { .. } => invalid(err.to_string(), &media.mime, media.size),
                    TranscodeError::TranscoderUnavailable | TranscodeError::EncodeFailed { .. } => {
                        infra(err.to_string(), &media.mime, media.size)
                    }
                })?;

            let thumbnail_key = format!("{session_id}/{PREFIX_THUMBNAILS}{}.webp", pending.filename);
            store
                .put(&thumbnail_key, Bytes::from(thumb))
                .await
                .map_err(|err| infra(err.to_string(), &media.mime, media.size))?;

            Artifacts {
                processed_key: None,
                thumbnail_key: Some(thumbnail_key),
                mime_type: media.mime.clone(),
                file_size: media.size,
                metadata: media.metadata.clone(),
            }
        }
        MediaMetadata::Video(video_meta) => {
            if media.metadata.is_short_video(config.short_video_threshold.as_secs_f64()) {
                return Err(invalid(
                    format!(
                        "video too short for analysis: {:.1}s < {:.1}s threshold",
                        video_meta.duration_secs,
                        config.short_video_threshold.as_secs_f64()
                    ),
                    &media.mime,
                    media.size,
                ));
            }

            let (compressed, compressed_size) = transcoder::compress_video(&local_path, video_meta)
                .await
                .map_err(|err| match err {
                    TranscodeError::DecodeFailed { .. } => invalid(err.to_string(), &media.mime, media.size),
                    TranscodeError::TranscoderUnavailable | TranscodeError::EncodeFailed { .. } => {
                        infra(err.to_string(), &media.mime, media.size)
                    }
                })?;

            let processed_key = format!("{session_id}/{PREFIX_COMPRESSED}{}.webm", pending.filename);
            let bytes = tokio::fs::read(compressed.path())
                .await
                .map_err(|e| infra(e.to_string(), &media.mime, media.size))?;
            store
                .put(&processed_key, Bytes::from(bytes))
                .await
                .map_err(|err| infra(err.to_string(), &media.mime, media.size))?;

            // Video thumbnails are best-effort: a failure here does not
            // invalidate an otherwise-successfully-compressed video.
            let thumbnail_key = match transcoder::video_thumbnail(&local_path, config.thumbnail_max_dim).await {
                Ok(bytes) => {
                    let key = format!("{session_id}/{PREFIX_THUMBNAILS}{}.webp", pending.filename);
                    match store.put(&key, Bytes::from(bytes)).await {
                        Ok(()) => Some(key),
                        Err(err) => {
                            warn!(error = %err, "failed to upload video thumbnail, continuing without one");
                            None
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to generate video thumbnail, continuing without one");
                    None
                }
            };

            Artifacts {
                processed_key: Some(processed_key),
                thumbnail_key,
                mime_type: media.mime.clone(),
                file_size: compressed_size,
                metadata: media.metadata.clone(),
            }
        }
    };

    drop(cleanup);
    Ok(artifacts)
}

async fn download_to_temp(
    store: &dyn ObjectStoreGateway,
    original_key: &str,
) -> Result<PathBuf, PerFileError> {
    let bytes = store
        .get(original_key)
        .await
        .map_err(|source| PerFileError::Download {
            original_key: original_key.to_string(),
            source,
        })?;

    let extension = Path::new(original_key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let temp_path = std::env::temp_dir().join(format!("curation-in-{}.{extension}", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp_path, &bytes)
        .await
        .map_err(|source| PerFileError::Download {
            original_key: original_key.to_string(),
            source: ObjectStoreError::Backend {
                key: original_key.to_string(),
                source: ::object_store::Error::Generic {
                    store: "local-temp",
                    source: Box::new(source),
                },
            },
        })?;
    Ok(temp_path)
}

/// Deletes the temp working file when the per-file run ends, success or
/// failure alike.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let path = self.0.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_file(&path).await;
        });
    }
}
