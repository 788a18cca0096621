//! Orchestrator. A plain step-function over discrete event types, not an
//! in-process actor with live pause/resume over channels — worker
//! invocations are short-lived and stateless between events, so there is no
//! long-running process for an actor to live in. `Report`/`Status`
//! bookkeeping discipline and the monotonic status guard live in
//! [`crate::job_store`] and are shared across every step here.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::job_store::{Job, JobKind, JobPhase, JobStatus, JobStore};
use crate::lmm_gateway::LmmGateway;
use crate::object_store::{best_effort_delete_raw_upload, ObjectStoreGateway, PREFIX_SESSIONS};
use crate::pipeline::batch::{run_description_job, run_selection_job, run_triage_job, BatchError};
use crate::pipeline::per_file::{process_file, PendingFile};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("job store error: {0}")]
    JobStore(#[from] crate::job_store::JobStoreError),

    #[error("batch pipeline error: {0}")]
    Batch(#[from] BatchError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),
}

/// The event envelope the worker binary deserializes and dispatches. Each
/// variant is one step of the `init-session → fan-out → wait-processing →
/// run-batch → finalize` sequence; a single worker invocation runs exactly
/// one step.
#[derive(Debug, Clone)]
pub enum JobEvent {
    InitSession {
        session_id: String,
        job_id: String,
        kind: JobKind,
        expected_file_count: u32,
        model: String,
    },
    ProcessFile {
        session_id: String,
        job_id: String,
        pending: PendingFile,
    },
    WaitProcessing {
        session_id: String,
        job_id: String,
    },
    RunBatch {
        session_id: String,
        job_id: String,
        /// Only populated for `description` jobs; ignored otherwise.
        description_request: Option<DescriptionRequest>,
    },
}

/// Parameters specific to the description operation, carried on the
/// `RunBatch` event rather than threaded as extra fields on every variant.
#[derive(Debug, Clone)]
pub struct DescriptionRequest {
    pub group_label: String,
    pub event_description: String,
    pub prior_turns: Vec<String>,
    pub new_instruction: Option<String>,
}

/// What a step produced: the caller (worker binary) schedules the next
/// event accordingly. `Poll` means "call `WaitProcessing` again after a
/// delay" — the Orchestrator has no scheduler of its own, consistent with
/// the short-lived-invocation model.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Advanced { next: JobEvent },
    Poll { retry_after: Duration },
    Done { job: Job },
}

/// `init-session`: writes the initial Job row with `status=processing,
/// phase=uploading`.
#[instrument(skip(jobs), fields(session_id = %session_id, job_id = %job_id), err)]
pub async fn init_session(
    jobs: &JobStore,
    session_id: &str,
    job_id: &str,
    kind: JobKind,
    model: String,
    expected_file_count: u32,
) -> Result<Job, OrchestratorError> {
    let job = Job::new(
        session_id.to_string(),
        job_id.to_string(),
        kind,
        model,
        expected_file_count,
    );
    jobs.jobs().insert(&job).await?;
    info!(session_id, job_id, expected_file_count, "job initialized");
    Ok(job)
}

/// `fan-out per-file`: runs the per-file pipeline for one uploaded item.
/// Each invocation is an independent, idempotent worker event — many may
/// run concurrently for the same job.
#[instrument(skip(store, jobs, config), fields(session_id = %session_id, job_id = %job_id), err)]
pub async fn fan_out_file(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
    pending: PendingFile,
) -> Result<(), OrchestratorError> {
    process_file(store, jobs, config, session_id, job_id, pending).await?;
    Ok(())
}

/// `wait-processing`: one poll. Reads `processedCount`/`errorCount`,
/// advances `phase`, and decides whether to hand off to `run-batch` or ask
/// the caller to poll again. Respects an externally-set `cancelled` status
/// by treating the job as already terminal.
#[instrument(skip(jobs), fields(session_id = %session_id, job_id = %job_id), err)]
pub async fn wait_processing(
    jobs: &JobStore,
    session_id: &str,
    job_id: &str,
    poll_interval: Duration,
) -> Result<StepOutcome, OrchestratorError> {
    let job = jobs
        .jobs()
        .get(session_id, job_id)
        .await?
        .ok_or_else(|| crate::job_store::JobStoreError::JobNotFound {
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
        })?;

    if job.status.is_terminal() {
        // Either a previous invocation already finished the job, or it was
        // externally cancelled — either way there is nothing left to wait
        // for.
        return Ok(StepOutcome::Done { job });
    }

    let target_phase = if job.processed_count == 0 {
        JobPhase::Uploading
    } else if job.processed_count < job.expected_file_count {
        JobPhase::Processing
    } else {
        JobPhase::Analyzing
    };

    if job.processed_count >= job.expected_file_count {
        let job = jobs
            .jobs()
            .merge_put(session_id, job_id, |job| {
                job.phase = JobPhase::Analyzing;
            })
            .await?;
        return Ok(StepOutcome::Advanced {
            next: JobEvent::RunBatch {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
                description_request: None,
            },
        });
    }

    if target_phase != job.phase {
        jobs.jobs()
            .merge_put(session_id, job_id, |job| {
                job.phase = target_phase;
            })
            .await?;
    }

    Ok(StepOutcome::Poll {
        retry_after: poll_interval,
    })
}

/// `run-batch`: executes the job-kind-appropriate batch operation and
/// writes the terminal result. Best-effort raw-upload cleanup and context
/// cache teardown follow on success, never before the durable write.
#[instrument(skip(store, jobs, lmm, config), fields(session_id = %session_id, job_id = %job_id), err)]
pub async fn run_batch<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
    description_request: Option<DescriptionRequest>,
) -> Result<Job, OrchestratorError> {
    let current = jobs
        .jobs()
        .get(session_id, job_id)
        .await?
        .ok_or_else(|| crate::job_store::JobStoreError::JobNotFound {
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
        })?;

    if current.status.is_terminal() {
        // Replay of a `run-batch` event after the job already finished or
        // was cancelled: a no-op.
        return Ok(current);
    }

    let outcome = match current.kind {
        JobKind::Triage => run_triage_job(store, jobs, lmm, config, session_id, job_id).await,
        JobKind::Selection => run_selection_job(store, jobs, lmm, config, session_id, job_id).await,
        JobKind::Description => {
            let request = description_request.unwrap_or(DescriptionRequest {
                group_label: current.job_id.clone(),
                event_description: String::new(),
                prior_turns: Vec::new(),
                new_instruction: None,
            });
            run_description_job(
                store,
                jobs,
                lmm,
                config,
                session_id,
                job_id,
                &request.group_label,
                &request.event_description,
                &request.prior_turns,
                request.new_instruction.as_deref(),
            )
            .await
        }
    };

    match outcome {
        Ok(job) => {
            finalize_raw_uploads(store, jobs, session_id, job_id).await;
            lmm.evict_session_caches(session_id).await;
            Ok(job)
        }
        Err(err) => {
            warn!(session_id, job_id, error = %err, "batch pipeline failed, marking job errored");
            let job = jobs
                .jobs()
                .merge_put(session_id, job_id, |job| {
                    job.status = JobStatus::Error;
                    job.phase = JobPhase::Done;
                    job.error = Some(err.to_string());
                })
                .await?;
            Ok(job)
        }
    }
}

/// `finalize`: best-effort deletion of raw uploads once terminal artifacts
/// are durably written elsewhere. Never fails the job — logged only.
#[instrument(skip(store, jobs), fields(session_id = %session_id, job_id = %job_id))]
async fn finalize_raw_uploads(store: &dyn ObjectStoreGateway, jobs: &JobStore, session_id: &str, job_id: &str) {
    let results = match jobs.file_results().list_for_job(session_id, job_id).await {
        Ok(results) => results,
        Err(err) => {
            warn!(session_id, job_id, error = %err, "could not list file results for raw-upload cleanup");
            return;
        }
    };
    for result in results {
        let raw_key = format!("{PREFIX_SESSIONS}{session_id}/{}", result.filename);
        best_effort_delete_raw_upload(store, &raw_key).await;
    }
}

/// Runs a single event to completion, dispatching to the matching step.
/// This is the entry point the worker binary calls once per invocation.
#[instrument(skip(store, jobs, lmm, config, event))]
pub async fn run_event<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    lmm: &G,
    config: &EngineConfig,
    event: JobEvent,
) -> Result<StepOutcome, OrchestratorError> {
    match event {
        JobEvent::InitSession {
            session_id,
            job_id,
            kind,
            expected_file_count,
            model,
        } => {
            init_session(jobs, &session_id, &job_id, kind, model, expected_file_count).await?;
            Ok(StepOutcome::Advanced {
                next: JobEvent::WaitProcessing { session_id, job_id },
            })
        }
        JobEvent::ProcessFile {
            session_id,
            job_id,
            pending,
        } => {
            fan_out_file(store, jobs, config, &session_id, &job_id, pending).await?;
            Ok(StepOutcome::Advanced {
                next: JobEvent::WaitProcessing { session_id, job_id },
            })
        }
        JobEvent::WaitProcessing { session_id, job_id } => {
            wait_processing(jobs, &session_id, &job_id, config.upload_poll_interval).await
        }
        JobEvent::RunBatch {
            session_id,
            job_id,
            description_request,
        } => {
            let job = run_batch(store, jobs, lmm, config, &session_id, &job_id, description_request).await?;
            Ok(StepOutcome::Done { job })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_processing_phase_targets_match_progress() {
        // Progress-to-phase mapping is a pure function of two counters;
        // exercised directly rather than through the async DB-backed path.
        let target = |processed: u32, expected: u32| -> JobPhase {
            if processed == 0 {
                JobPhase::Uploading
            } else if processed < expected {
                JobPhase::Processing
            } else {
                JobPhase::Analyzing
            }
        };
        assert_eq!(target(0, 5), JobPhase::Uploading);
        assert_eq!(target(2, 5), JobPhase::Processing);
        assert_eq!(target(5, 5), JobPhase::Analyzing);
    }
}
