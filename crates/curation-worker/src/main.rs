//! Short-lived worker entry point: one process per event, so there is no
//! global mutable state to reason about between invocations, only the
//! explicit handles this function builds and passes down. Reads one JSON
//! event envelope from stdin (or the first CLI argument, for local
//! testing), builds the gateway handles, dispatches to the matching
//! [`curation_core::orchestrator`] step, and prints the resulting step
//! outcome as JSON.
//!
//! `anyhow` is used only at this outermost boundary; the library crate
//! sticks to `thiserror`.

use std::io::Read as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use curation_core::job_store::{JobKind, JobStore};
use curation_core::lmm_gateway::HttpLmmGateway;
use curation_core::object_store::S3ObjectStoreGateway;
use curation_core::orchestrator::{run_event, DescriptionRequest, JobEvent, StepOutcome};
use curation_core::pipeline::per_file::PendingFile;
use curation_core::EngineConfig;

/// The wire shape of an orchestrator step event, extended with the
/// per-kind fields each event type needs beyond the common session/job
/// identifiers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    session_id: String,
    job_id: String,
    model: Option<String>,
    expected_file_count: Option<u32>,
    kind: Option<String>,
    original_key: Option<String>,
    filename: Option<String>,
    group_label: Option<String>,
    event_description: Option<String>,
    prior_turns: Option<Vec<String>>,
    new_instruction: Option<String>,
}

fn parse_kind(raw: &str) -> Result<JobKind> {
    match raw {
        "triage" => Ok(JobKind::Triage),
        "selection" => Ok(JobKind::Selection),
        "description" => Ok(JobKind::Description),
        other => anyhow::bail!("unrecognized job kind: {other}"),
    }
}

fn envelope_to_event(envelope: EventEnvelope) -> Result<JobEvent> {
    match envelope.event_type.as_str() {
        "init-session" => Ok(JobEvent::InitSession {
            session_id: envelope.session_id,
            job_id: envelope.job_id,
            kind: parse_kind(envelope.kind.as_deref().context("init-session requires `kind`")?)?,
            expected_file_count: envelope
                .expected_file_count
                .context("init-session requires `expectedFileCount`")?,
            model: envelope.model.unwrap_or_else(|| "fast-multimodal".to_string()),
        }),
        "process-file" => Ok(JobEvent::ProcessFile {
            session_id: envelope.session_id,
            job_id: envelope.job_id,
            pending: PendingFile {
                original_key: envelope
                    .original_key
                    .context("process-file requires `originalKey`")?,
                filename: envelope.filename.context("process-file requires `filename`")?,
            },
        }),
        "wait-processing" => Ok(JobEvent::WaitProcessing {
            session_id: envelope.session_id,
            job_id: envelope.job_id,
        }),
        "run-batch" => Ok(JobEvent::RunBatch {
            session_id: envelope.session_id,
            job_id: envelope.job_id,
            description_request: envelope.group_label.map(|group_label| DescriptionRequest {
                group_label,
                event_description: envelope.event_description.unwrap_or_default(),
                prior_turns: envelope.prior_turns.unwrap_or_default(),
                new_instruction: envelope.new_instruction,
            }),
        }),
        other => anyhow::bail!("unrecognized event type: {other}"),
    }
}

fn read_envelope() -> Result<EventEnvelope> {
    let raw = match std::env::args().nth(1) {
        Some(arg) => arg,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read event envelope from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("failed to parse event envelope")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let envelope = read_envelope()?;
    let event = envelope_to_event(envelope)?;

    let config = EngineConfig::from_env();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let jobs = JobStore::connect(&database_url)
        .await
        .context("failed to connect to job store")?;

    let bucket = std::env::var("CURATION_BUCKET").context("CURATION_BUCKET must be set")?;
    let store: Arc<S3ObjectStoreGateway> =
        Arc::new(S3ObjectStoreGateway::from_env(bucket).context("failed to build object store gateway")?);

    let lmm_base_url = std::env::var("LMM_BASE_URL").context("LMM_BASE_URL must be set")?;
    let lmm_api_key = std::env::var("LMM_API_KEY").context("LMM_API_KEY must be set")?;
    let lmm = HttpLmmGateway::new(lmm_base_url, lmm_api_key);

    let outcome = run_event(store.as_ref(), &jobs, &lmm, &config, event)
        .await
        .context("orchestrator step failed")?;

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Advanced { next } => {
            println!("{}", serde_json::json!({ "status": "advanced", "next": format!("{next:?}") }));
        }
        StepOutcome::Poll { retry_after } => {
            println!(
                "{}",
                serde_json::json!({ "status": "poll", "retryAfterMs": retry_after.as_millis() as u64 })
            );
        }
        StepOutcome::Done { job } => {
            println!(
                "{}",
                serde_json::json!({ "status": "done", "jobStatus": format!("{:?}", job.status) })
            );
        }
    }
}
