//! Durable record shapes for job and per-file status tracking: a status enum
//! with a monotonic ordering check, and a record struct that owns everything
//! else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Triage,
    Selection,
    Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
    /// An externally-writable marker the orchestrator must respect;
    /// modeled as a status so the same monotonic guard covers it.
    Cancelled,
}

impl JobStatus {
    /// `status = complete | error | cancelled` job records do not accept
    /// further status transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// The only legal forward edges. `Processing -> Processing` is allowed
    /// since repeated wait-processing polls are idempotent replays.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Processing)
                | (Self::Processing, Self::Complete)
                | (Self::Processing, Self::Error)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Uploading,
    Processing,
    Analyzing,
    GeminiProcessing,
    Done,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub keep: Vec<String>,
    pub discard: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneGroup {
    pub name: String,
    pub gps: Option<crate::media::GpsCoordinates>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub selected: Vec<String>,
    pub excluded: Vec<String>,
    pub scene_groups: Vec<SceneGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptionOutcome {
    pub caption: String,
    pub hashtags: Vec<String>,
    pub location_tag: Option<String>,
}

/// Kind-specific terminal fields. Only the variant matching `kind` is ever
/// populated; the others are `None` for the lifetime of the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOutcome {
    pub triage: Option<TriageOutcome>,
    pub selection: Option<SelectionOutcome>,
    pub description: Option<DescriptionOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub session_id: String,
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub expected_file_count: u32,
    pub processed_count: u32,
    pub error_count: u32,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub outcome: JobOutcome,
    pub error: Option<String>,
}

impl Job {
    #[must_use]
    pub fn new(session_id: String, job_id: String, kind: JobKind, model: String, expected_file_count: u32) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            job_id,
            kind,
            status: JobStatus::Processing,
            phase: JobPhase::Uploading,
            expected_file_count,
            processed_count: 0,
            error_count: 0,
            model,
            created_at: now,
            updated_at: now,
            outcome: JobOutcome::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileResultStatus {
    Pending,
    Valid,
    Invalid,
    Error,
}

impl FileResultStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub session_id: String,
    pub job_id: String,
    pub filename: String,
    pub original_key: String,
    pub processed_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub mime_type: String,
    pub file_size: u64,
    pub status: FileResultStatus,
    pub metadata: Option<MediaMetadata>,
    pub error_message: Option<String>,
}
