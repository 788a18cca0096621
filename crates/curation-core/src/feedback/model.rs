//! Record shapes for the Decision Feedback Store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEventType {
    Triage,
    Selection,
    Override,
    Caption,
    Publish,
}

impl DecisionEventType {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Selection => "selection",
            Self::Override => "override",
            Self::Caption => "caption",
            Self::Publish => "publish",
        }
    }
}

/// Append-only record emitted when a user finalizes a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub event_type: DecisionEventType,
    pub session_id: String,
    pub job_id: String,
    pub user_id: String,
    /// `mediaKey` for per-item events, `postGroupName` for caption events.
    pub media_key: String,
    pub ai_verdict: String,
    pub user_verdict: String,
    pub is_override: bool,
    pub reason: Option<String>,
    pub model: String,
    pub prompt_version: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DecisionEvent {
    /// The short embedding input: `"{verdict} — {reason} | {metadata}"`.
    #[must_use]
    pub fn embedding_input(&self) -> String {
        let reason = self.reason.as_deref().unwrap_or("no reason given");
        format!("{} — {} | {}", self.user_verdict, reason, self.metadata)
    }
}

/// One row of the kind-appropriate decision table, keyed by
/// `(sessionId, mediaKey)` (or group-key variants for captions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub session_id: String,
    pub media_key: String,
    pub user_id: String,
    pub event: DecisionEvent,
    pub embedding: Vec<f32>,
}

/// A historical decision surfaced by retrieval, paired with its similarity
/// to the query embedding.
#[derive(Debug, Clone)]
pub struct RetrievedDecision {
    pub record: DecisionRecord,
    pub similarity: f32,
}

/// Derived, per-user aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceProfile {
    pub user_id: String,
    pub keep_rate: f64,
    pub override_rate: f64,
    pub reason_histogram: std::collections::BTreeMap<String, u32>,
    pub recent_overrides: Vec<DecisionEvent>,
    pub media_type_breakdown: std::collections::BTreeMap<String, u32>,
    pub summary: Option<String>,
}
