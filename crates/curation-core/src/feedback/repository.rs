//! Single-table repository for decision events, the same
//! repository-per-concern style as [`crate::job_store::repositories`]. One
//! physical table (`decision_events`, discriminated by `event_type`) covers
//! every decision kind (triage, selection, override, caption, publish):
//! they all share an identical schema (verdicts + embedding), so splitting
//! into five physical tables would only duplicate DDL.

use sqlx::{Row, SqlitePool};

use super::error::FeedbackError;
use super::model::{DecisionEvent, DecisionEventType, DecisionRecord};

pub struct DecisionRepository {
    pool: SqlitePool,
}

impl DecisionRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upserts keyed by `(eventType, sessionId, mediaKey)` so a replayed
    /// decision event updates the existing row instead of duplicating it.
    pub async fn upsert(&self, event: &DecisionEvent, embedding: Vec<f32>) -> Result<(), FeedbackError> {
        let metadata_json = serde_json::to_string(&event.metadata)?;
        let embedding_json = serde_json::to_string(&embedding)?;

        sqlx::query(
            "INSERT INTO decision_events (event_type, session_id, media_key, user_id, job_id, \
             ai_verdict, user_verdict, is_override, reason, model, prompt_version, metadata_json, \
             embedding_json, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (event_type, session_id, media_key) DO UPDATE SET \
             user_id = excluded.user_id, job_id = excluded.job_id, ai_verdict = excluded.ai_verdict, \
             user_verdict = excluded.user_verdict, is_override = excluded.is_override, \
             reason = excluded.reason, model = excluded.model, prompt_version = excluded.prompt_version, \
             metadata_json = excluded.metadata_json, embedding_json = excluded.embedding_json, \
             timestamp = excluded.timestamp",
        )
        .bind(event_type_to_str(event.event_type))
        .bind(&event.session_id)
        .bind(&event.media_key)
        .bind(&event.user_id)
        .bind(&event.job_id)
        .bind(&event.ai_verdict)
        .bind(&event.user_verdict)
        .bind(event.is_override)
        .bind(&event.reason)
        .bind(&event.model)
        .bind(&event.prompt_version)
        .bind(metadata_json)
        .bind(embedding_json)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All decisions for a user, most recent first. Retrieval (top-k by
    /// cosine similarity) and profile aggregation both start from this full
    /// scan — acceptable at the per-user data volumes this store targets;
    /// a dedicated vector index is future work if that stops being true.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<DecisionRecord>, FeedbackError> {
        let rows = sqlx::query(
            "SELECT event_type, session_id, media_key, user_id, job_id, ai_verdict, user_verdict, \
             is_override, reason, model, prompt_version, metadata_json, embedding_json, timestamp \
             FROM decision_events WHERE user_id = ? ORDER BY timestamp DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DecisionRecord, FeedbackError> {
    let metadata_json: String = row.try_get("metadata_json")?;
    let embedding_json: String = row.try_get("embedding_json")?;
    let event = DecisionEvent {
        event_type: str_to_event_type(row.try_get("event_type")?),
        session_id: row.try_get("session_id")?,
        job_id: row.try_get("job_id")?,
        user_id: row.try_get("user_id")?,
        media_key: row.try_get("media_key")?,
        ai_verdict: row.try_get("ai_verdict")?,
        user_verdict: row.try_get("user_verdict")?,
        is_override: row.try_get("is_override")?,
        reason: row.try_get("reason")?,
        model: row.try_get("model")?,
        prompt_version: row.try_get("prompt_version")?,
        metadata: serde_json::from_str(&metadata_json)?,
        timestamp: chrono::DateTime::parse_from_rfc3339(&row.try_get::<String, _>("timestamp")?)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    };
    Ok(DecisionRecord {
        session_id: event.session_id.clone(),
        media_key: event.media_key.clone(),
        user_id: event.user_id.clone(),
        embedding: serde_json::from_str(&embedding_json)?,
        event,
    })
}

fn event_type_to_str(kind: DecisionEventType) -> &'static str {
    kind.table()
}

fn str_to_event_type(raw: String) -> DecisionEventType {
    match raw.as_str() {
        "selection" => DecisionEventType::Selection,
        "override" => DecisionEventType::Override,
        "caption" => DecisionEventType::Caption,
        "publish" => DecisionEventType::Publish,
        _ => DecisionEventType::Triage,
    }
}
