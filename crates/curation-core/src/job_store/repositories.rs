//! Repository-per-table access, one struct per durable table: each holds a
//! pool and exposes query methods whose `sqlx::Error`s are wrapped in the
//! crate's own error type.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::error::JobStoreError;
use super::model::{FileResult, FileResultStatus, Job, JobKind, JobOutcome, JobPhase, JobStatus};

pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, session_id: &str, job_id: &str) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            "SELECT session_id, job_id, kind, status, phase, expected_file_count, \
             processed_count, error_count, model, created_at, updated_at, outcome_json, error \
             FROM jobs WHERE session_id = ? AND job_id = ?",
        )
        .bind(session_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    /// Inserts a brand-new job row. Callers use this only from `init-session`;
    /// subsequent updates go through [`Self::merge_put`].
    pub async fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        let outcome_json = serde_json::to_string(&job.outcome)?;
        sqlx::query(
            "INSERT INTO jobs (session_id, job_id, kind, status, phase, expected_file_count, \
             processed_count, error_count, model, created_at, updated_at, outcome_json, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.session_id)
        .bind(&job.job_id)
        .bind(kind_to_str(job.kind))
        .bind(status_to_str(job.status))
        .bind(phase_to_str(job.phase))
        .bind(job.expected_file_count)
        .bind(job.processed_count)
        .bind(job.error_count)
        .bind(&job.model)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(outcome_json)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Field-merging update with the monotonic status guard: an update that
    /// would move a terminal job backwards is rejected rather than applied.
    pub async fn merge_put(
        &self,
        session_id: &str,
        job_id: &str,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT session_id, job_id, kind, status, phase, expected_file_count, \
             processed_count, error_count, model, created_at, updated_at, outcome_json, error \
             FROM jobs WHERE session_id = ? AND job_id = ?",
        )
        .bind(session_id)
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| JobStoreError::JobNotFound {
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
        })?;

        let mut job = row_to_job(row)?;
        let previous_status = job.status;
        apply(&mut job);

        if previous_status.is_terminal() && job.status != previous_status {
            return Err(JobStoreError::TerminalJobImmutable {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
                from: previous_status,
                to: job.status,
            });
        }
        if !previous_status.is_terminal()
            && job.status != previous_status
            && !previous_status.can_transition_to(job.status)
        {
            return Err(JobStoreError::TerminalJobImmutable {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
                from: previous_status,
                to: job.status,
            });
        }

        job.updated_at = Utc::now();
        let outcome_json = serde_json::to_string(&job.outcome)?;

        sqlx::query(
            "UPDATE jobs SET status = ?, phase = ?, processed_count = ?, error_count = ?, \
             updated_at = ?, outcome_json = ?, error = ? WHERE session_id = ? AND job_id = ?",
        )
        .bind(status_to_str(job.status))
        .bind(phase_to_str(job.phase))
        .bind(job.processed_count)
        .bind(job.error_count)
        .bind(job.updated_at.to_rfc3339())
        .bind(outcome_json)
        .bind(&job.error)
        .bind(session_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    /// Atomic +1 on `processed_count`, ignored once the job is terminal:
    /// once `status=complete`, further increments are a no-op rather than
    /// an error, since redelivered per-file events are expected.
    pub async fn increment_processed_count(
        &self,
        session_id: &str,
        job_id: &str,
        is_error: bool,
    ) -> Result<u32, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, processed_count, error_count FROM jobs WHERE session_id = ? AND job_id = ?")
            .bind(session_id)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| JobStoreError::JobNotFound {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
            })?;

        let status = str_to_status(row.try_get::<String, _>("status")?);
        let processed_count: u32 = row.try_get("processed_count")?;
        let error_count: u32 = row.try_get("error_count")?;

        if status.is_terminal() {
            tx.commit().await?;
            return Ok(processed_count);
        }

        let new_processed = processed_count + 1;
        let new_errors = if is_error { error_count + 1 } else { error_count };

        sqlx::query(
            "UPDATE jobs SET processed_count = ?, error_count = ?, updated_at = ? \
             WHERE session_id = ? AND job_id = ?",
        )
        .bind(new_processed)
        .bind(new_errors)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_processed)
    }
}

pub struct FileResultRepository {
    pool: SqlitePool,
}

impl FileResultRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent per-key write: a repeat write with the same `original_key`
    /// replaces the row in place rather than erroring.
    pub async fn put(&self, result: &FileResult) -> Result<(), JobStoreError> {
        let metadata_json = result
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO file_results (session_id, job_id, original_key, filename, processed_key, \
             thumbnail_key, mime_type, file_size, status, metadata_json, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (session_id, job_id, original_key) DO UPDATE SET \
             filename = excluded.filename, processed_key = excluded.processed_key, \
             thumbnail_key = excluded.thumbnail_key, mime_type = excluded.mime_type, \
             file_size = excluded.file_size, status = excluded.status, \
             metadata_json = excluded.metadata_json, error_message = excluded.error_message",
        )
        .bind(&result.session_id)
        .bind(&result.job_id)
        .bind(&result.original_key)
        .bind(&result.filename)
        .bind(&result.processed_key)
        .bind(&result.thumbnail_key)
        .bind(&result.mime_type)
        .bind(result.file_size as i64)
        .bind(status_to_str_file(result.status))
        .bind(metadata_json)
        .bind(&result.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_job(&self, session_id: &str, job_id: &str) -> Result<Vec<FileResult>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT session_id, job_id, original_key, filename, processed_key, thumbnail_key, \
             mime_type, file_size, status, metadata_json, error_message \
             FROM file_results WHERE session_id = ? AND job_id = ?",
        )
        .bind(session_id)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_file_result).collect()
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job, JobStoreError> {
    let outcome_json: String = row.try_get("outcome_json")?;
    Ok(Job {
        session_id: row.try_get("session_id")?,
        job_id: row.try_get("job_id")?,
        kind: str_to_kind(row.try_get("kind")?),
        status: str_to_status(row.try_get("status")?),
        phase: str_to_phase(row.try_get("phase")?),
        expected_file_count: row.try_get::<i64, _>("expected_file_count")? as u32,
        processed_count: row.try_get::<i64, _>("processed_count")? as u32,
        error_count: row.try_get::<i64, _>("error_count")? as u32,
        model: row.try_get("model")?,
        created_at: parse_rfc3339(row.try_get("created_at")?),
        updated_at: parse_rfc3339(row.try_get("updated_at")?),
        outcome: serde_json::from_str::<JobOutcome>(&outcome_json)?,
        error: row.try_get("error")?,
    })
}

fn row_to_file_result(row: sqlx::sqlite::SqliteRow) -> Result<FileResult, JobStoreError> {
    let metadata_json: Option<String> = row.try_get("metadata_json")?;
    Ok(FileResult {
        session_id: row.try_get("session_id")?,
        job_id: row.try_get("job_id")?,
        filename: row.try_get("filename")?,
        original_key: row.try_get("original_key")?,
        processed_key: row.try_get("processed_key")?,
        thumbnail_key: row.try_get("thumbnail_key")?,
        mime_type: row.try_get("mime_type")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        status: str_to_file_status(row.try_get("status")?),
        metadata: metadata_json.map(|s| serde_json::from_str(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
    })
}

fn parse_rfc3339(raw: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn kind_to_str(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Triage => "triage",
        JobKind::Selection => "selection",
        JobKind::Description => "description",
    }
}

fn str_to_kind(raw: String) -> JobKind {
    match raw.as_str() {
        "selection" => JobKind::Selection,
        "description" => JobKind::Description,
        _ => JobKind::Triage,
    }
}

fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Complete => "complete",
        JobStatus::Error => "error",
        JobStatus::Cancelled => "cancelled",
    }
}

fn str_to_status(raw: String) -> JobStatus {
    match raw.as_str() {
        "processing" => JobStatus::Processing,
        "complete" => JobStatus::Complete,
        "error" => JobStatus::Error,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

fn phase_to_str(phase: JobPhase) -> &'static str {
    match phase {
        JobPhase::Uploading => "uploading",
        JobPhase::Processing => "processing",
        JobPhase::Analyzing => "analyzing",
        JobPhase::GeminiProcessing => "gemini_processing",
        JobPhase::Done => "done",
    }
}

fn str_to_phase(raw: String) -> JobPhase {
    match raw.as_str() {
        "processing" => JobPhase::Processing,
        "analyzing" => JobPhase::Analyzing,
        "gemini_processing" => JobPhase::GeminiProcessing,
        "done" => JobPhase::Done,
        _ => JobPhase::Uploading,
    }
}

fn status_to_str_file(status: FileResultStatus) -> &'static str {
    match status {
        FileResultStatus::Pending => "pending",
        FileResultStatus::Valid => "valid",
        FileResultStatus::Invalid => "invalid",
        FileResultStatus::Error => "error",
    }
}

fn str_to_file_status(raw: String) -> FileResultStatus {
    match raw.as_str() {
        "valid" => FileResultStatus::Valid,
        "invalid" => FileResultStatus::Invalid,
        "error" => FileResultStatus::Error,
        _ => FileResultStatus::Pending,
    }
}
