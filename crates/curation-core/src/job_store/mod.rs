//! Job store. Durable per-session job records, backed by sqlite via `sqlx`.
//! Table access is split one repository per table.

mod error;
mod model;
mod repositories;

pub use error::JobStoreError;
pub use model::{
    DescriptionOutcome, FileResult, FileResultStatus, Job, JobKind, JobOutcome, JobPhase,
    JobStatus, SceneGroup, SelectionOutcome, TriageOutcome,
};
pub use repositories::{FileResultRepository, JobRepository};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Façade over the two repositories, the handle the rest of the crate
/// depends on.
#[derive(Clone)]
pub struct JobStore {
    jobs: std::sync::Arc<JobRepository>,
    file_results: std::sync::Arc<FileResultRepository>,
}

impl JobStore {
    /// Connects and runs migrations before handing out a pool.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            jobs: std::sync::Arc::new(JobRepository::new(pool.clone())),
            file_results: std::sync::Arc::new(FileResultRepository::new(pool)),
        }
    }

    #[must_use]
    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    #[must_use]
    pub fn file_results(&self) -> &FileResultRepository {
        &self.file_results
    }
}
