use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::app::model::ScrapeJob;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &ScrapeJob) -> anyhow::Result<()>;
    async fn get(&self, job_id: &str) -> anyhow::Result<Option<ScrapeJob>>;
    async fn put(&self, job: &ScrapeJob) -> anyhow::Result<()>;
    async fn remove(&self, job_id: &str) -> anyhow::Result<Option<ScrapeJob>>;
}

/// Jobs live only as long as the process; results are persisted in the
/// catalog, not here.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ScrapeJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &ScrapeJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            anyhow::bail!("job already exists: {}", job.job_id);
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> anyhow::Result<Option<ScrapeJob>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put(&self, job: &ScrapeJob) -> anyhow::Result<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> anyhow::Result<Option<ScrapeJob>> {
        Ok(self.jobs.write().await.remove(job_id))
    }
}
