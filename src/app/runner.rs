use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::app::job_store::JobStore;
use crate::app::model::{JobStatus, ScrapeJob};
use crate::catalog::CatalogSink;
use crate::extract::Extractor;
use crate::progress::{IngestionProgress, WatchProgress};
use crate::scrape::{
    HostSignals, ScrapeOptions, estimate_concurrency, ingest_products, scrape_links,
};

pub struct ScrapeJobRunner {
    job_store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    catalog: Arc<dyn CatalogSink>,
    call_timeout: Duration,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl ScrapeJobRunner {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        catalog: Arc<dyn CatalogSink>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            job_store,
            extractor,
            catalog,
            call_timeout,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Must be called at submit time so a job can be cancelled while queued.
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), token.clone());
        token
    }

    /// Returns `false` when the job is unknown or already finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancellations = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cancellations.get(job_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(job_id, "scrape job cancellation requested");
                true
            }
            None => false,
        }
    }

    fn token_for(&self, job_id: &str) -> CancellationToken {
        let mut cancellations = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cancellations
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    fn forget(&self, job_id: &str) {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
    }

    pub async fn run_job(&self, job_id: &str) {
        if let Err(err) = self.try_run_job(job_id).await {
            tracing::error!(job_id, ?err, "scrape job failed");
            let _ = self.mark_error(job_id, format!("{err:#}")).await;
        }
        self.forget(job_id);
    }

    async fn try_run_job(&self, job_id: &str) -> anyhow::Result<()> {
        let mut job = self
            .job_store
            .get(job_id)
            .await
            .context("load job")?
            .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;
        let cancel = self.token_for(job_id);

        if cancel.is_cancelled() {
            job.status = JobStatus::Cancelled;
            job.progress.cancelled = true;
            job.message = "cancelled before start".to_string();
            job.finished_at = Some(Utc::now());
            self.job_store.put(&job).await.context("save job")?;
            return Ok(());
        }

        self.mark_running(&mut job).await.context("mark running")?;

        let links = self.resolve_links(&mut job).await?;
        let limit = job
            .request
            .concurrency
            .unwrap_or_else(|| estimate_concurrency(HostSignals::detect()));
        job.concurrency_limit = Some(limit);
        job.apply_progress(IngestionProgress::new(links.len()));
        self.update_message(&mut job, "extracting products").await?;

        let (observer, rx) = WatchProgress::channel(links.len());
        let final_rx = rx.clone();
        let forwarder = spawn_progress_forwarder(Arc::clone(&self.job_store), job_id, rx);

        let result = ingest_products(
            Arc::clone(&self.extractor),
            &links,
            ScrapeOptions::new(limit, self.call_timeout),
            &observer,
            &cancel,
            self.catalog.as_ref(),
        )
        .await;
        drop(observer);
        let _ = forwarder.await;

        let records = result.context("ingest products")?;
        let progress = *final_rx.borrow();

        // Reload: the forwarder has been writing progress into the store.
        if let Some(latest) = self.job_store.get(job_id).await.context("reload job")? {
            job = latest;
        }
        job.apply_progress(progress);
        job.product_ids = records.iter().filter_map(|r| r.id).collect();
        job.finished_at = Some(Utc::now());
        if progress.cancelled {
            job.status = JobStatus::Cancelled;
            job.message = format!("cancelled; saved {} products", records.len());
        } else {
            job.status = JobStatus::Done;
            job.message = format!("saved {} products", records.len());
        }
        self.job_store.put(&job).await.context("save job")?;

        tracing::info!(job_id, status = ?job.status, products = records.len(), "scrape job finished");
        Ok(())
    }

    async fn resolve_links(&self, job: &mut ScrapeJob) -> anyhow::Result<Vec<Url>> {
        if !job.request.links.is_empty() {
            return job
                .request
                .links
                .iter()
                .map(|raw| Url::parse(raw.trim()).with_context(|| format!("parse link: {raw}")))
                .collect();
        }

        let Some(root) = job.request.url.clone() else {
            anyhow::bail!("either url or links is required");
        };
        let root = Url::parse(root.trim()).with_context(|| format!("parse url: {root}"))?;
        self.update_message(job, "discovering links").await?;
        let links = scrape_links(self.extractor.as_ref(), &root)
            .await
            .context("scrape links")?;
        job.request.links = links.iter().map(Url::to_string).collect();
        Ok(links)
    }

    async fn mark_running(&self, job: &mut ScrapeJob) -> anyhow::Result<()> {
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.message = "starting".to_string();
        self.job_store.put(job).await.context("save job")?;
        Ok(())
    }

    async fn mark_error(&self, job_id: &str, message: String) -> anyhow::Result<()> {
        let Some(mut job) = self.job_store.get(job_id).await? else {
            return Ok(());
        };
        job.status = JobStatus::Error;
        job.message = message;
        job.finished_at = Some(Utc::now());
        self.job_store.put(&job).await?;
        Ok(())
    }

    async fn update_message(&self, job: &mut ScrapeJob, message: &str) -> anyhow::Result<()> {
        job.message = message.to_string();
        self.job_store.put(job).await.context("save job")?;
        Ok(())
    }
}

fn spawn_progress_forwarder(
    job_store: Arc<dyn JobStore>,
    job_id: &str,
    mut rx: tokio::sync::watch::Receiver<IngestionProgress>,
) -> tokio::task::JoinHandle<()> {
    let job_id = job_id.to_string();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = *rx.borrow_and_update();
            match job_store.get(&job_id).await {
                Ok(Some(mut job)) => {
                    job.apply_progress(progress);
                    if let Err(err) = job_store.put(&job).await {
                        tracing::warn!(job_id, ?err, "failed to save job progress");
                    }
                }
                Ok(None) => break,
                Err(err) => tracing::warn!(job_id, ?err, "failed to load job for progress"),
            }
        }
    })
}
