use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::Instrument as _;

use crate::app::runner::ScrapeJobRunner;

/// Background executor for scrape jobs, `max_concurrency` jobs at a time.
///
/// Each job still bounds its own extractions; this limit caps how many jobs
/// hit the extractor together.
#[derive(Debug, Clone)]
pub struct ScrapeJobQueue {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl ScrapeJobQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs submitted but not yet holding a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn submit(&self, runner: Arc<ScrapeJobRunner>, job_id: String) {
        let span = tracing::info_span!("scrape_job", job_id = %job_id);
        self.spawn(
            async move {
                runner.run_job(&job_id).await;
            }
            .instrument(span),
        );
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let waiting = Arc::clone(&self.waiting);
        waiting.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::SeqCst);
            let Ok(_permit) = permit else {
                tracing::error!("scrape queue closed; dropping job");
                return;
            };
            fut.await;
        });
    }
}
