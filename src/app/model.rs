use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::IngestionProgress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: IngestionProgress,
    pub progress_percent: u32,
    pub message: String,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub request: StartScrapeRequest,
    pub concurrency_limit: Option<usize>,
    pub product_ids: Vec<Uuid>,
}

impl ScrapeJob {
    pub fn new(job_id: impl Into<String>, request: StartScrapeRequest) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: IngestionProgress::new(request.links.len()),
            progress_percent: 0,
            message: "queued".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            request,
            concurrency_limit: None,
            product_ids: Vec::new(),
        }
    }

    pub fn apply_progress(&mut self, progress: IngestionProgress) {
        self.progress = progress;
        self.progress_percent = progress.percent();
    }
}

/// Either a catalog page to discover links on, or the detail links
/// themselves. Explicit links win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartScrapeRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    /// Overrides the host-derived concurrency tier.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl StartScrapeRequest {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.links.is_empty() && self.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            anyhow::bail!("either url or links is required");
        }
        if self.concurrency == Some(0) {
            anyhow::bail!("concurrency must be at least 1");
        }
        Ok(())
    }
}
