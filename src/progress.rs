use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Snapshot of a running ingestion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionProgress {
    pub total_units: usize,
    pub completed_units: usize,
    pub active_units: usize,
    pub cancelled: bool,
}

impl IngestionProgress {
    pub fn new(total_units: usize) -> Self {
        Self {
            total_units,
            ..Self::default()
        }
    }

    /// `completed / total` in whole percent, rounded down so 100 means every
    /// unit has completed. An empty job counts as done.
    pub fn percent(&self) -> u32 {
        if self.total_units == 0 {
            return 100;
        }
        let completed = self.completed_units.min(self.total_units);
        (completed * 100 / self.total_units) as u32
    }

    pub fn is_drained(&self) -> bool {
        self.active_units == 0
            && (self.cancelled || self.completed_units >= self.total_units)
    }
}

/// Receives every progress change the scheduler makes.
///
/// Called inline from the admission loop, so implementations must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &IngestionProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&IngestionProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &IngestionProgress) {
        self(progress)
    }
}

/// Publishes snapshots on a watch channel for callers that poll or subscribe.
#[derive(Debug, Clone)]
pub struct WatchProgress(watch::Sender<IngestionProgress>);

impl WatchProgress {
    pub fn channel(total_units: usize) -> (Self, watch::Receiver<IngestionProgress>) {
        let (tx, rx) = watch::channel(IngestionProgress::new(total_units));
        (Self(tx), rx)
    }
}

impl ProgressObserver for WatchProgress {
    fn on_progress(&self, progress: &IngestionProgress) {
        self.0.send_replace(*progress);
    }
}

pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _progress: &IngestionProgress) {}
}
