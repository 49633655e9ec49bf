use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::orchestrator::RunTrigger;
use crate::service::IngestionService;

/// Timer that issues scheduled runs through the same entry point as
/// on-demand requests. The first run fires one interval after start.
pub struct Scheduler {
    service: Arc<IngestionService>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(service: Arc<IngestionService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            ticker.tick().await;
            let run_id = self.service.start_run(RunTrigger::Scheduled, None);
            info!(%run_id, "scheduled run started");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use crate::orchestrator::IngestionOrchestrator;

    #[tokio::test]
    async fn issues_scheduled_runs_on_each_tick() {
        let store = Arc::new(InMemoryObjectStore::new());
        let service = Arc::new(IngestionService::new(IngestionOrchestrator::new(Vec::new(), 2), store));
        let handle = Scheduler::new(Arc::clone(&service), Duration::from_millis(20)).spawn();

        let mut last = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            last = service.registry().last();
            if last.is_some() {
                break;
            }
        }
        handle.abort();

        let last = last.expect("a scheduled run finished");
        assert_eq!(last.run.trigger, RunTrigger::Scheduled);
    }
}
