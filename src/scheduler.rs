use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pipeline::{Pipeline, RunReport};

/// One unit of scheduled work.
#[async_trait]
pub trait SyncJob: Send + Sync {
    async fn run(&self) -> Result<RunReport>;
}

#[async_trait]
impl SyncJob for Pipeline {
    async fn run(&self) -> Result<RunReport> {
        self.run_once().await
    }
}

pub enum Trigger {
    Started(JoinHandle<()>),
    /// A previous run was still in progress.
    Skipped,
}

/// Runs a job on a fixed interval, never two at once.
pub struct Scheduler {
    job: Arc<dyn SyncJob>,
    interval: Duration,
    startup_delay: Duration,
    running: Arc<AtomicBool>,
}

/// Clears the running flag however the run ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(job: Arc<dyn SyncJob>, interval: Duration, startup_delay: Duration) -> Self {
        Self {
            job,
            interval,
            startup_delay,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// First run after the startup delay, then one per interval until
    /// `shutdown` fires. An in-flight run is left to finish on its own task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            startup_delay_secs = self.startup_delay.as_secs(),
            "Scheduler started"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Scheduler stopped before first run");
                return;
            }
            _ = time::sleep(self.startup_delay) => {}
        }

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.trigger();
                }
            }
        }
    }

    /// Start a run on its own task unless one is already in progress.
    pub fn trigger(&self) -> Trigger {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Previous run still in progress, skipping this cycle");
            return Trigger::Skipped;
        }

        let guard = RunningGuard(self.running.clone());
        let job = self.job.clone();
        Trigger::Started(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = job.run().await {
                error!(error = %e, "Scheduled run failed");
            }
        }))
    }
}
