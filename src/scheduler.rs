//! Sweep scheduler
//!
//! Runs the cleanup sweeps on fixed intervals, independent of request
//! traffic. The scheduler has explicit start/stop and takes its notion of
//! time from an injectable [`Clock`], so sweeps are testable without
//! wall-clock waits.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::services::cleanup::CleanupService;

/// Source of "now" for time-driven transitions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct Scheduler {
    cleanup: Arc<CleanupService>,
    clock: Arc<dyn Clock>,
    pickup_interval: Duration,
    purge_interval: Duration,
    stale_interval: Duration,
}

/// Handle to a running scheduler. Dropping it without calling
/// [`SchedulerHandle::stop`] leaves the sweeps running.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(cleanup: Arc<CleanupService>, clock: Arc<dyn Clock>, cfg: &AppConfig) -> Self {
        Self {
            cleanup,
            clock,
            pickup_interval: Duration::from_secs(cfg.pickup_sweep_interval_secs),
            purge_interval: Duration::from_secs(cfg.purge_sweep_interval_secs),
            stale_interval: Duration::from_secs(cfg.stale_sweep_interval_secs),
        }
    }

    /// Spawns the three sweep loops and returns a stop handle.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(3);

        // Purge before mark: an approved request past its pickup date must
        // be restored and removed, never merely flagged.
        {
            let cleanup = self.cleanup.clone();
            let clock = self.clock.clone();
            let rx = shutdown_rx.clone();
            tasks.push(spawn_sweep_loop("purge_expired", self.purge_interval, rx, move || {
                let cleanup = cleanup.clone();
                let clock = clock.clone();
                async move {
                    cleanup
                        .purge_expired_approved(clock.now())
                        .await
                        .map(|r| (r.affected, r.failed))
                }
            }));
        }

        {
            let cleanup = self.cleanup.clone();
            let clock = self.clock.clone();
            let rx = shutdown_rx.clone();
            tasks.push(spawn_sweep_loop("pickup_missed", self.pickup_interval, rx, move || {
                let cleanup = cleanup.clone();
                let clock = clock.clone();
                async move {
                    cleanup
                        .mark_missed_pickups(clock.now())
                        .await
                        .map(|r| (r.affected, r.failed))
                }
            }));
        }

        {
            let cleanup = self.cleanup.clone();
            let clock = self.clock.clone();
            let rx = shutdown_rx;
            tasks.push(spawn_sweep_loop("stale_requests", self.stale_interval, rx, move || {
                let cleanup = cleanup.clone();
                let clock = clock.clone();
                async move {
                    cleanup
                        .purge_stale(clock.now())
                        .await
                        .map(|r| (r.affected, r.failed))
                }
            }));
        }

        info!("Cleanup scheduler started");
        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

impl SchedulerHandle {
    /// Signals every sweep loop to stop and waits for them to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Cleanup scheduler stopped");
    }
}

fn spawn_sweep_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(u64, u64), crate::errors::ServiceError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; skip it so startup traffic and
        // sweeps do not pile up at once.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep().await {
                        Ok((affected, failed)) => {
                            if affected > 0 || failed > 0 {
                                info!(sweep = name, affected, failed, "Sweep completed");
                            }
                        }
                        Err(e) => {
                            error!(sweep = name, error = %e, "Sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(sweep = name, "Sweep loop stopping");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn fixed_clock_is_injectable() {
        let instant = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(instant));
        assert_eq!(clock.now(), instant);
        assert_eq!(clock.now(), instant);
    }
}
