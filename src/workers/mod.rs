mod calibration;
mod session_cleanup;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::adaptive::{AdaptiveEngine, AdaptiveError};
use crate::config::Config;

pub use calibration::{run_calibration_cycle, CalibrationCycleStats};
pub use session_cleanup::{cleanup_idle_sessions, CleanupStats};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub calibration_schedule: String,
    pub session_cleanup_schedule: String,
    pub session_max_idle: Duration,
    pub enable_calibration: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            calibration_schedule: config.calibration_schedule.clone(),
            session_cleanup_schedule: config.session_cleanup_schedule.clone(),
            session_max_idle: config.session_max_idle(),
            enable_calibration: config.enable_calibration_worker,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            calibration_schedule: "0 0 3 * * *".to_string(),
            session_cleanup_schedule: "0 */10 * * * *".to_string(),
            session_max_idle: Duration::minutes(60),
            enable_calibration: true,
        }
    }
}

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<AdaptiveEngine>,
    settings: WorkerSettings,
    running: AtomicBool,
}

impl WorkerManager {
    pub async fn new(engine: Arc<AdaptiveEngine>, settings: WorkerSettings) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            settings,
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        info!("Starting workers");

        let scheduler = self.scheduler.lock().await;

        if self.settings.enable_calibration {
            let schedule = self.settings.calibration_schedule.clone();
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = run_calibration_cycle(engine) => {
                            if let Err(e) = result {
                                error!(error = %e, "Calibration worker error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "Calibration worker scheduled");
        }

        {
            let schedule = self.settings.session_cleanup_schedule.clone();
            let max_idle = self.settings.session_max_idle;
            let engine = Arc::clone(&self.engine);
            let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                Box::pin(async move {
                    cleanup_idle_sessions(&engine, max_idle);
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(
                schedule = %schedule,
                max_idle_minutes = max_idle.num_minutes(),
                "Session cleanup worker scheduled"
            );
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("All workers started");

        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }

        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }

        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("Adaptive engine error: {0}")]
    Adaptive(#[from] AdaptiveError),
}
