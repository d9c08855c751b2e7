use std::path::PathBuf;

use chrono::Duration;

/// Process-level settings. Model tuning lives in `AdaptiveConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Set when `ENABLE_FILE_LOGS` is on.
    pub log_dir: Option<PathBuf>,
    pub item_catalog_path: Option<PathBuf>,
    pub calibration_schedule: String,
    pub session_cleanup_schedule: String,
    pub session_max_idle_minutes: i64,
    pub enable_calibration_worker: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let log_dir = env_flag("ENABLE_FILE_LOGS").then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });

        let item_catalog_path = std::env::var("ITEM_CATALOG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let calibration_schedule = std::env::var("CALIBRATION_SCHEDULE")
            .unwrap_or_else(|_| "0 0 3 * * *".to_string());
        let session_cleanup_schedule = std::env::var("SESSION_CLEANUP_SCHEDULE")
            .unwrap_or_else(|_| "0 */10 * * * *".to_string());

        let session_max_idle_minutes = std::env::var("SESSION_MAX_IDLE_MINUTES")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(60);

        let enable_calibration_worker = std::env::var("ENABLE_CALIBRATION_WORKER")
            .map(|value| value != "false" && value != "0")
            .unwrap_or(true);

        Self {
            log_level,
            log_dir,
            item_catalog_path,
            calibration_schedule,
            session_cleanup_schedule,
            session_max_idle_minutes,
            enable_calibration_worker,
        }
    }

    pub fn session_max_idle(&self) -> Duration {
        Duration::minutes(self.session_max_idle_minutes)
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}
