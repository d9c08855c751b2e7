use std::time::Instant;

use chrono::Duration;
use tracing::{debug, info};

use crate::adaptive::AdaptiveEngine;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CleanupStats {
    pub terminated_sessions: usize,
    pub abandoned_sessions: usize,
    pub remaining_sessions: usize,
    pub duration_secs: f64,
}

pub fn cleanup_idle_sessions(engine: &AdaptiveEngine, max_idle: Duration) -> CleanupStats {
    let start = Instant::now();
    debug!("Starting session cleanup cycle");

    let evicted = engine.cleanup_sessions(max_idle);
    let stats = CleanupStats {
        terminated_sessions: evicted.terminated,
        abandoned_sessions: evicted.abandoned,
        remaining_sessions: evicted.remaining,
        duration_secs: start.elapsed().as_secs_f64(),
    };

    if evicted.evicted() > 0 {
        info!(
            terminated_sessions = stats.terminated_sessions,
            abandoned_sessions = stats.abandoned_sessions,
            remaining_sessions = stats.remaining_sessions,
            duration_secs = format!("{:.2}", stats.duration_secs),
            "Session cleanup completed"
        );
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::{AdaptiveConfig, ItemFilter, Item, ItemParams, SessionBudget};

    #[tokio::test]
    async fn test_cleanup_keeps_recent_sessions() {
        let engine = AdaptiveEngine::in_memory(
            AdaptiveConfig::default(),
            vec![Item::new("a", ItemParams::default())],
        );
        let sid = engine
            .start_session("l", ItemFilter::all(), SessionBudget::unbounded())
            .await
            .unwrap();

        let stats = cleanup_idle_sessions(&engine, Duration::minutes(30));
        assert_eq!(stats.remaining_sessions, 1);
        assert_eq!(stats.abandoned_sessions, 0);

        let stats = cleanup_idle_sessions(&engine, Duration::zero());
        assert_eq!(stats.abandoned_sessions, 1);
        assert_eq!(stats.remaining_sessions, 0);
        assert!(engine.session_summary(&sid).await.is_err());
    }
}
