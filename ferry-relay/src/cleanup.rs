//! Background maintenance task.
//!
//! Tunnels expire through their own session timers; this task only trims
//! rate-limiter state and reports how many tunnels are live.

use crate::config::CleanupConfig;
use crate::server::FerryRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background maintenance task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<FerryRelay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&relay);
        }
    })
}

/// One maintenance pass.
pub fn run_once(relay: &FerryRelay) {
    let before = relay.rate_limits().upload_keys_count();
    relay.rate_limits().shrink();
    let after = relay.rate_limits().upload_keys_count();
    if before > after {
        tracing::info!("Cleanup: evicted {} idle rate limit keys", before - after);
    }
    tracing::debug!(
        active = relay.active_tunnels(),
        pending = relay.registry().len().saturating_sub(relay.active_tunnels()),
        "Cleanup: tunnel census"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let relay = Arc::new(FerryRelay::standalone(Config::default()));
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(relay, config);

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_keeps_running() {
        let relay = Arc::new(FerryRelay::standalone(Config::default()));
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: true,
        };

        let handle = spawn_cleanup_task(relay, config);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn run_once_leaves_tunnels_alone() {
        let relay = FerryRelay::standalone(Config::default());
        let _reservation = relay.registry().reserve().unwrap();
        relay
            .rate_limits()
            .check_upload(&"192.0.2.1".parse().unwrap())
            .unwrap();

        run_once(&relay);
        assert_eq!(relay.registry().len(), 1);
    }
}
