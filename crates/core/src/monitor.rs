//! Heartbeat / lifecycle monitor
//!
//! A background task that periodically evicts endpoints whose liveness
//! deadline has passed. Deadlines live in the registry; the monitor only
//! decides when to look.

use crate::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Background eviction task
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tandem_core::{LifecycleMonitor, MatchmakingConfig, Registry};
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(Registry::new(MatchmakingConfig::default()).unwrap());
/// let monitor = LifecycleMonitor::spawn_with_interval(registry, Duration::from_millis(50));
/// assert!(monitor.is_running());
/// monitor.shutdown().await;
/// # });
/// ```
pub struct LifecycleMonitor;

impl LifecycleMonitor {
    /// Start sweeping with the registry's configured interval
    pub fn spawn(registry: Arc<Registry>) -> MonitorHandle {
        let interval = registry.config().sweep_interval();
        Self::spawn_with_interval(registry, interval)
    }

    /// Start sweeping every `interval`
    pub fn spawn_with_interval(registry: Arc<Registry>, interval: Duration) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        info!("Starting lifecycle monitor (sweep every {:?})", interval);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_expired(Instant::now());
                        if !evicted.is_empty() {
                            debug!("Sweep evicted {} endpoint(s)", evicted.len());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Lifecycle monitor received shutdown signal");
                        break;
                    }
                }
            }
        });

        MonitorHandle { shutdown_tx, task }
    }
}

/// Handle for stopping the monitor
pub struct MonitorHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the monitor and wait for its task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        info!("Lifecycle monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
