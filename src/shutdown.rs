//! Graceful shutdown handling.
//!
//! This module provides:
//! - Signal handling (SIGTERM, SIGINT, SIGHUP)
//! - Draining of in-flight tool calls with a configurable timeout
//! - Flushing every schema cache to disk before exit

use crate::constants::DEFAULT_DRAIN_TIMEOUT;
use crate::registry::DatabaseRegistry;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }

    /// Check if shutdown has been signaled without blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Shutdown phases for coordinated cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Shutdown has been initiated.
    Initiated,

    /// Waiting for in-flight tool calls.
    DrainingRequests,

    /// Persisting schema caches.
    FlushingCaches,

    /// Final cleanup complete.
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::DrainingRequests => write!(f, "draining_requests"),
            ShutdownPhase::FlushingCaches => write!(f, "flushing_caches"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Timeout for draining in-flight tool calls.
    pub drain_timeout: Duration,

    /// Whether to persist caches before exit.
    pub flush_caches: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            flush_caches: true,
        }
    }
}

/// Counts a tool call as in flight until dropped.
pub struct RequestGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    shutting_down: AtomicBool,
    phase_sender: broadcast::Sender<ShutdownPhase>,
    active_requests: Arc<AtomicUsize>,
    config: ShutdownConfig,
}

impl ShutdownController {
    pub fn new(config: ShutdownConfig) -> Self {
        let (sender, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            phase_sender,
            active_requests: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to shutdown phase notifications.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_sender.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Mark a tool call as in flight.
    pub fn begin_request(&self) -> RequestGuard {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            active: self.active_requests.clone(),
        }
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown...");
            let _ = self.sender.send(true);
            let _ = self.phase_sender.send(ShutdownPhase::Initiated);
        }
    }

    fn notify_phase(&self, phase: ShutdownPhase) {
        info!("Shutdown phase: {}", phase);
        let _ = self.phase_sender.send(phase);
    }

    /// Drain in-flight calls, then flush every cache.
    pub async fn graceful_shutdown(&self, registry: &DatabaseRegistry) {
        self.shutdown();

        self.notify_phase(ShutdownPhase::DrainingRequests);
        self.drain_requests().await;

        self.notify_phase(ShutdownPhase::FlushingCaches);
        if self.config.flush_caches {
            let failures = registry.flush_all().await;
            if failures.is_empty() {
                info!("Flushed {} schema caches", registry.len());
            } else {
                for (database, e) in failures {
                    error!(database = %database, "Schema cache flush failed: {}", e);
                }
            }
        } else {
            info!("Cache flush disabled, skipping");
        }

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    /// Serve until the transport finishes or a shutdown signal arrives.
    ///
    /// Drain and flush run whatever the transport outcome; a transport error
    /// is returned after the caches are on disk.
    pub async fn run_until_shutdown<F, E>(
        &self,
        serve: F,
        registry: &DatabaseRegistry,
    ) -> std::result::Result<(), E>
    where
        F: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        let mut signal = self.signal();

        let result = tokio::select! {
            result = serve => {
                match &result {
                    Ok(()) => info!("Transport closed"),
                    Err(e) => error!("Transport error: {}", e),
                }
                result
            }
            _ = signal.recv() => {
                info!("Shutdown signal received");
                Ok(())
            }
        };

        self.graceful_shutdown(registry).await;
        result
    }

    async fn drain_requests(&self) {
        let start = std::time::Instant::now();

        loop {
            let running = self.active_requests();
            if running == 0 {
                info!("All requests drained");
                break;
            }

            if start.elapsed() > self.config.drain_timeout {
                warn!(
                    "Drain timeout exceeded with {} requests still running",
                    running
                );
                break;
            }

            info!("Waiting for {} in-flight requests to complete...", running);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a new shared shutdown controller.
pub fn new_shutdown_controller(config: ShutdownConfig) -> SharedShutdownController {
    Arc::new(ShutdownController::new(config))
}

/// Install signal handlers that trigger the shutdown controller.
pub fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, label) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", label);
                        controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", label, e);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaManager;
    use crate::source::snapshot::{Snapshot, SnapshotSource};
    use crate::source::SharedSource;

    fn fast_config() -> ShutdownConfig {
        ShutdownConfig {
            drain_timeout: Duration::from_millis(300),
            flush_caches: true,
        }
    }

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::default();
        let signal = controller.signal();
        assert!(!signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
    }

    #[test]
    fn test_request_guard_counts() {
        let controller = ShutdownController::default();
        let a = controller.begin_request();
        let b = controller.begin_request();
        assert_eq!(controller.active_requests(), 2);
        drop(a);
        drop(b);
        assert_eq!(controller.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_flushes_caches() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot: Snapshot =
            serde_json::from_value(serde_json::json!({"tables": [{"name": "EMPLOYEES"}]})).unwrap();
        let source: SharedSource = Arc::new(SnapshotSource::from_snapshot("hr", snapshot));
        let manager = Arc::new(SchemaManager::new("hr", source.clone(), dir.path()));

        let mut registry = DatabaseRegistry::new();
        registry
            .register("hr", source, manager.clone(), None)
            .unwrap();
        registry.initialize_all().await;
        std::fs::remove_file(manager.cache_path()).unwrap();

        let controller = new_shutdown_controller(fast_config());
        let mut phases = controller.subscribe_phases();
        controller.graceful_shutdown(&registry).await;

        assert!(manager.cache_path().exists());
        assert_eq!(phases.recv().await.unwrap(), ShutdownPhase::Initiated);
    }

    #[tokio::test]
    async fn test_drain_waits_for_requests() {
        let controller = new_shutdown_controller(fast_config());
        let guard = controller.begin_request();

        let c = controller.clone();
        let handle = tokio::spawn(async move {
            c.graceful_shutdown(&DatabaseRegistry::new()).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        handle.await.unwrap();
        assert_eq!(controller.active_requests(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_still_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot: Snapshot =
            serde_json::from_value(serde_json::json!({"tables": [{"name": "EMPLOYEES"}]})).unwrap();
        let source: SharedSource = Arc::new(SnapshotSource::from_snapshot("hr", snapshot));
        let manager = Arc::new(SchemaManager::new("hr", source.clone(), dir.path()));

        let mut registry = DatabaseRegistry::new();
        registry
            .register("hr", source, manager.clone(), None)
            .unwrap();
        registry.initialize_all().await;
        std::fs::remove_file(manager.cache_path()).unwrap();

        let controller = new_shutdown_controller(fast_config());
        let result = controller
            .run_until_shutdown(
                async { Err::<(), String>("stream did not contain valid UTF-8".to_string()) },
                &registry,
            )
            .await;

        assert_eq!(result.unwrap_err(), "stream did not contain valid UTF-8");
        assert!(manager.cache_path().exists());
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn test_stuck_request_does_not_block_exit() {
        let controller = new_shutdown_controller(fast_config());
        let _stuck = controller.begin_request();

        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            controller.run_until_shutdown(async { Ok::<(), String>(()) }, &DatabaseRegistry::new()),
        )
        .await;

        assert!(finished.is_ok());
        assert_eq!(controller.active_requests(), 1);
    }

    #[tokio::test]
    async fn test_signal_stops_serving() {
        let controller = new_shutdown_controller(fast_config());

        let trigger = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown();
        });

        let result = controller
            .run_until_shutdown(
                std::future::pending::<std::result::Result<(), String>>(),
                &DatabaseRegistry::new(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Initiated.to_string(), "initiated");
        assert_eq!(ShutdownPhase::DrainingRequests.to_string(), "draining_requests");
        assert_eq!(ShutdownPhase::FlushingCaches.to_string(), "flushing_caches");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
