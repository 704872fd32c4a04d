//! A connected [`EfsService`] for integration tests.
//!
//! [`TestService`] spawns the connector worker against a [`FakeDaemon`] and
//! waits for the first connection, so tests can issue operations right away.

use std::sync::Arc;
use std::time::Duration;

use efs_config::AppConfig;
use efs_core::connector::{DaemonCallbacks, NoCallbacks};
use efs_core::runtime::ShutdownSignal;
use efs_core::{DaemonConnector, EfsService};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;
use crate::fake_daemon::FakeDaemon;

/// An [`EfsService`] whose connector worker runs in the background.
///
/// The worker is shut down when this value is dropped.
pub struct TestService {
    pub service: EfsService,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    worker: Option<JoinHandle<()>>,
}

impl TestService {
    /// Connect to `daemon` with default test configuration.
    pub async fn connect(daemon: &FakeDaemon) -> Self {
        let config = TestConfigBuilder::new()
            .daemon_socket(daemon.socket_path())
            .build();
        Self::with_config(config, Arc::new(NoCallbacks)).await
    }

    /// Start the worker for `config` and wait until it is connected.
    pub async fn with_config(config: AppConfig, callbacks: Arc<dyn DaemonCallbacks>) -> Self {
        let connector = DaemonConnector::new(config.daemon);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = tokio::spawn(connector.clone().run(callbacks, shutdown_rx));

        assert!(
            connector.wait_connected(Duration::from_secs(5)).await,
            "connector did not reach the fake daemon"
        );

        Self {
            service: EfsService::new(connector),
            shutdown_tx,
            worker: Some(worker),
        }
    }

    pub fn connector(&self) -> &Arc<DaemonConnector> {
        self.service.connector()
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        if let Some(worker) = self.worker.take() {
            tokio::time::timeout(Duration::from_secs(5), worker)
                .await
                .expect("connector worker did not stop")
                .expect("connector worker panicked");
        }
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
