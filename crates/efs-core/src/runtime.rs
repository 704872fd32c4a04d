//! Service runtime: startup, shutdown, and main event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{info, warn};

use efs_config::AppConfig;

use crate::connector::DaemonConnector;
use crate::ipc::server::{self, IpcState};
use crate::service::EfsService;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The EFS service process: one daemon connector, the operations facade on
/// top of it, and the local IPC front-end.
pub struct ServiceRuntime {
    config: AppConfig,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    service: Arc<EfsService>,
}

impl ServiceRuntime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let connector = DaemonConnector::new(config.daemon.clone());

        Self {
            config,
            shutdown_tx,
            _shutdown_rx,
            service: Arc::new(EfsService::new(connector)),
        }
    }

    /// Run until a shutdown is requested over IPC, through [`Self::shutdown`],
    /// or by Ctrl-C.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        info!(
            daemon_socket = %self.config.daemon.socket_path,
            service_socket = %self.config.service.socket_path,
            version = %crate::build_info::version_string(),
            "EFS service starting"
        );

        let worker = tokio::spawn(Arc::clone(self.service.connector()).run(
            self.service.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let ctrl_c_tx = self.shutdown_tx.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, initiating graceful shutdown");
                let _ = ctrl_c_tx.send(ShutdownSignal);
            }
        });

        let state = Arc::new(IpcState {
            config: self.config.clone(),
            service: self.service.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            started_at: Instant::now(),
        });
        let socket_path = PathBuf::from(&self.config.service.socket_path);
        let served = server::serve(&socket_path, state, self.shutdown_tx.subscribe()).await;

        // The server may have failed before any shutdown was requested.
        self.shutdown();
        ctrl_c.abort();
        if let Err(e) = worker.await {
            warn!(error = %e, "daemon connector task failed");
        }

        served.map_err(|source| RuntimeError::Serve {
            path: socket_path,
            source,
        })?;
        info!("EFS service stopped");
        Ok(())
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn service(&self) -> &Arc<EfsService> {
        &self.service
    }

    /// Get a reference to the runtime's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Errors from the service runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("IPC server on {path} failed: {source}")]
    Serve {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_creation() {
        let runtime = ServiceRuntime::new(AppConfig::default());
        assert_eq!(runtime.config().daemon.command_prefix, "efs-server");
        assert!(!runtime.service().connector().is_connected());
    }

    #[tokio::test]
    async fn test_runtime_shutdown() {
        let runtime = ServiceRuntime::new(AppConfig::default());
        // Shutdown should not panic
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_runtime_run_until_shutdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.daemon.socket_path = tmp.path().join("missing-daemon").display().to_string();
        config.daemon.reconnect_delay_ms = 10;
        config.service.socket_path = tmp.path().join("svc.sock").display().to_string();

        let runtime = Arc::new(ServiceRuntime::new(config));
        let handle = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(tmp.path().join("svc.sock").exists());

        runtime.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!tmp.path().join("svc.sock").exists());
    }
}
