//! IPC client. Connects to the EFS service over a Unix domain socket.
//!
//! Provides a typed client for `efsctl` and other local callers. Uses
//! `hyper` for HTTP/1.1 over the Unix socket.

use std::path::PathBuf;

use http_body_util::Full;
use hyper::body::{Buf, Bytes};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::debug;
use zeroize::Zeroizing;

use super::types::*;
use crate::command::UserId;
use crate::password::Password;

/// Errors from the IPC client.
#[derive(Debug, thiserror::Error)]
pub enum IpcClientError {
    #[error("failed to connect to service socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("service is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service returned error: {0}")]
    ServiceError(String),
}

/// Client for the EFS service socket.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Check if the service socket exists (service is likely running).
    pub fn service_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send an HTTP request over the Unix socket and return the response body.
    async fn request(
        &self,
        method: hyper::Method,
        path: &str,
        body: Option<Zeroizing<Vec<u8>>>,
    ) -> Result<Bytes, IpcClientError> {
        if !self.service_available() {
            return Err(IpcClientError::NotRunning(self.socket_path.clone()));
        }

        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        let io = TokioIo::new(stream);

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, Full<RequestBuf>>(io)
                .await
                .map_err(|e| IpcClientError::Request(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "IPC connection error");
            }
        });

        debug!(%method, path, "IPC request");

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req_body = Full::new(RequestBuf {
            data: body.unwrap_or_default(),
            pos: 0,
        });

        let req = builder
            .body(req_body)
            .map_err(|e| IpcClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| IpcClientError::Request(format!("request failed: {e}")))?;

        let status = resp.status();

        let resp_body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| IpcClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&resp_body) {
                return Err(IpcClientError::ServiceError(err.error));
            }
            return Err(IpcClientError::Request(format!(
                "unexpected status: {status}"
            )));
        }

        Ok(resp_body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, IpcClientError> {
        let body = self.request(hyper::Method::GET, path, None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("{path}: {e}")))
    }

    /// POST a JSON request to an operation route and return its result code.
    async fn call<R: Serialize>(&self, path: &str, req: &R) -> Result<i32, IpcClientError> {
        // The request may carry passwords.
        let body_bytes = Zeroizing::new(
            serde_json::to_vec(req)
                .map_err(|e| IpcClientError::Parse(format!("failed to serialize request: {e}")))?,
        );
        let body = self
            .request(hyper::Method::POST, path, Some(body_bytes))
            .await?;
        let resp: ResultResponse = serde_json::from_slice(&body)
            .map_err(|e| IpcClientError::Parse(format!("{path}: {e}")))?;
        Ok(resp.code)
    }

    // ── Service API ────────────────────────────────────────────────────

    /// Health check: is the service running and responsive?
    pub async fn health(&self) -> Result<HealthResponse, IpcClientError> {
        self.get("/health").await
    }

    /// Get service status.
    pub async fn status(&self) -> Result<StatusResponse, IpcClientError> {
        self.get("/status").await
    }

    /// Request service shutdown.
    pub async fn stop(&self) -> Result<StopResponse, IpcClientError> {
        let body = self.request(hyper::Method::POST, "/stop", None).await?;
        serde_json::from_slice(&body).map_err(|e| IpcClientError::Parse(format!("stop: {e}")))
    }

    /// Get the service's current config as TOML.
    pub async fn config(&self) -> Result<ConfigResponse, IpcClientError> {
        self.get("/config").await
    }

    // ── EFS storage ────────────────────────────────────────────────────

    pub async fn create_efs_storage(
        &self,
        path: &str,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = StoragePasswordRequest {
            path: path.to_string(),
            password: password.into(),
        };
        self.call("/storage/create", &req).await
    }

    pub async fn unlock_efs_storage(
        &self,
        path: &str,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = StoragePasswordRequest {
            path: path.to_string(),
            password: password.into(),
        };
        self.call("/storage/unlock", &req).await
    }

    pub async fn lock_efs_storage(&self, path: &str) -> Result<i32, IpcClientError> {
        self.call("/storage/lock", &storage_path(path)).await
    }

    pub async fn change_password_efs_storage(
        &self,
        path: &str,
        old_password: impl Into<Password>,
        new_password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = StorageChangePasswordRequest {
            path: path.to_string(),
            old_password: old_password.into(),
            new_password: new_password.into(),
        };
        self.call("/storage/change-password", &req).await
    }

    pub async fn remove_efs_storage(&self, path: &str) -> Result<i32, IpcClientError> {
        self.call("/storage/remove", &storage_path(path)).await
    }

    pub async fn efs_storage_stat(&self, path: &str) -> Result<i32, IpcClientError> {
        self.call("/storage/stat", &storage_path(path)).await
    }

    pub async fn recover_data_and_remove_efs_storage(
        &self,
        path: &str,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = StoragePasswordRequest {
            path: path.to_string(),
            password: password.into(),
        };
        self.call("/storage/recover", &req).await
    }

    pub async fn efs_encryption_progress(&self, path: &str) -> Result<i32, IpcClientError> {
        self.call("/storage/progress", &storage_path(path)).await
    }

    // ── User data ──────────────────────────────────────────────────────

    pub async fn encrypt_user_data(
        &self,
        user_id: UserId,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = UserPasswordRequest {
            user_id,
            password: password.into(),
        };
        self.call("/user/encrypt", &req).await
    }

    pub async fn unlock_user_data(
        &self,
        user_id: UserId,
        from_init: bool,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = UserUnlockRequest {
            user_id,
            from_init,
            password: password.into(),
        };
        self.call("/user/unlock", &req).await
    }

    pub async fn lock_user_data(&self, user_id: UserId) -> Result<i32, IpcClientError> {
        self.call("/user/lock", &UserRequest { user_id }).await
    }

    pub async fn change_user_data_password(
        &self,
        user_id: UserId,
        old_password: impl Into<Password>,
        new_password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = UserChangePasswordRequest {
            user_id,
            old_password: old_password.into(),
            new_password: new_password.into(),
        };
        self.call("/user/change-password", &req).await
    }

    pub async fn remove_user_encrypted_data(&self, user_id: UserId) -> Result<i32, IpcClientError> {
        self.call("/user/remove", &UserRequest { user_id }).await
    }

    pub async fn user_encrypted_data_stat(&self, user_id: UserId) -> Result<i32, IpcClientError> {
        self.call("/user/stat", &UserRequest { user_id }).await
    }

    pub async fn decrypt_user_data(
        &self,
        user_id: UserId,
        password: impl Into<Password>,
    ) -> Result<i32, IpcClientError> {
        let req = UserPasswordRequest {
            user_id,
            password: password.into(),
        };
        self.call("/user/decrypt", &req).await
    }
}

/// Request body handed to hyper by value and wiped when hyper drops it.
///
/// hyper may still copy small bodies into its own write buffer, which is
/// not zeroized.
struct RequestBuf {
    data: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl Buf for RequestBuf {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, cnt: usize) {
        self.pos = (self.pos + cnt).min(self.data.len());
    }
}

fn storage_path(path: &str) -> StoragePathRequest {
    StoragePathRequest {
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_buf_tracks_position() {
        let mut buf = RequestBuf {
            data: Zeroizing::new(b"{\"password\":\"pw\"}".to_vec()),
            pos: 0,
        };
        assert_eq!(buf.remaining(), 17);
        buf.advance(13);
        assert_eq!(buf.chunk(), b"pw\"}");
        buf.advance(100);
        assert_eq!(buf.remaining(), 0);
        assert!(buf.chunk().is_empty());
    }

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new("/tmp/test-efs-service.sock");
        assert!(!client.service_available()); // socket doesn't exist
    }

    #[tokio::test]
    async fn test_client_not_running_error() {
        let client = IpcClient::new("/tmp/nonexistent-efs-service.sock");
        let result = client.health().await;
        assert!(matches!(result, Err(IpcClientError::NotRunning(_))));

        let result = client.lock_user_data(10).await;
        assert!(matches!(result, Err(IpcClientError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_integration_server_client() {
        use std::sync::Arc;
        use std::time::Instant;
        use tokio::sync::broadcast;

        use super::super::server;
        use crate::connector::DaemonConnector;
        use crate::service::EfsService;

        let config = efs_config::AppConfig::default();
        let (shutdown_tx, _) = broadcast::channel(1);
        let connector = DaemonConnector::new(config.daemon.clone());

        let state = Arc::new(server::IpcState {
            config,
            service: Arc::new(EfsService::new(connector)),
            shutdown_tx: shutdown_tx.clone(),
            started_at: Instant::now(),
        });

        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("efs-service.sock");

        let sock_path_clone = sock_path.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let server_handle = tokio::spawn(async move {
            server::serve(&sock_path_clone, state, shutdown_rx)
                .await
                .unwrap();
        });

        // Give server time to bind
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let client = IpcClient::new(&sock_path);
        assert!(client.service_available());

        let health = client.health().await.unwrap();
        assert_eq!(health.status, "ok");

        let status = client.status().await.unwrap();
        assert!(status.running);
        assert!(!status.daemon_connected);

        let config = client.config().await.unwrap();
        assert!(config.toml.contains("efs-server"));

        // No daemon behind the service: every operation is an internal error.
        assert_eq!(client.create_efs_storage("/data/x", "pw1").await.unwrap(), -1);
        assert_eq!(client.unlock_user_data(10, true, "pw").await.unwrap(), -1);

        let stop = client.stop().await.unwrap();
        assert!(stop.acknowledged);

        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), server_handle).await;
        assert!(!sock_path.exists());
    }
}
