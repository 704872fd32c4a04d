//! IPC server: axum HTTP router over a Unix domain socket.
//!
//! The service binds a Unix socket and exposes one JSON route per storage
//! operation, plus health, status, config and stop routes.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::info;

use efs_config::AppConfig;

use super::types::*;
use crate::runtime::ShutdownSignal;
use crate::service::EfsService;

/// Shared state accessible to all IPC route handlers.
pub struct IpcState {
    pub config: AppConfig,
    pub service: Arc<EfsService>,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
    pub started_at: Instant,
}

/// Build the axum router with all IPC routes.
pub fn router(state: Arc<IpcState>) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/stop", post(handle_stop))
        .route("/config", get(handle_config))
        .route("/storage/create", post(handle_storage_create))
        .route("/storage/unlock", post(handle_storage_unlock))
        .route("/storage/lock", post(handle_storage_lock))
        .route("/storage/change-password", post(handle_storage_change_password))
        .route("/storage/remove", post(handle_storage_remove))
        .route("/storage/stat", post(handle_storage_stat))
        .route("/storage/recover", post(handle_storage_recover))
        .route("/storage/progress", post(handle_storage_progress))
        .route("/user/encrypt", post(handle_user_encrypt))
        .route("/user/unlock", post(handle_user_unlock))
        .route("/user/lock", post(handle_user_lock))
        .route("/user/change-password", post(handle_user_change_password))
        .route("/user/remove", post(handle_user_remove))
        .route("/user/stat", post(handle_user_stat))
        .route("/user/decrypt", post(handle_user_decrypt))
        .with_state(state)
}

/// Start the IPC server on the given Unix socket path.
///
/// Removes any stale socket file before binding. Runs until the
/// shutdown signal is received.
pub async fn serve(
    socket_path: &Path,
    state: Arc<IpcState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    // Remove stale socket file if it exists
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), "IPC server listening");

    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("IPC server shutting down");
        })
        .await?;

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

fn result(code: i32) -> Json<ResultResponse> {
    Json(ResultResponse { code })
}

// ── Service routes ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
    })
}

async fn handle_status(State(state): State<Arc<IpcState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: true,
        version: crate::build_info::version_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        daemon_connected: state.service.connector().is_connected(),
        daemon_socket: state.config.daemon.socket_path.clone(),
        command_prefix: state.config.daemon.command_prefix.clone(),
        service_socket: state.config.service.socket_path.clone(),
        pid: std::process::id(),
    })
}

async fn handle_stop(State(state): State<Arc<IpcState>>) -> (StatusCode, Json<StopResponse>) {
    info!("Stop requested via IPC");
    let _ = state.shutdown_tx.send(ShutdownSignal);
    (
        StatusCode::OK,
        Json(StopResponse {
            acknowledged: true,
            message: "Shutdown initiated".to_string(),
        }),
    )
}

async fn handle_config(
    State(state): State<Arc<IpcState>>,
) -> Result<Json<ConfigResponse>, (StatusCode, Json<ErrorResponse>)> {
    match toml::to_string_pretty(&state.config) {
        Ok(toml_str) => Ok(Json(ConfigResponse { toml: toml_str })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Failed to serialize config: {e}"),
            }),
        )),
    }
}

// ── EFS storage routes ──────────────────────────────────────────────────

async fn handle_storage_create(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePasswordRequest>,
) -> Json<ResultResponse> {
    result(state.service.create_efs_storage(&req.path, req.password).await)
}

async fn handle_storage_unlock(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePasswordRequest>,
) -> Json<ResultResponse> {
    result(state.service.unlock_efs_storage(&req.path, req.password).await)
}

async fn handle_storage_lock(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePathRequest>,
) -> Json<ResultResponse> {
    result(state.service.lock_efs_storage(&req.path).await)
}

async fn handle_storage_change_password(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StorageChangePasswordRequest>,
) -> Json<ResultResponse> {
    result(
        state
            .service
            .change_password_efs_storage(&req.path, req.old_password, req.new_password)
            .await,
    )
}

async fn handle_storage_remove(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePathRequest>,
) -> Json<ResultResponse> {
    result(state.service.remove_efs_storage(&req.path).await)
}

async fn handle_storage_stat(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePathRequest>,
) -> Json<ResultResponse> {
    result(state.service.efs_storage_stat(&req.path).await)
}

async fn handle_storage_recover(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePasswordRequest>,
) -> Json<ResultResponse> {
    result(
        state
            .service
            .recover_data_and_remove_efs_storage(&req.path, req.password)
            .await,
    )
}

async fn handle_storage_progress(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<StoragePathRequest>,
) -> Json<ResultResponse> {
    result(state.service.efs_encryption_progress(&req.path).await)
}

// ── User data routes ────────────────────────────────────────────────────

async fn handle_user_encrypt(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserPasswordRequest>,
) -> Json<ResultResponse> {
    result(state.service.encrypt_user_data(req.user_id, req.password).await)
}

async fn handle_user_unlock(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserUnlockRequest>,
) -> Json<ResultResponse> {
    result(
        state
            .service
            .unlock_user_data(req.user_id, req.from_init, req.password)
            .await,
    )
}

async fn handle_user_lock(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserRequest>,
) -> Json<ResultResponse> {
    result(state.service.lock_user_data(req.user_id).await)
}

async fn handle_user_change_password(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserChangePasswordRequest>,
) -> Json<ResultResponse> {
    result(
        state
            .service
            .change_user_data_password(req.user_id, req.old_password, req.new_password)
            .await,
    )
}

async fn handle_user_remove(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserRequest>,
) -> Json<ResultResponse> {
    result(state.service.remove_user_encrypted_data(req.user_id).await)
}

async fn handle_user_stat(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserRequest>,
) -> Json<ResultResponse> {
    result(state.service.user_encrypted_data_stat(req.user_id).await)
}

async fn handle_user_decrypt(
    State(state): State<Arc<IpcState>>,
    Json(req): Json<UserPasswordRequest>,
) -> Json<ResultResponse> {
    result(state.service.decrypt_user_data(req.user_id, req.password).await)
}
