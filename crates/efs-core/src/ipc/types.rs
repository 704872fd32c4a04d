//! Shared request/response types for the service IPC.
//!
//! These types are serialized as JSON over the Unix domain socket
//! transport. Both the IPC server (service) and client (CLI) use them.

use serde::{Deserialize, Serialize};

use crate::command::UserId;
use crate::password::Password;

/// Result of every storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultResponse {
    pub code: i32,
}

/// Operations taking only a storage path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePathRequest {
    pub path: String,
}

/// Operations taking a storage path and a password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePasswordRequest {
    pub path: String,
    pub password: Password,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageChangePasswordRequest {
    pub path: String,
    pub old_password: Password,
    pub new_password: Password,
}

/// Operations taking only a user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub user_id: UserId,
}

/// Operations taking a user id and a password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPasswordRequest {
    pub user_id: UserId,
    pub password: Password,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUnlockRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub from_init: bool,
    pub password: Password,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserChangePasswordRequest {
    pub user_id: UserId,
    pub old_password: Password,
    pub new_password: Password,
}

/// Service health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

/// Service runtime status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub daemon_connected: bool,
    pub daemon_socket: String,
    pub command_prefix: String,
    pub service_socket: String,
    pub pid: u32,
}

/// Service shutdown response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Configuration response (serialized TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub toml: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
