//! Service IPC over a Unix domain socket for local callers.
//!
//! The service exposes the storage operations as an HTTP/JSON API over a
//! Unix socket. Every operation answers `{"code": <i32>}`; the integer is
//! the result, HTTP status codes only signal transport-level problems.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐         Unix socket        ┌──────────────┐
//! │  efsctl  │───────────────────────────▶│  IPC Server  │
//! │  callers │  HTTP/1.1 + JSON           │  (axum)      │
//! └──────────┘                            └──────┬───────┘
//!                                                │
//!                                         ┌──────▼───────┐   control socket
//!                                         │  EfsService  │──────────────────▶ efs-server
//!                                         └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError};
pub use server::IpcState;
pub use types::*;
