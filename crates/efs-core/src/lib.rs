#![deny(unsafe_code)]

//! EFS service core.
//!
//! Talks to the native `efs-server` daemon over its control socket and
//! exposes the encrypted file storage operations as plain integer result
//! codes. The service process wraps this in a local IPC front-end that the
//! `efsctl` CLI talks to.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Daemon command encoding and the operation catalog.
pub mod command;
/// Persistent daemon connection, reply correlation and events.
pub mod connector;
/// Service IPC over a Unix domain socket.
pub mod ipc;
/// Zeroizing password wrapper.
pub mod password;
/// Reply to result-code decoding.
pub mod result;
/// Service runtime and shutdown.
pub mod runtime;
/// The storage operations facade.
pub mod service;

pub use command::{Arg, Operation, UserId};
pub use connector::{ConnectorError, DaemonCallbacks, DaemonConnector, DaemonEvent, Reply};
pub use password::Password;
pub use result::{
    OPERATION_FAILED_INTERNAL_ERROR, OPERATION_FAILED_STORAGE_BUSY, OPERATION_SUCCEEDED,
    StorageState,
};
pub use runtime::ServiceRuntime;
pub use service::EfsService;
