#![deny(unsafe_code)]

//! Shared test utilities for the EFS workspace.
//!
//! Provides a scripted fake `efs-server` daemon, config builders, and
//! tracing helpers so that individual crate tests stay concise and
//! consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! efs-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod fake_daemon;
pub mod harness;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use fake_daemon::{FakeDaemon, FakeReply, ReceivedCommand};
pub use harness::TestService;
