//! Mapping daemon replies to the integer result codes returned to callers.
//!
//! Every storage operation returns an `i32`. Success is `0`, a busy daemon
//! is reported as `405` so callers can retry later, and every other failure
//! is flattened to [`OPERATION_FAILED_INTERNAL_ERROR`].

use tracing::warn;

use crate::connector::{ConnectorError, Reply};

pub const OPERATION_SUCCEEDED: i32 = 0;
pub const OPERATION_FAILED_INTERNAL_ERROR: i32 = -1;
/// The daemon could not run the operation because the storage is busy.
pub const OPERATION_FAILED_STORAGE_BUSY: i32 = 405;

/// How the integer in a successful reply is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// `0` is success, anything else is a failure code.
    Status,
    /// A non-negative value is the answer (state, progress percentage).
    Query,
}

/// Decoded outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Payload of a query operation.
    Value(i32),
    Busy,
    InternalError,
}

impl Outcome {
    /// The integer code handed back to callers.
    pub fn code(self) -> i32 {
        match self {
            Outcome::Succeeded => OPERATION_SUCCEEDED,
            Outcome::Value(v) => v,
            Outcome::Busy => OPERATION_FAILED_STORAGE_BUSY,
            Outcome::InternalError => OPERATION_FAILED_INTERNAL_ERROR,
        }
    }
}

/// Decode the result of a daemon exchange.
pub fn decode(kind: ResultKind, result: Result<Reply, ConnectorError>) -> Outcome {
    let reply = match result {
        Ok(reply) => reply,
        Err(e) if e.is_busy() => return Outcome::Busy,
        Err(e) => {
            warn!(error = %e, "daemon command failed");
            return Outcome::InternalError;
        }
    };

    let value = match reply.message.trim().parse::<i32>() {
        Ok(v) => v,
        Err(_) => {
            warn!(code = reply.code, message = %reply.message, "unparseable daemon reply");
            return Outcome::InternalError;
        }
    };

    match kind {
        ResultKind::Status => match value {
            OPERATION_SUCCEEDED => Outcome::Succeeded,
            OPERATION_FAILED_STORAGE_BUSY => Outcome::Busy,
            _ => Outcome::InternalError,
        },
        ResultKind::Query if value >= 0 => Outcome::Value(value),
        ResultKind::Query => Outcome::InternalError,
    }
}

/// Encryption state reported by `stat` and `user_stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    NotStarted,
    InProgress,
    Completed,
}

impl StorageState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(StorageState::NotStarted),
            2 => Some(StorageState::InProgress),
            3 => Some(StorageState::Completed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(message: &str) -> Result<Reply, ConnectorError> {
        Ok(Reply::new(200, Some(1), message))
    }

    fn failed(code: u16) -> Result<Reply, ConnectorError> {
        Err(ConnectorError::Daemon {
            code,
            message: "nope".to_string(),
        })
    }

    #[test]
    fn test_zero_is_success_for_every_kind() {
        assert_eq!(decode(ResultKind::Status, ok("0")), Outcome::Succeeded);
        assert_eq!(decode(ResultKind::Query, ok("0")), Outcome::Value(0));
        assert_eq!(decode(ResultKind::Status, ok("0")).code(), 0);
        assert_eq!(decode(ResultKind::Query, ok("0")).code(), 0);
    }

    #[test]
    fn test_busy_status_is_preserved() {
        assert_eq!(decode(ResultKind::Status, failed(405)).code(), 405);
        assert_eq!(decode(ResultKind::Query, failed(405)).code(), 405);
        assert_eq!(decode(ResultKind::Status, ok("405")).code(), 405);
    }

    #[test]
    fn test_other_failures_are_flattened() {
        for code in [400, 500, 501, 502] {
            assert_eq!(decode(ResultKind::Status, failed(code)).code(), -1);
        }
        assert_eq!(decode(ResultKind::Status, ok("-5")).code(), -1);
        assert_eq!(decode(ResultKind::Status, ok("1")).code(), -1);
        assert_eq!(decode(ResultKind::Query, ok("-2")).code(), -1);
    }

    #[test]
    fn test_connection_faults_are_internal_errors() {
        assert_eq!(
            decode(ResultKind::Status, Err(ConnectorError::ConnectionLost)),
            Outcome::InternalError
        );
        assert_eq!(
            decode(ResultKind::Status, Err(ConnectorError::NotConnected)),
            Outcome::InternalError
        );
    }

    #[test]
    fn test_unparseable_message_is_internal_error() {
        assert_eq!(decode(ResultKind::Status, ok("Command okay")), Outcome::InternalError);
        assert_eq!(decode(ResultKind::Query, ok("")), Outcome::InternalError);
    }

    #[test]
    fn test_query_payload_passes_through() {
        assert_eq!(decode(ResultKind::Query, ok("3")), Outcome::Value(3));
        assert_eq!(decode(ResultKind::Query, ok(" 57 ")).code(), 57);
    }

    #[test]
    fn test_storage_state_codes() {
        assert_eq!(StorageState::from_code(1), Some(StorageState::NotStarted));
        assert_eq!(StorageState::from_code(2), Some(StorageState::InProgress));
        assert_eq!(StorageState::from_code(3), Some(StorageState::Completed));
        assert_eq!(StorageState::from_code(0), None);
        assert_eq!(StorageState::from_code(-1), None);
    }
}
