//! The EFS storage operations facade.
//!
//! Each method builds an [`Operation`], sends it through the
//! [`DaemonConnector`] and decodes the reply into an integer result code
//! (see [`crate::result`]). Nothing here retries and no error escapes:
//! callers always get an `i32`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{Operation, UserId};
use crate::connector::{DaemonCallbacks, DaemonConnector, DaemonEvent};
use crate::password::Password;
use crate::result::{self, StorageState};

/// Storage operations backed by the `efs-server` daemon.
#[derive(Clone)]
pub struct EfsService {
    connector: Arc<DaemonConnector>,
}

impl EfsService {
    pub fn new(connector: Arc<DaemonConnector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<DaemonConnector> {
        &self.connector
    }

    /// Run one operation and return its result code.
    pub async fn perform(&self, operation: Operation) -> i32 {
        let kind = operation.result_kind();
        let (subcommand, args) = operation.into_args();
        let result = self.connector.execute(subcommand, &args).await;
        let outcome = result::decode(kind, result);
        debug!(subcommand, ?outcome, "operation finished");
        outcome.code()
    }

    // ── EFS storage, identified by path ───────────────────────────────

    pub async fn create_efs_storage(&self, path: &str, password: impl Into<Password>) -> i32 {
        self.perform(Operation::CreateStorage {
            path: path.to_string(),
            password: password.into(),
        })
        .await
    }

    pub async fn unlock_efs_storage(&self, path: &str, password: impl Into<Password>) -> i32 {
        self.perform(Operation::UnlockStorage {
            path: path.to_string(),
            password: password.into(),
        })
        .await
    }

    pub async fn lock_efs_storage(&self, path: &str) -> i32 {
        self.perform(Operation::LockStorage {
            path: path.to_string(),
        })
        .await
    }

    pub async fn change_password_efs_storage(
        &self,
        path: &str,
        old_password: impl Into<Password>,
        new_password: impl Into<Password>,
    ) -> i32 {
        self.perform(Operation::ChangeStoragePassword {
            path: path.to_string(),
            old_password: old_password.into(),
            new_password: new_password.into(),
        })
        .await
    }

    pub async fn remove_efs_storage(&self, path: &str) -> i32 {
        self.perform(Operation::RemoveStorage {
            path: path.to_string(),
        })
        .await
    }

    /// Encryption state code of a storage (1 not started, 2 in progress,
    /// 3 completed) or a negative failure code.
    pub async fn efs_storage_stat(&self, path: &str) -> i32 {
        self.perform(Operation::StorageStat {
            path: path.to_string(),
        })
        .await
    }

    /// Decrypt the storage's data back in place and delete the container.
    pub async fn recover_data_and_remove_efs_storage(
        &self,
        path: &str,
        password: impl Into<Password>,
    ) -> i32 {
        self.perform(Operation::RecoverAndRemoveStorage {
            path: path.to_string(),
            password: password.into(),
        })
        .await
    }

    /// Encryption progress as reported by the daemon.
    pub async fn efs_encryption_progress(&self, path: &str) -> i32 {
        self.perform(Operation::EncryptionProgress {
            path: path.to_string(),
        })
        .await
    }

    /// Typed view of [`Self::efs_storage_stat`].
    pub async fn efs_storage_state(&self, path: &str) -> Option<StorageState> {
        StorageState::from_code(self.efs_storage_stat(path).await)
    }

    // ── User data, identified by Android user id ──────────────────────

    pub async fn encrypt_user_data(&self, user_id: UserId, password: impl Into<Password>) -> i32 {
        self.perform(Operation::EncryptUserData {
            user_id,
            password: password.into(),
        })
        .await
    }

    /// `from_init` is set when unlocking during boot, before the framework
    /// is up.
    pub async fn unlock_user_data(
        &self,
        user_id: UserId,
        from_init: bool,
        password: impl Into<Password>,
    ) -> i32 {
        self.perform(Operation::UnlockUserData {
            user_id,
            from_init,
            password: password.into(),
        })
        .await
    }

    pub async fn lock_user_data(&self, user_id: UserId) -> i32 {
        self.perform(Operation::LockUserData { user_id }).await
    }

    pub async fn change_user_data_password(
        &self,
        user_id: UserId,
        old_password: impl Into<Password>,
        new_password: impl Into<Password>,
    ) -> i32 {
        self.perform(Operation::ChangeUserDataPassword {
            user_id,
            old_password: old_password.into(),
            new_password: new_password.into(),
        })
        .await
    }

    pub async fn remove_user_encrypted_data(&self, user_id: UserId) -> i32 {
        self.perform(Operation::RemoveUserEncryptedData { user_id })
            .await
    }

    pub async fn user_encrypted_data_stat(&self, user_id: UserId) -> i32 {
        self.perform(Operation::UserDataStat { user_id }).await
    }

    pub async fn decrypt_user_data(&self, user_id: UserId, password: impl Into<Password>) -> i32 {
        self.perform(Operation::DecryptUserData {
            user_id,
            password: password.into(),
        })
        .await
    }

    /// Typed view of [`Self::user_encrypted_data_stat`].
    pub async fn user_data_state(&self, user_id: UserId) -> Option<StorageState> {
        StorageState::from_code(self.user_encrypted_data_stat(user_id).await)
    }
}

impl DaemonCallbacks for EfsService {
    fn on_daemon_connected(&self) {
        info!("efs-server connected");
    }

    fn on_event(&self, event: &DaemonEvent) -> bool {
        info!(code = event.code, message = %event.message, "efs-server event");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efs_config::DaemonConfig;

    use crate::result::OPERATION_FAILED_INTERNAL_ERROR;

    #[tokio::test]
    async fn test_disconnected_service_reports_internal_error() {
        let service = EfsService::new(DaemonConnector::new(DaemonConfig::default()));
        assert_eq!(
            service.create_efs_storage("/data/x", "pw1").await,
            OPERATION_FAILED_INTERNAL_ERROR
        );
        assert_eq!(
            service.lock_user_data(10).await,
            OPERATION_FAILED_INTERNAL_ERROR
        );
        assert_eq!(service.efs_storage_state("/data/x").await, None);
    }

    #[test]
    fn test_service_handles_events() {
        let service = EfsService::new(DaemonConnector::new(DaemonConfig::default()));
        let event = DaemonEvent {
            code: 600,
            message: "hello".into(),
            raw: "600 hello".into(),
        };
        assert!(service.on_event(&event));
    }
}
