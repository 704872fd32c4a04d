//! `storage` and `user` subcommands and their mapping onto [`Operation`].

use std::io::BufRead;

use anyhow::{Context, Result};
use clap::Subcommand;
use zeroize::Zeroizing;

use efs_core::ipc::{IpcClient, IpcClientError};
use efs_core::{Operation, Password, UserId};

/// Storage operations. Pass `-` as a password to read it from stdin.
#[derive(Subcommand)]
pub enum StorageCommand {
    /// Create a new storage container.
    Create { path: String, password: String },
    /// Unlock a storage container.
    Unlock { path: String, password: String },
    /// Lock a storage container.
    Lock { path: String },
    /// Change a storage container's password.
    ChangePasswd {
        path: String,
        old_password: String,
        new_password: String,
    },
    /// Remove a storage container.
    Remove { path: String },
    /// Show the encryption state (1 not started, 2 in progress, 3 completed).
    Stat { path: String },
    /// Decrypt the data back in place and remove the container.
    Recover { path: String, password: String },
    /// Show the encryption progress.
    Progress { path: String },
}

/// Operations on a user's encrypted data.
#[derive(Subcommand)]
pub enum UserCommand {
    /// Encrypt a user's data.
    Encrypt { user_id: UserId, password: String },
    /// Unlock a user's data.
    Unlock {
        user_id: UserId,
        password: String,
        /// The unlock happens during boot, before the framework is up.
        #[arg(long)]
        from_init: bool,
    },
    /// Lock a user's data.
    Lock { user_id: UserId },
    /// Change the password protecting a user's data.
    ChangePasswd {
        user_id: UserId,
        old_password: String,
        new_password: String,
    },
    /// Remove a user's encrypted data.
    Remove { user_id: UserId },
    /// Show the encryption state of a user's data.
    Stat { user_id: UserId },
    /// Decrypt a user's data.
    Decrypt { user_id: UserId, password: String },
}

impl StorageCommand {
    pub fn into_operation(self) -> Result<Operation> {
        Ok(match self {
            StorageCommand::Create { path, password } => Operation::CreateStorage {
                path,
                password: resolve_password(password)?,
            },
            StorageCommand::Unlock { path, password } => Operation::UnlockStorage {
                path,
                password: resolve_password(password)?,
            },
            StorageCommand::Lock { path } => Operation::LockStorage { path },
            StorageCommand::ChangePasswd {
                path,
                old_password,
                new_password,
            } => Operation::ChangeStoragePassword {
                path,
                old_password: resolve_password(old_password)?,
                new_password: resolve_password(new_password)?,
            },
            StorageCommand::Remove { path } => Operation::RemoveStorage { path },
            StorageCommand::Stat { path } => Operation::StorageStat { path },
            StorageCommand::Recover { path, password } => Operation::RecoverAndRemoveStorage {
                path,
                password: resolve_password(password)?,
            },
            StorageCommand::Progress { path } => Operation::EncryptionProgress { path },
        })
    }
}

impl UserCommand {
    pub fn into_operation(self) -> Result<Operation> {
        Ok(match self {
            UserCommand::Encrypt { user_id, password } => Operation::EncryptUserData {
                user_id,
                password: resolve_password(password)?,
            },
            UserCommand::Unlock {
                user_id,
                password,
                from_init,
            } => Operation::UnlockUserData {
                user_id,
                from_init,
                password: resolve_password(password)?,
            },
            UserCommand::Lock { user_id } => Operation::LockUserData { user_id },
            UserCommand::ChangePasswd {
                user_id,
                old_password,
                new_password,
            } => Operation::ChangeUserDataPassword {
                user_id,
                old_password: resolve_password(old_password)?,
                new_password: resolve_password(new_password)?,
            },
            UserCommand::Remove { user_id } => Operation::RemoveUserEncryptedData { user_id },
            UserCommand::Stat { user_id } => Operation::UserDataStat { user_id },
            UserCommand::Decrypt { user_id, password } => Operation::DecryptUserData {
                user_id,
                password: resolve_password(password)?,
            },
        })
    }
}

/// `-` reads one line from stdin.
fn resolve_password(arg: String) -> Result<Password> {
    if arg != "-" {
        return Ok(Password::from(arg));
    }
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(Password::new(line.trim_end_matches(['\r', '\n'])))
}

/// Send `op` through the running service.
pub async fn perform_remote(client: &IpcClient, op: Operation) -> Result<i32, IpcClientError> {
    match op {
        Operation::CreateStorage { path, password } => {
            client.create_efs_storage(&path, password).await
        }
        Operation::UnlockStorage { path, password } => {
            client.unlock_efs_storage(&path, password).await
        }
        Operation::LockStorage { path } => client.lock_efs_storage(&path).await,
        Operation::ChangeStoragePassword {
            path,
            old_password,
            new_password,
        } => {
            client
                .change_password_efs_storage(&path, old_password, new_password)
                .await
        }
        Operation::RemoveStorage { path } => client.remove_efs_storage(&path).await,
        Operation::StorageStat { path } => client.efs_storage_stat(&path).await,
        Operation::RecoverAndRemoveStorage { path, password } => {
            client
                .recover_data_and_remove_efs_storage(&path, password)
                .await
        }
        Operation::EncryptionProgress { path } => client.efs_encryption_progress(&path).await,
        Operation::EncryptUserData { user_id, password } => {
            client.encrypt_user_data(user_id, password).await
        }
        Operation::UnlockUserData {
            user_id,
            from_init,
            password,
        } => client.unlock_user_data(user_id, from_init, password).await,
        Operation::LockUserData { user_id } => client.lock_user_data(user_id).await,
        Operation::ChangeUserDataPassword {
            user_id,
            old_password,
            new_password,
        } => {
            client
                .change_user_data_password(user_id, old_password, new_password)
                .await
        }
        Operation::RemoveUserEncryptedData { user_id } => {
            client.remove_user_encrypted_data(user_id).await
        }
        Operation::UserDataStat { user_id } => client.user_encrypted_data_stat(user_id).await,
        Operation::DecryptUserData { user_id, password } => {
            client.decrypt_user_data(user_id, password).await
        }
    }
}
