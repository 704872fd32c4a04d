#![deny(unsafe_code)]

//! efsctl: command-line control plane for the EFS service.

mod operation;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use efs_config::AppConfig;
use efs_core::connector::NoCallbacks;
use efs_core::ipc::IpcClient;
use efs_core::result::ResultKind;
use efs_core::runtime::ShutdownSignal;
use efs_core::{
    DaemonConnector, EfsService, OPERATION_FAILED_STORAGE_BUSY, OPERATION_SUCCEEDED, Operation,
    ServiceRuntime,
};

use operation::{StorageCommand, UserCommand};

/// How long `--direct` and `monitor` wait for the daemon socket.
const DIRECT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// efsctl: manage encrypted file storage through the efs-server daemon.
#[derive(Parser)]
#[command(name = "efsctl", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "efs.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Talk to the daemon socket directly instead of the running service.
    #[arg(long, global = true)]
    direct: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the EFS service in the foreground.
    Serve,

    /// Show service status.
    Status,

    /// Stop a running EFS service.
    Stop,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Print unsolicited daemon events until interrupted.
    Monitor,

    /// Operations on an EFS storage container.
    #[command(subcommand)]
    Storage(StorageCommand),

    /// Operations on a user's encrypted data.
    #[command(subcommand)]
    User(UserCommand),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    // Set up tracing subscriber with verbosity level; without -v the
    // configured level applies.
    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve => cmd_serve(config).await?,
        Commands::Status => cmd_status(&config).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Monitor => cmd_monitor(&config).await?,
        Commands::Storage(cmd) => {
            let op = cmd.into_operation()?;
            let kind = op.result_kind();
            let code = run_operation(&config, cli.direct, op).await?;
            return Ok(exit_code(kind, code));
        }
        Commands::User(cmd) => {
            let op = cmd.into_operation()?;
            let kind = op.result_kind();
            let code = run_operation(&config, cli.direct, op).await?;
            return Ok(exit_code(kind, code));
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn cmd_serve(config: AppConfig) -> Result<()> {
    let runtime = ServiceRuntime::new(config);
    runtime.run().await?;
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let client = IpcClient::new(&config.service.socket_path);
    let status = client.status().await?;
    println!("version:          {}", status.version);
    println!("pid:              {}", status.pid);
    println!("uptime:           {}s", status.uptime_secs);
    println!("service socket:   {}", status.service_socket);
    println!("daemon socket:    {}", status.daemon_socket);
    println!("command prefix:   {}", status.command_prefix);
    println!(
        "daemon:           {}",
        if status.daemon_connected {
            "connected"
        } else {
            "disconnected"
        }
    );
    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    info!("Sending stop request to EFS service");
    let client = IpcClient::new(&config.service.socket_path);
    let resp = client.stop().await?;
    println!("{}", resp.message);
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_monitor(config: &AppConfig) -> Result<()> {
    let session = DirectSession::connect(config).await?;
    let mut events = session.connector.subscribe_events();
    eprintln!("Monitoring {} (Ctrl-C to stop)", config.daemon.socket_path);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{} {}", event.code, event.message),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(missed = n, "event stream lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.close().await
}

fn exit_code(kind: ResultKind, code: i32) -> ExitCode {
    if operation_failed(kind, code) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Status operations succeed only with `0`. Queries fail on a negative
/// code or busy.
fn operation_failed(kind: ResultKind, code: i32) -> bool {
    match kind {
        ResultKind::Status => code != OPERATION_SUCCEEDED,
        ResultKind::Query => code < 0 || code == OPERATION_FAILED_STORAGE_BUSY,
    }
}

/// Run one storage operation and print its result code.
async fn run_operation(config: &AppConfig, direct: bool, op: Operation) -> Result<i32> {
    let subcommand = op.subcommand();
    let code = if direct {
        let session = DirectSession::connect(config).await?;
        let code = session.service().perform(op).await;
        session.close().await?;
        code
    } else {
        let client = IpcClient::new(&config.service.socket_path);
        operation::perform_remote(&client, op)
            .await
            .context("service request failed (is `efsctl serve` running? try --direct)")?
    };

    info!(subcommand, code, "operation finished");
    println!("{code}");
    Ok(code)
}

/// A connector worker talking straight to the daemon socket.
struct DirectSession {
    connector: Arc<DaemonConnector>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    worker: JoinHandle<()>,
}

impl DirectSession {
    async fn connect(config: &AppConfig) -> Result<Self> {
        let connector = DaemonConnector::new(config.daemon.clone());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = tokio::spawn(connector.clone().run(Arc::new(NoCallbacks), shutdown_rx));

        let session = Self {
            connector,
            shutdown_tx,
            worker,
        };
        if !session.connector.wait_connected(DIRECT_CONNECT_TIMEOUT).await {
            let path = config.daemon.socket_path.clone();
            session.close().await?;
            anyhow::bail!("could not connect to efs-server at {path}");
        }
        Ok(session)
    }

    fn service(&self) -> EfsService {
        EfsService::new(self.connector.clone())
    }

    async fn close(self) -> Result<()> {
        let _ = self.shutdown_tx.send(ShutdownSignal);
        self.worker.await.context("daemon connector task failed")
    }
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use efs_test_utils::{FakeDaemon, FakeReply, TestConfigBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_direct_flag() {
        let cli = Cli::try_parse_from(["efsctl", "storage", "lock", "/data/a", "--direct"]).unwrap();
        assert!(cli.direct);
        assert!(matches!(cli.command, Commands::Storage(StorageCommand::Lock { .. })));
    }

    #[test]
    fn test_parse_change_passwd_subcommand() {
        let cli =
            Cli::try_parse_from(["efsctl", "user", "change-passwd", "10", "old", "new"]).unwrap();
        assert!(!cli.direct);
        assert!(matches!(
            cli.command,
            Commands::User(UserCommand::ChangePasswd { user_id: 10, .. })
        ));
    }

    #[test]
    fn test_busy_and_errors_fail_the_process() {
        assert!(!operation_failed(ResultKind::Status, 0));
        assert!(operation_failed(ResultKind::Status, OPERATION_FAILED_STORAGE_BUSY));
        assert!(operation_failed(ResultKind::Status, -1));

        assert!(!operation_failed(ResultKind::Query, 0));
        assert!(!operation_failed(ResultKind::Query, 3));
        assert!(!operation_failed(ResultKind::Query, 100));
        assert!(operation_failed(ResultKind::Query, OPERATION_FAILED_STORAGE_BUSY));
        assert!(operation_failed(ResultKind::Query, -1));
    }

    #[tokio::test]
    async fn test_load_missing_config_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.daemon.command_prefix, "efs-server");
    }

    #[tokio::test]
    async fn test_load_invalid_config_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("efs.toml");
        std::fs::write(&path, "[daemon]\ncommand_prefix = \"two words\"\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_direct_operation_exit_codes() {
        let daemon = FakeDaemon::builder()
            .respond_with(|cmd| match cmd.subcommand.as_str() {
                "lock" => vec![FakeReply::ok(0)],
                _ => vec![FakeReply::error(500, "failed")],
            })
            .start()
            .await;
        let config = TestConfigBuilder::new()
            .daemon_socket(daemon.socket_path())
            .build();

        let ok = run_operation(
            &config,
            true,
            Operation::LockStorage {
                path: "/data/a".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(ok, 0);

        let failed = run_operation(&config, true, Operation::LockUserData { user_id: 10 })
            .await
            .unwrap();
        assert_eq!(failed, -1);
    }

    #[tokio::test]
    async fn test_direct_without_daemon_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = TestConfigBuilder::new()
            .daemon_socket(tmp.path().join("missing.sock"))
            .build();
        let result = run_operation(&config, true, Operation::LockUserData { user_id: 1 }).await;
        assert!(result.is_err());
    }
}
