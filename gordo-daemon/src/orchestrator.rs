//! Daemon assembly and lifecycle.
//!
//! The [`Daemon`] wires the directive store, control client and
//! supervisor together, serves the control API, and owns shutdown
//! ordering:
//!
//! 1. Stop the supervised server (graceful, then forced)
//! 2. Cancel background tasks and drain the API server
//! 3. Remove the PID file

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use gordo_core::config::GordoConfig;
use gordo_core::metrics as m;
use gordo_supervisor::{RespClient, Supervisor, SupervisorSettings, TracingSink};

use crate::api::{self, AppState};
use crate::metrics_server;

/// The running gordo daemon.
pub struct Daemon {
    config: GordoConfig,
    supervisor: Supervisor<RespClient>,
    cancel: CancellationToken,
    start_time: Instant,
}

impl Daemon {
    /// Build the daemon from an already merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The metrics recorder cannot be installed
    /// - The directive store cannot be built from the configuration
    pub fn build(config: GordoConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let store = Arc::new(
            config
                .build_store()
                .map_err(|e| anyhow::anyhow!("failed to build directive store: {}", e))?,
        );
        let control = Arc::new(RespClient::new(
            config.supervisor.control_timeout(),
            config.supervisor.client_name.clone(),
        ));
        let supervisor = Supervisor::new(
            control,
            store,
            Arc::new(TracingSink),
            SupervisorSettings::from_config(&config),
        );

        tracing::info!(
            binary = %config.server.binary,
            protection_active = config.supervisor.fixed_memory,
            enforce_interval = %humantime::format_duration(config.supervisor.enforce_interval),
            "daemon built"
        );

        Ok(Self {
            config,
            supervisor,
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
        })
    }

    pub fn config(&self) -> &GordoConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Supervisor<RespClient> {
        &self.supervisor
    }

    /// Run until SIGTERM or SIGINT, then shut down in order.
    pub async fn run(&self) -> Result<()> {
        let pid_file = (!self.config.general.pid_file.is_empty())
            .then(|| Path::new(&self.config.general.pid_file));
        if let Some(path) = pid_file {
            write_pid_file(path)?;
        }

        let result = self.serve().await;

        if let Some(path) = pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.listen_addr)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "failed to bind control API on {}: {}",
                    self.config.api.listen_addr,
                    e
                )
            })?;
        tracing::info!(listen_addr = %self.config.api.listen_addr, "control API listening");

        let app = api::router(AppState::new(self.supervisor.clone()));
        let api_cancel = self.cancel.clone();
        let mut api_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_cancel.cancelled().await })
                .await
        });

        if self.config.supervisor.wait_for_start {
            tracing::info!("waiting for GET /start before launching the server");
        } else if let Err(e) = self.supervisor.start().await {
            tracing::error!(error = %e, "initial server start failed; use GET /start to retry");
        }

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.cancel.clone()));

        let outcome = tokio::select! {
            signal = wait_for_shutdown_signal() => {
                let signal = signal?;
                tracing::info!(signal, "shutdown signal received");
                Ok(())
            }
            joined = &mut api_task => {
                match joined {
                    Ok(Ok(())) => Err(anyhow::anyhow!("control API stopped unexpectedly")),
                    Ok(Err(e)) => Err(anyhow::anyhow!("control API failed: {}", e)),
                    Err(e) => Err(anyhow::anyhow!("control API task panicked: {}", e)),
                }
            }
        };

        self.shutdown().await;

        if !api_task.is_finished() {
            if let Err(e) = api_task.await {
                tracing::warn!(error = %e, "control API task did not finish cleanly");
            }
        }
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        tracing::info!("gordo shut down");
        outcome
    }

    async fn shutdown(&self) {
        match self.supervisor.shutdown().await {
            Ok(outcome) => tracing::info!(outcome = ?outcome, "server stopped"),
            Err(e) => tracing::error!(error = %e, "failed to stop server"),
        }
        self.cancel.cancel();
    }
}

/// Wait for SIGTERM or SIGINT and return the signal name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to `path`.
///
/// The file is created with `create_new` so a second daemon pointed at the
/// same path fails instead of overwriting it. The parent directory is
/// created with mode 0o700 and the file with 0o600.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::DirBuilder::new()
            .mode(0o700)
            .recursive(true)
            .create(parent)?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }
    file.set_permissions(fs::Permissions::from_mode(0o600))?;

    let pid = std::process::id();
    writeln!(file, "{pid}")?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failures are logged, never fatal.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}

/// Refresh the uptime gauge every 10 seconds until cancelled.
fn spawn_uptime_updater(
    start_time: Instant,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
