//! CLI argument definitions for the gordo daemon.
//!
//! Uses `clap` v4 derive macros. Flags that existed in earlier gordo
//! releases keep their short names and `GORDO_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use gordo_core::config::GordoConfig;
use gordo_core::directive::{MAXMEMORY, REQUIREPASS};

/// Redis sidecar: supervises the server process, enforces protected
/// directives and exposes a control API.
#[derive(Parser, Debug)]
#[command(name = "gordo")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to gordo.toml configuration file.
    ///
    /// A missing file is not fatal: built-in defaults apply.
    #[arg(short, long, default_value = "/etc/gordo/gordo.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Interval between enforcement passes (e.g. `60s`, `1m30s`, `500ms`).
    #[arg(short = 'e', long = "enforceinterval", env = "GORDO_EINTERVAL", value_parser = parse_interval)]
    pub enforce_interval: Option<Duration>,

    /// Keep the server stopped until `GET /start` is called.
    #[arg(short = 'w', long = "waitforstart", env = "GORDO_WAIT")]
    pub wait_for_start: bool,

    /// Prevent changes to protected directives (maxmemory by default).
    #[arg(short = 'f', long = "fixedmem", env = "GORDO_FIXEDMEM")]
    pub fixed_memory: bool,

    /// Server maxmemory directive.
    #[arg(short = 'm', long = "maxmemory", env = "GORDO_MAXMEM")]
    pub maxmemory: Option<String>,

    /// Server password (`requirepass` and `masterauth`).
    #[arg(short = 'p', long = "password", env = "GORDO_RPASS", hide_env_values = true)]
    pub password: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply(&self, config: &mut GordoConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
        if let Some(interval) = self.enforce_interval {
            config.supervisor.enforce_interval = interval;
        }
        if self.wait_for_start {
            config.supervisor.wait_for_start = true;
        }
        if self.fixed_memory {
            config.supervisor.fixed_memory = true;
        }
        if let Some(maxmemory) = &self.maxmemory {
            config
                .directives
                .insert(MAXMEMORY.to_owned(), maxmemory.clone());
        }
        if let Some(password) = &self.password {
            config
                .directives
                .insert(REQUIREPASS.to_owned(), password.clone());
            config
                .directives
                .insert("masterauth".to_owned(), password.clone());
        }
    }
}

/// Parse a duration such as `60s`, `1m30s` or `500ms`.
///
/// A bare number is read as seconds, as older releases documented it.
fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let parsed = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw)
            .map_err(|e| format!("invalid interval '{raw}': {e}"))?,
    };
    if parsed.is_zero() {
        return Err("interval must be greater than zero".to_owned());
    }
    Ok(parsed)
}
