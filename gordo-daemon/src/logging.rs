//! Logging initialization for the gordo daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `GordoConfig`. Server output lines are logged under the
//! `gordo::server` target, so `RUST_LOG=gordo::server=debug` surfaces
//! unrecognized lines without raising the level of everything else.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use gordo_core::config::GeneralConfig;

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// `RUST_LOG` takes precedence over `general.log_level`.
///
/// # Formats
///
/// * `"json"` - JSON lines (default)
/// * `"pretty"` - human-readable multi-line output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            ));
        }
    };

    result.map_err(|e| {
        anyhow::anyhow!(
            "failed to initialize {} tracing subscriber: {}",
            config.log_format,
            e
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_is_rejected() {
        let config = GeneralConfig {
            log_format: "xml".to_owned(),
            ..GeneralConfig::default()
        };
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }
}
