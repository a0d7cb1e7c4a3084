use anyhow::Result;
use clap::Parser;

use gordo_core::config::GordoConfig;
use gordo_daemon::cli::DaemonCli;
use gordo_daemon::logging;
use gordo_daemon::orchestrator::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // Config file is optional: defaults + env + flags are enough to run.
    let (mut config, file_found) = if cli.config.exists() {
        let config = GordoConfig::from_file(&cli.config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        (config, true)
    } else {
        (GordoConfig::default(), false)
    };
    config.apply_env_overrides();
    cli.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration is valid");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    if !file_found {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gordo starting");

    let daemon = Daemon::build(config)?;
    daemon.run().await
}
