use anyhow::Result;
use clap::Parser;

use logship_core::config::LogshipConfig;
use logship_daemon::cli::DaemonCli;
use logship_daemon::logging;
use logship_daemon::orchestrator::{Orchestrator, load_sources};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file, then environment, then command line; validate last
    let mut config = LogshipConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        let sources = if config.logs.enabled {
            load_sources(&config.logs).await?.len()
        } else {
            0
        };
        println!(
            "configuration OK: {} ({} log sources)",
            cli.config.display(),
            sources
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "logship-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
