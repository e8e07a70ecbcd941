mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use deployer::console::{AnsiConsole, Console, Tone};
use deployer::engine::DockerCli;
use deployer::monitoring::TracingConfig;
use deployer::sources::GitCli;
use deployer::{Deployer, DeployerConfig};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = TracingConfig {
        verbose: cli.verbose,
        json_logs: cli.json_logs,
        log_file: cli.log_file.clone(),
    }
    .init_tracing()?;

    let console: Arc<dyn Console> = Arc::new(AnsiConsole::new(!cli.no_color));

    if let Commands::ExampleConfig = cli.command {
        print!("{}", DeployerConfig::default().to_toml_string()?);
        return Ok(());
    }

    info!("🚀 Deployer starting up...");

    let config = DeployerConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let deployer = Deployer::new(
        config,
        Arc::new(DockerCli::new()),
        console.clone(),
        Arc::new(GitCli::new()),
    );

    match cli.command {
        Commands::Up { skip_clone } => {
            let report = deployer.up(skip_clone).await?;
            console.emit(Tone::Report, &report.to_string());
        }

        Commands::Network => {
            let id = deployer.prepare_network().await?;
            console.success(&format!(
                "Network {} ready ({}).",
                deployer.config().network.name,
                id
            ));
        }

        Commands::Clone => {
            deployer.clone_sources().await?;
        }

        Commands::WaitDb => {
            // the outcome is already on the console
            let outcome = deployer.wait_for_database().await;
            info!("Readiness after {} attempt(s): {:?}", outcome.attempts(), outcome);
        }

        Commands::Check => {
            let composite = deployer.composite()?;
            console.success("Configuration is valid.");
            for (i, unit) in composite.units().iter().enumerate() {
                let profile = unit.profile();
                console.plain(&format!(
                    "{:>2}. {:<20} {:<18} {} -> {}",
                    i + 1,
                    profile.container_name,
                    unit.kind().to_string(),
                    profile.ports.localhost_port,
                    profile.ports.docker_port
                ));
            }
        }

        Commands::ExampleConfig => {}
    }

    Ok(())
}
