//! Deployer - stands up a multi-service development environment on a container engine
//!
//! A deployment prepares one virtual network, pulls or builds images, then
//! creates, starts and provisions an ordered set of service containers and
//! reports how to reach each of them.

pub mod composite;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod images;
pub mod monitoring;
pub mod network;
pub mod provisioning;
pub mod readiness;
pub mod report;
pub mod sources;
pub mod types;
pub mod units;

pub use config::DeployerConfig;
pub use error::{DeployError, ErrorKind, Result};

/// Re-exports for easier API usage
pub mod api {
    pub use crate::composite::{Component, DeploymentComposite, DeploymentReport, UnitFactory};
    pub use crate::config::{DeployerConfig, NetworkConfig, ServiceKey, WaitStrategy};
    pub use crate::console::{AnsiConsole, Console, MemoryConsole, Tone};
    pub use crate::engine::{ContainerEngine, DockerCli};
    pub use crate::readiness::{ReadinessOutcome, VersionProbe, wait_for_store};
    pub use crate::sources::{GitCli, SourceFetcher};
    pub use crate::units::{DeploymentUnit, UnitContext, UnitKind, UnitState};
    pub use crate::{Deployer, DeployError, ErrorKind};
}

use composite::{DeploymentComposite, DeploymentReport, UnitFactory};
use console::Console;
use engine::ContainerEngine;
use network::NetworkProvisioner;
use readiness::{ExecVersionProbe, ReadinessOutcome};
use sources::SourceFetcher;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One configured deployment with its collaborators
pub struct Deployer {
    config: DeployerConfig,
    engine: Arc<dyn ContainerEngine>,
    console: Arc<dyn Console>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl Deployer {
    pub fn new(
        config: DeployerConfig,
        engine: Arc<dyn ContainerEngine>,
        console: Arc<dyn Console>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            config,
            engine,
            console,
            fetcher,
        }
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Composite holding the configured units in deployment order
    pub fn composite(&self) -> Result<DeploymentComposite> {
        let recipes_dir = config::expand_home(&self.config.deployment.recipes_dir);
        let mut composite = DeploymentComposite::new(
            self.engine.clone(),
            self.console.clone(),
            self.config.network.clone(),
            recipes_dir,
        )
        .with_divider(self.config.deployment.report_divider.clone());

        composite.append(UnitFactory::from_config(&self.config)?)?;
        Ok(composite)
    }

    /// Clones sources (unless skipped), then deploys every unit in order
    pub async fn up(&self, skip_clone: bool) -> Result<DeploymentReport> {
        info!("🚀 Starting deployment");

        // units are built first so a bad order fails before anything is cloned
        let mut composite = self.composite()?;

        if skip_clone {
            info!("Skipping repository clone");
        } else {
            self.clone_sources().await?;
        }

        composite.execute().await
    }

    pub async fn clone_sources(&self) -> Result<()> {
        sources::clone_repositories(
            self.fetcher.as_ref(),
            self.console.as_ref(),
            &self.config.resolved_repositories(),
        )
        .await
    }

    pub async fn prepare_network(&self) -> Result<String> {
        NetworkProvisioner::new(self.engine.as_ref(), &self.config.network)
            .prepare_network()
            .await
    }

    /// Polls the database container until it answers or the configured grace period ends
    pub async fn wait_for_database(&self) -> ReadinessOutcome {
        let mysql = &self.config.services.mysql;
        let probe = ExecVersionProbe::new(
            self.engine.clone(),
            &mysql.service.container_name,
            &mysql.root_password,
        );
        readiness::wait_for_store(
            &probe,
            self.console.as_ref(),
            Duration::from_secs(mysql.wait_for_start_timeout),
            readiness::DEFAULT_POLL_INTERVAL,
        )
        .await
    }
}
