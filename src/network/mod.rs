use crate::config::NetworkConfig;
use crate::engine::ContainerEngine;
use crate::error::Result;
use tracing::{debug, info};

/// Makes sure the deployment network exists exactly once before any unit is created
pub struct NetworkProvisioner<'a> {
    engine: &'a dyn ContainerEngine,
    config: &'a NetworkConfig,
}

impl<'a> NetworkProvisioner<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, config: &'a NetworkConfig) -> Self {
        Self { engine, config }
    }

    /// Removes the configured network and every legacy one, then recreates it.
    ///
    /// Containers still attached to a removed network lose that attachment.
    /// Engine errors are returned as-is.
    pub async fn prepare_network(&self) -> Result<String> {
        info!("🌐 Preparing network: {}", self.config.name);
        debug!(
            "Subnet: {}, gateway: {}",
            self.config.subnet, self.config.gateway
        );

        let existing = self.engine.list_networks().await?;
        for network in existing
            .iter()
            .filter(|n| self.config.is_replaced_by_us(&n.name))
        {
            debug!("Replacing network {} ({})", network.name, network.id);
            self.engine.remove_network(&network.id).await?;
        }

        let id = self.engine.create_network(self.config).await?;
        info!("✅ Network ready: {} ({})", self.config.name, id);
        Ok(id)
    }
}
