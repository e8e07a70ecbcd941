use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile};
use crate::config::ServiceSettings;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use tracing::info;

/// RabbitMQ with the management plugin; runs privileged, no provisioning
pub struct BrokerUnit {
    profile: UnitProfile,
}

impl BrokerUnit {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ConfigError> {
        let mut profile = UnitProfile::from_settings("rabbitmq", settings)?;
        profile.privileged = true;
        Ok(Self { profile })
    }
}

#[async_trait]
impl DeploymentUnit for BrokerUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Broker
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("🐇 Deploying message broker: {}", self.profile.container_name);
        ctx.deploy(&mut self.profile).await
    }
}
