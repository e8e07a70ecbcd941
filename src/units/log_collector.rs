use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile};
use crate::config::ServiceSettings;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use tracing::info;

/// Graylog server reachable from the other units by hostname
pub struct LogCollectorUnit {
    profile: UnitProfile,
}

impl LogCollectorUnit {
    pub fn new(settings: &ServiceSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            profile: UnitProfile::from_settings("graylog", settings)?,
        })
    }
}

#[async_trait]
impl DeploymentUnit for LogCollectorUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::LogCollector
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("📜 Deploying log collector: {}", self.profile.container_name);
        ctx.deploy(&mut self.profile).await
    }
}
