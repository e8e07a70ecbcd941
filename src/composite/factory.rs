use crate::config::{DeployerConfig, ServiceKey};
use crate::error::{ConfigError, Result};
use crate::units::{
    ApiUnit, BrokerUnit, DatabaseAccess, DatabaseUnit, DeploymentUnit, IdentityUnit,
    LogCollectorUnit, TokenExchange, UiBundleUnit,
};
use tracing::debug;

/// Builds units from the configuration in deployment order
pub struct UnitFactory;

impl UnitFactory {
    /// One unit per `[deployment].order` entry; any bad entry fails the whole list
    pub fn from_config(config: &DeployerConfig) -> Result<Vec<Box<dyn DeploymentUnit>>> {
        let keys = config.ordered_keys()?;
        keys.into_iter()
            .map(|key| Self::build(config, key))
            .collect()
    }

    pub fn build(config: &DeployerConfig, key: ServiceKey) -> Result<Box<dyn DeploymentUnit>> {
        debug!("Building unit for {}", key);
        let services = &config.services;
        let database = DatabaseAccess::from_settings(&services.mysql);

        let unit: Box<dyn DeploymentUnit> = match key {
            ServiceKey::Mysql => Box::new(DatabaseUnit::new(&services.mysql)?),
            ServiceKey::Rabbitmq => Box::new(BrokerUnit::new(&services.rabbitmq)?),
            ServiceKey::Sso => Box::new(IdentityUnit::new(
                &services.sso,
                &database,
                config.source_dir(&services.sso.service),
            )?),
            ServiceKey::FeedbackApi => {
                let api = &services.feedback_api;
                let unit = ApiUnit::new(
                    api,
                    &database,
                    &services.sso.service,
                    &services.rabbitmq,
                    config.source_dir(&api.service),
                )?;
                if api.token_exchange {
                    Box::new(unit.with_token_exchange(TokenExchange {
                        database,
                        identity_container: services.sso.service.container_name.clone(),
                        identity_database: services.sso.database.clone(),
                    }))
                } else {
                    Box::new(unit)
                }
            }
            ServiceKey::UiBundle => {
                let ui = &services.ui_bundle;
                let source_dir =
                    config
                        .source_dir(&ui.service)
                        .ok_or_else(|| ConfigError::MissingRepository {
                            service: key.to_string(),
                            repository: ui.service.repository.clone().unwrap_or_default(),
                        })?;
                Box::new(UiBundleUnit::new(
                    ui,
                    &services.sso.service,
                    &services.feedback_api.service,
                    source_dir,
                )?)
            }
            ServiceKey::Graylog => {
                let settings = services
                    .graylog
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingService {
                        name: key.to_string(),
                    })?;
                Box::new(LogCollectorUnit::new(settings)?)
            }
        };

        Ok(unit)
    }
}
