use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile};
use crate::config::{DatabaseSettings, WaitStrategy};
use crate::error::{ConfigError, Result};
use crate::provisioning::{ProvisioningBatch, shell_quote};
use crate::readiness::{ExecVersionProbe, wait_for_store};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// MySQL server; creates the schemas the other services need
pub struct DatabaseUnit {
    profile: UnitProfile,
    root_password: String,
    grace_period: Duration,
    wait_strategy: WaitStrategy,
}

impl DatabaseUnit {
    pub fn new(settings: &DatabaseSettings) -> Result<Self, ConfigError> {
        let mut profile = UnitProfile::from_settings("mysql", &settings.service)?;
        profile
            .env
            .insert("MYSQL_ROOT_PASSWORD".to_string(), settings.root_password.clone());
        profile.batches = settings
            .databases
            .iter()
            .map(|db| {
                ProvisioningBatch::new(
                    format!("create database {}", db),
                    create_database_command(&settings.root_password, db),
                )
            })
            .collect();

        Ok(Self {
            profile,
            root_password: settings.root_password.clone(),
            grace_period: Duration::from_secs(settings.wait_for_start_timeout),
            wait_strategy: settings.wait_strategy,
        })
    }

    async fn wait_for_start(&self, ctx: &UnitContext) {
        match self.wait_strategy {
            WaitStrategy::Fixed => {
                ctx.console().waiting(&format!(
                    "Waiting {}s for MySQL server starts...",
                    self.grace_period.as_secs()
                ));
                tokio::time::sleep(self.grace_period).await;
            }
            WaitStrategy::Poll => {
                let probe = ExecVersionProbe::new(
                    ctx.engine().clone(),
                    &self.profile.container_name,
                    &self.root_password,
                );
                // a timeout is already on the console; schema creation reports the real failure
                wait_for_store(&probe, ctx.console(), self.grace_period, ctx.poll_interval()).await;
            }
        }
    }
}

/// How services inside the network reach the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseAccess {
    pub container_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl DatabaseAccess {
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            container_name: settings.service.container_name.clone(),
            host: settings.service.host(),
            port: settings.service.docker_port,
            user: "root".to_string(),
            password: settings.root_password.clone(),
        }
    }

    /// Connection variables for a service using `database`
    pub fn env(&self, database: &str) -> Vec<(String, String)> {
        vec![
            ("DB_HOST".to_string(), self.host.clone()),
            ("DB_PORT".to_string(), self.port.to_string()),
            ("DB_USER".to_string(), self.user.clone()),
            ("DB_PASSWORD".to_string(), self.password.clone()),
            ("DB_NAME".to_string(), database.to_string()),
        ]
    }
}

fn create_database_command(root_password: &str, db: &str) -> String {
    format!(
        "MYSQL_PWD={} mysql -uroot -e 'CREATE DATABASE IF NOT EXISTS `{}`;'",
        shell_quote(root_password),
        db
    )
}

#[async_trait]
impl DeploymentUnit for DatabaseUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Database
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("🗄️  Deploying database: {}", self.profile.container_name);
        ctx.console().progress("Deploy MySQL container.");

        ctx.resolve_image(&mut self.profile).await?;
        ctx.create_and_start(&mut self.profile).await?;
        self.wait_for_start(ctx).await;
        ctx.run_batches(&mut self.profile).await
    }
}
