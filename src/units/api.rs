use super::database::DatabaseAccess;
use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile, SOURCE_MOUNT};
use crate::config::{ApiSettings, ServiceSettings};
use crate::error::{ConfigError, EngineError, Result};
use crate::provisioning::{ProvisioningBatch, ShellCommand, shell_quote};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{info, warn};

const VENV: &str = ". /venv/bin/activate";

/// Application the token is issued for in the identity service
const CLIENT_NAME: &str = "feedback_api";

/// Feedback API; depends on the database, the broker and the identity service
pub struct ApiUnit {
    profile: UnitProfile,
    token_exchange: Option<TokenExchange>,
}

/// Where the optional token exchange reads and regenerates the client secret
#[derive(Debug, Clone)]
pub struct TokenExchange {
    pub database: DatabaseAccess,
    pub identity_container: String,
    pub identity_database: String,
}

impl ApiUnit {
    pub fn new(
        settings: &ApiSettings,
        database: &DatabaseAccess,
        identity: &ServiceSettings,
        broker: &ServiceSettings,
        source_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut profile =
            UnitProfile::from_settings("feedback_api", &settings.service)?.with_source(source_dir);
        profile.interactive = true;

        let shared = settings.databases.first().map(String::as_str).unwrap_or_default();
        profile.env.extend(database.env(shared));
        profile
            .env
            .insert("DATABASES".to_string(), settings.databases.join(","));
        profile.env.insert("SSO_HOST".to_string(), identity.host());
        profile
            .env
            .insert("SSO_PORT".to_string(), identity.docker_port.to_string());
        profile
            .env
            .insert("SSO_ADDRESS".to_string(), identity.ipv4_address.to_string());
        profile.env.insert("RABBITMQ_HOST".to_string(), broker.host());
        profile
            .env
            .insert("RABBITMQ_ADDRESS".to_string(), broker.ipv4_address.to_string());

        profile.batches = batches(&settings.databases);

        Ok(Self {
            profile,
            token_exchange: None,
        })
    }

    /// Enables the best-effort client secret exchange after provisioning
    pub fn with_token_exchange(mut self, exchange: TokenExchange) -> Self {
        self.token_exchange = Some(exchange);
        self
    }

    async fn exchange_token(&self, ctx: &UnitContext, exchange: &TokenExchange) {
        info!("🔑 Exchanging access token with {}", exchange.identity_container);
        match self.try_exchange_token(ctx, exchange).await {
            Ok(()) => ctx.console().success("Access token exchanged."),
            Err(e) => {
                warn!("Token exchange skipped: {}", e);
                ctx.console()
                    .warning(&format!("Token exchange failed, continuing: {}", e));
            }
        }
    }

    async fn try_exchange_token(&self, ctx: &UnitContext, exchange: &TokenExchange) -> Result<()> {
        let mut secret = read_secret(ctx, exchange).await?;
        if secret.is_none() {
            let regenerate = ShellCommand::from(format!(
                "cd {} && {} && python manage.py regenerate_client_secret {}",
                SOURCE_MOUNT, VENV, CLIENT_NAME
            ));
            capture(ctx, &exchange.identity_container, &regenerate).await?;
            secret = read_secret(ctx, exchange).await?;
        }

        let Some(secret) = secret else {
            return Err(EngineError::Decode {
                reason: format!(
                    "{} has no client secret for {}",
                    exchange.identity_database, CLIENT_NAME
                ),
            }
            .into());
        };

        let persist = ShellCommand::Sequence(vec![
            format!("printf '%s' {} > {}/.sso_token &&", shell_quote(&secret), SOURCE_MOUNT),
            format!("cd {} && {} &&", SOURCE_MOUNT, VENV),
            "python manage.py generate_local_token".to_string(),
        ]);
        capture(ctx, &self.profile.container_name, &persist).await?;
        Ok(())
    }
}

async fn read_secret(ctx: &UnitContext, exchange: &TokenExchange) -> Result<Option<String>> {
    let query = ShellCommand::from(format!(
        "MYSQL_PWD={} mysql -u{} -N -e \"SELECT client_secret FROM \\`{}\\`.oauth2_provider_application WHERE name = '{}';\"",
        shell_quote(&exchange.database.password),
        exchange.database.user,
        exchange.identity_database,
        CLIENT_NAME
    ));
    let output = capture(ctx, &exchange.database.container_name, &query).await?;
    Ok(output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string))
}

/// Collects output without echoing it
async fn capture(ctx: &UnitContext, container: &str, cmd: &ShellCommand) -> Result<String> {
    let mut output = String::new();
    let mut stream = ctx.exec_cmd(container, cmd).await?;
    while let Some(chunk) = stream.next().await {
        output.push_str(&chunk?);
        output.push('\n');
    }
    Ok(output)
}

fn batches(databases: &[String]) -> Vec<ProvisioningBatch> {
    let cd = format!("cd {}", SOURCE_MOUNT);
    let prelude = [cd.clone(), VENV.to_string()];

    let mut migrations = prelude.to_vec();
    // content types live in the shared database and must exist before tenant tables
    if let Some(shared) = databases.first() {
        migrations.push(format!(
            "python manage.py migrate contenttypes --database={}",
            shared
        ));
    }
    migrations.extend(
        databases
            .iter()
            .map(|db| format!("python manage.py migrate --noinput --database={}", db)),
    );

    let mut fixtures = prelude.to_vec();
    fixtures.extend(
        ["languages", "channels", "question_types", "feedback_forms"]
            .iter()
            .map(|fixture| format!("python manage.py loaddata {}", fixture)),
    );

    let mut startup = prelude.to_vec();
    startup.extend([
        "python manage.py collectstatic --noinput".to_string(),
        "gunicorn feedback.wsgi:application --bind 127.0.0.1:8000 --daemon".to_string(),
        "nginx".to_string(),
        "service cron start".to_string(),
        "supervisorctl restart feedback_worker".to_string(),
    ]);

    vec![
        ProvisioningBatch::chained(
            "environment setup",
            [
                cd,
                "pip install virtualenv".to_string(),
                "virtualenv /venv".to_string(),
                VENV.to_string(),
                "pip install -r requirements.txt".to_string(),
            ],
        ),
        ProvisioningBatch::chained("schema migration", migrations),
        ProvisioningBatch::chained("reference data", fixtures),
        ProvisioningBatch::chained("service startup", startup),
    ]
}

#[async_trait]
impl DeploymentUnit for ApiUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Api
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("🛰️  Deploying application API: {}", self.profile.container_name);
        ctx.deploy(&mut self.profile).await?;

        if let Some(exchange) = &self.token_exchange {
            self.exchange_token(ctx, exchange).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployerConfig;

    fn unit() -> ApiUnit {
        let config = DeployerConfig::default();
        ApiUnit::new(
            &config.services.feedback_api,
            &DatabaseAccess::from_settings(&config.services.mysql),
            &config.services.sso.service,
            &config.services.rabbitmq,
            None,
        )
        .unwrap()
    }

    #[test]
    fn environment_points_at_peers() {
        let unit = unit();
        let env = &unit.profile().env;
        assert_eq!(env["SSO_HOST"], "ssohost");
        assert_eq!(env["SSO_PORT"], "81");
        assert_eq!(env["SSO_ADDRESS"], "172.16.1.4");
        assert_eq!(env["RABBITMQ_ADDRESS"], "172.16.1.3");
        assert_eq!(env["DB_NAME"], "feedback");
        assert_eq!(env["DATABASES"], "feedback,feedback_tenant");
    }

    #[test]
    fn shared_content_types_migrate_before_tenant_tables() {
        let unit = unit();
        let batches = &unit.profile().batches;
        assert_eq!(batches.len(), 4);

        let line = batches[1].command.line();
        let contenttypes = line.find("migrate contenttypes --database=feedback").unwrap();
        let shared = line.find("--noinput --database=feedback &&").unwrap();
        let tenant = line.find("--database=feedback_tenant").unwrap();
        assert!(contenttypes < shared && shared < tenant);

        let fixtures = batches[2].command.line();
        assert!(fixtures.find("languages").unwrap() < fixtures.find("feedback_forms").unwrap());
    }
}
