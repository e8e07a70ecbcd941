use super::database::DatabaseAccess;
use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile, SOURCE_MOUNT};
use crate::config::IdentitySettings;
use crate::error::{ConfigError, Result};
use crate::provisioning::ProvisioningBatch;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

const VENV: &str = ". /venv/bin/activate";

/// Django SSO service built from its recipe and run from the mounted checkout
pub struct IdentityUnit {
    profile: UnitProfile,
}

impl IdentityUnit {
    pub fn new(
        settings: &IdentitySettings,
        database: &DatabaseAccess,
        source_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut profile =
            UnitProfile::from_settings("sso", &settings.service)?.with_source(source_dir);
        profile.interactive = true;
        profile.env.extend(database.env(&settings.database));
        profile.batches = batches();

        Ok(Self { profile })
    }
}

fn batches() -> Vec<ProvisioningBatch> {
    let cd = format!("cd {}", SOURCE_MOUNT);

    vec![
        ProvisioningBatch::chained(
            "environment setup",
            [
                cd.clone(),
                "pip install virtualenv".to_string(),
                "virtualenv /venv".to_string(),
                VENV.to_string(),
                "pip install -r requirements.txt".to_string(),
                "sed -i 's/^# *\\(from .local_settings import \\*\\)/\\1/' sso/settings.py"
                    .to_string(),
            ],
        ),
        // fixtures reference each other, keep their order
        ProvisioningBatch::chained(
            "checks and fixtures",
            [
                cd.clone(),
                VENV.to_string(),
                "python manage.py check".to_string(),
                "python manage.py migrate --noinput".to_string(),
                "pip install -r requirements-dev.txt".to_string(),
                "python manage.py loaddata groups".to_string(),
                "python manage.py loaddata users".to_string(),
                "python manage.py loaddata applications".to_string(),
            ],
        ),
        ProvisioningBatch::chained(
            "service startup",
            [
                cd,
                VENV.to_string(),
                "python manage.py collectstatic --noinput".to_string(),
                "gunicorn sso.wsgi:application --bind 127.0.0.1:8000 --daemon".to_string(),
                "nginx".to_string(),
            ],
        ),
    ]
}

#[async_trait]
impl DeploymentUnit for IdentityUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::Identity
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("🔐 Deploying identity service: {}", self.profile.container_name);
        ctx.deploy(&mut self.profile).await
    }
}
