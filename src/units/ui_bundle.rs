use super::{DeploymentUnit, UnitContext, UnitKind, UnitProfile};
use crate::config::{ServiceSettings, UiBundleSettings};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Static UI served from the mounted bundle checkout.
///
/// The runtime config asset is written into the checkout before the image is
/// built, so the served bundle points at the deployed services.
pub struct UiBundleUnit {
    profile: UnitProfile,
    source_dir: PathBuf,
    config_asset: PathBuf,
    sso_url: String,
    api_url: String,
    features: BTreeMap<String, bool>,
}

impl UiBundleUnit {
    pub fn new(
        settings: &UiBundleSettings,
        identity: &ServiceSettings,
        api: &ServiceSettings,
        source_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let profile = UnitProfile::from_settings("ui_bundle", &settings.service)?
            .with_source(Some(source_dir.clone()));

        Ok(Self {
            profile,
            source_dir,
            config_asset: settings.config_asset.clone(),
            sso_url: format!("http://localhost:{}", identity.local_port),
            api_url: format!("http://localhost:{}", api.local_port),
            features: settings.features.clone(),
        })
    }

    /// Host path of the generated asset
    pub fn config_asset_path(&self) -> PathBuf {
        self.source_dir.join(&self.config_asset)
    }

    pub fn runtime_config(&self) -> Result<String> {
        let body = json!({
            "ssoUrl": self.sso_url,
            "feedbackApiUrl": self.api_url,
            "features": self.features,
        });
        Ok(format!(
            "window.RUNTIME_CONFIG = {};\n",
            serde_json::to_string_pretty(&body)?
        ))
    }

    async fn write_config_asset(&self) -> Result<()> {
        let path = self.config_asset_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, self.runtime_config()?).await?;
        debug!("Wrote runtime config to {:?}", path);
        Ok(())
    }
}

#[async_trait]
impl DeploymentUnit for UiBundleUnit {
    fn kind(&self) -> UnitKind {
        UnitKind::UiBundle
    }

    fn profile(&self) -> &UnitProfile {
        &self.profile
    }

    fn profile_mut(&mut self) -> &mut UnitProfile {
        &mut self.profile
    }

    async fn create(&mut self, ctx: &UnitContext) -> Result<()> {
        info!("🖼️  Deploying UI bundle: {}", self.profile.container_name);
        self.write_config_asset().await?;
        ctx.deploy(&mut self.profile).await
    }
}
