//! Ordered deployment of units.
//!
//! Units run strictly in append order. The first failure stops the run;
//! units already started stay running and later ones are never attempted.

use crate::config::NetworkConfig;
use crate::console::Console;
use crate::engine::ContainerEngine;
use crate::error::{ConfigError, Result};
use crate::images::ImageResolver;
use crate::network::NetworkProvisioner;
use crate::report::Report;
use crate::units::{DeploymentUnit, UnitContext};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod factory;

pub use factory::UnitFactory;

/// Input accepted by [`DeploymentComposite::append`]
pub enum Component {
    Unit(Box<dyn DeploymentUnit>),
    List(Vec<Component>),
}

impl Component {
    pub fn unit(unit: impl DeploymentUnit + 'static) -> Self {
        Component::Unit(Box::new(unit))
    }

    pub fn list<I>(units: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn DeploymentUnit>>,
    {
        Component::List(units.into_iter().map(Component::Unit).collect())
    }
}

impl From<Box<dyn DeploymentUnit>> for Component {
    fn from(unit: Box<dyn DeploymentUnit>) -> Self {
        Component::Unit(unit)
    }
}

impl From<Vec<Box<dyn DeploymentUnit>>> for Component {
    fn from(units: Vec<Box<dyn DeploymentUnit>>) -> Self {
        Component::list(units)
    }
}

/// Unit reports of one run, in deployment order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReport {
    pub reports: Vec<Report>,
    pub divider: String,
}

impl DeploymentReport {
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl fmt::Display for DeploymentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, report) in self.reports.iter().enumerate() {
            if i > 0 {
                write!(f, "\n{}\n", self.divider)?;
            }
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}

pub struct DeploymentComposite {
    units: Vec<Box<dyn DeploymentUnit>>,
    engine: Arc<dyn ContainerEngine>,
    console: Arc<dyn Console>,
    network: NetworkConfig,
    images: ImageResolver,
    divider: String,
    poll_interval: Duration,
}

impl DeploymentComposite {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        console: Arc<dyn Console>,
        network: NetworkConfig,
        recipes_dir: impl Into<PathBuf>,
    ) -> Self {
        let images = ImageResolver::new(engine.clone(), console.clone(), recipes_dir);
        Self {
            units: Vec::new(),
            engine,
            console,
            network,
            images,
            divider: crate::config::DEFAULT_REPORT_DIVIDER.to_string(),
            poll_interval: crate::readiness::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_divider(mut self, divider: impl Into<String>) -> Self {
        self.divider = divider.into();
        self
    }

    /// Pause between readiness probes of units that poll
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Appends a unit or a flat list of units.
    ///
    /// Nested lists and container names already present are rejected and
    /// leave the sequence untouched.
    pub fn append(&mut self, component: impl Into<Component>) -> Result<(), ConfigError> {
        let incoming = match component.into() {
            Component::Unit(unit) => vec![unit],
            Component::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Component::Unit(unit) => Ok(unit),
                    Component::List(_) => Err(ConfigError::NestedComponentList),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut names: HashSet<&str> = self.units.iter().map(|u| u.container_name()).collect();
        for unit in &incoming {
            if !names.insert(unit.container_name()) {
                return Err(ConfigError::DuplicateContainerName {
                    name: unit.container_name().to_string(),
                });
            }
        }

        self.units.extend(incoming);
        Ok(())
    }

    /// Drops a unit before execution; true when one was removed
    pub fn remove(&mut self, container_name: &str) -> bool {
        let before = self.units.len();
        self.units.retain(|u| u.container_name() != container_name);
        self.units.len() != before
    }

    pub fn container_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.container_name()).collect()
    }

    pub fn units(&self) -> &[Box<dyn DeploymentUnit>] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Pulls images, prepares the network, then creates and reports every unit in order
    pub async fn execute(&mut self) -> Result<DeploymentReport> {
        let mut report = DeploymentReport {
            reports: Vec::new(),
            divider: self.divider.clone(),
        };

        if self.units.is_empty() {
            info!("Nothing to deploy");
            return Ok(report);
        }

        info!("🚀 Deploying {} units", self.units.len());

        let references: Vec<String> = self
            .units
            .iter()
            .filter_map(|u| u.registry_image().map(str::to_string))
            .collect();
        self.images
            .prepare_images(references.iter().map(String::as_str))
            .await?;

        NetworkProvisioner::new(self.engine.as_ref(), &self.network)
            .prepare_network()
            .await?;

        let roster = self
            .container_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let ctx = UnitContext::new(
            self.engine.clone(),
            self.console.clone(),
            self.network.clone(),
            self.images.clone(),
        )
        .with_roster(roster)
        .with_poll_interval(self.poll_interval);

        for unit in self.units.iter_mut() {
            let name = unit.container_name().to_string();
            info!("📦 Deploying {} ({})", name, unit.kind());

            let outcome = match unit.create(&ctx).await {
                Ok(()) => ctx.inspect_after_start(unit.profile_mut()).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(unit_report) => report.reports.push(unit_report),
                Err(e) => {
                    error!(
                        "❌ {} failed in state {:?}: {}",
                        name,
                        unit.profile().state(),
                        e
                    );
                    self.console.failure(&format!("{} failed: {}", name, e));
                    return Err(e);
                }
            }
        }

        info!("✅ Deployment complete");
        Ok(report)
    }
}
