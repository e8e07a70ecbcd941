//! Data shared between the units, the engine boundary and the reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Image marker meaning "build this unit's image from its recipe"
pub const BUILD_FROM_SOURCE: &str = "build-from-source";

/// Where a unit's image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A stable reference pulled ahead of time
    Registry(String),
    /// Built from the named recipe file
    BuildFromSource { recipe: String },
}

impl ImageSource {
    /// Resolves a configured image name; the build marker needs a recipe name.
    pub fn from_config(image_name: &str, recipe: Option<&str>) -> Option<Self> {
        if image_name == BUILD_FROM_SOURCE {
            recipe.map(|r| ImageSource::BuildFromSource {
                recipe: r.to_string(),
            })
        } else {
            Some(ImageSource::Registry(image_name.to_string()))
        }
    }

    pub fn registry_reference(&self) -> Option<&str> {
        match self {
            ImageSource::Registry(reference) => Some(reference),
            ImageSource::BuildFromSource { .. } => None,
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Registry(reference) => write!(f, "{}", reference),
            ImageSource::BuildFromSource { recipe } => write!(f, "{} ({})", BUILD_FROM_SOURCE, recipe),
        }
    }
}

/// The primary exposed port of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub docker_port: u16,
    pub localhost_port: u16,
}

/// Static address and hostname aliases inside the virtual network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub ipv4_address: Ipv4Addr,
    pub aliases: Vec<String>,
}

impl NetworkIdentity {
    /// First alias, used as the container hostname
    pub fn hostname(&self) -> Option<&str> {
        self.aliases.first().map(String::as_str)
    }
}

/// Read-write host directory mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

/// Per-network endpoint settings of a new container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub network: String,
    pub ipv4_address: Ipv4Addr,
    pub aliases: Vec<String>,
    /// peer container name -> alias
    pub links: BTreeMap<String, String>,
}

/// Everything the engine needs to create one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub ports: Vec<PortPair>,
    pub binds: Vec<BindMount>,
    pub env: BTreeMap<String, String>,
    pub privileged: bool,
    /// Keep stdin open and allocate a TTY
    pub interactive: bool,
    pub endpoint: EndpointConfig,
}

/// Build request handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub tag: String,
    pub recipe_name: String,
    pub recipe: String,
    pub no_cache: bool,
    pub remove_intermediate: bool,
}

/// One decoded record of a pull or build log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

impl LogRecord {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn stream(line: impl Into<String>) -> Self {
        Self {
            stream: Some(line.into()),
            ..Default::default()
        }
    }
}

/// Network as listed by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

/// A host port published for a container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// e.g. "3306/tcp"
    pub container_port: String,
    pub host_ip: String,
    pub host_port: String,
}

/// Subset of an inspected container used for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    /// network name -> address inside it
    pub networks: BTreeMap<String, String>,
    pub ports: Vec<PublishedPort>,
}
