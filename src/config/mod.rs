use crate::error::{ConfigError, DeployError, Result};
use crate::types::{ImageSource, NetworkIdentity, PortPair, BUILD_FROM_SOURCE};
use ipnet::Ipv4Net;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Divider placed between unit reports in the deployment report
pub const DEFAULT_REPORT_DIVIDER: &str =
    "------------------------------------------------------------";

/// Static configuration of one deployment run, usually read from `deployer.toml`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeployerConfig {
    pub deployment: DeploymentSettings,
    pub network: NetworkConfig,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositorySettings>,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeploymentSettings {
    /// Root for cloned sources; a leading `~` is expanded
    pub base_dir: PathBuf,
    /// Directory holding the named build recipes
    pub recipes_dir: PathBuf,
    /// Service keys in deployment order
    pub order: Vec<String>,
    #[serde(default = "default_divider")]
    pub report_divider: String,
}

fn default_divider() -> String {
    DEFAULT_REPORT_DIVIDER.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub name: String,
    /// CIDR notation
    pub subnet: String,
    pub gateway: Ipv4Addr,
    /// Older network names removed together with `name`
    #[serde(default)]
    pub legacy_names: Vec<String>,
}

impl NetworkConfig {
    pub fn subnet_net(&self) -> Result<Ipv4Net, ConfigError> {
        Ipv4Net::from_str(&self.subnet).map_err(|_| ConfigError::InvalidSubnet {
            subnet: self.subnet.clone(),
        })
    }

    /// Whether a listed network must be removed before recreating ours
    pub fn is_replaced_by_us(&self, name: &str) -> bool {
        name == self.name || self.legacy_names.iter().any(|legacy| legacy == name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RepositorySettings {
    pub url: String,
    pub branch: String,
    /// Relative paths resolve under `deployment.base_dir`
    pub local_dir: PathBuf,
}

/// Settings every service shares
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceSettings {
    pub container_name: String,
    pub image_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    pub docker_port: u16,
    pub local_port: u16,
    pub ipv4_address: Ipv4Addr,
    pub hostnames: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl ServiceSettings {
    pub fn image_source(&self) -> Option<ImageSource> {
        ImageSource::from_config(&self.image_name, self.recipe.as_deref())
    }

    pub fn ports(&self) -> PortPair {
        PortPair {
            docker_port: self.docker_port,
            localhost_port: self.local_port,
        }
    }

    pub fn network_identity(&self) -> NetworkIdentity {
        NetworkIdentity {
            ipv4_address: self.ipv4_address,
            aliases: self.hostnames.clone(),
        }
    }

    /// First configured hostname, falling back to the address
    pub fn host(&self) -> String {
        self.hostnames
            .first()
            .cloned()
            .unwrap_or_else(|| self.ipv4_address.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    /// Sleep for the whole grace period
    #[default]
    Fixed,
    /// Query the server until it answers or the grace period ends
    Poll,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseSettings {
    #[serde(flatten)]
    pub service: ServiceSettings,
    pub root_password: String,
    /// Seconds
    pub wait_for_start_timeout: u64,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
    /// Schemas created right after start
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IdentitySettings {
    #[serde(flatten)]
    pub service: ServiceSettings,
    /// Schema the identity service stores its data in
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiSettings {
    #[serde(flatten)]
    pub service: ServiceSettings,
    /// Named databases; the first is the shared one, the rest are per tenant
    pub databases: Vec<String>,
    #[serde(default)]
    pub token_exchange: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UiBundleSettings {
    #[serde(flatten)]
    pub service: ServiceSettings,
    /// Path of the generated runtime config, relative to the source tree
    pub config_asset: PathBuf,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServicesConfig {
    pub mysql: DatabaseSettings,
    pub rabbitmq: ServiceSettings,
    pub sso: IdentitySettings,
    pub feedback_api: ApiSettings,
    pub ui_bundle: UiBundleSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graylog: Option<ServiceSettings>,
}

/// Keys of the services the deployer knows how to build units for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKey {
    Mysql,
    Rabbitmq,
    Sso,
    FeedbackApi,
    UiBundle,
    Graylog,
}

impl ServiceKey {
    pub const ALL: [ServiceKey; 6] = [
        ServiceKey::Mysql,
        ServiceKey::Rabbitmq,
        ServiceKey::Sso,
        ServiceKey::FeedbackApi,
        ServiceKey::UiBundle,
        ServiceKey::Graylog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKey::Mysql => "mysql",
            ServiceKey::Rabbitmq => "rabbitmq",
            ServiceKey::Sso => "sso",
            ServiceKey::FeedbackApi => "feedback_api",
            ServiceKey::UiBundle => "ui_bundle",
            ServiceKey::Graylog => "graylog",
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownService {
                name: s.to_string(),
            })
    }
}

impl ServicesConfig {
    pub fn get(&self, key: ServiceKey) -> Option<&ServiceSettings> {
        match key {
            ServiceKey::Mysql => Some(&self.mysql.service),
            ServiceKey::Rabbitmq => Some(&self.rabbitmq),
            ServiceKey::Sso => Some(&self.sso.service),
            ServiceKey::FeedbackApi => Some(&self.feedback_api.service),
            ServiceKey::UiBundle => Some(&self.ui_bundle.service),
            ServiceKey::Graylog => self.graylog.as_ref(),
        }
    }

    /// All configured services with their keys
    pub fn iter(&self) -> impl Iterator<Item = (ServiceKey, &ServiceSettings)> + '_ {
        ServiceKey::ALL
            .into_iter()
            .filter_map(move |key| self.get(key).map(|settings| (key, settings)))
    }
}

impl DeployerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("📄 Loading deployer configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DeployError::Config(ConfigError::NotFound {
                path: path.display().to_string(),
            }),
            _ => DeployError::Io(e),
        })?;

        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DeployerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Base directory with `~` expanded
    pub fn base_dir(&self) -> PathBuf {
        expand_home(&self.deployment.base_dir)
    }

    /// Repositories with their local directories resolved
    pub fn resolved_repositories(&self) -> BTreeMap<String, RepositorySettings> {
        self.repositories
            .iter()
            .map(|(name, repo)| {
                let mut repo = repo.clone();
                repo.local_dir = self.resolve_local_dir(&repo.local_dir);
                (name.clone(), repo)
            })
            .collect()
    }

    /// Local checkout of the repository a service mounts, if any
    pub fn source_dir(&self, service: &ServiceSettings) -> Option<PathBuf> {
        let key = service.repository.as_ref()?;
        let repo = self.repositories.get(key)?;
        Some(self.resolve_local_dir(&repo.local_dir))
    }

    fn resolve_local_dir(&self, local_dir: &Path) -> PathBuf {
        let expanded = expand_home(local_dir);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir().join(expanded)
        }
    }

    /// Deployment order as service keys
    pub fn ordered_keys(&self) -> Result<Vec<ServiceKey>, ConfigError> {
        self.deployment
            .order
            .iter()
            .map(|name| ServiceKey::from_str(name))
            .collect()
    }

    /// Checks the invariants units and the network provisioner rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        info!("🔍 Validating deployer configuration");

        let subnet = self.network.subnet_net()?;
        if !is_host_address(&subnet, self.network.gateway) {
            return Err(ConfigError::AddressOutsideSubnet {
                owner: "gateway".to_string(),
                address: self.network.gateway.to_string(),
                subnet: self.network.subnet.clone(),
            });
        }

        self.validate_services(&subnet)?;
        self.validate_identifiers()?;
        self.validate_order()?;

        info!("✅ Configuration validation passed");
        Ok(())
    }

    fn validate_services(&self, subnet: &Ipv4Net) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();

        for (key, service) in self.services.iter() {
            debug!("Validating service: {}", key);

            if !names.insert(service.container_name.as_str()) {
                return Err(ConfigError::DuplicateContainerName {
                    name: service.container_name.clone(),
                });
            }

            if !is_host_address(subnet, service.ipv4_address) {
                return Err(ConfigError::AddressOutsideSubnet {
                    owner: key.to_string(),
                    address: service.ipv4_address.to_string(),
                    subnet: self.network.subnet.clone(),
                });
            }

            if service.ipv4_address == self.network.gateway {
                return Err(ConfigError::GatewayCollision {
                    owner: key.to_string(),
                    address: service.ipv4_address.to_string(),
                });
            }

            if !addresses.insert(service.ipv4_address) {
                return Err(ConfigError::DuplicateAddress {
                    address: service.ipv4_address.to_string(),
                });
            }

            if service.image_name == BUILD_FROM_SOURCE && service.recipe.is_none() {
                return Err(ConfigError::MissingRecipe {
                    service: key.to_string(),
                });
            }

            if let Some(ref repository) = service.repository {
                if !self.repositories.contains_key(repository) {
                    return Err(ConfigError::MissingRepository {
                        service: key.to_string(),
                        repository: repository.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_identifiers(&self) -> Result<(), ConfigError> {
        let identifier = Regex::new(r"^[A-Za-z0-9_]+$").map_err(|_| {
            ConfigError::InvalidIdentifier {
                field: "pattern".to_string(),
                value: String::new(),
            }
        })?;

        let schemas = self
            .services
            .mysql
            .databases
            .iter()
            .map(|db| ("services.mysql.databases", db))
            .chain(
                self.services
                    .feedback_api
                    .databases
                    .iter()
                    .map(|db| ("services.feedback_api.databases", db)),
            )
            .chain(std::iter::once((
                "services.sso.database",
                &self.services.sso.database,
            )));

        for (field, value) in schemas {
            if !identifier.is_match(value) {
                return Err(ConfigError::InvalidIdentifier {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }

    fn validate_order(&self) -> Result<(), ConfigError> {
        for key in self.ordered_keys()? {
            if self.services.get(key).is_none() {
                return Err(ConfigError::MissingService {
                    name: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Whether `address` can be assigned to an endpoint of `subnet`.
///
/// Network and broadcast addresses are excluded except on /31 and /32.
fn is_host_address(subnet: &Ipv4Net, address: Ipv4Addr) -> bool {
    if !subnet.contains(&address) {
        return false;
    }
    subnet.prefix_len() >= 31 || (address != subnet.network() && address != subnet.broadcast())
}

/// Expands a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn service(
    container_name: &str,
    image_name: &str,
    recipe: Option<&str>,
    ports: (u16, u16),
    address: [u8; 4],
    hostname: &str,
    repository: Option<&str>,
) -> ServiceSettings {
    ServiceSettings {
        container_name: container_name.to_string(),
        image_name: image_name.to_string(),
        recipe: recipe.map(str::to_string),
        docker_port: ports.0,
        local_port: ports.1,
        ipv4_address: Ipv4Addr::from(address),
        hostnames: vec![hostname.to_string()],
        repository: repository.map(str::to_string),
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        let mut repositories = BTreeMap::new();
        repositories.insert(
            "feedback-api-python".to_string(),
            RepositorySettings {
                url: "git@github.com:Alliera/feedback-api-python.git".to_string(),
                branch: "master".to_string(),
                local_dir: PathBuf::from("feedback-api-python"),
            },
        );
        repositories.insert(
            "sso".to_string(),
            RepositorySettings {
                url: "git@github.com:Alliera/sso.git".to_string(),
                branch: "master".to_string(),
                local_dir: PathBuf::from("sso"),
            },
        );
        repositories.insert(
            "feedback_ui".to_string(),
            RepositorySettings {
                url: "git@github.com:Alliera/XirclFeedbackBundle.git".to_string(),
                branch: "master".to_string(),
                local_dir: PathBuf::from("XirclFeedbackBundle"),
            },
        );

        let mut features = BTreeMap::new();
        features.insert("feedback_widget".to_string(), true);
        features.insert("sso_login".to_string(), true);

        Self {
            deployment: DeploymentSettings {
                base_dir: PathBuf::from("~/deployer_test_dir/feedback"),
                recipes_dir: PathBuf::from("docker_files"),
                order: vec![
                    "mysql".to_string(),
                    "rabbitmq".to_string(),
                    "sso".to_string(),
                    "feedback_api".to_string(),
                    "ui_bundle".to_string(),
                ],
                report_divider: default_divider(),
            },
            network: NetworkConfig {
                name: "dep_network".to_string(),
                subnet: "172.16.1.0/24".to_string(),
                gateway: Ipv4Addr::new(172, 16, 1, 254),
                legacy_names: vec!["dev_net".to_string()],
            },
            repositories,
            services: ServicesConfig {
                mysql: DatabaseSettings {
                    service: service(
                        "dep_mysql57",
                        "centos/mysql-57-centos7",
                        None,
                        (3306, 3370),
                        [172, 16, 1, 2],
                        "mysqlhost",
                        None,
                    ),
                    root_password: "root".to_string(),
                    wait_for_start_timeout: 10,
                    wait_strategy: WaitStrategy::Fixed,
                    databases: vec![
                        "sso".to_string(),
                        "feedback".to_string(),
                        "feedback_tenant".to_string(),
                    ],
                },
                rabbitmq: service(
                    "dep_rabbitmq",
                    "rabbitmq:3-management",
                    None,
                    (15672, 15675),
                    [172, 16, 1, 3],
                    "rabbitmqhost",
                    None,
                ),
                sso: IdentitySettings {
                    service: service(
                        "dep_sso",
                        BUILD_FROM_SOURCE,
                        Some("sso_local_Dockerfile"),
                        (81, 10180),
                        [172, 16, 1, 4],
                        "ssohost",
                        Some("sso"),
                    ),
                    database: "sso".to_string(),
                },
                feedback_api: ApiSettings {
                    service: service(
                        "dep_feedback_api",
                        BUILD_FROM_SOURCE,
                        Some("feedback_api_local_Dockerfile"),
                        (81, 10181),
                        [172, 16, 1, 5],
                        "feedbackapihost",
                        Some("feedback-api-python"),
                    ),
                    databases: vec!["feedback".to_string(), "feedback_tenant".to_string()],
                    token_exchange: false,
                },
                ui_bundle: UiBundleSettings {
                    service: service(
                        "dep_xircl_ui",
                        BUILD_FROM_SOURCE,
                        Some("xircl_ui_local_Dockerfile"),
                        (8080, 8081),
                        [172, 16, 1, 6],
                        "xircluihost",
                        Some("feedback_ui"),
                    ),
                    config_asset: PathBuf::from("Resources/public/js/runtime-config.js"),
                    features,
                },
                graylog: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn default_configuration_is_valid() {
        let config = DeployerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.ordered_keys().unwrap(),
            vec![
                ServiceKey::Mysql,
                ServiceKey::Rabbitmq,
                ServiceKey::Sso,
                ServiceKey::FeedbackApi,
                ServiceKey::UiBundle
            ]
        );
    }

    #[test]
    fn toml_round_trip_keeps_every_setting() {
        let config = DeployerConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = DeployerConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = DeployerConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn address_outside_subnet_is_rejected() {
        let mut config = DeployerConfig::default();
        config.services.rabbitmq.ipv4_address = Ipv4Addr::new(10, 0, 0, 3);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressOutsideSubnet { .. })
        ));
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let mut config = DeployerConfig::default();
        config.services.rabbitmq.ipv4_address = config.services.mysql.service.ipv4_address;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn duplicate_container_names_are_rejected() {
        let mut config = DeployerConfig::default();
        config.services.rabbitmq.container_name = "dep_mysql57".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateContainerName { .. })
        ));
    }

    #[test_case("graylog" ; "optional service not configured")]
    #[test_case("redis" ; "unknown service")]
    fn order_entries_must_resolve(entry: &str) {
        let mut config = DeployerConfig::default();
        config.deployment.order.push(entry.to_string());
        assert!(config.validate().is_err());
    }

    #[test_case("feedback-db" ; "dash")]
    #[test_case("feedback;drop" ; "shell metacharacter")]
    #[test_case("" ; "empty")]
    fn schema_names_must_be_identifiers(name: &str) {
        let mut config = DeployerConfig::default();
        config.services.mysql.databases.push(name.to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdentifier { .. })
        ));
    }

    #[test_case([172, 16, 1, 0] ; "network address")]
    #[test_case([172, 16, 1, 255] ; "broadcast address")]
    fn network_and_broadcast_addresses_are_not_assignable(address: [u8; 4]) {
        let mut config = DeployerConfig::default();
        config.services.rabbitmq.ipv4_address = Ipv4Addr::from(address);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressOutsideSubnet { .. })
        ));

        let mut config = DeployerConfig::default();
        config.network.gateway = Ipv4Addr::from(address);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressOutsideSubnet { ref owner, .. }) if owner == "gateway"
        ));
    }

    #[test]
    fn service_on_the_gateway_address_is_its_own_error() {
        let mut config = DeployerConfig::default();
        config.services.rabbitmq.ipv4_address = config.network.gateway;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GatewayCollision { ref owner, .. }) if owner == "rabbitmq"
        ));
    }

    #[test]
    fn invalid_subnet_is_reported() {
        let mut config = DeployerConfig::default();
        config.network.subnet = "172.16.1.0/33".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSubnet { .. })
        ));
    }

    #[test]
    fn relative_repository_dirs_resolve_under_base_dir() {
        let mut config = DeployerConfig::default();
        config.deployment.base_dir = PathBuf::from("/srv/deploy");
        let repos = config.resolved_repositories();
        assert_eq!(repos["sso"].local_dir, PathBuf::from("/srv/deploy/sso"));
        assert_eq!(
            config.source_dir(&config.services.sso.service),
            Some(PathBuf::from("/srv/deploy/sso"))
        );
        assert_eq!(config.source_dir(&config.services.rabbitmq), None);
    }

    #[test]
    fn legacy_networks_are_replaced() {
        let network = DeployerConfig::default().network;
        assert!(network.is_replaced_by_us("dep_network"));
        assert!(network.is_replaced_by_us("dev_net"));
        assert!(!network.is_replaced_by_us("bridge"));
    }
}
