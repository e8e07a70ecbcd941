use thiserror::Error;

/// Deployer error types, grouped by the stage that produced them
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid build recipe: {recipe}")]
    InvalidBuildRecipe { recipe: String },

    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Source fetch error: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure category, so callers can branch without reading messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Build,
    Engine,
    CommandShape,
    Source,
    Io,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Config(_) | DeployError::Toml(_) | DeployError::TomlSer(_) => {
                ErrorKind::Configuration
            }
            DeployError::InvalidBuildRecipe { .. } => ErrorKind::Build,
            DeployError::Engine(_) | DeployError::Json(_) => ErrorKind::Engine,
            DeployError::InvalidCommand { .. } => ErrorKind::CommandShape,
            DeployError::Source(_) => ErrorKind::Source,
            DeployError::Io(_) => ErrorKind::Io,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at path: {path}")]
    NotFound { path: String },

    #[error("Nested component lists are not accepted; append a flat list of units")]
    NestedComponentList,

    #[error("Container name '{name}' is used by more than one unit")]
    DuplicateContainerName { name: String },

    #[error("Unknown service '{name}' in deployment order")]
    UnknownService { name: String },

    #[error("Service '{name}' is listed in the deployment order but not configured")]
    MissingService { name: String },

    #[error("Invalid subnet: {subnet}")]
    InvalidSubnet { subnet: String },

    #[error("Address {address} of '{owner}' is outside subnet {subnet}")]
    AddressOutsideSubnet {
        owner: String,
        address: String,
        subnet: String,
    },

    #[error("Address {address} is assigned to more than one service")]
    DuplicateAddress { address: String },

    #[error("{owner} uses the network gateway address {address}")]
    GatewayCollision { owner: String, address: String },

    #[error("Invalid identifier '{value}' for {field}")]
    InvalidIdentifier { field: String, value: String },

    #[error("Service '{service}' builds from source but has no recipe")]
    MissingRecipe { service: String },

    #[error("Service '{service}' references unknown repository '{repository}'")]
    MissingRepository { service: String, repository: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to launch container engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Engine command `{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Container not found: {name}")]
    ContainerNotFound { name: String },

    #[error("Container {container} is not attached to network {network}")]
    NotAttached { container: String, network: String },

    #[error("Failed to decode engine output: {reason}")]
    Decode { reason: String },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to launch git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Cloning {url} (branch {branch}) failed: {stderr}")]
    CloneFailed {
        url: String,
        branch: String,
        stderr: String,
    },

    #[error("Failed to prepare {path}: {source}")]
    Prepare {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for deployer results
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_failing_stage() {
        let config: DeployError = ConfigError::NestedComponentList.into();
        assert_eq!(config.kind(), ErrorKind::Configuration);

        let build = DeployError::InvalidBuildRecipe {
            recipe: "sso_local_Dockerfile".to_string(),
        };
        assert_eq!(build.kind(), ErrorKind::Build);

        let engine: DeployError = EngineError::ContainerNotFound {
            name: "dep_sso".to_string(),
        }
        .into();
        assert_eq!(engine.kind(), ErrorKind::Engine);

        let shape = DeployError::InvalidCommand {
            reason: "number".to_string(),
        };
        assert_eq!(shape.kind(), ErrorKind::CommandShape);
    }

    #[test]
    fn build_failures_do_not_carry_a_cause() {
        let err = DeployError::InvalidBuildRecipe {
            recipe: "broken".to_string(),
        };
        assert!(std::error::Error::source(&err).is_none());
        assert_eq!(err.to_string(), "Invalid build recipe: broken");
    }
}
