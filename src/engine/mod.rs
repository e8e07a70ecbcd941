//! Container engine boundary.
//!
//! The deployment core only talks to the engine through [`ContainerEngine`].
//! [`DockerCli`] drives the `docker` binary; tests use recording fakes.

use crate::config::NetworkConfig;
use crate::error::EngineError;
use crate::types::{BuildRequest, ContainerDetails, ContainerSpec, LogRecord, NetworkSummary};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod docker;

pub use docker::DockerCli;

/// Pull/build log: finite, lazy, and only restartable by issuing the call again
pub type LogStream = BoxStream<'static, Result<LogRecord, EngineError>>;

/// Combined stdout/stderr of an in-container command, chunk by chunk
pub type OutputStream = BoxStream<'static, Result<String, EngineError>>;

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, EngineError>;

    /// Removes by id; names can be ambiguous when duplicates exist
    async fn remove_network(&self, id: &str) -> Result<(), EngineError>;

    /// Creates a network with a single IPAM pool; returns its id
    async fn create_network(&self, network: &NetworkConfig) -> Result<String, EngineError>;

    async fn pull_image(&self, reference: &str) -> Result<LogStream, EngineError>;

    async fn build_image(&self, request: &BuildRequest) -> Result<LogStream, EngineError>;

    /// Returns the new container id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, name: &str) -> Result<(), EngineError>;

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails, EngineError>;

    /// Runs `command` through a shell inside a running container.
    /// A non-zero exit surfaces as the last item of the stream.
    async fn exec(&self, container: &str, command: &str) -> Result<OutputStream, EngineError>;
}
