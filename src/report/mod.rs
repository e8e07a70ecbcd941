use crate::error::EngineError;
use crate::types::{ContainerDetails, PublishedPort};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Connectivity report of one started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub container_name: String,
    pub container_id: String,
    pub created: DateTime<Utc>,
    pub network: String,
    pub internal_address: String,
    /// container port ("3306/tcp") -> host endpoints ("localhost:3370")
    pub ports: BTreeMap<String, Vec<String>>,
}

impl Report {
    /// Builds the report from an inspected container attached to `network`
    pub fn from_details(
        container_name: &str,
        details: &ContainerDetails,
        network: &str,
    ) -> Result<Self, EngineError> {
        let internal_address = details
            .networks
            .get(network)
            .filter(|address| !address.is_empty())
            .cloned()
            .ok_or_else(|| EngineError::NotAttached {
                container: container_name.to_string(),
                network: network.to_string(),
            })?;

        let mut ports: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for published in &details.ports {
            let endpoint = host_endpoint(published);
            let endpoints = ports.entry(published.container_port.clone()).or_default();
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }

        Ok(Self {
            container_name: container_name.to_string(),
            container_id: details.id.clone(),
            created: details.created,
            network: network.to_string(),
            internal_address,
            ports,
        })
    }

    /// Host port numbers, in report order
    pub fn host_ports(&self) -> Vec<&str> {
        self.ports
            .values()
            .flatten()
            .filter_map(|endpoint| endpoint.rsplit(':').next())
            .collect()
    }
}

fn host_endpoint(port: &PublishedPort) -> String {
    match port.host_ip.as_str() {
        "" | "0.0.0.0" | "::" => format!("localhost:{}", port.host_port),
        v6 if v6.contains(':') => format!("[{}]:{}", v6, port.host_port),
        v4 => format!("{}:{}", v4, port.host_port),
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.container_name)?;
        writeln!(f, "  Container ID: {}", self.container_id)?;
        writeln!(
            f,
            "  Created:      {}",
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        write!(f, "  Network:      {}", self.network)?;
        for (container_port, endpoints) in &self.ports {
            write!(
                f,
                "\n  Port:         {}:{} <- {}",
                self.internal_address,
                container_port,
                endpoints.join(", ")
            )?;
        }
        Ok(())
    }
}
