//! nimbus.toml configuration parser.
//!
//! Describes the static node topology, the execution backend and the
//! daemon's server settings. The node set is read once at startup.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// How often each node sweeps for expired workloads (e.g. "15s").
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_sweep_interval() -> String {
    "15s".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process simulated backend.
    #[default]
    Memory,
    /// Docker Engine API.
    Docker,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// `unix:///var/run/docker.sock` or `tcp://host:port`. Falls back to
    /// `DOCKER_HOST`, then the default unix socket.
    pub docker_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Total CPU in fractional cores.
    pub cpu: f64,
    /// Total memory in MB.
    pub memory_mb: u64,
}

impl NimbusConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: NimbusConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The built-in two-node topology used when no config file is given.
    pub fn two_node_default() -> Self {
        NimbusConfig {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            nodes: vec![
                NodeConfig {
                    id: "node1".to_string(),
                    cpu: 4.0,
                    memory_mb: 8192,
                },
                NodeConfig {
                    id: "node2".to_string(),
                    cpu: 8.0,
                    memory_mb: 16384,
                },
            ],
        }
    }

    /// Parsed sweep interval.
    pub fn sweep_interval(&self) -> anyhow::Result<Duration> {
        let interval = parse_duration(&self.server.sweep_interval)?;
        if interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than zero");
        }
        Ok(interval)
    }

    /// Reject topologies the scheduler cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("at least one node must be configured");
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                anyhow::bail!("node id must not be empty");
            }
            if !seen.insert(node.id.as_str()) {
                anyhow::bail!("duplicate node id: {}", node.id);
            }
            if !node.cpu.is_finite() || node.cpu <= 0.0 {
                anyhow::bail!("node {}: cpu must be a positive number", node.id);
            }
            if node.memory_mb == 0 {
                anyhow::bail!("node {}: memory_mb must be positive", node.id);
            }
        }
        self.sweep_interval()?;
        Ok(())
    }
}
