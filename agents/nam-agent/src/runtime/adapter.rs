//! Runtime Adapter Trait
//!
//! Defines the command/query interface the applet manager needs from a
//! container engine.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A container as listed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state, e.g. `running` or `exited`
    pub state: String,
    /// Human readable status, e.g. `Up 3 minutes`
    pub status_text: String,
    pub ports: Vec<PortBinding>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Port binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub host_ip: Option<String>,
    pub protocol: String,
}

/// Container creation options
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOptions {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortBinding>,
    pub labels: HashMap<String, String>,
    pub network: Option<String>,
}

/// Image build request; `context` is a directory on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildImageRequest {
    pub tag: String,
    pub context: PathBuf,
    pub build_args: Vec<(String, String)>,
}

/// Image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub repo_tags: Vec<String>,
}

/// A container attached to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMember {
    pub id: String,
    pub name: String,
    /// Address in CIDR notation, e.g. `172.18.0.2/16`
    pub ipv4_address: String,
}

impl NetworkMember {
    /// IPv4 address without the prefix length.
    pub fn ip(&self) -> &str {
        self.ipv4_address
            .split_once('/')
            .map(|(ip, _)| ip)
            .unwrap_or(&self.ipv4_address)
    }
}

/// The isolated container network, as inspected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub subnet: String,
    pub gateway: String,
    pub containers: Vec<NetworkMember>,
}

impl NetworkInfo {
    pub fn member(&self, name: &str) -> Option<&NetworkMember> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Runtime adapter trait - common interface for container runtimes
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Get the runtime type name
    fn runtime_type(&self) -> &str;

    /// Get runtime version information
    async fn version(&self) -> Result<String>;

    /// List network names
    async fn list_networks(&self) -> Result<Vec<String>>;

    /// Create a bridge network
    async fn create_network(&self, name: &str, internal: bool) -> Result<String>;

    /// Inspect a network's addressing and members
    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo>;

    /// Attach a container to a network
    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;

    /// List containers
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    /// Create a new container
    async fn create_container(&self, options: CreateContainerOptions) -> Result<String>;

    /// Start a container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container
    async fn stop_container(&self, id: &str, timeout_secs: Option<u64>) -> Result<()>;

    /// Remove a container. Returns `false` when no such container exists.
    async fn remove_container(&self, id: &str, force: bool) -> Result<bool>;

    /// Build an image from a local context directory
    async fn build_image(&self, request: BuildImageRequest) -> Result<()>;

    /// List images
    async fn list_images(&self) -> Result<Vec<ImageInfo>>;
}
