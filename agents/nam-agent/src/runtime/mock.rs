//! In-memory RuntimeAdapter used by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::runtime::adapter::{
    BuildImageRequest, ContainerInfo, CreateContainerOptions, ImageInfo,
    NetworkInfo, NetworkMember, PortBinding, RuntimeAdapter,
};

/// Mutating engine commands, recorded in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateNetwork(String),
    ConnectNetwork { network: String, container: String },
    Build(BuildImageRequest),
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct MockState {
    networks: HashMap<String, NetworkInfo>,
    containers: Vec<ContainerInfo>,
    images: Vec<ImageInfo>,
    calls: Vec<EngineCall>,
    next_ip: u8,
}

#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_network(self, name: &str) -> Self {
        self.state
            .lock()
            .networks
            .insert(name.to_string(), Self::fresh_network());
        self
    }

    /// Register a running container, optionally attached to `network`.
    pub fn add_running(&self, name: &str, image: &str, network: Option<&str>) {
        let mut state = self.state.lock();
        state.containers.push(ContainerInfo {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: image.to_string(),
            state: "running".to_string(),
            status_text: "Up 2 minutes".to_string(),
            ports: vec![PortBinding {
                container_port: 28900,
                host_port: None,
                host_ip: None,
                protocol: "tcp".to_string(),
            }],
        });
        if let Some(network) = network {
            Self::attach(&mut state, network, name);
        }
    }

    pub fn add_image(&self, tag: &str) {
        self.state.lock().images.push(ImageInfo {
            repo_tags: vec![tag.to_string()],
        });
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn fresh_network() -> NetworkInfo {
        NetworkInfo {
            subnet: "172.18.0.0/16".to_string(),
            gateway: "172.18.0.1".to_string(),
            containers: Vec::new(),
        }
    }

    fn attach(state: &mut MockState, network: &str, container: &str) {
        state.next_ip += 1;
        let ip = format!("172.18.0.{}/16", state.next_ip + 1);
        if let Some(net) = state.networks.get_mut(network) {
            net.containers.push(NetworkMember {
                id: format!("id-{}", container),
                name: container.to_string(),
                ipv4_address: ip,
            });
        }
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    fn runtime_type(&self) -> &str {
        "mock"
    }

    async fn version(&self) -> Result<String> {
        Ok("mock 1.0".to_string())
    }

    async fn list_networks(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().networks.keys().cloned().collect())
    }

    async fn create_network(&self, name: &str, _internal: bool) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::CreateNetwork(name.to_string()));
        state
            .networks
            .insert(name.to_string(), Self::fresh_network());
        Ok(format!("net-{}", name))
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo> {
        self.state
            .lock()
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("network {} not found", name))
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::ConnectNetwork {
            network: network.to_string(),
            container: container.to_string(),
        });
        Self::attach(&mut state, network, container);
        Ok(())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .state
            .lock()
            .containers
            .iter()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect())
    }

    async fn create_container(&self, options: CreateContainerOptions) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Create(options.name.clone()));
        if state.containers.iter().any(|c| c.name == options.name) {
            return Err(anyhow!("container name {} already in use", options.name));
        }
        state.containers.push(ContainerInfo {
            id: format!("id-{}", options.name),
            name: options.name.clone(),
            image: options.image,
            state: "created".to_string(),
            status_text: "Created".to_string(),
            ports: options.ports,
        });
        if let Some(network) = options.network {
            Self::attach(&mut state, &network, &options.name);
        }
        Ok(format!("id-{}", options.name))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Start(id.to_string()));
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| anyhow!("no such container {}", id))?;
        container.state = "running".to_string();
        container.status_text = "Up 1 second".to_string();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: Option<u64>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Stop(id.to_string()));
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| anyhow!("no such container {}", id))?;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Remove(id.to_string()));
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id && c.name != id);
        let removed = state.containers.len() != before;
        if removed {
            for network in state.networks.values_mut() {
                network.containers.retain(|m| m.name != id);
            }
        }
        Ok(removed)
    }

    async fn build_image(&self, request: BuildImageRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.images.push(ImageInfo {
            repo_tags: vec![request.tag.clone()],
        });
        state.calls.push(EngineCall::Build(request));
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        Ok(self.state.lock().images.clone())
    }
}
