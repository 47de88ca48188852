//! Docker Adapter
//!
//! Implementation of RuntimeAdapter for Docker using the bollard library.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions as BollardCreateOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::cli::config::EngineConfig;
use crate::runtime::adapter::{
    BuildImageRequest, ContainerInfo, CreateContainerOptions, ImageInfo,
    NetworkInfo, NetworkMember, PortBinding, RuntimeAdapter,
};

/// Image builds install packages; requests may run for a long time.
const ENGINE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Docker runtime adapter
pub struct DockerAdapter {
    client: Docker,
}

impl DockerAdapter {
    /// Connect to the platform's default engine socket.
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_socket_defaults()
            .context("Failed to connect to Docker socket")?;
        Ok(Self {
            client: client.with_timeout(ENGINE_TIMEOUT),
        })
    }

    pub fn with_socket(socket_path: &str) -> Result<Self> {
        let client = Docker::connect_with_socket(
            socket_path,
            ENGINE_TIMEOUT.as_secs(),
            bollard::API_DEFAULT_VERSION,
        )
        .with_context(|| format!("Failed to connect to Docker socket {}", socket_path))?;
        Ok(Self { client })
    }

    /// Connect to `engine.socket` when set, otherwise the default socket.
    pub fn from_config(engine: &EngineConfig) -> Result<Self> {
        match &engine.socket {
            Some(socket) => Self::with_socket(socket),
            None => Self::new(),
        }
    }

    /// Pack a build context directory into an in-memory tarball.
    fn archive_context(context: &Path) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_dir_all(".", context)
            .with_context(|| format!("Failed to archive build context {}", context.display()))?;
        builder
            .into_inner()
            .context("Failed to finish build context archive")
    }
}

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    fn runtime_type(&self) -> &str {
        "docker"
    }

    async fn version(&self) -> Result<String> {
        let version = self.client.version().await?;
        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        ))
    }

    async fn list_networks(&self) -> Result<Vec<String>> {
        let networks = self
            .client
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;

        Ok(networks.into_iter().filter_map(|n| n.name).collect())
    }

    async fn create_network(&self, name: &str, internal: bool) -> Result<String> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            internal,
            ..Default::default()
        };

        let response = self.client.create_network(options).await?;
        let id = response.id.unwrap_or_default();
        info!(network_id = %id, name = %name, internal, "Network created");
        Ok(id)
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo> {
        let network = self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await?;

        let ipam_config = network
            .ipam
            .and_then(|ipam| ipam.config)
            .and_then(|configs| configs.into_iter().next())
            .with_context(|| format!("Network {} has no IPAM configuration", name))?;

        let containers = network
            .containers
            .unwrap_or_default()
            .into_iter()
            .map(|(id, c)| NetworkMember {
                id,
                name: c.name.unwrap_or_default(),
                ipv4_address: c.ipv4_address.unwrap_or_default(),
            })
            .collect();

        Ok(NetworkInfo {
            subnet: ipam_config.subnet.unwrap_or_default(),
            gateway: ipam_config.gateway.unwrap_or_default(),
            containers,
        })
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: container.to_string(),
            ..Default::default()
        };
        self.client.connect_network(network, options).await?;
        info!(network = %network, container = %container, "Container connected to network");
        Ok(())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                name: primary_name(c.names.as_deref()),
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                status_text: c.status.unwrap_or_default(),
                ports: c.ports.as_deref().map(published_ports).unwrap_or_default(),
            })
            .collect())
    }

    async fn create_container(&self, options: CreateContainerOptions) -> Result<String> {
        let env: Vec<String> = options
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = options
            .ports
            .iter()
            .map(|p| (format!("{}/{}", p.container_port, p.protocol), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = options
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/{}", p.container_port, p.protocol),
                    Some(vec![bollard::service::PortBinding {
                        host_ip: p.host_ip.clone(),
                        host_port: p.host_port.map(|port| port.to_string()),
                    }]),
                )
            })
            .collect();

        let host_config = bollard::service::HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: options.network,
            ..Default::default()
        };

        let config = Config {
            image: Some(options.image),
            env: Some(env),
            labels: Some(options.labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = BollardCreateOptions {
            name: &options.name,
            platform: None,
        };

        let response = self.client.create_container(Some(create_options), config).await?;
        info!(container_id = %response.id, name = %options.name, "Container created");

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %id, "Container started");
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: Option<u64>) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs.map(|t| t as i64).unwrap_or(10),
        };
        self.client.stop_container(id, Some(options)).await?;
        info!(container_id = %id, "Container stopped");
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<bool> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.client.remove_container(id, Some(options)).await {
            Ok(()) => {
                info!(container_id = %id, "Container removed");
                Ok(true)
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %id, "Container does not exist");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, request: BuildImageRequest) -> Result<()> {
        let context = request.context.clone();
        let tarball = tokio::task::spawn_blocking(move || Self::archive_context(&context))
            .await
            .context("Build context archiver panicked")??;

        let options = BuildImageOptions::<String> {
            t: request.tag.clone(),
            buildargs: request.build_args.iter().cloned().collect(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(tarball.into()));

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                anyhow::bail!("Build of {} failed: {}", request.tag, error);
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(tag = %request.tag, "{}", line);
                }
            }
        }

        info!(tag = %request.tag, context = %request.context.display(), "Image built");
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|img| ImageInfo {
                repo_tags: img.repo_tags,
            })
            .collect())
    }
}

/// Engine names carry a leading `/`.
fn primary_name(names: Option<&[String]>) -> String {
    names
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

fn published_ports(ports: &[bollard::service::Port]) -> Vec<PortBinding> {
    ports
        .iter()
        .map(|p| PortBinding {
            container_port: p.private_port,
            host_port: p.public_port,
            host_ip: p.ip.clone(),
            protocol: p
                .typ
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "tcp".to_string()),
        })
        .collect()
}
