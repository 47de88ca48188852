//! Environment Bootstrap
//!
//! Makes sure the isolated network exists and the container proxy is running
//! and attached to it before any applet operation.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::agent::manager::AppletManager;
use crate::agent::routing::compare_versions;
use crate::error::{NamError, Result};
use crate::runtime::adapter::{BuildImageRequest, CreateContainerOptions, NetworkInfo, PortBinding};

/// Label set on every container this agent creates.
pub const MANAGED_LABEL: &str = "nodeswork.managed";

/// Container proxy version observed on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub version: String,
    pub latest_version: Option<String>,
}

impl ProxyInfo {
    pub fn upgrade_available(&self) -> bool {
        self.latest_version
            .as_deref()
            .map(|latest| compare_versions(latest, &self.version) == Ordering::Greater)
            .unwrap_or(false)
    }
}

pub(crate) fn managed_labels() -> HashMap<String, String> {
    HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])
}

impl AppletManager {
    /// Ensure the network exists and the container proxy runs inside it.
    ///
    /// Idempotent: a second call on a healthy engine issues no mutating
    /// engine commands.
    pub async fn check_environment(&self) -> Result<NetworkInfo> {
        let engine = &self.config.engine;

        let networks = self
            .runtime
            .list_networks()
            .await
            .map_err(|e| NamError::engine("network ls", e))?;
        if !networks.iter().any(|n| n == &engine.network) {
            debug!(network = %engine.network, "Network is not setup, creating");
            self.runtime
                .create_network(&engine.network, engine.internal_network)
                .await
                .map_err(|e| NamError::engine("network create", e))?;
        }

        let network = self
            .runtime
            .inspect_network(&engine.network)
            .await
            .map_err(|e| NamError::engine("network inspect", e))?;
        debug!(
            subnet = %network.subnet,
            gateway = %network.gateway,
            members = network.containers.len(),
            "Network configuration"
        );
        *self.network.write() = Some(network.clone());

        let containers = self
            .runtime
            .list_containers(false)
            .await
            .map_err(|e| NamError::engine("ps", e))?;

        match containers.iter().find(|c| c.name == engine.proxy_container) {
            None => {
                debug!("Container proxy is not running, starting");
                self.install_container_proxy(&network.subnet).await;
            }
            Some(proxy) => {
                let version = proxy
                    .image
                    .rsplit_once(':')
                    .map(|(_, tag)| tag.to_string())
                    .unwrap_or_default();
                let latest = match self.releases.latest_version(&engine.proxy_package).await {
                    Ok(latest) => Some(latest),
                    Err(e) => {
                        warn!(error = %e, "Failed to look up latest container proxy");
                        None
                    }
                };
                let info = ProxyInfo {
                    version,
                    latest_version: latest,
                };
                if info.upgrade_available() {
                    info!(
                        current = %info.version,
                        latest = ?info.latest_version,
                        "Container proxy upgrade available"
                    );
                }
                *self.proxy.write() = Some(info);
            }
        }

        if network.member(&engine.proxy_container).is_none() {
            debug!("Container proxy is not in network, connecting");
            if let Err(e) = self
                .runtime
                .connect_network(&engine.network, &engine.proxy_container)
                .await
            {
                warn!(error = %e, "Failed to connect container proxy to network");
            }
        }

        debug!("Environment setup correctly");
        Ok(network)
    }

    /// Build and start the latest container proxy. Failures are logged.
    pub async fn install_container_proxy(&self, subnet: &str) {
        let engine = &self.config.engine;

        let version = match self.releases.latest_version(&engine.proxy_package).await {
            Ok(version) => version,
            Err(e) => {
                error!(error = %e, "Failed to resolve container proxy version");
                return;
            }
        };
        let tag = format!("{}:{}", engine.proxy_container, version);

        let build = BuildImageRequest {
            tag: tag.clone(),
            context: engine.docker_root.join("container-proxy"),
            build_args: vec![("version".to_string(), version.clone())],
        };
        debug!(tag = %tag, context = %build.context.display(), "Building container proxy");
        if let Err(e) = self.runtime.build_image(build).await {
            error!(error = %e, "Failed to build container proxy");
        }

        match self.runtime.remove_container(&engine.proxy_container, true).await {
            Ok(true) => debug!("Removed stale container proxy"),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Failed to remove container proxy"),
        }

        let options = CreateContainerOptions {
            name: engine.proxy_container.clone(),
            image: tag,
            env: vec![
                ("NAM_HOST".to_string(), engine.host_callback.clone()),
                ("SUB_NET".to_string(), subnet.to_string()),
            ],
            ports: vec![PortBinding {
                container_port: engine.proxy_port,
                host_port: Some(engine.proxy_port),
                host_ip: None,
                protocol: "tcp".to_string(),
            }],
            labels: managed_labels(),
            network: None,
        };
        match self.create_and_start(options).await {
            Ok(id) => info!(id = %id, version = %version, "Container proxy started"),
            Err(e) => error!(error = %e, "Failed to start container proxy"),
        }

        *self.proxy.write() = Some(ProxyInfo {
            version: version.clone(),
            latest_version: Some(version),
        });
    }

    /// Create a container and start it, removing it again if start fails.
    pub(crate) async fn create_and_start(
        &self,
        options: CreateContainerOptions,
    ) -> anyhow::Result<String> {
        let name = options.name.clone();
        let id = self.runtime.create_container(options).await?;
        debug!(id = %id, name = %name, "Container created");

        if let Err(e) = self.runtime.start_container(&id).await {
            warn!(id = %id, "Start failed, cleaning up container");
            let _ = self.runtime.remove_container(&id, true).await;
            return Err(e);
        }
        Ok(id)
    }
}
