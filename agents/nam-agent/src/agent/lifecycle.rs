//! Applet Lifecycle
//!
//! Install, list, run, stop and inspect applets on the container engine.

use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::agent::environment::managed_labels;
use crate::agent::manager::AppletManager;
use crate::applet::{
    applet_id_from_container, parse_applet_image, AppletImage, AppletRoute, AppletRunOptions,
    AppletStatus,
};
use crate::error::{NamError, Result};
use crate::runtime::adapter::{BuildImageRequest, CreateContainerOptions};

/// Environment variables an applet container is started with.
pub const APPLET_ID_ENV: &str = "NODESWORK_APPLET_ID";
pub const APPLET_TOKEN_ENV: &str = "NODESWORK_APPLET_TOKEN";

/// Label carrying the applet id on applet containers.
pub const APPLET_ID_LABEL: &str = "nodeswork.applet-id";

impl AppletManager {
    /// Build the applet image from `<docker_root>/<naType>/<naVersion>`.
    pub async fn install(&self, image: &AppletImage) -> Result<()> {
        if !image.is_supported() {
            return Err(NamError::UnsupportedRuntime {
                na_type: image.na_type.clone(),
                na_version: image.na_version.clone(),
            });
        }

        let request = BuildImageRequest {
            tag: image.image_name(),
            context: self
                .config
                .engine
                .docker_root
                .join(&image.na_type)
                .join(&image.na_version),
            build_args: vec![
                ("package".to_string(), image.package_name.clone()),
                ("version".to_string(), image.version.clone()),
            ],
        };
        debug!(
            tag = %request.tag,
            context = %request.context.display(),
            "Building applet image"
        );
        self.runtime
            .build_image(request)
            .await
            .map_err(|e| NamError::engine("build", e))?;
        info!(image = %image.image_name(), "Applet installed");

        self.update_device().await
    }

    /// Installed applet images; foreign images are skipped.
    pub async fn images(&self) -> Result<Vec<AppletImage>> {
        let images = self
            .runtime
            .list_images()
            .await
            .map_err(|e| NamError::engine("images", e))?;

        let mut installed: Vec<AppletImage> = Vec::new();
        for tag in images.iter().flat_map(|image| image.repo_tags.iter()) {
            if let Some(image) = parse_applet_image(tag) {
                if !installed.contains(&image) {
                    installed.push(image);
                }
            }
        }
        Ok(installed)
    }

    /// Start an applet container inside the network, replacing any existing
    /// container of the same name.
    pub async fn run(&self, options: &AppletRunOptions) -> Result<()> {
        self.check_environment().await?;

        let route = &options.route;
        let name = route.container_name();

        match self.runtime.remove_container(&name, true).await {
            Ok(true) => debug!(name = %name, "Removed previous applet container"),
            Ok(false) => debug!(name = %name, "Container does not exist"),
            Err(e) => warn!(name = %name, error = %e, "Failed to remove previous applet container"),
        }

        let mut labels: HashMap<String, String> = managed_labels();
        labels.insert(APPLET_ID_LABEL.to_string(), route.applet_id.clone());
        let create = CreateContainerOptions {
            name: name.clone(),
            image: route.image.image_name(),
            env: vec![
                (APPLET_ID_ENV.to_string(), route.applet_id.clone()),
                (APPLET_TOKEN_ENV.to_string(), options.applet_token.clone()),
            ],
            ports: Vec::new(),
            labels,
            network: Some(self.config.engine.network.clone()),
        };

        let id = self.create_and_start(create).await.map_err(|e| {
            error!(name = %name, error = %e, "Failed to run applet");
            NamError::engine("run", e)
        })?;
        info!(id = %id, name = %name, "Applet started");

        self.update_device().await
    }

    /// Stop the applet's container.
    pub async fn kill(&self, route: &AppletRoute) -> Result<()> {
        let name = route.container_name();
        self.runtime
            .stop_container(&name, None)
            .await
            .map_err(|e| NamError::engine("stop", e))?;
        info!(name = %name, "Applet stopped");

        self.update_device().await
    }

    /// Running applets that are members of the network.
    pub async fn ps(&self) -> Result<Vec<AppletStatus>> {
        self.check_environment().await?;

        let containers = self
            .runtime
            .list_containers(false)
            .await
            .map_err(|e| NamError::engine("ps", e))?;
        let network = self
            .runtime
            .inspect_network(&self.config.engine.network)
            .await
            .map_err(|e| NamError::engine("network inspect", e))?;
        let applet_port = self.config.engine.applet_port;

        let statuses = containers
            .into_iter()
            .filter_map(|container| {
                let image = parse_applet_image(&container.image)?;
                let Some(member) = network.member(&container.name) else {
                    warn!(
                        container = %container.name,
                        "Applet {} is running but not in the correct network",
                        container.name
                    );
                    return None;
                };
                let port = container
                    .ports
                    .iter()
                    .find_map(|p| p.host_port)
                    .unwrap_or(applet_port);

                Some(AppletStatus {
                    applet_id: applet_id_from_container(&image, &container.name)
                        .unwrap_or_default(),
                    ip: member.ip().to_string(),
                    port,
                    status: container.status_text.clone(),
                    running: container.is_running(),
                    image,
                })
            })
            .collect();

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{harness, harness_with, LogCapture};
    use crate::runtime::mock::{EngineCall, MockRuntime};
    use std::path::PathBuf;

    fn foo() -> AppletImage {
        AppletImage::new("npm", "8.3.0", "foo", "1.0.0")
    }

    #[tokio::test]
    async fn test_install_builds_and_pushes_inventory() {
        let h = harness(|_| {});

        h.manager.install(&foo()).await.unwrap();

        let build = h
            .runtime
            .calls()
            .into_iter()
            .find_map(|call| match call {
                EngineCall::Build(request) if request.tag.starts_with("na-") => Some(request),
                _ => None,
            })
            .unwrap();
        assert_eq!(build.tag, "na-npm-8.3.0-foo:1.0.0");
        assert_eq!(build.context, PathBuf::from("docker/npm/8.3.0"));
        assert_eq!(
            build.build_args,
            vec![
                ("package".to_string(), "foo".to_string()),
                ("version".to_string(), "1.0.0".to_string()),
            ]
        );

        assert_eq!(h.control_plane.inventory_pushes(), 1);
        let inventory = h.control_plane.inventories.lock()[0].clone();
        assert_eq!(inventory.installed_applets, vec![foo()]);
    }

    #[tokio::test]
    async fn test_install_rejects_unsupported_runtime() {
        let h = harness(|_| {});
        let err = h
            .manager
            .install(&AppletImage::new("pip", "3.0", "foo", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, NamError::UnsupportedRuntime { .. }));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_images_skips_foreign_tags() {
        let runtime = MockRuntime::new();
        runtime.add_image("na-npm-8.3.0-foo:1.0.0");
        runtime.add_image("redis:7");
        runtime.add_image("na-npm-9.0.0-bar:1.0.0");
        let h = harness_with(runtime, |_| {});

        assert_eq!(h.manager.images().await.unwrap(), vec![foo()]);
    }

    #[tokio::test]
    async fn test_run_then_ps() {
        let h = harness(|_| {});
        let options = AppletRunOptions {
            route: AppletRoute::new("applet-1", foo()),
            applet_token: "applet-token".to_string(),
        };

        h.manager.run(&options).await.unwrap();

        let running = h.manager.ps().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].applet_id, "applet-1");
        assert_eq!(running[0].image, foo());
        assert_eq!(running[0].port, 28900);
        assert!(running[0].running);
        assert!(running[0].ip.starts_with("172.18.0."));
        assert_eq!(h.control_plane.inventory_pushes(), 1);
    }

    #[tokio::test]
    async fn test_run_replaces_existing_container() {
        let h = harness(|_| {});
        let options = AppletRunOptions {
            route: AppletRoute::new("applet-1", foo()),
            applet_token: "applet-token".to_string(),
        };

        h.manager.run(&options).await.unwrap();
        h.manager.run(&options).await.unwrap();

        assert_eq!(h.manager.ps().await.unwrap().len(), 1);
        let name = options.route.container_name();
        assert!(h.runtime.calls().contains(&EngineCall::Remove(name)));
    }

    #[tokio::test]
    async fn test_ps_excludes_containers_outside_network() {
        let runtime = MockRuntime::new().with_network("nodeswork");
        runtime.add_running(
            "nodeswork-container-proxy",
            "nodeswork-container-proxy:1.2.0",
            Some("nodeswork"),
        );
        runtime.add_running(
            "na-npm-8.3.0-foo_1.0.0-applet-1",
            "na-npm-8.3.0-foo:1.0.0",
            Some("nodeswork"),
        );
        runtime.add_running(
            "na-npm-8.3.0-foo_1.0.0-applet-2",
            "na-npm-8.3.0-foo:1.0.0",
            None,
        );
        runtime.add_running("redis", "redis:7", Some("nodeswork"));
        let h = harness_with(runtime, |_| {});

        let (logs, _guard) = LogCapture::install();
        let running = h.manager.ps().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].applet_id, "applet-1");

        let logs = logs.contents();
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(
            logs.contains(
                "Applet na-npm-8.3.0-foo_1.0.0-applet-2 is running but not in the correct network"
            ),
            "{}",
            logs
        );
        assert!(!logs.contains("Applet redis is running"), "{}", logs);
    }

    #[tokio::test]
    async fn test_kill_stops_container() {
        let runtime = MockRuntime::new().with_network("nodeswork");
        runtime.add_running(
            "na-npm-8.3.0-foo_1.0.0-applet-1",
            "na-npm-8.3.0-foo:1.0.0",
            Some("nodeswork"),
        );
        let h = harness_with(runtime, |_| {});

        h.manager
            .kill(&AppletRoute::new("applet-1", foo()))
            .await
            .unwrap();

        assert!(h
            .runtime
            .calls()
            .contains(&EngineCall::Stop("na-npm-8.3.0-foo_1.0.0-applet-1".to_string())));
        assert!(h.manager.ps().await.unwrap().is_empty());
    }
}
