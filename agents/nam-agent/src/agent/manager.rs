//! Applet Manager
//!
//! The single context object behind every entry point: CLI commands, remote
//! calls over the device socket, and the HTTP front door all act on one
//! shared `Arc<AppletManager>`.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::agent::cron::WorkerCrons;
use crate::agent::environment::ProxyInfo;
use crate::agent::options::{is_pid_alive, LocalStateStore, ManagerOptions};
use crate::cli::config::Config;
use crate::connection::state::ChannelStateManager;
use crate::connection::websocket::WebSocketClient;
use crate::control_plane::device;
use crate::control_plane::{ControlPlane, HttpControlPlane, NpmRegistry, ReleaseFeed};
use crate::error::{NamError, Result};
use crate::runtime::adapter::{NetworkInfo, RuntimeAdapter};
use crate::runtime::docker::DockerAdapter;

/// Credentials for `authenticate`
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub email: String,
    pub password: String,
    pub device_name: String,
}

pub struct AppletManager {
    pub(crate) this: Weak<AppletManager>,
    pub(crate) config: Config,
    options: RwLock<ManagerOptions>,
    store: LocalStateStore,
    pub(crate) runtime: Arc<dyn RuntimeAdapter>,
    pub(crate) control_plane: Arc<dyn ControlPlane>,
    pub(crate) releases: Arc<dyn ReleaseFeed>,
    pub(crate) http: reqwest::Client,
    pub(crate) network: RwLock<Option<NetworkInfo>>,
    pub(crate) proxy: RwLock<Option<ProxyInfo>>,
    pub(crate) crons: WorkerCrons,
    channel: ChannelStateManager,
}

impl AppletManager {
    /// Build a manager over explicit collaborators.
    ///
    /// Reconciles `config` against the local state store; fails with
    /// [`NamError::ConfigurationConflict`] when a live agent owns the store
    /// with a different endpoint or port.
    pub fn new(
        config: Config,
        runtime: Arc<dyn RuntimeAdapter>,
        control_plane: Arc<dyn ControlPlane>,
        releases: Arc<dyn ReleaseFeed>,
    ) -> Result<Arc<Self>> {
        let store = LocalStateStore::open(&config.app_path)?;
        let mut requested =
            ManagerOptions::new(&config.app_path, &config.nodeswork_server, config.port);
        requested.debug = config.debug;
        requested.dev = config.dev;
        let options = ManagerOptions::reconcile(&store, requested, is_pid_alive)?;

        // Applet and proxy traffic must not follow redirects or decode bodies.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .build()
            .map_err(|e| NamError::AppletRequest {
                uri: config.engine.container_proxy_url(),
                source: e,
            })?;

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            options: RwLock::new(options),
            store,
            runtime,
            control_plane,
            releases,
            http,
            network: RwLock::new(None),
            proxy: RwLock::new(None),
            crons: WorkerCrons::new(),
            channel: ChannelStateManager::new(),
        }))
    }

    /// Build a manager talking to the local Docker engine and the configured
    /// control plane.
    pub fn from_config(config: Config) -> anyhow::Result<Arc<Self>> {
        let runtime = DockerAdapter::from_config(&config.engine)?;
        let control_plane = HttpControlPlane::new(&config.nodeswork_server)?;
        let releases = NpmRegistry::new(&config.control_plane.registry_url);
        Ok(Self::new(
            config,
            Arc::new(runtime),
            Arc::new(control_plane),
            Arc::new(releases),
        )?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the persisted options
    pub fn options(&self) -> ManagerOptions {
        self.options.read().clone()
    }

    pub fn channel(&self) -> &ChannelStateManager {
        &self.channel
    }

    pub fn proxy_info(&self) -> Option<ProxyInfo> {
        self.proxy.read().clone()
    }

    pub fn network_info(&self) -> Option<NetworkInfo> {
        self.network.read().clone()
    }

    pub fn authenticated(&self) -> bool {
        self.options.read().token.is_some()
    }

    /// Whether another live process owns this agent.
    pub fn is_started(&self) -> bool {
        self.options.read().pid.map(is_pid_alive).unwrap_or(false)
    }

    pub(crate) fn dev_mode(&self) -> bool {
        self.options.read().dev
    }

    pub(crate) fn token(&self) -> Result<String> {
        self.options
            .read()
            .token
            .clone()
            .ok_or(NamError::Unauthenticated)
    }

    /// Persist a new device token.
    pub fn set_token(&self, token: Option<String>) -> Result<()> {
        self.update_options(|options| options.token = token)
    }

    fn set_pid(&self, pid: Option<u32>) -> Result<()> {
        self.update_options(|options| options.pid = pid)
    }

    fn update_options(&self, update: impl FnOnce(&mut ManagerOptions)) -> Result<()> {
        let mut options = self.options.write();
        update(&mut options);
        self.store.save(&options)
    }

    /// Log in, register this device and push the first inventory.
    pub async fn authenticate(&self, auth: &AuthOptions) -> Result<()> {
        self.control_plane.login(&auth.email, &auth.password).await?;
        info!(email = %auth.email, "Logged in to control plane");

        let registration = device::registration(&auth.email, &auth.device_name);
        let token = self.control_plane.register_device(&registration).await?;
        self.set_token(Some(token))?;
        info!(device = %auth.device_name, "Device registered");

        self.update_device().await
    }

    /// Run the agent in the foreground until a shutdown signal arrives.
    ///
    /// Serves the HTTP front door and the device socket, pushes the initial
    /// inventory, then tears everything down on SIGINT/SIGTERM or when the
    /// control plane rejects the device token.
    pub async fn start_server(self: &Arc<Self>) -> Result<()> {
        if self.is_started() {
            info!("Applet manager has already started");
            return Ok(());
        }
        let token = self.token()?;

        self.check_environment().await?;

        let port = self.options.read().port;
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        self.set_pid(Some(std::process::id()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let app = crate::server::build_router(self.clone());
        let mut server_shutdown = shutdown_rx.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
        });
        info!(port, "Server is started at http://localhost:{}", port);

        let socket = WebSocketClient::new(
            &self.options.read().nodeswork_server,
            &token,
            self.clone(),
        )
        .reconnect_interval_ms(self.config.control_plane.reconnect_interval_ms)
        .max_reconnect_attempts(self.config.control_plane.max_reconnect_attempts);
        let socket_shutdown = shutdown_rx.clone();
        let mut socket_task = tokio::spawn(async move { socket.run(socket_shutdown).await });

        if let Err(e) = self.update_device().await {
            error!(error = %e, "Initial inventory push failed");
        }

        let mut outcome = Ok(());
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received");
            }
            joined = &mut socket_task => match joined {
                Ok(Err(e)) => {
                    error!(error = %e, "Device socket terminated");
                    outcome = Err(e);
                }
                _ => {
                    warn!("Device socket stopped; serving HTTP until shutdown");
                    shutdown_signal().await;
                    info!("Shutdown signal received");
                }
            }
        }

        self.shutdown();
        let _ = shutdown_tx.send(true);
        if !socket_task.is_finished() {
            let _ = tokio::time::timeout(Duration::from_secs(5), &mut socket_task).await;
        }
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "HTTP server exited with error"),
            Err(e) => warn!(error = %e, "HTTP server task failed"),
            Ok(Ok(())) => {}
        }

        self.set_pid(None)?;
        info!("Applet manager stopped");
        outcome
    }

    /// Stop a daemon started by another process.
    pub async fn stop_server(&self) -> Result<()> {
        let Some(pid) = self.options.read().pid else {
            info!("Applet manager is not running");
            return Ok(());
        };

        if is_pid_alive(pid) {
            info!(pid, "Stopping applet manager");
            terminate(pid)?;
            for _ in 0..50 {
                if !is_pid_alive(pid) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        self.set_pid(None)
    }

    /// Release timers. Safe to call more than once.
    pub fn shutdown(&self) {
        self.crons.stop_all();
        self.channel.set_shutting_down();
    }
}

fn terminate(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).map_err(|_| {
            NamError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid pid {}", pid),
            ))
        })?;
        // SAFETY: sending a signal has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{harness, Harness};
    use crate::control_plane::mock::{FixedReleaseFeed, MockControlPlane};
    use crate::runtime::mock::MockRuntime;

    #[tokio::test]
    async fn test_authenticate_persists_token_and_pushes_inventory() {
        let Harness {
            manager,
            control_plane,
            dir,
            ..
        } = harness(|_| {});
        manager.set_token(None).unwrap();
        assert!(!manager.authenticated());

        manager
            .authenticate(&AuthOptions {
                email: "andy@nodeswork.com".to_string(),
                password: "secret".to_string(),
                device_name: "laptop".to_string(),
            })
            .await
            .unwrap();

        assert!(manager.authenticated());
        assert_eq!(control_plane.inventory_pushes(), 1);
        let stored = LocalStateStore::open(dir.path()).unwrap().load().unwrap().unwrap();
        assert_eq!(stored.token.as_deref(), Some("device-token"));
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password() {
        let Harness {
            manager, dir: _dir, ..
        } = harness(|_| {});
        manager.set_token(None).unwrap();

        let err = manager
            .authenticate(&AuthOptions {
                email: "andy@nodeswork.com".to_string(),
                password: "wrong".to_string(),
                device_name: "laptop".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NamError::WrongPassword));
        assert!(!manager.authenticated());
    }

    #[tokio::test]
    async fn test_operations_require_token() {
        let Harness {
            manager, dir: _dir, ..
        } = harness(|_| {});
        manager.set_token(None).unwrap();

        let err = manager.update_device().await.unwrap_err();
        assert!(matches!(err, NamError::Unauthenticated));
    }

    #[test]
    fn test_conflicting_manager_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.app_path = dir.path().to_path_buf();

        let store = LocalStateStore::open(dir.path()).unwrap();
        let mut running = ManagerOptions::new(dir.path(), &config.nodeswork_server, 28399);
        running.pid = Some(std::process::id());
        store.save(&running).unwrap();

        let result = AppletManager::new(
            config,
            Arc::new(MockRuntime::new()),
            Arc::new(MockControlPlane::new()),
            Arc::new(FixedReleaseFeed("1.0.0".to_string())),
        );
        assert!(matches!(result, Err(NamError::ConfigurationConflict { .. })));
    }

    #[tokio::test]
    async fn test_stop_server_without_pid_is_noop() {
        let Harness { manager, .. } = harness(|_| {});
        manager.stop_server().await.unwrap();
        assert!(!manager.is_started());
    }
}
