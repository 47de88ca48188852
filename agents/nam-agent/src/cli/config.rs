//! Configuration module
//!
//! Handles loading the applet manager configuration from TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for the applet manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application home; the local state store lives here
    #[serde(default = "default_app_path")]
    pub app_path: PathBuf,

    /// Control plane base URL
    #[serde(default = "default_nodeswork_server")]
    pub nodeswork_server: String,

    /// Port the HTTP front door listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable debug logging and full error output
    #[serde(default)]
    pub debug: bool,

    /// Route requests to a locally running applet when it is new enough
    #[serde(default)]
    pub dev: bool,

    /// Container engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Routing settings
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Control plane connection settings
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Docker socket path; the platform default when unset
    #[serde(default)]
    pub socket: Option<String>,

    /// Isolated network applets and the container proxy join
    #[serde(default = "default_network")]
    pub network: String,

    /// Create the network without external connectivity
    #[serde(default)]
    pub internal_network: bool,

    /// Root of the build contexts, `<docker_root>/<naType>/<naVersion>`
    #[serde(default = "default_docker_root")]
    pub docker_root: PathBuf,

    /// Name of the sidecar container proxy
    #[serde(default = "default_proxy_container")]
    pub proxy_container: String,

    /// Published package the proxy version is resolved from
    #[serde(default = "default_proxy_package")]
    pub proxy_package: String,

    /// Host the container proxy is reachable on from this agent
    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,

    /// Host port the container proxy listens on
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    /// Port every applet serves on inside the network
    #[serde(default = "default_applet_port")]
    pub applet_port: u16,

    /// Address the proxy uses to call back into this agent
    #[serde(default = "default_host_callback")]
    pub host_callback: String,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Local applet endpoint probed in dev mode
    #[serde(default = "default_dev_endpoint")]
    pub dev_endpoint: String,
}

/// Control plane connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Reconnect interval in milliseconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Maximum reconnect attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Package registry used to look up the latest container proxy
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_app_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("Nodeswork")
}

fn default_nodeswork_server() -> String {
    "http://api.nodeswork.com".to_string()
}

fn default_port() -> u16 {
    28310
}

fn default_network() -> String {
    "nodeswork".to_string()
}

fn default_docker_root() -> PathBuf {
    PathBuf::from("docker")
}

fn default_proxy_container() -> String {
    "nodeswork-container-proxy".to_string()
}

fn default_proxy_package() -> String {
    "@nodeswork/container-proxy".to_string()
}

fn default_proxy_host() -> String {
    "localhost".to_string()
}

fn default_proxy_port() -> u16 {
    28320
}

fn default_applet_port() -> u16 {
    28900
}

fn default_host_callback() -> String {
    "172.16.222.111:28310".to_string()
}

fn default_dev_endpoint() -> String {
    "http://localhost:28900".to_string()
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            network: default_network(),
            internal_network: false,
            docker_root: default_docker_root(),
            proxy_container: default_proxy_container(),
            proxy_package: default_proxy_package(),
            proxy_host: default_proxy_host(),
            proxy_port: default_proxy_port(),
            applet_port: default_applet_port(),
            host_callback: default_host_callback(),
        }
    }
}

impl EngineConfig {
    /// Base URL requests for applets are physically sent to.
    pub fn container_proxy_url(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            dev_endpoint: default_dev_endpoint(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnect_attempts: 0,
            registry_url: default_registry_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_path: default_app_path(),
            nodeswork_server: default_nodeswork_server(),
            port: default_port(),
            debug: false,
            dev: false,
            engine: EngineConfig::default(),
            routing: RoutingConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Effective log level, `debug` wins over the configured level
    pub fn log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.nodeswork_server, "http://api.nodeswork.com");
        assert_eq!(config.port, 28310);
        assert_eq!(config.engine.network, "nodeswork");
        assert_eq!(config.engine.container_proxy_url(), "http://localhost:28320");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_content = r#"
            port = 28311
            dev = true

            [engine]
            docker_root = "/opt/nam/docker"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.port, 28311);
        assert!(config.dev);
        assert_eq!(config.engine.docker_root, PathBuf::from("/opt/nam/docker"));
        assert_eq!(config.engine.applet_port, 28900);
        assert_eq!(config.routing.dev_endpoint, "http://localhost:28900");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nam.toml");

        let mut config = Config::default();
        config.debug = true;
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert!(loaded.debug);
        assert_eq!(loaded.log_level(), "debug");
    }
}
