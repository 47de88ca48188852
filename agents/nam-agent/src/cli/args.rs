//! Command-line overrides shared by the `nam` and `nam-agent` binaries.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::cli::config::Config;

/// Per-user configuration file read when `--config` is not given.
pub const RC_FILE: &str = ".namrc.toml";

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to configuration file (defaults to ~/.namrc.toml)
    #[arg(short, long, global = true, env = "NAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Application home holding the local state store
    #[arg(long, global = true, env = "NAM_APP_PATH")]
    pub app_path: Option<PathBuf>,

    /// Control plane base URL
    #[arg(long, global = true, env = "NAM_SERVER")]
    pub nodeswork_server: Option<String>,

    /// Port of the HTTP front door
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Route to locally running development applets
    #[arg(long, global = true)]
    pub dev: bool,
}

impl GlobalArgs {
    /// Load the configuration file and apply flag overrides on top.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => match rc_path() {
                Some(path) => Config::load_or_default(path)?,
                None => Config::default(),
            },
        };
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(app_path) = &self.app_path {
            config.app_path = app_path.clone();
        }
        if let Some(server) = &self.nodeswork_server {
            config.nodeswork_server = server.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.debug |= self.debug;
        config.dev |= self.dev;
    }

    /// Flags to hand to a re-executed process.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if let Some(app_path) = &self.app_path {
            args.push("--app-path".to_string());
            args.push(app_path.display().to_string());
        }
        if let Some(server) = &self.nodeswork_server {
            args.push("--nodeswork-server".to_string());
            args.push(server.clone());
        }
        if let Some(port) = self.port {
            args.push("--port".to_string());
            args.push(port.to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        if self.dev {
            args.push("--dev".to_string());
        }
        args
    }
}

pub fn rc_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(RC_FILE))
}
