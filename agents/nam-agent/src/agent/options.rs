//! Manager Options & Local State Store
//!
//! The agent's identity (process id, auth token, endpoint, port) is persisted
//! in `<appPath>/config.json` under a fixed key, and reconciled against the
//! requested options on every construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{NamError, Result};

/// Record key the manager options are stored under.
pub const APPLET_MANAGER_KEY: &str = "appletManager";

const STATE_FILE: &str = "config.json";

/// Persisted agent identity and configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerOptions {
    pub app_path: PathBuf,
    pub nodeswork_server: String,
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub token: Option<String>,
}

/// The fields a running instance may not be reconfigured on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdentity {
    pub app_path: PathBuf,
    pub nodeswork_server: String,
    pub port: u16,
}

impl ManagerOptions {
    pub fn new(app_path: impl Into<PathBuf>, nodeswork_server: impl Into<String>, port: u16) -> Self {
        Self {
            app_path: app_path.into(),
            nodeswork_server: nodeswork_server.into(),
            port,
            debug: false,
            dev: false,
            pid: None,
            token: None,
        }
    }

    pub fn identity(&self) -> NetworkIdentity {
        NetworkIdentity {
            app_path: self.app_path.clone(),
            nodeswork_server: self.nodeswork_server.clone(),
            port: self.port,
        }
    }

    /// Reconcile `requested` with whatever the store already holds.
    ///
    /// A live persisted pid pins app path, server and port; any mismatch is a
    /// [`NamError::ConfigurationConflict`].
    pub fn reconcile(
        store: &LocalStateStore,
        mut requested: ManagerOptions,
        is_alive: impl Fn(u32) -> bool,
    ) -> Result<ManagerOptions> {
        let Some(persisted) = store.load()? else {
            requested.pid = None;
            debug!(options = ?requested, "Initialize applet manager options");
            store.save(&requested)?;
            return Ok(requested);
        };

        debug!(options = ?persisted, "Loaded applet manager options");
        requested.token = persisted.token.clone();

        let running = persisted.pid.map(&is_alive).unwrap_or(false);

        if running && requested.identity() != persisted.identity() {
            return Err(NamError::ConfigurationConflict {
                requested: Box::new(requested),
                running: persisted.identity(),
            });
        }

        requested.pid = if running { persisted.pid } else { None };

        store.save(&requested)?;
        Ok(requested)
    }
}

/// Durable key-value record of the agent's identity.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    path: PathBuf,
}

impl LocalStateStore {
    /// Open the store rooted at `app_path`, creating the directory if needed.
    pub fn open(app_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(app_path)?;
        Ok(Self {
            path: app_path.join(STATE_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<ManagerOptions>> {
        let mut records = self.read_records()?;
        match records.remove(APPLET_MANAGER_KEY) {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| self.state_error(e)),
            None => Ok(None),
        }
    }

    /// Persist `options`, leaving other records in the file untouched.
    pub fn save(&self, options: &ManagerOptions) -> Result<()> {
        let mut records = self.read_records()?;
        let value = serde_json::to_value(options).map_err(|e| self.state_error(e))?;
        records.insert(APPLET_MANAGER_KEY.to_string(), value);

        let content = serde_json::to_string_pretty(&records).map_err(|e| self.state_error(e))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn read_records(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        if !self.path.exists() {
            return Ok(serde_json::Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        serde_json::from_str(&content).map_err(|e| self.state_error(e))
    }

    fn state_error(&self, e: serde_json::Error) -> NamError {
        NamError::State {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}

/// Check whether a process is alive using `kill(pid, 0)`.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs the permission and existence checks only.
        let result = unsafe { libc::kill(pid, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
