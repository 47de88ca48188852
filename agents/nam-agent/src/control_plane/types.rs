//! Control plane payloads

use serde::{Deserialize, Serialize};

use crate::applet::{AppletImage, AppletStatus, Worker};

/// Device registration body for `POST /v1/u/devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_type: String,
    pub device_identifier: String,
    pub os: String,
    pub os_version: String,
    pub container_version: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceToken {
    pub token: String,
}

/// Inventory pushed after every state-changing operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInventory {
    pub installed_applets: Vec<AppletImage>,
    pub running_applets: Vec<AppletStatus>,
}

/// A user's binding of an applet to this device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserApplet {
    #[serde(rename = "_id")]
    pub id: String,
    pub applet: AppletRef,
    pub config: UserAppletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppletRef {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAppletConfig {
    pub applet_config: AppletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppletConfig {
    #[serde(flatten)]
    pub image: AppletImage,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub handler: String,
    pub name: String,
    #[serde(default)]
    pub schedule: Option<String>,
}

impl WorkerConfig {
    pub fn worker(&self) -> Worker {
        Worker {
            handler: self.handler.clone(),
            name: self.name.clone(),
        }
    }
}
