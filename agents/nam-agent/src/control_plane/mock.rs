//! In-memory ControlPlane and ReleaseFeed used by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::control_plane::client::ControlPlane;
use crate::control_plane::registry::ReleaseFeed;
use crate::control_plane::types::{DeviceInventory, DeviceRegistration, UserApplet};
use crate::error::{NamError, Result};

#[derive(Default)]
pub struct MockControlPlane {
    pub inventories: Mutex<Vec<DeviceInventory>>,
    pub user_applets: Mutex<Vec<UserApplet>>,
    pub account_requests: Mutex<Vec<String>>,
    pub operations: Mutex<Vec<(String, String, Value)>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory_pushes(&self) -> usize {
        self.inventories.lock().len()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn login(&self, _email: &str, password: &str) -> Result<()> {
        if password == "wrong" {
            return Err(NamError::WrongPassword);
        }
        Ok(())
    }

    async fn register_device(&self, _device: &DeviceRegistration) -> Result<String> {
        Ok("device-token".to_string())
    }

    async fn update_device(&self, token: &str, inventory: &DeviceInventory) -> Result<()> {
        if token.is_empty() {
            return Err(NamError::Unauthenticated);
        }
        self.inventories.lock().push(inventory.clone());
        Ok(())
    }

    async fn user_applets(&self, _token: &str) -> Result<Vec<UserApplet>> {
        Ok(self.user_applets.lock().clone())
    }

    async fn user_applet_accounts(&self, _token: &str, user_applet: &str) -> Result<Value> {
        self.account_requests.lock().push(user_applet.to_string());
        Ok(json!([{ "_id": "account-1" }]))
    }

    async fn operate_account(
        &self,
        _token: &str,
        applet_id: &str,
        account_id: &str,
        body: Value,
    ) -> Result<Value> {
        self.operations
            .lock()
            .push((applet_id.to_string(), account_id.to_string(), body.clone()));
        Ok(json!({ "operated": account_id, "body": body }))
    }

    async fn record_metrics(
        &self,
        _token: &str,
        _applet_id: &str,
        execution_id: &str,
        _body: Value,
    ) -> Result<Value> {
        Ok(json!({ "execution": execution_id }))
    }
}

pub struct FixedReleaseFeed(pub String);

#[async_trait]
impl ReleaseFeed for FixedReleaseFeed {
    async fn latest_version(&self, _package: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
