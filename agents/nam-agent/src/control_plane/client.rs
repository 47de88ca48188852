//! Control Plane Client
//!
//! HTTP client for the requests this agent issues against the control plane.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::control_plane::types::{DeviceInventory, DeviceRegistration, DeviceToken, UserApplet};
use crate::error::{NamError, Result};

/// Header carrying the device token on device-scoped endpoints.
pub const DEVICE_TOKEN_HEADER: &str = "device-token";

/// Requests the agent makes against the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Open a user session (`POST /v1/u/user/login`)
    async fn login(&self, email: &str, password: &str) -> Result<()>;

    /// Register this device within the current session and return its token
    async fn register_device(&self, device: &DeviceRegistration) -> Result<String>;

    /// Push installed/running inventory (`POST /v1/d/devices`)
    async fn update_device(&self, token: &str, inventory: &DeviceInventory) -> Result<()>;

    /// Applets the authenticated user assigned to this device
    async fn user_applets(&self, token: &str) -> Result<Vec<UserApplet>>;

    /// Accounts linked to a user applet
    async fn user_applet_accounts(&self, token: &str, user_applet: &str) -> Result<Value>;

    /// Perform an account operation on behalf of an applet
    async fn operate_account(
        &self,
        token: &str,
        applet_id: &str,
        account_id: &str,
        body: Value,
    ) -> Result<Value>;

    /// Record execution metrics reported by an applet
    async fn record_metrics(
        &self,
        token: &str,
        applet_id: &str,
        execution_id: &str,
        body: Value,
    ) -> Result<Value>;
}

/// reqwest-backed control plane client
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControlPlane {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| NamError::ServerUnavailable {
                path: base_url.to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> (String, RequestBuilder) {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = token {
            builder = builder.header(DEVICE_TOKEN_HEADER, token);
        }
        (url, builder)
    }

    async fn send<T: DeserializeOwned>(&self, url: String, builder: RequestBuilder) -> Result<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| NamError::ServerUnavailable {
                path: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(&url, status, response.text().await.unwrap_or_default()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| NamError::ServerUnavailable { path: url, source: e })
    }

    fn status_error(url: &str, status: StatusCode, body: String) -> NamError {
        match status {
            StatusCode::UNAUTHORIZED => NamError::Unauthenticated,
            _ => NamError::ControlPlane {
                path: url.to_string(),
                status: status.as_u16(),
                message: body,
            },
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let (url, builder) = self.request(Method::POST, "/v1/u/user/login", None);
        let body = serde_json::json!({ "email": email, "password": password });

        match self.send::<Value>(url, builder.json(&body)).await {
            Ok(_) => {
                debug!("Login successfully");
                Ok(())
            }
            Err(NamError::Unauthenticated) => Err(NamError::WrongPassword),
            Err(NamError::ControlPlane { status: 422, .. }) => Err(NamError::WrongEmail),
            Err(e) => Err(e),
        }
    }

    async fn register_device(&self, device: &DeviceRegistration) -> Result<String> {
        let (url, builder) = self.request(Method::POST, "/v1/u/devices", None);
        let token: DeviceToken = self.send(url, builder.json(device)).await?;
        debug!("Device registered successfully");
        Ok(token.token)
    }

    async fn update_device(&self, token: &str, inventory: &DeviceInventory) -> Result<()> {
        let (url, builder) = self.request(Method::POST, "/v1/d/devices", Some(token));
        let _: Value = self.send(url, builder.json(inventory)).await?;
        debug!("Update device successfully");
        Ok(())
    }

    async fn user_applets(&self, token: &str) -> Result<Vec<UserApplet>> {
        let (url, builder) = self.request(Method::GET, "/v1/d/user-applets", Some(token));
        self.send(url, builder).await
    }

    async fn user_applet_accounts(&self, token: &str, user_applet: &str) -> Result<Value> {
        let path = format!("/v1/d/user-applets/{}/accounts", user_applet);
        let (url, builder) = self.request(Method::GET, &path, Some(token));
        self.send(url, builder).await
    }

    async fn operate_account(
        &self,
        token: &str,
        applet_id: &str,
        account_id: &str,
        body: Value,
    ) -> Result<Value> {
        let path = format!("/v1/d/applets/{}/accounts/{}/operate", applet_id, account_id);
        let (url, builder) = self.request(Method::POST, &path, Some(token));
        self.send(url, builder.json(&body)).await
    }

    async fn record_metrics(
        &self,
        token: &str,
        applet_id: &str,
        execution_id: &str,
        body: Value,
    ) -> Result<Value> {
        let path = format!("/v1/d/applets/{}/executions/{}/metrics", applet_id, execution_id);
        let (url, builder) = self.request(Method::POST, &path, Some(token));
        self.send(url, builder.json(&body)).await
    }
}
