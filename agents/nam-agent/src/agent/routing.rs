//! Routing
//!
//! Resolves where traffic for an applet should go and issues requests to
//! applets through the container proxy.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::agent::manager::AppletManager;
use crate::applet::{AppletRoute, Worker};
use crate::error::{NamError, Result};

/// Header telling the container proxy which applet address to forward to.
pub const FORWARDED_TO_HEADER: &str = "nodeswork-forwarded-to";

const DEV_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A resolved destination: `target` is the base URL the request is sent to,
/// `route` the `host:port` the proxy forwards it to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub route: String,
    pub target: String,
}

/// A request to an applet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(flatten)]
    pub route: AppletRoute,
    pub uri: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Resolve with status, headers and body instead of the body alone
    #[serde(default)]
    pub resolve_with_full_response: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Invocation of a worker entry point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOptions {
    #[serde(default)]
    pub user_applet: Option<String>,
    pub route: AppletRoute,
    pub worker: Worker,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct DevStats {
    applet: Option<DevApplet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevApplet {
    package_name: String,
    package_version: String,
}

/// Compare dotted numeric versions. Missing segments count as zero and
/// non-numeric suffixes are ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn segments(version: &str) -> Vec<u64> {
        version
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|segment| {
                segment
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    }

    let (a, b) = (segments(a), segments(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// `http://localhost:28900/` -> `localhost:28900`
fn host_port(endpoint: &str) -> &str {
    endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint)
        .trim_end_matches('/')
}

impl AppletManager {
    /// Resolve the destination for `target`.
    ///
    /// In dev mode a locally running applet of the same package wins when its
    /// version is at least the requested one. Returns `None` for unsupported
    /// runtimes.
    pub async fn route(&self, target: &AppletRoute) -> Option<Route> {
        if !target.image.is_supported() {
            debug!(
                na_type = %target.image.na_type,
                na_version = %target.image.na_version,
                "Unsupported applet runtime"
            );
            return None;
        }

        if self.dev_mode() {
            if let Some(route) = self.probe_dev_route(target).await {
                debug!(route = %route.route, "Routing to local development applet");
                return Some(route);
            }
        }

        Some(Route {
            route: format!(
                "{}:{}",
                target.container_name(),
                self.config.engine.applet_port
            ),
            target: self.config.engine.container_proxy_url(),
        })
    }

    async fn probe_dev_route(&self, target: &AppletRoute) -> Option<Route> {
        let endpoint = self.config.routing.dev_endpoint.trim_end_matches('/');
        let stats: DevStats = self
            .http
            .get(format!("{}/sstats", endpoint))
            .timeout(DEV_PROBE_TIMEOUT)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let local = stats.applet?;
        if local.package_name == target.image.package_name
            && compare_versions(&local.package_version, &target.image.version) != Ordering::Less
        {
            Some(Route {
                route: host_port(endpoint).to_string(),
                target: endpoint.to_string(),
            })
        } else {
            None
        }
    }

    /// Send a request to an applet.
    pub async fn request(&self, options: RequestOptions) -> Result<Value> {
        info!(
            applet_id = %options.route.applet_id,
            package = %options.route.image.package_name,
            uri = %options.uri,
            method = %options.method,
            "Get request"
        );

        let route = self
            .route(&options.route)
            .await
            .ok_or(NamError::AppletNotRunning)?;

        let method = Method::from_bytes(options.method.to_uppercase().as_bytes())
            .map_err(|_| NamError::Rpc(format!("invalid method `{}`", options.method)))?;
        let url = format!("{}{}", route.target, options.uri);

        let mut builder = self
            .http
            .request(method, &url)
            .header(FORWARDED_TO_HEADER, route.route.as_str());
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| NamError::AppletRequest {
            uri: url.clone(),
            source: e,
        })?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(|e| NamError::AppletRequest {
            uri: url.clone(),
            source: e,
        })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        if options.resolve_with_full_response {
            return Ok(json!({
                "statusCode": status.as_u16(),
                "headers": headers,
                "body": body,
            }));
        }

        if !status.is_success() {
            return Err(NamError::AppletResponse {
                uri: url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Invoke a worker: `POST /workers/<handler>/<name>` with the payload.
    pub async fn work(&self, options: WorkOptions) -> Result<Value> {
        debug!(
            user_applet = ?options.user_applet,
            handler = %options.worker.handler,
            name = %options.worker.name,
            "Run worker"
        );
        self.request(RequestOptions {
            uri: options.worker.uri(),
            route: options.route,
            method: "POST".to_string(),
            body: Some(options.payload),
            headers: HashMap::new(),
            resolve_with_full_response: false,
        })
        .await
    }
}
