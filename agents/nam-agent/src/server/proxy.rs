//! Reverse proxy from `/applets/...` to the resolved applet route.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, HOST, ORIGIN,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::agent::routing::{Route, FORWARDED_TO_HEADER};
use crate::applet::{AppletImage, AppletRoute};
use crate::server::AppState;

/// Largest request body forwarded to an applet.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Served with credentialed CORS for the calling origin.
const STRUCTURE_PATH: &str = "sstruct";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Deserialize)]
pub struct AppletPath {
    applet_id: String,
    na_type: String,
    na_version: String,
    package_name: String,
    version: String,
    #[serde(default)]
    rest: String,
}

impl AppletPath {
    fn target(&self) -> AppletRoute {
        AppletRoute::new(
            self.applet_id.clone(),
            AppletImage::new(
                self.na_type.clone(),
                self.na_version.clone(),
                self.package_name.clone(),
                self.version.clone(),
            ),
        )
    }
}

/// ANY /applets/:applet_id/:na_type/:na_version/:package_name/:version/*rest
pub async fn forward(
    State(state): State<AppState>,
    Path(path): Path<AppletPath>,
    request: Request,
) -> Response {
    let Some(route) = state.manager.route(&path.target()).await else {
        warn!(uri = %request.uri(), "Route not found");
        return (StatusCode::NOT_FOUND, "Route not found").into_response();
    };

    let cors_origin = if path.rest == STRUCTURE_PATH {
        request.headers().get(ORIGIN).cloned()
    } else {
        None
    };

    let mut response = match send_upstream(&state.manager.http, &route, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(route = %route.route, error = %e, "Routing Error in nam.");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Routing Error in nam.").into_response();
        }
    };

    if let Some(origin) = cors_origin {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    response
}

/// Path after `/applets/<id>/<type>/<version>/<package>/<version>`, still
/// percent-encoded as the client sent it.
fn raw_rest(path: &str) -> &str {
    path.trim_start_matches('/')
        .splitn(7, '/')
        .nth(6)
        .unwrap_or("")
}

async fn send_upstream(
    client: &reqwest::Client,
    route: &Route,
    request: Request,
) -> anyhow::Result<Response> {
    let (parts, body) = request.into_parts();
    let query = parts
        .uri
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let url = format!(
        "{}/{}{}",
        route.target.trim_end_matches('/'),
        raw_rest(parts.uri.path()),
        query
    );
    debug!(url = %url, route = %route.route, "Forwarding applet request");

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())?;
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;

    let mut builder = client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if name == HOST || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    if let Some(host) = parts.headers.get(HOST).and_then(|h| h.to_str().ok()) {
        builder = builder.header("x-forwarded-host", host);
    }
    let upstream = builder
        .header("x-forwarded-proto", "http")
        .header(FORWARDED_TO_HEADER, route.route.as_str())
        .body(body)
        .send()
        .await?;

    let mut response = Response::builder().status(StatusCode::from_u16(upstream.status().as_u16())?);
    for (name, value) in upstream.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        response = response.header(name.as_str(), value.as_bytes());
    }
    let bytes = upstream.bytes().await?;
    Ok(response.body(Body::from(bytes))?)
}
