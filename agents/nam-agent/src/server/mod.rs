//! HTTP front door
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/sstats` | Agent name, version and running applets |
//! | POST | `/accounts/:account_id/operate` | Account operation relayed for an applet |
//! | POST | `/executions/:execution_id/metrics` | Execution metrics relayed for an applet |
//! | ANY | `/applets/:applet_id/:na_type/:na_version/:package_name/:version/*rest` | Reverse proxy to the applet |
//!
//! Relay endpoints identify the calling applet by the `nodeswork-applet-id`
//! header the container proxy sets.

pub mod handlers;
pub mod proxy;

use axum::routing::{any, get, post};
use axum::Router;
use std::sync::Arc;

use crate::agent::manager::AppletManager;

/// Header naming the applet a relayed request comes from.
pub const APPLET_ID_HEADER: &str = "nodeswork-applet-id";

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AppletManager>,
}

pub fn build_router(manager: Arc<AppletManager>) -> Router {
    let state = AppState { manager };

    Router::new()
        .route("/sstats", get(handlers::sstats))
        .route("/accounts/:account_id/operate", post(handlers::operate_account))
        .route(
            "/executions/:execution_id/metrics",
            post(handlers::record_metrics),
        )
        .route(
            "/applets/:applet_id/:na_type/:na_version/:package_name/:version",
            any(proxy::forward),
        )
        .route(
            "/applets/:applet_id/:na_type/:na_version/:package_name/:version/*rest",
            any(proxy::forward),
        )
        .with_state(state)
}
