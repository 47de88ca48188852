//! Front door handlers for agent stats and the applet relay endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::error::{ErrorBody, NamError};
use crate::server::{AppState, APPLET_ID_HEADER};

fn status_for(error: &NamError) -> StatusCode {
    match error {
        NamError::Unauthenticated => StatusCode::UNAUTHORIZED,
        NamError::AppletNotRunning => StatusCode::NOT_FOUND,
        NamError::ServerUnavailable { .. } => StatusCode::BAD_GATEWAY,
        NamError::ControlPlane { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        NamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(error: &NamError) -> Response {
    (status_for(error), Json(error.to_payload())).into_response()
}

fn applet_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(APPLET_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn missing_applet_id() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            code: "MISSING_APPLET_ID".to_string(),
            message: format!("missing {} header", APPLET_ID_HEADER),
        }),
    )
        .into_response()
}

/// GET /sstats
pub async fn sstats(State(state): State<AppState>) -> Response {
    match state.manager.ps().await {
        Ok(status) => Json(json!({
            "app": {
                "name": "nam",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "applets": { "status": status },
            "environment": {
                "subnet": state.manager.network_info().map(|n| n.subnet),
                "proxy": state.manager.proxy_info(),
            },
            "socket": state.manager.channel().status(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /accounts/:account_id/operate
pub async fn operate_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(applet_id) = applet_id(&headers) else {
        return missing_applet_id();
    };
    match state
        .manager
        .operate_account(&applet_id, &account_id, body)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /executions/:execution_id/metrics
pub async fn record_metrics(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(applet_id) = applet_id(&headers) else {
        return missing_applet_id();
    };
    match state
        .manager
        .record_metrics(&applet_id, &execution_id, body)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{harness, PROXY_RELEASE};
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_sstats() {
        let h = harness(|_| {});
        let router = build_router(h.manager.clone());

        let req = Request::builder().uri("/sstats").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["app"]["name"], "nam");
        assert_eq!(body["applets"]["status"], json!([]));
        assert_eq!(body["environment"]["subnet"], "172.18.0.0/16");
        assert_eq!(body["environment"]["proxy"]["version"], PROXY_RELEASE);
        assert_eq!(body["socket"]["state"], "disconnected");
        assert!(body["socket"]["lastReason"].is_null());
    }

    #[tokio::test]
    async fn test_operate_requires_applet_header() {
        let h = harness(|_| {});
        let router = build_router(h.manager.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/accounts/account-1/operate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"op":"refresh"}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(h.control_plane.operations.lock().is_empty());
    }

    #[tokio::test]
    async fn test_operate_relays_for_applet() {
        let h = harness(|_| {});
        let router = build_router(h.manager.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/accounts/account-1/operate")
            .header("content-type", "application/json")
            .header(APPLET_ID_HEADER, "applet-1")
            .body(Body::from(r#"{"op":"refresh"}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["operated"], "account-1");

        let operations = h.control_plane.operations.lock();
        assert_eq!(operations[0].0, "applet-1");
        assert_eq!(operations[0].2, json!({ "op": "refresh" }));
    }

    #[tokio::test]
    async fn test_metrics_without_token_is_unauthorized() {
        let h = harness(|_| {});
        h.manager.set_token(None).unwrap();
        let router = build_router(h.manager.clone());

        let req = Request::builder()
            .method("POST")
            .uri("/executions/exec-1/metrics")
            .header("content-type", "application/json")
            .header(APPLET_ID_HEADER, "applet-1")
            .body(Body::from(r#"{"count":1}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["code"], "UNAUTHENTICATED");
    }
}
