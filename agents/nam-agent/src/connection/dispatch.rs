//! Remote call dispatch
//!
//! Runs a decoded call against the applet manager under the method's
//! deadline. A call that misses its deadline keeps running in the background;
//! only the reply is a timeout.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::manager::AppletManager;
use crate::connection::protocol::{RpcMethod, RpcReply, RpcRequest};
use crate::error::{NamError, Result};

/// Decode, execute and wrap the outcome as a reply frame.
pub async fn handle_call(
    manager: Arc<AppletManager>,
    method: RpcMethod,
    request_id: Option<String>,
    payload: Value,
) -> RpcReply {
    let outcome = match RpcRequest::decode(method, payload) {
        Ok(request) => dispatch(manager, request).await,
        Err(e) => Err(NamError::Rpc(format!("invalid {} payload: {}", method, e))),
    };

    match outcome {
        Ok(result) => {
            debug!(method = %method, request_id = ?request_id, "Remote call succeeded");
            RpcReply::success(method, request_id, result)
        }
        Err(e) => {
            warn!(method = %method, request_id = ?request_id, error = %e, "Remote call failed");
            RpcReply::failure(method, request_id, e.to_payload())
        }
    }
}

pub async fn dispatch(manager: Arc<AppletManager>, request: RpcRequest) -> Result<Value> {
    let method = request.method();
    let deadline = method.timeout();

    let task = tokio::spawn(async move { execute(&manager, request).await });
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(NamError::Rpc(format!("{} task failed: {}", method, e))),
        Err(_) => Err(NamError::Timeout {
            operation: method.name().to_string(),
            millis: deadline.as_millis() as u64,
        }),
    }
}

async fn execute(manager: &AppletManager, request: RpcRequest) -> Result<Value> {
    match request {
        RpcRequest::Install(image) => {
            manager.install(&image).await?;
            Ok(Value::Null)
        }
        RpcRequest::Images => to_json(manager.images().await?),
        RpcRequest::Run(options) => {
            manager.run(&options).await?;
            Ok(Value::Null)
        }
        RpcRequest::Kill(route) => {
            manager.kill(&route).await?;
            Ok(Value::Null)
        }
        RpcRequest::Ps => to_json(manager.ps().await?),
        RpcRequest::Work(options) => manager.work(options).await,
        RpcRequest::Request(options) => manager.request(options).await,
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| NamError::Rpc(e.to_string()))
}
