//! Message Protocol
//!
//! Frames exchanged with the control plane over the device socket. Calls
//! arrive as `{event, requestId, payload}` with event
//! `socket-rpc.device.<method>`; replies go back on `<event>.result`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::agent::routing::{RequestOptions, WorkOptions};
use crate::applet::{AppletImage, AppletRoute, AppletRunOptions};
use crate::error::ErrorBody;

/// Event prefix of every remote call on the device socket.
pub const RPC_EVENT_PREFIX: &str = "socket-rpc.device";

/// Server-pushed error event.
pub const ERROR_EVENT: &str = "error";

/// Marker in an error event meaning the device token was rejected.
pub const TOKEN_INVALID: &str = "token invalid";

/// Methods the control plane may invoke on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Install,
    Images,
    Run,
    Kill,
    Ps,
    Work,
    Request,
}

/// Dispatch table entry
#[derive(Debug, Clone, Copy)]
pub struct RpcOperation {
    pub method: RpcMethod,
    pub name: &'static str,
    pub timeout: Duration,
}

/// Every remote method with its name and deadline.
pub const OPERATIONS: &[RpcOperation] = &[
    RpcOperation {
        method: RpcMethod::Install,
        name: "install",
        timeout: Duration::from_secs(60),
    },
    RpcOperation {
        method: RpcMethod::Images,
        name: "images",
        timeout: Duration::from_secs(5),
    },
    RpcOperation {
        method: RpcMethod::Run,
        name: "run",
        timeout: Duration::from_secs(60),
    },
    RpcOperation {
        method: RpcMethod::Kill,
        name: "kill",
        timeout: Duration::from_secs(30),
    },
    RpcOperation {
        method: RpcMethod::Ps,
        name: "ps",
        timeout: Duration::from_secs(5),
    },
    RpcOperation {
        method: RpcMethod::Work,
        name: "work",
        timeout: Duration::from_secs(30),
    },
    RpcOperation {
        method: RpcMethod::Request,
        name: "request",
        timeout: Duration::from_secs(5),
    },
];

impl RpcMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        OPERATIONS.iter().find(|op| op.name == name).map(|op| op.method)
    }

    /// Method for a full event name, e.g. `socket-rpc.device.ps`.
    pub fn from_event(event: &str) -> Option<Self> {
        event
            .strip_prefix(RPC_EVENT_PREFIX)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(Self::from_name)
    }

    fn operation(self) -> Option<&'static RpcOperation> {
        OPERATIONS.iter().find(|op| op.method == self)
    }

    pub fn name(self) -> &'static str {
        self.operation().map(|op| op.name).unwrap_or("unknown")
    }

    pub fn timeout(self) -> Duration {
        self.operation()
            .map(|op| op.timeout)
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn event(self) -> String {
        format!("{}.{}", RPC_EVENT_PREFIX, self.name())
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Any frame received on the device socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcFrame {
    pub event: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// What an incoming frame asks of the agent
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Call {
        method: RpcMethod,
        request_id: Option<String>,
        payload: Value,
    },
    ServerError(String),
    Unknown(String),
}

impl RpcFrame {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn classify(self) -> Inbound {
        if self.event == ERROR_EVENT {
            let message = match &self.payload {
                Value::String(message) => message.clone(),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.payload.to_string()),
                other => other.to_string(),
            };
            return Inbound::ServerError(message);
        }

        match RpcMethod::from_event(&self.event) {
            Some(method) => Inbound::Call {
                method,
                request_id: self.request_id,
                payload: self.payload,
            },
            None => Inbound::Unknown(self.event),
        }
    }
}

/// A decoded remote call
#[derive(Debug, Clone)]
pub enum RpcRequest {
    Install(AppletImage),
    Images,
    Run(AppletRunOptions),
    Kill(AppletRoute),
    Ps,
    Work(WorkOptions),
    Request(RequestOptions),
}

impl RpcRequest {
    pub fn decode(method: RpcMethod, payload: Value) -> serde_json::Result<Self> {
        Ok(match method {
            RpcMethod::Install => RpcRequest::Install(serde_json::from_value(payload)?),
            RpcMethod::Images => RpcRequest::Images,
            RpcMethod::Run => RpcRequest::Run(serde_json::from_value(payload)?),
            RpcMethod::Kill => RpcRequest::Kill(serde_json::from_value(payload)?),
            RpcMethod::Ps => RpcRequest::Ps,
            RpcMethod::Work => RpcRequest::Work(serde_json::from_value(payload)?),
            RpcMethod::Request => RpcRequest::Request(serde_json::from_value(payload)?),
        })
    }

    pub fn method(&self) -> RpcMethod {
        match self {
            RpcRequest::Install(_) => RpcMethod::Install,
            RpcRequest::Images => RpcMethod::Images,
            RpcRequest::Run(_) => RpcMethod::Run,
            RpcRequest::Kill(_) => RpcMethod::Kill,
            RpcRequest::Ps => RpcMethod::Ps,
            RpcRequest::Work(_) => RpcMethod::Work,
            RpcRequest::Request(_) => RpcMethod::Request,
        }
    }
}

/// Reply to a remote call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReply {
    pub event: String,
    pub request_id: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl RpcReply {
    pub fn success(method: RpcMethod, request_id: Option<String>, result: Value) -> Self {
        Self {
            event: format!("{}.result", method.event()),
            request_id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(method: RpcMethod, request_id: Option<String>, error: ErrorBody) -> Self {
        Self {
            event: format!("{}.result", method.event()),
            request_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_method_has_an_operation() {
        for method in [
            RpcMethod::Install,
            RpcMethod::Images,
            RpcMethod::Run,
            RpcMethod::Kill,
            RpcMethod::Ps,
            RpcMethod::Work,
            RpcMethod::Request,
        ] {
            assert_eq!(RpcMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(RpcMethod::Install.timeout(), Duration::from_secs(60));
        assert_eq!(RpcMethod::Ps.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_classify_call() {
        let frame = RpcFrame::from_json(
            r#"{"event":"socket-rpc.device.kill","requestId":"r1","payload":{
                "appletId":"a1","naType":"npm","naVersion":"8.3.0",
                "packageName":"foo","version":"1.0.0"}}"#,
        )
        .unwrap();

        let Inbound::Call {
            method,
            request_id,
            payload,
        } = frame.classify()
        else {
            panic!("expected a call");
        };
        assert_eq!(method, RpcMethod::Kill);
        assert_eq!(request_id.as_deref(), Some("r1"));

        let RpcRequest::Kill(route) = RpcRequest::decode(method, payload).unwrap() else {
            panic!("expected kill");
        };
        assert_eq!(route.container_name(), "na-npm-8.3.0-foo_1.0.0-a1");
    }

    #[test]
    fn test_classify_error_and_unknown() {
        let frame = RpcFrame::from_json(r#"{"event":"error","payload":"token invalid"}"#).unwrap();
        assert_eq!(frame.classify(), Inbound::ServerError("token invalid".to_string()));

        let frame = RpcFrame::from_json(r#"{"event":"error","payload":{"message":"boom"}}"#)
            .unwrap();
        assert_eq!(frame.classify(), Inbound::ServerError("boom".to_string()));

        let frame = RpcFrame::from_json(r#"{"event":"socket-rpc.device.reboot"}"#).unwrap();
        assert_eq!(
            frame.classify(),
            Inbound::Unknown("socket-rpc.device.reboot".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_bad_payload() {
        assert!(RpcRequest::decode(RpcMethod::Install, json!({ "naType": "npm" })).is_err());
        assert!(matches!(
            RpcRequest::decode(RpcMethod::Images, Value::Null),
            Ok(RpcRequest::Images)
        ));
    }

    #[test]
    fn test_decode_work_with_nested_route() {
        let payload = json!({
            "userApplet": "ua-1",
            "route": {
                "appletId": "a1", "naType": "npm", "naVersion": "8.3.0",
                "packageName": "foo", "version": "1.0.0"
            },
            "worker": { "handler": "sync", "name": "daily" },
            "payload": { "accounts": [] }
        });

        let RpcRequest::Work(options) = RpcRequest::decode(RpcMethod::Work, payload).unwrap()
        else {
            panic!("expected work");
        };
        assert_eq!(options.user_applet.as_deref(), Some("ua-1"));
        assert_eq!(options.route.container_name(), "na-npm-8.3.0-foo_1.0.0-a1");
        assert_eq!(options.worker.uri(), "/workers/sync/daily");
        assert_eq!(options.payload, json!({ "accounts": [] }));
    }

    #[test]
    fn test_reply_shape() {
        let reply = RpcReply::success(RpcMethod::Ps, Some("r2".to_string()), json!([]));
        let json: Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "socket-rpc.device.ps.result");
        assert_eq!(json["requestId"], "r2");
        assert_eq!(json["ok"], true);
        assert!(json.get("error").is_none());
    }
}
