//! WebSocket Client
//!
//! Holds the device socket to the control plane open, serves remote calls
//! over it and reconnects when it drops.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::agent::manager::AppletManager;
use crate::connection::dispatch;
use crate::connection::protocol::{Inbound, RpcFrame, RpcReply, TOKEN_INVALID};
use crate::connection::state::{ChannelState, ChannelStateManager};
use crate::error::{NamError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// `http(s)://host` -> `ws(s)://host/device?token=<token>`
pub fn device_socket_url(server: &str, token: &str) -> String {
    let base = server.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/device?token={}", base, token)
}

/// How a single session ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Shutdown,
}

/// Device socket client
pub struct WebSocketClient {
    url: String,
    display_url: String,
    reconnect_interval_ms: u64,
    max_reconnect_attempts: u32,
    manager: Arc<AppletManager>,
    state: ChannelStateManager,
}

impl WebSocketClient {
    pub fn new(server: &str, token: &str, manager: Arc<AppletManager>) -> Self {
        let state = manager.channel().clone();
        Self {
            url: device_socket_url(server, token),
            display_url: device_socket_url(server, "***"),
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 0,
            manager,
            state,
        }
    }

    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    /// 0 retries forever
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Run until `shutdown` flips, the token is rejected, or reconnects are
    /// exhausted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_run(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => {
                    info!("Device socket is disconnected");
                }
                Err(NamError::Unauthenticated) => {
                    error!("Device token was rejected by the control plane");
                    self.state.set_rejected();
                    return Err(NamError::Unauthenticated);
                }
                Err(e) => {
                    error!(error = %e, "Device socket error");
                    self.state.set_disconnected(Some(e.to_string()));
                }
            }

            let attempts = self.state.connection_attempts();
            if self.max_reconnect_attempts > 0 && attempts >= self.max_reconnect_attempts {
                error!(attempts, "Device socket reconnect failed");
                return Ok(());
            }

            self.state.set_reconnecting();
            info!(
                interval_ms = self.reconnect_interval_ms,
                "Waiting before reconnection attempt"
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.reconnect_interval_ms)) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state.set_shutting_down();
        Ok(())
    }

    async fn connect_and_run(&self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd> {
        if self.state.current_state() != ChannelState::Connecting {
            self.state.set_connecting();
        }
        info!(url = %self.display_url, "Connecting device socket");

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| NamError::Timeout {
                operation: "socket connect".to_string(),
                millis: CONNECT_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|e| NamError::Socket(e.to_string()))?;

        info!("Device socket is connected");
        self.state.set_connected();

        let (mut write, mut read) = ws_stream.split();
        let (reply_tx, mut reply_rx) = mpsc::channel::<RpcReply>(100);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text, &reply_tx)?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| NamError::Socket(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            self.state.set_disconnected(Some("Server closed connection".to_string()));
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
                            debug!("Ignoring binary frame");
                        }
                        Some(Err(e)) => {
                            return Err(NamError::Socket(e.to_string()));
                        }
                        None => {
                            info!("Device socket stream ended");
                            self.state.set_disconnected(Some("Stream ended".to_string()));
                            return Ok(SessionEnd::Closed);
                        }
                    }
                }

                reply = reply_rx.recv() => {
                    if let Some(reply) = reply {
                        let json = reply.to_json().map_err(|e| NamError::Rpc(e.to_string()))?;
                        debug!(event = %reply.event, "Sending reply to control plane");
                        write
                            .send(Message::Text(json))
                            .await
                            .map_err(|e| NamError::Socket(e.to_string()))?;
                    }
                }

                _ = shutdown.changed() => {
                    info!("Closing device socket");
                    let _ = write.send(Message::Close(None)).await;
                    self.state.set_disconnected(Some("Agent shutting down".to_string()));
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    /// Handle one text frame. Calls run on their own task; only a rejected
    /// token is an error.
    fn handle_message(&self, text: &str, reply_tx: &mpsc::Sender<RpcReply>) -> Result<()> {
        let frame = match RpcFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to parse control plane message");
                return Ok(());
            }
        };

        match frame.classify() {
            Inbound::Call {
                method,
                request_id,
                payload,
            } => {
                info!(method = %method, request_id = ?request_id, "Received remote call");
                let manager = self.manager.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let reply = dispatch::handle_call(manager, method, request_id, payload).await;
                    if reply_tx.send(reply).await.is_err() {
                        warn!("Device socket closed before the reply was sent");
                    }
                });
            }
            Inbound::ServerError(message) => {
                if message.contains(TOKEN_INVALID) {
                    return Err(NamError::Unauthenticated);
                }
                error!(message = %message, "Received error from control plane");
            }
            Inbound::Unknown(event) => {
                debug!(event = %event, "Ignoring unknown event");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::harness;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_device_socket_url() {
        assert_eq!(
            device_socket_url("http://api.nodeswork.com/", "t1"),
            "ws://api.nodeswork.com/device?token=t1"
        );
        assert_eq!(
            device_socket_url("https://api.nodeswork.com", "t1"),
            "wss://api.nodeswork.com/device?token=t1"
        );
    }

    async fn control_plane(frames: Vec<&'static str>) -> (u16, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(text).await;
                }
            }
        });
        (port, seen_rx)
    }

    #[tokio::test]
    async fn test_rejected_token_is_fatal() {
        let h = harness(|_| {});
        let (port, _seen) = control_plane(vec![r#"{"event":"error","payload":"token invalid"}"#]).await;
        let (_tx, rx) = watch::channel(false);

        let client = WebSocketClient::new(&format!("http://127.0.0.1:{}", port), "t1", h.manager.clone())
            .reconnect_interval_ms(10);
        let err = client.run(rx).await.unwrap_err();

        assert!(matches!(err, NamError::Unauthenticated));
        assert_eq!(h.manager.channel().current_state(), ChannelState::Rejected);
    }

    #[tokio::test]
    async fn test_remote_call_gets_reply() {
        let h = harness(|_| {});
        let (port, mut seen) =
            control_plane(vec![r#"{"event":"socket-rpc.device.images","requestId":"r1"}"#]).await;
        let (tx, rx) = watch::channel(false);

        let client = WebSocketClient::new(&format!("http://127.0.0.1:{}", port), "t1", h.manager.clone());
        let task = tokio::spawn(async move { client.run(rx).await });

        let reply = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["event"], "socket-rpc.device.images.result");
        assert_eq!(reply["requestId"], "r1");
        assert_eq!(reply["ok"], true);

        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(h.manager.channel().current_state(), ChannelState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let h = harness(|_| {});
        let (_tx, rx) = watch::channel(false);

        let client = WebSocketClient::new("http://127.0.0.1:9", "t1", h.manager.clone())
            .reconnect_interval_ms(10)
            .max_reconnect_attempts(2);
        client.run(rx).await.unwrap();

        assert_eq!(h.manager.channel().connection_attempts(), 2);
    }
}
