//! WebSocket-over-TLS transport
//!
//! Requests are JSON text frames correlated with responses by `request-id`.
//! One task reads, one task writes; either task exiting closes the transport.

use super::{DialTarget, RpcError, RpcRequest, ServerError, Transport, TransportDialer};
use crate::signal::{Signal, SignalWatch};
use async_trait::async_trait;
use ctrlink_common::NetworkError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 等待读写任务退出的最长时间
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// 发送 Close 帧的最长时间
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct RequestFrame<'a> {
    #[serde(rename = "request-id")]
    request_id: u64,
    #[serde(rename = "type")]
    facade: &'a str,
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    request: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ResponseFrame {
    #[serde(rename = "request-id")]
    request_id: u64,
    #[serde(default)]
    error: String,
    #[serde(default, rename = "error-code")]
    error_code: String,
    #[serde(default)]
    response: Value,
}

impl ResponseFrame {
    fn into_result(self) -> Result<Value, RpcError> {
        if self.error.is_empty() {
            Ok(self.response)
        } else {
            Err(ServerError::new(self.error_code, self.error).into())
        }
    }
}

type Pending = HashMap<u64, oneshot::Sender<ResponseFrame>>;

/// 基于 WebSocket 的传输
///
/// 待响应表在关闭后置为 `None`，此后的调用立即失败。
#[derive(Debug)]
pub struct WsTransport {
    remote_addr: String,
    next_id: AtomicU64,
    pending: Arc<Mutex<Option<Pending>>>,
    outbound: mpsc::UnboundedSender<Message>,
    closed: Signal,
    shutdown: CancellationToken,
}

fn lock(pending: &Mutex<Option<Pending>>) -> MutexGuard<'_, Option<Pending>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 调用结束（包括调用方放弃等待）时移除待响应条目
struct PendingEntry<'a> {
    pending: &'a Mutex<Option<Pending>>,
    request_id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if let Some(pending) = lock(self.pending).as_mut() {
            pending.remove(&self.request_id);
        }
    }
}

impl WsTransport {
    /// 接管一个已完成握手的 WebSocket 流并启动读写任务
    pub fn spawn<S>(ws: WebSocketStream<S>, remote_addr: impl Into<String>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let remote_addr = remote_addr.into();
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending = Arc::new(Mutex::new(Some(Pending::new())));
        let closed = Signal::new();
        let shutdown = CancellationToken::new();

        // 写任务
        {
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            let addr = remote_addr.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let close = sink.send(Message::Close(None));
                            let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await;
                            break;
                        }
                        msg = outbound_rx.recv() => {
                            let Some(msg) = msg else { break };
                            // 对端停止读取时发送会一直阻塞，关闭必须能打断它
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                sent = sink.send(msg) => {
                                    if let Err(e) = sent {
                                        debug!("websocket write to {} failed: {}", addr, e);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                shutdown.cancel();
                closed.fire();
            });
        }

        // 读任务
        {
            let closed = closed.clone();
            let shutdown = shutdown.clone();
            let pending = pending.clone();
            let addr = remote_addr.clone();
            tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        msg = stream.next() => msg,
                    };
                    let frame = match msg {
                        Some(Ok(Message::Text(text))) => {
                            serde_json::from_str::<ResponseFrame>(text.as_str())
                        }
                        Some(Ok(Message::Binary(data))) => {
                            serde_json::from_slice::<ResponseFrame>(&data)
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("websocket to {} closed by peer", addr);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!("websocket read from {} failed: {}", addr, e);
                            break;
                        }
                    };

                    match frame {
                        Ok(frame) => {
                            let waiter = lock(&pending)
                                .as_mut()
                                .and_then(|p| p.remove(&frame.request_id));
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(frame);
                                }
                                None => debug!(
                                    "dropping response for unknown request {} from {}",
                                    frame.request_id, addr
                                ),
                            }
                        }
                        Err(e) => warn!("malformed response frame from {}: {}", addr, e),
                    }
                }

                shutdown.cancel();
                closed.fire();
                // 丢弃所有等待者，它们会收到 Closed
                lock(&pending).take();
            });
        }

        Arc::new(Self {
            remote_addr,
            next_id: AtomicU64::new(0),
            pending,
            outbound,
            closed,
            shutdown,
        })
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let text = serde_json::to_string(&RequestFrame {
            request_id,
            facade: &request.facade,
            version: request.version,
            id: request.id.as_deref(),
            request: &request.method,
            params: &request.params,
        })?;

        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(pending) => {
                pending.insert(request_id, tx);
            }
            None => return Err(RpcError::Closed),
        }
        let _entry = PendingEntry {
            pending: &self.pending,
            request_id,
        };

        if self.outbound.send(Message::text(text)).is_err() {
            return Err(RpcError::Closed);
        }

        match rx.await {
            Ok(frame) => frame.into_result(),
            Err(_) => Err(RpcError::Closed),
        }
    }

    async fn close(&self) -> Result<(), NetworkError> {
        self.shutdown.cancel();
        if tokio::time::timeout(CLOSE_GRACE, self.closed.watch().fired())
            .await
            .is_err()
        {
            return Err(NetworkError::Timeout {
                address: self.remote_addr.clone(),
            });
        }
        Ok(())
    }

    fn closed(&self) -> SignalWatch {
        self.closed.watch()
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

/// 默认拨号器：TCP → TLS → WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl TransportDialer for WebSocketDialer {
    async fn dial(&self, target: DialTarget) -> Result<Arc<dyn Transport>, NetworkError> {
        let tcp = TcpStream::connect(&target.address)
            .await
            .map_err(|e| NetworkError::connection_failed(&target.address, e))?;
        tcp.set_nodelay(true)?;

        let tls = TlsConnector::from(target.tls.clone())
            .connect(target.server_name.clone(), tcp)
            .await
            .map_err(|e| NetworkError::tls(format!("handshake with {}: {e}", target.address)))?;

        let (ws, _response) = tokio_tungstenite::client_async(target.url.as_str(), tls).await?;
        debug!("websocket established to {}", target.url);

        Ok(WsTransport::spawn(ws, target.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (Arc<WsTransport>, WebSocketStream<tokio::io::DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (WsTransport::spawn(client, "test:17070"), server)
    }

    #[test]
    fn test_request_frame_layout() {
        let params = json!({"a": 1});
        let frame = RequestFrame {
            request_id: 7,
            facade: "Pinger",
            version: 1,
            id: None,
            request: "Ping",
            params: &params,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"request-id": 7, "type": "Pinger", "version": 1, "request": "Ping", "params": {"a": 1}})
        );
    }

    #[test]
    fn test_response_frame_error() {
        let frame: ResponseFrame = serde_json::from_str(
            r#"{"request-id": 3, "error": "permission denied", "error-code": "unauthorized access"}"#,
        )
        .unwrap();
        match frame.into_result() {
            Err(RpcError::Server(e)) => {
                assert_eq!(e.code, "unauthorized access");
                assert_eq!(e.message, "permission denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (transport, mut server) = pair().await;

        let responder = tokio::spawn(async move {
            let msg = server.next().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert_eq!(request["type"], "Pinger");
            let reply = json!({"request-id": request["request-id"], "response": {"ok": true}});
            server
                .send(Message::text(reply.to_string()))
                .await
                .unwrap();
            server
        });

        let value = transport
            .call(RpcRequest::new("Pinger", 1, "Ping"))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
        let _server = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_calls() {
        let (transport, mut server) = pair().await;
        let closed = transport.closed();

        let call = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.call(RpcRequest::new("Pinger", 1, "Ping")).await })
        };

        // 收到请求后直接关闭
        let _ = server.next().await;
        server.close(None).await.unwrap();
        drop(server);

        let result = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RpcError::Closed)));
        closed.fired().await;

        let after = transport.call(RpcRequest::new("Pinger", 1, "Ping")).await;
        assert!(matches!(after, Err(RpcError::Closed)));
    }

    fn pending_len(transport: &WsTransport) -> usize {
        lock(&transport.pending).as_ref().map_or(0, HashMap::len)
    }

    #[tokio::test]
    async fn test_abandoned_calls_leave_no_pending_entries() {
        let (transport, _server) = pair().await;

        // 对端从不应答，每次调用都在超时后被放弃
        for _ in 0..5 {
            let result = tokio::time::timeout(
                Duration::from_millis(10),
                transport.call(RpcRequest::new("Pinger", 1, "Ping")),
            )
            .await;
            assert!(result.is_err());
        }

        assert_eq!(pending_len(&transport), 0);
        assert!(!transport.closed().is_fired());
    }

    #[tokio::test]
    async fn test_answered_call_leaves_no_pending_entry() {
        let (transport, mut server) = pair().await;

        let responder = tokio::spawn(async move {
            let msg = server.next().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            let reply = json!({"request-id": request["request-id"], "response": {}});
            server.send(Message::text(reply.to_string())).await.unwrap();
            server
        });

        transport
            .call(RpcRequest::new("Pinger", 1, "Ping"))
            .await
            .unwrap();
        assert_eq!(pending_len(&transport), 0);
        let _server = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_interrupts_write_to_stalled_peer() {
        // 极小的缓冲区，对端从不读取，大请求的写入会阻塞
        let (client, _server) = tokio::io::duplex(64);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let transport = WsTransport::spawn(client, "stalled:17070");

        let call = {
            let transport = transport.clone();
            tokio::spawn(async move {
                let request = RpcRequest::new("Client", 1, "FullStatus")
                    .with_params(json!({"blob": "x".repeat(64 * 1024)}));
                transport.call(request).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), transport.close())
            .await
            .expect("close should not wait for the stalled write")
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RpcError::Closed)));
    }

    #[tokio::test]
    async fn test_local_close_is_repeatable() {
        let (transport, _server) = pair().await;
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.closed().is_fired());
    }
}
