//! WebSocket 传输与完整连接流程测试（基于内存 duplex 流）

use apiconn::{
    Access, Credential, DialTarget, EndpointSet, ErrorKind, Transport, TransportDialer,
    WsTransport, open,
};
use async_trait::async_trait;
use ctrlink_common::NetworkError;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

/// 最小的控制器：应答登录与 Ping，收到 `Shutdown` 请求后关闭连接
async fn serve(mut ws: WebSocketStream<DuplexStream>) {
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        let id = request["request-id"].clone();

        let reply = match (request["type"].as_str(), request["request"].as_str()) {
            (Some("Admin"), Some("Login")) => {
                if request["params"]["credentials"] == "secret" {
                    json!({"request-id": id, "response": {
                        "user-info": {"identity": "user-admin", "controller-access": "superuser"},
                        "facades": [{"name": "Pinger", "versions": [1]}],
                        "server-version": "3.1.0"
                    }})
                } else {
                    json!({"request-id": id, "error": "invalid entity name or password", "error-code": "unauthorized access"})
                }
            }
            (Some("Pinger"), Some("Ping")) => json!({"request-id": id, "response": {}}),
            (_, Some("Shutdown")) => {
                let _ = ws.close(None).await;
                return;
            }
            _ => json!({"request-id": id, "error": "unknown facade", "error-code": "not implemented"}),
        };
        if ws.send(Message::text(reply.to_string())).await.is_err() {
            return;
        }
    }
}

/// 把每次拨号接到一个内存中的控制器上
#[derive(Debug, Default)]
struct DuplexDialer {
    dials: AtomicUsize,
}

#[async_trait]
impl TransportDialer for DuplexDialer {
    async fn dial(&self, target: DialTarget) -> Result<Arc<dyn Transport>, NetworkError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        tokio::spawn(serve(server));

        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        Ok(WsTransport::spawn(client, target.address))
    }
}

fn policy(dialer: Arc<DuplexDialer>) -> apiconn::DialPolicy {
    apiconn::DialPolicy {
        total_timeout: Duration::from_secs(5),
        ..Default::default()
    }
    .with_dialer(dialer)
}

#[tokio::test]
async fn test_login_and_ping_over_websocket() {
    let dialer = Arc::new(DuplexDialer::default());
    let credential = Credential::password("user-admin".parse().unwrap(), "secret");

    let conn = open(&EndpointSet::new(["ctrl:17070"]), &credential, policy(dialer.clone()))
        .await
        .unwrap();

    assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
    assert_eq!(conn.server_version().unwrap().to_string(), "3.1.0");
    assert_eq!(conn.controller_access(), Access::Superuser);
    conn.ping().await.unwrap();
    assert!(!conn.is_broken().await);

    conn.close().await.unwrap();
    assert!(conn.broken().is_fired());
}

#[tokio::test]
async fn test_bad_password_over_websocket() {
    let dialer = Arc::new(DuplexDialer::default());
    let credential = Credential::password("user-admin".parse().unwrap(), "wrong");

    let err = open(&EndpointSet::new(["ctrl:17070"]), &credential, policy(dialer))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
}

#[tokio::test]
async fn test_server_shutdown_breaks_connection() {
    let dialer = Arc::new(DuplexDialer::default());
    let credential = Credential::password("user-admin".parse().unwrap(), "secret");
    let conn = open(&EndpointSet::new(["ctrl:17070"]), &credential, policy(dialer))
        .await
        .unwrap();

    let pinger = conn.facade("Pinger", 1).unwrap();
    let err = pinger
        .call::<_, Value>("Shutdown", ())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportBroken);

    tokio::time::timeout(Duration::from_secs(5), conn.broken().fired())
        .await
        .expect("peer close should break the connection");
    assert!(conn.is_broken().await);
}
