//! Transport seam
//!
//! The connection core only needs a request/response channel that can report
//! when it has been closed. [`websocket`] provides the default implementation;
//! tests substitute their own through [`TransportDialer`].

pub mod websocket;

pub use websocket::{WebSocketDialer, WsTransport};

use crate::signal::SignalWatch;
use async_trait::async_trait;
use ctrlink_common::NetworkError;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 单次远程调用
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub facade: String,
    pub version: u32,
    /// 目标实体 id，多数 facade 为空
    pub id: Option<String>,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(facade: impl Into<String>, version: u32, method: impl Into<String>) -> Self {
        Self {
            facade: facade.into(),
            version,
            id: None,
            method: method.into(),
            params: Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// 服务端返回的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    /// 传输已关闭，调用未完成
    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// 已建立的安全传输
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError>;

    /// 关闭传输，重复调用应当无害
    async fn close(&self) -> Result<(), NetworkError>;

    /// 传输关闭（本地或远端）时触发
    fn closed(&self) -> SignalWatch;

    fn remote_addr(&self) -> &str;
}

/// 单个地址的拨号目标
#[derive(Debug, Clone)]
pub struct DialTarget {
    pub address: String,
    pub url: String,
    pub server_name: ServerName<'static>,
    pub tls: Arc<ClientConfig>,
}

/// 低层拨号器，可替换以便测试
#[async_trait]
pub trait TransportDialer: Send + Sync + fmt::Debug {
    async fn dial(&self, target: DialTarget) -> Result<Arc<dyn Transport>, NetworkError>;
}
