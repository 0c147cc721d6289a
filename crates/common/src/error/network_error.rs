//! 网络相关错误类型
//!
//! 定义所有与网络连接、通信、传输相关的错误

use thiserror::Error;

/// 网络相关错误
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout: {address}")]
    Timeout { address: String },

    #[error("Invalid address format: {address}")]
    InvalidAddress { address: String },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// 创建 TLS 错误
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// 创建连接失败错误
    pub fn connection_failed(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}
