//! Error types for apiconn
//!
//! Every failure a caller can observe maps to one [`ErrorKind`], so "never
//! connected", "connected then died" and "connected but not authorized" are
//! always distinguishable.

use crate::auth::DischargeChallenge;
use crate::transport::ServerError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConnError>;

/// 错误分类，便于调用方直接匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    DialTimeout,
    Cancelled,
    AuthenticationFailed,
    DischargeRequired,
    DischargeFailed,
    TransportBroken,
    CapabilityUnavailable,
    Server,
    Protocol,
}

/// 单个地址最近一次的拨号失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialFailure {
    pub address: String,
    pub error: String,
}

/// 按地址顺序聚合的拨号失败
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialFailures(pub Vec<DialFailure>);

impl DialFailures {
    pub fn iter(&self) -> impl Iterator<Item = &DialFailure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DialFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no attempt completed");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.address, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConnError {
    /// Malformed endpoint set, policy or contradictory credential. Detected before any I/O.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unable to connect to controller within {timeout:?}: {failures}")]
    DialTimeout {
        timeout: Duration,
        failures: DialFailures,
    },

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        code: Option<String>,
        message: String,
    },

    /// The delegated chain needs one more discharge. The caller decides whether to retry.
    #[error("discharge required: {}", .0.message)]
    DischargeRequired(Box<DischargeChallenge>),

    #[error("failed to acquire discharge: {0}")]
    DischargeFailed(String),

    #[error("connection is broken: {0}")]
    TransportBroken(String),

    #[error("facade {facade} has no version in [{min}, {max}] (available: {available:?})")]
    CapabilityUnavailable {
        facade: String,
        min: u32,
        max: u32,
        available: Vec<u32>,
    },

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// 请求或响应无法编解码；连接本身仍然可用
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::DialTimeout { .. } => ErrorKind::DialTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::DischargeRequired(_) => ErrorKind::DischargeRequired,
            Self::DischargeFailed(_) => ErrorKind::DischargeFailed,
            Self::TransportBroken(_) => ErrorKind::TransportBroken,
            Self::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            Self::Server(_) => ErrorKind::Server,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn broken(message: impl Into<String>) -> Self {
        Self::TransportBroken(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
