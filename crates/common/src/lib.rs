//! Common 基础设施库
//!
//! 为 ctrlink 控制器客户端提供基础设施组件，包括配置、错误类型、TLS 与监控指标

pub mod config;
pub mod error;
pub mod metrics;
pub mod util;

// Re-export commonly used types for convenience
pub use config::CtrlinkConfig;
pub use error::{ConfigError, NetworkError};
pub use util::TlsConfigurer;
