//! # ctrlink
//!
//! 控制器连接命令行工具：竞速拨号、登录与连接存活监督

// Re-export commonly used types
pub use apiconn::{Connector, Credential, DialPolicy, EndpointSet, LiveConnection};
pub use ctrlink_common::config::CtrlinkConfig;
