//! Session information produced by a login handshake

use crate::endpoint::HostPort;
use crate::facade::FacadeVersions;
use crate::tag::{ControllerTag, ModelTag, Tag};
use crate::version::Version;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// 访问级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    None,
    Login,
    AddModel,
    Superuser,
    Read,
    Write,
    Admin,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::None => "",
            Access::Login => "login",
            Access::AddModel => "add-model",
            Access::Superuser => "superuser",
            Access::Read => "read",
            Access::Write => "write",
            Access::Admin => "admin",
        }
    }

    /// 解析服务端返回的访问级别，未知值视为无权限
    pub(crate) fn from_server(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!("unknown access level \"{}\" reported by controller", value);
            Access::None
        })
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Access::None),
            "login" => Ok(Access::Login),
            "add-model" => Ok(Access::AddModel),
            "superuser" => Ok(Access::Superuser),
            "read" => Ok(Access::Read),
            "write" => Ok(Access::Write),
            "admin" => Ok(Access::Admin),
            other => Err(format!("unknown access level \"{other}\"")),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 登录握手协商出的会话信息
///
/// 登录完成后只读；facade 表通过 `Arc` 在所有句柄间共享。
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub server_version: Option<Version>,
    pub facades: Arc<FacadeVersions>,
    pub auth_tag: Option<Tag>,
    pub model_tag: Option<ModelTag>,
    pub controller_tag: Option<ControllerTag>,
    pub model_access: Access,
    pub controller_access: Access,
    /// 服务端报告的 API 地址，每个服务器一组
    pub api_host_ports: Vec<Vec<HostPort>>,
    pub authenticated: bool,
}

impl SessionInfo {
    /// 跳过登录时的空会话
    pub fn unauthenticated() -> Self {
        Self::default()
    }
}
