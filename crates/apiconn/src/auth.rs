//! Login handshake
//!
//! One request, one response. Discharge requests are handed back to the caller
//! as [`LoginOutcome::DischargeRequired`]; this module never loops on them.

use crate::credential::{Credential, DelegatedToken};
use crate::endpoint::HostPort;
use crate::error::{ConnError, Result};
use crate::facade::FacadeVersions;
use crate::session::{Access, SessionInfo};
use crate::tag::{ControllerTag, ModelTag, Tag};
use crate::transport::{RpcError, RpcRequest, Transport};
use crate::version::Version;
use ctrlink_common::metrics::LOGINS;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ADMIN_FACADE: &str = "Admin";
pub const ADMIN_VERSION: u32 = 3;
pub const LOGIN_METHOD: &str = "Login";

/// 客户端版本，随登录请求发送
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct LoginRequest<'a> {
    auth_tag: String,
    credentials: &'a str,
    nonce: &'a str,
    macaroons: Vec<&'a str>,
    client_version: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HostPortEntry {
    value: String,
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserInfo {
    #[serde(default)]
    identity: String,
    #[serde(default)]
    controller_access: String,
    #[serde(default)]
    model_access: String,
}

#[derive(Debug, Deserialize)]
struct FacadeEntry {
    name: String,
    versions: Vec<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LoginResult {
    #[serde(default)]
    servers: Vec<Vec<HostPortEntry>>,
    #[serde(default)]
    model_tag: String,
    #[serde(default)]
    controller_tag: String,
    #[serde(default)]
    user_info: Option<UserInfo>,
    #[serde(default)]
    facades: Vec<FacadeEntry>,
    #[serde(default)]
    server_version: String,
    #[serde(default)]
    discharge_required: Option<String>,
    #[serde(default)]
    discharge_required_error: String,
}

/// 服务端要求的额外 discharge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DischargeChallenge {
    /// 需要被 discharge 的第三方 caveat 令牌
    pub token: DelegatedToken,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Session(SessionInfo),
    DischargeRequired(DischargeChallenge),
}

/// 在已建立的传输上执行登录握手
///
/// 传输已关闭时返回 `TransportBroken`，不会被误报为认证失败。
pub async fn authenticate(
    transport: &dyn Transport,
    credential: &Credential,
    model: Option<&ModelTag>,
) -> Result<LoginOutcome> {
    credential.validate()?;

    let (auth_tag, password, nonce, macaroons) = match credential {
        Credential::Skip => {
            debug!("skipping login on {}", transport.remote_addr());
            return Ok(LoginOutcome::Session(SessionInfo::unauthenticated()));
        }
        Credential::Password {
            tag,
            password,
            nonce,
        } => (
            tag.to_string(),
            password.as_str(),
            nonce.as_deref().unwrap_or_default(),
            Vec::new(),
        ),
        Credential::Delegated { chain } => (
            String::new(),
            "",
            "",
            chain.iter().map(DelegatedToken::as_str).collect(),
        ),
    };

    if transport.closed().is_fired() {
        LOGINS.with_label_values(&["transport_broken"]).inc();
        return Err(ConnError::broken(format!(
            "transport to {} closed before login",
            transport.remote_addr()
        )));
    }

    let params = serde_json::to_value(LoginRequest {
        auth_tag,
        credentials: password,
        nonce,
        macaroons,
        client_version: CLIENT_VERSION,
    })
    .map_err(|e| ConnError::protocol(format!("encode login request: {e}")))?;

    debug!(
        "logging in to {} with {} credential",
        transport.remote_addr(),
        credential.mode()
    );

    let request = RpcRequest::new(ADMIN_FACADE, ADMIN_VERSION, LOGIN_METHOD).with_params(params);
    let response = match transport.call(request).await {
        Ok(response) => response,
        Err(RpcError::Server(e)) => {
            LOGINS.with_label_values(&["rejected"]).inc();
            return Err(ConnError::AuthenticationFailed {
                code: Some(e.code).filter(|c| !c.is_empty()),
                message: e.message,
            });
        }
        Err(RpcError::Codec(e)) => {
            LOGINS.with_label_values(&["malformed"]).inc();
            return Err(ConnError::protocol(format!(
                "login to {}: {e}",
                transport.remote_addr()
            )));
        }
        Err(e @ (RpcError::Closed | RpcError::Network(_))) => {
            LOGINS.with_label_values(&["transport_broken"]).inc();
            return Err(ConnError::broken(format!(
                "login to {} interrupted: {e}",
                transport.remote_addr()
            )));
        }
    };

    let mut result: LoginResult = serde_json::from_value(response).map_err(|e| {
        LOGINS.with_label_values(&["malformed"]).inc();
        ConnError::protocol(format!("malformed login response: {e}"))
    })?;

    if let Some(token) = result.discharge_required.take().filter(|t| !t.is_empty()) {
        if !matches!(credential, Credential::Delegated { .. }) {
            LOGINS.with_label_values(&["rejected"]).inc();
            return Err(ConnError::AuthenticationFailed {
                code: None,
                message: format!(
                    "controller requested a discharge for a {} login",
                    credential.mode()
                ),
            });
        }
        LOGINS.with_label_values(&["discharge_required"]).inc();
        info!(
            "controller at {} requires a discharge",
            transport.remote_addr()
        );
        return Ok(LoginOutcome::DischargeRequired(DischargeChallenge {
            token: DelegatedToken::new(token),
            message: if result.discharge_required_error.is_empty() {
                "delegated credential chain needs a discharge".to_string()
            } else {
                result.discharge_required_error
            },
        }));
    }

    let session = session_from_result(result, credential, model)?;
    LOGINS.with_label_values(&["success"]).inc();
    Ok(LoginOutcome::Session(session))
}

fn session_from_result(
    result: LoginResult,
    credential: &Credential,
    model: Option<&ModelTag>,
) -> Result<SessionInfo> {
    let model_tag = if result.model_tag.is_empty() {
        None
    } else {
        Some(
            result
                .model_tag
                .parse::<ModelTag>()
                .map_err(|e| ConnError::protocol(format!("login response: {e}")))?,
        )
    };
    if let (Some(wanted), Some(got)) = (model, model_tag.as_ref())
        && wanted != got
    {
        LOGINS.with_label_values(&["rejected"]).inc();
        return Err(ConnError::AuthenticationFailed {
            code: None,
            message: format!("controller attached to {got}, expected {wanted}"),
        });
    }

    let controller_tag = if result.controller_tag.is_empty() {
        None
    } else {
        result.controller_tag.parse::<ControllerTag>().ok()
    };

    let server_version = if result.server_version.is_empty() {
        None
    } else {
        match result.server_version.parse::<Version>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("ignoring server version: {}", e);
                None
            }
        }
    };

    let facades: FacadeVersions = result
        .facades
        .into_iter()
        .flat_map(|f| {
            let name = f.name;
            f.versions.into_iter().map(move |v| (name.clone(), v))
        })
        .collect();

    let api_host_ports = result
        .servers
        .into_iter()
        .map(|server| {
            server
                .into_iter()
                .filter_map(|hp| {
                    let addr = if hp.value.contains(':') {
                        format!("[{}]:{}", hp.value, hp.port)
                    } else {
                        format!("{}:{}", hp.value, hp.port)
                    };
                    addr.parse::<HostPort>().ok()
                })
                .collect::<Vec<_>>()
        })
        .filter(|server| !server.is_empty())
        .collect();

    let user_info = result.user_info.unwrap_or_default();
    let auth_tag = match credential {
        Credential::Password { tag, .. } => Some(tag.clone()),
        _ if !user_info.identity.is_empty() => user_info.identity.parse::<Tag>().ok(),
        _ => None,
    };

    Ok(SessionInfo {
        server_version,
        facades: Arc::new(facades),
        auth_tag,
        model_tag,
        controller_tag,
        model_access: Access::from_server(&user_info.model_access),
        controller_access: Access::from_server(&user_info.controller_access),
        api_host_ports,
        authenticated: true,
    })
}
