//! TLS setup for one connection attempt

use crate::endpoint::{EndpointSet, HostPort};
use crate::error::{ConnError, Result};
use ctrlink_common::TlsConfigurer;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tracing::warn;

/// 控制器证书签发时使用的服务名
pub const CONTROLLER_SERVER_NAME: &str = "controller-apiserver";

/// 一次 `open` 调用共享的 TLS 设置
#[derive(Debug, Clone)]
pub struct TlsSetup {
    config: Arc<ClientConfig>,
    verified: bool,
    server_name_override: Option<String>,
}

impl TlsSetup {
    /// 根据端点集合构建 TLS 客户端配置
    ///
    /// 提供 CA 证书时只信任该 CA，服务名固定为 [`CONTROLLER_SERVER_NAME`]；
    /// 否则使用 webpki 根证书，服务名取 SNI 提示或地址中的主机名。
    pub fn build(endpoints: &EndpointSet, verify_server_cert: bool) -> Result<Self> {
        let tls_err = |e: ctrlink_common::NetworkError| ConnError::invalid(e.to_string());

        if !verify_server_cert {
            warn!(
                "server certificate verification is disabled; this connection is not authenticated against a trust root"
            );
            return Ok(Self {
                config: Arc::new(TlsConfigurer::insecure_client_config().map_err(tls_err)?),
                verified: false,
                server_name_override: endpoints.effective_sni().map(str::to_string),
            });
        }

        match endpoints.ca_cert() {
            Some(pem) => Ok(Self {
                config: Arc::new(TlsConfigurer::client_config_with_ca(pem).map_err(tls_err)?),
                verified: true,
                server_name_override: Some(CONTROLLER_SERVER_NAME.to_string()),
            }),
            None => Ok(Self {
                config: Arc::new(
                    TlsConfigurer::client_config_with_webpki_roots().map_err(tls_err)?,
                ),
                verified: true,
                server_name_override: endpoints.sni_host_name().map(str::to_string),
            }),
        }
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.clone()
    }

    /// 证书链是否经过校验
    pub fn verified(&self) -> bool {
        self.verified
    }

    /// 某个地址握手时使用的服务名
    pub fn server_name_for(&self, address: &HostPort) -> Result<ServerName<'static>> {
        let name = self
            .server_name_override
            .clone()
            .unwrap_or_else(|| address.host().to_string());
        ServerName::try_from(name)
            .map_err(|e| ConnError::invalid(format!("invalid TLS server name for {address}: {e}")))
    }
}
