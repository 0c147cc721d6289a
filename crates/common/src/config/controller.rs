//! 控制器连接目标配置
//!
//! 描述如何到达控制器：候选地址、SNI、CA 证书以及目标 model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 控制器端点配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// 控制器候选地址列表（host:port）
    ///
    /// 至少需要一个地址。连接时所有地址会以错开启动的方式并发尝试，
    /// 第一个完成 TLS 握手的地址胜出。
    /// 示例: ["10.0.0.1:17070", "[fd00::1]:17070", "ctrl.example.com:17070"]
    #[serde(default)]
    pub addresses: Vec<String>,

    /// SNI 主机名（可选）
    ///
    /// 当配置了 CA 证书时此字段被忽略。
    pub sni_host_name: Option<String>,

    /// 内联的 CA 证书（PEM 格式）
    pub ca_cert: Option<String>,

    /// CA 证书文件路径（PEM 格式）
    ///
    /// 与 ca_cert 二选一；同时配置时以 ca_cert 为准。
    pub ca_cert_path: Option<PathBuf>,

    /// 目标 model 的 UUID（可选）
    ///
    /// 留空则只登录到控制器本身。
    pub model_uuid: Option<String>,
}

impl ControllerConfig {
    /// 检查是否配置了 CA 证书（内联或文件）
    pub fn has_ca_cert(&self) -> bool {
        self.ca_cert.as_deref().is_some_and(|pem| !pem.trim().is_empty())
            || self.ca_cert_path.is_some()
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.addresses.is_empty() {
            errors.push("controller.addresses must contain at least one address".to_string());
        }

        for address in &self.addresses {
            let valid = address
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                errors.push(format!(
                    "Invalid controller address '{address}', expected host:port"
                ));
            }
        }

        if let Some(path) = &self.ca_cert_path
            && !path.is_file()
        {
            errors.push(format!(
                "controller.ca_cert_path does not point to a file: {}",
                path.display()
            ));
        }

        if self.has_ca_cert() && self.sni_host_name.is_some() {
            errors.push(
                "Warning: controller.sni_host_name is ignored because a CA certificate is configured"
                    .to_string(),
            );
        }
    }
}
