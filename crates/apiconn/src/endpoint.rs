//! Endpoint set: how to reach one controller

use crate::error::{ConnError, Result};
use crate::tag::ModelTag;
use ctrlink_common::config::ControllerConfig;
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// 已解析的 host:port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for HostPort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| format!("\"{s}\": missing port"))?;
            host.parse::<Ipv6Addr>()
                .map_err(|_| format!("\"{s}\": invalid IPv6 address"))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| format!("\"{s}\": missing port"))?
        };

        if host.is_empty() {
            return Err(format!("\"{s}\": empty host"));
        }
        if host.contains(':') && !s.starts_with('[') {
            return Err(format!("\"{s}\": IPv6 addresses must be bracketed"));
        }

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| format!("\"{s}\": invalid port"))?;

        Ok(HostPort {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// 控制器端点集合
///
/// 创建后不可变。地址保持调用方给出的顺序，拨号时按此顺序错开启动。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    addresses: Vec<String>,
    sni_host_name: Option<String>,
    ca_cert: Option<String>,
    model: Option<ModelTag>,
}

impl EndpointSet {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            sni_host_name: None,
            ca_cert: None,
            model: None,
        }
    }

    pub fn with_sni_host_name(mut self, name: impl Into<String>) -> Self {
        self.sni_host_name = Some(name.into());
        self
    }

    pub fn with_ca_cert(mut self, pem: impl Into<String>) -> Self {
        self.ca_cert = Some(pem.into());
        self
    }

    pub fn with_model(mut self, model: ModelTag) -> Self {
        self.model = Some(model);
        self
    }

    /// 从配置文件段构建，必要时读取 CA 证书文件
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        let mut endpoints = Self::new(config.addresses.iter().cloned());

        if let Some(name) = config.sni_host_name.as_deref().filter(|n| !n.is_empty()) {
            endpoints = endpoints.with_sni_host_name(name);
        }

        match (&config.ca_cert, &config.ca_cert_path) {
            (Some(pem), _) if !pem.trim().is_empty() => {
                endpoints = endpoints.with_ca_cert(pem.clone());
            }
            (_, Some(path)) => {
                let pem = std::fs::read_to_string(path).map_err(|e| {
                    ConnError::invalid(format!(
                        "failed to read CA certificate from {}: {e}",
                        path.display()
                    ))
                })?;
                endpoints = endpoints.with_ca_cert(pem);
            }
            _ => {}
        }

        if let Some(uuid) = config.model_uuid.as_deref().filter(|u| !u.is_empty()) {
            let tag: ModelTag = format!("model-{uuid}")
                .parse()
                .map_err(|e| ConnError::invalid(format!("model_uuid: {e}")))?;
            endpoints = endpoints.with_model(tag);
        }

        endpoints.validate()?;
        Ok(endpoints)
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn sni_host_name(&self) -> Option<&str> {
        self.sni_host_name.as_deref()
    }

    pub fn ca_cert(&self) -> Option<&str> {
        self.ca_cert.as_deref()
    }

    pub fn model(&self) -> Option<&ModelTag> {
        self.model.as_ref()
    }

    /// SNI 提示只在未配置 CA 证书时生效
    pub fn effective_sni(&self) -> Option<&str> {
        if self.ca_cert.is_some() {
            None
        } else {
            self.sni_host_name()
        }
    }

    /// 检查地址列表非空且每个地址都能解析
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(ConnError::invalid("missing addresses"));
        }
        for address in &self.addresses {
            address
                .parse::<HostPort>()
                .map_err(|e| ConnError::invalid(format!("host addresses: {e}")))?;
        }
        Ok(())
    }

    pub fn host_ports(&self) -> Result<Vec<HostPort>> {
        self.addresses
            .iter()
            .map(|a| {
                a.parse::<HostPort>()
                    .map_err(|e| ConnError::invalid(format!("host addresses: {e}")))
            })
            .collect()
    }

    /// 所有地址中出现过的端口（去重、升序）
    pub fn ports(&self) -> Result<Vec<u16>> {
        let ports: BTreeSet<u16> = self.host_ports()?.iter().map(HostPort::port).collect();
        Ok(ports.into_iter().collect())
    }

    /// 针对某个地址的 API 路径
    pub fn url_for(&self, address: &str) -> String {
        match &self.model {
            Some(model) => format!("wss://{address}/model/{}/api", model.uuid()),
            None => format!("wss://{address}/api"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_parse() {
        let hp: HostPort = "10.0.0.1:17070".parse().unwrap();
        assert_eq!(hp.host(), "10.0.0.1");
        assert_eq!(hp.port(), 17070);

        let hp: HostPort = "[fd00::1]:17070".parse().unwrap();
        assert_eq!(hp.host(), "fd00::1");
        assert_eq!(hp.to_string(), "[fd00::1]:17070");

        for bad in ["10.0.0.1", ":17070", "host:0", "host:port", "fd00::1:17070", "[zz]:1"] {
            assert!(bad.parse::<HostPort>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_validate_requires_addresses() {
        let err = EndpointSet::new(Vec::<String>::new()).validate().unwrap_err();
        assert!(err.to_string().contains("missing addresses"));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let endpoints = EndpointSet::new(["10.0.0.1:17070", "nope"]);
        assert!(endpoints.validate().is_err());
    }

    #[test]
    fn test_ports_are_unique() {
        let endpoints = EndpointSet::new(["a:17070", "b:17070", "c:443"]);
        assert_eq!(endpoints.ports().unwrap(), vec![443, 17070]);
    }

    #[test]
    fn test_ca_overrides_sni() {
        let endpoints = EndpointSet::new(["a:17070"]).with_sni_host_name("ctrl.example.com");
        assert_eq!(endpoints.effective_sni(), Some("ctrl.example.com"));

        let endpoints = endpoints.with_ca_cert("-----BEGIN CERTIFICATE-----");
        assert_eq!(endpoints.effective_sni(), None);
    }

    #[test]
    fn test_url_for_model_and_controller() {
        let endpoints = EndpointSet::new(["a:17070"]);
        assert_eq!(endpoints.url_for("a:17070"), "wss://a:17070/api");

        let model: ModelTag = "model-deadbeef-0bad-400d-8000-4b1d0d06f00d"
            .parse()
            .unwrap();
        let endpoints = endpoints.with_model(model);
        assert_eq!(
            endpoints.url_for("a:17070"),
            "wss://a:17070/model/deadbeef-0bad-400d-8000-4b1d0d06f00d/api"
        );
    }

    #[test]
    fn test_from_config_reads_ca_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();

        let config = ControllerConfig {
            addresses: vec!["10.0.0.1:17070".to_string()],
            ca_cert_path: Some(file.path().to_path_buf()),
            model_uuid: Some("deadbeef-0bad-400d-8000-4b1d0d06f00d".to_string()),
            ..Default::default()
        };

        let endpoints = EndpointSet::from_config(&config).unwrap();
        assert!(endpoints.ca_cert().is_some());
        assert!(endpoints.model().is_some());
    }
}
