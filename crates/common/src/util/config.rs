//! TLS 配置实现
//!
//! 提供控制器连接所需的 TLS 客户端配置

use crate::error::NetworkError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::io::BufReader;
use std::sync::Arc;

/// TLS configuration utilities
pub struct TlsConfigurer;

impl TlsConfigurer {
    /// 返回统一使用的加密提供程序
    pub fn crypto_provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }

    /// 解析 PEM 格式的 CA 证书（可能包含多张）
    pub fn parse_ca_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, NetworkError> {
        let mut reader = BufReader::new(pem.as_bytes());
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| NetworkError::tls(format!("Invalid CA certificate PEM: {e}")))?;

        if certs.is_empty() {
            return Err(NetworkError::tls("No certificate found in CA PEM"));
        }

        Ok(certs)
    }

    /// 创建只信任指定 CA 的客户端配置
    pub fn client_config_with_ca(ca_pem: &str) -> Result<ClientConfig, NetworkError> {
        let mut roots = RootCertStore::empty();
        for cert in Self::parse_ca_certs(ca_pem)? {
            roots
                .add(cert)
                .map_err(|e| NetworkError::tls(format!("Rejected CA certificate: {e}")))?;
        }

        Ok(Self::builder()?
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// 创建使用 webpki 根证书的客户端配置
    pub fn client_config_with_webpki_roots() -> Result<ClientConfig, NetworkError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        Ok(Self::builder()?
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// 创建跳过证书链校验的客户端配置
    ///
    /// 握手签名仍会被校验，但任何证书都会被接受。仅用于测试。
    pub fn insecure_client_config() -> Result<ClientConfig, NetworkError> {
        let provider = Self::crypto_provider();
        Ok(Self::builder()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
            .with_no_client_auth())
    }

    fn builder()
    -> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, NetworkError> {
        ClientConfig::builder_with_provider(Self::crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::tls(format!("Unsupported protocol versions: {e}")))
    }
}

#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webpki_roots_config() {
        assert!(TlsConfigurer::client_config_with_webpki_roots().is_ok());
    }

    #[test]
    fn test_insecure_config() {
        assert!(TlsConfigurer::insecure_client_config().is_ok());
    }

    #[test]
    fn test_empty_ca_pem_rejected() {
        let err = TlsConfigurer::client_config_with_ca("not a certificate").unwrap_err();
        assert!(matches!(err, NetworkError::Tls { .. }));
    }
}
