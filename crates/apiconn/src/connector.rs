//! The `open` entry point
//!
//! validate → TLS → dial → login → supervise. Configuration errors surface
//! before any network activity.

use crate::auth::{self, DischargeChallenge, LoginOutcome};
use crate::connection::LiveConnection;
use crate::credential::{Credential, DelegatedToken};
use crate::dialer;
use crate::endpoint::EndpointSet;
use crate::error::{ConnError, Result};
use crate::policy::DialPolicy;
use crate::session::SessionInfo;
use crate::tls::TlsSetup;
use crate::transport::Transport;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 获取 discharge 令牌的外部服务
#[async_trait]
pub trait Discharger: Send + Sync + fmt::Debug {
    async fn discharge(&self, challenge: &DischargeChallenge) -> anyhow::Result<Vec<DelegatedToken>>;
}

/// 使用默认设置打开连接
pub async fn open(
    endpoints: &EndpointSet,
    credential: &Credential,
    policy: DialPolicy,
) -> Result<LiveConnection> {
    Connector::new(policy).open(endpoints, credential).await
}

/// 可配置的连接器
#[derive(Debug, Clone)]
pub struct Connector {
    policy: DialPolicy,
    discharger: Option<Arc<dyn Discharger>>,
    max_discharge_rounds: u32,
    cancel: CancellationToken,
}

impl Connector {
    pub fn new(policy: DialPolicy) -> Self {
        Self {
            policy,
            discharger: None,
            max_discharge_rounds: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消令牌触发时，进行中的拨号立即停止
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 登录要求 discharge 时，最多自动获取 `max_rounds` 次
    pub fn with_discharger(mut self, discharger: Arc<dyn Discharger>, max_rounds: u32) -> Self {
        self.discharger = Some(discharger);
        self.max_discharge_rounds = max_rounds;
        self
    }

    pub fn policy(&self) -> &DialPolicy {
        &self.policy
    }

    pub async fn open(
        &self,
        endpoints: &EndpointSet,
        credential: &Credential,
    ) -> Result<LiveConnection> {
        endpoints.validate()?;
        credential.validate()?;
        self.policy.validate()?;

        let tls = TlsSetup::build(endpoints, self.policy.verify_server_cert)?;
        let targets = dialer::targets(endpoints, &tls)?;

        let transport = dialer::dial(&targets, &self.policy, &self.cancel).await?;

        let session = match self.login(transport.as_ref(), credential, endpoints).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    debug!("error closing transport after failed login: {}", close_err);
                }
                return Err(e);
            }
        };

        if session.authenticated {
            info!(
                "logged in to {} as {}",
                transport.remote_addr(),
                session
                    .auth_tag
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "<unknown>".to_string())
            );
        }

        Ok(LiveConnection::start(
            transport,
            tls.verified(),
            endpoints.model().copied(),
            session,
            &self.policy,
        ))
    }

    async fn login(
        &self,
        transport: &dyn Transport,
        credential: &Credential,
        endpoints: &EndpointSet,
    ) -> Result<SessionInfo> {
        let mut credential = credential.clone();
        let mut rounds = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ConnError::Cancelled),
                outcome = auth::authenticate(transport, &credential, endpoints.model()) => outcome?,
            };

            let challenge = match outcome {
                LoginOutcome::Session(session) => return Ok(session),
                LoginOutcome::DischargeRequired(challenge) => challenge,
            };

            let discharger = match &self.discharger {
                Some(d) if rounds < self.max_discharge_rounds => d,
                _ => return Err(ConnError::DischargeRequired(Box::new(challenge))),
            };
            rounds += 1;

            debug!(
                "acquiring discharge (round {}/{}): {}",
                rounds, self.max_discharge_rounds, challenge.message
            );
            let tokens = discharger.discharge(&challenge).await.map_err(|e| {
                warn!("discharge failed: {:#}", e);
                ConnError::DischargeFailed(format!("{e:#}"))
            })?;
            credential = credential.with_discharges(tokens)?;
        }
    }
}
