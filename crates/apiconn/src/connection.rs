//! Live connection and its supervisor
//!
//! All state transitions go through the [`Health`] mutex in [`Shared`]; the
//! broken signal is fired only by the caller that first moved the machine to
//! Broken. The transport is released exactly once no matter how many callers
//! race on [`LiveConnection::close`].

use crate::auth::{self, LoginOutcome};
use crate::clock::{self, Clock};
use crate::credential::Credential;
use crate::endpoint::HostPort;
use crate::error::{ConnError, Result};
use crate::facade::FacadeHandle;
use crate::liveness;
use crate::policy::{DialPolicy, LivenessPolicy};
use crate::session::{Access, SessionInfo};
use crate::signal::{Signal, SignalWatch};
use crate::state::{ConnState, Health};
use crate::tag::{ControllerTag, ModelTag, Tag};
use crate::transport::{RpcError, RpcRequest, Transport};
use crate::version::Version;
use ctrlink_common::metrics::{CONNECTIONS_BROKEN, LIVE_CONNECTIONS, LIVENESS_PROBES};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PINGER_FACADE: &str = "Pinger";
pub const PINGER_VERSION: u32 = 1;
pub const PING_METHOD: &str = "Ping";

/// 进入 Broken 的原因（用作指标标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BrokenReason {
    Closed,
    Dropped,
    TransportClosed,
    PingFailed,
}

impl BrokenReason {
    fn as_str(self) -> &'static str {
        match self {
            BrokenReason::Closed => "closed",
            BrokenReason::Dropped => "dropped",
            BrokenReason::TransportClosed => "transport_closed",
            BrokenReason::PingFailed => "ping_failed",
        }
    }
}

/// 连接与监督任务共享的状态
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) address: String,
    tls_verified: bool,
    model: Option<ModelTag>,
    session: RwLock<Arc<SessionInfo>>,
    health: Mutex<Health>,
    pub(crate) broken: Signal,
    pub(crate) stop: CancellationToken,
    probing: tokio::sync::Mutex<()>,
    logging_in: tokio::sync::Mutex<()>,
    released: OnceCell<()>,
    pub(crate) liveness: LivenessPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Shared {
    fn health(&self) -> MutexGuard<'_, Health> {
        self.health.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> Arc<SessionInfo> {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session(&self, session: SessionInfo) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(session);
    }

    /// 直接进入 Broken；只有首次进入时触发信号
    pub(crate) fn mark_broken(&self, reason: BrokenReason) {
        let first = self.health().on_broken();
        if first {
            self.fire_broken(reason);
        }
    }

    fn fire_broken(&self, reason: BrokenReason) {
        self.broken.fire();
        CONNECTIONS_BROKEN
            .with_label_values(&[reason.as_str()])
            .inc();
        match reason {
            BrokenReason::Closed | BrokenReason::Dropped => {
                debug!("connection to {} closed ({})", self.address, reason.as_str())
            }
            _ => warn!(
                "connection to {} is broken ({})",
                self.address,
                reason.as_str()
            ),
        }
    }

    fn probe_failed(&self, error: String) -> ConnError {
        LIVENESS_PROBES.with_label_values(&["failure"]).inc();
        let broke = self.health().on_probe_failure();
        if broke {
            self.fire_broken(BrokenReason::PingFailed);
        } else {
            debug!("ping to {} failed, connection suspect: {}", self.address, error);
        }
        ConnError::broken(error)
    }

    /// 执行一次存活探测并更新状态机
    ///
    /// 同一连接上的探测串行执行。
    pub(crate) async fn probe(&self) -> Result<()> {
        let _guard = self.probing.lock().await;

        if self.broken.is_fired() {
            return Err(ConnError::broken(format!(
                "connection to {} is broken",
                self.address
            )));
        }
        if self.transport.closed().is_fired() {
            self.mark_broken(BrokenReason::TransportClosed);
            return Err(ConnError::broken(format!(
                "transport to {} closed",
                self.address
            )));
        }

        let request = RpcRequest::new(PINGER_FACADE, PINGER_VERSION, PING_METHOD);
        let outcome = clock::within(
            self.clock.as_ref(),
            self.liveness.probe_timeout,
            self.transport.call(request),
        )
        .await;

        match outcome {
            Some(Ok(_)) => {
                LIVENESS_PROBES.with_label_values(&["success"]).inc();
                self.health().on_probe_success(self.clock.now());
                Ok(())
            }
            Some(Err(RpcError::Closed)) => {
                LIVENESS_PROBES.with_label_values(&["failure"]).inc();
                self.mark_broken(BrokenReason::TransportClosed);
                Err(ConnError::broken(format!(
                    "transport to {} closed",
                    self.address
                )))
            }
            Some(Err(e)) => Err(self.probe_failed(format!("ping to {} failed: {e}", self.address))),
            None => Err(self.probe_failed(format!(
                "ping to {} timed out after {:?}",
                self.address, self.liveness.probe_timeout
            ))),
        }
    }

    /// 停止监督并关闭传输，只执行一次
    pub(crate) async fn release(&self) {
        self.released
            .get_or_init(|| async {
                self.stop.cancel();
                if let Err(e) = self.transport.close().await {
                    warn!("error closing transport to {}: {}", self.address, e);
                }
                LIVE_CONNECTIONS.dec();
                debug!("released transport to {}", self.address);
            })
            .await;
    }
}

/// 已认证并受监督的控制器连接
///
/// 独占底层传输。丢弃时停止监督任务并释放传输。
#[derive(Debug)]
pub struct LiveConnection {
    shared: Arc<Shared>,
}

impl LiveConnection {
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        tls_verified: bool,
        model: Option<ModelTag>,
        session: SessionInfo,
        policy: &DialPolicy,
    ) -> Self {
        let mut health = Health::default();
        health.mark_authenticated();

        let address = transport.remote_addr().to_string();
        let shared = Arc::new(Shared {
            transport,
            address,
            tls_verified,
            model,
            session: RwLock::new(Arc::new(session)),
            health: Mutex::new(health),
            broken: Signal::new(),
            stop: CancellationToken::new(),
            probing: tokio::sync::Mutex::new(()),
            logging_in: tokio::sync::Mutex::new(()),
            released: OnceCell::new(),
            liveness: policy.liveness,
            clock: policy.clock.clone(),
        });

        LIVE_CONNECTIONS.inc();
        tokio::spawn(liveness::run(shared.clone()));
        info!(
            "connected to controller at {}{}",
            shared.address,
            if shared.tls_verified {
                ""
            } else {
                " (certificate not verified)"
            }
        );

        Self { shared }
    }

    /// 连接断开时触发的一次性信号
    pub fn broken(&self) -> SignalWatch {
        self.shared.broken.watch()
    }

    /// 已断开时立即返回 true；否则执行一次探测
    pub async fn is_broken(&self) -> bool {
        if self.shared.broken.is_fired() {
            return true;
        }
        self.shared.probe().await.is_err()
    }

    /// 显式探测
    pub async fn ping(&self) -> Result<()> {
        self.shared.probe().await
    }

    /// 选择 `min` 及以上的最高版本
    pub fn facade(&self, name: &str, min: u32) -> Result<FacadeHandle> {
        self.facade_range(name, min, u32::MAX)
    }

    /// 选择 `[min, max]` 区间内的最高版本
    pub fn facade_range(&self, name: &str, min: u32, max: u32) -> Result<FacadeHandle> {
        if self.shared.broken.is_fired() {
            return Err(ConnError::broken(format!(
                "connection to {} is broken",
                self.shared.address
            )));
        }
        let session = self.shared.session();
        match session.facades.best(name, min, max) {
            Some(version) => Ok(FacadeHandle::new(
                Arc::downgrade(&self.shared),
                name,
                version,
            )),
            None => Err(ConnError::CapabilityUnavailable {
                facade: name.to_string(),
                min,
                max,
                available: session.facades.versions(name),
            }),
        }
    }

    /// 关闭连接，可并发重复调用
    pub async fn close(&self) -> Result<()> {
        self.shared.mark_broken(BrokenReason::Closed);
        self.shared.release().await;
        Ok(())
    }

    /// 在以 `Skip` 方式打开的连接上登录
    ///
    /// 并发登录串行执行，只有第一个会发出握手。
    pub async fn login(&self, credential: &Credential) -> Result<()> {
        let _guard = self.shared.logging_in.lock().await;

        if self.shared.broken.is_fired() {
            return Err(ConnError::broken(format!(
                "connection to {} is broken",
                self.shared.address
            )));
        }
        if self.shared.session().authenticated {
            return Err(ConnError::invalid("connection is already logged in"));
        }
        if credential.is_skip() {
            return Ok(());
        }

        let outcome = auth::authenticate(
            self.shared.transport.as_ref(),
            credential,
            self.shared.model.as_ref(),
        )
        .await?;
        match outcome {
            LoginOutcome::Session(session) => {
                self.shared.set_session(session);
                self.shared.health().mark_authenticated();
                Ok(())
            }
            LoginOutcome::DischargeRequired(challenge) => {
                Err(ConnError::DischargeRequired(Box::new(challenge)))
            }
        }
    }

    pub fn server_version(&self) -> Option<Version> {
        self.shared.session().server_version.clone()
    }

    pub fn addr(&self) -> &str {
        &self.shared.address
    }

    pub fn api_host_ports(&self) -> Vec<Vec<HostPort>> {
        self.shared.session().api_host_ports.clone()
    }

    pub fn auth_tag(&self) -> Option<Tag> {
        self.shared.session().auth_tag.clone()
    }

    /// 会话报告的模型，未报告时回退到请求的模型
    pub fn model_tag(&self) -> Option<ModelTag> {
        self.shared.session().model_tag.or(self.shared.model)
    }

    pub fn controller_tag(&self) -> Option<ControllerTag> {
        self.shared.session().controller_tag
    }

    pub fn model_access(&self) -> Access {
        self.shared.session().model_access
    }

    pub fn controller_access(&self) -> Access {
        self.shared.session().controller_access
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.session().authenticated
    }

    pub fn all_facade_versions(&self) -> BTreeMap<String, Vec<u32>> {
        self.shared.session().facades.to_map()
    }

    pub fn cookie_url(&self) -> String {
        format!("https://{}/", self.shared.address)
    }

    pub fn state(&self) -> ConnState {
        self.shared.health().state()
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.shared.health().last_ping()
    }

    /// 服务端证书链是否经过校验
    pub fn tls_verified(&self) -> bool {
        self.shared.tls_verified
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.shared.mark_broken(BrokenReason::Dropped);
        self.shared.stop.cancel();
    }
}
