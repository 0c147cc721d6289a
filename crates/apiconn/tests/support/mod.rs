//! Shared test doubles: a scripted dialer and an in-memory transport

#![allow(dead_code)]

use apiconn::{
    DialPolicy, DialTarget, LivenessPolicy, RpcError, RpcRequest, ServerError, Signal,
    SignalWatch, Transport, TransportDialer,
};
use async_trait::async_trait;
use ctrlink_common::NetworkError;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const UUID: &str = "deadbeef-0bad-400d-8000-4b1d0d06f00d";

/// 默认的登录成功响应
pub fn login_ok() -> Value {
    json!({
        "servers": [[{"value": "10.0.0.1", "port": 17070}]],
        "model-tag": format!("model-{UUID}"),
        "controller-tag": format!("controller-{UUID}"),
        "user-info": {
            "identity": "user-admin",
            "controller-access": "superuser",
            "model-access": "admin"
        },
        "facades": [
            {"name": "Client", "versions": [1, 2]},
            {"name": "X", "versions": [1, 2]},
            {"name": "Pinger", "versions": [1]}
        ],
        "server-version": "2.9.42"
    })
}

pub fn login_discharge(token: &str) -> Value {
    json!({
        "discharge-required": token,
        "discharge-required-error": "verification failed: need third party discharge"
    })
}

#[derive(Debug, Clone)]
pub enum LoginReply {
    Ok(Value),
    Reject(ServerError),
    /// 延迟一段时间后成功
    Delayed(Duration, Value),
    /// 一直等到传输关闭
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Ok,
    Fail,
    Hang,
}

/// 内存中的传输，记录每一次调用
#[derive(Debug)]
pub struct MockTransport {
    address: String,
    login: Mutex<VecDeque<LoginReply>>,
    ping: Mutex<PingMode>,
    closed: Signal,
    close_calls: AtomicUsize,
    calls: Mutex<Vec<RpcRequest>>,
}

impl MockTransport {
    pub fn new(address: impl Into<String>, login: Vec<LoginReply>, ping: PingMode) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            login: Mutex::new(login.into()),
            ping: Mutex::new(ping),
            closed: Signal::new(),
            close_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// 模拟服务端关闭连接
    pub fn server_close(&self) {
        self.closed.fire();
    }

    pub fn set_ping(&self, mode: PingMode) {
        *self.ping.lock().unwrap() = mode;
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RpcRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, facade: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.facade == facade)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: RpcRequest) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push(request.clone());
        if self.closed.is_fired() {
            return Err(RpcError::Closed);
        }

        match request.facade.as_str() {
            "Admin" => {
                let reply = self.login.lock().unwrap().pop_front();
                match reply {
                    Some(LoginReply::Ok(value)) => Ok(value),
                    Some(LoginReply::Reject(e)) => Err(e.into()),
                    Some(LoginReply::Delayed(delay, value)) => {
                        tokio::time::sleep(delay).await;
                        Ok(value)
                    }
                    Some(LoginReply::Hang) => {
                        self.closed.watch().fired().await;
                        Err(RpcError::Closed)
                    }
                    None => Ok(login_ok()),
                }
            }
            "Pinger" => {
                let mode = *self.ping.lock().unwrap();
                match mode {
                    PingMode::Ok => Ok(Value::Null),
                    PingMode::Fail => Err(ServerError::new("", "ping refused").into()),
                    PingMode::Hang => {
                        self.closed.watch().fired().await;
                        Err(RpcError::Closed)
                    }
                }
            }
            _ if request.method == "Fail" => {
                Err(ServerError::new("not found", "no such entity").into())
            }
            _ if request.method == "Garbled" => {
                let e = serde_json::from_str::<Value>("{\"truncated").unwrap_err();
                Err(RpcError::Codec(e))
            }
            _ => Ok(json!({
                "facade": request.facade,
                "version": request.version,
                "method": request.method,
                "id": request.id,
                "params": request.params,
            })),
        }
    }

    async fn close(&self) -> Result<(), NetworkError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.fire();
        Ok(())
    }

    fn closed(&self) -> SignalWatch {
        self.closed.watch()
    }

    fn remote_addr(&self) -> &str {
        &self.address
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Refuse,
    Hang,
    Succeed { delay: Duration },
}

/// 未完成就被丢弃时计数，用于观察被中止的拨号
struct AbortGuard {
    aborted: Arc<AtomicUsize>,
    armed: bool,
}

impl AbortGuard {
    fn new(aborted: Arc<AtomicUsize>) -> Self {
        Self {
            aborted,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// 按地址脚本化的拨号器
#[derive(Debug)]
pub struct MockDialer {
    behaviours: HashMap<String, Behaviour>,
    login: Vec<LoginReply>,
    ping: PingMode,
    attempts: Mutex<Vec<(String, Instant)>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    aborted: Arc<AtomicUsize>,
}

impl MockDialer {
    pub fn new<'a>(behaviours: impl IntoIterator<Item = (&'a str, Behaviour)>) -> Self {
        Self {
            behaviours: behaviours
                .into_iter()
                .map(|(a, b)| (a.to_string(), b))
                .collect(),
            login: Vec::new(),
            ping: PingMode::Ok,
            attempts: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
            aborted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 单个立即成功的地址
    pub fn reachable(address: &str) -> Self {
        Self::new([(address, Behaviour::Succeed { delay: Duration::ZERO })])
    }

    pub fn with_login(mut self, replies: Vec<LoginReply>) -> Self {
        self.login = replies;
        self
    }

    pub fn with_ping(mut self, mode: PingMode) -> Self {
        self.ping = mode;
        self
    }

    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn transport(&self) -> Arc<MockTransport> {
        self.transports()
            .into_iter()
            .next()
            .expect("no transport was dialed")
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportDialer for MockDialer {
    async fn dial(&self, target: DialTarget) -> Result<Arc<dyn Transport>, NetworkError> {
        self.attempts
            .lock()
            .unwrap()
            .push((target.address.clone(), Instant::now()));

        let behaviour = self
            .behaviours
            .get(&target.address)
            .copied()
            .unwrap_or(Behaviour::Refuse);

        match behaviour {
            Behaviour::Refuse => Err(NetworkError::connection_failed(
                &target.address,
                "connection refused",
            )),
            Behaviour::Hang => {
                let _guard = AbortGuard::new(self.aborted.clone());
                std::future::pending().await
            }
            Behaviour::Succeed { delay } => {
                let guard = AbortGuard::new(self.aborted.clone());
                tokio::time::sleep(delay).await;
                guard.disarm();

                let transport = MockTransport::new(target.address, self.login.clone(), self.ping);
                self.transports.lock().unwrap().push(transport.clone());
                Ok(transport)
            }
        }
    }
}

/// 测试用策略：10 秒总超时，2 秒重试间隔
pub fn policy(dialer: Arc<MockDialer>) -> DialPolicy {
    DialPolicy {
        total_timeout: Duration::from_secs(10),
        retry_delay: Duration::from_secs(2),
        liveness: LivenessPolicy {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(30),
        },
        ..Default::default()
    }
    .with_dialer(dialer)
}
