//! Facade version table and handles
//!
//! A facade is a named, independently versioned group of remote methods. The
//! table is fixed at login; handles are cheap and hold only a weak reference
//! to their connection.

use crate::connection::Shared;
use crate::error::{ConnError, Result};
use crate::transport::{RpcError, RpcRequest};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Weak;

/// 协商出的 facade 版本表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacadeVersions(BTreeMap<String, BTreeSet<u32>>);

impl FacadeVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, version: u32) {
        self.0.entry(name.into()).or_default().insert(version);
    }

    /// 某个 facade 支持的全部版本（升序）
    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.0
            .get(name)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `[min, max]` 区间内的最高版本
    pub fn best(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        if min > max {
            return None;
        }
        self.0.get(name)?.range(min..=max).next_back().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, Vec<u32>> {
        self.0
            .iter()
            .map(|(name, versions)| (name.clone(), versions.iter().copied().collect()))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for FacadeVersions {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, version) in iter {
            table.insert(name, version);
        }
        table
    }
}

/// 绑定到某个连接、某个 facade 与某个版本的句柄
///
/// 不会延长连接的生命周期；连接断开或被释放后调用返回 `TransportBroken`。
#[derive(Debug, Clone)]
pub struct FacadeHandle {
    conn: Weak<Shared>,
    name: String,
    version: u32,
}

impl FacadeHandle {
    pub(crate) fn new(conn: Weak<Shared>, name: impl Into<String>, version: u32) -> Self {
        Self {
            conn,
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// 句柄仍然可用（连接存在且未断开）
    pub fn is_usable(&self) -> bool {
        self.conn
            .upgrade()
            .is_some_and(|shared| !shared.broken.is_fired())
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(None, method, params).await
    }

    /// 针对特定实体 id 的调用
    pub async fn call_on<P, R>(&self, id: &str, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.dispatch(Some(id), method, params).await
    }

    async fn dispatch<P, R>(&self, id: Option<&str>, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let shared = self
            .conn
            .upgrade()
            .ok_or_else(|| ConnError::broken("connection has been released"))?;
        if shared.broken.is_fired() {
            return Err(ConnError::broken(format!(
                "connection to {} is broken",
                shared.address
            )));
        }

        let params = serde_json::to_value(params)
            .map_err(|e| ConnError::protocol(format!("encode {}.{method}: {e}", self.name)))?;
        let mut request = RpcRequest::new(&self.name, self.version, method).with_params(params);
        if let Some(id) = id {
            request = request.with_id(id);
        }

        let value = match shared.transport.call(request).await {
            Ok(value) => value,
            Err(RpcError::Server(e)) => return Err(e.into()),
            Err(RpcError::Codec(e)) => {
                return Err(ConnError::protocol(format!(
                    "{}.{method} on {}: {e}",
                    self.name, shared.address
                )));
            }
            Err(e @ (RpcError::Closed | RpcError::Network(_))) => {
                return Err(ConnError::broken(format!(
                    "{}.{method} on {}: {e}",
                    self.name, shared.address
                )));
            }
        };

        serde_json::from_value(value)
            .map_err(|e| ConnError::protocol(format!("decode {}.{method}: {e}", self.name)))
    }
}
