//! Fire-once notifications
//!
//! A [`Signal`] is closed exactly once and can be observed by any number of
//! readers through [`SignalWatch`]. It never carries a value.

use tokio_util::sync::CancellationToken;

/// 一次性关闭信号（拥有方可以触发）
#[derive(Debug, Clone, Default)]
pub struct Signal(CancellationToken);

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发信号，重复调用无副作用
    pub fn fire(&self) {
        self.0.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// 只读视图
    pub fn watch(&self) -> SignalWatch {
        SignalWatch(self.0.clone())
    }
}

/// 只读的信号视图
#[derive(Debug, Clone)]
pub struct SignalWatch(CancellationToken);

impl SignalWatch {
    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// 等待信号触发；已触发时立即返回
    pub async fn fired(&self) {
        self.0.cancelled().await
    }
}
