//! Time source used for every dial and liveness schedule

use futures_util::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// 可注入的时钟
///
/// 所有的错开启动、重试、超时与探测间隔都通过它计时。
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleep_until(self.now() + duration)
    }
}

/// 基于 tokio 计时器的时钟
///
/// 在 `tokio::time::pause()` 下运行时完全确定。
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep_until(deadline))
    }
}

/// 在时钟控制下限时执行 future，超时返回 `None`
pub(crate) async fn within<F>(clock: &dyn Clock, limit: Duration, fut: F) -> Option<F::Output>
where
    F: std::future::Future,
{
    let expired = clock.sleep(limit);
    tokio::select! {
        biased;
        out = fut => Some(out),
        _ = expired => None,
    }
}
