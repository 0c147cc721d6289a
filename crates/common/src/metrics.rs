//! Prometheus 监控指标模块
//!
//! 提供控制器连接相关的全局指标收集和导出功能

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static METRICS_INIT: Once = Once::new();

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========== 拨号指标 ==========

    /// 单地址拨号尝试次数（按结果分组）
    pub static ref DIAL_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dial_attempts_total", "Total number of per-address dial attempts")
            .namespace("ctrlink"),
        &["outcome"]
    ).unwrap();

    /// 完整拨号耗时（秒，包含重试）
    pub static ref DIAL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("dial_duration_seconds", "Time spent dialing a controller")
            .namespace("ctrlink")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["outcome"]
    ).unwrap();

    // ========== 认证指标 ==========

    /// 登录握手结果
    pub static ref LOGINS: IntCounterVec = IntCounterVec::new(
        Opts::new("logins_total", "Total number of login handshakes")
            .namespace("ctrlink"),
        &["outcome"]
    ).unwrap();

    // ========== 存活指标 ==========

    /// 存活探测次数
    pub static ref LIVENESS_PROBES: IntCounterVec = IntCounterVec::new(
        Opts::new("liveness_probes_total", "Total number of liveness probes")
            .namespace("ctrlink"),
        &["outcome"]
    ).unwrap();

    /// 进入 Broken 状态的连接数
    pub static ref CONNECTIONS_BROKEN: IntCounterVec = IntCounterVec::new(
        Opts::new("connections_broken_total", "Total number of connections that became broken")
            .namespace("ctrlink"),
        &["reason"]
    ).unwrap();

    /// 当前存活的连接数
    pub static ref LIVE_CONNECTIONS: IntGauge = IntGauge::new(
        "ctrlink_live_connections",
        "Number of live controller connections"
    ).unwrap();
}

/// 注册所有指标到全局 Registry
///
/// This function is idempotent - calling it multiple times is safe.
/// Only the first call will actually register the metrics.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let mut result = Ok(());

    METRICS_INIT.call_once(|| {
        let register_result = (|| {
            REGISTRY.register(Box::new(DIAL_ATTEMPTS.clone()))?;
            REGISTRY.register(Box::new(DIAL_DURATION.clone()))?;
            REGISTRY.register(Box::new(LOGINS.clone()))?;
            REGISTRY.register(Box::new(LIVENESS_PROBES.clone()))?;
            REGISTRY.register(Box::new(CONNECTIONS_BROKEN.clone()))?;
            REGISTRY.register(Box::new(LIVE_CONNECTIONS.clone()))?;

            Ok::<(), prometheus::Error>(())
        })();

        if let Err(e) = register_result {
            result = Err(e);
        }
    });

    result
}

/// 导出 Prometheus 格式的指标
pub fn export_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
