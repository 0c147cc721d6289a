//! 拨号与存活检测配置

use serde::{Deserialize, Serialize};

/// 拨号策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialConfig {
    /// 相邻地址之间错开启动的间隔（毫秒）
    #[serde(default = "default_dial_address_interval_ms")]
    pub dial_address_interval_ms: u64,

    /// 连接控制器的总超时（秒），跨所有重试轮次
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 一轮全部失败后到下一轮之间的等待时间（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// 跳过服务端证书校验
    ///
    /// 仅用于测试或调试，不是受支持的生产路径。
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// 存活探测间隔（秒）
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// 单次存活探测的超时（秒）
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
}

fn default_dial_address_interval_ms() -> u64 {
    50
}

fn default_timeout_secs() -> u64 {
    600 // 10 分钟
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_ping_interval_secs() -> u64 {
    60
}

fn default_ping_timeout_secs() -> u64 {
    30
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            dial_address_interval_ms: default_dial_address_interval_ms(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            insecure_skip_verify: false,
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
        }
    }
}

impl DialConfig {
    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        if self.timeout_secs == 0 {
            errors.push("dial.timeout_secs must be greater than 0".to_string());
        }
        if self.ping_interval_secs == 0 {
            errors.push("dial.ping_interval_secs must be greater than 0".to_string());
        }
        if self.ping_timeout_secs == 0 {
            errors.push("dial.ping_timeout_secs must be greater than 0".to_string());
        }
        if self.retry_delay_ms > self.timeout_secs.saturating_mul(1000) {
            errors.push(
                "Warning: dial.retry_delay_ms exceeds dial.timeout_secs, only one sweep will run"
                    .to_string(),
            );
        }
        if self.insecure_skip_verify {
            errors.push(
                "Warning: dial.insecure_skip_verify disables certificate verification; use for testing only"
                    .to_string(),
            );
        }
    }
}
