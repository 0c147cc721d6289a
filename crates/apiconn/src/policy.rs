//! Dial and liveness policy

use crate::clock::{Clock, TokioClock};
use crate::error::{ConnError, Result};
use crate::transport::{TransportDialer, WebSocketDialer};
use ctrlink_common::config::DialConfig;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STAGGER: Duration = Duration::from_millis(50);
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// 存活探测参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub interval: Duration,
    /// 单次探测的上限，独立于拨号总超时
    pub probe_timeout: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PING_INTERVAL,
            probe_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

/// 拨号策略
#[derive(Debug, Clone)]
pub struct DialPolicy {
    pub per_address_stagger: Duration,
    pub total_timeout: Duration,
    pub retry_delay: Duration,
    pub verify_server_cert: bool,
    pub liveness: LivenessPolicy,
    pub clock: Arc<dyn Clock>,
    pub dialer: Arc<dyn TransportDialer>,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            per_address_stagger: DEFAULT_STAGGER,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            verify_server_cert: true,
            liveness: LivenessPolicy::default(),
            clock: Arc::new(TokioClock),
            dialer: Arc::new(WebSocketDialer),
        }
    }
}

impl DialPolicy {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_dialer(mut self, dialer: Arc<dyn TransportDialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_liveness(mut self, liveness: LivenessPolicy) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_timeout.is_zero() {
            return Err(ConnError::invalid("dial timeout must be greater than zero"));
        }
        if self.liveness.interval.is_zero() {
            return Err(ConnError::invalid("ping interval must be greater than zero"));
        }
        if self.liveness.probe_timeout.is_zero() {
            return Err(ConnError::invalid("ping timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn from_config(config: &DialConfig) -> Self {
        Self {
            per_address_stagger: Duration::from_millis(config.dial_address_interval_ms),
            total_timeout: Duration::from_secs(config.timeout_secs),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            verify_server_cert: !config.insecure_skip_verify,
            liveness: LivenessPolicy {
                interval: Duration::from_secs(config.ping_interval_secs),
                probe_timeout: Duration::from_secs(config.ping_timeout_secs),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = DialPolicy::default();
        assert_eq!(policy.per_address_stagger, Duration::from_millis(50));
        assert_eq!(policy.total_timeout, Duration::from_secs(600));
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert!(policy.verify_server_cert);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let policy = DialPolicy {
            total_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_from_config() {
        let config = DialConfig {
            dial_address_interval_ms: 10,
            timeout_secs: 5,
            retry_delay_ms: 100,
            insecure_skip_verify: true,
            ping_interval_secs: 1,
            ping_timeout_secs: 1,
        };
        let policy = DialPolicy::from_config(&config);
        assert_eq!(policy.per_address_stagger, Duration::from_millis(10));
        assert_eq!(policy.total_timeout, Duration::from_secs(5));
        assert!(!policy.verify_server_cert);
        assert_eq!(policy.liveness.interval, Duration::from_secs(1));
    }
}
