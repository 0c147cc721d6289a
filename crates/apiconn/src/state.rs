//! Connection state machine
//!
//! `Connecting → Authenticated → (Healthy ⇄ Suspect) → Broken`. Broken is
//! terminal. Two consecutive failed probes or a closed transport break the
//! connection.

use std::fmt;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    Connecting,
    Authenticated,
    Healthy,
    Suspect,
    Broken,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Connecting => "connecting",
            ConnState::Authenticated => "authenticated",
            ConnState::Healthy => "healthy",
            ConnState::Suspect => "suspect",
            ConnState::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// 连续失败多少次进入 Broken
const STRIKES: u32 = 2;

/// 探测结果驱动的健康状态
#[derive(Debug, Clone)]
pub(crate) struct Health {
    state: ConnState,
    consecutive_failures: u32,
    last_ping: Option<Instant>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            state: ConnState::Connecting,
            consecutive_failures: 0,
            last_ping: None,
        }
    }
}

impl Health {
    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    pub(crate) fn mark_authenticated(&mut self) {
        if self.state == ConnState::Connecting {
            self.state = ConnState::Authenticated;
        }
    }

    pub(crate) fn on_probe_success(&mut self, now: Instant) {
        if self.state == ConnState::Broken {
            return;
        }
        self.consecutive_failures = 0;
        self.last_ping = Some(now);
        self.state = ConnState::Healthy;
    }

    /// 返回 true 表示本次失败使连接进入 Broken
    pub(crate) fn on_probe_failure(&mut self) -> bool {
        if self.state == ConnState::Broken {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= STRIKES {
            self.state = ConnState::Broken;
            true
        } else {
            self.state = ConnState::Suspect;
            false
        }
    }

    /// 传输关闭或显式关闭：直接进入 Broken，返回是否为首次进入
    pub(crate) fn on_broken(&mut self) -> bool {
        let first = self.state != ConnState::Broken;
        self.state = ConnState::Broken;
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_strikes() {
        let mut health = Health::default();
        health.mark_authenticated();
        assert_eq!(health.state(), ConnState::Authenticated);

        assert!(!health.on_probe_failure());
        assert_eq!(health.state(), ConnState::Suspect);
        assert!(health.on_probe_failure());
        assert_eq!(health.state(), ConnState::Broken);
        assert!(!health.on_probe_failure());
    }

    #[test]
    fn test_success_clears_suspicion() {
        let mut health = Health::default();
        health.mark_authenticated();
        assert!(!health.on_probe_failure());
        health.on_probe_success(Instant::now());
        assert_eq!(health.state(), ConnState::Healthy);
        assert!(health.last_ping().is_some());
        assert!(!health.on_probe_failure());
        assert_eq!(health.state(), ConnState::Suspect);
    }

    #[test]
    fn test_broken_is_terminal() {
        let mut health = Health::default();
        assert!(health.on_broken());
        assert!(!health.on_broken());
        health.on_probe_success(Instant::now());
        health.mark_authenticated();
        assert_eq!(health.state(), ConnState::Broken);
    }
}
