//! Raced dialing across the endpoint addresses
//!
//! A sweep launches the first address immediately and each following address
//! one stagger interval later, or immediately once an earlier attempt fails.
//! The first transport to come up wins; every other attempt is aborted and any
//! loser that already connected is closed before the winner is returned.
//! Sweeps repeat after the retry delay until the total timeout.

use crate::clock::Clock;
use crate::endpoint::EndpointSet;
use crate::error::{ConnError, DialFailure, DialFailures, Result};
use crate::policy::DialPolicy;
use crate::tls::TlsSetup;
use crate::transport::{DialTarget, Transport};
use ctrlink_common::NetworkError;
use ctrlink_common::metrics::{DIAL_ATTEMPTS, DIAL_DURATION};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Attempt = (usize, std::result::Result<Arc<dyn Transport>, NetworkError>);

enum Sweep {
    Connected(Arc<dyn Transport>),
    Exhausted,
    TimedOut,
    Cancelled,
}

/// 每个地址最近一次的结果
struct Attempts {
    last_error: Vec<Option<String>>,
    in_flight: Vec<bool>,
}

impl Attempts {
    fn new(n: usize) -> Self {
        Self {
            last_error: vec![None; n],
            in_flight: vec![false; n],
        }
    }

    fn into_failures(self, targets: &[DialTarget]) -> DialFailures {
        DialFailures(
            targets
                .iter()
                .zip(self.last_error)
                .filter_map(|(target, error)| {
                    error.map(|error| DialFailure {
                        address: target.address.clone(),
                        error,
                    })
                })
                .collect(),
        )
    }
}

/// 拨号目标，按地址顺序
pub(crate) fn targets(endpoints: &EndpointSet, tls: &TlsSetup) -> Result<Vec<DialTarget>> {
    endpoints
        .host_ports()?
        .into_iter()
        .map(|hp| {
            let address = hp.to_string();
            Ok(DialTarget {
                url: endpoints.url_for(&address),
                server_name: tls.server_name_for(&hp)?,
                tls: tls.config(),
                address,
            })
        })
        .collect()
}

/// 竞速拨号，直到成功、取消或总超时
pub(crate) async fn dial(
    targets: &[DialTarget],
    policy: &DialPolicy,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Transport>> {
    let clock = policy.clock.clone();
    let started = clock.now();
    let deadline = started + policy.total_timeout;
    let mut attempts = Attempts::new(targets.len());
    let elapsed = |clock: &dyn Clock| (clock.now() - started).as_secs_f64();

    loop {
        match sweep(targets, policy, deadline, cancel, &mut attempts).await {
            Sweep::Connected(transport) => {
                DIAL_DURATION
                    .with_label_values(&["success"])
                    .observe(elapsed(clock.as_ref()));
                info!("dialed controller at {}", transport.remote_addr());
                return Ok(transport);
            }
            Sweep::Cancelled => {
                DIAL_DURATION
                    .with_label_values(&["cancelled"])
                    .observe(elapsed(clock.as_ref()));
                return Err(ConnError::Cancelled);
            }
            Sweep::TimedOut => break,
            Sweep::Exhausted => {
                debug!(
                    "all {} addresses failed, retrying in {:?}",
                    targets.len(),
                    policy.retry_delay
                );
                let wake = (clock.now() + policy.retry_delay).min(deadline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        DIAL_DURATION
                            .with_label_values(&["cancelled"])
                            .observe(elapsed(clock.as_ref()));
                        return Err(ConnError::Cancelled);
                    }
                    _ = clock.sleep_until(wake) => {}
                }
                if clock.now() >= deadline {
                    break;
                }
            }
        }
    }

    DIAL_DURATION
        .with_label_values(&["timeout"])
        .observe(elapsed(clock.as_ref()));
    let failures = attempts.into_failures(targets);
    warn!(
        "unable to connect to controller within {:?}: {}",
        policy.total_timeout, failures
    );
    Err(ConnError::DialTimeout {
        timeout: policy.total_timeout,
        failures,
    })
}

async fn sweep(
    targets: &[DialTarget],
    policy: &DialPolicy,
    deadline: Instant,
    cancel: &CancellationToken,
    attempts: &mut Attempts,
) -> Sweep {
    let clock = policy.clock.as_ref();
    let mut running: JoinSet<Attempt> = JoinSet::new();
    let mut next = 0;
    let mut next_launch = clock.now();

    loop {
        if next < targets.len() && clock.now() >= next_launch {
            let target = targets[next].clone();
            let dialer = policy.dialer.clone();
            let index = next;
            debug!("dialing {}", target.url);
            attempts.in_flight[index] = true;
            running.spawn(async move { (index, dialer.dial(target).await) });
            next += 1;
            next_launch = clock.now() + policy.per_address_stagger;
            continue;
        }
        if next >= targets.len() && running.is_empty() {
            return Sweep::Exhausted;
        }

        let launch_timer: BoxFuture<'static, ()> = if next < targets.len() {
            clock.sleep_until(next_launch)
        } else {
            Box::pin(std::future::pending())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("dial cancelled");
                abort_losers(&mut running).await;
                return Sweep::Cancelled;
            }
            _ = clock.sleep_until(deadline) => {
                for (index, in_flight) in attempts.in_flight.iter().enumerate() {
                    if *in_flight {
                        attempts.last_error[index] = Some("no response before timeout".to_string());
                    }
                }
                abort_losers(&mut running).await;
                return Sweep::TimedOut;
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                let (index, result) = match joined {
                    Ok(attempt) => attempt,
                    Err(e) => {
                        warn!("dial attempt task failed: {}", e);
                        continue;
                    }
                };
                attempts.in_flight[index] = false;
                match result {
                    Ok(transport) => {
                        DIAL_ATTEMPTS.with_label_values(&["success"]).inc();
                        abort_losers(&mut running).await;
                        return Sweep::Connected(transport);
                    }
                    Err(e) => {
                        DIAL_ATTEMPTS.with_label_values(&["failure"]).inc();
                        debug!("dial {} failed: {}", targets[index].address, e);
                        attempts.last_error[index] = Some(e.to_string());
                        // 失败后立即尝试下一个地址
                        next_launch = clock.now();
                    }
                }
            }
            _ = launch_timer => {}
        }
    }
}

/// 中止所有仍在进行的尝试，关闭已经建立的落败连接
async fn abort_losers(running: &mut JoinSet<Attempt>) {
    running.abort_all();
    while let Some(joined) = running.join_next().await {
        if let Ok((_, Ok(transport))) = joined {
            debug!("closing losing connection to {}", transport.remote_addr());
            if let Err(e) = transport.close().await {
                debug!("error closing losing connection: {}", e);
            }
        }
    }
}
