//! Background liveness loop
//!
//! One loop per connection. It waits for the interval, the transport closing,
//! or the stop token, and always releases the transport on exit.

use crate::connection::{BrokenReason, Shared};
use std::sync::Arc;
use tracing::debug;

pub(crate) async fn run(shared: Arc<Shared>) {
    let closed = shared.transport.closed();

    loop {
        tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            _ = closed.fired() => {
                shared.mark_broken(BrokenReason::TransportClosed);
                break;
            }
            _ = shared.clock.sleep(shared.liveness.interval) => {}
        }

        // 关闭时不等待进行中的探测超时
        let result = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            result = shared.probe() => result,
        };
        if let Err(e) = result {
            debug!("liveness probe: {}", e);
        }
        if shared.broken.is_fired() {
            break;
        }
    }

    shared.release().await;
    debug!("liveness loop for {} stopped", shared.address);
}
