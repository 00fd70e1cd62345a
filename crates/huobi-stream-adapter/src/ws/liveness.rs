/*
[INPUT]:  Ping/pong receipt times and the heartbeat interval
[OUTPUT]: Staleness verdicts for the heartbeat handler
[POS]:    WebSocket layer - liveness bookkeeping shared by receive and heartbeat loops
[UPDATE]: When changing the staleness threshold or clock source
*/

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Last time a ping or pong was seen on the current connection.
#[derive(Debug)]
pub struct Liveness {
    last_seen_ms: AtomicI64,
    threshold_ms: i64,
}

impl Liveness {
    /// Stale once nothing was seen for twice the heartbeat interval
    pub fn new(heartbeat_interval: Duration) -> Self {
        let threshold_ms = i64::try_from(heartbeat_interval.as_millis())
            .unwrap_or(i64::MAX / 2)
            .saturating_mul(2);
        Self {
            last_seen_ms: AtomicI64::new(now_millis()),
            threshold_ms,
        }
    }

    pub fn touch(&self, now_ms: i64) {
        self.last_seen_ms.store(now_ms, Ordering::Release);
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    /// Elapsed milliseconds when the gap reached the threshold
    pub fn stale_for(&self, now_ms: i64) -> Option<i64> {
        let elapsed = now_ms.saturating_sub(self.last_seen());
        (elapsed >= self.threshold_ms).then_some(elapsed)
    }
}
