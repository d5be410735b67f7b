//! Periodic liveness sweep over the registry.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::connection::CloseReason;
use crate::metrics::WS_HEARTBEAT_EVICTIONS_TOTAL;
use crate::registry::Registry;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The loop was cancelled externally.
    Cancelled,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections in the snapshot.
    pub checked: usize,
    /// Connections closed for silence.
    pub evicted: usize,
    /// Live connections pinged.
    pub pinged: usize,
}

/// Closes connections that have been silent longer than `timeout`.
///
/// Eviction goes through [`Connection::close_with`](crate::connection::Connection::close_with),
/// so racing a backend that is closing the same connection is harmless.
pub struct HeartbeatMonitor {
    registry: Arc<Registry>,
    timeout: Duration,
    period: Duration,
    ping_on_sweep: bool,
}

impl HeartbeatMonitor {
    /// Sweep every `period`, evicting after `timeout` of silence.
    pub fn new(registry: Arc<Registry>, timeout: Duration, period: Duration) -> Self {
        Self {
            registry,
            timeout,
            period: period.max(Duration::from_millis(1)),
            ping_on_sweep: false,
        }
    }

    /// Also ping every surviving connection on each sweep.
    #[must_use]
    pub fn with_ping_on_sweep(mut self, enabled: bool) -> Self {
        self.ping_on_sweep = enabled;
        self
    }

    /// One pass over a registry snapshot.
    pub fn sweep(&self) -> SweepReport {
        let snapshot = self.registry.snapshot();
        let mut report = SweepReport {
            checked: snapshot.len(),
            ..SweepReport::default()
        };
        for conn in &snapshot {
            if !conn.is_alive(self.timeout) {
                if conn.close_with(CloseReason::Evicted) {
                    report.evicted += 1;
                    counter!(WS_HEARTBEAT_EVICTIONS_TOTAL).increment(1);
                    info!(conn_id = %conn.id(), idle = ?conn.idle(), "evicting silent connection");
                }
            } else if self.ping_on_sweep && conn.ping().is_ok() {
                report.pinged += 1;
            }
        }
        if report.evicted > 0 {
            debug!(?report, "heartbeat sweep");
        }
        report
    }

    /// Sweep every period until `cancel` fires.
    #[instrument(skip_all, fields(timeout = ?self.timeout, period = ?self.period))]
    pub async fn run(self, cancel: CancellationToken) -> HeartbeatResult {
        let mut ticker = time::interval_at(time::Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => {
                    debug!("heartbeat monitor stopped");
                    return HeartbeatResult::Cancelled;
                }
            }
        }
    }
}
