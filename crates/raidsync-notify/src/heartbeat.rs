use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::watch,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::hub::Hub;

/// Periodic liveness prober.
///
/// Each tick pushes a `heartbeat` event to every live connection and reaps the
/// ones that fail. Ticks run one at a time on a single task; a tick that would
/// overlap an admission sweep is skipped, and ticks missed while a slow pass
/// was running are dropped rather than bunched up.
pub struct HeartbeatMonitor {
    hub: Weak<Hub>,
    period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(hub: &Arc<Hub>, period: Duration) -> Self {
        Self {
            hub: Arc::downgrade(hub),
            period,
        }
    }

    /// Main loop. Ticks every `period` until `shutdown` broadcasts `true` or
    /// the hub is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = self.period.as_secs(), "heartbeat monitor started");

        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(hub) = self.hub.upgrade() else {
                        break;
                    };
                    match hub.heartbeat().await {
                        Some(report) => debug!(
                            probed = report.probed,
                            reaped = report.reaped,
                            "heartbeat tick"
                        ),
                        None => debug!("heartbeat tick skipped"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("heartbeat monitor shutting down");
    }
}
