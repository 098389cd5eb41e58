use crate::domain::DeviceRegistryCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default refresh period for the device registry (30 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Background task that keeps the device registry fresh.
///
/// The startup refresh happens before the bus subscriber starts, so the
/// first tick here fires one full interval after `run` is called.
pub struct DeviceRegistryRefresher {
    cache: Arc<DeviceRegistryCache>,
    refresh_interval: Duration,
}

impl DeviceRegistryRefresher {
    pub fn new(cache: Arc<DeviceRegistryCache>, refresh_interval: Duration) -> Self {
        Self {
            cache,
            refresh_interval,
        }
    }

    /// Runs until cancelled. Refresh failures are logged by the cache and
    /// never stop the loop.
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            "starting scheduled device registry refresh"
        );

        let mut ticker = interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        // a slow refresh pushes the schedule back instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("device registry refresher cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = self.cache.refresh().await;
                }
            }
        }

        info!("device registry refresher stopped");
        Ok(())
    }
}
