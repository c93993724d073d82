use crate::capture::CaptureError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::LocalAddrs;

/// Re-read the interface addresses every `period` and publish them to
/// `target`. Only returns when a lookup fails.
pub async fn run_address_refresher<F>(
    mut lookup: F,
    target: LocalAddrs,
    period: Duration,
) -> CaptureError
where
    F: FnMut() -> Result<Vec<IpAddr>, CaptureError>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let addrs = match lookup() {
            Ok(addrs) => addrs,
            Err(e) => return e,
        };
        if **target.load() != addrs {
            debug!(addrs = ?addrs, "Local addresses changed");
        }
        target.store(Arc::new(addrs));
    }
}
