use crate::capture::{CaptureError, PacketSource};
use crate::metrics::WanMetrics;
use bandwidth_core::accumulator::WanAccumulator;
use bandwidth_core::bucket::current_month;
use bandwidth_core::classify::classify_wan;
use bandwidth_core::error::MetricError;
use pnet::util::MacAddr;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::REPORT_INTERVAL;

/// Classify packets from `source` into `acc` until the source fails
pub fn capture_wan<S: PacketSource + ?Sized>(
    source: &mut S,
    own_mac: MacAddr,
    acc: &WanAccumulator,
) -> CaptureError {
    loop {
        match source.next_packet() {
            Ok(packet) => acc.record(&classify_wan(&packet, own_mac)),
            Err(e) => return e,
        }
    }
}

/// Move one second's worth of deltas into the persisted counters
pub fn report_wan(
    acc: &WanAccumulator,
    metrics: &WanMetrics,
    bucket: &str,
) -> Result<(), MetricError> {
    metrics.total_gauge.set(acc.layer2_total() as f64);

    let snapshot = acc.drain();
    metrics.l2_total.add(bucket, snapshot.layer2_plus as f64)?;
    metrics.l3_total.add(bucket, snapshot.layer3_plus as f64)?;
    metrics.l4_total.add(bucket, snapshot.layer4_plus as f64)?;
    metrics.l4_tx.add(bucket, snapshot.tx as f64)?;
    metrics.l4_rx.add(bucket, snapshot.rx as f64)?;
    metrics.l4_unknown.add(bucket, snapshot.unknown as f64)?;
    Ok(())
}

/// Report once per second. Only returns on a counter error.
pub async fn run_wan_reporter(acc: Arc<WanAccumulator>, metrics: WanMetrics) -> MetricError {
    let mut ticker = interval_at(Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = report_wan(&acc, &metrics, &current_month()) {
            return e;
        }
    }
}
