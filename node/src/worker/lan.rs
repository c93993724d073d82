use crate::capture::{CaptureError, PacketSource};
use crate::metrics::LanMetrics;
use bandwidth_core::accumulator::LanAccumulator;
use bandwidth_core::bucket::current_month;
use bandwidth_core::classify::classify_lan;
use bandwidth_core::error::MetricError;
use pnet::util::MacAddr;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{LocalAddrs, REPORT_INTERVAL};

/// Classify packets from `source` into `acc` until the source fails.
/// `local_addrs` is re-read for every packet.
pub fn capture_lan<S: PacketSource + ?Sized>(
    source: &mut S,
    own_mac: MacAddr,
    local_addrs: &LocalAddrs,
    acc: &LanAccumulator,
) -> CaptureError {
    loop {
        let packet = match source.next_packet() {
            Ok(packet) => packet,
            Err(e) => return e,
        };
        let addrs = local_addrs.load();
        if let Some(delta) = classify_lan(&packet, own_mac, &addrs) {
            acc.record(&delta);
        }
    }
}

pub fn report_lan(
    acc: &LanAccumulator,
    metrics: &LanMetrics,
    bucket: &str,
) -> Result<(), MetricError> {
    let snapshot = acc.drain();
    metrics.total.add(bucket, snapshot.total as f64)?;
    metrics.tx.add(bucket, snapshot.tx as f64)?;
    metrics.rx.add(bucket, snapshot.rx as f64)?;

    for (device, bytes) in &snapshot.device_tx {
        metrics
            .device_tx
            .with_label_values(&[device.to_string()])?
            .add(bucket, *bytes as f64)?;
    }
    for (device, bytes) in &snapshot.device_rx {
        metrics
            .device_rx
            .with_label_values(&[device.to_string()])?
            .add(bucket, *bytes as f64)?;
    }
    Ok(())
}

pub async fn run_lan_reporter(acc: Arc<LanAccumulator>, metrics: LanMetrics) -> MetricError {
    let mut ticker = interval_at(Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = report_lan(&acc, &metrics, &current_month()) {
            return e;
        }
    }
}
