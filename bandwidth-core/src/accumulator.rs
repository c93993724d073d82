//! Per-second delta accumulators.
//!
//! The packet loop adds into these without locking; the reporter drains them
//! once per second. Every drain reads and zeroes each field in one atomic
//! exchange so no increment falls between the read and the reset.

use crate::classify::{Direction, LanDelta, WanDeltas};
use dashmap::DashMap;
use pnet::util::MacAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Deltas drained from a [`WanAccumulator`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WanSnapshot {
    pub layer2_plus: u64,
    pub layer3_plus: u64,
    pub layer4_plus: u64,
    pub tx: u64,
    pub rx: u64,
    pub unknown: u64,
}

#[derive(Debug, Default)]
pub struct WanAccumulator {
    // Never reset: backs the per-job total gauge.
    layer2_total: AtomicU64,
    layer2_plus: AtomicU64,
    layer3_plus: AtomicU64,
    layer4_plus: AtomicU64,
    tx: AtomicU64,
    rx: AtomicU64,
    unknown: AtomicU64,
}

impl WanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, deltas: &WanDeltas) {
        if let Some(bytes) = deltas.layer2_plus {
            self.layer2_total.fetch_add(bytes, Ordering::Relaxed);
            self.layer2_plus.fetch_add(bytes, Ordering::Relaxed);
        }
        if let Some(bytes) = deltas.layer3_plus {
            self.layer3_plus.fetch_add(bytes, Ordering::Relaxed);
        }
        if let Some(bytes) = deltas.layer4_plus {
            self.layer4_plus.fetch_add(bytes, Ordering::Relaxed);
            let bucket = match deltas.direction {
                Some(Direction::Transmitted) => &self.tx,
                Some(Direction::Received) => &self.rx,
                _ => &self.unknown,
            };
            bucket.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Layer-2-plus bytes seen since this accumulator was created
    pub fn layer2_total(&self) -> u64 {
        self.layer2_total.load(Ordering::Relaxed)
    }

    pub fn drain(&self) -> WanSnapshot {
        WanSnapshot {
            layer2_plus: self.layer2_plus.swap(0, Ordering::AcqRel),
            layer3_plus: self.layer3_plus.swap(0, Ordering::AcqRel),
            layer4_plus: self.layer4_plus.swap(0, Ordering::AcqRel),
            tx: self.tx.swap(0, Ordering::AcqRel),
            rx: self.rx.swap(0, Ordering::AcqRel),
            unknown: self.unknown.swap(0, Ordering::AcqRel),
        }
    }
}

/// Deltas drained from a [`LanAccumulator`]. Device lists are sorted by
/// hardware address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanSnapshot {
    pub total: u64,
    pub tx: u64,
    pub rx: u64,
    pub device_tx: Vec<(MacAddr, u64)>,
    pub device_rx: Vec<(MacAddr, u64)>,
}

#[derive(Debug, Default)]
pub struct LanAccumulator {
    total: AtomicU64,
    tx: AtomicU64,
    rx: AtomicU64,
    device_tx: DashMap<MacAddr, u64>,
    device_rx: DashMap<MacAddr, u64>,
}

impl LanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, delta: &LanDelta) {
        let (total, per_device) = match delta.direction {
            Direction::Transmitted => (&self.tx, &self.device_tx),
            Direction::Received => (&self.rx, &self.device_rx),
            Direction::Unknown => return,
        };
        total.fetch_add(delta.layer4_plus, Ordering::Relaxed);
        *per_device.entry(delta.device).or_insert(0) += delta.layer4_plus;
        self.total.fetch_add(delta.layer4_plus, Ordering::Relaxed);
    }

    pub fn drain(&self) -> LanSnapshot {
        LanSnapshot {
            total: self.total.swap(0, Ordering::AcqRel),
            tx: self.tx.swap(0, Ordering::AcqRel),
            rx: self.rx.swap(0, Ordering::AcqRel),
            device_tx: drain_devices(&self.device_tx),
            device_rx: drain_devices(&self.device_rx),
        }
    }
}

// Removing entry by entry: an add racing the drain lands either in this
// snapshot or in a fresh entry for the next one.
fn drain_devices(map: &DashMap<MacAddr, u64>) -> Vec<(MacAddr, u64)> {
    let keys: Vec<MacAddr> = map.iter().map(|entry| *entry.key()).collect();
    let mut drained: Vec<(MacAddr, u64)> = keys
        .into_iter()
        .filter_map(|key| map.remove(&key))
        .filter(|(_, bytes)| *bytes > 0)
        .collect();
    drained.sort_by_key(|(mac, _)| crate::classify::mac_octets(*mac));
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const DEVICE_A: MacAddr = MacAddr(0xaa, 0, 0, 0, 0, 1);
    const DEVICE_B: MacAddr = MacAddr(0xaa, 0, 0, 0, 0, 2);

    fn wan(l2: u64, l3: u64, l4: u64, direction: Direction) -> WanDeltas {
        WanDeltas {
            layer2_plus: Some(l2),
            layer3_plus: Some(l3),
            layer4_plus: Some(l4),
            direction: Some(direction),
        }
    }

    #[test]
    fn test_wan_drain_resets_deltas_but_not_total() {
        let acc = WanAccumulator::new();
        acc.record(&wan(100, 80, 60, Direction::Transmitted));
        acc.record(&wan(50, 30, 10, Direction::Unknown));

        assert_eq!(
            acc.drain(),
            WanSnapshot {
                layer2_plus: 150,
                layer3_plus: 110,
                layer4_plus: 70,
                tx: 60,
                rx: 0,
                unknown: 10,
            }
        );
        assert_eq!(acc.drain(), WanSnapshot::default());
        assert_eq!(acc.layer2_total(), 150);
    }

    #[test]
    fn test_wan_partial_deltas() {
        let acc = WanAccumulator::new();
        acc.record(&WanDeltas {
            layer2_plus: Some(46),
            ..WanDeltas::default()
        });

        let snapshot = acc.drain();
        assert_eq!(snapshot.layer2_plus, 46);
        assert_eq!(snapshot.layer4_plus, 0);
        assert_eq!(snapshot.unknown, 0);
    }

    #[test]
    fn test_lan_drain_groups_by_device() {
        let acc = LanAccumulator::new();
        for (direction, device, bytes) in [
            (Direction::Transmitted, DEVICE_B, 10),
            (Direction::Transmitted, DEVICE_A, 20),
            (Direction::Transmitted, DEVICE_B, 5),
            (Direction::Received, DEVICE_A, 7),
        ] {
            acc.record(&LanDelta {
                direction,
                layer4_plus: bytes,
                device,
            });
        }

        let snapshot = acc.drain();
        assert_eq!(snapshot.total, 42);
        assert_eq!(snapshot.tx, 35);
        assert_eq!(snapshot.rx, 7);
        assert_eq!(snapshot.device_tx, vec![(DEVICE_A, 20), (DEVICE_B, 15)]);
        assert_eq!(snapshot.device_rx, vec![(DEVICE_A, 7)]);
        assert_eq!(acc.drain(), LanSnapshot::default());
    }

    #[test]
    fn test_concurrent_records_survive_drains() {
        let acc = Arc::new(WanAccumulator::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        acc.record(&wan(3, 2, 1, Direction::Received));
                    }
                })
            })
            .collect();

        let mut drained = WanSnapshot::default();
        while writers.iter().any(|w| !w.is_finished()) {
            let snapshot = acc.drain();
            drained.layer2_plus += snapshot.layer2_plus;
            drained.rx += snapshot.rx;
        }
        for writer in writers {
            writer.join().unwrap();
        }
        let rest = acc.drain();
        drained.layer2_plus += rest.layer2_plus;
        drained.rx += rest.rx;

        assert_eq!(drained.layer2_plus, 120_000);
        assert_eq!(drained.rx, 40_000);
    }
}
