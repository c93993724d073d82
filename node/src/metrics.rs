//! Metric set exported by the recorder.

use bandwidth_core::error::{MetricError, StorageError};
use bandwidth_core::persist::{Counter, CounterSpec, StorageBuilder};
use chrono::{DateTime, Local, SecondsFormat};
use prometheus::{Gauge, GaugeVec, Opts, Registry};

/// Label of the total gauge identifying this recorder run
pub const JOB_START_LABEL: &str = "job_start_time";

/// Persisted WAN counters and the per-run total gauge
#[derive(Clone)]
pub struct WanMetrics {
    pub l2_total: Counter,
    pub l3_total: Counter,
    pub l4_total: Counter,
    pub l4_tx: Counter,
    pub l4_rx: Counter,
    pub l4_unknown: Counter,
    /// `wan_total_bytes` bound to this run's start time
    pub total_gauge: Gauge,
}

/// Persisted LAN counters
#[derive(Clone)]
pub struct LanMetrics {
    pub total: Counter,
    pub tx: Counter,
    pub rx: Counter,
    pub device_rx: Counter,
    pub device_tx: Counter,
}

pub struct RecorderMetrics {
    pub registry: Registry,
    pub wan: WanMetrics,
    pub lan: Option<LanMetrics>,
}

impl RecorderMetrics {
    /// Declare every counter on `builder` and register it, together with the
    /// total gauge, in a fresh registry. LAN counters are only declared when
    /// `lan_enabled` is set.
    pub fn register(
        builder: &mut StorageBuilder,
        lan_enabled: bool,
        job_start: DateTime<Local>,
    ) -> Result<Self, StorageError> {
        let registry = Registry::new();

        let total_vec = GaugeVec::new(
            Opts::new(
                "wan_total_bytes",
                "Total number of bytes sent and received from the Internet as recorded by this recorder job instance",
            ),
            &[JOB_START_LABEL],
        )
        .map_err(MetricError::from)?;
        registry
            .register(Box::new(total_vec.clone()))
            .map_err(MetricError::from)?;
        let total_gauge = total_vec
            .get_metric_with_label_values(&[&job_start.to_rfc3339_opts(SecondsFormat::Secs, true)])
            .map_err(MetricError::from)?;

        let mut counter = |name: &str, help: &str, labels: &[&str]| -> Result<Counter, StorageError> {
            let mut spec = CounterSpec::new(name, help);
            if !labels.is_empty() {
                spec = spec.variable_labels(labels);
            }
            let counter = builder.register_counter(spec)?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(MetricError::from)?;
            Ok(counter)
        };

        let wan = WanMetrics {
            l2_total: counter(
                "l2_total_bytes",
                "Total number of bytes sent and received from the Internet on Layer 2",
                &[],
            )?,
            l3_total: counter(
                "l3_total_bytes",
                "Total number of bytes sent and received from the Internet on Layer 3",
                &[],
            )?,
            l4_total: counter(
                "l4_total_bytes",
                "Total number of bytes sent and received from the Internet on Layer 4",
                &[],
            )?,
            l4_tx: counter(
                "l4_tx_bytes",
                "Number of bytes sent to the Internet on Layer 4",
                &[],
            )?,
            l4_rx: counter(
                "l4_rx_bytes",
                "Number of bytes received from the Internet on Layer 4",
                &[],
            )?,
            l4_unknown: counter(
                "l4_unknown_bytes",
                "Number of bytes transmitted on the Internet interface which cannot be classified under Tx or Rx",
                &[],
            )?,
            total_gauge,
        };

        let lan = if lan_enabled {
            Some(LanMetrics {
                total: counter(
                    "lan_l4_total_bytes",
                    "Number of bytes sent/received on the LAN interface",
                    &[],
                )?,
                tx: counter(
                    "lan_l4_tx_bytes",
                    "Number of bytes sent to the LAN interface",
                    &[],
                )?,
                rx: counter(
                    "lan_l4_rx_bytes",
                    "Number of bytes received from the LAN interface",
                    &[],
                )?,
                device_rx: counter(
                    "lan_l4_device_rx_bytes",
                    "Number of bytes received from a specific device on the LAN interface",
                    &["mac_address"],
                )?,
                device_tx: counter(
                    "lan_l4_device_tx_bytes",
                    "Number of bytes sent to a specific device on the LAN interface",
                    &["mac_address"],
                )?,
            })
        } else {
            None
        };

        Ok(Self { registry, wan, lan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandwidth_core::persist::StorageOptions;

    fn builder() -> StorageBuilder {
        StorageBuilder::new(StorageOptions::default()).unwrap()
    }

    #[test]
    fn test_wan_only_metric_set() {
        let mut builder = builder();
        let metrics = RecorderMetrics::register(&mut builder, false, Local::now()).unwrap();

        assert!(metrics.lan.is_none());
        assert_eq!(builder.counters().len(), 6);
        assert_eq!(metrics.wan.l4_tx.metric_id(), "::::l4_tx_bytes");
    }

    #[test]
    fn test_lan_metric_set() {
        let mut builder = builder();
        let metrics = RecorderMetrics::register(&mut builder, true, Local::now()).unwrap();

        let lan = metrics.lan.unwrap();
        assert_eq!(builder.counters().len(), 11);
        assert_eq!(lan.device_rx.variable_labels(), &["mac_address".to_string()]);
        assert!(lan.total.variable_labels().is_empty());
    }

    #[test]
    fn test_total_gauge_is_labelled_with_start_time() {
        let mut builder = builder();
        let metrics = RecorderMetrics::register(&mut builder, false, Local::now()).unwrap();
        metrics.wan.total_gauge.set(10.0);

        let families = metrics.registry.gather();
        let total = families
            .iter()
            .find(|family| family.get_name() == "wan_total_bytes")
            .unwrap();
        let label = &total.get_metric()[0].get_label()[0];
        assert_eq!(label.get_name(), JOB_START_LABEL);
        assert!(!label.get_value().is_empty());
    }
}
