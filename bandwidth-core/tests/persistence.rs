use bandwidth_core::persist::{
    CounterSpec, MetricStore, MetricValue, SledStore, StorageBuilder, StorageOptions,
};
use bandwidth_core::StorageResult;
use prometheus::core::Collector;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;

fn options() -> StorageOptions {
    StorageOptions::default().autosave(false, Duration::ZERO)
}

fn device_spec(name: &str) -> CounterSpec {
    CounterSpec::new(name, "bytes per device").variable_labels(&["mac_address"])
}

#[tokio::test]
async fn test_retention_keeps_latest_buckets() -> StorageResult<()> {
    let temp_dir = tempdir().unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut builder = StorageBuilder::new(options().keep_records(2))?;
    let counter = builder.register_counter(device_spec("lan_l4_device_rx_bytes"))?;
    let storage = builder
        .initialize(temp_dir.path().join("metrics.db"), rx)
        .await?;

    counter.with_label_values(&["aa"])?.add("2024-01", 100.0)?;
    counter.with_label_values(&["aa"])?.add("2024-02", 50.0)?;
    counter.with_label_values(&["bb"])?.add("2024-03", 30.0)?;
    assert_eq!(storage.flush_all(), 0);

    assert_eq!(
        storage.read_metric("::::lan_l4_device_rx_bytes")?,
        vec![
            MetricValue::new("2024-02", vec!["aa".to_string()], 50.0),
            MetricValue::new("2024-03", vec!["bb".to_string()], 30.0),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_state_survives_restart() -> StorageResult<()> {
    let temp_dir = tempdir().unwrap();
    let store: Arc<dyn MetricStore> = Arc::new(SledStore::open(temp_dir.path().join("metrics.db"))?);

    {
        let (_tx, rx) = watch::channel(false);
        let mut builder = StorageBuilder::new(options())?;
        let total = builder.register_counter(CounterSpec::new("l4_total_bytes", "total"))?;
        let device = builder.register_counter(device_spec("lan_l4_device_tx_bytes"))?;
        let storage = builder.initialize_with_store(Arc::clone(&store), rx).await?;

        total.add("2024-05", 1000.0)?;
        device.with_label_values(&["aa:bb:cc:dd:ee:01"])?.add("2024-05", 10.0)?;
        device.with_label_values(&["aa:bb:cc:dd:ee:02"])?.add("2024-05", 20.0)?;
        assert_eq!(storage.flush_all(), 0);
    }

    let (_tx, rx) = watch::channel(false);
    let mut builder = StorageBuilder::new(options())?;
    let total = builder.register_counter(CounterSpec::new("l4_total_bytes", "total"))?;
    let device = builder.register_counter(device_spec("lan_l4_device_tx_bytes"))?;
    let _storage = builder.initialize_with_store(store, rx).await?;

    assert_eq!(
        total.values().unwrap(),
        vec![MetricValue::new("2024-05", Vec::new(), 1000.0)]
    );
    assert_eq!(device.values().unwrap().len(), 2);

    // Scrape output continues from the restored value.
    total.add("2024-05", 1.0)?;
    let families = total.collect();
    assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 1001.0);
    Ok(())
}

#[tokio::test]
async fn test_scrape_schedules_background_flush() -> StorageResult<()> {
    let temp_dir = tempdir().unwrap();
    let (_tx, rx) = watch::channel(false);

    let mut builder = StorageBuilder::new(options())?;
    let counter = builder.register_counter(CounterSpec::new("l4_tx_bytes", "tx"))?;
    let storage = builder
        .initialize(temp_dir.path().join("metrics.db"), rx)
        .await?;

    counter.add("2024-06", 5.0)?;
    let registry = prometheus::Registry::new();
    registry.register(Box::new(counter.clone())).unwrap();
    assert_eq!(registry.gather().len(), 1);

    let mut persisted = Vec::new();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        persisted = storage.read_metric("::::l4_tx_bytes")?;
        if !persisted.is_empty() {
            break;
        }
    }
    assert_eq!(persisted, vec![MetricValue::new("2024-06", Vec::new(), 5.0)]);
    Ok(())
}
