//! Storage coordinator.
//!
//! Counters are declared on a [`StorageBuilder`]; [`StorageBuilder::initialize`]
//! consumes the builder, opens the backend, hydrates every declared counter and
//! starts the background tasks. There is no way to declare a counter on the
//! resulting [`Storage`].

use crate::error::{StorageError, StorageResult};
use crate::persist::codec::{self, MetricValues};
use crate::persist::counter::{Counter, FlushSender};
use crate::persist::options::{CounterSpec, StorageOptions};
use crate::persist::store::{MetricStore, SledStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration phase of the storage coordinator
pub struct StorageBuilder {
    options: StorageOptions,
    counters: Vec<Counter>,
    metric_ids: HashSet<String>,
    flush_tx: FlushSender,
    flush_rx: mpsc::UnboundedReceiver<Counter>,
}

impl StorageBuilder {
    pub fn new(options: StorageOptions) -> StorageResult<Self> {
        options.validate()?;
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        Ok(Self {
            options,
            counters: Vec::new(),
            metric_ids: HashSet::new(),
            flush_tx,
            flush_rx,
        })
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Declare a counter. Its options start from the coordinator defaults.
    pub fn register_counter(&mut self, spec: CounterSpec) -> StorageResult<Counter> {
        let metric_id = spec.metric_id();
        if self.metric_ids.contains(&metric_id) {
            return Err(StorageError::DuplicateMetric(metric_id));
        }

        let options = spec.resolve(&self.options)?;
        let counter = Counter::new(metric_id.clone(), spec.opts, options, self.flush_tx.clone())?;

        debug!(metric = %metric_id, "Registered counter");
        self.metric_ids.insert(metric_id);
        self.counters.push(counter.clone());
        Ok(counter)
    }

    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    /// Open the sled database at `path` and finish initialization.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn initialize<P: AsRef<Path>>(
        self,
        path: P,
        shutdown: watch::Receiver<bool>,
    ) -> StorageResult<Storage> {
        let store = SledStore::open_tree(path.as_ref(), &self.options.tree_name)?;
        info!(path = %path.as_ref().display(), tree = %self.options.tree_name, "Opened metrics database");
        self.initialize_with_store(Arc::new(store), shutdown).await
    }

    /// Finish initialization against an already opened store
    pub async fn initialize_with_store(
        self,
        store: Arc<dyn MetricStore>,
        shutdown: watch::Receiver<bool>,
    ) -> StorageResult<Storage> {
        for counter in &self.counters {
            let loaded = counter.hydrate(Arc::clone(&store))?;
            if loaded > 0 {
                info!(metric = %counter.metric_id(), values = loaded, "Restored counter state");
            }
        }

        let counters = Arc::new(self.counters);

        let autosave = if self.options.autosave {
            Some(tokio::spawn(autosave_loop(
                Arc::clone(&counters),
                self.options.autosave_interval,
                shutdown,
            )))
        } else {
            None
        };
        let dispatcher = tokio::spawn(dispatch_flushes(self.flush_rx));

        Ok(Storage {
            store,
            counters,
            autosave,
            dispatcher,
        })
    }
}

/// Initialized storage coordinator
pub struct Storage {
    store: Arc<dyn MetricStore>,
    counters: Arc<Vec<Counter>>,
    autosave: Option<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
}

impl Storage {
    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    /// Every metric identifier present in the backend
    pub fn list_metrics(&self) -> StorageResult<Vec<String>> {
        self.store.keys()
    }

    /// Persisted values of one metric, empty if it was never written
    pub fn read_metric(&self, metric_id: &str) -> StorageResult<MetricValues> {
        match self.store.get(metric_id)? {
            Some(data) => codec::decode(&data),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the persisted values of one metric.
    ///
    /// A counter registered under the same identifier keeps its in-memory
    /// state and overwrites this on its next flush.
    pub fn write_metric(&self, metric_id: &str, values: &[codec::MetricValue]) -> StorageResult<()> {
        if metric_id.is_empty() {
            return Err(StorageError::InvalidOption("empty metric identifier".to_string()));
        }
        self.store.put(metric_id, &codec::encode(values)?)
    }

    /// Flush every counter once, returning how many flushes failed
    pub fn flush_all(&self) -> usize {
        flush_counters(&self.counters)
    }

    /// Wait for the autosave task to observe the shutdown signal
    pub async fn join_autosave(&mut self) {
        if let Some(handle) = self.autosave.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Autosave task ended abnormally");
            }
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

fn flush_counters(counters: &[Counter]) -> usize {
    let mut failures = 0;
    for counter in counters {
        if let Err(e) = counter.flush_now() {
            warn!(metric = %counter.metric_id(), error = %e, "Failed to flush counter");
            failures += 1;
        }
    }
    failures
}

async fn autosave_loop(
    counters: Arc<Vec<Counter>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "Autosave started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                let counters = Arc::clone(&counters);
                match tokio::task::spawn_blocking(move || flush_counters(&counters)).await {
                    Ok(0) => debug!("Autosave completed"),
                    Ok(failures) => warn!(failures, "Autosave completed with failures"),
                    Err(e) => warn!(error = %e, "Autosave flush task panicked"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("Autosave stopped");
}

async fn dispatch_flushes(mut requests: mpsc::UnboundedReceiver<Counter>) {
    while let Some(counter) = requests.recv().await {
        let result = tokio::task::spawn_blocking(move || {
            // Cleared first so a scrape racing this flush schedules another one.
            counter.clear_flush_pending();
            counter
                .flush_now()
                .map_err(|e| (counter.metric_id().to_string(), e))
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err((metric, e))) => warn!(metric = %metric, error = %e, "Scrape-triggered flush failed"),
            Err(e) => warn!(error = %e, "Flush task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::codec::MetricValue;
    use tempfile::tempdir;

    #[test]
    fn test_duplicate_counters_are_rejected() {
        let mut builder = StorageBuilder::new(StorageOptions::default()).unwrap();
        builder
            .register_counter(CounterSpec::new("l2_total_bytes", "help"))
            .unwrap();

        assert!(matches!(
            builder.register_counter(CounterSpec::new("l2_total_bytes", "other")),
            Err(StorageError::DuplicateMetric(_))
        ));
    }

    #[test]
    fn test_invalid_options_fail_fast() {
        assert!(StorageBuilder::new(StorageOptions::default().keep_records(0)).is_err());

        let mut builder = StorageBuilder::new(StorageOptions::default()).unwrap();
        assert!(builder
            .register_counter(CounterSpec::new("l2_total_bytes", "help").variable_labels(&[""]))
            .is_err());
    }

    #[tokio::test]
    async fn test_initialize_hydrates_registered_counters() {
        let temp_dir = tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);

        let mut builder =
            StorageBuilder::new(StorageOptions::default().autosave(false, Duration::ZERO)).unwrap();
        let counter = builder
            .register_counter(CounterSpec::new("l4_total_bytes", "help"))
            .unwrap();
        assert!(!counter.is_hydrated());

        let storage = builder
            .initialize(temp_dir.path().join("metrics.db"), rx)
            .await
            .unwrap();
        assert!(counter.is_hydrated());
        assert_eq!(storage.counters().len(), 1);

        counter.add("2024-01", 42.0).unwrap();
        assert_eq!(storage.flush_all(), 0);
        assert_eq!(
            storage.read_metric("::::l4_total_bytes").unwrap(),
            vec![MetricValue::new("2024-01", Vec::new(), 42.0)]
        );
        assert_eq!(storage.list_metrics().unwrap(), vec!["::::l4_total_bytes".to_string()]);
    }

    #[tokio::test]
    async fn test_write_metric_and_read_back() {
        let temp_dir = tempdir().unwrap();
        let (_tx, rx) = watch::channel(false);
        let storage = StorageBuilder::new(StorageOptions::default().autosave(false, Duration::ZERO))
            .unwrap()
            .initialize(temp_dir.path().join("metrics.db"), rx)
            .await
            .unwrap();

        let values = vec![MetricValue::new("2023-12", Vec::new(), 1.5)];
        storage.write_metric("::::l3_total_bytes", &values).unwrap();

        assert_eq!(storage.read_metric("::::l3_total_bytes").unwrap(), values);
        assert!(storage.read_metric("::::unknown").unwrap().is_empty());
        assert!(storage.write_metric("", &values).is_err());
    }

    #[tokio::test]
    async fn test_autosave_flushes_and_stops_on_shutdown() {
        let temp_dir = tempdir().unwrap();
        let (tx, rx) = watch::channel(false);

        let mut builder = StorageBuilder::new(
            StorageOptions::default().autosave(true, Duration::from_millis(20)),
        )
        .unwrap();
        let counter = builder
            .register_counter(CounterSpec::new("l4_rx_bytes", "help"))
            .unwrap();
        let mut storage = builder
            .initialize(temp_dir.path().join("metrics.db"), rx)
            .await
            .unwrap();

        counter.add("2024-04", 3.0).unwrap();

        let mut persisted = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            persisted = storage.read_metric("::::l4_rx_bytes").unwrap();
            if !persisted.is_empty() {
                break;
            }
        }
        assert_eq!(persisted, vec![MetricValue::new("2024-04", Vec::new(), 3.0)]);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), storage.join_autosave())
            .await
            .unwrap();
    }
}
