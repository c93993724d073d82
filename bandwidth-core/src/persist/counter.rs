//! Time-windowed persistent counter.
//!
//! A counter accumulates deltas per `(bucket, label values)` pair. Every
//! accumulator lives twice: in the counter's own map, which is what gets
//! compacted and flushed, and in a prometheus `GaugeVec`, which is what gets
//! scraped. Both are updated under the same mutex, and scrapes read the gauge
//! vector under that mutex too, so they never disagree.

use crate::error::{MetricError, StorageError, StorageResult};
use crate::persist::codec::{self, MetricValue, MetricValues};
use crate::persist::options::CounterOptions;
use crate::persist::store::MetricStore;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Label carrying the bucket of every exported series
pub const BUCKET_LABEL: &str = "since";

pub(crate) type FlushSender = mpsc::UnboundedSender<Counter>;

/// Canonical map key for a tuple of label values: each value is prefixed by
/// its length so `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn label_key<S: AsRef<str>>(labels: &[S]) -> String {
    let mut key = String::new();
    for label in labels {
        let label = label.as_ref();
        key.push_str(&label.len().to_string());
        key.push(' ');
        key.push_str(label);
    }
    key
}

/// State that only exists once the counter has been hydrated
struct Hydrated {
    store: Arc<dyn MetricStore>,
    // bucket -> label key -> accumulator
    since_to_value: BTreeMap<String, BTreeMap<String, MetricValue>>,
}

struct CounterInner {
    metric_id: String,
    options: CounterOptions,
    gauge_vec: GaugeVec,
    state: Mutex<Option<Hydrated>>,
    // Serializes durable writes so an older snapshot never lands after a newer one.
    flush_lock: Mutex<()>,
    flush_pending: AtomicBool,
    flush_tx: FlushSender,
}

/// Handle to a persisted counter. Cloning is cheap and every clone refers to
/// the same accumulators.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    pub(crate) fn new(
        metric_id: String,
        opts: Opts,
        options: CounterOptions,
        flush_tx: FlushSender,
    ) -> Result<Self, MetricError> {
        let mut label_names: Vec<&str> =
            options.variable_labels.iter().map(String::as_str).collect();
        label_names.push(BUCKET_LABEL);
        let gauge_vec = GaugeVec::new(opts, &label_names)?;

        Ok(Self {
            inner: Arc::new(CounterInner {
                metric_id,
                options,
                gauge_vec,
                state: Mutex::new(None),
                flush_lock: Mutex::new(()),
                flush_pending: AtomicBool::new(false),
                flush_tx,
            }),
        })
    }

    /// Store key of this counter
    pub fn metric_id(&self) -> &str {
        &self.inner.metric_id
    }

    pub fn variable_labels(&self) -> &[String] {
        &self.inner.options.variable_labels
    }

    pub fn retention(&self) -> usize {
        self.inner.options.retention
    }

    pub fn is_hydrated(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    /// Bind a tuple of label values, in the order the label names were declared
    pub fn with_label_values<S: AsRef<str>>(
        &self,
        label_values: &[S],
    ) -> Result<LabeledCounter, MetricError> {
        let expected = self.inner.options.variable_labels.len();
        if label_values.len() != expected {
            return Err(MetricError::LabelArity {
                metric: self.inner.metric_id.clone(),
                expected,
                actual: label_values.len(),
            });
        }

        let mut values = Vec::with_capacity(label_values.len());
        for (name, value) in self.inner.options.variable_labels.iter().zip(label_values) {
            let value = value.as_ref();
            if value.is_empty() {
                return Err(MetricError::EmptyLabelValue {
                    metric: self.inner.metric_id.clone(),
                    label: name.clone(),
                });
            }
            values.push(value.to_string());
        }

        Ok(LabeledCounter {
            counter: self.clone(),
            label_key: label_key(&values),
            label_values: values,
        })
    }

    /// Add `delta` to the unlabelled accumulator of `since`
    pub fn add(&self, since: &str, delta: f64) -> Result<(), MetricError> {
        self.with_label_values::<&str>(&[])?.add(since, delta)
    }

    /// Snapshot of the in-memory accumulators, ordered by bucket then label key
    pub fn values(&self) -> Result<MetricValues, MetricError> {
        let state = self.inner.state.lock();
        let hydrated = state
            .as_ref()
            .ok_or_else(|| MetricError::NotHydrated(self.inner.metric_id.clone()))?;
        Ok(hydrated
            .since_to_value
            .values()
            .flat_map(|by_label| by_label.values().cloned())
            .collect())
    }

    /// Load persisted values into both the map and the gauge vector. Runs
    /// exactly once per counter.
    pub(crate) fn hydrate(&self, store: Arc<dyn MetricStore>) -> StorageResult<usize> {
        let mut state = self.inner.state.lock();
        if state.is_some() {
            return Err(StorageError::AlreadyHydrated(self.inner.metric_id.clone()));
        }

        let values = match store.get(&self.inner.metric_id)? {
            Some(data) => codec::decode(&data)?,
            None => Vec::new(),
        };

        let expected = self.inner.options.variable_labels.len();
        let mut since_to_value: BTreeMap<String, BTreeMap<String, MetricValue>> =
            BTreeMap::new();
        let mut loaded = 0;
        for value in values {
            if value.labels.len() != expected || value.since.is_empty() {
                warn!(
                    metric = %self.inner.metric_id,
                    since = %value.since,
                    labels = ?value.labels,
                    "Dropping persisted value with mismatched label shape"
                );
                continue;
            }

            let mut gauge_labels: Vec<&str> = value.labels.iter().map(String::as_str).collect();
            gauge_labels.push(&value.since);
            self.inner
                .gauge_vec
                .get_metric_with_label_values(&gauge_labels)
                .map_err(MetricError::from)?
                .set(value.value);

            since_to_value
                .entry(value.since.clone())
                .or_default()
                .insert(label_key(&value.labels), value);
            loaded += 1;
        }

        debug!(metric = %self.inner.metric_id, values = loaded, "Hydrated counter");
        *state = Some(Hydrated {
            store,
            since_to_value,
        });
        Ok(loaded)
    }

    /// Compact to the retained buckets and write them to the store.
    ///
    /// A failed write leaves the in-memory state untouched; the next flush
    /// writes a superset of what was lost.
    pub fn flush_now(&self) -> StorageResult<()> {
        let _writer = self.inner.flush_lock.lock();

        let (store, blob) = {
            let mut state = self.inner.state.lock();
            let hydrated = state
                .as_mut()
                .ok_or_else(|| StorageError::NotHydrated(self.inner.metric_id.clone()))?;

            // Bucket labels are zero-padded dates, so string order is time order.
            while hydrated.since_to_value.len() > self.inner.options.retention {
                if let Some((evicted, _)) = hydrated.since_to_value.pop_first() {
                    debug!(metric = %self.inner.metric_id, bucket = %evicted, "Evicted bucket");
                }
            }

            let values: MetricValues = hydrated
                .since_to_value
                .values()
                .flat_map(|by_label| by_label.values().cloned())
                .collect();
            (Arc::clone(&hydrated.store), codec::encode(&values)?)
        };

        store.put(&self.inner.metric_id, &blob)
    }

    /// Ask the flush dispatcher to flush this counter in the background.
    /// Requests made while one is already queued are coalesced.
    pub fn request_flush(&self) {
        if self.inner.flush_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.flush_tx.send(self.clone()).is_err() {
            self.inner.flush_pending.store(false, Ordering::Release);
            warn!(metric = %self.inner.metric_id, "Flush dispatcher is gone, skipping flush");
        }
    }

    pub(crate) fn clear_flush_pending(&self) {
        self.inner.flush_pending.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("metric_id", &self.inner.metric_id)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Collector for Counter {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.gauge_vec.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let families = {
            let _state = self.inner.state.lock();
            self.inner.gauge_vec.collect()
        };
        // Scrapes never wait on disk.
        self.request_flush();
        families
    }
}

/// A counter bound to one tuple of label values
#[derive(Clone, Debug)]
pub struct LabeledCounter {
    counter: Counter,
    label_values: Vec<String>,
    label_key: String,
}

impl LabeledCounter {
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Add `delta` to the accumulator of bucket `since`
    pub fn add(&self, since: &str, delta: f64) -> Result<(), MetricError> {
        let inner = &self.counter.inner;
        if since.is_empty() {
            return Err(MetricError::EmptyBucket(inner.metric_id.clone()));
        }

        let mut gauge_labels: Vec<&str> = self.label_values.iter().map(String::as_str).collect();
        gauge_labels.push(since);

        let mut state = inner.state.lock();
        let hydrated = state
            .as_mut()
            .ok_or_else(|| MetricError::NotHydrated(inner.metric_id.clone()))?;
        let gauge = inner.gauge_vec.get_metric_with_label_values(&gauge_labels)?;

        hydrated
            .since_to_value
            .entry(since.to_string())
            .or_default()
            .entry(self.label_key.clone())
            .or_insert_with(|| MetricValue::new(since, self.label_values.clone(), 0.0))
            .value += delta;
        gauge.add(delta);
        Ok(())
    }
}
