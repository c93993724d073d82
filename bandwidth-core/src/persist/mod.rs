//! Time-windowed counters persisted in an embedded key/value store.

pub mod codec;
pub mod counter;
pub mod options;
pub mod storage;
pub mod store;

pub use codec::{MetricValue, MetricValues};
pub use counter::{label_key, Counter, LabeledCounter, BUCKET_LABEL};
pub use options::{CounterSpec, StorageOptions, DEFAULT_AUTOSAVE_INTERVAL, DEFAULT_RETENTION};
pub use storage::{Storage, StorageBuilder};
pub use store::{MetricStore, SledStore, DEFAULT_TREE_NAME};
