//! Core of the bandwidth recorder: packet classification, per-second
//! accumulation and time-windowed counters persisted across restarts.

pub mod accumulator;
pub mod bucket;
pub mod classify;
pub mod error;
pub mod framing;
pub mod persist;

pub use accumulator::{LanAccumulator, LanSnapshot, WanAccumulator, WanSnapshot};
pub use bucket::{current_month, month_bucket};
pub use classify::{classify_lan, classify_wan, DecodedPacket, Direction, Layer, LayerType};
pub use error::{FrameError, MetricError, StorageError, StorageResult};
pub use framing::{FrameReader, FrameWriter, PacketMetadata};
pub use persist::{
    Counter, CounterSpec, LabeledCounter, MetricStore, MetricValue, MetricValues, SledStore,
    Storage, StorageBuilder, StorageOptions,
};
