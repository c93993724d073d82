//! Per-packet traffic classification.
//!
//! Both classifiers are pure: one decoded packet plus the interface identity
//! in, byte deltas out.

pub mod lan;
pub mod mac;
pub mod packet;
pub mod wan;

pub use lan::{classify_lan, LanDelta};
pub use mac::{is_ignored_on_lan, MacMatch, IGNORED_LAN_RANGES};
pub use packet::{mac_from_octets, mac_octets, DecodedPacket, Endpoints, Layer, LayerType};
pub use wan::{classify_wan, Direction, WanDeltas};
