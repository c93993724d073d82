use pnet::util::MacAddr;

use super::packet::DecodedPacket;

/// Direction of a packet relative to the monitored interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Transmitted,
    Received,
    Unknown,
}

/// Byte deltas attributed to one packet on the WAN interface.
///
/// A layer's field is `None` when the packet never reached that layer, either
/// because it had fewer layers or because decoding failed before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WanDeltas {
    pub layer2_plus: Option<u64>,
    pub layer3_plus: Option<u64>,
    pub layer4_plus: Option<u64>,
    /// Set together with `layer4_plus`
    pub direction: Option<Direction>,
}

/// Attribute a packet seen on the WAN interface whose hardware address is
/// `own_mac`.
///
/// Accounting stops at the first decode-error layer; deltas of the layers
/// before it stand.
pub fn classify_wan(packet: &DecodedPacket, own_mac: MacAddr) -> WanDeltas {
    let mut deltas = WanDeltas::default();
    let mut remaining = packet.wire_len as u64;
    let mut link = None;

    for (index, layer) in packet.layers.iter().take(3).enumerate() {
        if layer.is_decode_error() {
            break;
        }
        remaining = remaining.saturating_sub(layer.header_len as u64);

        match index {
            0 => {
                deltas.layer2_plus = Some(remaining);
                link = layer.link_addrs();
            }
            1 => deltas.layer3_plus = Some(remaining),
            _ => {
                deltas.layer4_plus = Some(remaining);
                deltas.direction = Some(match link {
                    Some((src, _)) if src == own_mac => Direction::Transmitted,
                    Some((_, dst)) if dst == own_mac => Direction::Received,
                    _ => Direction::Unknown,
                });
            }
        }
    }

    deltas
}
