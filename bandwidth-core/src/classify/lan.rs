use pnet::util::MacAddr;
use std::net::IpAddr;

use super::mac::is_ignored_on_lan;
use super::packet::DecodedPacket;
use super::wan::Direction;

/// Bytes one LAN packet contributes, with the device on the other end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanDelta {
    /// Either `Transmitted` or `Received`
    pub direction: Direction,
    pub layer4_plus: u64,
    /// Hardware address of the LAN device the bytes were exchanged with
    pub device: MacAddr,
}

/// Attribute a packet seen on the LAN interface whose hardware address is
/// `own_mac` and whose current addresses are `local_ips`.
///
/// Returns `None` for packets that must not be counted: broadcast or
/// multicast frames, frames the interface neither sent nor received, frames
/// without Ethernet or IP, traffic to or from the router itself, packets with
/// a decode error below the transport layer, and packets without a transport
/// layer at all.
pub fn classify_lan(
    packet: &DecodedPacket,
    own_mac: MacAddr,
    local_ips: &[IpAddr],
) -> Option<LanDelta> {
    let mut remaining = packet.wire_len as u64;
    let mut link = None;

    for (index, layer) in packet.layers.iter().take(3).enumerate() {
        if layer.is_decode_error() {
            return None;
        }
        remaining = remaining.saturating_sub(layer.header_len as u64);

        match index {
            0 => {
                let (src, dst) = layer.link_addrs()?;
                if is_ignored_on_lan(src) || is_ignored_on_lan(dst) {
                    return None;
                }
                if src != own_mac && dst != own_mac {
                    return None;
                }
                link = Some((src, dst));
            }
            1 => {
                let (src, dst) = layer.ip_addrs()?;
                if local_ips
                    .iter()
                    .any(|local| same_ip(*local, src) || same_ip(*local, dst))
                {
                    return None;
                }
            }
            _ => {
                let (src, dst) = link?;
                return Some(if src == own_mac {
                    LanDelta {
                        direction: Direction::Transmitted,
                        layer4_plus: remaining,
                        device: dst,
                    }
                } else {
                    LanDelta {
                        direction: Direction::Received,
                        layer4_plus: remaining,
                        device: src,
                    }
                });
            }
        }
    }

    None
}

// IPv4-mapped IPv6 addresses compare equal to their IPv4 form.
fn same_ip(a: IpAddr, b: IpAddr) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}
