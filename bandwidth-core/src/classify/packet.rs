//! Protocol-agnostic view of one decoded packet.
//!
//! The capture side decodes frames into this shape; the classifiers only ever
//! see layer tags, header lengths and the few addresses they care about.

use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Tag of a decoded layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
    Payload,
    Unknown,
    /// Sentinel for bytes the decoder could not make sense of
    DecodeError,
    /// Empty link layer of a raw IP capture, such as a PPP interface
    RawLink,
}

/// Addresses exposed by a layer, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoints {
    None,
    Link { src: MacAddr, dst: MacAddr },
    Network { src: IpAddr, dst: IpAddr },
    Transport { src_port: u16, dst_port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layer {
    pub layer_type: LayerType,
    /// Bytes of this layer's own header
    pub header_len: usize,
    pub endpoints: Endpoints,
}

impl Layer {
    pub fn new(layer_type: LayerType, header_len: usize) -> Self {
        Self {
            layer_type,
            header_len,
            endpoints: Endpoints::None,
        }
    }

    pub fn ethernet(header_len: usize, src: MacAddr, dst: MacAddr) -> Self {
        Self {
            layer_type: LayerType::Ethernet,
            header_len,
            endpoints: Endpoints::Link { src, dst },
        }
    }

    pub fn ipv4(header_len: usize, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            layer_type: LayerType::Ipv4,
            header_len,
            endpoints: Endpoints::Network {
                src: IpAddr::V4(src),
                dst: IpAddr::V4(dst),
            },
        }
    }

    pub fn ipv6(header_len: usize, src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Self {
            layer_type: LayerType::Ipv6,
            header_len,
            endpoints: Endpoints::Network {
                src: IpAddr::V6(src),
                dst: IpAddr::V6(dst),
            },
        }
    }

    pub fn tcp(header_len: usize, src_port: u16, dst_port: u16) -> Self {
        Self {
            layer_type: LayerType::Tcp,
            header_len,
            endpoints: Endpoints::Transport { src_port, dst_port },
        }
    }

    pub fn udp(header_len: usize, src_port: u16, dst_port: u16) -> Self {
        Self {
            layer_type: LayerType::Udp,
            header_len,
            endpoints: Endpoints::Transport { src_port, dst_port },
        }
    }

    pub fn decode_error() -> Self {
        Self::new(LayerType::DecodeError, 0)
    }

    pub fn is_decode_error(&self) -> bool {
        self.layer_type == LayerType::DecodeError
    }

    /// Source and destination hardware addresses of an Ethernet layer
    pub fn link_addrs(&self) -> Option<(MacAddr, MacAddr)> {
        match (self.layer_type, self.endpoints) {
            (LayerType::Ethernet, Endpoints::Link { src, dst }) => Some((src, dst)),
            _ => None,
        }
    }

    /// Source and destination addresses of an IPv4 or IPv6 layer
    pub fn ip_addrs(&self) -> Option<(IpAddr, IpAddr)> {
        match (self.layer_type, self.endpoints) {
            (LayerType::Ipv4 | LayerType::Ipv6, Endpoints::Network { src, dst }) => {
                Some((src, dst))
            }
            _ => None,
        }
    }

    pub fn ports(&self) -> Option<(u16, u16)> {
        match self.endpoints {
            Endpoints::Transport { src_port, dst_port } => Some((src_port, dst_port)),
            _ => None,
        }
    }
}

/// One captured packet: its length on the wire and its decoded layers,
/// outermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub wire_len: usize,
    pub layers: Vec<Layer>,
}

impl DecodedPacket {
    pub fn new(wire_len: usize, layers: Vec<Layer>) -> Self {
        Self { wire_len, layers }
    }
}

/// `[u8; 6]` form of a hardware address
pub fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}

pub fn mac_from_octets(octets: [u8; 6]) -> MacAddr {
    MacAddr(octets[0], octets[1], octets[2], octets[3], octets[4], octets[5])
}
