//! Frame decoding with pnet.

use bandwidth_core::classify::{DecodedPacket, Layer, LayerType};
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;
const UDP_HEADER_LEN: usize = 8;
const ICMP_HEADER_LEN: usize = 8;

/// Decode an Ethernet frame into its layers.
///
/// Decoding stops at the first layer that cannot be parsed, which is recorded
/// as a decode-error layer. Whatever follows the transport header is a single
/// payload layer.
pub fn decode_ethernet(frame: &[u8]) -> DecodedPacket {
    let mut layers = Vec::with_capacity(4);

    let Some(ethernet) = EthernetPacket::new(frame) else {
        layers.push(Layer::decode_error());
        return DecodedPacket::new(frame.len(), layers);
    };
    layers.push(Layer::ethernet(
        ETHERNET_HEADER_LEN,
        ethernet.get_source(),
        ethernet.get_destination(),
    ));

    match ethernet.get_ethertype() {
        EtherTypes::Ipv4 => decode_ipv4(ethernet.payload(), &mut layers),
        EtherTypes::Ipv6 => decode_ipv6(ethernet.payload(), &mut layers),
        EtherTypes::Arp => match ArpPacket::new(ethernet.payload()) {
            Some(_) => layers.push(Layer::new(LayerType::Arp, ArpPacket::minimum_packet_size())),
            None => layers.push(Layer::decode_error()),
        },
        _ => push_payload(ethernet.payload(), &mut layers),
    }

    DecodedPacket::new(frame.len(), layers)
}

/// Decode a frame from an interface without a link-layer header.
///
/// Layer 0 is an empty [`LayerType::RawLink`] so the IP header stays at the
/// network layer index.
pub fn decode_raw_ip(frame: &[u8]) -> DecodedPacket {
    let mut layers = Vec::with_capacity(4);
    layers.push(Layer::new(LayerType::RawLink, 0));

    match frame.first().map(|byte| byte >> 4) {
        Some(4) => decode_ipv4(frame, &mut layers),
        Some(6) => decode_ipv6(frame, &mut layers),
        _ => layers.push(Layer::decode_error()),
    }

    DecodedPacket::new(frame.len(), layers)
}

fn decode_ipv4(data: &[u8], layers: &mut Vec<Layer>) {
    let Some(ip) = Ipv4Packet::new(data) else {
        layers.push(Layer::decode_error());
        return;
    };
    let header_len = usize::from(ip.get_header_length()) * 4;
    if header_len < Ipv4Packet::minimum_packet_size() || header_len > data.len() {
        layers.push(Layer::decode_error());
        return;
    }

    layers.push(Layer::ipv4(header_len, ip.get_source(), ip.get_destination()));
    decode_transport(ip.get_next_level_protocol(), &data[header_len..], layers);
}

fn decode_ipv6(data: &[u8], layers: &mut Vec<Layer>) {
    let Some(ip) = Ipv6Packet::new(data) else {
        layers.push(Layer::decode_error());
        return;
    };

    layers.push(Layer::ipv6(IPV6_HEADER_LEN, ip.get_source(), ip.get_destination()));
    decode_transport(ip.get_next_header(), &data[IPV6_HEADER_LEN..], layers);
}

fn decode_transport(protocol: IpNextHeaderProtocol, data: &[u8], layers: &mut Vec<Layer>) {
    match protocol {
        IpNextHeaderProtocols::Tcp => {
            let Some(tcp) = TcpPacket::new(data) else {
                layers.push(Layer::decode_error());
                return;
            };
            let header_len = usize::from(tcp.get_data_offset()) * 4;
            if header_len < TcpPacket::minimum_packet_size() || header_len > data.len() {
                layers.push(Layer::decode_error());
                return;
            }
            layers.push(Layer::tcp(header_len, tcp.get_source(), tcp.get_destination()));
            push_payload(&data[header_len..], layers);
        }
        IpNextHeaderProtocols::Udp => {
            let Some(udp) = UdpPacket::new(data) else {
                layers.push(Layer::decode_error());
                return;
            };
            layers.push(Layer::udp(UDP_HEADER_LEN, udp.get_source(), udp.get_destination()));
            push_payload(&data[UDP_HEADER_LEN..], layers);
        }
        IpNextHeaderProtocols::Icmp | IpNextHeaderProtocols::Icmpv6 => {
            if data.len() < ICMP_HEADER_LEN {
                layers.push(Layer::decode_error());
                return;
            }
            let layer_type = if protocol == IpNextHeaderProtocols::Icmp {
                LayerType::Icmpv4
            } else {
                LayerType::Icmpv6
            };
            layers.push(Layer::new(layer_type, ICMP_HEADER_LEN));
            push_payload(&data[ICMP_HEADER_LEN..], layers);
        }
        _ => push_payload(data, layers),
    }
}

fn push_payload(data: &[u8], layers: &mut Vec<Layer>) {
    if !data.is_empty() {
        layers.push(Layer::new(LayerType::Payload, data.len()));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bandwidth_core::classify::{classify_wan, Direction};
    use pnet::packet::ethernet::{EtherType, MutableEthernetPacket};
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;

    pub(crate) const SRC_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
    pub(crate) const DST_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x02);

    /// Ethernet + IPv4 + TCP (20 byte header) + payload
    pub(crate) fn tcp_frame(payload_len: usize) -> Vec<u8> {
        let total = 14 + 20 + 20 + payload_len;
        let mut frame = vec![0u8; total];

        let mut ethernet = MutableEthernetPacket::new(&mut frame).unwrap();
        ethernet.set_source(SRC_MAC);
        ethernet.set_destination(DST_MAC);
        ethernet.set_ethertype(EtherTypes::Ipv4);

        let mut ip = MutableIpv4Packet::new(&mut frame[14..]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + 20 + payload_len) as u16);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(Ipv4Addr::new(192, 168, 1, 20));
        ip.set_destination(Ipv4Addr::new(93, 184, 216, 34));

        let mut tcp = MutableTcpPacket::new(&mut frame[34..]).unwrap();
        tcp.set_source(50000);
        tcp.set_destination(443);
        tcp.set_data_offset(5);

        frame
    }

    #[test]
    fn test_decode_tcp_frame() {
        let packet = decode_ethernet(&tcp_frame(100));

        assert_eq!(packet.wire_len, 154);
        assert_eq!(packet.layers.len(), 4);
        assert_eq!(packet.layers[0].link_addrs(), Some((SRC_MAC, DST_MAC)));
        assert_eq!(packet.layers[1].layer_type, LayerType::Ipv4);
        assert_eq!(packet.layers[1].header_len, 20);
        assert_eq!(packet.layers[2].ports(), Some((50000, 443)));
        assert_eq!(packet.layers[3].layer_type, LayerType::Payload);
        assert_eq!(packet.layers[3].header_len, 100);
    }

    #[test]
    fn test_decode_udp_frame() {
        let mut frame = vec![0u8; 14 + 20 + 8 + 12];
        let mut ethernet = MutableEthernetPacket::new(&mut frame).unwrap();
        ethernet.set_ethertype(EtherTypes::Ipv4);
        let mut ip = MutableIpv4Packet::new(&mut frame[14..]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        let mut udp = MutableUdpPacket::new(&mut frame[34..]).unwrap();
        udp.set_source(5353);
        udp.set_destination(53);

        let packet = decode_ethernet(&frame);
        assert_eq!(packet.layers[2].layer_type, LayerType::Udp);
        assert_eq!(packet.layers[2].header_len, 8);
        assert_eq!(packet.layers[3].header_len, 12);
    }

    #[test]
    fn test_bad_ip_header_length_is_decode_error() {
        let mut frame = tcp_frame(0);
        let mut ip = MutableIpv4Packet::new(&mut frame[14..]).unwrap();
        ip.set_header_length(2);

        let packet = decode_ethernet(&frame);
        assert_eq!(packet.layers.len(), 2);
        assert!(packet.layers[1].is_decode_error());
    }

    #[test]
    fn test_truncated_frame_is_decode_error() {
        let packet = decode_ethernet(&[0u8; 6]);
        assert_eq!(packet.wire_len, 6);
        assert!(packet.layers[0].is_decode_error());
    }

    #[test]
    fn test_raw_ip_frame_keeps_transport_accounting() {
        let ethernet = tcp_frame(100);
        let frame = &ethernet[14..];

        let packet = decode_raw_ip(frame);
        assert_eq!(packet.wire_len, 140);
        assert_eq!(packet.layers[0].layer_type, LayerType::RawLink);
        assert_eq!(packet.layers[0].header_len, 0);
        assert_eq!(packet.layers[1].layer_type, LayerType::Ipv4);
        assert_eq!(packet.layers[2].ports(), Some((50000, 443)));

        let deltas = classify_wan(&packet, MacAddr::zero());
        assert_eq!(deltas.layer2_plus, Some(140));
        assert_eq!(deltas.layer3_plus, Some(120));
        assert_eq!(deltas.layer4_plus, Some(100));
        assert_eq!(deltas.direction, Some(Direction::Unknown));
    }

    #[test]
    fn test_raw_frame_with_unknown_ip_version_is_decode_error() {
        let packet = decode_raw_ip(&[0x50; 40]);
        assert_eq!(packet.layers.len(), 2);
        assert!(packet.layers[1].is_decode_error());
    }

    #[test]
    fn test_unknown_ethertype_is_payload() {
        let mut frame = vec![0u8; 60];
        let mut ethernet = MutableEthernetPacket::new(&mut frame).unwrap();
        ethernet.set_ethertype(EtherType::new(0x88b5));

        let packet = decode_ethernet(&frame);
        assert_eq!(packet.layers.len(), 2);
        assert_eq!(packet.layers[1].layer_type, LayerType::Payload);
        assert_eq!(packet.layers[1].header_len, 46);
    }
}
