//! Live packet capture.

pub mod decode;

pub use decode::{decode_ethernet, decode_raw_ip};

use crate::config::CaptureConfig;
use bandwidth_core::classify::DecodedPacket;
use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};
use pnet::util::MacAddr;
use std::io;
use std::net::IpAddr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Interface {0} has no hardware address")]
    NoHardwareAddress(String),

    #[error("Unsupported channel type on interface {0}")]
    UnsupportedChannel(String),

    #[error("Capture I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Capture source ended")]
    EndOfStream,
}

/// A blocking stream of decoded packets.
///
/// Any error ends the stream; callers do not retry.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Result<DecodedPacket, CaptureError>;
}

/// Identity of a monitored interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    /// `None` for interfaces without a link-layer address, such as PPP links
    pub mac: Option<MacAddr>,
    pub ips: Vec<IpAddr>,
}

impl InterfaceInfo {
    pub fn require_mac(&self) -> Result<MacAddr, CaptureError> {
        self.mac
            .ok_or_else(|| CaptureError::NoHardwareAddress(self.name.clone()))
    }
}

fn find_interface(name: &str) -> Result<NetworkInterface, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|interface| interface.name == name)
        .ok_or_else(|| CaptureError::InterfaceNotFound(name.to_string()))
}

pub fn lookup_interface(name: &str) -> Result<InterfaceInfo, CaptureError> {
    let interface = find_interface(name)?;
    Ok(InterfaceInfo {
        name: interface.name.clone(),
        mac: interface.mac.filter(|mac| *mac != MacAddr::zero()),
        ips: interface.ips.iter().map(|network| network.ip()).collect(),
    })
}

/// Addresses currently configured on the interface
pub fn interface_ips(name: &str) -> Result<Vec<IpAddr>, CaptureError> {
    Ok(lookup_interface(name)?.ips)
}

/// Framing of the packets an interface delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Bare IP packets, as delivered by point-to-point links
    RawIp,
}

impl LinkType {
    pub fn of(interface: &NetworkInterface) -> Self {
        let has_mac = interface.mac.map_or(false, |mac| mac != MacAddr::zero());
        if interface.is_point_to_point() || (!has_mac && !interface.is_loopback()) {
            LinkType::RawIp
        } else {
            LinkType::Ethernet
        }
    }

    pub fn decode(self, frame: &[u8]) -> DecodedPacket {
        match self {
            LinkType::Ethernet => decode_ethernet(frame),
            LinkType::RawIp => decode_raw_ip(frame),
        }
    }
}

/// Packets read from a live interface through a pnet datalink channel
pub struct LiveCapture {
    name: String,
    link_type: LinkType,
    rx: Box<dyn DataLinkReceiver>,
}

impl LiveCapture {
    pub fn open(name: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let interface = find_interface(name)?;
        let channel_config = datalink::Config {
            read_buffer_size: config.read_buffer_size,
            promiscuous: config.promiscuous,
            ..Default::default()
        };

        let link_type = LinkType::of(&interface);

        match datalink::channel(&interface, channel_config)? {
            Channel::Ethernet(_tx, rx) => {
                info!(
                    interface = name,
                    promiscuous = config.promiscuous,
                    link_type = ?link_type,
                    "Opened capture channel"
                );
                Ok(Self {
                    name: name.to_string(),
                    link_type,
                    rx,
                })
            }
            _ => Err(CaptureError::UnsupportedChannel(name.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }
}

impl PacketSource for LiveCapture {
    fn next_packet(&mut self) -> Result<DecodedPacket, CaptureError> {
        let frame = self.rx.next()?;
        Ok(self.link_type.decode(frame))
    }
}
