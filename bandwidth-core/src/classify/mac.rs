use pnet::util::MacAddr;

use super::packet::mac_octets;

/// A hardware address range: every address equal to `addr` under `mask`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacMatch {
    pub addr: MacAddr,
    pub mask: MacAddr,
}

impl MacMatch {
    pub const fn new(addr: MacAddr, mask: MacAddr) -> Self {
        Self { addr, mask }
    }

    pub fn matches(&self, candidate: MacAddr) -> bool {
        let addr = mac_octets(self.addr);
        let mask = mac_octets(self.mask);
        let candidate = mac_octets(candidate);
        (0..6).all(|i| addr[i] & mask[i] == candidate[i] & mask[i])
    }
}

/// Ranges never accounted on the LAN: broadcast and every group address
pub const IGNORED_LAN_RANGES: [MacMatch; 2] = [
    MacMatch::new(
        MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff),
        MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff),
    ),
    MacMatch::new(
        MacAddr(0x01, 0x00, 0x00, 0x00, 0x00, 0x00),
        MacAddr(0x01, 0x00, 0x00, 0x00, 0x00, 0x00),
    ),
];

pub fn is_ignored_on_lan(mac: MacAddr) -> bool {
    IGNORED_LAN_RANGES.iter().any(|range| range.matches(mac))
}
