//! # Board Description
//!
//! Static description of the hardware a firewall build targets: the set of
//! network interfaces (addresses, device-tree nodes, DMA pools, per-role
//! scheduling priorities) and the transport protocols the deployment
//! filters. Constructed once at the start of a build and read-only from
//! then on.

mod presets;

pub use presets::preset;

use core::fmt;

/// A 48-bit Ethernet MAC address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The six octets, transmission order.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Transport protocols the firewall knows how to filter.
///
/// Discriminants are the IANA protocol numbers carried in the IPv4 header,
/// which is also how filters register with the RX virtualizer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    /// IANA protocol number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Short lowercase name used in region and process names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Icmp => "icmp",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol number outside the supported set.
///
/// Construction of a filter for such a number must fail immediately; there
/// is no placeholder fallback.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unsupported protocol number {0}")]
pub struct UnsupportedProtocol(pub u8);

impl TryFrom<u8> for Protocol {
    type Error = UnsupportedProtocol;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Icmp),
            6 => Ok(Self::Tcp),
            17 => Ok(Self::Udp),
            other => Err(UnsupportedProtocol(other)),
        }
    }
}

/// Fixed scheduling priorities for the per-interface processing stages.
#[derive(Copy, Clone, Debug)]
pub struct RolePriorities {
    pub rx: u8,
    pub tx: u8,
    pub arp_requester: u8,
    pub arp_responder: u8,
    pub filter: u8,
}

/// One physical network interface of the target board.
#[derive(Clone, Debug)]
pub struct Interface {
    /// Position in the board's interface list; embedded in every region and
    /// process name derived from this interface.
    pub index: usize,
    /// Symbolic name, e.g. `eth0`.
    pub name: &'static str,
    /// Device-tree node backing the interface. Parsed elsewhere; carried
    /// here verbatim for the system description.
    pub hw_node: &'static str,
    pub mac: MacAddr,
    pub ip: core::net::Ipv4Addr,
    pub subnet_len: u8,
    pub priorities: RolePriorities,
    /// Physical base of the interface's DMA-capable buffer pool.
    pub dma_paddr: u64,
    /// Size of the buffer pool in bytes. Must be page-aligned.
    pub dma_size: u64,
}

/// Everything the compiler needs to know about the target platform.
#[derive(Clone, Debug)]
pub struct Board {
    pub name: &'static str,
    pub interfaces: Vec<Interface>,
    /// Protocols filtered on every interface.
    pub protocols: Vec<Protocol>,
    pub router_priority: u8,
    pub rule_server_priority: u8,
    pub icmp_priority: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_numbers_match_iana() {
        assert_eq!(Protocol::Icmp.number(), 1);
        assert_eq!(Protocol::Tcp.number(), 6);
        assert_eq!(Protocol::Udp.number(), 17);
    }

    #[test]
    fn unsupported_protocol_is_rejected_by_name() {
        let err = Protocol::try_from(89).unwrap_err();
        assert_eq!(err, UnsupportedProtocol(89));
        assert_eq!(err.to_string(), "unsupported protocol number 89");
    }

    #[test]
    fn supported_protocols_round_trip() {
        for p in [Protocol::Icmp, Protocol::Tcp, Protocol::Udp] {
            assert_eq!(Protocol::try_from(p.number()), Ok(p));
        }
    }

    #[test]
    fn mac_display_is_colon_separated_hex() {
        let mac = MacAddr([0x00, 0x1b, 0x21, 0x3a, 0x4f, 0x5e]);
        assert_eq!(mac.to_string(), "00:1b:21:3a:4f:5e");
    }
}
