//! Record of everything the orchestrator wired.
//!
//! Feeds the topology graph and lets tests pin the fabric counts without
//! reparsing the system description.

use fw_sysdesc::{PdId, Perms};

/// What a queue connection carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionKind {
    /// Router returning spent buffers to an RX virtualizer.
    FreePath,
    /// RX virtualizer handing classified ARP frames to an agent.
    ArpClassify,
    /// ARP agent transmitting through a TX virtualizer.
    ArpTransmit,
    /// RX virtualizer handing classified transport traffic to a filter.
    FilterClassify,
    /// Filter forwarding allowed traffic to the router.
    FilterRouter,
    /// Routed traffic: router towards a destination TX virtualizer.
    Forward,
    /// Buffer return: destination TX virtualizer back to the source RX.
    Return,
    /// Request/response address resolution.
    Arp,
    /// Matched traffic handed up to the rule server.
    RuleServerData,
    /// Rule server returning buffers to its designated interface.
    RuleServerReturn,
    /// Error-triggering traffic handed to the ICMP responder.
    IcmpData,
    /// ICMP responder transmitting through a TX virtualizer.
    IcmpTransmit,
}

impl ConnectionKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FreePath => "free",
            Self::ArpClassify => "arp-rx",
            Self::ArpTransmit => "arp-tx",
            Self::FilterClassify => "classify",
            Self::FilterRouter => "filter",
            Self::Forward => "forward",
            Self::Return => "return",
            Self::Arp => "arp",
            Self::RuleServerData => "rule-server",
            Self::RuleServerReturn => "rule-server-free",
            Self::IcmpData => "icmp",
            Self::IcmpTransmit => "icmp-tx",
        }
    }
}

/// What a standalone shared or private region holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    DmaPool,
    ArpCache,
    RuleTable,
    RuleBitmap,
    Instances,
    RoutingTable,
    PacketWait,
}

impl RegionKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DmaPool => "dma-pool",
            Self::ArpCache => "arp-cache",
            Self::RuleTable => "rules",
            Self::RuleBitmap => "rule-bitmap",
            Self::Instances => "instances",
            Self::RoutingTable => "routing",
            Self::PacketWait => "packet-wait",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub kind: ConnectionKind,
    pub a: PdId,
    pub b: PdId,
    pub region: String,
    pub ch_a: u8,
    pub ch_b: u8,
}

#[derive(Clone, Debug)]
pub struct RegionRecord {
    pub kind: RegionKind,
    pub name: String,
    pub owner: PdId,
    pub owner_perms: Perms,
    pub peer: Option<(PdId, Perms)>,
}

/// Everything wired during one build, in creation order.
#[derive(Default, Debug)]
pub struct WiringLog {
    connections: Vec<ConnectionRecord>,
    regions: Vec<RegionRecord>,
}

impl WiringLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(
        &mut self,
        kind: ConnectionKind,
        a: PdId,
        b: PdId,
        region: &str,
        ch_a: u8,
        ch_b: u8,
    ) {
        log::debug!("wired {} over `{region}` ({ch_a}:{ch_b})", kind.label());
        self.connections.push(ConnectionRecord {
            kind,
            a,
            b,
            region: region.into(),
            ch_a,
            ch_b,
        });
    }

    pub fn region(
        &mut self,
        kind: RegionKind,
        name: &str,
        owner: PdId,
        owner_perms: Perms,
        peer: Option<(PdId, Perms)>,
    ) {
        self.regions.push(RegionRecord {
            kind,
            name: name.into(),
            owner,
            owner_perms,
            peer,
        });
    }

    #[must_use]
    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    #[must_use]
    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    #[must_use]
    pub fn count_connections(&self, kind: ConnectionKind) -> usize {
        self.connections.iter().filter(|c| c.kind == kind).count()
    }

    #[must_use]
    pub fn count_regions(&self, kind: RegionKind) -> usize {
        self.regions.iter().filter(|r| r.kind == kind).count()
    }
}
