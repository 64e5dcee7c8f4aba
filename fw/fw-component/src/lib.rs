//! # Component Model
//!
//! Every process of the generated firewall is a component: a named,
//! scheduled protection domain plus a role-specific configuration record
//! built up incrementally during wiring.
//!
//! Each role has a builder with setters the orchestrator calls as it
//! creates connections and regions, and a single validating `finalize`
//! that checks every required field and returns the sealed, immutable
//! config. `finalize` consumes the builder, so configuring after the
//! transition (or finalizing twice) is rejected by the type system
//! rather than at runtime. A missing field is a completeness error naming
//! the component and the field; there are no silent defaults.
//!
//! Sealed configs convert into the [`fw_abi`] wire records exhaustively
//! through [`RoleConfig::serialize`].

mod arp;
mod filter;
mod icmp;
mod router;
mod rule_server;
mod virt;

pub use arp::{
    ArpRequesterBuilder, ArpRequesterSealed, ArpResponderBuilder, ArpResponderSealed,
};
pub use filter::{DefaultAction, FilterBuilder, FilterSealed, InstancePairView};
pub use icmp::{IcmpBuilder, IcmpSealed};
pub use router::{RouterBuilder, RouterInterfaceInit, RouterSealed};
pub use rule_server::{RuleServerBuilder, RuleServerSealed};
pub use virt::{NetVirtRxBuilder, NetVirtRxSealed, NetVirtTxBuilder, NetVirtTxSealed};

use fw_abi::config::pack;
use fw_abi::{AbiError, Wire};
use fw_board::MacAddr;
use fw_sysdesc::{
    ArpConnectionResource, ConnectionResource, DeviceRegionResource, PdId, RegionResource,
    SchedParams, SysDescError, SystemDescription,
};

/// Identity of a spawned component: its protection domain and name.
#[derive(Clone, Debug)]
pub struct ComponentInfo {
    pub pd: PdId,
    pub name: String,
}

/// Register a component's protection domain with the system description.
pub fn spawn(
    sys: &mut SystemDescription,
    name: &str,
    program_image: &str,
    sched: SchedParams,
) -> Result<ComponentInfo, SysDescError> {
    let pd = sys.add_protection_domain(name, program_image, sched)?;
    log::debug!("spawned {name} ({program_image}, priority {})", sched.priority);
    Ok(ComponentInfo {
        pd,
        name: name.into(),
    })
}

/// Network identity of one interface as the builders carry it.
#[derive(Copy, Clone, Debug)]
pub struct NetworkIdentity {
    pub mac: MacAddr,
    pub ip: core::net::Ipv4Addr,
    pub subnet_len: u8,
}

impl NetworkIdentity {
    pub(crate) fn to_wire(self) -> fw_abi::NetIdentity {
        fw_abi::NetIdentity {
            mac: self.mac.octets(),
            ip: u32::from_le_bytes(self.ip.octets()),
            subnet_len: self.subnet_len,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("component `{component}`: required field `{field}` is not set")]
    Missing { component: String, field: String },
    #[error("component `{component}`: field `{field}` is already set")]
    AlreadySet { component: String, field: String },
    #[error("component `{component}`: `{field}` needs at least {need}, has {have}")]
    TooFew {
        component: String,
        field: String,
        need: usize,
        have: usize,
    },
    #[error("component `{component}`: `{field}` exceeds its capacity of {max}")]
    Overflow {
        component: String,
        field: String,
        max: usize,
    },
    #[error("component `{component}`: interface index {index} out of range ({count} interfaces)")]
    BadInterface {
        component: String,
        index: usize,
        count: usize,
    },
    #[error(transparent)]
    UnsupportedProtocol(#[from] fw_board::UnsupportedProtocol),
}

pub(crate) fn require<T>(
    component: &str,
    field: &str,
    value: Option<T>,
) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing {
        component: component.into(),
        field: field.into(),
    })
}

pub(crate) fn require_some<T>(
    component: &str,
    field: &str,
    need: usize,
    items: &[T],
) -> Result<(), ConfigError> {
    if items.len() < need {
        return Err(ConfigError::TooFew {
            component: component.into(),
            field: field.into(),
            need,
            have: items.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_capacity(
    component: &str,
    field: &str,
    len: usize,
    max: usize,
) -> Result<(), ConfigError> {
    if len >= max {
        return Err(ConfigError::Overflow {
            component: component.into(),
            field: field.into(),
            max,
        });
    }
    Ok(())
}

pub(crate) fn wire_list<T: Wire, const N: usize>(
    component: &str,
    field: &str,
    items: &[T],
) -> Result<fw_abi::ClientList<T, N>, ConfigError> {
    fw_abi::ClientList::from_slice(items).map_err(|err| match err {
        AbiError::CountOutOfRange { max, .. } => ConfigError::Overflow {
            component: component.into(),
            field: field.into(),
            max: max as usize,
        },
        _ => ConfigError::Overflow {
            component: component.into(),
            field: field.into(),
            max: N,
        },
    })
}

pub(crate) fn wire_region(r: RegionResource) -> fw_abi::RegionResource {
    fw_abi::RegionResource {
        vaddr: r.vaddr,
        size: r.size,
    }
}

pub(crate) fn wire_device(d: DeviceRegionResource) -> fw_abi::DeviceRegion {
    fw_abi::DeviceRegion {
        vaddr: d.vaddr,
        io_addr: d.io_addr,
        size: d.size,
    }
}

pub(crate) fn wire_conn(c: ConnectionResource) -> fw_abi::Connection {
    fw_abi::Connection {
        queue: wire_region(c.queue),
        capacity: c.capacity,
        ch: c.ch,
    }
}

pub(crate) fn wire_arp(c: ArpConnectionResource) -> fw_abi::ArpConnection {
    fw_abi::ArpConnection {
        request: wire_region(c.request),
        response: wire_region(c.response),
        capacity: c.capacity,
        ch: c.ch,
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! Shared fixtures for the role builder tests.

    use super::*;
    use fw_board::MacAddr;
    use fw_sysdesc::SystemDescription;

    pub(crate) fn info(name: &str) -> ComponentInfo {
        let mut sys = SystemDescription::new();
        spawn(
            &mut sys,
            name,
            "fixture.elf",
            SchedParams::with_priority(1),
        )
        .unwrap()
    }

    pub(crate) fn region(vaddr: u64) -> RegionResource {
        RegionResource {
            vaddr,
            size: 0x1000,
        }
    }

    pub(crate) fn conn(ch: u8) -> ConnectionResource {
        ConnectionResource {
            queue: region(0x200_0000 + u64::from(ch) * 0x1_0000),
            capacity: 512,
            ch,
        }
    }

    pub(crate) fn arp_conn(ch: u8) -> ArpConnectionResource {
        ArpConnectionResource {
            request: region(0x400_0000),
            response: region(0x400_1000),
            capacity: 128,
            ch,
        }
    }

    pub(crate) fn device() -> DeviceRegionResource {
        DeviceRegionResource {
            vaddr: 0x300_0000,
            io_addr: 0x5800_0000,
            size: 0x20_0000,
        }
    }

    pub(crate) fn identity(index: usize) -> NetworkIdentity {
        NetworkIdentity {
            mac: MacAddr([0, 4, 0x9f, 5, 0x28, 0x31 + index as u8]),
            ip: core::net::Ipv4Addr::new(192, 168, index as u8, 1),
            subnet_len: 24,
        }
    }
}

/// Every sealed config, tagged by role, so serialization matches
/// exhaustively instead of probing for attributes.
#[derive(Debug)]
pub enum RoleConfig {
    Router(RouterSealed),
    RuleServer(RuleServerSealed),
    ArpRequester(ArpRequesterSealed),
    ArpResponder(ArpResponderSealed),
    NetVirtRx(NetVirtRxSealed),
    NetVirtTx(NetVirtTxSealed),
    Filter(FilterSealed),
    Icmp(IcmpSealed),
}

impl RoleConfig {
    #[must_use]
    pub fn component_name(&self) -> &str {
        match self {
            Self::Router(c) => &c.name,
            Self::RuleServer(c) => &c.name,
            Self::ArpRequester(c) => &c.name,
            Self::ArpResponder(c) => &c.name,
            Self::NetVirtRx(c) => &c.name,
            Self::NetVirtTx(c) => &c.name,
            Self::Filter(c) => &c.name,
            Self::Icmp(c) => &c.name,
        }
    }

    #[must_use]
    pub const fn pd(&self) -> PdId {
        match self {
            Self::Router(c) => c.pd,
            Self::RuleServer(c) => c.pd,
            Self::ArpRequester(c) => c.pd,
            Self::ArpResponder(c) => c.pd,
            Self::NetVirtRx(c) => c.pd,
            Self::NetVirtTx(c) => c.pd,
            Self::Filter(c) => c.pd,
            Self::Icmp(c) => c.pd,
        }
    }

    /// Pack the config into the exact byte layout its binary consumes.
    pub fn serialize(&self) -> Result<Vec<u8>, ConfigError> {
        match self {
            Self::Router(c) => Ok(pack(&c.to_wire()?)),
            Self::RuleServer(c) => Ok(pack(&c.to_wire()?)),
            Self::ArpRequester(c) => Ok(pack(&c.to_wire()?)),
            Self::ArpResponder(c) => Ok(pack(&c.to_wire())),
            Self::NetVirtRx(c) => Ok(pack(&c.to_wire()?)),
            Self::NetVirtTx(c) => Ok(pack(&c.to_wire()?)),
            Self::Filter(c) => Ok(pack(&c.to_wire()?)),
            Self::Icmp(c) => Ok(pack(&c.to_wire()?)),
        }
    }
}
