//! Protocol filter configuration.
//!
//! A filter sits between an RX virtualizer and the router for exactly one
//! transport protocol on one interface. Construction fails immediately for
//! a protocol number outside the supported set.

use crate::{
    require, wire_conn, wire_device, wire_list, wire_region, ComponentInfo, ConfigError,
};
use fw_abi::config::{FilterConfig, InstancePair};
use fw_abi::MAX_INSTANCE_PEERS;
use fw_board::Protocol;
use fw_sysdesc::{ConnectionResource, DeviceRegionResource, PdId, RegionResource};

/// Default verdict when no rule matches.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DefaultAction {
    Drop = 0,
    Allow = 1,
}

/// Instance-state visibility towards one peer interface.
#[derive(Copy, Clone, Debug)]
pub struct InstancePairView {
    pub peer: usize,
    /// Our live state, mapped write-only here, read-only at the peer.
    pub publish: RegionResource,
    /// The peer's live state, read-only here.
    pub subscribe: RegionResource,
}

#[derive(Debug)]
pub struct FilterBuilder {
    info: ComponentInfo,
    protocol: Protocol,
    peer_count: usize,
    default_action: DefaultAction,
    router: Option<ConnectionResource>,
    rx: Option<(ConnectionResource, DeviceRegionResource)>,
    rules: Option<(RegionResource, u64)>,
    rule_bitmap: Option<RegionResource>,
    rule_server_ch: Option<u8>,
    instance_capacity: Option<u64>,
    instances: Vec<InstancePairView>,
}

impl FilterBuilder {
    /// `protocol` is the raw IPv4 protocol number; unsupported numbers are
    /// rejected here, before any resource is allocated for the filter.
    pub fn new(
        info: ComponentInfo,
        protocol: u8,
        interface_count: usize,
    ) -> Result<Self, ConfigError> {
        let protocol = Protocol::try_from(protocol)?;
        Ok(Self {
            info,
            protocol,
            peer_count: interface_count.saturating_sub(1),
            default_action: DefaultAction::Drop,
            router: None,
            rx: None,
            rules: None,
            rule_bitmap: None,
            rule_server_ch: None,
            instance_capacity: None,
            instances: Vec::new(),
        })
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn set_default_action(&mut self, action: DefaultAction) {
        self.default_action = action;
    }

    pub fn set_router(&mut self, conn: ConnectionResource) {
        self.router = Some(conn);
    }

    pub fn set_rx(&mut self, conn: ConnectionResource, data: DeviceRegionResource) {
        self.rx = Some((conn, data));
    }

    /// The rule table written by the rule server, read here.
    pub fn set_rules(&mut self, region: RegionResource, capacity: u64) {
        self.rules = Some((region, capacity));
    }

    pub fn set_rule_bitmap(&mut self, region: RegionResource) {
        self.rule_bitmap = Some(region);
    }

    pub fn set_rule_server_channel(&mut self, ch: u8) {
        self.rule_server_ch = Some(ch);
    }

    pub fn set_instance_capacity(&mut self, capacity: u64) {
        self.instance_capacity = Some(capacity);
    }

    pub fn add_instance_pair(&mut self, pair: InstancePairView) -> Result<(), ConfigError> {
        crate::check_capacity(
            &self.info.name,
            "instances",
            self.instances.len(),
            MAX_INSTANCE_PEERS,
        )?;
        self.instances.push(pair);
        Ok(())
    }

    pub fn finalize(self) -> Result<FilterSealed, ConfigError> {
        let name = &self.info.name;
        if self.instances.len() != self.peer_count {
            return Err(ConfigError::TooFew {
                component: name.clone(),
                field: "instances".into(),
                need: self.peer_count,
                have: self.instances.len(),
            });
        }
        let (rules, rule_capacity) = require(name, "rules", self.rules)?;
        let (rx, rx_data) = require(name, "rx", self.rx)?;
        Ok(FilterSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            protocol: self.protocol,
            default_action: self.default_action,
            router: require(name, "router", self.router)?,
            rx,
            rx_data,
            rules,
            rule_capacity,
            rule_bitmap: require(name, "rule_bitmap", self.rule_bitmap)?,
            rule_server_ch: require(name, "rule_server_ch", self.rule_server_ch)?,
            instance_capacity: require(name, "instance_capacity", self.instance_capacity)?,
            instances: self.instances,
        })
    }
}

#[derive(Debug)]
pub struct FilterSealed {
    pub name: String,
    pub pd: PdId,
    pub protocol: Protocol,
    pub default_action: DefaultAction,
    pub router: ConnectionResource,
    pub rx: ConnectionResource,
    pub rx_data: DeviceRegionResource,
    pub rules: RegionResource,
    pub rule_capacity: u64,
    pub rule_bitmap: RegionResource,
    pub rule_server_ch: u8,
    pub instance_capacity: u64,
    pub instances: Vec<InstancePairView>,
}

impl FilterSealed {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn to_wire(&self) -> Result<FilterConfig, ConfigError> {
        let instances: Vec<_> = self
            .instances
            .iter()
            .map(|pair| InstancePair {
                peer: pair.peer as u32,
                publish: wire_region(pair.publish),
                subscribe: wire_region(pair.subscribe),
            })
            .collect();
        Ok(FilterConfig {
            protocol: u16::from(self.protocol.number()),
            default_action: self.default_action as u8,
            router: wire_conn(self.router),
            rx: wire_conn(self.rx),
            rx_data: wire_device(self.rx_data),
            rules: wire_region(self.rules),
            rule_capacity: self.rule_capacity,
            rule_bitmap: wire_region(self.rule_bitmap),
            rule_server_ch: self.rule_server_ch,
            instance_capacity: self.instance_capacity,
            instances: wire_list(&self.name, "instances", &instances)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{conn, device, info, region};

    fn complete_builder() -> FilterBuilder {
        let mut b = FilterBuilder::new(info("filter_tcp0"), 6, 2).unwrap();
        b.set_router(conn(0));
        b.set_rx(conn(1), device());
        b.set_rules(region(0x400_0000), 256);
        b.set_rule_bitmap(region(0x500_0000));
        b.set_rule_server_channel(2);
        b.set_instance_capacity(512);
        b.add_instance_pair(InstancePairView {
            peer: 1,
            publish: region(0x600_0000),
            subscribe: region(0x600_5000),
        })
        .unwrap();
        b
    }

    #[test]
    fn unsupported_protocol_fails_construction() {
        let err = FilterBuilder::new(info("filter_ospf0"), 89, 2).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedProtocol(fw_board::UnsupportedProtocol(89))
        ));
    }

    #[test]
    fn complete_filter_seals() {
        let sealed = complete_builder().finalize().unwrap();
        assert_eq!(sealed.protocol, Protocol::Tcp);
        let wire = sealed.to_wire().unwrap();
        assert_eq!(wire.protocol, 6);
        assert_eq!(wire.instances.as_slice().len(), 1);
    }

    #[test]
    fn one_instance_pair_per_peer_is_required() {
        let mut b = FilterBuilder::new(info("filter_tcp0"), 6, 3).unwrap();
        b.set_router(conn(0));
        b.set_rx(conn(1), device());
        b.set_rules(region(0x400_0000), 256);
        b.set_rule_bitmap(region(0x500_0000));
        b.set_rule_server_channel(2);
        b.set_instance_capacity(512);
        b.add_instance_pair(InstancePairView {
            peer: 1,
            publish: region(0x600_0000),
            subscribe: region(0x600_5000),
        })
        .unwrap();
        // Three interfaces means two peers; only one pair wired.
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { need: 2, have: 1, .. }));
    }

    #[test]
    fn withheld_rule_wiring_is_named() {
        let mut b = FilterBuilder::new(info("filter_udp1"), 17, 2).unwrap();
        b.set_router(conn(0));
        b.set_rx(conn(1), device());
        b.set_rule_bitmap(region(0x500_0000));
        b.set_rule_server_channel(2);
        b.set_instance_capacity(512);
        b.add_instance_pair(InstancePairView {
            peer: 0,
            publish: region(0x600_0000),
            subscribe: region(0x600_5000),
        })
        .unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "rules"));
    }
}
