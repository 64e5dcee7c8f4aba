//! Rule server (webserver) configuration.
//!
//! The rule server is the only process with write access to the filters'
//! rule tables and to the router's routing table. It also terminates the
//! user-facing traffic the router hands up, so it carries a full data-path
//! attachment to its designated interface.

use crate::{
    require, wire_arp, wire_conn, wire_device, wire_list, wire_region, ComponentInfo,
    ConfigError, NetworkIdentity,
};
use fw_abi::config::{RuleServerConfig, RuleTable};
use fw_abi::{MAX_INTERFACES, MAX_RULE_TABLES};
use fw_board::Protocol;
use fw_sysdesc::{
    ArpConnectionResource, ConnectionResource, DeviceRegionResource, PdId, RegionResource,
};

pub struct RuleServerBuilder {
    info: ComponentInfo,
    interface_count: usize,
    rx_active: Option<ConnectionResource>,
    free: Option<ConnectionResource>,
    data: Option<DeviceRegionResource>,
    arp: Option<ArpConnectionResource>,
    routing: Option<(RegionResource, u64, u8)>,
    interfaces: Vec<NetworkIdentity>,
    tables: Vec<(usize, Protocol, RegionResource, u64, u8)>,
}

impl RuleServerBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo, interface_count: usize) -> Self {
        Self {
            info,
            interface_count,
            rx_active: None,
            free: None,
            data: None,
            arp: None,
            routing: None,
            interfaces: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// Matched traffic from the router.
    pub fn set_rx_active(&mut self, conn: ConnectionResource) {
        self.rx_active = Some(conn);
    }

    /// Buffer return towards the designated interface's RX virtualizer.
    pub fn set_free(&mut self, conn: ConnectionResource) {
        self.free = Some(conn);
    }

    pub fn set_data(&mut self, data: DeviceRegionResource) {
        self.data = Some(data);
    }

    pub fn set_arp(&mut self, conn: ArpConnectionResource) {
        self.arp = Some(conn);
    }

    /// The routing table this process writes, plus the channel used to
    /// tell the router it changed.
    pub fn set_routing_table(&mut self, region: RegionResource, capacity: u64, update_ch: u8) {
        self.routing = Some((region, capacity, update_ch));
    }

    /// One entry per network interface, in index order.
    pub fn add_interface(&mut self, identity: NetworkIdentity) -> Result<(), ConfigError> {
        crate::check_capacity(
            &self.info.name,
            "interfaces",
            self.interfaces.len(),
            MAX_INTERFACES,
        )?;
        self.interfaces.push(identity);
        Ok(())
    }

    /// Write handle to one filter's rule table.
    pub fn add_rule_table(
        &mut self,
        interface: usize,
        protocol: Protocol,
        region: RegionResource,
        capacity: u64,
        filter_ch: u8,
    ) -> Result<(), ConfigError> {
        crate::check_capacity(&self.info.name, "tables", self.tables.len(), MAX_RULE_TABLES)?;
        self.tables
            .push((interface, protocol, region, capacity, filter_ch));
        Ok(())
    }

    pub fn finalize(self) -> Result<RuleServerSealed, ConfigError> {
        let name = &self.info.name;
        if self.interfaces.len() != self.interface_count {
            return Err(ConfigError::TooFew {
                component: name.clone(),
                field: "interfaces".into(),
                need: self.interface_count,
                have: self.interfaces.len(),
            });
        }
        let (routing_table, routing_capacity, routing_update_ch) =
            require(name, "routing_table", self.routing)?;
        Ok(RuleServerSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            rx_active: require(name, "rx_active", self.rx_active)?,
            free: require(name, "free", self.free)?,
            data: require(name, "data", self.data)?,
            arp: require(name, "arp", self.arp)?,
            routing_table,
            routing_capacity,
            routing_update_ch,
            interfaces: self.interfaces,
            tables: self.tables,
        })
    }
}

#[derive(Debug)]
pub struct RuleServerSealed {
    pub name: String,
    pub pd: PdId,
    pub rx_active: ConnectionResource,
    pub free: ConnectionResource,
    pub data: DeviceRegionResource,
    pub arp: ArpConnectionResource,
    pub routing_table: RegionResource,
    pub routing_capacity: u64,
    pub routing_update_ch: u8,
    pub interfaces: Vec<NetworkIdentity>,
    pub tables: Vec<(usize, Protocol, RegionResource, u64, u8)>,
}

impl RuleServerSealed {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn to_wire(&self) -> Result<RuleServerConfig, ConfigError> {
        let interfaces: Vec<_> = self.interfaces.iter().map(|i| i.to_wire()).collect();
        let tables: Vec<_> = self
            .tables
            .iter()
            .map(
                |&(interface, protocol, region, capacity, filter_ch)| RuleTable {
                    interface: interface as u32,
                    protocol: u16::from(protocol.number()),
                    region: wire_region(region),
                    capacity,
                    filter_ch,
                },
            )
            .collect();
        Ok(RuleServerConfig {
            rx_active: wire_conn(self.rx_active),
            free: wire_conn(self.free),
            data: wire_device(self.data),
            arp: wire_arp(self.arp),
            routing_table: wire_region(self.routing_table),
            routing_capacity: self.routing_capacity,
            routing_update_ch: self.routing_update_ch,
            interfaces: wire_list(&self.name, "interfaces", &interfaces)?,
            tables: wire_list(&self.name, "tables", &tables)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{arp_conn, conn, device, identity, info, region};

    fn complete_builder() -> RuleServerBuilder {
        let mut b = RuleServerBuilder::new(info("rule_server"), 2);
        b.set_rx_active(conn(0));
        b.set_free(conn(1));
        b.set_data(device());
        b.set_arp(arp_conn(2));
        b.set_routing_table(region(0xA00_0000), 64, 3);
        b.add_interface(identity(0)).unwrap();
        b.add_interface(identity(1)).unwrap();
        for (i, p) in [Protocol::Icmp, Protocol::Tcp, Protocol::Udp]
            .into_iter()
            .enumerate()
        {
            b.add_rule_table(0, p, region(0xB00_0000), 256, 4 + i as u8)
                .unwrap();
            b.add_rule_table(1, p, region(0xC00_0000), 256, 7 + i as u8)
                .unwrap();
        }
        b
    }

    #[test]
    fn complete_rule_server_seals() {
        let sealed = complete_builder().finalize().unwrap();
        let wire = sealed.to_wire().unwrap();
        assert_eq!(wire.interfaces.as_slice().len(), 2);
        assert_eq!(wire.tables.as_slice().len(), 6);
        assert_eq!(wire.routing_capacity, 64);
    }

    #[test]
    fn one_interface_entry_per_interface_is_required() {
        let mut b = RuleServerBuilder::new(info("rule_server"), 2);
        b.set_rx_active(conn(0));
        b.set_free(conn(1));
        b.set_data(device());
        b.set_arp(arp_conn(2));
        b.set_routing_table(region(0xA00_0000), 64, 3);
        b.add_interface(identity(0)).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { need: 2, have: 1, .. }));
    }

    #[test]
    fn missing_arp_wiring_is_named() {
        let mut b = complete_builder();
        b.arp = None;
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "arp"));
    }
}
