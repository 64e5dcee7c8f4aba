//! Router configuration.
//!
//! The router owns one [`RouterInterfaceInit`] slot per interface plus the
//! full destination-indexed transmit fabric. Its config is only complete
//! once every ordered (source, destination) slot, self-pairs included,
//! has been wired.

use crate::{
    require, wire_conn, wire_device, wire_list, wire_region, ComponentInfo, ConfigError,
    NetworkIdentity,
};
use fw_abi::config::{FilterHandle, RouterConfig, RouterInterface};
use fw_abi::{Connection, MAX_FILTERS, MAX_INTERFACES};
use fw_board::Protocol;
use fw_sysdesc::{
    ArpConnectionResource, ConnectionResource, DeviceRegionResource, PdId, RegionResource,
};

/// Everything known about one interface at registration time.
#[derive(Clone, Debug)]
pub struct RouterInterfaceInit {
    pub identity: NetworkIdentity,
    /// Free-buffer return path to the interface's RX virtualizer.
    pub free: ConnectionResource,
    /// The interface's DMA pool as mapped into the router.
    pub data: DeviceRegionResource,
    pub arp: ArpConnectionResource,
    /// Read-only view of the requester-owned ARP cache.
    pub arp_cache: RegionResource,
}

pub struct RouterBuilder {
    info: ComponentInfo,
    interface_count: usize,
    interfaces: Vec<Option<RouterInterfaceInit>>,
    tx_active: Vec<Vec<Option<ConnectionResource>>>,
    filters: Vec<Vec<(Protocol, ConnectionResource)>>,
    packet_wait: Option<RegionResource>,
    rule_server: Option<ConnectionResource>,
    routing_table: Option<RegionResource>,
    routing_capacity: Option<u64>,
    routing_update_ch: Option<u8>,
    icmp: Option<ConnectionResource>,
}

impl RouterBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo, interface_count: usize) -> Self {
        Self {
            info,
            interface_count,
            interfaces: vec![None; interface_count],
            tx_active: vec![vec![None; interface_count]; interface_count],
            filters: vec![Vec::new(); interface_count],
            packet_wait: None,
            rule_server: None,
            routing_table: None,
            routing_capacity: None,
            routing_update_ch: None,
            icmp: None,
        }
    }

    fn check_index(&self, index: usize) -> Result<(), ConfigError> {
        if index >= self.interface_count {
            return Err(ConfigError::BadInterface {
                component: self.info.name.clone(),
                index,
                count: self.interface_count,
            });
        }
        Ok(())
    }

    /// Populate one interface slot. Each slot is registered exactly once.
    pub fn register_interface(
        &mut self,
        index: usize,
        init: RouterInterfaceInit,
    ) -> Result<(), ConfigError> {
        self.check_index(index)?;
        if self.interfaces[index].is_some() {
            return Err(ConfigError::AlreadySet {
                component: self.info.name.clone(),
                field: format!("interface {index}"),
            });
        }
        self.interfaces[index] = Some(init);
        Ok(())
    }

    /// Record the routed-traffic queue from source interface `src` out of
    /// destination interface `dst`.
    pub fn set_tx_active(
        &mut self,
        src: usize,
        dst: usize,
        conn: ConnectionResource,
    ) -> Result<(), ConfigError> {
        self.check_index(src)?;
        self.check_index(dst)?;
        if self.tx_active[src][dst].is_some() {
            return Err(ConfigError::AlreadySet {
                component: self.info.name.clone(),
                field: format!("tx_active[{src}][{dst}]"),
            });
        }
        self.tx_active[src][dst] = Some(conn);
        Ok(())
    }

    /// Attach a protocol filter on the given interface.
    pub fn add_filter(
        &mut self,
        index: usize,
        protocol: Protocol,
        conn: ConnectionResource,
    ) -> Result<(), ConfigError> {
        self.check_index(index)?;
        crate::check_capacity(
            &self.info.name,
            "filters",
            self.filters[index].len(),
            MAX_FILTERS,
        )?;
        self.filters[index].push((protocol, conn));
        Ok(())
    }

    pub fn set_packet_wait(&mut self, region: RegionResource) {
        self.packet_wait = Some(region);
    }

    pub fn set_rule_server(&mut self, conn: ConnectionResource) {
        self.rule_server = Some(conn);
    }

    pub fn set_routing_table(&mut self, region: RegionResource, capacity: u64, update_ch: u8) {
        self.routing_table = Some(region);
        self.routing_capacity = Some(capacity);
        self.routing_update_ch = Some(update_ch);
    }

    pub fn set_icmp(&mut self, conn: ConnectionResource) {
        self.icmp = Some(conn);
    }

    /// Validate completeness and seal the config.
    pub fn finalize(self) -> Result<RouterSealed, ConfigError> {
        let name = &self.info.name;
        if self.interface_count < 2 {
            return Err(ConfigError::TooFew {
                component: name.clone(),
                field: "interfaces".into(),
                need: 2,
                have: self.interface_count,
            });
        }

        let mut interfaces = Vec::with_capacity(self.interface_count);
        for (i, slot) in self.interfaces.into_iter().enumerate() {
            interfaces.push(require(name, &format!("interface {i}"), slot)?);
        }
        let mut tx_active = Vec::with_capacity(self.interface_count);
        for (src, row) in self.tx_active.into_iter().enumerate() {
            let mut out = Vec::with_capacity(row.len());
            for (dst, slot) in row.into_iter().enumerate() {
                out.push(require(name, &format!("tx_active[{src}][{dst}]"), slot)?);
            }
            tx_active.push(out);
        }

        Ok(RouterSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            interfaces,
            tx_active,
            filters: self.filters,
            packet_wait: require(name, "packet_wait", self.packet_wait)?,
            rule_server: require(name, "rule_server", self.rule_server)?,
            routing_table: require(name, "routing_table", self.routing_table)?,
            routing_capacity: require(name, "routing_capacity", self.routing_capacity)?,
            routing_update_ch: require(name, "routing_update_ch", self.routing_update_ch)?,
            icmp: require(name, "icmp", self.icmp)?,
        })
    }
}

/// Immutable router config; every field present.
#[derive(Debug)]
pub struct RouterSealed {
    pub name: String,
    pub pd: PdId,
    pub interfaces: Vec<RouterInterfaceInit>,
    pub tx_active: Vec<Vec<ConnectionResource>>,
    pub filters: Vec<Vec<(Protocol, ConnectionResource)>>,
    pub packet_wait: RegionResource,
    pub rule_server: ConnectionResource,
    pub routing_table: RegionResource,
    pub routing_capacity: u64,
    pub routing_update_ch: u8,
    pub icmp: ConnectionResource,
}

impl RouterSealed {
    pub(crate) fn to_wire(&self) -> Result<RouterConfig, ConfigError> {
        let mut interfaces = Vec::with_capacity(self.interfaces.len());
        for (i, init) in self.interfaces.iter().enumerate() {
            let mut tx_active = [Connection::default(); MAX_INTERFACES];
            for (dst, conn) in self.tx_active[i].iter().enumerate() {
                tx_active[dst] = wire_conn(*conn);
            }
            let filters: Vec<FilterHandle> = self.filters[i]
                .iter()
                .map(|(protocol, conn)| FilterHandle {
                    protocol: u16::from(protocol.number()),
                    conn: wire_conn(*conn),
                })
                .collect();
            interfaces.push(RouterInterface {
                identity: init.identity.to_wire(),
                free: wire_conn(init.free),
                data: wire_device(init.data),
                arp: crate::wire_arp(init.arp),
                arp_cache: wire_region(init.arp_cache),
                tx_active,
                filters: wire_list(&self.name, "filters", &filters)?,
            });
        }
        Ok(RouterConfig {
            packet_wait: wire_region(self.packet_wait),
            rule_server: wire_conn(self.rule_server),
            routing_table: wire_region(self.routing_table),
            routing_capacity: self.routing_capacity,
            routing_update_ch: self.routing_update_ch,
            icmp: wire_conn(self.icmp),
            interfaces: wire_list::<_, { MAX_INTERFACES }>(&self.name, "interfaces", &interfaces)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{arp_conn, conn, device, identity, info, region};

    fn registered_builder(n: usize) -> RouterBuilder {
        let mut b = RouterBuilder::new(info("router"), n);
        for i in 0..n {
            b.register_interface(
                i,
                RouterInterfaceInit {
                    identity: identity(i),
                    free: conn(i as u8),
                    data: device(),
                    arp: arp_conn(10 + i as u8),
                    arp_cache: region(0x500_0000),
                },
            )
            .unwrap();
        }
        for src in 0..n {
            for dst in 0..n {
                b.set_tx_active(src, dst, conn(20 + (src * n + dst) as u8))
                    .unwrap();
            }
        }
        b.set_packet_wait(region(0x800_0000));
        b.set_rule_server(conn(40));
        b.set_routing_table(region(0xA00_0000), 64, 41);
        b.set_icmp(conn(42));
        b
    }

    #[test]
    fn complete_router_finalizes() {
        let sealed = registered_builder(2).finalize().unwrap();
        assert_eq!(sealed.interfaces.len(), 2);
        let wire = sealed.to_wire().unwrap();
        assert_eq!(wire.interfaces.as_slice().len(), 2);
    }

    #[test]
    fn fewer_than_two_interfaces_is_rejected() {
        let b = RouterBuilder::new(info("router"), 1);
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { need: 2, have: 1, .. }));
    }

    #[test]
    fn missing_tx_active_slot_is_named() {
        let mut b = RouterBuilder::new(info("router"), 2);
        for i in 0..2 {
            b.register_interface(
                i,
                RouterInterfaceInit {
                    identity: identity(i),
                    free: conn(i as u8),
                    data: device(),
                    arp: arp_conn(10),
                    arp_cache: region(0x500_0000),
                },
            )
            .unwrap();
        }
        // Only three of the four ordered pairs wired.
        b.set_tx_active(0, 0, conn(20)).unwrap();
        b.set_tx_active(0, 1, conn(21)).unwrap();
        b.set_tx_active(1, 0, conn(22)).unwrap();
        b.set_packet_wait(region(0x800_0000));
        b.set_rule_server(conn(40));
        b.set_routing_table(region(0xA00_0000), 64, 41);
        b.set_icmp(conn(42));

        let err = b.finalize().unwrap_err();
        assert!(
            matches!(err, ConfigError::Missing { ref field, .. } if field == "tx_active[1][1]")
        );
    }

    #[test]
    fn missing_icmp_is_named() {
        let mut b = registered_builder(2);
        b.icmp = None;
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "icmp"));
    }

    #[test]
    fn duplicate_wiring_is_rejected() {
        let mut b = registered_builder(2);
        let err = b.set_tx_active(0, 1, conn(99)).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadySet { .. }));
        let err = b
            .register_interface(
                0,
                RouterInterfaceInit {
                    identity: identity(0),
                    free: conn(0),
                    data: device(),
                    arp: arp_conn(10),
                    arp_cache: region(0x500_0000),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::AlreadySet { .. }));
    }

    #[test]
    fn out_of_range_interface_is_rejected() {
        let mut b = RouterBuilder::new(info("router"), 2);
        let err = b.set_tx_active(0, 2, conn(0)).unwrap_err();
        assert!(matches!(err, ConfigError::BadInterface { index: 2, count: 2, .. }));
    }
}
