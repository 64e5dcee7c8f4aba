//! Address-resolution agent configurations.
//!
//! The requester answers "what MAC owns this IP" for the router and the
//! rule server, keeps the answers in a cache it owns, and speaks ARP on
//! the wire through the interface's virtualizers. The responder only
//! answers requests addressed to the firewall itself.

use crate::{
    require, require_some, wire_arp, wire_conn, wire_device, wire_list, wire_region,
    ComponentInfo, ConfigError, NetworkIdentity,
};
use fw_abi::config::{ArpRequesterConfig, ArpResponderConfig};
use fw_abi::MAX_ARP_CLIENTS;
use fw_sysdesc::{ArpConnectionResource, ConnectionResource, DeviceRegionResource, PdId, RegionResource};

pub struct ArpRequesterBuilder {
    info: ComponentInfo,
    identity: NetworkIdentity,
    cache: Option<(RegionResource, u64)>,
    rx: Option<(ConnectionResource, DeviceRegionResource)>,
    tx: Option<(ConnectionResource, DeviceRegionResource)>,
    clients: Vec<ArpConnectionResource>,
}

impl ArpRequesterBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo, identity: NetworkIdentity) -> Self {
        Self {
            info,
            identity,
            cache: None,
            rx: None,
            tx: None,
            clients: Vec::new(),
        }
    }

    /// The requester-owned cache region and its entry capacity.
    pub fn set_cache(&mut self, region: RegionResource, capacity: u64) {
        self.cache = Some((region, capacity));
    }

    /// ARP replies classified to us by the RX virtualizer.
    pub fn set_rx(&mut self, conn: ConnectionResource, data: DeviceRegionResource) {
        self.rx = Some((conn, data));
    }

    /// Outgoing requests towards the TX virtualizer.
    pub fn set_tx(&mut self, conn: ConnectionResource, data: DeviceRegionResource) {
        self.tx = Some((conn, data));
    }

    /// Register a resolution client (router, rule server).
    pub fn add_client(&mut self, conn: ArpConnectionResource) -> Result<(), ConfigError> {
        crate::check_capacity(&self.info.name, "clients", self.clients.len(), MAX_ARP_CLIENTS)?;
        self.clients.push(conn);
        Ok(())
    }

    pub fn finalize(self) -> Result<ArpRequesterSealed, ConfigError> {
        let name = &self.info.name;
        require_some(name, "clients", 1, &self.clients)?;
        let (cache, cache_capacity) = require(name, "cache", self.cache)?;
        let (rx, rx_data) = require(name, "rx", self.rx)?;
        let (tx, tx_data) = require(name, "tx", self.tx)?;
        Ok(ArpRequesterSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            identity: self.identity,
            cache,
            cache_capacity,
            rx,
            rx_data,
            tx,
            tx_data,
            clients: self.clients,
        })
    }
}

#[derive(Debug)]
pub struct ArpRequesterSealed {
    pub name: String,
    pub pd: PdId,
    pub identity: NetworkIdentity,
    pub cache: RegionResource,
    pub cache_capacity: u64,
    pub rx: ConnectionResource,
    pub rx_data: DeviceRegionResource,
    pub tx: ConnectionResource,
    pub tx_data: DeviceRegionResource,
    pub clients: Vec<ArpConnectionResource>,
}

impl ArpRequesterSealed {
    pub(crate) fn to_wire(&self) -> Result<ArpRequesterConfig, ConfigError> {
        let clients: Vec<_> = self.clients.iter().map(|c| wire_arp(*c)).collect();
        Ok(ArpRequesterConfig {
            identity: self.identity.to_wire(),
            cache: wire_region(self.cache),
            cache_capacity: self.cache_capacity,
            rx: wire_conn(self.rx),
            rx_data: wire_device(self.rx_data),
            tx: wire_conn(self.tx),
            tx_data: wire_device(self.tx_data),
            clients: wire_list(&self.name, "clients", &clients)?,
        })
    }
}

pub struct ArpResponderBuilder {
    info: ComponentInfo,
    identity: NetworkIdentity,
    rx: Option<(ConnectionResource, DeviceRegionResource)>,
    tx: Option<(ConnectionResource, DeviceRegionResource)>,
}

impl ArpResponderBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo, identity: NetworkIdentity) -> Self {
        Self {
            info,
            identity,
            rx: None,
            tx: None,
        }
    }

    pub fn set_rx(&mut self, conn: ConnectionResource, data: DeviceRegionResource) {
        self.rx = Some((conn, data));
    }

    pub fn set_tx(&mut self, conn: ConnectionResource, data: DeviceRegionResource) {
        self.tx = Some((conn, data));
    }

    pub fn finalize(self) -> Result<ArpResponderSealed, ConfigError> {
        let name = &self.info.name;
        let (rx, rx_data) = require(name, "rx", self.rx)?;
        let (tx, tx_data) = require(name, "tx", self.tx)?;
        Ok(ArpResponderSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            identity: self.identity,
            rx,
            rx_data,
            tx,
            tx_data,
        })
    }
}

#[derive(Debug)]
pub struct ArpResponderSealed {
    pub name: String,
    pub pd: PdId,
    pub identity: NetworkIdentity,
    pub rx: ConnectionResource,
    pub rx_data: DeviceRegionResource,
    pub tx: ConnectionResource,
    pub tx_data: DeviceRegionResource,
}

impl ArpResponderSealed {
    pub(crate) fn to_wire(&self) -> ArpResponderConfig {
        ArpResponderConfig {
            identity: self.identity.to_wire(),
            rx: wire_conn(self.rx),
            rx_data: wire_device(self.rx_data),
            tx: wire_conn(self.tx),
            tx_data: wire_device(self.tx_data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{arp_conn, conn, device, identity, info, region};

    #[test]
    fn requester_needs_a_client_and_a_cache() {
        let mut b = ArpRequesterBuilder::new(info("arp_requester0"), identity(0));
        b.set_cache(region(0x500_0000), 512);
        b.set_rx(conn(0), device());
        b.set_tx(conn(1), device());
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { ref field, .. } if field == "clients"));

        let mut b = ArpRequesterBuilder::new(info("arp_requester0"), identity(0));
        b.set_rx(conn(0), device());
        b.set_tx(conn(1), device());
        b.add_client(arp_conn(2)).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "cache"));
    }

    #[test]
    fn complete_requester_seals() {
        let mut b = ArpRequesterBuilder::new(info("arp_requester0"), identity(0));
        b.set_cache(region(0x500_0000), 512);
        b.set_rx(conn(0), device());
        b.set_tx(conn(1), device());
        b.add_client(arp_conn(2)).unwrap();
        b.add_client(arp_conn(3)).unwrap();
        let sealed = b.finalize().unwrap();
        let wire = sealed.to_wire().unwrap();
        assert_eq!(wire.cache_capacity, 512);
        assert_eq!(wire.clients.as_slice().len(), 2);
    }

    #[test]
    fn responder_requires_both_paths() {
        let mut b = ArpResponderBuilder::new(info("arp_responder0"), identity(0));
        b.set_rx(conn(0), device());
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "tx"));
    }
}
