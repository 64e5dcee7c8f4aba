//! Link virtualizer configurations.
//!
//! The RX virtualizer classifies inbound frames by (ethertype, subtype)
//! and owns the interface's DMA pool; the TX virtualizer multiplexes
//! transmit clients and returns spent buffers to the pool they came from.

use crate::{
    require, require_some, wire_conn, wire_device, wire_list, ComponentInfo, ConfigError,
};
use fw_abi::config::{NetVirtRxConfig, NetVirtTxConfig, RxClassifier, TxClient};
use fw_abi::{MAX_CLIENTS, MAX_FILTERS};
use fw_sysdesc::{ConnectionResource, DeviceRegionResource, PdId};

pub struct NetVirtRxBuilder {
    info: ComponentInfo,
    data: Option<DeviceRegionResource>,
    free_clients: Vec<ConnectionResource>,
    classifiers: Vec<(u16, u16, ConnectionResource)>,
}

impl NetVirtRxBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo) -> Self {
        Self {
            info,
            data: None,
            free_clients: Vec::new(),
            classifiers: Vec::new(),
        }
    }

    /// The interface's own DMA pool.
    pub fn set_data(&mut self, data: DeviceRegionResource) {
        self.data = Some(data);
    }

    /// Register a peer that returns spent buffers to this pool.
    pub fn add_free_client(&mut self, conn: ConnectionResource) -> Result<(), ConfigError> {
        crate::check_capacity(
            &self.info.name,
            "free_clients",
            self.free_clients.len(),
            MAX_CLIENTS,
        )?;
        self.free_clients.push(conn);
        Ok(())
    }

    /// Register the consumer of frames matching (ethertype, subtype).
    pub fn register_classifier(
        &mut self,
        ethertype: u16,
        subtype: u16,
        conn: ConnectionResource,
    ) -> Result<(), ConfigError> {
        crate::check_capacity(
            &self.info.name,
            "classifiers",
            self.classifiers.len(),
            MAX_FILTERS,
        )?;
        self.classifiers.push((ethertype, subtype, conn));
        Ok(())
    }

    pub fn finalize(self) -> Result<NetVirtRxSealed, ConfigError> {
        let name = &self.info.name;
        require_some(name, "free_clients", 1, &self.free_clients)?;
        require_some(name, "classifiers", 1, &self.classifiers)?;
        Ok(NetVirtRxSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            data: require(name, "data", self.data)?,
            free_clients: self.free_clients,
            classifiers: self.classifiers,
        })
    }
}

#[derive(Debug)]
pub struct NetVirtRxSealed {
    pub name: String,
    pub pd: PdId,
    pub data: DeviceRegionResource,
    pub free_clients: Vec<ConnectionResource>,
    pub classifiers: Vec<(u16, u16, ConnectionResource)>,
}

impl NetVirtRxSealed {
    pub(crate) fn to_wire(&self) -> Result<NetVirtRxConfig, ConfigError> {
        let free: Vec<_> = self.free_clients.iter().map(|c| wire_conn(*c)).collect();
        let classifiers: Vec<_> = self
            .classifiers
            .iter()
            .map(|&(ethertype, subtype, conn)| RxClassifier {
                ethertype,
                subtype,
                conn: wire_conn(conn),
            })
            .collect();
        Ok(NetVirtRxConfig {
            data: wire_device(self.data),
            free_clients: wire_list(&self.name, "free_clients", &free)?,
            classifiers: wire_list(&self.name, "classifiers", &classifiers)?,
        })
    }
}

pub struct NetVirtTxBuilder {
    info: ComponentInfo,
    active: Vec<(ConnectionResource, DeviceRegionResource)>,
    free: Vec<(ConnectionResource, DeviceRegionResource)>,
}

impl NetVirtTxBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo) -> Self {
        Self {
            info,
            active: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Register a transmit client together with the pool its descriptors
    /// point into.
    pub fn add_active_client(
        &mut self,
        conn: ConnectionResource,
        data: DeviceRegionResource,
    ) -> Result<(), ConfigError> {
        crate::check_capacity(&self.info.name, "active", self.active.len(), MAX_CLIENTS)?;
        self.active.push((conn, data));
        Ok(())
    }

    /// Register a buffer-return destination, reusing an already-mapped
    /// pool view.
    pub fn add_free_client(
        &mut self,
        conn: ConnectionResource,
        data: DeviceRegionResource,
    ) -> Result<(), ConfigError> {
        crate::check_capacity(&self.info.name, "free", self.free.len(), MAX_CLIENTS)?;
        self.free.push((conn, data));
        Ok(())
    }

    pub fn finalize(self) -> Result<NetVirtTxSealed, ConfigError> {
        let name = &self.info.name;
        require_some(name, "active", 1, &self.active)?;
        require_some(name, "free", 1, &self.free)?;
        if !self.active.iter().any(|(_, d)| d.size > 0) {
            return Err(ConfigError::Missing {
                component: name.clone(),
                field: "data region".into(),
            });
        }
        Ok(NetVirtTxSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            active: self.active,
            free: self.free,
        })
    }
}

#[derive(Debug)]
pub struct NetVirtTxSealed {
    pub name: String,
    pub pd: PdId,
    pub active: Vec<(ConnectionResource, DeviceRegionResource)>,
    pub free: Vec<(ConnectionResource, DeviceRegionResource)>,
}

impl NetVirtTxSealed {
    pub(crate) fn to_wire(&self) -> Result<NetVirtTxConfig, ConfigError> {
        let clients = |items: &[(ConnectionResource, DeviceRegionResource)]| -> Vec<TxClient> {
            items
                .iter()
                .map(|&(conn, data)| TxClient {
                    conn: wire_conn(conn),
                    data: wire_device(data),
                })
                .collect()
        };
        Ok(NetVirtTxConfig {
            active: wire_list(&self.name, "active", &clients(&self.active))?,
            free: wire_list(&self.name, "free", &clients(&self.free))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{conn, device, info};

    #[test]
    fn rx_requires_free_client_and_classifier() {
        let mut b = NetVirtRxBuilder::new(info("rx_virt0"));
        b.set_data(device());
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { ref field, .. } if field == "free_clients"));

        let mut b = NetVirtRxBuilder::new(info("rx_virt0"));
        b.set_data(device());
        b.add_free_client(conn(0)).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { ref field, .. } if field == "classifiers"));
    }

    #[test]
    fn rx_without_pool_is_named() {
        let mut b = NetVirtRxBuilder::new(info("rx_virt0"));
        b.add_free_client(conn(0)).unwrap();
        b.register_classifier(0x0806, 1, conn(1)).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "data"));
    }

    #[test]
    fn complete_rx_seals_with_all_registrations() {
        let mut b = NetVirtRxBuilder::new(info("rx_virt0"));
        b.set_data(device());
        b.add_free_client(conn(0)).unwrap();
        b.register_classifier(0x0806, 1, conn(1)).unwrap();
        b.register_classifier(0x0806, 2, conn(2)).unwrap();
        b.register_classifier(0x0800, 6, conn(3)).unwrap();
        let sealed = b.finalize().unwrap();
        let wire = sealed.to_wire().unwrap();
        assert_eq!(wire.classifiers.as_slice().len(), 3);
        assert_eq!(wire.classifiers.as_slice()[2].subtype, 6);
    }

    #[test]
    fn tx_requires_both_client_kinds() {
        let mut b = NetVirtTxBuilder::new(info("tx_virt0"));
        b.add_active_client(conn(0), device()).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { ref field, .. } if field == "free"));

        let mut b = NetVirtTxBuilder::new(info("tx_virt0"));
        b.add_active_client(conn(0), device()).unwrap();
        b.add_free_client(conn(1), device()).unwrap();
        assert!(b.finalize().is_ok());
    }

    #[test]
    fn tx_client_capacity_is_bounded() {
        let mut b = NetVirtTxBuilder::new(info("tx_virt0"));
        for i in 0..MAX_CLIENTS {
            b.add_active_client(conn(i as u8), device()).unwrap();
        }
        let err = b.add_active_client(conn(99), device()).unwrap_err();
        assert!(matches!(err, ConfigError::Overflow { .. }));
    }
}
