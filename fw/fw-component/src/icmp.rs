//! ICMP responder configuration.
//!
//! Receives error-triggering packets from the router and may transmit the
//! resulting ICMP messages out of any interface, so it is registered as a
//! read-only transmit client everywhere.

use crate::{require, wire_conn, wire_device, wire_list, ComponentInfo, ConfigError};
use fw_abi::config::{IcmpConfig, TxClient};
use fw_abi::MAX_INTERFACES;
use fw_sysdesc::{ConnectionResource, DeviceRegionResource, PdId};

pub struct IcmpBuilder {
    info: ComponentInfo,
    interface_count: usize,
    router: Option<ConnectionResource>,
    tx: Vec<(ConnectionResource, DeviceRegionResource)>,
}

impl IcmpBuilder {
    #[must_use]
    pub fn new(info: ComponentInfo, interface_count: usize) -> Self {
        Self {
            info,
            interface_count,
            router: None,
            tx: Vec::new(),
        }
    }

    pub fn set_router(&mut self, conn: ConnectionResource) {
        self.router = Some(conn);
    }

    /// Transmit registration on one interface, with its read-only pool
    /// view.
    pub fn add_tx(
        &mut self,
        conn: ConnectionResource,
        data: DeviceRegionResource,
    ) -> Result<(), ConfigError> {
        crate::check_capacity(&self.info.name, "tx", self.tx.len(), MAX_INTERFACES)?;
        self.tx.push((conn, data));
        Ok(())
    }

    pub fn finalize(self) -> Result<IcmpSealed, ConfigError> {
        let name = &self.info.name;
        if self.tx.len() != self.interface_count {
            return Err(ConfigError::TooFew {
                component: name.clone(),
                field: "tx".into(),
                need: self.interface_count,
                have: self.tx.len(),
            });
        }
        Ok(IcmpSealed {
            name: self.info.name.clone(),
            pd: self.info.pd,
            router: require(name, "router", self.router)?,
            tx: self.tx,
        })
    }
}

#[derive(Debug)]
pub struct IcmpSealed {
    pub name: String,
    pub pd: PdId,
    pub router: ConnectionResource,
    pub tx: Vec<(ConnectionResource, DeviceRegionResource)>,
}

impl IcmpSealed {
    pub(crate) fn to_wire(&self) -> Result<IcmpConfig, ConfigError> {
        let tx: Vec<_> = self
            .tx
            .iter()
            .map(|&(conn, data)| TxClient {
                conn: wire_conn(conn),
                data: wire_device(data),
            })
            .collect();
        Ok(IcmpConfig {
            router: wire_conn(self.router),
            tx: wire_list(&self.name, "tx", &tx)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{conn, device, info};

    #[test]
    fn icmp_registers_on_every_interface() {
        let mut b = IcmpBuilder::new(info("icmp"), 2);
        b.set_router(conn(0));
        b.add_tx(conn(1), device()).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::TooFew { need: 2, have: 1, .. }));

        let mut b = IcmpBuilder::new(info("icmp"), 2);
        b.set_router(conn(0));
        b.add_tx(conn(1), device()).unwrap();
        b.add_tx(conn(2), device()).unwrap();
        let sealed = b.finalize().unwrap();
        assert_eq!(sealed.to_wire().unwrap().tx.as_slice().len(), 2);
    }

    #[test]
    fn missing_router_connection_is_named() {
        let mut b = IcmpBuilder::new(info("icmp"), 1);
        b.add_tx(conn(1), device()).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { ref field, .. } if field == "router"));
    }
}
