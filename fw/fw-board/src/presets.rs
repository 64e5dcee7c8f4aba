//! Built-in board presets selectable from the build tool.
//!
//! Interface addressing here mirrors the reference deployments: two wired
//! interfaces, one facing the protected network and one facing upstream.

use crate::{Board, Interface, MacAddr, Protocol, RolePriorities};
use core::net::Ipv4Addr;

const DATA_PLANE: RolePriorities = RolePriorities {
    rx: 99,
    tx: 100,
    arp_requester: 95,
    arp_responder: 94,
    filter: 96,
};

/// Look up a board preset by name.
#[must_use]
pub fn preset(name: &str) -> Option<Board> {
    match name {
        "imx8mp-evk" => Some(imx8mp_evk()),
        "qemu-virt-aarch64" => Some(qemu_virt()),
        _ => None,
    }
}

fn imx8mp_evk() -> Board {
    Board {
        name: "imx8mp-evk",
        interfaces: vec![
            Interface {
                index: 0,
                name: "eth0",
                hw_node: "soc@0/bus@30800000/ethernet@30be0000",
                mac: MacAddr([0x00, 0x04, 0x9f, 0x05, 0x28, 0x31]),
                ip: Ipv4Addr::new(192, 168, 1, 1),
                subnet_len: 24,
                priorities: DATA_PLANE,
                dma_paddr: 0x5800_0000,
                dma_size: 0x20_0000,
            },
            Interface {
                index: 1,
                name: "eth1",
                hw_node: "soc@0/bus@30800000/ethernet@30bf0000",
                mac: MacAddr([0x00, 0x04, 0x9f, 0x05, 0x28, 0x32]),
                ip: Ipv4Addr::new(10, 0, 0, 2),
                subnet_len: 24,
                priorities: DATA_PLANE,
                dma_paddr: 0x5820_0000,
                dma_size: 0x20_0000,
            },
        ],
        protocols: vec![Protocol::Icmp, Protocol::Tcp, Protocol::Udp],
        router_priority: 98,
        rule_server_priority: 80,
        icmp_priority: 90,
    }
}

fn qemu_virt() -> Board {
    Board {
        name: "qemu-virt-aarch64",
        interfaces: vec![
            Interface {
                index: 0,
                name: "virtio0",
                hw_node: "virtio_mmio@a003e00",
                mac: MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
                ip: Ipv4Addr::new(192, 168, 100, 1),
                subnet_len: 24,
                priorities: DATA_PLANE,
                dma_paddr: 0x6000_0000,
                dma_size: 0x20_0000,
            },
            Interface {
                index: 1,
                name: "virtio1",
                hw_node: "virtio_mmio@a003c00",
                mac: MacAddr([0x52, 0x54, 0x00, 0x12, 0x34, 0x57]),
                ip: Ipv4Addr::new(192, 168, 101, 1),
                subnet_len: 24,
                priorities: DATA_PLANE,
                dma_paddr: 0x6020_0000,
                dma_size: 0x20_0000,
            },
        ],
        protocols: vec![Protocol::Icmp, Protocol::Tcp, Protocol::Udp],
        router_priority: 98,
        rule_server_priority: 80,
        icmp_priority: 90,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_by_name() {
        assert!(preset("imx8mp-evk").is_some());
        assert!(preset("qemu-virt-aarch64").is_some());
        assert!(preset("no-such-board").is_none());
    }

    #[test]
    fn preset_interfaces_are_indexed_in_order() {
        let board = preset("imx8mp-evk").unwrap();
        for (i, iface) in board.interfaces.iter().enumerate() {
            assert_eq!(iface.index, i);
        }
    }

    #[test]
    fn preset_dma_pools_do_not_overlap() {
        let board = preset("imx8mp-evk").unwrap();
        let a = &board.interfaces[0];
        let b = &board.interfaces[1];
        assert!(a.dma_paddr + a.dma_size <= b.dma_paddr);
    }
}
