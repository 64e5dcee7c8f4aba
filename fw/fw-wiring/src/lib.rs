//! # Wiring Orchestrator
//!
//! Turns a board description and a directory of compiled component
//! binaries into a fully-wired firewall topology:
//!
//! ```text
//! board description + component ELFs
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │           Topology Compilation              │
//! ├─────────────────────────────────────────────┤
//! │  1. Structure Resolution                    │
//! │     • queue header/slot, ARP, rule,         │
//! │       instance, routing entry sizes         │
//! │  2. Component Instantiation                 │
//! │     • router, rule server, ICMP             │
//! │     • per interface: RX/TX virtualizers,    │
//! │       ARP agents, protocol filters          │
//! │  3. Per-Interface Wiring                    │
//! │     • free path, ARP classify/transmit,     │
//! │       router↔ARP, cache, filters, rules     │
//! │  4. Cross-Interface Fabric                  │
//! │     • N² forward + N² return links,         │
//! │       self-pairs included                   │
//! │  5. Instance Sharing                        │
//! │     • P·C(N,2) paired regions               │
//! │  6. Global Services                         │
//! │     • rule server, routing table, ICMP      │
//! │  7. Finalize + Serialize                    │
//! │     • seal every config, pack bytes         │
//! └─────────────────────────────────────────────┘
//!         ↓
//! system description, per-process config data,
//! patched binaries, topology graph
//! ```
//!
//! Every stage failure is fatal and names the offending component,
//! structure or region; a process with an incomplete configuration is
//! never produced.

mod build;
pub mod dot;
mod emit;
pub mod record;
pub mod spec;

pub use build::{
    build, BuildArtifacts, PackedConfig, ARP_CACHE_CAPACITY, ARP_QUEUE_CAPACITY,
    FABRIC_QUEUE_CAPACITY, FILTER_QUEUE_CAPACITY, FREE_QUEUE_CAPACITY, INSTANCE_CAPACITY,
    PACKET_WAIT_CAPACITY, ROUTING_CAPACITY, RULE_CAPACITY, SERVICE_QUEUE_CAPACITY,
};
pub use emit::emit;

use fw_abi::MAX_INTERFACES;
use fw_component::ConfigError;
use fw_layout::elf::ElfError;
use fw_layout::LayoutError;
use fw_sysdesc::SysDescError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("board has {count} interfaces; supported range is 2..={max}", max = MAX_INTERFACES)]
    InterfaceCount { count: usize },
    #[error("interface at position {expected} carries index {found}")]
    InterfaceIndex { expected: usize, found: usize },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    SysDesc(#[from] SysDescError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("patching `{binary}`: {source}")]
    Patch { binary: String, source: ElfError },
    #[error("writing `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
