//! The build sequence: resolve, instantiate, wire, finalize, serialize.

use crate::record::{ConnectionKind, RegionKind, WiringLog};
use crate::spec::{
    ArpConnectionSpec, ConnectionSpec, DataConnectionSpec, PrivateRegionSpec, QueueLayout,
    SharedRegionSpec,
};
use crate::BuildError;
use fw_abi::MAX_INTERFACES;
use fw_board::{Board, Interface, Protocol};
use fw_component::{
    spawn, ArpRequesterBuilder, ArpResponderBuilder, FilterBuilder, IcmpBuilder,
    InstancePairView, NetVirtRxBuilder, NetVirtTxBuilder, NetworkIdentity, RoleConfig,
    RouterBuilder, RouterInterfaceInit, RuleServerBuilder,
};
use fw_layout::{RegionLayout, StructSizes, StructureLayout};
use fw_sysdesc::{MrId, PdId, Perms, SchedParams, SystemDescription};

/// Slots in every router→TX routed-traffic queue.
pub const FABRIC_QUEUE_CAPACITY: u64 = 512;
/// Slots in every buffer-return queue.
pub const FREE_QUEUE_CAPACITY: u64 = 512;
/// Slots in the RX→filter and filter→router queues.
pub const FILTER_QUEUE_CAPACITY: u64 = 512;
/// Slots in the rule-server and ICMP service queues.
pub const SERVICE_QUEUE_CAPACITY: u64 = 128;
/// Slots in each ARP request/response queue.
pub const ARP_QUEUE_CAPACITY: u64 = 128;
/// Entries in each interface's ARP cache.
pub const ARP_CACHE_CAPACITY: u64 = 512;
/// Rules per filter table.
pub const RULE_CAPACITY: u64 = 256;
/// Connection-tracking entries per filter instance table.
pub const INSTANCE_CAPACITY: u64 = 512;
/// Entries in the routing table.
pub const ROUTING_CAPACITY: u64 = 64;
/// Packets the router can park while resolving an address.
pub const PACKET_WAIT_CAPACITY: u64 = 512;

const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ARP_OPCODE_REQUEST: u16 = 1;
const ARP_OPCODE_REPLY: u16 = 2;

const ROUTER_IMAGE: &str = "router.elf";
const RULE_SERVER_IMAGE: &str = "rule_server.elf";
const RX_IMAGE: &str = "net_virt_rx.elf";
const TX_IMAGE: &str = "net_virt_tx.elf";
const ARP_REQUESTER_IMAGE: &str = "arp_requester.elf";
const ARP_RESPONDER_IMAGE: &str = "arp_responder.elf";
const ICMP_IMAGE: &str = "icmp.elf";

fn filter_image(protocol: Protocol) -> String {
    format!("filter_{protocol}.elf")
}

const RW: Perms = Perms::READ.union(Perms::WRITE);
const R: Perms = Perms::READ;
const W: Perms = Perms::WRITE;

/// One component's packed configuration, ready to patch.
#[derive(Debug)]
pub struct PackedConfig {
    pub component: String,
    pub image: String,
    pub bytes: Vec<u8>,
}

/// Everything one build produces, before any file is written.
#[derive(Debug)]
pub struct BuildArtifacts {
    pub system: SystemDescription,
    pub log: WiringLog,
    pub configs: Vec<RoleConfig>,
    pub packed: Vec<PackedConfig>,
}

/// Compile the full topology for `board`, resolving structure sizes
/// through `sizes`.
pub fn build(board: &Board, sizes: &mut dyn StructSizes) -> Result<BuildArtifacts, BuildError> {
    let count = board.interfaces.len();
    if !(2..=MAX_INTERFACES).contains(&count) {
        return Err(BuildError::InterfaceCount { count });
    }
    for (position, iface) in board.interfaces.iter().enumerate() {
        if iface.index != position {
            return Err(BuildError::InterfaceIndex {
                expected: position,
                found: iface.index,
            });
        }
    }

    log::info!(
        "building firewall topology for {} ({count} interfaces, {} protocols)",
        board.name,
        board.protocols.len()
    );

    let mut topo = Topology::instantiate(board, sizes)?;
    topo.wire_interfaces()?;
    topo.wire_fabric()?;
    topo.wire_instance_sharing()?;
    topo.wire_global_services()?;
    topo.finalize_and_pack()
}

fn identity(iface: &Interface) -> NetworkIdentity {
    NetworkIdentity {
        mac: iface.mac,
        ip: iface.ip,
        subnet_len: iface.subnet_len,
    }
}

/// Region size for `capacity` entries of the named structure, resolved
/// from `binary`.
fn sized_region(
    sizes: &mut dyn StructSizes,
    region: &str,
    binary: &str,
    symbol: &str,
    capacity: u64,
) -> Result<u64, BuildError> {
    let mut layout = RegionLayout::new(region);
    layout.push(StructureLayout::from_symbol(binary, symbol, capacity));
    layout.resolve(sizes)?;
    Ok(layout.region_size()?)
}

struct FilterParts {
    pd: PdId,
    protocol: Protocol,
    builder: FilterBuilder,
}

struct IfaceParts {
    pool: MrId,
    rx_pd: PdId,
    rx: NetVirtRxBuilder,
    tx_pd: PdId,
    tx: NetVirtTxBuilder,
    arp_req_pd: PdId,
    arp_req: ArpRequesterBuilder,
    arp_resp_pd: PdId,
    arp_resp: ArpResponderBuilder,
    filters: Vec<FilterParts>,
}

struct Topology<'a> {
    board: &'a Board,
    sys: SystemDescription,
    log: WiringLog,
    queues: QueueLayout,
    router_pd: PdId,
    router: RouterBuilder,
    rule_server_pd: PdId,
    rule_server: RuleServerBuilder,
    icmp_pd: PdId,
    icmp: IcmpBuilder,
    ifaces: Vec<IfaceParts>,
    arp_cache_size: u64,
    routing_size: u64,
    packet_wait_size: u64,
    bitmap_size: u64,
    /// (rule table, instance table) region sizes, indexed like
    /// `board.protocols`.
    proto_sizes: Vec<(u64, u64)>,
}

impl<'a> Topology<'a> {
    /// Resolve every structure size and spawn every protection domain.
    fn instantiate(board: &'a Board, sizes: &mut dyn StructSizes) -> Result<Self, BuildError> {
        let n = board.interfaces.len();
        let queues = QueueLayout::resolve(sizes, RX_IMAGE)?;
        let arp_cache_size = sized_region(
            sizes,
            "arp_cache",
            ARP_REQUESTER_IMAGE,
            "fw_arp_entry",
            ARP_CACHE_CAPACITY,
        )?;
        let routing_size = sized_region(
            sizes,
            "routing_table",
            ROUTER_IMAGE,
            "fw_routing_entry",
            ROUTING_CAPACITY,
        )?;
        let packet_wait_size = sized_region(
            sizes,
            "packet_wait",
            ROUTER_IMAGE,
            "fw_waiting_packet",
            PACKET_WAIT_CAPACITY,
        )?;
        // One bit per rule-id slot, derived from the table capacity.
        let bitmap_size = {
            let mut layout = RegionLayout::new("rule_bitmap");
            layout.push(StructureLayout::direct("fw_rule_bitmap", RULE_CAPACITY.div_ceil(8)));
            layout.region_size()?
        };
        let mut proto_sizes = Vec::with_capacity(board.protocols.len());
        for &protocol in &board.protocols {
            let image = filter_image(protocol);
            let rules = sized_region(
                sizes,
                &format!("rules_{protocol}"),
                &image,
                "fw_rule_entry",
                RULE_CAPACITY,
            )?;
            let instances = sized_region(
                sizes,
                &format!("instances_{protocol}"),
                &image,
                "fw_instance_entry",
                INSTANCE_CAPACITY,
            )?;
            proto_sizes.push((rules, instances));
        }

        let mut sys = SystemDescription::new();
        let mut log = WiringLog::new();

        let router_info = spawn(
            &mut sys,
            "router",
            ROUTER_IMAGE,
            SchedParams::with_priority(board.router_priority),
        )?;
        let rule_server_info = spawn(
            &mut sys,
            "rule_server",
            RULE_SERVER_IMAGE,
            SchedParams::with_priority(board.rule_server_priority),
        )?;
        let icmp_info = spawn(
            &mut sys,
            "icmp",
            ICMP_IMAGE,
            SchedParams::with_priority(board.icmp_priority),
        )?;
        let router_pd = router_info.pd;
        let rule_server_pd = rule_server_info.pd;
        let icmp_pd = icmp_info.pd;

        let mut ifaces = Vec::with_capacity(n);
        for iface in &board.interfaces {
            let i = iface.index;
            let prio = &iface.priorities;
            let pool = sys.add_device_region(
                &format!("fw_data{i}"),
                iface.dma_size,
                iface.dma_paddr,
            )?;

            let rx_info = spawn(
                &mut sys,
                &format!("rx_virt{i}"),
                RX_IMAGE,
                SchedParams::with_priority(prio.rx),
            )?;
            let tx_info = spawn(
                &mut sys,
                &format!("tx_virt{i}"),
                TX_IMAGE,
                SchedParams::with_priority(prio.tx),
            )?;
            let arp_req_info = spawn(
                &mut sys,
                &format!("arp_requester{i}"),
                ARP_REQUESTER_IMAGE,
                SchedParams::with_priority(prio.arp_requester),
            )?;
            let arp_resp_info = spawn(
                &mut sys,
                &format!("arp_responder{i}"),
                ARP_RESPONDER_IMAGE,
                SchedParams::with_priority(prio.arp_responder),
            )?;

            let rx_pd = rx_info.pd;
            let tx_pd = tx_info.pd;
            let arp_req_pd = arp_req_info.pd;
            let arp_resp_pd = arp_resp_info.pd;

            let mut rx = NetVirtRxBuilder::new(rx_info);
            let own_pool = sys.map_device(rx_pd, pool, RW)?;
            rx.set_data(own_pool);
            log.region(RegionKind::DmaPool, &format!("fw_data{i}"), rx_pd, RW, None);

            let mut filters = Vec::with_capacity(board.protocols.len());
            for &protocol in &board.protocols {
                let info = spawn(
                    &mut sys,
                    &format!("filter_{protocol}{i}"),
                    &filter_image(protocol),
                    SchedParams::with_priority(prio.filter),
                )?;
                let pd = info.pd;
                filters.push(FilterParts {
                    pd,
                    protocol,
                    builder: FilterBuilder::new(info, protocol.number(), n)?,
                });
            }

            ifaces.push(IfaceParts {
                pool,
                rx_pd,
                rx,
                tx_pd,
                tx: NetVirtTxBuilder::new(tx_info),
                arp_req_pd,
                arp_req: ArpRequesterBuilder::new(arp_req_info, identity(iface)),
                arp_resp_pd,
                arp_resp: ArpResponderBuilder::new(arp_resp_info, identity(iface)),
                filters,
            });
        }

        Ok(Self {
            board,
            sys,
            log,
            queues,
            router_pd,
            router: RouterBuilder::new(router_info, n),
            rule_server_pd,
            rule_server: RuleServerBuilder::new(rule_server_info, n),
            icmp_pd,
            icmp: IcmpBuilder::new(icmp_info, n),
            ifaces,
            arp_cache_size,
            routing_size,
            packet_wait_size,
            bitmap_size,
            proto_sizes,
        })
    }

    /// Stage 3: everything that stays within one interface.
    fn wire_interfaces(&mut self) -> Result<(), BuildError> {
        for i in 0..self.ifaces.len() {
            let iface = &self.board.interfaces[i];
            let (pool, rx_pd, tx_pd, arp_req_pd, arp_resp_pd) = {
                let p = &self.ifaces[i];
                (p.pool, p.rx_pd, p.tx_pd, p.arp_req_pd, p.arp_resp_pd)
            };

            // Data-return path: router hands spent buffers back to RX.
            let (r_side, rx_side) = DataConnectionSpec::new(
                format!("free_q{i}"),
                self.router_pd,
                rx_pd,
                FREE_QUEUE_CAPACITY,
                pool,
                RW,
                R,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].rx.add_free_client(rx_side.conn)?;
            self.log.connection(
                ConnectionKind::FreePath,
                self.router_pd,
                rx_pd,
                &format!("free_q{i}"),
                r_side.conn.ch,
                rx_side.conn.ch,
            );

            // ARP request frames go to the responder, replies to the
            // requester; both opcodes are registered on the classifier.
            let (rx_req, resp_side) = DataConnectionSpec::new(
                format!("arp_rxreq_q{i}"),
                rx_pd,
                arp_resp_pd,
                ARP_QUEUE_CAPACITY,
                pool,
                R,
                RW,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i]
                .rx
                .register_classifier(ETHERTYPE_ARP, ARP_OPCODE_REQUEST, rx_req.conn)?;
            self.ifaces[i].arp_resp.set_rx(resp_side.conn, resp_side.data);
            self.log.connection(
                ConnectionKind::ArpClassify,
                rx_pd,
                arp_resp_pd,
                &format!("arp_rxreq_q{i}"),
                rx_req.conn.ch,
                resp_side.conn.ch,
            );

            let (rx_rep, req_side) = DataConnectionSpec::new(
                format!("arp_rxrep_q{i}"),
                rx_pd,
                arp_req_pd,
                ARP_QUEUE_CAPACITY,
                pool,
                R,
                RW,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i]
                .rx
                .register_classifier(ETHERTYPE_ARP, ARP_OPCODE_REPLY, rx_rep.conn)?;
            self.ifaces[i].arp_req.set_rx(req_side.conn, req_side.data);
            self.log.connection(
                ConnectionKind::ArpClassify,
                rx_pd,
                arp_req_pd,
                &format!("arp_rxrep_q{i}"),
                rx_rep.conn.ch,
                req_side.conn.ch,
            );

            // Both agents transmit through the interface's TX virtualizer.
            let (resp_tx, tx_side) = DataConnectionSpec::new(
                format!("arp_resptx_q{i}"),
                arp_resp_pd,
                tx_pd,
                ARP_QUEUE_CAPACITY,
                pool,
                RW,
                R,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].arp_resp.set_tx(resp_tx.conn, resp_tx.data);
            self.ifaces[i].tx.add_active_client(tx_side.conn, tx_side.data)?;
            self.log.connection(
                ConnectionKind::ArpTransmit,
                arp_resp_pd,
                tx_pd,
                &format!("arp_resptx_q{i}"),
                resp_tx.conn.ch,
                tx_side.conn.ch,
            );

            let (req_tx, tx_side) = DataConnectionSpec::new(
                format!("arp_reqtx_q{i}"),
                arp_req_pd,
                tx_pd,
                ARP_QUEUE_CAPACITY,
                pool,
                RW,
                R,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].arp_req.set_tx(req_tx.conn, req_tx.data);
            self.ifaces[i].tx.add_active_client(tx_side.conn, tx_side.data)?;
            self.log.connection(
                ConnectionKind::ArpTransmit,
                arp_req_pd,
                tx_pd,
                &format!("arp_reqtx_q{i}"),
                req_tx.conn.ch,
                tx_side.conn.ch,
            );

            // Router ↔ requester resolution pair plus the shared cache.
            let (router_arp, req_arp) = ArpConnectionSpec::new(
                format!("router_arp{i}"),
                self.router_pd,
                arp_req_pd,
                ARP_QUEUE_CAPACITY,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].arp_req.add_client(req_arp)?;
            self.log.connection(
                ConnectionKind::Arp,
                self.router_pd,
                arp_req_pd,
                &format!("router_arp{i}"),
                router_arp.ch,
                req_arp.ch,
            );

            let (cache_owner, cache_peer) = SharedRegionSpec::new(
                format!("arp_cache{i}"),
                self.arp_cache_size,
                arp_req_pd,
                RW,
                self.router_pd,
                R,
            )
            .map(&mut self.sys)?;
            self.ifaces[i].arp_req.set_cache(cache_owner, ARP_CACHE_CAPACITY);
            self.log.region(
                RegionKind::ArpCache,
                &format!("arp_cache{i}"),
                arp_req_pd,
                RW,
                Some((self.router_pd, R)),
            );

            self.router.register_interface(
                i,
                RouterInterfaceInit {
                    identity: identity(iface),
                    free: r_side.conn,
                    data: r_side.data,
                    arp: router_arp,
                    arp_cache: cache_peer,
                },
            )?;

            self.wire_filters(i)?;
        }
        Ok(())
    }

    /// Per-protocol filter wiring for interface `i`.
    fn wire_filters(&mut self, i: usize) -> Result<(), BuildError> {
        let (pool, rx_pd) = (self.ifaces[i].pool, self.ifaces[i].rx_pd);
        for f in 0..self.ifaces[i].filters.len() {
            let (filter_pd, protocol) = {
                let parts = &self.ifaces[i].filters[f];
                (parts.pd, parts.protocol)
            };
            let (rule_size, _) = self.proto_sizes[f];

            let (rx_side, f_side) = DataConnectionSpec::new(
                format!("classify_{protocol}_q{i}"),
                rx_pd,
                filter_pd,
                FILTER_QUEUE_CAPACITY,
                pool,
                R,
                R,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].rx.register_classifier(
                ETHERTYPE_IPV4,
                u16::from(protocol.number()),
                rx_side.conn,
            )?;
            self.ifaces[i].filters[f]
                .builder
                .set_rx(f_side.conn, f_side.data);
            self.log.connection(
                ConnectionKind::FilterClassify,
                rx_pd,
                filter_pd,
                &format!("classify_{protocol}_q{i}"),
                rx_side.conn.ch,
                f_side.conn.ch,
            );

            let (f_router, router_side) = ConnectionSpec::new(
                format!("filter_{protocol}_q{i}"),
                filter_pd,
                self.router_pd,
                FILTER_QUEUE_CAPACITY,
            )
            .create(&mut self.sys, &self.queues)?;
            self.ifaces[i].filters[f].builder.set_router(f_router);
            self.router.add_filter(i, protocol, router_side)?;
            self.log.connection(
                ConnectionKind::FilterRouter,
                filter_pd,
                self.router_pd,
                &format!("filter_{protocol}_q{i}"),
                f_router.ch,
                router_side.ch,
            );

            // Rule table: the rule server is the only writer.
            let (server_view, filter_view) = SharedRegionSpec::new(
                format!("rules_{protocol}{i}"),
                rule_size,
                self.rule_server_pd,
                RW,
                filter_pd,
                R,
            )
            .map(&mut self.sys)?;
            let (server_ch, filter_ch) = self.sys.channel(self.rule_server_pd, filter_pd)?;
            self.ifaces[i].filters[f]
                .builder
                .set_rules(filter_view, RULE_CAPACITY);
            self.ifaces[i].filters[f]
                .builder
                .set_rule_server_channel(filter_ch);
            self.rule_server
                .add_rule_table(i, protocol, server_view, RULE_CAPACITY, server_ch)?;
            self.log.region(
                RegionKind::RuleTable,
                &format!("rules_{protocol}{i}"),
                self.rule_server_pd,
                RW,
                Some((filter_pd, R)),
            );

            let bitmap = PrivateRegionSpec::new(
                format!("rule_bitmap_{protocol}{i}"),
                self.bitmap_size,
                filter_pd,
                RW,
            )
            .create(&mut self.sys)?;
            self.ifaces[i].filters[f].builder.set_rule_bitmap(bitmap);
            self.ifaces[i].filters[f]
                .builder
                .set_instance_capacity(INSTANCE_CAPACITY);
            self.log.region(
                RegionKind::RuleBitmap,
                &format!("rule_bitmap_{protocol}{i}"),
                filter_pd,
                RW,
                None,
            );
        }
        Ok(())
    }

    /// Stage 4: the full cross-interface fabric.
    ///
    /// Every ordered (source, destination) pair is wired, self-pairs
    /// included, so routing a packet back out its ingress interface is
    /// structurally identical to any other route. N interfaces yield N²
    /// forward and N² return links.
    fn wire_fabric(&mut self) -> Result<(), BuildError> {
        let n = self.ifaces.len();
        for src in 0..n {
            for dst in 0..n {
                let src_pool = self.ifaces[src].pool;
                let (dst_tx_pd, src_rx_pd) = (self.ifaces[dst].tx_pd, self.ifaces[src].rx_pd);

                // Routed traffic out of `dst`, buffers from `src`'s pool,
                // which is mapped read-only into the destination TX.
                let (router_side, tx_side) = DataConnectionSpec::new(
                    format!("fwd_q_{src}_{dst}"),
                    self.router_pd,
                    dst_tx_pd,
                    FABRIC_QUEUE_CAPACITY,
                    src_pool,
                    R,
                    R,
                )
                .create(&mut self.sys, &self.queues)?;
                self.router.set_tx_active(src, dst, router_side.conn)?;
                self.ifaces[dst]
                    .tx
                    .add_active_client(tx_side.conn, tx_side.data)?;
                self.log.connection(
                    ConnectionKind::Forward,
                    self.router_pd,
                    dst_tx_pd,
                    &format!("fwd_q_{src}_{dst}"),
                    router_side.conn.ch,
                    tx_side.conn.ch,
                );

                // Spent buffers travel back to the source RX virtualizer,
                // reusing the pool view mapped for the forward link.
                let (tx_ret, rx_ret) = ConnectionSpec::new(
                    format!("ret_q_{src}_{dst}"),
                    dst_tx_pd,
                    src_rx_pd,
                    FREE_QUEUE_CAPACITY,
                )
                .create(&mut self.sys, &self.queues)?;
                self.ifaces[dst].tx.add_free_client(tx_ret, tx_side.data)?;
                self.ifaces[src].rx.add_free_client(rx_ret)?;
                self.log.connection(
                    ConnectionKind::Return,
                    dst_tx_pd,
                    src_rx_pd,
                    &format!("ret_q_{src}_{dst}"),
                    tx_ret.ch,
                    rx_ret.ch,
                );
            }
        }
        Ok(())
    }

    /// Stage 5: mirrored connection-tracking state between every
    /// unordered pair of distinct interfaces, per protocol. Each filter
    /// publishes its own state write-only and reads its peer's read-only;
    /// two regions per pair, no shared mutable state.
    fn wire_instance_sharing(&mut self) -> Result<(), BuildError> {
        let n = self.ifaces.len();
        for i in 0..n {
            for j in (i + 1)..n {
                for f in 0..self.ifaces[i].filters.len() {
                    let protocol = self.ifaces[i].filters[f].protocol;
                    let (_, instance_size) = self.proto_sizes[f];
                    let (pd_i, pd_j) = (self.ifaces[i].filters[f].pd, self.ifaces[j].filters[f].pd);

                    let (publish_i, subscribe_j) = SharedRegionSpec::new(
                        format!("inst_{protocol}_{i}_{j}"),
                        instance_size,
                        pd_i,
                        W,
                        pd_j,
                        R,
                    )
                    .map(&mut self.sys)?;
                    let (publish_j, subscribe_i) = SharedRegionSpec::new(
                        format!("inst_{protocol}_{j}_{i}"),
                        instance_size,
                        pd_j,
                        W,
                        pd_i,
                        R,
                    )
                    .map(&mut self.sys)?;

                    self.ifaces[i].filters[f].builder.add_instance_pair(
                        InstancePairView {
                            peer: j,
                            publish: publish_i,
                            subscribe: subscribe_i,
                        },
                    )?;
                    self.ifaces[j].filters[f].builder.add_instance_pair(
                        InstancePairView {
                            peer: i,
                            publish: publish_j,
                            subscribe: subscribe_j,
                        },
                    )?;
                    self.log.region(
                        RegionKind::Instances,
                        &format!("inst_{protocol}_{i}_{j}"),
                        pd_i,
                        W,
                        Some((pd_j, R)),
                    );
                    self.log.region(
                        RegionKind::Instances,
                        &format!("inst_{protocol}_{j}_{i}"),
                        pd_j,
                        W,
                        Some((pd_i, R)),
                    );
                }
            }
        }
        Ok(())
    }

    /// Stage 6: rule server, routing table, packet-wait queue, ICMP.
    fn wire_global_services(&mut self) -> Result<(), BuildError> {
        // Matched traffic up to the rule server.
        let (router_side, server_side) = ConnectionSpec::new(
            "rule_server_q",
            self.router_pd,
            self.rule_server_pd,
            SERVICE_QUEUE_CAPACITY,
        )
        .create(&mut self.sys, &self.queues)?;
        self.router.set_rule_server(router_side);
        self.rule_server.set_rx_active(server_side);
        self.log.connection(
            ConnectionKind::RuleServerData,
            self.router_pd,
            self.rule_server_pd,
            "rule_server_q",
            router_side.ch,
            server_side.ch,
        );

        // Buffer return and data attachment on the designated interface.
        let (server_ret, rx_ret) = ConnectionSpec::new(
            "rule_server_free_q",
            self.rule_server_pd,
            self.ifaces[0].rx_pd,
            FREE_QUEUE_CAPACITY,
        )
        .create(&mut self.sys, &self.queues)?;
        self.rule_server.set_free(server_ret);
        self.ifaces[0].rx.add_free_client(rx_ret)?;
        self.log.connection(
            ConnectionKind::RuleServerReturn,
            self.rule_server_pd,
            self.ifaces[0].rx_pd,
            "rule_server_free_q",
            server_ret.ch,
            rx_ret.ch,
        );
        let server_pool = self
            .sys
            .map_device(self.rule_server_pd, self.ifaces[0].pool, RW)?;
        self.rule_server.set_data(server_pool);

        let (server_arp, req_arp) = ArpConnectionSpec::new(
            "rule_server_arp",
            self.rule_server_pd,
            self.ifaces[0].arp_req_pd,
            ARP_QUEUE_CAPACITY,
        )
        .create(&mut self.sys, &self.queues)?;
        self.rule_server.set_arp(server_arp);
        self.ifaces[0].arp_req.add_client(req_arp)?;
        self.log.connection(
            ConnectionKind::Arp,
            self.rule_server_pd,
            self.ifaces[0].arp_req_pd,
            "rule_server_arp",
            server_arp.ch,
            req_arp.ch,
        );

        // Routing table: the router owns the memory but only reads it;
        // the rule server writes it and announces changes on a dedicated
        // channel.
        let (router_view, server_view) = SharedRegionSpec::new(
            "routing_table",
            self.routing_size,
            self.router_pd,
            R,
            self.rule_server_pd,
            RW,
        )
        .map(&mut self.sys)?;
        let (router_ch, server_ch) = self.sys.channel(self.router_pd, self.rule_server_pd)?;
        self.router
            .set_routing_table(router_view, ROUTING_CAPACITY, router_ch);
        self.rule_server
            .set_routing_table(server_view, ROUTING_CAPACITY, server_ch);
        self.log.region(
            RegionKind::RoutingTable,
            "routing_table",
            self.router_pd,
            R,
            Some((self.rule_server_pd, RW)),
        );

        for iface in &self.board.interfaces {
            self.rule_server.add_interface(identity(iface))?;
        }

        let packet_wait = PrivateRegionSpec::new(
            "packet_wait",
            self.packet_wait_size,
            self.router_pd,
            RW,
        )
        .create(&mut self.sys)?;
        self.router.set_packet_wait(packet_wait);
        self.log.region(
            RegionKind::PacketWait,
            "packet_wait",
            self.router_pd,
            RW,
            None,
        );

        // ICMP: one queue from the router, read-only transmit everywhere.
        let (router_icmp, icmp_side) = ConnectionSpec::new(
            "icmp_q",
            self.router_pd,
            self.icmp_pd,
            SERVICE_QUEUE_CAPACITY,
        )
        .create(&mut self.sys, &self.queues)?;
        self.router.set_icmp(router_icmp);
        self.icmp.set_router(icmp_side);
        self.log.connection(
            ConnectionKind::IcmpData,
            self.router_pd,
            self.icmp_pd,
            "icmp_q",
            router_icmp.ch,
            icmp_side.ch,
        );

        for i in 0..self.ifaces.len() {
            let (pool, tx_pd) = (self.ifaces[i].pool, self.ifaces[i].tx_pd);
            let (icmp_side, tx_side) = DataConnectionSpec::new(
                format!("icmp_tx_q{i}"),
                self.icmp_pd,
                tx_pd,
                SERVICE_QUEUE_CAPACITY,
                pool,
                R,
                R,
            )
            .create(&mut self.sys, &self.queues)?;
            self.icmp.add_tx(icmp_side.conn, icmp_side.data)?;
            self.ifaces[i]
                .tx
                .add_active_client(tx_side.conn, tx_side.data)?;
            self.log.connection(
                ConnectionKind::IcmpTransmit,
                self.icmp_pd,
                tx_pd,
                &format!("icmp_tx_q{i}"),
                icmp_side.conn.ch,
                tx_side.conn.ch,
            );
        }
        Ok(())
    }

    /// Stage 7: seal every component and pack its config bytes.
    fn finalize_and_pack(self) -> Result<BuildArtifacts, BuildError> {
        let mut configs = Vec::new();
        for parts in self.ifaces {
            for filter in parts.filters {
                configs.push(RoleConfig::Filter(filter.builder.finalize()?));
            }
            configs.push(RoleConfig::ArpRequester(parts.arp_req.finalize()?));
            configs.push(RoleConfig::ArpResponder(parts.arp_resp.finalize()?));
            configs.push(RoleConfig::NetVirtRx(parts.rx.finalize()?));
            configs.push(RoleConfig::NetVirtTx(parts.tx.finalize()?));
        }
        configs.push(RoleConfig::Icmp(self.icmp.finalize()?));
        configs.push(RoleConfig::RuleServer(self.rule_server.finalize()?));
        configs.push(RoleConfig::Router(self.router.finalize()?));

        let mut packed = Vec::with_capacity(configs.len());
        for config in &configs {
            let bytes = config.serialize()?;
            packed.push(PackedConfig {
                component: config.component_name().into(),
                image: self.sys.pd_image(config.pd()).into(),
                bytes,
            });
        }
        log::info!(
            "sealed {} components, {} connections, {} standalone regions",
            configs.len(),
            self.log.connections().len(),
            self.log.regions().len()
        );

        Ok(BuildArtifacts {
            system: self.sys,
            log: self.log,
            configs,
            packed,
        })
    }
}
