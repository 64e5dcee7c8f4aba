//! Role-specific configuration records.
//!
//! One record per process role, packed in declared field order behind the
//! common header. Field sets mirror what each process needs at runtime;
//! the compiler fills them during wiring and the process reads them from
//! its patched data section at startup.

use crate::resources::{
    ArpConnection, ClientList, Connection, DeviceRegion, NetIdentity, RegionResource,
};
use crate::wire::{put_pad, put_u8, put_u16, put_u32, put_u64, Cursor, Wire};
use crate::{
    AbiError, Role, CONFIG_MAGIC, CONFIG_VERSION, MAX_ARP_CLIENTS, MAX_CLIENTS, MAX_FILTERS,
    MAX_INSTANCE_PEERS, MAX_INTERFACES, MAX_RULE_TABLES,
};
use alloc::vec::Vec;

/// A record that can live behind the config header.
pub trait ConfigRecord: Wire {
    const ROLE: Role;
}

/// Pack a record: header followed by the body.
pub fn pack<C: ConfigRecord>(cfg: &C) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + C::SIZE);
    put_u64(&mut out, CONFIG_MAGIC);
    put_u32(&mut out, CONFIG_VERSION);
    put_u32(&mut out, C::ROLE as u32);
    cfg.write(&mut out);
    out
}

/// Parse and validate a packed record of the expected role.
pub fn unpack<C: ConfigRecord>(bytes: &[u8]) -> Result<C, AbiError> {
    let mut c = Cursor::new(bytes);
    if c.u64()? != CONFIG_MAGIC {
        return Err(AbiError::BadMagic);
    }
    let version = c.u32()?;
    if version != CONFIG_VERSION {
        return Err(AbiError::BadVersion(version));
    }
    let role = c.u32()?;
    if role != C::ROLE as u32 {
        return Err(AbiError::BadRole {
            expected: C::ROLE as u32,
            found: role,
        });
    }
    let cfg = C::parse(&mut c)?;
    if c.remaining() != 0 {
        return Err(AbiError::TrailingBytes);
    }
    Ok(cfg)
}

/// Router's handle to one attached protocol filter. 40 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FilterHandle {
    pub protocol: u16,
    pub conn: Connection,
}

impl Wire for FilterHandle {
    const SIZE: usize = 8 + Connection::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        put_u16(out, self.protocol);
        put_pad(out, 6);
        self.conn.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let protocol = c.u16()?;
        c.pad(6)?;
        Ok(Self {
            protocol,
            conn: Connection::parse(c)?,
        })
    }
}

/// Per-interface state inside the router. 592 bytes.
///
/// `tx_active` is indexed by destination interface; slots at or past the
/// system's interface count stay zeroed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RouterInterface {
    pub identity: NetIdentity,
    /// Free-buffer return path to this interface's RX virtualizer.
    pub free: Connection,
    /// This interface's DMA pool as mapped into the router.
    pub data: DeviceRegion,
    pub arp: ArpConnection,
    /// Read-only view of the requester-owned ARP cache.
    pub arp_cache: RegionResource,
    pub tx_active: [Connection; MAX_INTERFACES],
    pub filters: ClientList<FilterHandle, MAX_FILTERS>,
}

impl Wire for RouterInterface {
    const SIZE: usize = NetIdentity::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE
        + ArpConnection::SIZE
        + RegionResource::SIZE
        + MAX_INTERFACES * Connection::SIZE
        + ClientList::<FilterHandle, MAX_FILTERS>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.identity.write(out);
        self.free.write(out);
        self.data.write(out);
        self.arp.write(out);
        self.arp_cache.write(out);
        for conn in &self.tx_active {
            conn.write(out);
        }
        self.filters.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let identity = NetIdentity::parse(c)?;
        let free = Connection::parse(c)?;
        let data = DeviceRegion::parse(c)?;
        let arp = ArpConnection::parse(c)?;
        let arp_cache = RegionResource::parse(c)?;
        let mut tx_active = [Connection::default(); MAX_INTERFACES];
        for conn in &mut tx_active {
            *conn = Connection::parse(c)?;
        }
        Ok(Self {
            identity,
            free,
            data,
            arp,
            arp_cache,
            tx_active,
            filters: ClientList::parse(c)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RouterConfig {
    /// Queue of packets parked while address resolution is in flight.
    pub packet_wait: RegionResource,
    /// Matched traffic handed up to the rule server.
    pub rule_server: Connection,
    /// Routing table; the rule server owns writes, the router reads.
    pub routing_table: RegionResource,
    pub routing_capacity: u64,
    pub routing_update_ch: u8,
    pub icmp: Connection,
    pub interfaces: ClientList<RouterInterface, MAX_INTERFACES>,
}

impl Wire for RouterConfig {
    const SIZE: usize = RegionResource::SIZE
        + Connection::SIZE
        + RegionResource::SIZE
        + 8
        + 8
        + Connection::SIZE
        + ClientList::<RouterInterface, MAX_INTERFACES>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.packet_wait.write(out);
        self.rule_server.write(out);
        self.routing_table.write(out);
        put_u64(out, self.routing_capacity);
        put_u8(out, self.routing_update_ch);
        put_pad(out, 7);
        self.icmp.write(out);
        self.interfaces.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let packet_wait = RegionResource::parse(c)?;
        let rule_server = Connection::parse(c)?;
        let routing_table = RegionResource::parse(c)?;
        let routing_capacity = c.u64()?;
        let routing_update_ch = c.u8()?;
        c.pad(7)?;
        Ok(Self {
            packet_wait,
            rule_server,
            routing_table,
            routing_capacity,
            routing_update_ch,
            icmp: Connection::parse(c)?,
            interfaces: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for RouterConfig {
    const ROLE: Role = Role::Router;
}

/// One (ethertype, subtype) dispatch entry of an RX virtualizer. 40 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RxClassifier {
    pub ethertype: u16,
    pub subtype: u16,
    pub conn: Connection,
}

impl Wire for RxClassifier {
    const SIZE: usize = 8 + Connection::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        put_u16(out, self.ethertype);
        put_u16(out, self.subtype);
        put_pad(out, 4);
        self.conn.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let ethertype = c.u16()?;
        let subtype = c.u16()?;
        c.pad(4)?;
        Ok(Self {
            ethertype,
            subtype,
            conn: Connection::parse(c)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NetVirtRxConfig {
    /// The interface's own DMA pool.
    pub data: DeviceRegion,
    pub free_clients: ClientList<Connection, MAX_CLIENTS>,
    pub classifiers: ClientList<RxClassifier, MAX_FILTERS>,
}

impl Wire for NetVirtRxConfig {
    const SIZE: usize = DeviceRegion::SIZE
        + ClientList::<Connection, MAX_CLIENTS>::SIZE
        + ClientList::<RxClassifier, MAX_FILTERS>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.data.write(out);
        self.free_clients.write(out);
        self.classifiers.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            data: DeviceRegion::parse(c)?,
            free_clients: ClientList::parse(c)?,
            classifiers: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for NetVirtRxConfig {
    const ROLE: Role = Role::NetVirtRx;
}

/// One client of a TX virtualizer: the queue plus the DMA pool its buffer
/// descriptors point into. 56 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TxClient {
    pub conn: Connection,
    pub data: DeviceRegion,
}

impl Wire for TxClient {
    const SIZE: usize = Connection::SIZE + DeviceRegion::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.conn.write(out);
        self.data.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            conn: Connection::parse(c)?,
            data: DeviceRegion::parse(c)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NetVirtTxConfig {
    pub active: ClientList<TxClient, MAX_CLIENTS>,
    pub free: ClientList<TxClient, MAX_CLIENTS>,
}

impl Wire for NetVirtTxConfig {
    const SIZE: usize = 2 * ClientList::<TxClient, MAX_CLIENTS>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.active.write(out);
        self.free.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            active: ClientList::parse(c)?,
            free: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for NetVirtTxConfig {
    const ROLE: Role = Role::NetVirtTx;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArpRequesterConfig {
    pub identity: NetIdentity,
    /// The requester-owned resolution cache.
    pub cache: RegionResource,
    pub cache_capacity: u64,
    /// ARP replies classified to us by the RX virtualizer.
    pub rx: Connection,
    pub rx_data: DeviceRegion,
    /// Outgoing ARP requests towards the TX virtualizer.
    pub tx: Connection,
    pub tx_data: DeviceRegion,
    pub clients: ClientList<ArpConnection, MAX_ARP_CLIENTS>,
}

impl Wire for ArpRequesterConfig {
    const SIZE: usize = NetIdentity::SIZE
        + RegionResource::SIZE
        + 8
        + Connection::SIZE
        + DeviceRegion::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE
        + ClientList::<ArpConnection, MAX_ARP_CLIENTS>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.identity.write(out);
        self.cache.write(out);
        put_u64(out, self.cache_capacity);
        self.rx.write(out);
        self.rx_data.write(out);
        self.tx.write(out);
        self.tx_data.write(out);
        self.clients.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let identity = NetIdentity::parse(c)?;
        let cache = RegionResource::parse(c)?;
        let cache_capacity = c.u64()?;
        Ok(Self {
            identity,
            cache,
            cache_capacity,
            rx: Connection::parse(c)?,
            rx_data: DeviceRegion::parse(c)?,
            tx: Connection::parse(c)?,
            tx_data: DeviceRegion::parse(c)?,
            clients: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for ArpRequesterConfig {
    const ROLE: Role = Role::ArpRequester;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ArpResponderConfig {
    pub identity: NetIdentity,
    pub rx: Connection,
    pub rx_data: DeviceRegion,
    pub tx: Connection,
    pub tx_data: DeviceRegion,
}

impl Wire for ArpResponderConfig {
    const SIZE: usize = NetIdentity::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.identity.write(out);
        self.rx.write(out);
        self.rx_data.write(out);
        self.tx.write(out);
        self.tx_data.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            identity: NetIdentity::parse(c)?,
            rx: Connection::parse(c)?,
            rx_data: DeviceRegion::parse(c)?,
            tx: Connection::parse(c)?,
            tx_data: DeviceRegion::parse(c)?,
        })
    }
}

impl ConfigRecord for ArpResponderConfig {
    const ROLE: Role = Role::ArpResponder;
}

/// Instance-state visibility towards one peer interface: we publish ours
/// write-only, we subscribe to theirs read-only. 40 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InstancePair {
    pub peer: u32,
    pub publish: RegionResource,
    pub subscribe: RegionResource,
}

impl Wire for InstancePair {
    const SIZE: usize = 8 + 2 * RegionResource::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.peer);
        put_pad(out, 4);
        self.publish.write(out);
        self.subscribe.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let peer = c.u32()?;
        c.pad(4)?;
        Ok(Self {
            peer,
            publish: RegionResource::parse(c)?,
            subscribe: RegionResource::parse(c)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FilterConfig {
    pub protocol: u16,
    /// Verdict applied when no rule matches.
    pub default_action: u8,
    /// Allowed traffic towards the router.
    pub router: Connection,
    /// Classified traffic from the RX virtualizer.
    pub rx: Connection,
    pub rx_data: DeviceRegion,
    /// Rule table; written by the rule server, read here.
    pub rules: RegionResource,
    pub rule_capacity: u64,
    /// Private bitmap of live rule-id slots.
    pub rule_bitmap: RegionResource,
    pub rule_server_ch: u8,
    pub instance_capacity: u64,
    pub instances: ClientList<InstancePair, MAX_INSTANCE_PEERS>,
}

impl Wire for FilterConfig {
    const SIZE: usize = 8
        + Connection::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE
        + RegionResource::SIZE
        + 8
        + RegionResource::SIZE
        + 8
        + 8
        + ClientList::<InstancePair, MAX_INSTANCE_PEERS>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        put_u16(out, self.protocol);
        put_u8(out, self.default_action);
        put_pad(out, 5);
        self.router.write(out);
        self.rx.write(out);
        self.rx_data.write(out);
        self.rules.write(out);
        put_u64(out, self.rule_capacity);
        self.rule_bitmap.write(out);
        put_u8(out, self.rule_server_ch);
        put_pad(out, 7);
        put_u64(out, self.instance_capacity);
        self.instances.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let protocol = c.u16()?;
        let default_action = c.u8()?;
        c.pad(5)?;
        let router = Connection::parse(c)?;
        let rx = Connection::parse(c)?;
        let rx_data = DeviceRegion::parse(c)?;
        let rules = RegionResource::parse(c)?;
        let rule_capacity = c.u64()?;
        let rule_bitmap = RegionResource::parse(c)?;
        let rule_server_ch = c.u8()?;
        c.pad(7)?;
        let instance_capacity = c.u64()?;
        Ok(Self {
            protocol,
            default_action,
            router,
            rx,
            rx_data,
            rules,
            rule_capacity,
            rule_bitmap,
            rule_server_ch,
            instance_capacity,
            instances: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for FilterConfig {
    const ROLE: Role = Role::Filter;
}

/// Rule server's write handle to one filter's rule table. 40 bytes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RuleTable {
    pub interface: u32,
    pub protocol: u16,
    pub region: RegionResource,
    pub capacity: u64,
    /// Channel used to tell the filter a rule changed.
    pub filter_ch: u8,
}

impl Wire for RuleTable {
    const SIZE: usize = 8 + RegionResource::SIZE + 16;

    fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.interface);
        put_u16(out, self.protocol);
        put_pad(out, 2);
        self.region.write(out);
        put_u64(out, self.capacity);
        put_u8(out, self.filter_ch);
        put_pad(out, 7);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let interface = c.u32()?;
        let protocol = c.u16()?;
        c.pad(2)?;
        let region = RegionResource::parse(c)?;
        let capacity = c.u64()?;
        let filter_ch = c.u8()?;
        c.pad(7)?;
        Ok(Self {
            interface,
            protocol,
            region,
            capacity,
            filter_ch,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RuleServerConfig {
    /// Matched traffic from the router.
    pub rx_active: Connection,
    /// Buffer return towards the designated interface's RX virtualizer.
    pub free: Connection,
    pub data: DeviceRegion,
    pub arp: ArpConnection,
    /// Routing table, mapped writable here; the router only reads it.
    pub routing_table: RegionResource,
    pub routing_capacity: u64,
    pub routing_update_ch: u8,
    pub interfaces: ClientList<NetIdentity, MAX_INTERFACES>,
    pub tables: ClientList<RuleTable, MAX_RULE_TABLES>,
}

impl Wire for RuleServerConfig {
    const SIZE: usize = Connection::SIZE
        + Connection::SIZE
        + DeviceRegion::SIZE
        + ArpConnection::SIZE
        + RegionResource::SIZE
        + 8
        + 8
        + ClientList::<NetIdentity, MAX_INTERFACES>::SIZE
        + ClientList::<RuleTable, MAX_RULE_TABLES>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.rx_active.write(out);
        self.free.write(out);
        self.data.write(out);
        self.arp.write(out);
        self.routing_table.write(out);
        put_u64(out, self.routing_capacity);
        put_u8(out, self.routing_update_ch);
        put_pad(out, 7);
        self.interfaces.write(out);
        self.tables.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        let rx_active = Connection::parse(c)?;
        let free = Connection::parse(c)?;
        let data = DeviceRegion::parse(c)?;
        let arp = ArpConnection::parse(c)?;
        let routing_table = RegionResource::parse(c)?;
        let routing_capacity = c.u64()?;
        let routing_update_ch = c.u8()?;
        c.pad(7)?;
        Ok(Self {
            rx_active,
            free,
            data,
            arp,
            routing_table,
            routing_capacity,
            routing_update_ch,
            interfaces: ClientList::parse(c)?,
            tables: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for RuleServerConfig {
    const ROLE: Role = Role::RuleServer;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IcmpConfig {
    pub router: Connection,
    /// Read-only transmit registration on every interface.
    pub tx: ClientList<TxClient, MAX_INTERFACES>,
}

impl Wire for IcmpConfig {
    const SIZE: usize = Connection::SIZE + ClientList::<TxClient, MAX_INTERFACES>::SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        self.router.write(out);
        self.tx.write(out);
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self, AbiError> {
        Ok(Self {
            router: Connection::parse(c)?,
            tx: ClientList::parse(c)?,
        })
    }
}

impl ConfigRecord for IcmpConfig {
    const ROLE: Role = Role::Icmp;
}
