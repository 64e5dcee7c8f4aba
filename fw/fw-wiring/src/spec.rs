//! Connection and region builders.
//!
//! Each builder describes one inter-process resource-sharing pattern and
//! is consumed by its `create`/`map` call, so a spec can never allocate
//! its regions or channels twice. Region names are chosen by the caller
//! and must be unique system-wide; the system description rejects
//! collisions.

use fw_layout::{round_to_page, LayoutError, StructSizes};
use fw_sysdesc::{
    ArpConnectionResource, ConnectionResource, DeviceRegionResource, MrId, PdId, Perms,
    RegionResource, SysDescError, SystemDescription,
};

/// Resolved in-binary layout of the shared queue structure: a fixed
/// header followed by `capacity` slots.
#[derive(Copy, Clone, Debug)]
pub struct QueueLayout {
    pub header: u64,
    pub slot: u64,
}

impl QueueLayout {
    /// Resolve the queue header and slot sizes from the virtualizer
    /// binary, which defines the format both sides compile against.
    pub fn resolve(sizes: &mut dyn StructSizes, binary: &str) -> Result<Self, LayoutError> {
        Ok(Self {
            header: sizes.entry_size(binary, "fw_queue_header")?,
            slot: sizes.entry_size(binary, "fw_queue_slot")?,
        })
    }

    /// Bytes needed for a queue of `capacity` slots, page-rounded.
    #[must_use]
    pub const fn region_size(&self, capacity: u64) -> u64 {
        round_to_page(self.header + self.slot * capacity)
    }
}

/// A point-to-point queue: one shared region mapped read-write into both
/// endpoints plus one notification channel.
pub struct ConnectionSpec {
    name: String,
    a: PdId,
    b: PdId,
    capacity: u64,
}

impl ConnectionSpec {
    pub fn new(name: impl Into<String>, a: PdId, b: PdId, capacity: u64) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            capacity,
        }
    }

    /// Allocate the region and channel; returns one resource per
    /// endpoint, each carrying its own channel-id half.
    pub fn create(
        self,
        sys: &mut SystemDescription,
        queues: &QueueLayout,
    ) -> Result<(ConnectionResource, ConnectionResource), SysDescError> {
        let mr = sys.add_memory_region(&self.name, queues.region_size(self.capacity))?;
        let qa = sys.map(self.a, mr, Perms::READ | Perms::WRITE);
        let qb = sys.map(self.b, mr, Perms::READ | Perms::WRITE);
        let (ch_a, ch_b) = sys.channel(self.a, self.b)?;
        Ok((
            ConnectionResource {
                queue: qa,
                capacity: self.capacity,
                ch: ch_a,
            },
            ConnectionResource {
                queue: qb,
                capacity: self.capacity,
                ch: ch_b,
            },
        ))
    }
}

/// A bidirectional request/response pair: two identically-sized regions
/// and a single shared channel.
pub struct ArpConnectionSpec {
    name: String,
    a: PdId,
    b: PdId,
    capacity: u64,
}

impl ArpConnectionSpec {
    pub fn new(name: impl Into<String>, a: PdId, b: PdId, capacity: u64) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            capacity,
        }
    }

    pub fn create(
        self,
        sys: &mut SystemDescription,
        queues: &QueueLayout,
    ) -> Result<(ArpConnectionResource, ArpConnectionResource), SysDescError> {
        let size = queues.region_size(self.capacity);
        let req = sys.add_memory_region(&format!("{}_req", self.name), size)?;
        let resp = sys.add_memory_region(&format!("{}_resp", self.name), size)?;
        let req_a = sys.map(self.a, req, Perms::READ | Perms::WRITE);
        let resp_a = sys.map(self.a, resp, Perms::READ | Perms::WRITE);
        let req_b = sys.map(self.b, req, Perms::READ | Perms::WRITE);
        let resp_b = sys.map(self.b, resp, Perms::READ | Perms::WRITE);
        let (ch_a, ch_b) = sys.channel(self.a, self.b)?;
        Ok((
            ArpConnectionResource {
                request: req_a,
                response: resp_a,
                capacity: self.capacity,
                ch: ch_a,
            },
            ArpConnectionResource {
                request: req_b,
                response: resp_b,
                capacity: self.capacity,
                ch: ch_b,
            },
        ))
    }
}

/// One endpoint's view of a data-plane connection: the queue handle plus
/// the DMA pool the queued descriptors point into.
#[derive(Copy, Clone, Debug)]
pub struct DataConnectionResource {
    pub conn: ConnectionResource,
    pub data: DeviceRegionResource,
}

/// A queue connection that additionally maps an existing DMA pool into
/// both endpoints, with independently specified permissions per side.
pub struct DataConnectionSpec {
    conn: ConnectionSpec,
    a: PdId,
    b: PdId,
    pool: MrId,
    a_perms: Perms,
    b_perms: Perms,
}

impl DataConnectionSpec {
    pub fn new(
        name: impl Into<String>,
        a: PdId,
        b: PdId,
        capacity: u64,
        pool: MrId,
        a_perms: Perms,
        b_perms: Perms,
    ) -> Self {
        Self {
            conn: ConnectionSpec::new(name, a, b, capacity),
            a,
            b,
            pool,
            a_perms,
            b_perms,
        }
    }

    pub fn create(
        self,
        sys: &mut SystemDescription,
        queues: &QueueLayout,
    ) -> Result<(DataConnectionResource, DataConnectionResource), SysDescError> {
        let (conn_a, conn_b) = self.conn.create(sys, queues)?;
        let data_a = sys.map_device(self.a, self.pool, self.a_perms)?;
        let data_b = sys.map_device(self.b, self.pool, self.b_perms)?;
        Ok((
            DataConnectionResource {
                conn: conn_a,
                data: data_a,
            },
            DataConnectionResource {
                conn: conn_b,
                data: data_b,
            },
        ))
    }
}

/// A fresh region mapped into two protection domains with asymmetric
/// permissions. The owner is the structural owner of the memory; write
/// access follows whatever the caller specifies, not the ownership.
pub struct SharedRegionSpec {
    name: String,
    size: u64,
    owner: PdId,
    owner_perms: Perms,
    peer: PdId,
    peer_perms: Perms,
}

impl SharedRegionSpec {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        owner: PdId,
        owner_perms: Perms,
        peer: PdId,
        peer_perms: Perms,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            owner,
            owner_perms,
            peer,
            peer_perms,
        }
    }

    pub fn map(
        self,
        sys: &mut SystemDescription,
    ) -> Result<(RegionResource, RegionResource), SysDescError> {
        let mr = sys.add_memory_region(&self.name, self.size)?;
        let owner = sys.map(self.owner, mr, self.owner_perms);
        let peer = sys.map(self.peer, mr, self.peer_perms);
        Ok((owner, peer))
    }
}

/// A fresh region visible to a single protection domain.
pub struct PrivateRegionSpec {
    name: String,
    size: u64,
    owner: PdId,
    perms: Perms,
}

impl PrivateRegionSpec {
    pub fn new(name: impl Into<String>, size: u64, owner: PdId, perms: Perms) -> Self {
        Self {
            name: name.into(),
            size,
            owner,
            perms,
        }
    }

    pub fn create(self, sys: &mut SystemDescription) -> Result<RegionResource, SysDescError> {
        let mr = sys.add_memory_region(&self.name, self.size)?;
        Ok(sys.map(self.owner, mr, self.perms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_sysdesc::SchedParams;

    const QUEUES: QueueLayout = QueueLayout {
        header: 64,
        slot: 16,
    };

    fn two_pds() -> (SystemDescription, PdId, PdId) {
        let mut sys = SystemDescription::new();
        let a = sys
            .add_protection_domain("a", "a.elf", SchedParams::with_priority(1))
            .unwrap();
        let b = sys
            .add_protection_domain("b", "b.elf", SchedParams::with_priority(2))
            .unwrap();
        (sys, a, b)
    }

    #[test]
    fn queue_region_size_scales_with_capacity() {
        assert_eq!(QUEUES.region_size(1), 0x1000);
        // 64 + 16 * 512 = 8256 -> three pages
        assert_eq!(QUEUES.region_size(512), 0x3000);
    }

    #[test]
    fn connection_gives_each_side_its_own_channel_half() {
        let (mut sys, a, b) = two_pds();
        let (ra, rb) = ConnectionSpec::new("q0", a, b, 512)
            .create(&mut sys, &QUEUES)
            .unwrap();
        assert_eq!(ra.capacity, 512);
        assert_eq!(rb.capacity, 512);
        assert_eq!(ra.queue.size, 0x3000);
        // Fresh PDs, so both halves got their first channel id.
        assert_eq!((ra.ch, rb.ch), (0, 0));
        assert_eq!(sys.channels().len(), 1);
    }

    #[test]
    fn duplicate_region_names_collide() {
        let (mut sys, a, b) = two_pds();
        ConnectionSpec::new("q0", a, b, 64)
            .create(&mut sys, &QUEUES)
            .unwrap();
        let err = ConnectionSpec::new("q0", a, b, 64)
            .create(&mut sys, &QUEUES)
            .unwrap_err();
        assert!(matches!(err, SysDescError::DuplicateRegion(_)));
    }

    #[test]
    fn arp_connection_allocates_two_regions_one_channel() {
        let (mut sys, a, b) = two_pds();
        let (ra, rb) = ArpConnectionSpec::new("arp0", a, b, 128)
            .create(&mut sys, &QUEUES)
            .unwrap();
        assert_ne!(ra.request.vaddr, ra.response.vaddr);
        assert_eq!(ra.request.size, rb.request.size);
        assert_eq!(sys.channels().len(), 1);
    }

    #[test]
    fn data_connection_maps_the_pool_into_both_sides() {
        let (mut sys, a, b) = two_pds();
        let pool = sys
            .add_device_region("fw_data0", 0x20_0000, 0x5800_0000)
            .unwrap();
        let (ra, rb) = DataConnectionSpec::new("q0", a, b, 512, pool, Perms::READ, Perms::READ)
            .create(&mut sys, &QUEUES)
            .unwrap();
        assert_eq!(ra.data.io_addr, 0x5800_0000);
        assert_eq!(rb.data.io_addr, 0x5800_0000);
        assert_eq!(ra.data.size, 0x20_0000);
    }

    #[test]
    fn shared_region_hands_out_both_views() {
        let (mut sys, a, b) = two_pds();
        let (owner, peer) = SharedRegionSpec::new(
            "cache0",
            0x3000,
            a,
            Perms::READ | Perms::WRITE,
            b,
            Perms::READ,
        )
        .map(&mut sys)
        .unwrap();
        assert_eq!(owner.size, 0x3000);
        assert_eq!(peer.size, 0x3000);
    }

    #[test]
    fn private_region_has_a_single_view() {
        let (mut sys, a, _b) = two_pds();
        let view = PrivateRegionSpec::new("packet_wait", 0x4000, a, Perms::READ | Perms::WRITE)
            .create(&mut sys)
            .unwrap();
        assert_eq!(view.size, 0x4000);
    }
}
