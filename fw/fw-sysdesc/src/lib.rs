//! # System Description
//!
//! The model behind the capability microkernel's loader input: protection
//! domains, memory regions, mappings and notification channels, accumulated
//! during wiring and rendered as one XML file per build.
//!
//! Two allocators live here and make the output deterministic:
//!
//! - every mapping's virtual address is bump-allocated per protection
//!   domain from a fixed base, so a component's view of a region depends
//!   only on the order of `map` calls;
//! - channel ids are allocated per protection domain from a fixed range;
//!   running out is a hard error, never a wrap-around.
//!
//! Shared regions are the only shared mutable state in the generated
//! system. There are no runtime locks; safety rests entirely on this model
//! never granting write access to more than one side unless the wiring
//! explicitly asks for it.

use core::fmt;

bitflags::bitflags! {
    /// Mapping permissions from one protection domain's perspective.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Perms: u8 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
    }
}

impl Perms {
    /// Loader spelling: `r`, `w`, or `rw`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "",
        }
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base virtual address of the first mapping in every protection domain.
pub const MAP_VADDR_BASE: u64 = 0x0200_0000;

/// Number of notification channel ids available per protection domain.
pub const CHANNEL_IDS: u8 = 62;

/// Handle to a protection domain within one [`SystemDescription`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PdId(usize);

/// Handle to a memory region within one [`SystemDescription`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MrId(usize);

/// A mapped region as seen from one protection domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionResource {
    pub vaddr: u64,
    pub size: u64,
}

/// A mapped DMA-capable region: the virtual view plus the physical base
/// handed to hardware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceRegionResource {
    pub vaddr: u64,
    pub io_addr: u64,
    pub size: u64,
}

/// The handle a component embeds in its config to address one peer: the
/// shared queue view, its slot capacity, and this side's channel id.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConnectionResource {
    pub queue: RegionResource,
    pub capacity: u64,
    pub ch: u8,
}

/// A bidirectional request/response pair sharing one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArpConnectionResource {
    pub request: RegionResource,
    pub response: RegionResource,
    pub capacity: u64,
    pub ch: u8,
}

/// Scheduling parameters of one protection domain. Budget, period and
/// stack size are optional; omitted means the scheduler default.
#[derive(Copy, Clone, Debug)]
pub struct SchedParams {
    pub priority: u8,
    pub budget: Option<u32>,
    pub period: Option<u32>,
    pub stack_size: Option<u32>,
}

impl SchedParams {
    #[must_use]
    pub const fn with_priority(priority: u8) -> Self {
        Self {
            priority,
            budget: None,
            period: None,
            stack_size: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SysDescError {
    #[error("duplicate protection domain name `{0}`")]
    DuplicatePd(String),
    #[error("duplicate memory region name `{0}`")]
    DuplicateRegion(String),
    #[error("region `{region}` size {size:#x} is not page-aligned")]
    UnalignedRegion { region: String, size: u64 },
    #[error("protection domain `{0}` has no free channel ids")]
    ChannelIdsExhausted(String),
    #[error("region `{0}` has no physical address")]
    NoPhysAddr(String),
}

#[derive(Clone, Debug)]
struct Mapping {
    mr: MrId,
    vaddr: u64,
    perms: Perms,
}

#[derive(Clone, Debug)]
struct ProtectionDomain {
    name: String,
    program_image: String,
    sched: SchedParams,
    mappings: Vec<Mapping>,
    next_vaddr: u64,
    next_channel: u8,
}

#[derive(Clone, Debug)]
struct MemoryRegion {
    name: String,
    size: u64,
    phys_addr: Option<u64>,
}

/// One end of a notification channel.
#[derive(Copy, Clone, Debug)]
pub struct ChannelEnd {
    pub pd: PdId,
    pub id: u8,
}

/// A notification channel between two protection domains. No payload; the
/// payload travels through a shared region.
#[derive(Copy, Clone, Debug)]
pub struct Channel {
    pub a: ChannelEnd,
    pub b: ChannelEnd,
}

/// The whole system under construction.
#[derive(Default, Debug)]
pub struct SystemDescription {
    pds: Vec<ProtectionDomain>,
    regions: Vec<MemoryRegion>,
    channels: Vec<Channel>,
}

impl SystemDescription {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protection domain. Names must be unique.
    pub fn add_protection_domain(
        &mut self,
        name: &str,
        program_image: &str,
        sched: SchedParams,
    ) -> Result<PdId, SysDescError> {
        if self.pds.iter().any(|pd| pd.name == name) {
            return Err(SysDescError::DuplicatePd(name.into()));
        }
        self.pds.push(ProtectionDomain {
            name: name.into(),
            program_image: program_image.into(),
            sched,
            mappings: Vec::new(),
            next_vaddr: MAP_VADDR_BASE,
            next_channel: 0,
        });
        Ok(PdId(self.pds.len() - 1))
    }

    /// Allocate an anonymous memory region. `size` must be page-aligned
    /// (regions are sized through the layout resolver, which rounds).
    pub fn add_memory_region(&mut self, name: &str, size: u64) -> Result<MrId, SysDescError> {
        self.add_region(name, size, None)
    }

    /// Register a physically-addressed, DMA-capable region.
    pub fn add_device_region(
        &mut self,
        name: &str,
        size: u64,
        phys_addr: u64,
    ) -> Result<MrId, SysDescError> {
        self.add_region(name, size, Some(phys_addr))
    }

    fn add_region(
        &mut self,
        name: &str,
        size: u64,
        phys_addr: Option<u64>,
    ) -> Result<MrId, SysDescError> {
        if self.regions.iter().any(|r| r.name == name) {
            return Err(SysDescError::DuplicateRegion(name.into()));
        }
        if size == 0 || size % 0x1000 != 0 {
            return Err(SysDescError::UnalignedRegion {
                region: name.into(),
                size,
            });
        }
        self.regions.push(MemoryRegion {
            name: name.into(),
            size,
            phys_addr,
        });
        Ok(MrId(self.regions.len() - 1))
    }

    /// Map a region into a protection domain and return its view.
    pub fn map(&mut self, pd: PdId, mr: MrId, perms: Perms) -> RegionResource {
        let size = self.regions[mr.0].size;
        let dom = &mut self.pds[pd.0];
        let vaddr = dom.next_vaddr;
        dom.next_vaddr += size;
        dom.mappings.push(Mapping { mr, vaddr, perms });
        RegionResource { vaddr, size }
    }

    /// Map a DMA-capable region; the view carries the physical base.
    pub fn map_device(
        &mut self,
        pd: PdId,
        mr: MrId,
        perms: Perms,
    ) -> Result<DeviceRegionResource, SysDescError> {
        let io_addr = self.regions[mr.0]
            .phys_addr
            .ok_or_else(|| SysDescError::NoPhysAddr(self.regions[mr.0].name.clone()))?;
        let view = self.map(pd, mr, perms);
        Ok(DeviceRegionResource {
            vaddr: view.vaddr,
            io_addr,
            size: view.size,
        })
    }

    /// Allocate a notification channel between two protection domains and
    /// return the channel id on each side.
    pub fn channel(&mut self, a: PdId, b: PdId) -> Result<(u8, u8), SysDescError> {
        let id_a = self.alloc_channel_id(a)?;
        let id_b = self.alloc_channel_id(b)?;
        self.channels.push(Channel {
            a: ChannelEnd { pd: a, id: id_a },
            b: ChannelEnd { pd: b, id: id_b },
        });
        Ok((id_a, id_b))
    }

    fn alloc_channel_id(&mut self, pd: PdId) -> Result<u8, SysDescError> {
        let dom = &mut self.pds[pd.0];
        if dom.next_channel >= CHANNEL_IDS {
            return Err(SysDescError::ChannelIdsExhausted(dom.name.clone()));
        }
        let id = dom.next_channel;
        dom.next_channel += 1;
        Ok(id)
    }

    #[must_use]
    pub fn pd_name(&self, pd: PdId) -> &str {
        &self.pds[pd.0].name
    }

    #[must_use]
    pub fn pd_image(&self, pd: PdId) -> &str {
        &self.pds[pd.0].program_image
    }

    #[must_use]
    pub fn region_name(&self, mr: MrId) -> &str {
        &self.regions[mr.0].name
    }

    #[must_use]
    pub fn region_size(&self, mr: MrId) -> u64 {
        self.regions[mr.0].size
    }

    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Render the loader input.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<system>\n");
        for r in &self.regions {
            out.push_str(&format!(
                "    <memory_region name=\"{}\" size=\"{:#x}\"",
                xml_escape(&r.name),
                r.size
            ));
            if let Some(pa) = r.phys_addr {
                out.push_str(&format!(" phys_addr=\"{pa:#x}\""));
            }
            out.push_str(" />\n");
        }
        for pd in &self.pds {
            out.push_str(&format!(
                "    <protection_domain name=\"{}\" priority=\"{}\"",
                xml_escape(&pd.name),
                pd.sched.priority
            ));
            if let Some(budget) = pd.sched.budget {
                out.push_str(&format!(" budget=\"{budget}\""));
            }
            if let Some(period) = pd.sched.period {
                out.push_str(&format!(" period=\"{period}\""));
            }
            if let Some(stack) = pd.sched.stack_size {
                out.push_str(&format!(" stack_size=\"{stack:#x}\""));
            }
            out.push_str(">\n");
            out.push_str(&format!(
                "        <program_image path=\"{}\" />\n",
                xml_escape(&pd.program_image)
            ));
            for m in &pd.mappings {
                out.push_str(&format!(
                    "        <map mr=\"{}\" vaddr=\"{:#x}\" perms=\"{}\" />\n",
                    xml_escape(&self.regions[m.mr.0].name),
                    m.vaddr,
                    m.perms
                ));
            }
            out.push_str("    </protection_domain>\n");
        }
        for ch in &self.channels {
            out.push_str("    <channel>\n");
            for end in [ch.a, ch.b] {
                out.push_str(&format!(
                    "        <end pd=\"{}\" id=\"{}\" />\n",
                    xml_escape(&self.pds[end.pd.0].name),
                    end.id
                ));
            }
            out.push_str("    </channel>\n");
        }
        out.push_str("</system>\n");
        out
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> SchedParams {
        SchedParams::with_priority(50)
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut sys = SystemDescription::new();
        sys.add_protection_domain("router", "router.elf", sched())
            .unwrap();
        let err = sys
            .add_protection_domain("router", "router.elf", sched())
            .unwrap_err();
        assert!(matches!(err, SysDescError::DuplicatePd(ref n) if n == "router"));

        sys.add_memory_region("rules", 0x1000).unwrap();
        let err = sys.add_memory_region("rules", 0x1000).unwrap_err();
        assert!(matches!(err, SysDescError::DuplicateRegion(ref n) if n == "rules"));
    }

    #[test]
    fn unaligned_region_is_rejected() {
        let mut sys = SystemDescription::new();
        let err = sys.add_memory_region("odd", 0x1234).unwrap_err();
        assert!(matches!(err, SysDescError::UnalignedRegion { size: 0x1234, .. }));
    }

    #[test]
    fn mappings_do_not_overlap_within_a_pd() {
        let mut sys = SystemDescription::new();
        let pd = sys
            .add_protection_domain("rx_virt0", "net_virt_rx.elf", sched())
            .unwrap();
        let a = sys.add_memory_region("q_a", 0x2000).unwrap();
        let b = sys.add_memory_region("q_b", 0x1000).unwrap();
        let va = sys.map(pd, a, Perms::READ | Perms::WRITE);
        let vb = sys.map(pd, b, Perms::READ);
        assert_eq!(va.vaddr, MAP_VADDR_BASE);
        assert_eq!(vb.vaddr, MAP_VADDR_BASE + 0x2000);
    }

    #[test]
    fn device_mapping_carries_phys_addr() {
        let mut sys = SystemDescription::new();
        let pd = sys
            .add_protection_domain("tx_virt0", "net_virt_tx.elf", sched())
            .unwrap();
        let mr = sys
            .add_device_region("fw_data0", 0x20_0000, 0x5800_0000)
            .unwrap();
        let view = sys.map_device(pd, mr, Perms::READ).unwrap();
        assert_eq!(view.io_addr, 0x5800_0000);
        assert_eq!(view.size, 0x20_0000);

        let plain = sys.add_memory_region("rules", 0x1000).unwrap();
        let err = sys.map_device(pd, plain, Perms::READ).unwrap_err();
        assert!(matches!(err, SysDescError::NoPhysAddr(ref n) if n == "rules"));
    }

    #[test]
    fn channel_ids_are_per_pd_and_bounded() {
        let mut sys = SystemDescription::new();
        let a = sys.add_protection_domain("a", "a.elf", sched()).unwrap();
        let b = sys.add_protection_domain("b", "b.elf", sched()).unwrap();
        let (ia, ib) = sys.channel(a, b).unwrap();
        assert_eq!((ia, ib), (0, 0));
        let (ia2, _) = sys.channel(a, b).unwrap();
        assert_eq!(ia2, 1);

        for _ in 2..CHANNEL_IDS {
            sys.channel(a, b).unwrap();
        }
        let err = sys.channel(a, b).unwrap_err();
        assert!(matches!(err, SysDescError::ChannelIdsExhausted(_)));
    }

    #[test]
    fn xml_lists_every_element() {
        let mut sys = SystemDescription::new();
        let pd = sys
            .add_protection_domain("router", "router.elf", SchedParams {
                priority: 98,
                budget: Some(20_000),
                period: Some(100_000),
                stack_size: Some(0x8000),
            })
            .unwrap();
        let mr = sys
            .add_device_region("fw_data0", 0x20_0000, 0x5800_0000)
            .unwrap();
        sys.map(pd, mr, Perms::READ | Perms::WRITE);
        let other = sys.add_protection_domain("icmp", "icmp.elf", sched()).unwrap();
        sys.channel(pd, other).unwrap();

        let xml = sys.to_xml();
        assert!(xml.contains("<memory_region name=\"fw_data0\" size=\"0x200000\" phys_addr=\"0x58000000\" />"));
        assert!(xml.contains("<protection_domain name=\"router\" priority=\"98\" budget=\"20000\" period=\"100000\" stack_size=\"0x8000\">"));
        assert!(xml.contains("<map mr=\"fw_data0\" vaddr=\"0x2000000\" perms=\"rw\" />"));
        assert!(xml.contains("<end pd=\"router\" id=\"0\" />"));
        assert!(xml.contains("<end pd=\"icmp\" id=\"0\" />"));
    }
}
