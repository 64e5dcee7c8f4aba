//! # Region Layout Resolution
//!
//! Sizes every shared-memory region of the generated system from the true
//! in-binary layout of the structures that will occupy it.
//!
//! The authoritative source is the component binaries themselves: each one
//! exports an exemplar object symbol per structure (`fw_rule_entry`,
//! `fw_queue_slot`, ...) whose `st_size` in the symbol table is the size the
//! compiled code actually uses. A [`StructureLayout`] either carries that
//! `(binary, symbol)` reference (resolved once through a [`StructSizes`]
//! implementation) or a directly-given size, and multiplies the entry size
//! by its capacity. A [`RegionLayout`] sums an ordered list of structures
//! and rounds the total up to the page size.
//!
//! Resolution order matters: a region can only be sized after every
//! structure it references is resolved, and capacities may change mid-build
//! (derived bitmap sizes), so descriptors stay mutable until the wiring
//! stage asks for the final size. Everything lives in a [`LayoutContext`]
//! owned by the orchestrator; there is no global registry, so independent
//! builds can coexist in one process.

pub mod elf;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::elf::{ElfError, ElfView};

/// Page size of the target platform. Every shared region is a whole number
/// of pages.
pub const PAGE_SIZE: u64 = 0x1000;

/// Round a byte count up to a whole number of pages.
///
/// Anything smaller than one page becomes one page; aligned sizes pass
/// through unchanged.
///
/// ```rust
/// # use fw_layout::round_to_page;
/// assert_eq!(round_to_page(1), 0x1000);
/// assert_eq!(round_to_page(0x1000), 0x1000);
/// assert_eq!(round_to_page(0x1001), 0x2000);
/// ```
#[must_use]
pub const fn round_to_page(size: u64) -> u64 {
    if size < PAGE_SIZE {
        PAGE_SIZE
    } else {
        (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("cannot read binary `{binary}`: {source}")]
    MissingBinary {
        binary: String,
        source: std::io::Error,
    },
    #[error("in binary `{binary}`: {source}")]
    Elf { binary: String, source: ElfError },
    #[error("structure `{symbol}` in `{binary}` has zero size")]
    ZeroSized { binary: String, symbol: String },
    #[error("structure `{0}` used before its size was resolved")]
    Unresolved(String),
    #[error("region `{0}` references no structures and has no explicit size")]
    EmptyRegion(String),
}

/// Source of structure entry sizes.
///
/// The production implementation is [`LayoutContext`], which reads ELF
/// symbol tables; tests substitute a canned table.
pub trait StructSizes {
    /// Entry size in bytes of `symbol` as compiled into `binary`.
    ///
    /// Fails if the binary is unreadable, the symbol is absent, or the size
    /// is zero.
    fn entry_size(&mut self, binary: &str, symbol: &str) -> Result<u64, LayoutError>;
}

/// Build-wide layout state: the build directory and a cache of loaded
/// component binaries.
pub struct LayoutContext {
    build_dir: PathBuf,
    binaries: HashMap<String, Vec<u8>>,
}

impl LayoutContext {
    #[must_use]
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
            binaries: HashMap::new(),
        }
    }

    fn load(&mut self, binary: &str) -> Result<&[u8], LayoutError> {
        if !self.binaries.contains_key(binary) {
            let path = self.build_dir.join(binary);
            let bytes = std::fs::read(&path).map_err(|source| LayoutError::MissingBinary {
                binary: binary.into(),
                source,
            })?;
            self.binaries.insert(binary.into(), bytes);
        }
        Ok(&self.binaries[binary])
    }
}

impl StructSizes for LayoutContext {
    fn entry_size(&mut self, binary: &str, symbol: &str) -> Result<u64, LayoutError> {
        let bytes = self.load(binary)?;
        let view = ElfView::parse(bytes).map_err(|source| LayoutError::Elf {
            binary: binary.into(),
            source,
        })?;
        let size = view.symbol_size(symbol).map_err(|source| LayoutError::Elf {
            binary: binary.into(),
            source,
        })?;
        if size == 0 {
            return Err(LayoutError::ZeroSized {
                binary: binary.into(),
                symbol: symbol.into(),
            });
        }
        log::debug!("resolved {symbol} in {binary}: {size} bytes");
        Ok(size)
    }
}

/// One structure occupying part of a region: either `entry_size × capacity`
/// with the entry size resolved from a binary, or a directly-given size.
#[derive(Clone, Debug)]
pub struct StructureLayout {
    name: String,
    source: Option<(String, String)>, // (binary, symbol)
    entry_size: Option<u64>,
    capacity: u64,
}

impl StructureLayout {
    /// A structure whose entry size is resolved from `binary`'s symbol
    /// table.
    #[must_use]
    pub fn from_symbol(binary: &str, symbol: &str, capacity: u64) -> Self {
        Self {
            name: symbol.into(),
            source: Some((binary.into(), symbol.into())),
            entry_size: None,
            capacity,
        }
    }

    /// A structure with a directly-given size (capacity 1).
    #[must_use]
    pub fn direct(name: &str, size: u64) -> Self {
        Self {
            name: name.into(),
            source: None,
            entry_size: Some(size),
            capacity: 1,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the entry size if it has a symbol source and is not yet
    /// known. Idempotent.
    pub fn resolve(&mut self, sizes: &mut dyn StructSizes) -> Result<(), LayoutError> {
        if self.entry_size.is_none() {
            let (binary, symbol) = self
                .source
                .as_ref()
                .ok_or_else(|| LayoutError::Unresolved(self.name.clone()))?;
            self.entry_size = Some(sizes.entry_size(binary, symbol)?);
        }
        Ok(())
    }

    /// Change the capacity of an already-registered structure. The final
    /// size is recomputed on the next [`size`](Self::size) call.
    pub fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
    }

    /// Replace the size outright, dropping any resolution state. Used for
    /// derived sizes that depend on another structure's capacity.
    pub fn set_size(&mut self, size: u64) {
        self.entry_size = Some(size);
        self.capacity = 1;
    }

    /// Final size in bytes. Must be non-zero; unresolved structures are an
    /// error, never a silent zero.
    pub fn size(&self) -> Result<u64, LayoutError> {
        let entry = self
            .entry_size
            .ok_or_else(|| LayoutError::Unresolved(self.name.clone()))?;
        let total = entry * self.capacity;
        if total == 0 {
            return Err(LayoutError::Unresolved(self.name.clone()));
        }
        Ok(total)
    }
}

/// An ordered list of structures sharing one memory region.
#[derive(Clone, Debug)]
pub struct RegionLayout {
    name: String,
    structures: Vec<StructureLayout>,
    explicit_min: Option<u64>,
}

impl RegionLayout {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            structures: Vec::new(),
            explicit_min: None,
        }
    }

    /// A region with an explicit minimum size, independent of any
    /// structure contents.
    #[must_use]
    pub fn with_min(name: &str, min: u64) -> Self {
        Self {
            name: name.into(),
            structures: Vec::new(),
            explicit_min: Some(min),
        }
    }

    pub fn push(&mut self, structure: StructureLayout) -> &mut Self {
        self.structures.push(structure);
        self
    }

    /// Resolve every referenced structure.
    pub fn resolve(&mut self, sizes: &mut dyn StructSizes) -> Result<(), LayoutError> {
        for s in &mut self.structures {
            s.resolve(sizes)?;
        }
        Ok(())
    }

    /// Sum of the constituent structure sizes plus the explicit minimum.
    pub fn minimum_size(&self) -> Result<u64, LayoutError> {
        if self.structures.is_empty() && self.explicit_min.is_none() {
            return Err(LayoutError::EmptyRegion(self.name.clone()));
        }
        let mut total = self.explicit_min.unwrap_or(0);
        for s in &self.structures {
            total += s.size()?;
        }
        Ok(total)
    }

    /// Minimum size rounded up to the page size.
    pub fn region_size(&self) -> Result<u64, LayoutError> {
        Ok(round_to_page(self.minimum_size()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canned size table standing in for real binaries.
    struct Canned(&'static [(&'static str, &'static str, u64)]);

    impl StructSizes for Canned {
        fn entry_size(&mut self, binary: &str, symbol: &str) -> Result<u64, LayoutError> {
            self.0
                .iter()
                .find(|(b, s, _)| *b == binary && *s == symbol)
                .map(|&(_, _, size)| size)
                .ok_or_else(|| LayoutError::Elf {
                    binary: binary.into(),
                    source: ElfError::MissingSymbol(symbol.into()),
                })
        }
    }

    #[test]
    fn rounding_covers_all_three_cases() {
        assert_eq!(round_to_page(0), PAGE_SIZE);
        assert_eq!(round_to_page(1), PAGE_SIZE);
        assert_eq!(round_to_page(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_to_page(PAGE_SIZE + 1), 2 * PAGE_SIZE);
        assert_eq!(round_to_page(3 * PAGE_SIZE), 3 * PAGE_SIZE);
    }

    #[test]
    fn region_size_is_page_multiple_and_covers_contents() {
        let mut sizes = Canned(&[("filter.elf", "fw_rule_entry", 48)]);
        let mut region = RegionLayout::new("rules");
        region.push(StructureLayout::from_symbol("filter.elf", "fw_rule_entry", 256));
        region.resolve(&mut sizes).unwrap();
        let min = region.minimum_size().unwrap();
        let size = region.region_size().unwrap();
        assert_eq!(min, 48 * 256);
        assert!(size >= min);
        assert_eq!(size % PAGE_SIZE, 0);
    }

    #[test]
    fn sub_page_region_is_one_page() {
        let mut region = RegionLayout::new("bitmap");
        region.push(StructureLayout::direct("rule_bitmap", 32));
        assert_eq!(region.region_size().unwrap(), PAGE_SIZE);
    }

    #[test]
    fn unresolved_structure_is_an_error_not_zero() {
        let region = {
            let mut r = RegionLayout::new("cache");
            r.push(StructureLayout::from_symbol("arp.elf", "fw_arp_entry", 512));
            r
        };
        let err = region.minimum_size().unwrap_err();
        assert!(matches!(err, LayoutError::Unresolved(ref s) if s == "fw_arp_entry"));
    }

    #[test]
    fn empty_region_is_rejected_by_name() {
        let region = RegionLayout::new("empty");
        let err = region.region_size().unwrap_err();
        assert!(matches!(err, LayoutError::EmptyRegion(ref s) if s == "empty"));
    }

    #[test]
    fn capacity_update_invalidates_previous_size() {
        let mut sizes = Canned(&[("router.elf", "fw_routing_entry", 16)]);
        let mut s = StructureLayout::from_symbol("router.elf", "fw_routing_entry", 64);
        s.resolve(&mut sizes).unwrap();
        assert_eq!(s.size().unwrap(), 16 * 64);
        s.set_capacity(128);
        assert_eq!(s.size().unwrap(), 16 * 128);
    }

    #[test]
    fn derived_size_replaces_resolution() {
        let mut s = StructureLayout::from_symbol("filter.elf", "fw_rule_entry", 256);
        s.set_size(256_u64.div_ceil(8));
        assert_eq!(s.size().unwrap(), 32);
    }

    #[test]
    fn context_resolves_from_elf_fixture() {
        let dir = std::env::temp_dir().join(format!("fw-layout-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bytes = crate::elf::fixture::elf(&[("fw_queue_slot", 64)], &[]);
        std::fs::write(dir.join("router.elf"), &bytes).unwrap();

        let mut ctx = LayoutContext::new(&dir);
        assert_eq!(ctx.entry_size("router.elf", "fw_queue_slot").unwrap(), 64);
        let err = ctx.entry_size("router.elf", "fw_absent").unwrap_err();
        assert!(matches!(err, LayoutError::Elf { .. }));
        let err = ctx.entry_size("gone.elf", "fw_queue_slot").unwrap_err();
        assert!(matches!(err, LayoutError::MissingBinary { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_sized_symbol_is_fatal() {
        let dir = std::env::temp_dir().join(format!("fw-layout-zero-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bytes = crate::elf::fixture::elf(&[("fw_queue_slot", 0)], &[]);
        std::fs::write(dir.join("router.elf"), &bytes).unwrap();

        let mut ctx = LayoutContext::new(&dir);
        let err = ctx.entry_size("router.elf", "fw_queue_slot").unwrap_err();
        assert!(matches!(err, LayoutError::ZeroSized { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
