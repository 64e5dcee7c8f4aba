//! Minimal 64-bit little-endian ELF view.
//!
//! Only what the compiler needs: section lookup by name, object-symbol size
//! lookup through `.symtab`/`.strtab`, and in-place patching of a named
//! section. All reads are bounds-checked against the input slice.

use bitfield_struct::bitfield;

#[derive(Debug, thiserror::Error)]
pub enum ElfError {
    #[error("file too short for an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit ELF")]
    BadClass,
    #[error("not little-endian")]
    BadEndianness,
    #[error("unexpected section header entry size {0}")]
    BadShentsize(u16),
    #[error("truncated file while reading offset {0:#x}")]
    Truncated(usize),
    #[error("section name table is malformed")]
    BadStrings,
    #[error("no symbol table section")]
    NoSymbolTable,
    #[error("section `{0}` not found")]
    MissingSection(String),
    #[error("object symbol `{0}` not found")]
    MissingSymbol(String),
    #[error("section `{section}` holds {have} bytes, {need} required")]
    SectionTooSmall {
        section: String,
        need: usize,
        have: usize,
    },
}

const SHT_SYMTAB: u32 = 2;
const SYM_ENTSIZE: usize = 24;
const SH_ENTSIZE: usize = 64;
const STT_OBJECT: u8 = 1;

/// `Elf64_Sym.st_info`: low nibble is the symbol type, high nibble the bind.
#[bitfield(u8)]
pub struct SymInfo {
    #[bits(4)]
    pub sym_type: u8,
    #[bits(4)]
    pub bind: u8,
}

/// One parsed `Elf64_Shdr`.
#[derive(Copy, Clone, Debug)]
pub struct SectionHeader {
    pub name_off: u32,
    pub sh_type: u32,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub entsize: u64,
}

#[inline]
fn read_u16(buf: &[u8], off: usize) -> Result<u16, ElfError> {
    let end = off.checked_add(2).ok_or(ElfError::Truncated(off))?;
    let s = buf.get(off..end).ok_or(ElfError::Truncated(off))?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> Result<u32, ElfError> {
    let end = off.checked_add(4).ok_or(ElfError::Truncated(off))?;
    let s = buf.get(off..end).ok_or(ElfError::Truncated(off))?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

#[inline]
fn read_u64(buf: &[u8], off: usize) -> Result<u64, ElfError> {
    let end = off.checked_add(8).ok_or(ElfError::Truncated(off))?;
    let s = buf.get(off..end).ok_or(ElfError::Truncated(off))?;
    Ok(u64::from_le_bytes([
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
    ]))
}

/// NUL-terminated string at `off` within a string-table blob.
fn cstr_at(buf: &[u8], off: usize) -> Result<&str, ElfError> {
    let tail = buf.get(off..).ok_or(ElfError::BadStrings)?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::BadStrings)?;
    core::str::from_utf8(&tail[..end]).map_err(|_| ElfError::BadStrings)
}

/// Read-only view over an ELF image.
pub struct ElfView<'a> {
    bytes: &'a [u8],
    shoff: usize,
    shnum: usize,
    shstrndx: usize,
}

impl<'a> ElfView<'a> {
    /// Parse and validate the header and section table bounds.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        if bytes.len() < 64 {
            return Err(ElfError::TooShort);
        }
        if &bytes[0..4] != b"\x7FELF" {
            return Err(ElfError::BadMagic);
        }
        // ELFCLASS64
        if bytes[4] != 2 {
            return Err(ElfError::BadClass);
        }
        // ELFDATA2LSB; the generated layout is little-endian throughout.
        if bytes[5] != 1 {
            return Err(ElfError::BadEndianness);
        }

        let shoff = usize::try_from(read_u64(bytes, 40)?).map_err(|_| ElfError::Truncated(40))?;
        let shentsize = read_u16(bytes, 58)?;
        let shnum = read_u16(bytes, 60)? as usize;
        let shstrndx = read_u16(bytes, 62)? as usize;

        if shentsize as usize != SH_ENTSIZE {
            return Err(ElfError::BadShentsize(shentsize));
        }
        let table_end = shoff
            .checked_add(shnum * SH_ENTSIZE)
            .ok_or(ElfError::Truncated(shoff))?;
        if table_end > bytes.len() || shstrndx >= shnum {
            return Err(ElfError::Truncated(shoff));
        }

        Ok(Self {
            bytes,
            shoff,
            shnum,
            shstrndx,
        })
    }

    fn section(&self, index: usize) -> Result<SectionHeader, ElfError> {
        let base = self.shoff + index * SH_ENTSIZE;
        Ok(SectionHeader {
            name_off: read_u32(self.bytes, base)?,
            sh_type: read_u32(self.bytes, base + 4)?,
            offset: read_u64(self.bytes, base + 24)?,
            size: read_u64(self.bytes, base + 32)?,
            link: read_u32(self.bytes, base + 40)?,
            entsize: read_u64(self.bytes, base + 56)?,
        })
    }

    fn section_bytes(&self, sh: &SectionHeader) -> Result<&'a [u8], ElfError> {
        let off = usize::try_from(sh.offset).map_err(|_| ElfError::BadStrings)?;
        let size = usize::try_from(sh.size).map_err(|_| ElfError::BadStrings)?;
        let end = off.checked_add(size).ok_or(ElfError::Truncated(off))?;
        self.bytes.get(off..end).ok_or(ElfError::Truncated(off))
    }

    fn section_name(&self, sh: &SectionHeader) -> Result<&'a str, ElfError> {
        let strtab = self.section(self.shstrndx)?;
        cstr_at(self.section_bytes(&strtab)?, sh.name_off as usize)
    }

    /// Find a section header by exact name.
    pub fn find_section(&self, name: &str) -> Result<SectionHeader, ElfError> {
        for i in 0..self.shnum {
            let sh = self.section(i)?;
            if self.section_name(&sh)? == name {
                return Ok(sh);
            }
        }
        Err(ElfError::MissingSection(name.into()))
    }

    /// Size in bytes of the named object symbol, from the symbol table.
    ///
    /// This is the authoritative source for structure sizes: each component
    /// binary exports one exemplar object per structure whose `st_size` is
    /// the compiled in-binary size.
    pub fn symbol_size(&self, symbol: &str) -> Result<u64, ElfError> {
        let mut symtab = None;
        for i in 0..self.shnum {
            let sh = self.section(i)?;
            if sh.sh_type == SHT_SYMTAB && sh.entsize == SYM_ENTSIZE as u64 {
                symtab = Some(sh);
                break;
            }
        }
        let symtab = symtab.ok_or(ElfError::NoSymbolTable)?;

        let strtab = self.section(symtab.link as usize)?;
        let names = self.section_bytes(&strtab)?;
        let syms = self.section_bytes(&symtab)?;

        for entry in syms.chunks_exact(SYM_ENTSIZE) {
            let info = SymInfo::from_bits(entry[4]);
            if info.sym_type() != STT_OBJECT {
                continue;
            }
            let name_off = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            if cstr_at(names, name_off as usize)? == symbol {
                return Ok(u64::from_le_bytes([
                    entry[16], entry[17], entry[18], entry[19], entry[20], entry[21], entry[22],
                    entry[23],
                ]));
            }
        }
        Err(ElfError::MissingSymbol(symbol.into()))
    }
}

/// Overwrite the contents of the named section in place.
///
/// `data` must fit; the remainder of the section is zeroed so a shorter
/// record never leaves stale bytes behind.
pub fn patch_section(image: &mut [u8], section: &str, data: &[u8]) -> Result<(), ElfError> {
    let sh = ElfView::parse(image)?.find_section(section)?;
    let off = usize::try_from(sh.offset).map_err(|_| ElfError::BadStrings)?;
    let size = usize::try_from(sh.size).map_err(|_| ElfError::BadStrings)?;
    if data.len() > size {
        return Err(ElfError::SectionTooSmall {
            section: section.into(),
            need: data.len(),
            have: size,
        });
    }
    let end = off.checked_add(size).ok_or(ElfError::Truncated(off))?;
    if end > image.len() {
        return Err(ElfError::Truncated(off));
    }
    image[off..off + data.len()].copy_from_slice(data);
    image[off + data.len()..end].fill(0);
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Hand-built ELF images for tests. Layout:
    //! ehdr | .shstrtab | .strtab | .symtab | extra sections | shdr table.

    /// Build a 64-bit LE ELF carrying the given object symbols (name, size)
    /// and extra PROGBITS sections (name, content).
    pub fn elf(symbols: &[(&str, u64)], sections: &[(&str, &[u8])]) -> Vec<u8> {
        let mut shstrtab = vec![0u8];
        let mut name_off = |name: &str, blob: &mut Vec<u8>| -> u32 {
            let off = blob.len() as u32;
            blob.extend_from_slice(name.as_bytes());
            blob.push(0);
            off
        };
        let n_shstrtab = name_off(".shstrtab", &mut shstrtab);
        let n_strtab = name_off(".strtab", &mut shstrtab);
        let n_symtab = name_off(".symtab", &mut shstrtab);
        let extra_names: Vec<u32> = sections
            .iter()
            .map(|(n, _)| name_off(n, &mut shstrtab))
            .collect();

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 24]; // index 0: undefined symbol
        for (name, size) in symbols {
            let off = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            let mut entry = [0u8; 24];
            entry[0..4].copy_from_slice(&off.to_le_bytes());
            entry[4] = 0x11; // STB_GLOBAL | STT_OBJECT
            entry[16..24].copy_from_slice(&size.to_le_bytes());
            symtab.extend_from_slice(&entry);
        }

        let shstrtab_off = 64u64;
        let strtab_off = shstrtab_off + shstrtab.len() as u64;
        let symtab_off = strtab_off + strtab.len() as u64;
        let mut extra_offs = Vec::new();
        let mut cursor = symtab_off + symtab.len() as u64;
        for (_, content) in sections {
            extra_offs.push(cursor);
            cursor += content.len() as u64;
        }
        let shoff = cursor;
        let shnum = 4 + sections.len();

        let mut out = vec![0u8; 64];
        out[0..4].copy_from_slice(b"\x7FELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1;
        out[40..48].copy_from_slice(&shoff.to_le_bytes());
        out[58..60].copy_from_slice(&64u16.to_le_bytes());
        out[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        out[62..64].copy_from_slice(&1u16.to_le_bytes()); // shstrndx

        out.extend_from_slice(&shstrtab);
        out.extend_from_slice(&strtab);
        out.extend_from_slice(&symtab);
        for (_, content) in sections {
            out.extend_from_slice(content);
        }

        let mut shdr = |name: u32, sh_type: u32, off: u64, size: u64, link: u32, entsize: u64| {
            let mut h = [0u8; 64];
            h[0..4].copy_from_slice(&name.to_le_bytes());
            h[4..8].copy_from_slice(&sh_type.to_le_bytes());
            h[24..32].copy_from_slice(&off.to_le_bytes());
            h[32..40].copy_from_slice(&size.to_le_bytes());
            h[40..44].copy_from_slice(&link.to_le_bytes());
            h[56..64].copy_from_slice(&entsize.to_le_bytes());
            out.extend_from_slice(&h);
        };
        shdr(0, 0, 0, 0, 0, 0);
        shdr(n_shstrtab, 3, shstrtab_off, shstrtab.len() as u64, 0, 0);
        // .symtab links to .strtab, which is section index 3.
        shdr(n_symtab, 2, symtab_off, symtab.len() as u64, 3, 24);
        shdr(n_strtab, 3, strtab_off, strtab.len() as u64, 0, 0);
        for (i, (_, content)) in sections.iter().enumerate() {
            shdr(extra_names[i], 1, extra_offs[i], content.len() as u64, 0, 0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_input() {
        assert!(matches!(ElfView::parse(&[0u8; 16]), Err(ElfError::TooShort)));
        let mut bytes = fixture::elf(&[], &[]);
        bytes[0] = b'X';
        assert!(matches!(ElfView::parse(&bytes), Err(ElfError::BadMagic)));
    }

    #[test]
    fn rejects_wrong_class_and_endianness() {
        let mut bytes = fixture::elf(&[], &[]);
        bytes[4] = 1;
        assert!(matches!(ElfView::parse(&bytes), Err(ElfError::BadClass)));
        let mut bytes = fixture::elf(&[], &[]);
        bytes[5] = 2;
        assert!(matches!(
            ElfView::parse(&bytes),
            Err(ElfError::BadEndianness)
        ));
    }

    #[test]
    fn finds_object_symbol_size() {
        let bytes = fixture::elf(&[("fw_rule_entry", 48), ("fw_arp_entry", 24)], &[]);
        let view = ElfView::parse(&bytes).unwrap();
        assert_eq!(view.symbol_size("fw_rule_entry").unwrap(), 48);
        assert_eq!(view.symbol_size("fw_arp_entry").unwrap(), 24);
    }

    #[test]
    fn missing_symbol_is_named() {
        let bytes = fixture::elf(&[("fw_rule_entry", 48)], &[]);
        let view = ElfView::parse(&bytes).unwrap();
        let err = view.symbol_size("fw_absent").unwrap_err();
        assert!(matches!(err, ElfError::MissingSymbol(ref s) if s == "fw_absent"));
    }

    #[test]
    fn patches_section_and_zeroes_tail() {
        let mut bytes = fixture::elf(&[], &[(".fw_config", &[0xAAu8; 32])]);
        patch_section(&mut bytes, ".fw_config", &[1, 2, 3, 4]).unwrap();
        let view = ElfView::parse(&bytes).unwrap();
        let sh = view.find_section(".fw_config").unwrap();
        let off = sh.offset as usize;
        assert_eq!(&bytes[off..off + 4], &[1, 2, 3, 4]);
        assert!(bytes[off + 4..off + 32].iter().all(|&b| b == 0));
    }

    #[test]
    fn patch_rejects_oversized_data_and_missing_section() {
        let mut bytes = fixture::elf(&[], &[(".fw_config", &[0u8; 8])]);
        let err = patch_section(&mut bytes, ".fw_config", &[0u8; 9]).unwrap_err();
        assert!(matches!(err, ElfError::SectionTooSmall { need: 9, have: 8, .. }));
        let err = patch_section(&mut bytes, ".absent", &[]).unwrap_err();
        assert!(matches!(err, ElfError::MissingSection(ref s) if s == ".absent"));
    }
}
