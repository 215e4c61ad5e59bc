//! Parsing a native ELF image directly out of a running process's memory.

use anyhow::{Result, bail};

use crate::region::Region;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub const ELF_CLASS_32: u8 = 1;
pub const ELF_CLASS_64: u8 = 2;

#[cfg(target_pointer_width = "64")]
const HOST_ELF_CLASS: u8 = ELF_CLASS_64;
#[cfg(target_pointer_width = "32")]
const HOST_ELF_CLASS: u8 = ELF_CLASS_32;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    p_type: u32,
    p_vaddr: u64,
    p_memsz: u64,
}

/// A parsed ELF image. Unlike [`crate::pe::PeImage`], segments only carry
/// `p_memsz`, which can legitimately exceed what's reflected in `/proc/maps`
/// (e.g. a segment whose tail is demand-zeroed bss) — Regions handed out by
/// this type disable bounds enforcement for exactly that reason.
#[derive(Debug, Clone)]
pub struct ElfImage {
    pub region: Region,
    pub class: u8,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    segments: Vec<ProgramHeader>,
}

impl ElfImage {
    pub fn parse(region: Region) -> Result<Self> {
        let mut ident = [0u8; 16];
        region.read(0, &mut ident)?;
        if ident[0..4] != ELF_MAGIC {
            bail!("not an ELF image: bad magic {:02x?}", &ident[0..4]);
        }
        let class = ident[4];
        if class != HOST_ELF_CLASS {
            bail!(
                "ELF class {class} does not match host bitness (expected {HOST_ELF_CLASS})"
            );
        }

        let (e_phoff, e_phentsize, e_phnum) = if class == ELF_CLASS_64 {
            let e_phoff: u64 = region.read_value(0x20)?;
            let e_phentsize: u16 = region.read_value(0x36)?;
            let e_phnum: u16 = region.read_value(0x38)?;
            (e_phoff, e_phentsize, e_phnum)
        } else {
            let e_phoff: u32 = region.read_value(0x1c)?;
            let e_phentsize: u16 = region.read_value(0x2a)?;
            let e_phnum: u16 = region.read_value(0x2c)?;
            (e_phoff as u64, e_phentsize, e_phnum)
        };

        let mut segments = Vec::with_capacity(e_phnum as usize);
        for i in 0..e_phnum as u64 {
            let entry_offset = e_phoff as i64 + (i * e_phentsize as u64) as i64;
            let (p_type, p_vaddr, p_memsz) = if class == ELF_CLASS_64 {
                let p_type: u32 = region.read_value(entry_offset)?;
                let p_vaddr: u64 = region.read_value(entry_offset + 16)?;
                let p_memsz: u64 = region.read_value(entry_offset + 40)?;
                (p_type, p_vaddr, p_memsz)
            } else {
                let p_type: u32 = region.read_value(entry_offset)?;
                let p_vaddr: u32 = region.read_value(entry_offset + 8)?;
                let p_memsz: u32 = region.read_value(entry_offset + 20)?;
                (p_type, p_vaddr as u64, p_memsz as u64)
            };
            segments.push(ProgramHeader { p_type, p_vaddr, p_memsz });
        }

        log::debug!("parsed ELF image at {region}: {} program headers", segments.len());

        Ok(Self { region, class, e_phoff, e_phentsize, e_phnum, segments })
    }

    fn segment_region(&self, segment: &ProgramHeader) -> Region {
        let start = self.region.start + segment.p_vaddr;
        let end = start + segment.p_memsz;
        Region::new(self.region.pid, start, end)
            .with_method(self.region.method)
            .without_bounds()
    }

    /// One Region per `PT_LOAD` segment.
    pub fn get_loaded(&self) -> Vec<Region> {
        self.segments
            .iter()
            .filter(|s| s.p_type == PT_LOAD)
            .map(|s| self.segment_region(s))
            .collect()
    }

    /// A single Region spanning the lowest to the highest address covered
    /// by any `PT_LOAD` segment. `None` if the image has no loadable
    /// segments.
    pub fn get_loaded_region(&self) -> Option<Region> {
        let loaded: Vec<&ProgramHeader> =
            self.segments.iter().filter(|s| s.p_type == PT_LOAD).collect();
        let min = loaded.iter().map(|s| s.p_vaddr).min()?;
        let max = loaded.iter().map(|s| s.p_vaddr + s.p_memsz).max()?;
        Some(
            Region::new(self.region.pid, self.region.start + min, self.region.start + max)
                .with_method(self.region.method)
                .without_bounds(),
        )
    }

    /// One Region per `PT_DYNAMIC` segment.
    pub fn get_dynamic(&self) -> Vec<Region> {
        self.segments
            .iter()
            .filter(|s| s.p_type == PT_DYNAMIC)
            .map(|s| self.segment_region(s))
            .collect()
    }
}
