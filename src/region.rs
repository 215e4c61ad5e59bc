//! A byte range in another process's address space, bound to one
//! [`AccessMethod`] — the crate's central value type.

use std::fmt;
use std::mem::size_of;

use anyhow::{Result, bail};

use crate::mem::{self, AccessMethod};
use crate::pattern::Pattern;
use crate::process::ProcessId;

/// `{pid, start, end, name, method, enforce_bounds}` — cheap to copy,
/// carries no back-pointer to whatever produced it (a [`crate::pe::PeImage`]
/// section or an [`crate::elf::ElfImage`] segment resolves its absolute
/// address once, at construction, rather than keeping a parent reference).
#[derive(Debug, Clone)]
pub struct Region {
    pub pid: ProcessId,
    pub start: u64,
    pub end: u64,
    pub name: String,
    pub method: AccessMethod,
    pub enforce_bounds: bool,
}

impl Region {
    /// A new Region over `[start, end)`, picking up whatever the process-wide
    /// default [`AccessMethod`] is right now.
    pub fn new(pid: ProcessId, start: u64, end: u64) -> Self {
        Self {
            pid,
            start,
            end,
            name: String::new(),
            method: mem::default_access_method(),
            enforce_bounds: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_method(mut self, method: AccessMethod) -> Self {
        self.method = method;
        self
    }

    pub fn without_bounds(mut self) -> Self {
        self.enforce_bounds = false;
        self
    }

    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// `pid > 0 && start < end`.
    pub fn is_valid(&self) -> bool {
        self.pid > 0 && self.end > self.start
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    fn resolve(&self, offset: i64, len: usize) -> Result<u64> {
        let address = (self.start as i64)
            .checked_add(offset)
            .ok_or_else(|| anyhow::anyhow!("{self}: offset {offset} overflows region start"))?
            as u64;
        if self.enforce_bounds {
            let past_end = address
                .checked_add(len as u64)
                .ok_or_else(|| anyhow::anyhow!("{self}: access length overflows"))?;
            if address < self.start || past_end > self.end {
                bail!(
                    "{self}: access [{address:#x}, {past_end:#x}) is out of bounds \
                     of [{:#x}, {:#x})",
                    self.start,
                    self.end
                );
            }
        }
        Ok(address)
    }

    /// Reads `buf.len()` bytes starting `offset` bytes into the region.
    /// Bounds are checked against `[start, end)` when `enforce_bounds` is
    /// set; the back-end is still free to fail for its own reasons (the
    /// process exited, the page isn't mapped, ...).
    pub fn read(&self, offset: i64, buf: &mut [u8]) -> Result<usize> {
        let address = self.resolve(offset, buf.len())?;
        Ok(mem::read(self.method, self.pid, address, buf))
    }

    pub fn write(&self, offset: i64, buf: &[u8]) -> Result<usize> {
        let address = self.resolve(offset, buf.len())?;
        Ok(mem::write(self.method, self.pid, address, buf))
    }

    /// Reads exactly `size_of::<T>()` bytes and reinterprets them in host
    /// byte order — no endian conversion is ever applied.
    pub fn read_value<T: Copy>(&self, offset: i64) -> Result<T> {
        let mut buf = vec![0u8; size_of::<T>()];
        let n = self.read(offset, &mut buf)?;
        if n != buf.len() {
            bail!("{self}: short read of {n}/{} bytes at offset {offset}", buf.len());
        }
        // SAFETY: `buf` holds exactly `size_of::<T>()` initialized bytes.
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const T) })
    }

    pub fn write_value<T: Copy>(&self, offset: i64, value: T) -> Result<usize> {
        // SAFETY: `value` is `Copy`, so reading its bytes cannot observe a
        // moved-from or uninitialized value.
        let bytes = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, size_of::<T>())
        };
        self.write(offset, bytes)
    }

    /// Snapshots the whole region into a single buffer, then scans it for
    /// `pattern`. The snapshot is a real `size()`-byte allocation — earlier
    /// implementations of this idea reserved capacity without initializing
    /// it and indexed past the logical length, which is exactly the bug
    /// this sizing avoids.
    pub fn find(&self, pattern: &Pattern, first_only: bool) -> Result<Vec<u64>> {
        let size = self.size() as usize;
        let mut buffer = vec![0u8; size];
        let read = self.read(0, &mut buffer)?;
        buffer.truncate(read);
        Ok(pattern
            .search(&buffer, first_only)
            .into_iter()
            .map(|offset| self.start + offset as u64)
            .collect())
    }

    pub fn find_first(&self, pattern: &Pattern) -> Result<Option<u64>> {
        Ok(self.find(pattern, true)?.into_iter().next())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region(pid={}, {:#x}-{:#x}, {:?}{})",
            self.pid,
            self.start,
            self.end,
            self.method,
            if self.name.is_empty() {
                String::new()
            } else {
                format!(", {:?}", self.name)
            }
        )
    }
}
