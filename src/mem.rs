//! Three ways to move bytes in and out of another process's address space.
//!
//! [`AccessMethod::Sys`] batches a single read or write into one
//! `process_vm_readv`/`process_vm_writev` syscall and needs no attach.
//! [`AccessMethod::Io`] seeks into `/proc/<pid>/mem`; writing through it
//! typically requires the target to be stopped (attached or otherwise
//! paused). [`AccessMethod::Trace`] moves one machine word at a time through
//! `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` — always available, slowest of the
//! three, and the only one that works when `/proc/<pid>/mem` itself can't be
//! opened.
//!
//! Every back-end reports how many bytes were actually transferred before an
//! error, not just success/failure, so a caller can tell a clean miss from a
//! partial write.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::process::{ProcessId, mem_path};

/// Which syscall path a [`crate::region::Region`] uses to move bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessMethod {
    /// `process_vm_readv`/`process_vm_writev`. No attach required.
    Sys = 0,
    /// Positional I/O on `/proc/<pid>/mem`.
    Io = 1,
    /// Word-at-a-time `ptrace(PEEKDATA/POKEDATA)`.
    Trace = 2,
}

impl AccessMethod {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AccessMethod::Sys,
            1 => AccessMethod::Io,
            _ => AccessMethod::Trace,
        }
    }
}

impl Default for AccessMethod {
    fn default() -> Self {
        AccessMethod::Sys
    }
}

static DEFAULT_ACCESS_METHOD: AtomicU8 = AtomicU8::new(AccessMethod::Sys as u8);

/// The process-wide default back-end new [`crate::region::Region`]s pick up
/// at construction time. Changing it does not retroactively affect Regions
/// already built.
pub fn default_access_method() -> AccessMethod {
    AccessMethod::from_u8(DEFAULT_ACCESS_METHOD.load(Ordering::Relaxed))
}

pub fn set_default_access_method(method: AccessMethod) {
    DEFAULT_ACCESS_METHOD.store(method as u8, Ordering::Relaxed);
}

/// Reads `buf.len()` bytes from `address` in `pid` using `method`. Returns
/// the number of bytes actually read (never negative; `0` on total failure).
pub fn read(method: AccessMethod, pid: ProcessId, address: u64, buf: &mut [u8]) -> usize {
    match method {
        AccessMethod::Sys => sys::read(pid, address, buf),
        AccessMethod::Io => io::read(pid, address, buf),
        AccessMethod::Trace => trace::read(pid, address, buf),
    }
}

/// Writes `buf` to `address` in `pid` using `method`. Returns the number of
/// bytes actually written.
pub fn write(method: AccessMethod, pid: ProcessId, address: u64, buf: &[u8]) -> usize {
    match method {
        AccessMethod::Sys => sys::write(pid, address, buf),
        AccessMethod::Io => io::write(pid, address, buf),
        AccessMethod::Trace => trace::write(pid, address, buf),
    }
}

/// `process_vm_readv`/`process_vm_writev` — no attach required, one syscall
/// per call regardless of size.
pub mod sys {
    use super::*;
    use libc::iovec;

    pub fn read(pid: ProcessId, address: u64, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let local = iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: `local` points at `buf`, which outlives the call; the
        // kernel validates `remote` against the target's address space.
        let n = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
        if n < 0 {
            log::debug!("sys::read(pid={pid}, addr={address:#x}): process_vm_readv failed");
            0
        } else {
            n as usize
        }
    }

    pub fn write(pid: ProcessId, address: u64, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let local = iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let remote = iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: same as `read`; the kernel only reads from `local`.
        let n = unsafe { libc::process_vm_writev(pid, &local, 1, &remote, 1, 0) };
        if n < 0 {
            log::debug!("sys::write(pid={pid}, addr={address:#x}): process_vm_writev failed");
            0
        } else {
            n as usize
        }
    }
}

/// Positional I/O on `/proc/<pid>/mem`. Reading never requires the target
/// to be stopped; writing usually does, since the kernel still applies
/// normal memory-protection checks.
///
/// The historical C++ implementation this is modeled on passed the address
/// of its local buffer pointer to `pread64`/`pwrite64` instead of the
/// pointer itself. `FileExt::read_at`/`write_at` take the byte slice
/// directly, so that mistake has no equivalent here.
pub mod io {
    use super::*;

    pub fn read(pid: ProcessId, address: u64, buf: &mut [u8]) -> usize {
        let file = match OpenOptions::new().read(true).open(mem_path(pid)) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("io::read(pid={pid}): opening /proc/{pid}/mem failed: {err}");
                return 0;
            }
        };
        match file.read_at(buf, address) {
            Ok(n) => n,
            Err(err) => {
                log::debug!("io::read(pid={pid}, addr={address:#x}): {err}");
                0
            }
        }
    }

    pub fn write(pid: ProcessId, address: u64, buf: &[u8]) -> usize {
        let file = match OpenOptions::new().write(true).open(mem_path(pid)) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("io::write(pid={pid}): opening /proc/{pid}/mem failed: {err}");
                return 0;
            }
        };
        match file.write_at(buf, address) {
            Ok(n) => n,
            Err(err) => {
                log::debug!("io::write(pid={pid}, addr={address:#x}): {err}");
                0
            }
        }
    }

    /// Holds `/proc/<pid>/mem` open across multiple reads/writes, avoiding
    /// the per-call open/close cost of [`read`]/[`write`].
    pub struct Batch {
        file: std::fs::File,
    }

    impl Batch {
        pub fn open(pid: ProcessId) -> std::io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(mem_path(pid))?;
            Ok(Self { file })
        }

        pub fn read(&self, address: u64, buf: &mut [u8]) -> usize {
            self.file.read_at(buf, address).unwrap_or(0)
        }

        pub fn write(&self, address: u64, buf: &[u8]) -> usize {
            self.file.write_at(buf, address).unwrap_or(0)
        }
    }
}

/// Word-at-a-time `PTRACE_PEEKDATA`/`PTRACE_POKEDATA`. Slowest of the three
/// back-ends, but it works even when `/proc/<pid>/mem` can't be opened and
/// `process_vm_readv` is denied (e.g. by a restrictive `yama/ptrace_scope`).
pub mod trace {
    use super::*;
    use std::mem::size_of;

    const WORD_SIZE: usize = size_of::<libc::c_long>();

    /// `PTRACE_PEEKDATA` returns the peeked word as its return value, so a
    /// return of `-1` is ambiguous with a real data word of `-1`. `errno`
    /// is the only way to tell them apart.
    fn peek_word(pid: ProcessId, address: u64) -> Option<libc::c_long> {
        unsafe {
            *libc::__errno_location() = 0;
        }
        // SAFETY: PEEKDATA only reads; `address` is validated by the kernel.
        let word = unsafe {
            libc::ptrace(
                libc::PTRACE_PEEKDATA,
                pid,
                address as *mut libc::c_void,
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if word == -1 {
            let errno = unsafe { *libc::__errno_location() };
            if errno != 0 {
                return None;
            }
        }
        Some(word)
    }

    fn poke_word(pid: ProcessId, address: u64, word: libc::c_long) -> bool {
        // SAFETY: POKEDATA writes exactly one word at `address`; the kernel
        // rejects unmapped or read-only destinations.
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEDATA,
                pid,
                address as *mut libc::c_void,
                word as *mut libc::c_void,
            )
        };
        ret == 0
    }

    pub fn read(pid: ProcessId, address: u64, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let word_addr = address + copied as u64;
            let Some(word) = peek_word(pid, word_addr) else {
                break;
            };
            let word_bytes = word.to_ne_bytes();
            let remaining = buf.len() - copied;
            let take = remaining.min(WORD_SIZE);
            buf[copied..copied + take].copy_from_slice(&word_bytes[..take]);
            copied += take;
        }
        copied
    }

    pub fn write(pid: ProcessId, address: u64, buf: &[u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let word_addr = address + copied as u64;
            let remaining = buf.len() - copied;
            let take = remaining.min(WORD_SIZE);

            let mut word_bytes = if take < WORD_SIZE {
                // Partial word at the tail: read-modify-write so the bytes
                // beyond `take` aren't clobbered with garbage.
                match peek_word(pid, word_addr) {
                    Some(existing) => existing.to_ne_bytes(),
                    None => break,
                }
            } else {
                [0u8; WORD_SIZE]
            };
            word_bytes[..take].copy_from_slice(&buf[copied..copied + take]);
            let word = libc::c_long::from_ne_bytes(word_bytes);
            if !poke_word(pid, word_addr, word) {
                break;
            }
            copied += take;
        }
        copied
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_access_method_round_trips() {
        set_default_access_method(AccessMethod::Io);
        assert_eq!(default_access_method(), AccessMethod::Io);
        set_default_access_method(AccessMethod::Sys);
        assert_eq!(default_access_method(), AccessMethod::Sys);
    }

    #[test]
    fn sys_read_from_own_process_round_trips() {
        let pid = std::process::id() as ProcessId;
        let data = *b"round-trip-me!!!";
        let addr = data.as_ptr() as u64;
        let mut out = [0u8; 16];
        let n = read(AccessMethod::Sys, pid, addr, &mut out);
        assert_eq!(n, 16);
        assert_eq!(out, data);
    }
}
