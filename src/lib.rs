//! Inspection and patching of another process's live memory.
//!
//! The crate is built around five layers: [`process`] finds and describes a
//! target process, [`mem`] moves bytes in and out of it through one of three
//! back-ends, [`region`] ties a byte range to a process and a back-end into a
//! single value type, [`pe`] and [`elf`] parse executable images in place
//! inside that memory, and [`pattern`] / [`patch`] find and rewrite bytes.
//!
//! Errors are reported as [`anyhow::Error`] almost everywhere, following the
//! convention of leaf functions returning a sentinel (empty map, zero pid,
//! `None`) for "not found" and reserving `Result` for operations that can
//! genuinely fail for a reason worth describing (a closed file, a rejected
//! `ptrace`, a malformed header).

pub mod elf;
pub mod hex;
pub mod mem;
pub mod patch;
pub mod pattern;
pub mod pe;
pub mod process;
pub mod region;

pub use mem::AccessMethod;
pub use patch::Patch;
pub use pattern::Pattern;
pub use process::{Map, ProcessId};
pub use region::Region;
