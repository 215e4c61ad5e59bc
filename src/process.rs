//! Finding and describing a running process through `/proc`.
//!
//! Every entry point here is a thin default-root wrapper around a `_under`
//! twin that takes the process-filesystem root explicitly, so tests can
//! point it at a `tempfile` tree shaped like `/proc` instead of the real one.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// A Linux process id. Zero and negative values are never valid targets.
pub type ProcessId = libc::pid_t;

/// Parsed `/proc/<pid>/status`: header key to trimmed value, in file order.
pub type ProcessStatus = BTreeMap<String, String>;

const DEFAULT_PROC_ROOT: &str = "/proc";

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    pub pid: ProcessId,
    pub start: u64,
    pub end: u64,
    pub perms: String,
    pub offset: u64,
    pub dev: String,
    pub inode: u64,
    pub name: String,
}

impl Map {
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.pid > 0 && self.end > self.start
    }

    fn perm_char(&self, index: usize, expected: char) -> bool {
        self.perms.chars().nth(index) == Some(expected)
    }

    pub fn is_read(&self) -> bool {
        self.perm_char(0, 'r')
    }

    pub fn is_write(&self) -> bool {
        self.perm_char(1, 'w')
    }

    pub fn is_exec(&self) -> bool {
        self.perm_char(2, 'x')
    }

    pub fn is_private(&self) -> bool {
        self.perm_char(3, 'p')
    }

    pub fn is_shared(&self) -> bool {
        self.perm_char(3, 's')
    }

    /// No backing file: anonymous heap/stack/bss-style mapping.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    /// A kernel pseudo-mapping such as `[heap]`, `[stack]`, `[vdso]`.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Backed by a real file on disk (a loaded binary or library).
    pub fn is_file(&self) -> bool {
        !self.is_anonymous() && !self.is_pseudo()
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}-{:x} {} {:08x} {} {} {}",
            self.start, self.end, self.perms, self.offset, self.dev, self.inode, self.name
        )
    }
}

fn proc_root() -> &'static Path {
    Path::new(DEFAULT_PROC_ROOT)
}

/// Reads and parses `/proc/<pid>/status` into a key/value map. Returns an
/// empty map if the process is gone or the file can't be read.
pub fn get_status(pid: ProcessId) -> ProcessStatus {
    get_status_under(proc_root(), pid)
}

pub fn get_status_under(root: &Path, pid: ProcessId) -> ProcessStatus {
    let mut status = ProcessStatus::new();
    let text = match fs::read_to_string(root.join(pid.to_string()).join("status")) {
        Ok(text) => text,
        Err(err) => {
            log::debug!("get_status({pid}): {err}");
            return status;
        }
    };
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        status.insert(key.trim().to_string(), value.trim().to_string());
    }
    status
}

/// `status["Name"]`, or an empty string if unavailable.
pub fn get_status_name(pid: ProcessId) -> String {
    get_status(pid).get("Name").cloned().unwrap_or_default()
}

/// The first NUL-separated token of `/proc/<pid>/cmdline` — in practice
/// `argv[0]`. Good enough for matching a process by executable name, but a
/// process that rewrites its own `argv[0]` (or one invoked through a wrapper
/// script) will not match on its real binary name. This limitation is
/// inherited by design, not fixed: later argv entries aren't examined.
pub fn get_cmdline(pid: ProcessId) -> String {
    get_cmdline_under(proc_root(), pid)
}

pub fn get_cmdline_under(root: &Path, pid: ProcessId) -> String {
    let bytes = match fs::read(root.join(pid.to_string()).join("cmdline")) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::debug!("get_cmdline({pid}): {err}");
            return String::new();
        }
    };
    let first = bytes.split(|&b| b == 0).next().unwrap_or(&[]);
    String::from_utf8_lossy(first).trim().to_string()
}

/// Scans `/proc` for numeric entries and returns the first pid for which
/// `filter` returns true, or `0` if none match. Directory iteration order is
/// whatever the kernel hands back, not numeric order, so with more than one
/// match the result is order-dependent.
pub fn get_process_id(filter: impl Fn(ProcessId) -> bool) -> ProcessId {
    get_process_id_under(proc_root(), filter)
}

pub fn get_process_id_under(root: &Path, filter: impl Fn(ProcessId) -> bool) -> ProcessId {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("get_process_id: failed to read {}: {err}", root.display());
            return 0;
        }
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<ProcessId>() else {
            continue;
        };
        if pid > 0 && filter(pid) {
            return pid;
        }
    }
    0
}

pub fn process_id_by_cmdline_equals(cmdline: &str) -> ProcessId {
    get_process_id(|pid| get_cmdline(pid) == cmdline)
}

pub fn process_id_by_cmdline_ends_with(suffix: &str) -> ProcessId {
    get_process_id(|pid| get_cmdline(pid).ends_with(suffix))
}

pub fn process_id_by_cmdline_contains(needle: &str) -> ProcessId {
    get_process_id(|pid| get_cmdline(pid).contains(needle))
}

pub fn process_id_by_status_name(name: &str) -> ProcessId {
    get_process_id(|pid| get_status_name(pid) == name)
}

/// Polls `getter` until it returns a positive pid or `timeout_secs` elapses.
/// `timeout_secs == 0` calls `getter` exactly once without waiting.
/// Sleeps `interval_secs` (minimum 1) between polls.
pub fn wait_for_process(
    mut getter: impl FnMut() -> ProcessId,
    timeout_secs: u64,
    interval_secs: u64,
) -> ProcessId {
    if timeout_secs == 0 {
        return getter();
    }
    let interval = Duration::from_secs(interval_secs.max(1));
    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        let pid = getter();
        if pid > 0 {
            return pid;
        }
        if Instant::now() >= deadline {
            return 0;
        }
        thread::sleep(interval);
    }
}

fn parse_maps_line(pid: ProcessId, line: &str) -> Option<Map> {
    let mut fields = line.splitn(6, ' ');
    let range = fields.next()?;
    let perms = fields.next()?.to_string();
    let offset = fields.next()?;
    let dev = fields.next()?.to_string();
    let inode = fields.next()?;
    let name = fields.next().unwrap_or("").trim_start().to_string();

    let (start, end) = range.split_once('-')?;
    Some(Map {
        pid,
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        perms,
        offset: u64::from_str_radix(offset, 16).ok()?,
        dev,
        inode: inode.parse().ok()?,
        name,
    })
}

/// Parses `/proc/<pid>/maps`, optionally keeping only lines `filter` accepts.
pub fn get_maps(pid: ProcessId, filter: Option<&dyn Fn(&Map) -> bool>) -> Vec<Map> {
    get_maps_under(proc_root(), pid, filter)
}

pub fn get_maps_under(
    root: &Path,
    pid: ProcessId,
    filter: Option<&dyn Fn(&Map) -> bool>,
) -> Vec<Map> {
    let text = match fs::read_to_string(root.join(pid.to_string()).join("maps")) {
        Ok(text) => text,
        Err(err) => {
            log::debug!("get_maps({pid}): {err}");
            return Vec::new();
        }
    };
    text.lines()
        .filter_map(|line| parse_maps_line(pid, line))
        .filter(|map| filter.map(|f| f(map)).unwrap_or(true))
        .collect()
}

pub fn find_maps_containing(pid: ProcessId, needle: &str) -> Vec<Map> {
    get_maps(pid, Some(&|map: &Map| map.name.contains(needle)))
}

pub fn find_maps_ends_with(pid: ProcessId, suffix: &str) -> Vec<Map> {
    get_maps(pid, Some(&|map: &Map| map.name.ends_with(suffix)))
}

pub fn find_map_ends_with(pid: ProcessId, suffix: &str) -> Option<Map> {
    find_maps_ends_with(pid, suffix).into_iter().next()
}

fn proc_pid_path(pid: ProcessId) -> PathBuf {
    proc_root().join(pid.to_string())
}

/// `PTRACE_ATTACH`s to `pid` and waits for it to stop. Returns `false` if
/// the attach is rejected or the process exits/is killed before stopping.
pub fn attach(pid: ProcessId) -> bool {
    // SAFETY: ptrace with no memory-address arguments; a well-formed pid is
    // the only precondition and a negative result is handled below.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_ATTACH,
            pid,
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    if ret != 0 {
        log::warn!("attach({pid}): PTRACE_ATTACH failed");
        return false;
    }
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: status is a valid out-pointer sized for waitpid.
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        if waited < 0 {
            log::warn!("attach({pid}): waitpid failed");
            return false;
        }
        if libc::WIFSTOPPED(status) {
            return true;
        }
        if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
            log::warn!("attach({pid}): process exited before stopping");
            return false;
        }
    }
}

/// `PTRACE_DETACH`s from a previously [`attach`]ed process.
pub fn detach(pid: ProcessId) -> bool {
    // SAFETY: same preconditions as `attach`.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_DETACH,
            pid,
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    ret == 0
}

/// Path to `/proc/<pid>/mem` for the real process filesystem.
pub(crate) fn mem_path(pid: ProcessId) -> PathBuf {
    proc_pid_path(pid).join("mem")
}

/// Checks whether `pid` is still a live process by the presence of its
/// `/proc` directory.
pub fn is_alive(pid: ProcessId) -> bool {
    proc_pid_path(pid).is_dir()
}
