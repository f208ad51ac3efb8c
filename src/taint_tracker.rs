//! Picks out the file buffers worth seeding taint from, in user-mode traces.
//!
//! The tracker watches the results of open/creat/read/write system calls.
//! The first file opened read-only outside the usual system locations is
//! taken as the program's input, the first opened write-only as its output.
//! Every successful read from the input and write to the output produces a
//! side-channel line for the function log:
//!
//! ```text
//! taint,read,<buffer address>,<length>
//! taint,write,<buffer address>,<length>
//! ```
//!
//! # Limitations
//!
//! This is a heuristic that assumes one input file and one output file.
//! Programs that read several inputs or write several outputs only get
//! their first of each tracked.
//!
//! Only strictly read-only and strictly write-only opens are considered.
//! A file opened `O_RDWR` is never tracked, so a program that reads its
//! input through a read/write descriptor produces no taint lines.

use std::fmt;

/// Access-mode bits of `open(2)` flags, already translated to host values.
pub const O_RDONLY: u32 = 0o0;
pub const O_WRONLY: u32 = 0o1;
pub const O_RDWR: u32 = 0o2;
pub const O_ACCMODE: u32 = 0o3;

const IGNORED_PREFIXES: &[&str] = &["/etc", "/lib", "/proc", "/dev", "/usr"];
const IGNORED_NAMES: &[&str] = &["openssl.cnf", "xpdfrc"];

/// A completed system call, decoded by the runtime.
///
/// `ret` is the raw return value; negative values are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallEvent {
    Open { path: String, flags: u32, ret: i64 },
    OpenAt { path: String, flags: u32, ret: i64 },
    Creat { path: String, ret: i64 },
    Read { fd: i64, buf: u64, ret: i64 },
    Write { fd: i64, buf: u64, ret: i64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaintDirection {
    Read,
    Write,
}

impl fmt::Display for TaintDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintDirection::Read => write!(f, "read"),
            TaintDirection::Write => write!(f, "write"),
        }
    }
}

/// A guest memory region that crossed the tracked I/O boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaintRegion {
    pub direction: TaintDirection,
    pub address: u64,
    pub length: u64,
}

impl fmt::Display for TaintRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "taint,{},{},{}", self.direction, self.address, self.length)
    }
}

/// Tracks the input and output descriptors of interest.
#[derive(Debug, Default)]
pub struct TaintTracker {
    input_fd: Option<i64>,
    output_fd: Option<i64>,
}

impl TaintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_fd(&self) -> Option<i64> {
        self.input_fd
    }

    pub fn output_fd(&self) -> Option<i64> {
        self.output_fd
    }

    /// Feeds one syscall result to the tracker.
    ///
    /// Returns the region to log when the call moved data through a
    /// tracked descriptor.
    pub fn observe(&mut self, event: &SyscallEvent) -> Option<TaintRegion> {
        match *event {
            SyscallEvent::Open { ref path, flags, ret }
            | SyscallEvent::OpenAt { ref path, flags, ret } => {
                self.on_open(path, flags, ret);
                None
            }
            SyscallEvent::Creat { ref path, ret } => {
                if ret > 0 && self.output_fd.is_none() {
                    tracing::info!(path = %path, fd = ret, "tracking output file");
                    self.output_fd = Some(ret);
                }
                None
            }
            SyscallEvent::Read { fd, buf, ret } => {
                (ret > 0 && Some(fd) == self.input_fd).then(|| TaintRegion {
                    direction: TaintDirection::Read,
                    address: buf,
                    length: ret as u64,
                })
            }
            SyscallEvent::Write { fd, buf, ret } => {
                (ret > 0 && Some(fd) == self.output_fd).then(|| TaintRegion {
                    direction: TaintDirection::Write,
                    address: buf,
                    length: ret as u64,
                })
            }
        }
    }

    fn on_open(&mut self, path: &str, flags: u32, ret: i64) {
        if ret <= 0 || is_ignored(path) {
            return;
        }
        match flags & O_ACCMODE {
            O_RDONLY if self.input_fd.is_none() => {
                tracing::info!(path, fd = ret, "tracking input file");
                self.input_fd = Some(ret);
            }
            O_WRONLY if self.output_fd.is_none() => {
                tracing::info!(path, fd = ret, "tracking output file");
                self.output_fd = Some(ret);
            }
            _ => {}
        }
    }
}

/// System, library and config files are never the input or output of interest.
pub fn is_ignored(path: &str) -> bool {
    IGNORED_PREFIXES.iter().any(|p| path.starts_with(p))
        || IGNORED_NAMES.iter().any(|n| path.contains(n))
}
