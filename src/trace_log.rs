//! Writers for the two append-only trace logs.
//!
//! The flush controller never touches files directly. It hands finished
//! segments to a [`SegmentSink`] and unit names to a [`FunctionLogSink`],
//! which decide where the bytes go. The file-backed implementations here
//! write straight through to the OS: all buffering happens upstream in the
//! dynamic value buffer.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Receives flushed buffer contents, one call per segment.
///
/// # Usage
///
/// ```
/// # use dynval_logger::SegmentSink;
/// # use std::io;
/// // Keep every segment in memory
/// struct Collect(Vec<Vec<u8>>);
///
/// impl SegmentSink for Collect {
///     fn write_segment(&mut self, segment: &[u8]) -> io::Result<()> {
///         self.0.push(segment.to_vec());
///         Ok(())
///     }
/// }
/// ```
pub trait SegmentSink {
    /// Appends one segment. `segment` may be empty for a unit that logged
    /// nothing; it still counts as that unit's segment.
    ///
    /// The slice is only valid for the duration of the call: the buffer it
    /// points into is cleared right afterwards.
    fn write_segment(&mut self, segment: &[u8]) -> io::Result<()>;

    /// Flushes everything written so far to stable storage.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receives function-order log lines, without the trailing newline.
pub trait FunctionLogSink {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Binary event log backed by a file.
pub struct MemlogWriter {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

impl MemlogWriter {
    /// Creates (or truncates) the memlog at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = create_truncated(&path)?;
        Ok(Self { file, path, bytes_written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl SegmentSink for MemlogWriter {
    fn write_segment(&mut self, segment: &[u8]) -> io::Result<()> {
        if segment.is_empty() {
            return Ok(());
        }
        self.file.write_all(segment)?;
        self.bytes_written += segment.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

/// Function-order log backed by a file, one line per write.
pub struct FunctionLogWriter {
    file: File,
    path: PathBuf,
    lines_written: u64,
}

impl FunctionLogWriter {
    /// Creates (or truncates) the function log at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = create_truncated(&path)?;
        Ok(Self { file, path, lines_written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }
}

impl FunctionLogSink for FunctionLogWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        // One write per line so a crash never leaves half a name behind
        // a newline from the next one.
        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
        self.file.write_all(&out)?;
        self.lines_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

fn create_truncated(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
