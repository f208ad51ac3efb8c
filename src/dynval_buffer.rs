use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Result, TraceError};
use crate::event::{DynValEntry, RECORD_SIZE};

/// Scratch buffer holding the records of the translation unit currently executing.
///
/// The buffer is allocated once and reused for the whole trace: `clear()`
/// only rewinds the write position, it never frees or shrinks the
/// allocation.
///
/// # Overflow
///
/// When an append would exceed the current capacity the buffer doubles,
/// up to `max_capacity`. If it cannot grow (ceiling reached or allocator
/// failure) the record is dropped and [`overflowed`](Self::overflowed)
/// becomes true until the next `clear()`. Appends never write past the
/// allocation.
///
/// # Thread Safety
///
/// **Important**: DynValBuffer is NOT thread-safe. It is owned by the
/// execution thread that runs both the generated code and the flush hooks.
pub struct DynValBuffer {
    start: NonNull<u8>,
    cur_size: usize,
    capacity: usize,
    max_capacity: usize,
    overflowed: bool,
}

/// Records are copied as whole `u64`-aligned words.
const BUFFER_ALIGN: usize = 8;

/// Largest buffer the allocator can be asked for: `isize::MAX` rounded
/// down to whole records.
pub const MAX_BUFFER_CAPACITY: usize = round_to_records(isize::MAX as usize);

impl DynValBuffer {
    /// Allocates a buffer of `initial_capacity` bytes (rounded down to a
    /// whole number of records) that may grow to `max_capacity` bytes.
    ///
    /// `max_capacity` is clamped to [`MAX_BUFFER_CAPACITY`].
    ///
    /// # Errors
    ///
    /// `TraceError::Config` if `initial_capacity` exceeds
    /// [`MAX_BUFFER_CAPACITY`], and `TraceError::BufferOverflow` if the
    /// allocator refuses the initial block.
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Result<Self> {
        let capacity = round_to_records(initial_capacity.max(RECORD_SIZE));
        if capacity > MAX_BUFFER_CAPACITY {
            return Err(TraceError::Config(format!(
                "initial buffer capacity {initial_capacity} exceeds {MAX_BUFFER_CAPACITY}"
            )));
        }
        let max_capacity = max_capacity.clamp(capacity, MAX_BUFFER_CAPACITY);
        let layout = Layout::from_size_align(capacity, BUFFER_ALIGN)
            .map_err(|e| TraceError::Config(e.to_string()))?;
        let start = unsafe { alloc::alloc(layout) };
        let Some(start) = NonNull::new(start) else {
            tracing::error!(capacity, "failed to allocate dynval buffer");
            return Err(TraceError::BufferOverflow { capacity, max: max_capacity });
        };

        Ok(Self {
            start,
            cur_size: 0,
            capacity,
            max_capacity,
            overflowed: false,
        })
    }

    /// Appends one record at `start + cur_size`.
    #[inline(always)]
    pub fn append(&mut self, entry: DynValEntry) {
        if self.cur_size + RECORD_SIZE > self.capacity && !self.grow() {
            self.overflowed = true;
            return;
        }

        let bytes = entry.to_bytes();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.start.as_ptr().add(self.cur_size),
                RECORD_SIZE,
            );
        }
        self.cur_size += RECORD_SIZE;
    }

    /// Rewinds the buffer to empty. O(1), keeps the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.cur_size = 0;
        self.overflowed = false;
    }

    /// Returns `(start, cur_size)` of the accumulated records.
    pub fn snapshot(&self) -> (*const u8, usize) {
        (self.start.as_ptr() as *const u8, self.cur_size)
    }

    /// The accumulated records as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.start.as_ptr(), self.cur_size) }
    }

    /// Bytes written since the last clear.
    pub fn cur_size(&self) -> usize {
        self.cur_size
    }

    /// Number of records written since the last clear.
    pub fn len(&self) -> usize {
        self.cur_size / RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.cur_size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// True if a record was dropped since the last clear.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    fn grow(&mut self) -> bool {
        if self.capacity >= self.max_capacity {
            return false;
        }
        let new_capacity = round_to_records(self.capacity.saturating_mul(2).min(self.max_capacity));
        if new_capacity <= self.capacity {
            return false;
        }

        let grown = unsafe {
            alloc::realloc(self.start.as_ptr(), layout_for(self.capacity), new_capacity)
        };
        match NonNull::new(grown) {
            Some(p) => {
                tracing::debug!(from = self.capacity, to = new_capacity, "grew dynval buffer");
                self.start = p;
                self.capacity = new_capacity;
                true
            }
            // realloc leaves the old block untouched on failure
            None => false,
        }
    }
}

impl Drop for DynValBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.start.as_ptr(), layout_for(self.capacity)) };
    }
}

#[inline]
const fn round_to_records(bytes: usize) -> usize {
    bytes - bytes % RECORD_SIZE
}

#[inline]
fn layout_for(capacity: usize) -> Layout {
    // capacity is a non-zero multiple of RECORD_SIZE, at most MAX_BUFFER_CAPACITY
    unsafe { Layout::from_size_align_unchecked(capacity, BUFFER_ALIGN) }
}
