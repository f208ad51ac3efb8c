//! Fixed-width event records and the logging intrinsic called from generated code.
//!
//! Every instrumented instruction in a translated unit ends in one call to
//! [`log_dynval`], which appends a single [`DynValEntry`] to the active
//! [`DynValBuffer`]. The call sits on the hottest path of the whole tracer,
//! so it does nothing but copy 16 bytes.
//!
//! # Binary Format
//!
//! Format: `[entry_type(4) | operation(4) | value(8)]`, host byte order.
//!
//! Records carry no length prefix. A reader recovers segment boundaries from
//! the function log and the per-unit layout described by the IR module.

use std::fmt;

use crate::dynval_buffer::DynValBuffer;

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = std::mem::size_of::<DynValEntry>();

/// What kind of dynamic value a record carries.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Address of a guest memory load.
    MemoryLoad = 0,
    /// Address of a guest memory store.
    MemoryStore = 1,
    /// Offset of a load or store into the emulated processor state.
    StateAccess = 2,
    /// Index of the successor taken by a branch, select or switch.
    BranchTarget = 3,
    /// Marks a segment cut short by an exception.
    ExceptionMarker = 4,
}

impl TryFrom<u32> for EntryType {
    type Error = u32;

    #[inline]
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::MemoryLoad),
            1 => Ok(Self::MemoryStore),
            2 => Ok(Self::StateAccess),
            3 => Ok(Self::BranchTarget),
            4 => Ok(Self::ExceptionMarker),
            other => Err(other),
        }
    }
}

/// The IR operation that produced a record.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LogOp {
    Load = 0,
    Store = 1,
    Branch = 2,
    Select = 3,
    Switch = 4,
    Except = 5,
}

impl TryFrom<u32> for LogOp {
    type Error = u32;

    #[inline]
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Load),
            1 => Ok(Self::Store),
            2 => Ok(Self::Branch),
            3 => Ok(Self::Select),
            4 => Ok(Self::Switch),
            5 => Ok(Self::Except),
            other => Err(other),
        }
    }
}

/// One logged dynamic value.
///
/// The discriminants are stored as raw `u32`s because generated code passes
/// them straight through the intrinsic ABI. Use [`DynValEntry::entry_type`]
/// and [`DynValEntry::op`] to get typed views.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DynValEntry {
    pub entry_type: u32,
    pub operation: u32,
    pub value: u64,
}

impl DynValEntry {
    #[inline(always)]
    pub const fn new(entry_type: EntryType, op: LogOp, value: u64) -> Self {
        Self {
            entry_type: entry_type as u32,
            operation: op as u32,
            value,
        }
    }

    pub const fn load(addr: u64) -> Self {
        Self::new(EntryType::MemoryLoad, LogOp::Load, addr)
    }

    pub const fn store(addr: u64) -> Self {
        Self::new(EntryType::MemoryStore, LogOp::Store, addr)
    }

    pub const fn branch(target: u64) -> Self {
        Self::new(EntryType::BranchTarget, LogOp::Branch, target)
    }

    /// The record appended when a unit is interrupted by an exception.
    pub const fn exception(pc: u64) -> Self {
        Self::new(EntryType::ExceptionMarker, LogOp::Except, pc)
    }

    pub fn entry_type(&self) -> Result<EntryType, u32> {
        EntryType::try_from(self.entry_type)
    }

    pub fn op(&self) -> Result<LogOp, u32> {
        LogOp::try_from(self.operation)
    }

    pub fn is_exception_marker(&self) -> bool {
        self.entry_type == EntryType::ExceptionMarker as u32
    }

    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.entry_type.to_ne_bytes());
        out[4..8].copy_from_slice(&self.operation.to_ne_bytes());
        out[8..16].copy_from_slice(&self.value.to_ne_bytes());
        out
    }

    /// Decodes one record from the front of `bytes`.
    ///
    /// Returns `None` if fewer than [`RECORD_SIZE`] bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..RECORD_SIZE)?;
        let mut word = [0u8; 4];
        let mut dword = [0u8; 8];

        word.copy_from_slice(&raw[0..4]);
        let entry_type = u32::from_ne_bytes(word);
        word.copy_from_slice(&raw[4..8]);
        let operation = u32::from_ne_bytes(word);
        dword.copy_from_slice(&raw[8..16]);
        let value = u64::from_ne_bytes(dword);

        Some(Self { entry_type, operation, value })
    }
}

impl fmt::Display for DynValEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.entry_type(), self.op()) {
            (Ok(kind), Ok(op)) => write!(f, "{:?}/{:?} 0x{:x}", kind, op, self.value),
            _ => write!(
                f,
                "raw({}, {}) 0x{:x}",
                self.entry_type, self.operation, self.value
            ),
        }
    }
}

/// The logging intrinsic linked into generated code.
///
/// Appends `(entry_type, operation, value)` to `buffer`. Never fails: if
/// the buffer cannot grow, the record is dropped and the buffer is marked
/// overflowed, which the flush controller reports at the next boundary.
///
/// # Safety
///
/// `buffer` must be the handle returned by
/// [`FlushController::buffer_handle`](crate::FlushController::buffer_handle)
/// for a controller that is still alive, and no other reference to that
/// buffer may be in use for the duration of the call. Generated code runs on
/// the same thread as the controller's hooks, which guarantees both.
#[no_mangle]
#[allow(improper_ctypes_definitions)] // the buffer is opaque to generated code
pub unsafe extern "C" fn log_dynval(
    buffer: *mut DynValBuffer,
    entry_type: u32,
    operation: u32,
    value: u64,
) {
    if let Some(buffer) = buffer.as_mut() {
        buffer.append(DynValEntry { entry_type, operation, value });
    }
}
