//! Buffer lifecycle around translation-unit boundaries.
//!
//! The runtime calls the controller's hooks as it executes: entry, exit,
//! exception, and syscall completion in user mode. The controller keeps the
//! function log and the memlog in lock-step: every unit name written to the
//! function log is matched by exactly one segment in the memlog, in the same
//! order.
//!
//! ```text
//!  on_unit_enter ──► [EMPTY] ──log_dynval──► [ACCUMULATING] ──on_unit_exit──► segment
//!                                                  │
//!                                                  └──on_exception──► segment + marker
//! ```
//!
//! Flush failures are fatal. A memlog with a gap cannot be replayed, so the
//! controller refuses every hook after the first failure.

use std::ptr::NonNull;

use crate::dynval_buffer::DynValBuffer;
use crate::error::{LogKind, Result, TraceError};
use crate::event::DynValEntry;
use crate::intrinsic::{register_logging_intrinsic, JitEngine};
use crate::ir_module::IrModule;
use crate::taint_tracker::{SyscallEvent, TaintTracker};
use crate::trace_log::{FunctionLogSink, SegmentSink};

/// A translation unit as identified by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationUnit<'a> {
    /// Stable name, matching a function in the IR module.
    pub name: &'a str,
    pub guest_pc: u64,
}

impl<'a> TranslationUnit<'a> {
    pub const fn new(name: &'a str, guest_pc: u64) -> Self {
        Self { name, guest_pc }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No unit open; the buffer should be empty.
    Idle,
    /// A unit was entered and has not exited yet.
    InUnit,
    Aborted,
    Finished,
}

/// Counters kept over the life of a trace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub units_entered: u64,
    pub segments_flushed: u64,
    pub records_flushed: u64,
    pub exceptions: u64,
    /// Hooks that arrived out of order and were repaired.
    pub desyncs: u64,
    pub taint_lines: u64,
}

/// Owns the dynamic value buffer and flushes it at unit boundaries.
///
/// # Thread Safety
///
/// **Important**: FlushController is NOT thread-safe. Its hooks and the
/// generated code that calls [`log_dynval`](crate::log_dynval) through
/// [`buffer_handle`](Self::buffer_handle) must all run on one thread, which
/// is what gives the logs their order.
///
/// # Examples
///
/// ```
/// # use dynval_logger::{FlushController, FunctionLogSink, SegmentSink, TranslationUnit, DynValEntry};
/// # use std::io;
/// # struct Discard;
/// # impl SegmentSink for Discard {
/// #     fn write_segment(&mut self, _segment: &[u8]) -> io::Result<()> { Ok(()) }
/// # }
/// # impl FunctionLogSink for Discard {
/// #     fn write_line(&mut self, _line: &str) -> io::Result<()> { Ok(()) }
/// # }
/// let mut controller = FlushController::new(4096, 1 << 20, Discard, Discard)?;
/// let unit = TranslationUnit::new("tb-1", 0x400000);
///
/// controller.on_unit_enter(unit).unwrap();
/// controller.log(DynValEntry::load(0x7fff_0000));
/// controller.on_unit_exit(unit, None).unwrap();
///
/// assert_eq!(controller.stats().records_flushed, 1);
/// # Ok::<(), dynval_logger::TraceError>(())
/// ```
pub struct FlushController {
    buffer: NonNull<DynValBuffer>,
    function_log: Box<dyn FunctionLogSink>,
    memlog: Box<dyn SegmentSink>,
    phase: Phase,
    current_unit: String,
    current_pc: u64,
    taint: Option<TaintTracker>,
    module: IrModule,
    stats: FlushStats,
}

impl FlushController {
    /// Creates a controller with a fresh buffer of `initial_capacity` bytes
    /// that may grow up to `max_capacity`.
    ///
    /// Fails if the buffer cannot be allocated; see [`DynValBuffer::new`].
    pub fn new(
        initial_capacity: usize,
        max_capacity: usize,
        function_log: impl FunctionLogSink + 'static,
        memlog: impl SegmentSink + 'static,
    ) -> Result<Self> {
        let buffer = Box::new(DynValBuffer::new(initial_capacity, max_capacity)?);
        Ok(Self {
            // Box::into_raw never returns null
            buffer: unsafe { NonNull::new_unchecked(Box::into_raw(buffer)) },
            function_log: Box::new(function_log),
            memlog: Box::new(memlog),
            phase: Phase::Idle,
            current_unit: String::new(),
            current_pc: 0,
            taint: None,
            module: IrModule::new(),
            stats: FlushStats::default(),
        })
    }

    /// Enables the syscall-driven taint tracker.
    pub fn with_taint_tracking(mut self) -> Self {
        self.taint = Some(TaintTracker::new());
        self
    }

    /// Raw handle passed as the first argument of every `log_dynval` call.
    pub fn buffer_handle(&self) -> *mut DynValBuffer {
        self.buffer.as_ptr()
    }

    pub fn buffer(&self) -> &DynValBuffer {
        unsafe { self.buffer.as_ref() }
    }

    /// Appends one record, exactly as the intrinsic does from generated code.
    #[inline(always)]
    pub fn log(&mut self, entry: DynValEntry) {
        self.buffer_mut().append(entry);
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    pub fn module(&self) -> &IrModule {
        &self.module
    }

    pub fn taint_tracker(&self) -> Option<&TaintTracker> {
        self.taint.as_ref()
    }

    pub fn is_aborted(&self) -> bool {
        self.phase == Phase::Aborted
    }

    /// Links the event encoder into the runtime's JIT and installs the
    /// instrumentation pass with this controller's buffer.
    pub fn on_jit_init(&mut self, engine: &mut dyn JitEngine) -> Result<()> {
        let symbol = register_logging_intrinsic();
        engine
            .map_intrinsic(&symbol)
            .map_err(|source| TraceError::JitLink { symbol: symbol.name, source })?;
        engine
            .install_instrumentation(self.buffer_handle())
            .map_err(|source| TraceError::JitLink { symbol: symbol.name, source })?;
        tracing::info!(symbol = symbol.name, address = symbol.address, "linked logging intrinsic");
        Ok(())
    }

    /// Records the IR of a freshly translated unit for the module file.
    pub fn define_unit(&mut self, unit: TranslationUnit<'_>, body: impl Into<String>) {
        if self.module.define(unit.name, unit.guest_pc, body) {
            tracing::trace!(unit = unit.name, "defined unit");
        }
    }

    /// Unit entry: log the unit's name, then start it with an empty buffer.
    ///
    /// If the previous unit never reached its exit hook, or records are
    /// sitting in the buffer, they are flushed first so nothing is lost.
    pub fn on_unit_enter(&mut self, unit: TranslationUnit<'_>) -> Result<()> {
        self.check_live()?;
        self.write_line(unit.name)?;

        let pending = self.buffer().len();
        if self.phase == Phase::InUnit || pending > 0 {
            tracing::warn!(
                previous = %self.current_unit,
                next = unit.name,
                records = pending,
                "unit entered before the previous segment was flushed"
            );
            self.stats.desyncs += 1;
            self.flush_segment()?;
        }
        self.buffer_mut().clear();

        self.phase = Phase::InUnit;
        self.current_unit.clear();
        self.current_unit.push_str(unit.name);
        self.current_pc = unit.guest_pc;
        self.stats.units_entered += 1;
        Ok(())
    }

    /// Normal unit exit: the buffer becomes the unit's segment.
    pub fn on_unit_exit(
        &mut self,
        unit: TranslationUnit<'_>,
        next: Option<TranslationUnit<'_>>,
    ) -> Result<()> {
        self.check_live()?;
        match self.phase {
            Phase::InUnit => {
                if unit.name != self.current_unit {
                    tracing::warn!(
                        entered = %self.current_unit,
                        exited = unit.name,
                        "exit hook names a different unit than the one entered"
                    );
                    self.stats.desyncs += 1;
                }
            }
            _ => {
                tracing::warn!(unit = unit.name, "unit exited without a matching entry");
                self.stats.desyncs += 1;
                if self.buffer().is_empty() {
                    return Ok(());
                }
            }
        }

        tracing::trace!(unit = unit.name, next = next.map(|n| n.name), "exit");
        self.flush_segment()?;
        self.phase = Phase::Idle;
        Ok(())
    }

    /// Exception inside a unit: mark the segment as cut short and flush it.
    ///
    /// Safe to call at any point, including twice in a row.
    pub fn on_exception(&mut self, unit: TranslationUnit<'_>) -> Result<()> {
        self.check_live()?;
        if self.phase == Phase::Idle && self.buffer().is_empty() {
            tracing::warn!(unit = unit.name, "exception outside of any unit, nothing to flush");
            return Ok(());
        }

        tracing::debug!(unit = unit.name, records = self.buffer().len(), "exception, flushing");
        self.log(DynValEntry::exception(unit.guest_pc));
        self.stats.exceptions += 1;
        self.flush_segment()?;
        self.phase = Phase::Idle;
        Ok(())
    }

    /// Completed syscall in user mode. Emits a taint line into the function
    /// log when data moved through the tracked input or output file.
    pub fn on_syscall(&mut self, event: &SyscallEvent) -> Result<()> {
        self.check_live()?;
        let region = match self.taint.as_mut() {
            Some(tracker) => tracker.observe(event),
            None => return Ok(()),
        };
        if let Some(region) = region {
            tracing::info!(%region, "taint region");
            self.write_line(&region.to_string())?;
            self.stats.taint_lines += 1;
        }
        Ok(())
    }

    /// Flushes whatever is left and finalizes both logs.
    ///
    /// A unit still open at this point gets its segment, even an empty one.
    pub fn finish(&mut self) -> Result<FlushStats> {
        self.check_live()?;
        if self.phase == Phase::InUnit || !self.buffer().is_empty() {
            tracing::debug!(unit = %self.current_unit, "flushing residue at end of trace");
            self.flush_segment()?;
        }

        if let Err(e) = self.memlog.finish() {
            return Err(self.abort(TraceError::Io { log: LogKind::Memlog, source: e }));
        }
        if let Err(e) = self.function_log.finish() {
            return Err(self.abort(TraceError::Io { log: LogKind::FunctionLog, source: e }));
        }
        self.phase = Phase::Finished;
        Ok(self.stats)
    }

    fn buffer_mut(&mut self) -> &mut DynValBuffer {
        unsafe { self.buffer.as_mut() }
    }

    fn check_live(&self) -> Result<()> {
        match self.phase {
            Phase::Aborted => Err(TraceError::Aborted),
            Phase::Finished => Err(TraceError::Finished),
            Phase::Idle | Phase::InUnit => Ok(()),
        }
    }

    fn abort(&mut self, error: TraceError) -> TraceError {
        tracing::error!(%error, "aborting trace capture");
        self.phase = Phase::Aborted;
        error
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if let Err(e) = self.function_log.write_line(line) {
            return Err(self.abort(TraceError::Io { log: LogKind::FunctionLog, source: e }));
        }
        Ok(())
    }

    /// Writes the buffer as one segment and clears it.
    fn flush_segment(&mut self) -> Result<()> {
        // Detached from `self` so the sink can be borrowed alongside it.
        let buffer = unsafe { &mut *self.buffer.as_ptr() };
        if buffer.overflowed() {
            let error = TraceError::BufferOverflow {
                capacity: buffer.capacity(),
                max: buffer.max_capacity(),
            };
            return Err(self.abort(error));
        }

        if let Err(e) = self.memlog.write_segment(buffer.as_bytes()) {
            return Err(self.abort(TraceError::Io { log: LogKind::Memlog, source: e }));
        }
        self.stats.segments_flushed += 1;
        self.stats.records_flushed += buffer.len() as u64;
        buffer.clear();
        Ok(())
    }
}

impl Drop for FlushController {
    fn drop(&mut self) {
        // Ensure the last segment is written
        if matches!(self.phase, Phase::Idle | Phase::InUnit) {
            if let Err(error) = self.finish() {
                tracing::error!(%error, "failed to finalize trace on drop");
            }
        }
        unsafe { drop(Box::from_raw(self.buffer.as_ptr())) };
    }
}
