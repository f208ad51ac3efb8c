//! # Dynamic Value Logger
//!
//! Captures a replayable, instruction-level trace of code executing under a
//! JIT-based binary translator:
//!
//! * **Function log**: the name of every translation unit entered, in order
//! * **Memlog**: every memory access, state access and branch target the
//!   instrumented units logged, as fixed-width binary records
//! * **IR module**: one function per distinct unit, for replaying the memlog
//!
//! The Nth unit line in the function log always corresponds to the Nth
//! segment of the memlog. Keeping that true across missed exit hooks and
//! exceptions is the job of the [`FlushController`].
//!
//! ## Main Components
//!
//! * `event`: the 16-byte record format and the `log_dynval` intrinsic
//! * `dynval_buffer`: the per-unit scratch buffer the intrinsic appends to
//! * `flush_controller`: flushes the buffer at unit boundaries
//! * `trace_log`: the two append-only log writers
//! * `taint_tracker`: marks input/output buffers in user-mode traces
//! * `session`: ties the above to files and the runtime's switches
//!
//! ## Quick Start
//!
//! ```no_run
//! use dynval_logger::{TraceConfig, TraceSession, RuntimeControl, TranslationUnit, DynValEntry};
//!
//! struct Runtime;
//! impl RuntimeControl for Runtime {
//!     fn enable_memory_callbacks(&mut self) {}
//!     fn disable_memory_callbacks(&mut self) {}
//!     fn full_trace_enabled(&self) -> bool { false }
//!     fn enable_full_trace(&mut self) {}
//!     fn disable_full_trace(&mut self) {}
//! }
//!
//! let mut session = TraceSession::start(TraceConfig::from_env()?, Runtime)?;
//! let unit = TranslationUnit::new("tcg-llvm-tb-1-400000", 0x400000);
//!
//! let controller = session.controller();
//! controller.define_unit(unit, "define void @tcg-llvm-tb-1-400000() { ret void }");
//! controller.on_unit_enter(unit)?;
//! controller.log(DynValEntry::load(0x7fff_1000));
//! controller.on_unit_exit(unit, None)?;
//!
//! session.finish()?;
//! # Ok::<(), dynval_logger::TraceError>(())
//! ```

pub mod config;
pub mod dynval_buffer;
pub mod error;
pub mod event;
pub mod flush_controller;
pub mod intrinsic;
pub mod ir_module;
pub mod log_reader;
pub mod session;
pub mod taint_tracker;
pub mod trace_log;

pub use config::TraceConfig;
pub use dynval_buffer::DynValBuffer;
pub use error::{LogKind, Result, TraceError};
pub use event::{log_dynval, DynValEntry, EntryType, LogOp, RECORD_SIZE};
pub use flush_controller::{FlushController, FlushStats, TranslationUnit};
pub use intrinsic::{register_logging_intrinsic, IntrinsicSymbol, JitEngine};
pub use ir_module::{IrFunction, IrModule};
pub use log_reader::{parse_function_log, unit_names, FunctionLogLine, MemlogReader};
pub use session::{RuntimeControl, TraceSession};
pub use taint_tracker::{SyscallEvent, TaintDirection, TaintRegion, TaintTracker};
pub use trace_log::{FunctionLogSink, FunctionLogWriter, MemlogWriter, SegmentSink};
