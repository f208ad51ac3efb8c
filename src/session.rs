use std::fs;

use crate::config::TraceConfig;
use crate::error::{LogKind, Result, TraceError};
use crate::flush_controller::{FlushController, FlushStats};
use crate::trace_log::{FunctionLogWriter, MemlogWriter};

/// Switches the runtime exposes to the tracer.
///
/// Toggled once when a session starts and once when it ends; not part of
/// the per-unit contract.
pub trait RuntimeControl {
    fn enable_memory_callbacks(&mut self);
    fn disable_memory_callbacks(&mut self);

    /// True if the runtime already executes every unit through the JIT.
    fn full_trace_enabled(&self) -> bool;
    fn enable_full_trace(&mut self);
    fn disable_full_trace(&mut self);
}

/// One complete trace: both logs on disk, the IR module, and the runtime
/// switches that were flipped to produce them.
pub struct TraceSession<R: RuntimeControl> {
    config: TraceConfig,
    controller: FlushController,
    runtime: R,
    closed: bool,
}

impl<R: RuntimeControl> TraceSession<R> {
    /// Opens the logs in `config.out_dir` and puts the runtime in full-trace mode.
    pub fn start(config: TraceConfig, mut runtime: R) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.out_dir).map_err(TraceError::io(LogKind::Memlog))?;

        let memlog = MemlogWriter::create(config.memlog_path())
            .map_err(TraceError::io(LogKind::Memlog))?;
        let function_log = FunctionLogWriter::create(config.function_log_path())
            .map_err(TraceError::io(LogKind::FunctionLog))?;

        let mut controller = FlushController::new(
            config.initial_buffer_capacity,
            config.max_buffer_capacity,
            function_log,
            memlog,
        )?;
        if config.track_taint {
            controller = controller.with_taint_tracking();
        }

        runtime.enable_memory_callbacks();
        if !runtime.full_trace_enabled() {
            runtime.enable_full_trace();
        }

        tracing::info!(
            out_dir = %config.out_dir.display(),
            buffer = config.initial_buffer_capacity,
            taint = config.track_taint,
            "trace session started"
        );
        Ok(Self { config, controller, runtime, closed: false })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// The controller whose hooks the runtime drives.
    pub fn controller(&mut self) -> &mut FlushController {
        &mut self.controller
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Flushes the last segment, writes the IR module, restores the
    /// runtime, and closes both logs.
    pub fn finish(mut self) -> Result<FlushStats> {
        let result = self.finalize();
        self.close_runtime();
        result
    }

    fn finalize(&mut self) -> Result<FlushStats> {
        let stats = self.controller.finish()?;
        let module = self.controller.module();
        module.write_to(&self.config.module_path())?;

        tracing::info!(
            units = stats.units_entered,
            segments = stats.segments_flushed,
            records = stats.records_flushed,
            exceptions = stats.exceptions,
            functions = module.len(),
            "trace session finished"
        );
        Ok(stats)
    }

    fn close_runtime(&mut self) {
        if self.closed {
            return;
        }
        self.runtime.disable_full_trace();
        self.runtime.disable_memory_callbacks();
        self.closed = true;
    }
}

/// A session dropped without [`finish`](TraceSession::finish) still
/// finalizes: the IR module is written and the runtime is restored.
impl<R: RuntimeControl> Drop for TraceSession<R> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!("trace session dropped without finish, finalizing");
        if let Err(e) = self.finalize() {
            tracing::error!(error = %e, "failed to finalize dropped trace session");
        }
        self.close_runtime();
    }
}
