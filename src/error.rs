use std::io;

use thiserror::Error;

/// Which of the trace outputs an I/O error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    FunctionLog,
    Memlog,
    Module,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::FunctionLog => write!(f, "function log"),
            LogKind::Memlog => write!(f, "memlog"),
            LogKind::Module => write!(f, "IR module"),
        }
    }
}

/// Errors that end a trace session.
///
/// Everything except `Config` is fatal: once the controller has reported
/// one of these, the trace on disk has a gap and is not replayable.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("I/O error on {log}: {source}")]
    Io {
        log: LogKind,
        #[source]
        source: io::Error,
    },

    #[error("dynamic value buffer overflowed ({capacity} bytes allocated, ceiling {max})")]
    BufferOverflow { capacity: usize, max: usize },

    #[error("trace capture was aborted by an earlier failure")]
    Aborted,

    #[error("trace session already finished")]
    Finished,

    #[error("failed to link intrinsic `{symbol}` into the JIT: {source}")]
    JitLink {
        symbol: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid trace configuration: {0}")]
    Config(String),

    #[error("failed to encode IR module: {0}")]
    ModuleEncode(#[from] serde_json::Error),
}

impl TraceError {
    pub(crate) fn io(log: LogKind) -> impl FnOnce(io::Error) -> TraceError {
        move |source| TraceError::Io { log, source }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
