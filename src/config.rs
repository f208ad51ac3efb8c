use std::env;
use std::path::{Path, PathBuf};

use crate::dynval_buffer::MAX_BUFFER_CAPACITY;
use crate::error::{Result, TraceError};

pub const ENV_TRACE_DIR: &str = "DYNVAL_TRACE_DIR";
pub const ENV_BUFFER_CAPACITY: &str = "DYNVAL_BUFFER_CAPACITY";
pub const ENV_BUFFER_MAX: &str = "DYNVAL_BUFFER_MAX";
pub const ENV_TRACK_TAINT: &str = "DYNVAL_TRACK_TAINT";

const DEFAULT_CAPACITY: usize = 1024 * 1024;
const DEFAULT_MAX_CAPACITY: usize = 256 * 1024 * 1024;

/// Where a trace goes and how the dynamic value buffer is sized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub out_dir: PathBuf,
    pub function_log_name: String,
    pub memlog_name: String,
    pub module_name: String,
    /// Bytes allocated for the buffer up front.
    pub initial_buffer_capacity: usize,
    /// Bytes the buffer may grow to before an overflow aborts the trace.
    pub max_buffer_capacity: usize,
    /// Watch syscalls for the input/output files (user mode only).
    pub track_taint: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            out_dir: env::temp_dir(),
            function_log_name: "dynval-functions.log".to_string(),
            memlog_name: "dynval-memlog.bin".to_string(),
            module_name: "dynval-module.json".to_string(),
            initial_buffer_capacity: DEFAULT_CAPACITY,
            max_buffer_capacity: DEFAULT_MAX_CAPACITY,
            track_taint: true,
        }
    }
}

impl TraceConfig {
    /// Defaults overridden by `DYNVAL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = env::var_os(ENV_TRACE_DIR) {
            config.out_dir = PathBuf::from(dir);
        }
        if let Some(cap) = parse_env::<usize>(ENV_BUFFER_CAPACITY)? {
            config.initial_buffer_capacity = cap;
        }
        if let Some(max) = parse_env::<usize>(ENV_BUFFER_MAX)? {
            config.max_buffer_capacity = max;
        }
        if let Some(taint) = parse_env::<bool>(ENV_TRACK_TAINT)? {
            config.track_taint = taint;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_out_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.out_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_buffer_capacity(mut self, initial: usize, max: usize) -> Self {
        self.initial_buffer_capacity = initial;
        self.max_buffer_capacity = max;
        self
    }

    pub fn with_taint_tracking(mut self, enabled: bool) -> Self {
        self.track_taint = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_buffer_capacity == 0 {
            return Err(TraceError::Config("initial buffer capacity must be non-zero".into()));
        }
        if self.max_buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(TraceError::Config(format!(
                "max buffer capacity {} exceeds {}",
                self.max_buffer_capacity, MAX_BUFFER_CAPACITY
            )));
        }
        if self.max_buffer_capacity < self.initial_buffer_capacity {
            return Err(TraceError::Config(format!(
                "max buffer capacity {} is below initial capacity {}",
                self.max_buffer_capacity, self.initial_buffer_capacity
            )));
        }
        Ok(())
    }

    pub fn function_log_path(&self) -> PathBuf {
        self.out_dir.join(&self.function_log_name)
    }

    pub fn memlog_path(&self) -> PathBuf {
        self.out_dir.join(&self.memlog_name)
    }

    pub fn module_path(&self) -> PathBuf {
        self.out_dir.join(&self.module_name)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TraceError::Config(format!("{key}={raw:?} is not a valid value"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(TraceError::Config(format!("{key} is not valid unicode")))
        }
    }
}
