//! Registry of native functions that generated code may call.
//!
//! The JIT links generated code against symbols by name. This table maps
//! each intrinsic name to its address and argument shape so the runtime's
//! JIT glue can declare and map it. It is process-wide and shared between
//! threads, but is only written while the JIT is being initialized.

use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::dynval_buffer::DynValBuffer;
use crate::event::log_dynval;

/// Name under which the event encoder is linked.
pub const LOG_DYNVAL_SYMBOL: &str = "log_dynval";

/// A native function exposed to generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrinsicSymbol {
    pub name: &'static str,
    pub address: usize,
    /// Width in bits of each integer argument, in order. The return type is void.
    pub arg_bits: &'static [u32],
    /// The JIT should inline the call site.
    pub always_inline: bool,
}

#[cfg(target_pointer_width = "64")]
const LOG_DYNVAL_ARGS: &[u32] = &[64, 32, 32, 64];
#[cfg(target_pointer_width = "32")]
const LOG_DYNVAL_ARGS: &[u32] = &[32, 32, 32, 64];

lazy_static! {
    static ref INTRINSICS: Mutex<HashMap<&'static str, IntrinsicSymbol>> =
        Mutex::new(HashMap::new());
}

/// Registers the event encoder as a JIT intrinsic and returns its symbol.
///
/// Calling this more than once is harmless and returns the same symbol.
///
/// # Examples
///
/// ```
/// # use dynval_logger::intrinsic::{register_logging_intrinsic, lookup_intrinsic};
/// let symbol = register_logging_intrinsic();
/// assert_eq!(symbol.name, "log_dynval");
/// assert_eq!(lookup_intrinsic("log_dynval"), Some(symbol));
/// ```
pub fn register_logging_intrinsic() -> IntrinsicSymbol {
    let mut table = INTRINSICS.lock();
    table
        .entry(LOG_DYNVAL_SYMBOL)
        .or_insert_with(|| IntrinsicSymbol {
            name: LOG_DYNVAL_SYMBOL,
            address: log_dynval as unsafe extern "C" fn(*mut DynValBuffer, u32, u32, u64)
                as usize,
            arg_bits: LOG_DYNVAL_ARGS,
            always_inline: true,
        })
        .clone()
}

/// Looks up a registered intrinsic by name.
pub fn lookup_intrinsic(name: &str) -> Option<IntrinsicSymbol> {
    INTRINSICS.lock().get(name).cloned()
}

/// The module and execution-engine handles of the runtime's JIT.
///
/// Implemented by the runtime glue. The controller uses it once, from
/// [`FlushController::on_jit_init`](crate::FlushController::on_jit_init),
/// to make the event encoder callable from generated code.
pub trait JitEngine {
    /// Declares `symbol` in the module and maps it to its native address.
    fn map_intrinsic(
        &mut self,
        symbol: &IntrinsicSymbol,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Installs the instrumentation pass, which passes `buffer` as the first
    /// argument of every inserted intrinsic call.
    fn install_instrumentation(
        &mut self,
        buffer: *mut DynValBuffer,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
