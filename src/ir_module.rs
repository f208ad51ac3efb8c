use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LogKind, Result, TraceError};

/// One translated unit as the JIT described it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrFunction {
    /// Name written to the function log each time the unit runs.
    pub name: String,
    pub guest_pc: u64,
    /// Textual IR of the instrumented unit.
    pub body: String,
}

/// The IR module written alongside the logs at the end of a trace.
///
/// Holds one function per distinct unit, in the order the JIT first
/// defined them. A unit that is retranslated under the same name keeps its
/// first body.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IrModule {
    functions: Vec<IrFunction>,
    #[serde(skip)]
    names: HashSet<String>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a unit definition. Returns false if the name was already defined.
    pub fn define(&mut self, name: &str, guest_pc: u64, body: impl Into<String>) -> bool {
        if !self.names.insert(name.to_string()) {
            return false;
        }
        self.functions.push(IrFunction {
            name: name.to_string(),
            guest_pc,
            body: body.into(),
        });
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Serializes the module as JSON to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(TraceError::io(LogKind::Module))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, self)?;
        out.flush().map_err(TraceError::io(LogKind::Module))?;
        out.get_ref()
            .sync_all()
            .map_err(TraceError::io(LogKind::Module))
    }

    /// Reads a module written by [`write_to`](Self::write_to).
    pub fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(TraceError::io(LogKind::Module))?;
        let mut module: IrModule = serde_json::from_reader(std::io::BufReader::new(file))?;
        module.names = module.functions.iter().map(|f| f.name.clone()).collect();
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_deduplicates() {
        let mut module = IrModule::new();
        assert!(module.define("tb-1", 0x400000, "body one"));
        assert!(!module.define("tb-1", 0x400000, "body two"));
        assert!(module.define("tb-2", 0x400010, "body three"));

        assert_eq!(module.len(), 2);
        assert_eq!(module.functions()[0].body, "body one");
        assert!(module.contains("tb-2"));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.json");
        let mut module = IrModule::new();
        module.define("tb-1", 0x400000, "ret void");
        module.write_to(&path).unwrap();

        let loaded = IrModule::read_from(&path).unwrap();
        assert_eq!(loaded.functions(), module.functions());
        assert!(loaded.contains("tb-1"));
    }
}
