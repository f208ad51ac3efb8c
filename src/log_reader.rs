//! Reading back the logs a trace produced.
//!
//! This module decodes records and lines; it does not interpret them. It
//! exists so traces can be inspected and so tests can check what the
//! controller wrote.

use crate::event::{DynValEntry, RECORD_SIZE};
use crate::taint_tracker::{TaintDirection, TaintRegion};

/// Sequential decoder over the bytes of a memlog.
///
/// # Examples
///
/// ```
/// # use dynval_logger::{MemlogReader, DynValEntry};
/// let mut data = Vec::new();
/// data.extend_from_slice(&DynValEntry::load(0x10).to_bytes());
/// data.extend_from_slice(&DynValEntry::store(0x20).to_bytes());
///
/// let values: Vec<u64> = MemlogReader::new(&data).map(|e| e.value).collect();
/// assert_eq!(values, vec![0x10, 0x20]);
/// ```
pub struct MemlogReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemlogReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads the next record, or `None` once fewer than a record's worth of
    /// bytes remain.
    pub fn read_entry(&mut self) -> Option<DynValEntry> {
        let entry = DynValEntry::from_bytes(&self.data[self.pos..])?;
        self.pos += RECORD_SIZE;
        Some(entry)
    }

    /// Bytes not yet consumed. Non-zero after the iterator ends means the
    /// log was truncated mid-record.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads the segment of the unit at `guest_pc`, at most `expected` records.
    ///
    /// The segment ends early, marker included, if the unit was cut short
    /// by an exception. A marker directly after a full segment belongs to
    /// this unit only if it carries this unit's `guest_pc`; otherwise it is
    /// left for the next unit, which faulted before logging anything.
    ///
    /// A unit that runs to completion and is immediately re-entered at the
    /// same `guest_pc` only to fault with zero records is indistinguishable
    /// from one fault after the last record; the marker goes to the first.
    pub fn read_segment(&mut self, expected: usize, guest_pc: u64) -> Vec<DynValEntry> {
        let mut segment = Vec::with_capacity(expected + 1);
        while segment.len() < expected {
            let Some(entry) = self.read_entry() else { break };
            let marker = entry.is_exception_marker();
            segment.push(entry);
            if marker {
                return segment;
            }
        }
        // A fault can land after the last instrumented instruction.
        if let Some(next) = DynValEntry::from_bytes(&self.data[self.pos..]) {
            if next.is_exception_marker() && next.value == guest_pc {
                self.pos += RECORD_SIZE;
                segment.push(next);
            }
        }
        segment
    }
}

impl Iterator for MemlogReader<'_> {
    type Item = DynValEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_entry()
    }
}

/// One line of the function log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionLogLine {
    /// A unit entry; matches the next segment in the memlog.
    Unit(String),
    /// A taint side-channel line.
    Taint(TaintRegion),
}

impl FunctionLogLine {
    pub fn parse(line: &str) -> Self {
        parse_taint(line)
            .map(FunctionLogLine::Taint)
            .unwrap_or_else(|| FunctionLogLine::Unit(line.to_string()))
    }
}

/// Splits function log text into lines, skipping blank ones.
pub fn parse_function_log(text: &str) -> Vec<FunctionLogLine> {
    text.lines()
        .filter(|l| !l.is_empty())
        .map(FunctionLogLine::parse)
        .collect()
}

/// Unit names from a function log, in execution order.
pub fn unit_names(lines: &[FunctionLogLine]) -> Vec<&str> {
    lines
        .iter()
        .filter_map(|l| match l {
            FunctionLogLine::Unit(name) => Some(name.as_str()),
            FunctionLogLine::Taint(_) => None,
        })
        .collect()
}

fn parse_taint(line: &str) -> Option<TaintRegion> {
    let mut fields = line.split(',');
    if fields.next()? != "taint" {
        return None;
    }
    let direction = match fields.next()? {
        "read" => TaintDirection::Read,
        "write" => TaintDirection::Write,
        _ => return None,
    };
    let address = fields.next()?.parse().ok()?;
    let length = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(TaintRegion { direction, address, length })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_record() {
        let mut data = DynValEntry::load(1).to_bytes().to_vec();
        data.extend_from_slice(&[0u8; 5]);
        let mut reader = MemlogReader::new(&data);
        assert!(reader.read_entry().is_some());
        assert!(reader.read_entry().is_none());
        assert_eq!(reader.remaining(), 5);
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(
            FunctionLogLine::parse("taint,read,4096,100"),
            FunctionLogLine::Taint(TaintRegion {
                direction: TaintDirection::Read,
                address: 4096,
                length: 100,
            })
        );
        assert_eq!(
            FunctionLogLine::parse("tcg-llvm-tb-3-400080"),
            FunctionLogLine::Unit("tcg-llvm-tb-3-400080".into())
        );
        // Malformed taint lines are kept verbatim as names.
        assert_eq!(
            FunctionLogLine::parse("taint,sideways,1,2"),
            FunctionLogLine::Unit("taint,sideways,1,2".into())
        );
    }

    #[test]
    fn test_unit_names_skip_taint() {
        let lines = parse_function_log("A\ntaint,write,1,2\n\nB\n");
        assert_eq!(unit_names(&lines), vec!["A", "B"]);
    }
}
