// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The L2N text format.
//!
//! An L2N dump is a sequence of `key(args...)` groups. Every key has a long
//! and a one-letter short spelling; readers accept both, writers emit one
//! style throughout. Unknown groups are skipped, so newer dumps stay
//! readable.

pub mod reader;
pub mod tokens;
pub mod writer;

use crate::l2n::LayoutToNetlist;
use crate::netlist::{CircuitId, DeviceId, NetId, SubCircuitId};
use std::collections::{BTreeMap, HashMap};

pub use reader::L2nReader;
pub use writer::L2nWriter;

pub const L2N_MAGIC: &str = "#%l2n-klayout";

/// Highest format version understood and the version written.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug)]
pub enum FormatError {
    Io(String),
    Syntax { message: String, line: usize, source: String },
    UnexpectedEof { line: usize, source: String },
    UnsupportedVersion(u32),
    Unknown { kind: &'static str, name: String, line: usize, source: String },
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Io(msg) => write!(f, "I/O error: {}", msg),
            FormatError::Syntax { message, line, source } => {
                write!(f, "{} in line {} of {}", message, line, source)
            }
            FormatError::UnexpectedEof { line, source } => {
                write!(f, "Unexpected end of file in line {} of {}", line, source)
            }
            FormatError::UnsupportedVersion(v) => write!(
                f,
                "Unsupported format version {} (highest supported version is {})",
                v, FORMAT_VERSION
            ),
            FormatError::Unknown { kind, name, line, source } => {
                write!(f, "Not a valid {} name: '{}' in line {} of {}", kind, name, line, source)
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Long and short spelling of one key.
#[derive(Debug, Clone, Copy)]
pub struct Key {
    pub long: &'static str,
    pub short: &'static str,
}

impl Key {
    const fn new(long: &'static str, short: &'static str) -> Self {
        Self { long, short }
    }

    pub fn matches(&self, word: &str) -> bool {
        word == self.long || word == self.short
    }

    pub fn get(&self, style: KeyStyle) -> &'static str {
        match style {
            KeyStyle::Long => self.long,
            KeyStyle::Short => self.short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStyle {
    #[default]
    Long,
    Short,
}

pub mod keys {
    use super::Key;

    pub const VERSION: Key = Key::new("version", "V");
    pub const DESCRIPTION: Key = Key::new("description", "B");
    pub const GENERATOR: Key = Key::new("generator", "Z");
    pub const TOP: Key = Key::new("top", "W");
    pub const UNIT: Key = Key::new("unit", "U");
    pub const LAYER: Key = Key::new("layer", "L");
    pub const CLASS: Key = Key::new("class", "K");
    pub const CONNECT: Key = Key::new("connect", "C");
    pub const GLOBAL: Key = Key::new("global", "G");
    pub const CIRCUIT: Key = Key::new("circuit", "X");
    pub const NET: Key = Key::new("net", "N");
    pub const NAME: Key = Key::new("name", "I");
    pub const PROPERTY: Key = Key::new("property", "F");
    pub const DEVICE: Key = Key::new("device", "D");
    pub const POLYGON: Key = Key::new("polygon", "Q");
    pub const RECT: Key = Key::new("rect", "R");
    pub const TEXT: Key = Key::new("text", "J");
    pub const TERMINAL: Key = Key::new("terminal", "T");
    pub const ABSTRACT: Key = Key::new("abstract", "A");
    pub const PARAM: Key = Key::new("param", "E");
    pub const LOCATION: Key = Key::new("location", "Y");
    pub const ROTATION: Key = Key::new("rotation", "O");
    pub const MIRROR: Key = Key::new("mirror", "M");
    pub const SCALE: Key = Key::new("scale", "S");
    pub const PIN: Key = Key::new("pin", "P");
    pub const MESSAGE: Key = Key::new("message", "H");

    // message contents
    pub const INFO: Key = Key::new("info", "I");
    pub const WARNING: Key = Key::new("warning", "W");
    pub const ERROR: Key = Key::new("error", "E");
    pub const CELL: Key = Key::new("cell", "C");
    pub const CAT: Key = Key::new("cat", "X");

    // LVS
    pub const LAYOUT: Key = Key::new("layout", "J");
    pub const REFERENCE: Key = Key::new("reference", "H");
    pub const XREF: Key = Key::new("xref", "Z");
    pub const LOG: Key = Key::new("log", "L");
    pub const ENTRY: Key = Key::new("entry", "M");
    pub const MATCH: Key = Key::new("match", "1");
    pub const NOMATCH: Key = Key::new("nomatch", "X");
    pub const MISMATCH: Key = Key::new("mismatch", "0");
    pub const MATCH_WARNING: Key = Key::new("warning", "W");
    pub const SKIPPED: Key = Key::new("skipped", "S");
}

/// Per-circuit mapping between ids in a dump and netlist objects.
#[derive(Debug, Clone, Default)]
pub struct CircuitIds {
    pub nets: BTreeMap<usize, NetId>,
    pub devices: BTreeMap<usize, DeviceId>,
    pub subcircuits: BTreeMap<usize, SubCircuitId>,
    net_ids: HashMap<NetId, usize>,
    device_ids: HashMap<DeviceId, usize>,
    subcircuit_ids: HashMap<SubCircuitId, usize>,
}

impl CircuitIds {
    pub fn insert_net(&mut self, id: usize, net: NetId) {
        self.nets.insert(id, net);
        self.net_ids.insert(net, id);
    }

    pub fn insert_device(&mut self, id: usize, device: DeviceId) {
        self.devices.insert(id, device);
        self.device_ids.insert(device, id);
    }

    pub fn insert_subcircuit(&mut self, id: usize, sc: SubCircuitId) {
        self.subcircuits.insert(id, sc);
        self.subcircuit_ids.insert(sc, id);
    }

    pub fn net_id(&self, net: NetId) -> Option<usize> {
        self.net_ids.get(&net).copied()
    }

    pub fn device_id(&self, device: DeviceId) -> Option<usize> {
        self.device_ids.get(&device).copied()
    }

    pub fn subcircuit_id(&self, sc: SubCircuitId) -> Option<usize> {
        self.subcircuit_ids.get(&sc).copied()
    }
}

/// Id maps of one netlist in a dump.
#[derive(Debug, Clone, Default)]
pub struct IdMaps {
    pub circuits: BTreeMap<usize, CircuitId>,
    pub per_circuit: BTreeMap<CircuitId, CircuitIds>,
}

impl IdMaps {
    pub fn circuit_ids(&self, c: CircuitId) -> Option<&CircuitIds> {
        self.per_circuit.get(&c)
    }
}

/// Integral values without a fraction, everything else in shortest round-trip form.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:?}", v)
    }
}

/// Renders an L2N dump of the orchestrator.
pub fn write_l2n(l2n: &LayoutToNetlist, short: bool) -> String {
    let style = if short { KeyStyle::Short } else { KeyStyle::Long };
    let mut out = String::new();
    L2nWriter::new(style).write_l2n(&mut out, l2n);
    out
}

/// Parses an L2N dump. `source` names the input in error messages.
pub fn read_l2n(text: &str, source: &str) -> Result<LayoutToNetlist, FormatError> {
    let mut ts = tokens::TokenStream::new(text, source);
    let mut l2n = LayoutToNetlist::new();
    L2nReader::new().read_l2n(&mut ts, &mut l2n)?;
    Ok(l2n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matching() {
        assert!(keys::CIRCUIT.matches("circuit"));
        assert!(keys::CIRCUIT.matches("X"));
        assert!(!keys::CIRCUIT.matches("x"));
        assert_eq!(keys::NET.get(KeyStyle::Short), "N");
        assert_eq!(keys::NET.get(KeyStyle::Long), "net");
    }

    #[test]
    fn test_number_format() {
        assert_eq!(fmt_num(90.0), "90");
        assert_eq!(fmt_num(-5.0), "-5");
        assert_eq!(fmt_num(0.001), "0.001");
        assert_eq!(fmt_num(2.5e-15), "2.5e-15");
    }

    #[test]
    fn test_error_messages_carry_location() {
        let e = FormatError::Syntax { message: "Expected ')'".into(), line: 12, source: "a.l2n".into() };
        assert_eq!(e.to_string(), "Expected ')' in line 12 of a.l2n");
        assert!(FormatError::UnsupportedVersion(3).to_string().contains("version 3"));
    }
}
