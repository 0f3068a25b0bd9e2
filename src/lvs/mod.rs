// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! LVS database: an extracted layout, a reference netlist and the
//! cross-reference between both as produced by a comparer.
//!
//! The comparison itself happens elsewhere. This module only holds and
//! persists its result.

pub mod reader;
pub mod writer;

use crate::format::{FormatError, KeyStyle, L2N_MAGIC};
use crate::l2n::{LayoutToNetlist, Result};
use crate::log::LogEntryData;
use crate::netlist::{CircuitId, DeviceId, NetId, Netlist, PinId, SubCircuitId};
use std::path::Path;

pub use reader::LvsReader;
pub use writer::LvsWriter;

pub const LVS_MAGIC: &str = "#%lvsdb-klayout";

/// Outcome of comparing one pair of objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    None,
    Match,
    NoMatch,
    Mismatch,
    MatchWithWarning,
    Skipped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::None => "none",
            Status::Match => "match",
            Status::NoMatch => "nomatch",
            Status::Mismatch => "mismatch",
            Status::MatchWithWarning => "warning",
            Status::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A layout-side and a reference-side object, either of which may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPair<T> {
    pub first: Option<T>,
    pub second: Option<T>,
    pub status: Status,
    pub message: String,
}

impl<T> ObjectPair<T> {
    pub fn new(first: Option<T>, second: Option<T>, status: Status) -> Self {
        Self { first, second, status, message: String::new() }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitPairData {
    pub circuits: ObjectPair<CircuitId>,
    pub nets: Vec<ObjectPair<NetId>>,
    pub pins: Vec<ObjectPair<PinId>>,
    pub devices: Vec<ObjectPair<DeviceId>>,
    pub subcircuits: Vec<ObjectPair<SubCircuitId>>,
    pub log: Vec<LogEntryData>,
}

impl CircuitPairData {
    pub fn new(circuits: ObjectPair<CircuitId>) -> Self {
        Self { circuits, nets: Vec::new(), pins: Vec::new(), devices: Vec::new(), subcircuits: Vec::new(), log: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossReference {
    pub circuits: Vec<CircuitPairData>,
    pub log: Vec<LogEntryData>,
}

impl CrossReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair entry by layout-side circuit.
    pub fn per_circuit(&self, layout_circuit: CircuitId) -> Option<&CircuitPairData> {
        self.circuits.iter().find(|c| c.circuits.first == Some(layout_circuit))
    }

    /// Pair entry by reference-side circuit.
    pub fn per_reference_circuit(&self, reference_circuit: CircuitId) -> Option<&CircuitPairData> {
        self.circuits.iter().find(|c| c.circuits.second == Some(reference_circuit))
    }

    /// Number of circuit pairs with the given status.
    pub fn count(&self, status: Status) -> usize {
        self.circuits.iter().filter(|c| c.circuits.status == status).count()
    }
}

/// Layout side plus reference netlist plus cross-reference.
pub struct LvsDb {
    pub l2n: LayoutToNetlist,
    pub reference: Option<Netlist>,
    pub xref: Option<CrossReference>,
}

impl LvsDb {
    pub fn new(l2n: LayoutToNetlist) -> Self {
        Self { l2n, reference: None, xref: None }
    }

    pub fn with_reference(mut self, reference: Netlist) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_cross_reference(mut self, xref: CrossReference) -> Self {
        self.xref = Some(xref);
        self
    }

    pub fn reference(&self) -> Option<&Netlist> {
        self.reference.as_ref()
    }

    pub fn cross_reference(&self) -> Option<&CrossReference> {
        self.xref.as_ref()
    }

    /// True if every circuit pair matched, with or without warnings.
    pub fn is_match(&self) -> bool {
        self.xref.as_ref().is_some_and(|x| {
            x.circuits.iter().all(|c| matches!(c.circuits.status, Status::Match | Status::MatchWithWarning))
        })
    }

    pub fn to_text(&self, short: bool) -> String {
        let style = if short { KeyStyle::Short } else { KeyStyle::Long };
        let mut out = String::new();
        LvsWriter::new(style).write_lvs(&mut out, self);
        out
    }

    pub fn from_text(text: &str, source: &str) -> std::result::Result<Self, FormatError> {
        let mut ts = crate::format::tokens::TokenStream::new(text, source);
        LvsReader::new().read_lvs(&mut ts)
    }

    pub fn save(&self, path: impl AsRef<Path>, short: bool) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_text(short)).map_err(|e| FormatError::Io(format!("{}: {}", path.display(), e)))?;
        clilog::info!("saved LVS database to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FormatError::Io(format!("{}: {}", path.display(), e)))?;
        let mut db = Self::from_text(&text, &path.display().to_string())?;
        db.l2n.filename = path.display().to_string();
        Ok(db)
    }
}

/// A database of either kind, as found in a file.
pub enum Database {
    L2n(LayoutToNetlist),
    Lvs(LvsDb),
}

impl Database {
    /// The extracted layout side.
    pub fn l2n(&self) -> &LayoutToNetlist {
        match self {
            Database::L2n(l2n) => l2n,
            Database::Lvs(db) => &db.l2n,
        }
    }

    pub fn is_lvs(&self) -> bool {
        matches!(self, Database::Lvs(_))
    }

    /// Writes in the format the database was read in.
    pub fn save(&self, path: impl AsRef<Path>, short: bool) -> Result<()> {
        match self {
            Database::L2n(l2n) => l2n.save(path, short),
            Database::Lvs(db) => db.save(path, short),
        }
    }
}

/// Reads an L2N or LVS file. Only the first line decides which.
pub fn create_from_file(path: impl AsRef<Path>) -> Result<Database> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| FormatError::Io(format!("{}: {}", path.display(), e)))?;
    let source = path.display().to_string();
    let first = text.lines().next().unwrap_or("").trim();
    if first == LVS_MAGIC {
        clilog::debug!("{} is an LVS database", source);
        let mut db = LvsDb::from_text(&text, &source)?;
        db.l2n.filename = source;
        Ok(Database::Lvs(db))
    } else {
        if first != L2N_MAGIC {
            clilog::debug!("{} has no magic line, reading it as L2N", source);
        }
        let mut l2n = crate::format::read_l2n(&text, &source)?;
        l2n.filename = source;
        Ok(Database::L2n(l2n))
    }
}

impl From<LvsDb> for Database {
    fn from(db: LvsDb) -> Self {
        Database::Lvs(db)
    }
}

impl From<LayoutToNetlist> for Database {
    fn from(l2n: LayoutToNetlist) -> Self {
        Database::L2n(l2n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;

    const TWO_LEVEL: &str = include_str!("../../tests/fixtures/two_level.l2n");
    const MISMATCH: &str = include_str!("../../tests/fixtures/mismatch.lvsdb");

    fn matched_db() -> LvsDb {
        let l2n = crate::format::read_l2n(TWO_LEVEL, "two_level.l2n").unwrap();
        let reference = l2n.netlist().unwrap().clone();
        let mut xref = CrossReference::new();
        for (c, circuit) in reference.circuits() {
            let mut cp = CircuitPairData::new(ObjectPair::new(Some(c), Some(c), Status::Match));
            for (n, _) in circuit.nets() {
                cp.nets.push(ObjectPair::new(Some(n), Some(n), Status::Match));
            }
            for p in 0..circuit.pins().len() {
                cp.pins.push(ObjectPair::new(Some(p), Some(p), Status::Match));
            }
            for d in 0..circuit.devices().len() {
                cp.devices.push(ObjectPair::new(Some(d), Some(d), Status::Match));
            }
            for s in 0..circuit.subcircuits().len() {
                cp.subcircuits.push(ObjectPair::new(Some(s), Some(s), Status::Match));
            }
            xref.circuits.push(cp);
        }
        LvsDb::new(l2n).with_reference(reference).with_cross_reference(xref)
    }

    #[test]
    fn test_fixture_l2n_contents() {
        let l2n = crate::format::read_l2n(TWO_LEVEL, "two_level.l2n").unwrap();
        assert_eq!(l2n.description, "two level fixture");
        assert_eq!(l2n.generator, "hand written");
        assert_eq!(l2n.layer_names(), vec!["m1", "m2", "lbl"]);
        assert_eq!(l2n.global_net_id("VSS"), Some(0));
        let nl = l2n.netlist().unwrap();
        let leaf = nl.circuit(nl.circuit_by_name("LEAF").unwrap());
        assert_eq!(leaf.devices()[0].params[0], 1e-15);
        assert_eq!(nl.circuit(nl.circuit_by_name("TOP").unwrap()).subcircuits().len(), 2);
        assert_eq!(l2n.log_entries().len(), 1);
        assert!(!l2n.has_errors());

        let m1 = l2n.layer_by_name("m1").unwrap();
        let probed = l2n.probe_net(&m1, Point::new(2500, 50)).unwrap().unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        assert_eq!(probed.circuit, top);
        assert_eq!(nl.circuit(top).net(probed.net).unwrap().name, "IN");
    }

    #[test]
    fn test_lvs_round_trip() {
        let db = matched_db();
        assert!(db.is_match());
        for short in [false, true] {
            let text = db.to_text(short);
            assert!(text.starts_with(LVS_MAGIC));
            let back = LvsDb::from_text(&text, "mem").unwrap();
            assert_eq!(back.to_text(short), text);
            assert!(back.is_match());
            let xref = back.cross_reference().unwrap();
            assert_eq!(xref.circuits.len(), 2);
            assert_eq!(xref.circuits, db.xref.as_ref().unwrap().circuits);
        }
    }

    #[test]
    fn test_mismatch_fixture() {
        let db = LvsDb::from_text(MISMATCH, "mismatch.lvsdb").unwrap();
        let reference = db.reference().unwrap();
        assert_eq!(reference.num_circuits(), 2);
        let xref = db.cross_reference().unwrap();
        assert!(!db.is_match());
        assert_eq!(xref.count(Status::Skipped), 1);
        assert_eq!(xref.log.len(), 1);

        let inv = &xref.circuits[0];
        assert_eq!(inv.circuits.status, Status::NoMatch);
        assert_eq!(inv.circuits.message, "net count differs");
        assert_eq!(inv.nets.len(), 3);
        assert_eq!(inv.nets[1].status, Status::MatchWithWarning);
        assert_eq!(inv.nets[1].message, "ambiguous");
        let extra = &inv.nets[2];
        assert_eq!(extra.first, None);
        let ref_inv = reference.circuit(inv.circuits.second.unwrap());
        assert_eq!(ref_inv.net(extra.second.unwrap()).unwrap().name, "EXTRA");
        assert_eq!(inv.pins.len(), 2);
        assert_eq!(inv.log[0].message, "Nets are not matching");

        let skipped = &xref.circuits[1];
        assert_eq!(skipped.circuits.first, None);
        assert!(xref.per_reference_circuit(reference.circuit_by_name("BUF").unwrap()).is_some());

        for short in [false, true] {
            let text = db.to_text(short);
            let again = LvsDb::from_text(&text, "mem").unwrap();
            assert_eq!(again.to_text(short), text);
            assert_eq!(again.cross_reference(), Some(xref));
        }
    }

    #[test]
    fn test_unknown_xref_ids_fail() {
        let text = MISMATCH.replace("net(1 1 match)", "net(7 1 match)");
        let e = LvsDb::from_text(&text, "bad.lvsdb").err().unwrap();
        assert!(e.to_string().contains("bad.lvsdb"));
    }

    #[test]
    fn test_unknown_pin_index_fails() {
        let text = MISMATCH.replace("pin(1 1 match)", "pin(1 5 match)");
        let e = LvsDb::from_text(&text, "bad.lvsdb").err().unwrap();
        assert!(matches!(e, FormatError::Unknown { kind: "pin id", .. }));

        let text = MISMATCH.replace("pin(0 0 match)", "pin(2 0 match)");
        assert!(LvsDb::from_text(&text, "bad.lvsdb").is_err());
    }

    #[test]
    fn test_create_from_file_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let lvs_path = dir.path().join("a.lvsdb");
        std::fs::write(&lvs_path, MISMATCH).unwrap();
        let db = create_from_file(&lvs_path).unwrap();
        assert!(db.is_lvs());
        assert_eq!(db.l2n().filename, lvs_path.display().to_string());

        let l2n_path = dir.path().join("b.txt");
        std::fs::write(&l2n_path, TWO_LEVEL).unwrap();
        let db = create_from_file(&l2n_path).unwrap();
        assert!(!db.is_lvs());
        assert_eq!(db.l2n().netlist().unwrap().num_circuits(), 2);

        let out = dir.path().join("c.lvsdb");
        create_from_file(&lvs_path).unwrap().save(&out, true).unwrap();
        assert!(create_from_file(&out).unwrap().is_lvs());
    }
}
