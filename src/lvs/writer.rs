// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! LVS writer. Both netlists go through the L2N writer; the cross-reference
//! refers to their objects by the ids assigned there.

use super::{CircuitPairData, CrossReference, LvsDb, ObjectPair, Status, LVS_MAGIC};
use crate::format::keys::*;
use crate::format::{CircuitIds, IdMaps, Key, KeyStyle, L2nWriter, FORMAT_VERSION};
use crate::layout::word_or_quoted;
use crate::log::LogEntryData;
use crate::netlist::Netlist;

#[derive(Debug, Clone, Copy, Default)]
pub struct LvsWriter {
    style: KeyStyle,
    l2n: L2nWriter,
}

/// Always-quoted form, so a message can never be mistaken for a status word.
fn quoted(s: &str) -> String {
    let w = word_or_quoted(s);
    if w.starts_with('\'') {
        w
    } else {
        format!("'{}'", w)
    }
}

pub(crate) fn status_key(status: Status) -> Option<&'static Key> {
    match status {
        Status::None => None,
        Status::Match => Some(&MATCH),
        Status::NoMatch => Some(&NOMATCH),
        Status::Mismatch => Some(&MISMATCH),
        Status::MatchWithWarning => Some(&MATCH_WARNING),
        Status::Skipped => Some(&SKIPPED),
    }
}

impl LvsWriter {
    pub fn new(style: KeyStyle) -> Self {
        Self { style, l2n: L2nWriter::new(style) }
    }

    fn key(&self, k: &Key) -> &'static str {
        k.get(self.style)
    }

    fn long(&self) -> bool {
        self.style == KeyStyle::Long
    }

    fn deeper(&self, indent: &str) -> String {
        if self.long() {
            format!("{} ", indent)
        } else {
            String::new()
        }
    }

    fn line(&self, out: &mut String, indent: &str, text: &str) {
        out.push_str(indent);
        out.push_str(text);
        out.push('\n');
    }

    fn comment(&self, out: &mut String, text: &str) {
        if self.long() {
            out.push_str("# ");
            out.push_str(text);
            out.push('\n');
        }
    }

    pub fn write_lvs(&self, out: &mut String, db: &LvsDb) {
        let timer = clilog::stimer!("write LVS");
        out.push_str(LVS_MAGIC);
        out.push('\n');
        self.line(out, "", &format!("{}({})", self.key(&VERSION), FORMAT_VERSION));

        let inner = self.deeper("");
        if self.long() {
            out.push('\n');
        }
        self.comment(out, "Layout");
        self.line(out, "", &format!("{}(", self.key(&LAYOUT)));
        let layout_ids = self.l2n.write_body(out, &db.l2n, &inner);
        self.line(out, "", ")");

        let mut reference_ids = IdMaps::default();
        if let Some(reference) = &db.reference {
            if self.long() {
                out.push('\n');
            }
            self.comment(out, "Reference netlist");
            self.line(out, "", &format!("{}(", self.key(&REFERENCE)));
            reference_ids = self.l2n.write_netlist_body(out, reference, &inner);
            self.line(out, "", ")");
        }

        if let (Some(xref), Some(layout)) = (&db.xref, db.l2n.netlist()) {
            let empty = Netlist::new();
            let reference = db.reference.as_ref().unwrap_or(&empty);
            if self.long() {
                out.push('\n');
            }
            self.comment(out, "Cross reference");
            self.write_xref(out, xref, (layout, &layout_ids), (reference, &reference_ids));
        }
        clilog::finish!(timer);
    }

    fn write_xref(
        &self,
        out: &mut String,
        xref: &CrossReference,
        layout: (&Netlist, &IdMaps),
        reference: (&Netlist, &IdMaps),
    ) {
        self.line(out, "", &format!("{}(", self.key(&XREF)));
        let indent = self.deeper("");
        for cp in &xref.circuits {
            self.write_circuit_pair(out, &indent, cp, layout, reference);
        }
        self.write_log(out, &indent, &xref.log);
        self.line(out, "", ")");
    }

    fn circuit_name(nl: &Netlist, id: Option<usize>) -> String {
        match id {
            Some(c) if c < nl.num_circuits() => word_or_quoted(&nl.circuit(c).name),
            _ => "()".to_string(),
        }
    }

    /// `id` or `()` if absent or unknown to the dump.
    fn id_or_nil(id: Option<usize>) -> String {
        id.map(|i| i.to_string()).unwrap_or_else(|| "()".to_string())
    }

    fn status_and_message(&self, status: Status, message: &str) -> String {
        let mut s = String::new();
        if let Some(k) = status_key(status) {
            s.push(' ');
            s.push_str(self.key(k));
        }
        if !message.is_empty() {
            s.push(' ');
            s.push_str(&quoted(message));
        }
        s
    }

    fn write_pairs<T: Copy>(
        &self,
        out: &mut String,
        indent: &str,
        key: &Key,
        pairs: &[ObjectPair<T>],
        first: impl Fn(T) -> Option<usize>,
        second: impl Fn(T) -> Option<usize>,
    ) {
        for p in pairs {
            let a = Self::id_or_nil(p.first.and_then(&first));
            let b = Self::id_or_nil(p.second.and_then(&second));
            self.line(
                out,
                indent,
                &format!("{}({} {}{})", self.key(key), a, b, self.status_and_message(p.status, &p.message)),
            );
        }
    }

    fn write_circuit_pair(
        &self,
        out: &mut String,
        indent: &str,
        cp: &CircuitPairData,
        (lnl, lids): (&Netlist, &IdMaps),
        (rnl, rids): (&Netlist, &IdMaps),
    ) {
        let c = &cp.circuits;
        self.line(
            out,
            indent,
            &format!(
                "{}({} {}{}",
                self.key(&CIRCUIT),
                Self::circuit_name(lnl, c.first),
                Self::circuit_name(rnl, c.second),
                self.status_and_message(c.status, &c.message)
            ),
        );
        let inner = self.deeper(indent);
        let empty = CircuitIds::default();
        let a = c.first.and_then(|id| lids.circuit_ids(id)).unwrap_or(&empty);
        let b = c.second.and_then(|id| rids.circuit_ids(id)).unwrap_or(&empty);

        let has_objects =
            !(cp.nets.is_empty() && cp.pins.is_empty() && cp.devices.is_empty() && cp.subcircuits.is_empty());
        if has_objects {
            self.line(out, &inner, &format!("{}(", self.key(&XREF)));
            let items = self.deeper(&inner);
            self.write_pairs(out, &items, &NET, &cp.nets, |n| a.net_id(n), |n| b.net_id(n));
            self.write_pairs(out, &items, &PIN, &cp.pins, Some, Some);
            self.write_pairs(out, &items, &DEVICE, &cp.devices, |d| a.device_id(d), |d| b.device_id(d));
            self.write_pairs(out, &items, &CIRCUIT, &cp.subcircuits, |s| a.subcircuit_id(s), |s| b.subcircuit_id(s));
            self.line(out, &inner, ")");
        }
        self.write_log(out, &inner, &cp.log);
        self.line(out, indent, ")");
    }

    fn write_log(&self, out: &mut String, indent: &str, log: &[LogEntryData]) {
        if log.is_empty() {
            return;
        }
        self.line(out, indent, &format!("{}(", self.key(&LOG)));
        let inner = self.deeper(indent);
        for e in log {
            self.l2n.write_log_entry(out, &inner, &ENTRY, e);
        }
        self.line(out, indent, ")");
    }
}
