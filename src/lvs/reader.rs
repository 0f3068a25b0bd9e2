// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! LVS reader.

use super::{CircuitPairData, CrossReference, LvsDb, ObjectPair, Status};
use crate::format::keys::*;
use crate::format::reader::read_log_entry;
use crate::format::tokens::TokenStream;
use crate::format::{CircuitIds, FormatError, IdMaps, L2nReader, FORMAT_VERSION};
use crate::l2n::LayoutToNetlist;
use crate::log::LogEntryData;
use crate::netlist::Netlist;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Default)]
pub struct LvsReader {}

/// One side of the comparison as needed to resolve cross-reference ids.
struct Side<'a> {
    netlist: &'a Netlist,
    ids: &'a IdMaps,
}

impl Side<'_> {
    fn circuit(&self, ts: &TokenStream<'_>, name: Option<String>) -> Result<Option<usize>> {
        match name {
            None => Ok(None),
            Some(n) => self.netlist.circuit_by_name(&n).map(Some).ok_or_else(|| ts.unknown("circuit", &n)),
        }
    }

    /// Pins are referenced by index into the circuit's pin list.
    fn pin(&self, ts: &TokenStream<'_>, circuit: Option<usize>, id: Option<usize>) -> Result<Option<usize>> {
        match id {
            None => Ok(None),
            Some(i) => match circuit {
                Some(c) if i < self.netlist.circuit(c).pins().len() => Ok(Some(i)),
                _ => Err(ts.unknown("pin id", &i.to_string())),
            },
        }
    }
}

fn lookup(ts: &TokenStream<'_>, kind: &'static str, map: &BTreeMap<usize, usize>, id: Option<usize>) -> Result<Option<usize>> {
    match id {
        None => Ok(None),
        Some(i) => map.get(&i).copied().map(Some).ok_or_else(|| ts.unknown(kind, &i.to_string())),
    }
}

impl LvsReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_lvs(&mut self, ts: &mut TokenStream<'_>) -> Result<LvsDb> {
        let timer = clilog::stimer!("read LVS");
        let mut l2n = LayoutToNetlist::new();
        let mut layout_nl = Netlist::new();
        let mut layout_ids = IdMaps::default();
        let mut reference: Option<Netlist> = None;
        let mut reference_ids = IdMaps::default();
        let mut xref = None;

        while !ts.at_end()? {
            if ts.test_group(&VERSION)? {
                let v = ts.read_int()?;
                if v < 0 || v as u32 > FORMAT_VERSION {
                    return Err(FormatError::UnsupportedVersion(v.max(0) as u32));
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&LAYOUT)? {
                layout_ids = L2nReader::new().read_body(ts, Some(&mut l2n), &mut layout_nl, true)?;
                ts.expect_rparen()?;
            } else if ts.test_group(&REFERENCE)? {
                let mut nl = Netlist::new();
                reference_ids = L2nReader::new().read_body(ts, None, &mut nl, true)?;
                ts.expect_rparen()?;
                reference = Some(nl);
            } else if ts.test_group(&XREF)? {
                let empty = Netlist::new();
                let a = Side { netlist: &layout_nl, ids: &layout_ids };
                let b = Side { netlist: reference.as_ref().unwrap_or(&empty), ids: &reference_ids };
                xref = Some(self.read_xref(ts, &a, &b)?);
            } else {
                ts.skip_group()?;
            }
        }

        clilog::info!(
            "read LVS database from {}: {} layout circuits, {} reference circuits, {} circuit pairs",
            ts.source(),
            layout_nl.num_circuits(),
            reference.as_ref().map(|r| r.num_circuits()).unwrap_or(0),
            xref.as_ref().map(|x: &CrossReference| x.circuits.len()).unwrap_or(0)
        );
        l2n.netlist = Some(layout_nl);
        clilog::finish!(timer);
        Ok(LvsDb { l2n, reference, xref })
    }

    fn read_xref(&mut self, ts: &mut TokenStream<'_>, a: &Side<'_>, b: &Side<'_>) -> Result<CrossReference> {
        let mut xref = CrossReference::new();
        while !ts.at_rparen()? {
            if ts.test_group(&CIRCUIT)? {
                xref.circuits.push(self.read_circuit_pair(ts, a, b)?);
            } else if ts.test_group(&LOG)? {
                xref.log.extend(read_log(ts)?);
            } else {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;
        Ok(xref)
    }

    fn read_circuit_pair(&mut self, ts: &mut TokenStream<'_>, a: &Side<'_>, b: &Side<'_>) -> Result<CircuitPairData> {
        let first = read_name_or_nil(ts)?;
        let second = read_name_or_nil(ts)?;
        let ca = a.circuit(ts, first)?;
        let cb = b.circuit(ts, second)?;
        let (status, message) = read_status_and_message(ts)?;
        let mut cp = CircuitPairData::new(ObjectPair { first: ca, second: cb, status, message });

        let empty = CircuitIds::default();
        let ia = ca.and_then(|c| a.ids.circuit_ids(c)).unwrap_or(&empty);
        let ib = cb.and_then(|c| b.ids.circuit_ids(c)).unwrap_or(&empty);

        while !ts.at_rparen()? {
            if ts.test_group(&XREF)? {
                while !ts.at_rparen()? {
                    if ts.test_group(&NET)? {
                        let (x, y, status, message) = read_pair(ts)?;
                        let x = lookup(ts, "net id", &ia.nets, x)?;
                        let y = lookup(ts, "net id", &ib.nets, y)?;
                        cp.nets.push(ObjectPair { first: x, second: y, status, message });
                    } else if ts.test_group(&PIN)? {
                        let (x, y, status, message) = read_pair(ts)?;
                        let x = a.pin(ts, ca, x)?;
                        let y = b.pin(ts, cb, y)?;
                        cp.pins.push(ObjectPair { first: x, second: y, status, message });
                    } else if ts.test_group(&DEVICE)? {
                        let (x, y, status, message) = read_pair(ts)?;
                        let x = lookup(ts, "device id", &ia.devices, x)?;
                        let y = lookup(ts, "device id", &ib.devices, y)?;
                        cp.devices.push(ObjectPair { first: x, second: y, status, message });
                    } else if ts.test_group(&CIRCUIT)? {
                        let (x, y, status, message) = read_pair(ts)?;
                        let x = lookup(ts, "subcircuit id", &ia.subcircuits, x)?;
                        let y = lookup(ts, "subcircuit id", &ib.subcircuits, y)?;
                        cp.subcircuits.push(ObjectPair { first: x, second: y, status, message });
                    } else {
                        ts.skip_group()?;
                    }
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&LOG)? {
                cp.log.extend(read_log(ts)?);
            } else {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;
        Ok(cp)
    }
}

/// A name, or `()` for an absent side.
fn read_name_or_nil(ts: &mut TokenStream<'_>) -> Result<Option<String>> {
    if ts.test_lparen()? {
        ts.expect_rparen()?;
        Ok(None)
    } else {
        ts.read_word().map(Some)
    }
}

fn read_id_or_nil(ts: &mut TokenStream<'_>) -> Result<Option<usize>> {
    if ts.test_lparen()? {
        ts.expect_rparen()?;
        Ok(None)
    } else {
        ts.read_id().map(Some)
    }
}

fn read_status_and_message(ts: &mut TokenStream<'_>) -> Result<(Status, String)> {
    let status = if ts.test(&MATCH)? {
        Status::Match
    } else if ts.test(&NOMATCH)? {
        Status::NoMatch
    } else if ts.test(&MISMATCH)? {
        Status::Mismatch
    } else if ts.test(&MATCH_WARNING)? {
        Status::MatchWithWarning
    } else if ts.test(&SKIPPED)? {
        Status::Skipped
    } else {
        Status::None
    };
    let message = if ts.at_value_word()? { ts.read_word()? } else { String::new() };
    Ok((status, message))
}

/// `(a b status? message?)` after the opening parenthesis, including the closing one.
fn read_pair(ts: &mut TokenStream<'_>) -> Result<(Option<usize>, Option<usize>, Status, String)> {
    let a = read_id_or_nil(ts)?;
    let b = read_id_or_nil(ts)?;
    let (status, message) = read_status_and_message(ts)?;
    while !ts.at_rparen()? {
        ts.skip_group()?;
    }
    ts.expect_rparen()?;
    Ok((a, b, status, message))
}

/// `entry(...)*` up to and including the ')' closing the log group.
fn read_log(ts: &mut TokenStream<'_>) -> Result<Vec<LogEntryData>> {
    let mut entries = Vec::new();
    while !ts.at_rparen()? {
        if ts.test_group(&ENTRY)? {
            entries.push(read_log_entry(ts)?);
        } else {
            ts.skip_group()?;
        }
    }
    ts.expect_rparen()?;
    Ok(entries)
}
