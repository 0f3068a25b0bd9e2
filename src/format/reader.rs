// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! L2N reader.
//!
//! Reading rebuilds the internal layout, the cluster graph and the netlist.
//! Each net becomes one cluster of its circuit's cell. Device and subcircuit
//! instances are placed once a circuit is complete and their terminals and
//! pins are turned into cluster connections then.

use super::keys::*;
use super::tokens::{Token, TokenStream};
use super::{CircuitIds, FormatError, IdMaps, FORMAT_VERSION};
use crate::clusters::ClusterInstance;
use crate::extractor::DEVICE_ID_KEY;
use crate::geom::{CplxTrans, DPolygon, Geometry, Point, Polygon, Rect, Text};
use crate::l2n::LayoutToNetlist;
use crate::layout::{CellIndex, Instance, LayerInfo, PropValue, Shape};
use crate::log::{LogEntryData, Severity};
use crate::netlist::{
    Circuit, Device, DeviceAbstract, DeviceAbstractId, DeviceAbstractRef, DeviceClass, DeviceClassId, Net, NetId,
    Netlist, SubCircuit,
};
use std::collections::HashMap;

type Result<T> = std::result::Result<T, FormatError>;

/// An instance to place after its circuit has been read.
enum Placement {
    Device { cell: CellIndex, trans: CplxTrans, device: usize, terminals: Vec<(usize, NetId)>, clusters: Vec<usize> },
    SubCircuit { cell: CellIndex, trans: CplxTrans, pins: Vec<(usize, NetId)>, child: usize },
}

#[derive(Debug, Default)]
pub struct L2nReader {
    layers: HashMap<String, u32>,
    top: Option<String>,
}

impl L2nReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a complete dump into `l2n`, replacing its contents.
    pub fn read_l2n(&mut self, ts: &mut TokenStream<'_>, l2n: &mut LayoutToNetlist) -> Result<IdMaps> {
        let timer = clilog::stimer!("read L2N");
        l2n.clear_for_reading();
        let mut nl = Netlist::new();
        let ids = self.read_body(ts, Some(&mut *l2n), &mut nl, false)?;
        clilog::info!(
            "read {} circuits, {} nets and {} layers from {}",
            nl.num_circuits(),
            nl.num_nets(),
            self.layers.len(),
            ts.source()
        );
        l2n.netlist = Some(nl);
        clilog::finish!(timer);
        Ok(ids)
    }

    /// Reads body elements until the end of input, or until the ')' closing
    /// the enclosing group if `nested`. That ')' is not consumed.
    /// Without `l2n` geometry is parsed but dropped.
    pub fn read_body(
        &mut self,
        ts: &mut TokenStream<'_>,
        mut l2n: Option<&mut LayoutToNetlist>,
        nl: &mut Netlist,
        nested: bool,
    ) -> Result<IdMaps> {
        let mut ids = IdMaps::default();
        loop {
            if nested {
                if ts.at_rparen()? {
                    break;
                }
            } else if ts.at_end()? {
                break;
            }

            if ts.test_group(&VERSION)? {
                let v = ts.read_int()?;
                if v < 0 || v as u32 > FORMAT_VERSION {
                    return Err(FormatError::UnsupportedVersion(v.max(0) as u32));
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&DESCRIPTION)? {
                let d = ts.read_word()?;
                if let Some(l2n) = l2n.as_deref_mut() {
                    l2n.description = d;
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&GENERATOR)? {
                let g = ts.read_word()?;
                if let Some(l2n) = l2n.as_deref_mut() {
                    l2n.generator = g;
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&TOP)? {
                self.top = Some(ts.read_word()?);
                ts.expect_rparen()?;
            } else if ts.test_group(&UNIT)? {
                let dbu = ts.read_f64()?;
                if let Some(l2n) = l2n.as_deref_mut() {
                    l2n.ensure_layout(dbu);
                    if let Ok(mut ly) = l2n.internal_layout_mut() {
                        ly.dbu = dbu;
                    }
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&LAYER)? {
                let name = ts.read_word()?;
                let info = if ts.at_value_word()? {
                    let spec = ts.read_word()?;
                    spec.parse::<LayerInfo>().map_err(|e| ts.error(e))?
                } else {
                    LayerInfo::default()
                };
                if let Some(l2n) = l2n.as_deref_mut() {
                    l2n.ensure_layout(0.001);
                    let l = l2n.register_internal_layer(&name, info).map_err(|e| ts.error(e.to_string()))?;
                    self.layers.insert(name, l);
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&CONNECT)? {
                let a = ts.read_word()?;
                while !ts.at_rparen()? {
                    let b = ts.read_word()?;
                    if let Some(l2n) = l2n.as_deref_mut() {
                        let la = self.layer(ts, &a)?;
                        let lb = self.layer(ts, &b)?;
                        if la == lb {
                            l2n.conn.connect_self(la);
                        } else {
                            l2n.conn.connect(la, lb);
                        }
                    }
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&GLOBAL)? {
                let a = ts.read_word()?;
                while !ts.at_rparen()? {
                    let net = ts.read_word()?;
                    if let Some(l2n) = l2n.as_deref_mut() {
                        let la = self.layer(ts, &a)?;
                        l2n.conn.connect_global(la, &net);
                    }
                }
                ts.expect_rparen()?;
            } else if ts.test_group(&MESSAGE)? {
                let e = read_log_entry(ts)?;
                if let Some(l2n) = l2n.as_deref_mut() {
                    l2n.log_entry(e);
                }
            } else if ts.test_group(&CLASS)? {
                self.read_class(ts, nl)?;
            } else if ts.test_group(&DEVICE)? {
                self.read_abstract(ts, l2n.as_deref_mut(), nl)?;
            } else if ts.test_group(&CIRCUIT)? {
                let (c, cids) = self.read_circuit(ts, l2n.as_deref_mut(), nl)?;
                ids.circuits.insert(ids.circuits.len() + 1, c);
                ids.per_circuit.insert(c, cids);
            } else if ts.at_rparen()? {
                return Err(ts.error("Unexpected ')'"));
            } else {
                clilog::debug!("skipping unknown element in line {} of {}", ts.line(), ts.source());
                ts.skip_group()?;
            }
        }

        if let Some(l2n) = l2n {
            self.finish(l2n)?;
        }
        Ok(ids)
    }

    fn finish(&mut self, l2n: &mut LayoutToNetlist) -> Result<()> {
        let Some(idx) = l2n.layout_index else {
            return Ok(());
        };
        let top = {
            let mut s = l2n.store.borrow_mut();
            let layout = s.layout_mut(idx);
            match &self.top {
                Some(name) => Some(layout.cell_by_name(name).unwrap_or_else(|| layout.add_cell(name))),
                None => layout.top_cell(),
            }
        };
        if let Some(top) = top {
            l2n.store.borrow_mut().set_top_cell(idx, top);
        }
        l2n.clusters.update_roots();
        l2n.set_extracted();
        Ok(())
    }

    fn layer(&self, ts: &TokenStream<'_>, name: &str) -> Result<u32> {
        self.layers.get(name).copied().ok_or_else(|| ts.unknown("layer", name))
    }

    fn class_or_generic(nl: &mut Netlist, name: &str) -> DeviceClassId {
        match nl.device_class_by_name(name) {
            Some(c) => c,
            None => {
                clilog::debug!("synthesizing generic device class '{}'", name);
                nl.add_device_class(DeviceClass::generic(name))
            }
        }
    }

    /// `class(name template? param(name primary default)* terminal(name)*)`
    fn read_class(&mut self, ts: &mut TokenStream<'_>, nl: &mut Netlist) -> Result<()> {
        let name = ts.read_word()?;
        let mut dc = if ts.at_value_word()? {
            let template = ts.read_word()?;
            DeviceClass::from_template(&template, &name).unwrap_or_else(|| DeviceClass::generic(&name))
        } else {
            DeviceClass::generic(&name)
        };
        while !ts.at_rparen()? {
            if ts.test_group(&PARAM)? {
                let pname = ts.read_word()?;
                let primary = ts.read_int()? != 0;
                let default = ts.read_f64()?;
                ts.expect_rparen()?;
                let i = dc.ensure_parameter(&pname, primary, default);
                dc.parameters[i].primary = primary;
                dc.parameters[i].default = default;
            } else if ts.test_group(&TERMINAL)? {
                let tname = ts.read_word()?;
                ts.expect_rparen()?;
                dc.ensure_terminal(&tname);
            } else {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;
        match nl.device_class_by_name(&name) {
            Some(id) => *nl.device_class_mut(id) = dc,
            None => {
                nl.add_device_class(dc);
            }
        }
        Ok(())
    }

    /// Layer name of a shape. Without a layout all names map to 0.
    fn shape_layer(&self, ts: &mut TokenStream<'_>, with_layers: bool) -> Result<u32> {
        let name = ts.read_word()?;
        if with_layers {
            self.layer(ts, &name)
        } else {
            Ok(0)
        }
    }

    /// Reads one shape group if one is next.
    fn read_shape(&self, ts: &mut TokenStream<'_>, reference: &mut Point, with_layers: bool) -> Result<Option<(u32, Geometry)>> {
        let shape = if ts.test_group(&RECT)? {
            let l = self.shape_layer(ts, with_layers)?;
            let a = ts.read_rel_point(reference)?;
            let b = ts.read_rel_point(reference)?;
            (l, Geometry::from(Rect::new(a.x, a.y, b.x, b.y)))
        } else if ts.test_group(&POLYGON)? {
            let l = self.shape_layer(ts, with_layers)?;
            let mut pts = Vec::new();
            while !ts.at_rparen()? {
                pts.push(ts.read_rel_point(reference)?);
            }
            (l, Geometry::from(Polygon::new(pts)))
        } else if ts.test_group(&TEXT)? {
            let l = self.shape_layer(ts, with_layers)?;
            let s = ts.read_word()?;
            let p = ts.read_rel_point(reference)?;
            (l, Geometry::from(Text::new(s, p)))
        } else {
            return Ok(None);
        };
        ts.expect_rparen()?;
        Ok(Some(shape))
    }

    fn insert_shape(l2n: &LayoutToNetlist, ts: &TokenStream<'_>, cell: CellIndex, layer: u32, g: Geometry) -> Result<usize> {
        let mut ly = l2n.internal_layout_mut().map_err(|e| ts.error(e.to_string()))?;
        Ok(ly.cell_mut(cell).insert(layer, Shape::new(g)))
    }

    fn add_cell(l2n: &LayoutToNetlist, ts: &TokenStream<'_>, name: &str) -> Result<CellIndex> {
        let mut ly = l2n.internal_layout_mut().map_err(|e| ts.error(e.to_string()))?;
        Ok(ly.add_cell(name))
    }

    /// Top-level `device(name class terminal(name shapes...)*)`.
    fn read_abstract(&mut self, ts: &mut TokenStream<'_>, mut l2n: Option<&mut LayoutToNetlist>, nl: &mut Netlist) -> Result<()> {
        let name = ts.read_word()?;
        let class_name = ts.read_word()?;
        let class = Self::class_or_generic(nl, &class_name);
        let cell = match l2n.as_deref_mut() {
            Some(l2n) => {
                l2n.ensure_layout(0.001);
                Some(Self::add_cell(l2n, ts, &name)?)
            }
            None => None,
        };
        let mut terminal_shapes: Vec<Vec<(u32, usize)>> = Vec::new();
        while !ts.at_rparen()? {
            if ts.test_group(&TERMINAL)? {
                let tname = ts.read_word()?;
                let t = nl.device_class_mut(class).ensure_terminal(&tname);
                if terminal_shapes.len() <= t {
                    terminal_shapes.resize(t + 1, Vec::new());
                }
                let mut reference = Point::new(0, 0);
                while !ts.at_rparen()? {
                    match self.read_shape(ts, &mut reference, l2n.is_some())? {
                        Some((l, g)) => {
                            if let (Some(l2n), Some(cell)) = (l2n.as_deref(), cell) {
                                let i = Self::insert_shape(l2n, ts, cell, l, g)?;
                                terminal_shapes[t].push((l, i));
                            }
                        }
                        None => ts.skip_group()?,
                    }
                }
                ts.expect_rparen()?;
            } else {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;

        let n = nl.device_class(class).terminals.len().max(terminal_shapes.len());
        terminal_shapes.resize(n, Vec::new());
        if let (Some(l2n), Some(cell)) = (l2n, cell) {
            let cc = l2n.clusters.clusters_per_cell_mut(cell);
            for shapes in &terminal_shapes {
                let id = cc.insert_dummy();
                if let Some(cl) = cc.cluster_by_id_mut(id) {
                    for &(l, i) in shapes {
                        cl.add_shape(l, i);
                    }
                }
            }
            l2n.terminal_shapes.insert(cell, terminal_shapes);
        }
        nl.add_device_abstract(DeviceAbstract {
            name,
            class,
            cell_index: cell,
            terminal_cluster_ids: (1..=n).collect(),
        });
        Ok(())
    }

    /// `location(x y) rotation(a) mirror scale(m)` in any order, all optional.
    /// Returns false if no transformation element is next.
    fn read_trans_element(ts: &mut TokenStream<'_>, t: &mut CplxTrans, prev: &mut Point) -> Result<bool> {
        if ts.test_group(&LOCATION)? {
            let x = ts.read_coord_or_star(prev.x)?;
            let y = ts.read_coord_or_star(prev.y)?;
            ts.expect_rparen()?;
            *prev = Point::new(x, y);
            t.disp = (x as f64, y as f64);
        } else if ts.test_group(&ROTATION)? {
            t.angle = ts.read_f64()?.rem_euclid(360.0);
            ts.expect_rparen()?;
        } else if ts.test_group(&SCALE)? {
            t.mag = ts.read_f64()?;
            ts.expect_rparen()?;
        } else if ts.test(&MIRROR)? {
            t.mirror = true;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn read_circuit(
        &mut self,
        ts: &mut TokenStream<'_>,
        mut l2n: Option<&mut LayoutToNetlist>,
        nl: &mut Netlist,
    ) -> Result<(usize, CircuitIds)> {
        let name = ts.read_word()?;
        let mut circuit = Circuit::new(name.clone());
        let mut ids = CircuitIds::default();
        let cell = match l2n.as_deref_mut() {
            Some(l2n) => {
                l2n.ensure_layout(0.001);
                Some(Self::add_cell(l2n, ts, &name)?)
            }
            None => None,
        };
        circuit.cell_index = cell;
        let mut placements = Vec::new();
        let mut prev = Point::new(0, 0);

        while !ts.at_rparen()? {
            if ts.test_group(&RECT)? {
                let l = ts.read_int()?;
                let b = ts.read_int()?;
                let r = ts.read_int()?;
                let t = ts.read_int()?;
                ts.expect_rparen()?;
                circuit.boundary = Some(Polygon::from_rect(&Rect::new(l, b, r, t)));
            } else if ts.test_group(&POLYGON)? {
                let mut pts = Vec::new();
                let mut last = Point::new(0, 0);
                while !ts.at_rparen()? {
                    let x = ts.read_coord_or_star(last.x)?;
                    let y = ts.read_coord_or_star(last.y)?;
                    last = Point::new(x, y);
                    pts.push(last);
                }
                ts.expect_rparen()?;
                circuit.boundary = Some(Polygon::new(pts));
            } else if ts.test_group(&PROPERTY)? {
                let k = read_prop_value(ts)?;
                let v = read_prop_value(ts)?;
                ts.expect_rparen()?;
                circuit.properties.push((k, v));
            } else if ts.test_group(&NET)? {
                let id = ts.read_id()?;
                let mut net = Net::new("");
                let mut shapes = Vec::new();
                let mut reference = Point::new(0, 0);
                while !ts.at_rparen()? {
                    if ts.test_group(&NAME)? {
                        net.name = ts.read_word()?;
                        ts.expect_rparen()?;
                    } else if ts.test_group(&PROPERTY)? {
                        let k = read_prop_value(ts)?;
                        let v = read_prop_value(ts)?;
                        ts.expect_rparen()?;
                        net.properties.push((k, v));
                    } else if let Some(s) = self.read_shape(ts, &mut reference, l2n.is_some())? {
                        shapes.push(s);
                    } else {
                        ts.skip_group()?;
                    }
                }
                ts.expect_rparen()?;
                if let (Some(l2n), Some(cell)) = (l2n.as_deref_mut(), cell) {
                    let mut indexes = Vec::with_capacity(shapes.len());
                    for (l, g) in shapes {
                        indexes.push((l, Self::insert_shape(l2n, ts, cell, l, g)?));
                    }
                    let cc = l2n.clusters.clusters_per_cell_mut(cell);
                    let cid = cc.insert_dummy();
                    if let Some(cl) = cc.cluster_by_id_mut(cid) {
                        for (l, i) in indexes {
                            cl.add_shape(l, i);
                        }
                    }
                    net.cluster_id = cid;
                }
                let n = circuit.add_net(net);
                ids.insert_net(id, n);
            } else if ts.test_group(&PIN)? {
                let net = if ts.at_value_word()? {
                    let id = ts.read_id()?;
                    Some(ids.nets.get(&id).copied().ok_or_else(|| ts.unknown("net id", &id.to_string()))?)
                } else {
                    None
                };
                let mut pname = String::new();
                while !ts.at_rparen()? {
                    if ts.test_group(&NAME)? {
                        pname = ts.read_word()?;
                        ts.expect_rparen()?;
                    } else {
                        ts.skip_group()?;
                    }
                }
                ts.expect_rparen()?;
                let p = circuit.add_pin(pname);
                circuit.connect_pin(p, net);
            } else if ts.test_group(&DEVICE)? {
                let (id, d, placement) = self.read_device(ts, nl, &ids, cell.is_some(), &mut prev)?;
                let did = circuit.add_device(d.0);
                for (t, n) in d.1 {
                    circuit.connect_device_terminal(did, t, Some(n));
                }
                ids.insert_device(id, did);
                if let Some(mut p) = placement {
                    if let Placement::Device { device, .. } = &mut p {
                        *device = did;
                    }
                    placements.push(p);
                }
            } else if ts.test_group(&CIRCUIT)? {
                let id = ts.read_id()?;
                let cname = ts.read_word()?;
                let child = nl.circuit_by_name(&cname).ok_or_else(|| ts.unknown("circuit", &cname))?;
                let mut sc = SubCircuit::new(child, CplxTrans::identity());
                let mut trans = CplxTrans::identity();
                let mut pins = Vec::new();
                while !ts.at_rparen()? {
                    if ts.test_group(&NAME)? {
                        sc.name = ts.read_word()?;
                        ts.expect_rparen()?;
                    } else if ts.test_group(&PIN)? {
                        let p = ts.read_id()?;
                        let nid = ts.read_id()?;
                        ts.expect_rparen()?;
                        let n = ids.nets.get(&nid).copied().ok_or_else(|| ts.unknown("net id", &nid.to_string()))?;
                        pins.push((p, n));
                    } else if ts.test_group(&PROPERTY)? {
                        let k = read_prop_value(ts)?;
                        let v = read_prop_value(ts)?;
                        ts.expect_rparen()?;
                        sc.properties.push((k, v));
                    } else if !Self::read_trans_element(ts, &mut trans, &mut prev)? {
                        ts.skip_group()?;
                    }
                }
                ts.expect_rparen()?;
                sc.trans = trans;
                let npins = nl.circuit(child).pins().len();
                if pins.iter().any(|&(p, _)| p >= npins) {
                    return Err(ts.error(format!("Pin index out of range for circuit {}", cname)));
                }
                let s = circuit.add_subcircuit(sc);
                for &(p, n) in &pins {
                    circuit.connect_subcircuit_pin(s, p, Some(n));
                }
                ids.insert_subcircuit(id, s);
                if let Some(child_cell) = nl.circuit(child).cell_index {
                    placements.push(Placement::SubCircuit { cell: child_cell, trans, pins, child });
                }
            } else {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;

        if let (Some(l2n), Some(cell)) = (l2n, cell) {
            Self::place(l2n, ts, nl, &circuit, cell, placements)?;
        }
        clilog::debug!("read circuit {} with {} nets", circuit.name, circuit.num_nets());
        Ok((nl.add_circuit(circuit), ids))
    }

    /// Reads `device(id abstract-or-class ...)` inside a circuit.
    #[allow(clippy::type_complexity)]
    fn read_device(
        &mut self,
        ts: &mut TokenStream<'_>,
        nl: &mut Netlist,
        ids: &CircuitIds,
        with_geometry: bool,
        prev: &mut Point,
    ) -> Result<(usize, (Device, Vec<(usize, NetId)>), Option<Placement>)> {
        let id = ts.read_id()?;
        let what = ts.read_word()?;
        let (class, abstract_id): (DeviceClassId, Option<DeviceAbstractId>) = match nl.device_abstract_by_name(&what) {
            Some(a) => (nl.device_abstract(a).class, Some(a)),
            None => (Self::class_or_generic(nl, &what), None),
        };
        let mut params: Vec<(usize, f64)> = Vec::new();
        let mut terminals = Vec::new();
        let mut reconnected: Vec<(usize, usize, usize)> = Vec::new();
        let mut others = Vec::new();
        let mut trans = CplxTrans::identity();
        let mut name = String::new();

        while !ts.at_rparen()? {
            if ts.test_group(&NAME)? {
                name = ts.read_word()?;
                ts.expect_rparen()?;
            } else if ts.test_group(&PARAM)? {
                let pname = ts.read_word()?;
                let v = ts.read_f64()?;
                ts.expect_rparen()?;
                let i = nl.device_class_mut(class).ensure_parameter(&pname, false, 0.0);
                params.push((i, v));
            } else if ts.test_group(&TERMINAL)? {
                let tname = ts.read_word()?;
                let net = if ts.at_rparen()? { None } else { Some(ts.read_id()?) };
                ts.expect_rparen()?;
                let t = nl.device_class_mut(class).ensure_terminal(&tname);
                if let Some(nid) = net {
                    let n = ids.nets.get(&nid).copied().ok_or_else(|| ts.unknown("net id", &nid.to_string()))?;
                    terminals.push((t, n));
                }
            } else if ts.test_group(&CONNECT)? {
                let ai = ts.read_id()?;
                let outer = ts.read_id()?;
                let inner = ts.read_id()?;
                ts.expect_rparen()?;
                reconnected.push((ai, outer, inner));
            } else if ts.test_group(&DEVICE)? {
                let aname = ts.read_word()?;
                let a = nl.device_abstract_by_name(&aname).ok_or_else(|| ts.unknown("device abstract", &aname))?;
                let mut t = CplxTrans::identity();
                let mut p = Point::new(0, 0);
                while !ts.at_rparen()? {
                    if !Self::read_trans_element(ts, &mut t, &mut p)? {
                        ts.skip_group()?;
                    }
                }
                ts.expect_rparen()?;
                others.push(DeviceAbstractRef { abstract_id: a, trans: t });
            } else if !Self::read_trans_element(ts, &mut trans, prev)? {
                ts.skip_group()?;
            }
        }
        ts.expect_rparen()?;

        let dc = nl.device_class(class);
        let mut d = Device::new(class, dc.default_parameters());
        for (i, v) in params {
            if i < d.params.len() {
                d.params[i] = v;
            }
        }
        d.name = name;
        d.abstract_id = abstract_id;
        d.trans = trans;
        d.other_abstracts = others;
        for (ai, outer, inner) in reconnected {
            d.reconnected_terminals.entry(outer).or_default().push((ai, inner));
        }
        let placement = match abstract_id {
            Some(a) if with_geometry => {
                let da = nl.device_abstract(a);
                da.cell_index.map(|cell| Placement::Device {
                    cell,
                    trans,
                    device: 0,
                    terminals: terminals.clone(),
                    clusters: da.terminal_cluster_ids.clone(),
                })
            }
            _ => None,
        };
        Ok((id, (d, terminals), placement))
    }

    /// Places device and subcircuit instances and connects clusters through them.
    fn place(
        l2n: &mut LayoutToNetlist,
        ts: &TokenStream<'_>,
        nl: &Netlist,
        circuit: &Circuit,
        cell: CellIndex,
        placements: Vec<Placement>,
    ) -> Result<()> {
        let net_cluster = |n: NetId| circuit.net(n).map(|n| n.cluster_id).unwrap_or(0);
        let mut connections = Vec::new();
        {
            let mut ly = l2n.internal_layout_mut().map_err(|e| ts.error(e.to_string()))?;
            for p in placements {
                match p {
                    Placement::Device { cell: dcell, trans, device, terminals, clusters } => {
                        let prop_id = ly
                            .properties
                            .intern(vec![(PropValue::from(DEVICE_ID_KEY), PropValue::Int(device as i64))]);
                        let mut inst = Instance::new(dcell, trans);
                        inst.prop_id = prop_id;
                        let ii = ly.cell_mut(cell).insert_instance(inst);
                        for (t, n) in terminals {
                            if let Some(&tc) = clusters.get(t) {
                                connections.push((net_cluster(n), ClusterInstance { cell: dcell, trans, inst_index: Some(ii), cluster_id: tc }));
                            }
                        }
                    }
                    Placement::SubCircuit { cell: ccell, trans, pins, child } => {
                        let ii = ly.cell_mut(cell).insert_instance(Instance::new(ccell, trans));
                        let cc = nl.circuit(child);
                        for (p, n) in pins {
                            let child_cluster =
                                cc.net_for_pin(p).and_then(|cn| cc.net(cn)).map(|cn| cn.cluster_id).unwrap_or(0);
                            if child_cluster != 0 {
                                connections.push((
                                    net_cluster(n),
                                    ClusterInstance { cell: ccell, trans, inst_index: Some(ii), cluster_id: child_cluster },
                                ));
                            }
                        }
                    }
                }
            }
        }
        let cc = l2n.clusters.clusters_per_cell_mut(cell);
        for (id, ci) in connections {
            if id != 0 {
                cc.add_connection(id, ci);
            }
        }
        Ok(())
    }
}

/// Property value: `nil`, integer, float, string or `( ... )` list.
pub(crate) fn read_prop_value(ts: &mut TokenStream<'_>) -> Result<PropValue> {
    match ts.next_token()? {
        Some(Token::LParen) => {
            let mut items = Vec::new();
            while !ts.at_rparen()? {
                items.push(read_prop_value(ts)?);
            }
            ts.expect_rparen()?;
            Ok(PropValue::List(items))
        }
        Some(Token::Quoted(s)) => Ok(PropValue::String(s)),
        Some(Token::Word(w)) => {
            if w == "nil" {
                Ok(PropValue::Nil)
            } else if let Ok(i) = w.parse::<i64>() {
                Ok(PropValue::Int(i))
            } else if let Ok(f) = w.parse::<f64>() {
                Ok(PropValue::Float(f))
            } else {
                Ok(PropValue::String(w))
            }
        }
        Some(Token::RParen) => Err(ts.error("Expected a value, got ')'")),
        None => Err(ts.eof_error()),
    }
}

/// Body of a log entry after its opening parenthesis, up to and including the closing one.
pub(crate) fn read_log_entry(ts: &mut TokenStream<'_>) -> Result<LogEntryData> {
    let severity = if ts.test(&INFO)? {
        Severity::Info
    } else if ts.test(&WARNING)? {
        Severity::Warning
    } else if ts.test(&ERROR)? {
        Severity::Error
    } else {
        Severity::NoSeverity
    };
    let mut e = LogEntryData::new(severity, "");
    while !ts.at_rparen()? {
        if ts.test_group(&DESCRIPTION)? {
            e.message = ts.read_word()?;
            ts.expect_rparen()?;
        } else if ts.test_group(&CELL)? {
            e.cell_name = ts.read_word()?;
            ts.expect_rparen()?;
        } else if ts.test_group(&CAT)? {
            e.category_name = ts.read_word()?;
            if !ts.at_rparen()? {
                e.category_description = ts.read_word()?;
            }
            ts.expect_rparen()?;
        } else if ts.test_group(&POLYGON)? {
            let s = ts.read_word()?;
            ts.expect_rparen()?;
            e.geometry = Some(s.parse::<DPolygon>().map_err(|m| ts.error(m))?);
        } else {
            ts.skip_group()?;
        }
    }
    ts.expect_rparen()?;
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{read_l2n, write_l2n};
    use crate::geom::Rect;
    use crate::layout::{Layout, ShapeIterator};
    use std::rc::Rc;

    /// SUB carries an m1 stripe labelled VDD, TOP places it twice and bridges on m2.
    fn extracted() -> LayoutToNetlist {
        let mut ly = Layout::new(0.001);
        ly.insert_layer(LayerInfo::new(1, 0));
        ly.insert_layer(LayerInfo::new(2, 0));
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        let s = ly.cell_mut(sub);
        s.insert(0, Shape::new(Rect::new(0, 0, 1000, 100)));
        s.insert(0, Shape::new(Text::new("VDD", Point::new(10, 50))));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(0, 2000))));
        ly.cell_mut(top).insert(1, Shape::new(Rect::new(400, 0, 500, 2100)));
        let mut l2n = LayoutToNetlist::from_iter(&ShapeIterator::new(Rc::new(ly), top)).unwrap();
        let m1 = l2n.make_polygon_layer(0, Some("m1")).unwrap();
        let m1t = l2n.make_text_layer(0, Some("m1_lbl")).unwrap();
        let m2 = l2n.make_polygon_layer(1, Some("m2")).unwrap();
        l2n.connect(&m1).unwrap();
        l2n.connect(&m2).unwrap();
        l2n.connect2(&m1, &m2).unwrap();
        l2n.connect2(&m1, &m1t).unwrap();
        l2n.extract_netlist().unwrap();
        l2n
    }

    const OVERLAP: &str = "#%l2n-klayout
version(1)
top(TOP)
unit(0.001)
layer(m1 '1/0')
layer(m2 '2/0')
connect(m1 m1 m2)
connect(m2 m2 m1)
circuit(TOP
  net(1 name(A)
    rect(m1 (0 0) (100 100))
    rect(m2 (-50 -50) (100 100))
  )
)
";

    #[test]
    fn test_round_trip_long_and_short() {
        let l2n = extracted();
        for short in [false, true] {
            let text = write_l2n(&l2n, short);
            assert_eq!(text, write_l2n(&l2n, short));
            let back = read_l2n(&text, "mem").unwrap();
            assert!(back.is_extracted());
            assert_eq!(write_l2n(&back, short), text);
            let nl = back.netlist().unwrap();
            assert_eq!(nl.num_circuits(), 2);
            let sub = nl.circuit(nl.circuit_by_name("SUB").unwrap());
            assert!(sub.net_by_name("VDD").is_some());
            assert_eq!(sub.pins().len(), 1);
            assert_eq!(back.layer_names(), vec!["m1", "m1_lbl", "m2"]);
        }
    }

    /// Merged m1+m2 area of the single net in TOP, with the net id.
    fn overlap_area(l2n: &LayoutToNetlist) -> (usize, f64) {
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        assert_eq!(nl.circuit(top).num_nets(), 1);
        let (net, _) = nl.circuit(top).nets().next().unwrap();
        let m1 = l2n.layer_by_name("m1").unwrap();
        let m2 = l2n.layer_by_name("m2").unwrap();
        let mut polys = l2n.shapes_of_net(top, net, &m1, true).unwrap();
        polys.extend(l2n.shapes_of_net(top, net, &m2, true).unwrap());
        (net, crate::l2n::merge_polygons(&polys).area)
    }

    #[test]
    fn test_overlapping_boxes_survive_save_and_load() {
        let mut ly = Layout::new(0.001);
        ly.insert_layer(LayerInfo::new(1, 0));
        ly.insert_layer(LayerInfo::new(2, 0));
        let top = ly.add_cell("TOP");
        ly.cell_mut(top).insert(0, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(top).insert(1, Shape::new(Rect::new(50, 50, 150, 150)));
        let mut l2n = LayoutToNetlist::from_iter(&ShapeIterator::new(Rc::new(ly), top)).unwrap();
        let m1 = l2n.make_polygon_layer(0, Some("m1")).unwrap();
        let m2 = l2n.make_polygon_layer(1, Some("m2")).unwrap();
        l2n.connect(&m1).unwrap();
        l2n.connect(&m2).unwrap();
        l2n.connect2(&m1, &m2).unwrap();
        l2n.extract_netlist().unwrap();
        let (_, area) = overlap_area(&l2n);
        assert_eq!(area, 17500.0);

        let dir = tempfile::tempdir().unwrap();
        for short in [false, true] {
            let path = dir.path().join(if short { "short.l2n" } else { "long.l2n" });
            l2n.save(&path, short).unwrap();
            let back = LayoutToNetlist::load(&path).unwrap();
            let (net, back_area) = overlap_area(&back);
            assert_eq!(back_area, area);
            let m2 = back.layer_by_name("m2").unwrap();
            let nl = back.netlist().unwrap();
            let top = nl.circuit_by_name("TOP").unwrap();
            let (m2_area, _) = back.net_area_and_perimeter(top, net, &m2).unwrap();
            assert!((m2_area - 0.01).abs() < 1e-12);
            assert_eq!(back.probe_net(&m2, Point::new(120, 120)).unwrap().unwrap().net, net);
            assert_eq!(write_l2n(&back, short), std::fs::read_to_string(&path).unwrap());
        }
    }

    #[test]
    fn test_hand_written_overlap_dump() {
        let l2n = read_l2n(OVERLAP, "mem").unwrap();
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        assert_eq!(nl.circuit(top).num_nets(), 1);
        let net = nl.circuit(top).net_by_name("A").unwrap();
        let m1 = l2n.layer_by_name("m1").unwrap();
        let m2 = l2n.layer_by_name("m2").unwrap();
        let mut polys = l2n.shapes_of_net(top, net, &m1, true).unwrap();
        polys.extend(l2n.shapes_of_net(top, net, &m2, true).unwrap());
        assert_eq!(polys.len(), 2);
        assert_eq!(crate::l2n::merge_polygons(&polys).area, 17500.0);
        let (area, _) = l2n.net_area_and_perimeter(top, net, &m2).unwrap();
        assert!((area - 0.01).abs() < 1e-12);
        let probed = l2n.probe_net(&m2, Point::new(120, 120)).unwrap().unwrap();
        assert_eq!(probed.net, net);
        assert!(l2n.connectivity().interacts(l2n.layer_of(&m1).unwrap(), l2n.layer_of(&m2).unwrap()));
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let text = OVERLAP.replace("circuit(TOP", "future(1 (2 3) x(y))\ncircuit(TOP shiny sparkle(1 2)");
        let l2n = read_l2n(&text, "mem").unwrap();
        assert_eq!(l2n.netlist().unwrap().num_nets(), 1);
    }

    #[test]
    fn test_devices_are_rebuilt() {
        let text = "#%l2n-klayout
unit(0.001)
layer(m1)
layer(m2)
class(CAP CAP)
device(D$CAP CAP
  terminal(A rect(m1 (0 0) (10 10)))
  terminal(B rect(m2 (0 0) (10 10)))
)
circuit(TOP
  net(1 name(X))
  net(2 name(Y))
  device(1 D$CAP location(100 0) param(C 2.5e-15) terminal(A 1) terminal(B 2))
)
";
        let l2n = read_l2n(text, "mem").unwrap();
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit(nl.circuit_by_name("TOP").unwrap());
        let d = &top.devices()[0];
        assert_eq!(d.params[0], 2.5e-15);
        assert_eq!(d.net_for_terminal(0), top.net_by_name("X"));
        assert_eq!(d.net_for_terminal(1), top.net_by_name("Y"));
        assert_eq!(d.trans.disp_point(), Point::new(100, 0));
        let ly = l2n.internal_layout().unwrap();
        let cell = top.cell_index.unwrap();
        assert_eq!(ly.cell(cell).instances().len(), 1);
        let x = top.net(top.net_by_name("X").unwrap()).unwrap();
        assert_eq!(l2n.clusters().clusters_per_cell(cell).connections_for_cluster(x.cluster_id).len(), 1);
    }

    #[test]
    fn test_version_too_high() {
        let e = read_l2n("version(2)", "mem").unwrap_err();
        assert!(matches!(e, FormatError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_unknown_circuit_reference() {
        let e = read_l2n("circuit(TOP circuit(1 NOPE))", "mem").unwrap_err();
        assert!(matches!(e, FormatError::Unknown { kind: "circuit", .. }));
        assert!(e.to_string().contains("NOPE"));
    }

    #[test]
    fn test_unknown_layer_and_eof() {
        let e = read_l2n("layer(m1) circuit(TOP net(1 rect(m9 (0 0) (1 1))))", "mem").unwrap_err();
        assert!(matches!(e, FormatError::Unknown { kind: "layer", .. }));
        let e = read_l2n("circuit(TOP net(1", "mem").unwrap_err();
        assert!(matches!(e, FormatError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_log_entry() {
        let mut ts = TokenStream::new("error description('bad thing') cell(TOP) cat(C 'a category') polygon('(0,0;0,1;1,1;1,0)'))", "t");
        let e = read_log_entry(&mut ts).unwrap();
        assert_eq!(e.severity, Severity::Error);
        assert_eq!(e.message, "bad thing");
        assert_eq!(e.cell_name, "TOP");
        assert_eq!(e.category_description, "a category");
        assert_eq!(e.geometry.unwrap().points.len(), 4);
    }
}
