// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Device and net extraction.
//!
//! Device extractors recognize devices on registered layers and place them
//! into the internal layout as instances of abstract cells carrying the
//! terminal geometry. The net extractor then turns the cluster graph into
//! circuits, nets, pins and subcircuits and hooks up device terminals.

use crate::clusters::{HierClusters, TerminalShapes};
use crate::connectivity::Connectivity;
use crate::geom::{CplxTrans, Geometry, Point};
use crate::layout::{CellIndex, Instance, Layout, PropValue, Shape};
use crate::log::{LogEntryData, Severity};
use crate::netlist::{
    Circuit, Device, DeviceAbstract, DeviceAbstractId, DeviceClass, DeviceClassId, DeviceId, Net, Netlist,
    SubCircuit,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Property key carrying the device id on device instances.
pub const DEVICE_ID_KEY: &str = "DEVICE_ID";

/// Everything a device extractor may touch.
pub struct DeviceExtractionContext<'a> {
    layout: &'a mut Layout,
    netlist: &'a mut Netlist,
    layers: &'a BTreeMap<String, u32>,
    terminal_shapes: &'a mut BTreeMap<CellIndex, TerminalShapes>,
    device_scaling: f64,
    abstracts: HashMap<(DeviceClassId, Vec<Vec<(u32, Geometry)>>), DeviceAbstractId>,
}

impl<'a> DeviceExtractionContext<'a> {
    pub fn new(
        layout: &'a mut Layout,
        netlist: &'a mut Netlist,
        layers: &'a BTreeMap<String, u32>,
        terminal_shapes: &'a mut BTreeMap<CellIndex, TerminalShapes>,
        device_scaling: f64,
    ) -> Self {
        Self { layout, netlist, layers, terminal_shapes, device_scaling, abstracts: HashMap::new() }
    }

    pub fn layout(&self) -> &Layout {
        &*self.layout
    }

    pub fn netlist(&self) -> &Netlist {
        &*self.netlist
    }

    pub fn dbu(&self) -> f64 {
        self.layout.dbu
    }

    pub fn device_scaling(&self) -> f64 {
        self.device_scaling
    }

    /// Internal layer of a registered layer name.
    pub fn layer(&self, name: &str) -> Option<u32> {
        self.layers.get(name).copied()
    }

    /// Returns the class of that name, registering `class` if it is new.
    pub fn register_device_class(&mut self, class: DeviceClass) -> DeviceClassId {
        match self.netlist.device_class_by_name(&class.name) {
            Some(id) => id,
            None => self.netlist.add_device_class(class),
        }
    }

    /// Finds or creates the abstract for the given terminal geometry.
    /// Geometry is relative to the device origin; one entry per terminal.
    pub fn device_abstract(&mut self, class: DeviceClassId, terminals: Vec<Vec<(u32, Geometry)>>) -> DeviceAbstractId {
        let key = (class, terminals);
        if let Some(&id) = self.abstracts.get(&key) {
            return id;
        }
        let class_name = self.netlist.device_class(class).name.clone();
        let ci = self.layout.add_cell(&format!("D${}", class_name));
        let mut per_terminal: TerminalShapes = Vec::with_capacity(key.1.len());
        for shapes in &key.1 {
            let mut ids = Vec::new();
            for (l, g) in shapes {
                let idx = self.layout.cell_mut(ci).insert(*l, Shape::new(g.clone()));
                ids.push((*l, idx));
            }
            per_terminal.push(ids);
        }
        let n = per_terminal.len();
        self.terminal_shapes.insert(ci, per_terminal);
        let name = self.layout.cell_name(ci).to_string();
        let id = self.netlist.add_device_abstract(DeviceAbstract {
            name,
            class,
            cell_index: Some(ci),
            terminal_cluster_ids: (1..=n).collect(),
        });
        self.abstracts.insert(key, id);
        id
    }

    /// Creates a device in the circuit of `cell` and places its abstract there.
    pub fn place_device(
        &mut self,
        cell: CellIndex,
        abstract_id: DeviceAbstractId,
        origin: Point,
        params: Vec<f64>,
    ) -> DeviceId {
        let circuit = match self.netlist.circuit_by_cell(cell) {
            Some(c) => c,
            None => {
                let mut c = Circuit::new(self.layout.cell_name(cell));
                c.cell_index = Some(cell);
                self.netlist.add_circuit(c)
            }
        };
        let da = self.netlist.device_abstract(abstract_id).clone();
        let trans = CplxTrans::displacement(origin);
        let mut device = Device::new(da.class, params);
        device.abstract_id = Some(abstract_id);
        device.trans = trans;
        let id = self.netlist.circuit_mut(circuit).add_device(device);
        if let Some(ci) = da.cell_index {
            let prop_id = self
                .layout
                .properties
                .intern(vec![(PropValue::from(DEVICE_ID_KEY), PropValue::Int(id as i64))]);
            self.layout.cell_mut(cell).insert_instance(Instance { cell_index: ci, trans, prop_id });
        }
        id
    }
}

/// A device recognizer.
pub trait DeviceExtractor {
    fn name(&self) -> &str;

    /// Extracts devices. Returns diagnostics to be appended to the log.
    fn extract(&mut self, ctx: &mut DeviceExtractionContext<'_>) -> Vec<LogEntryData>;
}

/// Plate capacitors: every polygon on the seed layer becomes a `CAP`
/// device with terminal A on the top plate layer and B on the bottom plate
/// layer. Capacitance is `area * cap_per_area` with area in square microns.
#[derive(Debug, Clone)]
pub struct PlateCapacitorExtractor {
    pub class_name: String,
    pub seed: String,
    pub top: String,
    pub bottom: String,
    pub cap_per_area: f64,
}

impl DeviceExtractor for PlateCapacitorExtractor {
    fn name(&self) -> &str {
        &self.class_name
    }

    fn extract(&mut self, ctx: &mut DeviceExtractionContext<'_>) -> Vec<LogEntryData> {
        let mut log = Vec::new();
        let (Some(seed), Some(top), Some(bottom)) = (ctx.layer(&self.seed), ctx.layer(&self.top), ctx.layer(&self.bottom))
        else {
            log.push(
                LogEntryData::new(
                    Severity::Error,
                    format!("layers '{}', '{}' or '{}' are not registered", self.seed, self.top, self.bottom),
                )
                .with_category("device-extraction", "Device extraction"),
            );
            return log;
        };
        let Some(class) = DeviceClass::from_template("CAP", &self.class_name) else {
            return log;
        };
        let class = ctx.register_device_class(class);
        let c_index = ctx.netlist().device_class(class).parameter_id("C");
        let a_index = ctx.netlist().device_class(class).parameter_id("A");
        let p_index = ctx.netlist().device_class(class).parameter_id("P");

        let dbu = ctx.dbu() * ctx.device_scaling();
        let cells: Vec<CellIndex> = ctx.layout().cells().map(|(ci, _)| ci).collect();
        for ci in cells {
            let polys: Vec<_> = ctx
                .layout()
                .cell(ci)
                .shapes(seed)
                .iter()
                .filter_map(|s| s.geometry.as_polygon().cloned())
                .collect();
            for p in polys {
                let origin = p.bbox().lower_left();
                let rel = Geometry::Polygon(p.moved(Point::new(-origin.x, -origin.y)));
                let da = ctx.device_abstract(class, vec![vec![(top, rel.clone())], vec![(bottom, rel)]]);
                let mut params = ctx.netlist().device_class(class).default_parameters();
                let area = p.area() * dbu * dbu;
                if let Some(i) = c_index {
                    params[i] = area * self.cap_per_area;
                }
                if let Some(i) = a_index {
                    params[i] = area;
                }
                if let Some(i) = p_index {
                    params[i] = p.perimeter() * dbu;
                }
                ctx.place_device(ci, da, origin, params);
            }
        }
        log
    }
}

/// Options of net formation.
#[derive(Debug, Clone, Default)]
pub struct NetExtractionOptions {
    pub include_floating_subcircuits: bool,
}

/// Forms nets from the cluster graph.
pub trait NetExtractor {
    fn extract_nets(
        &mut self,
        layout: &Layout,
        clusters: &HierClusters,
        conn: &Connectivity,
        netlist: &mut Netlist,
    ) -> Vec<LogEntryData>;
}

/// One circuit per cell, one net per cluster.
#[derive(Debug, Clone, Default)]
pub struct HierNetExtractor {
    pub options: NetExtractionOptions,
}

impl HierNetExtractor {
    pub fn new(options: NetExtractionOptions) -> Self {
        Self { options }
    }

    fn net_name(layout: &Layout, clusters: &HierClusters, conn: &Connectivity, ci: CellIndex, id: usize) -> String {
        let Some(c) = clusters.clusters_per_cell(ci).cluster_by_id(id) else {
            return String::new();
        };
        let cell = layout.cell(ci);
        let mut labels = BTreeSet::new();
        for (&l, idx) in c.shapes() {
            for &i in idx {
                if let Some(t) = cell.shapes(l).get(i).and_then(|s| s.geometry.as_text()) {
                    labels.insert(t.string.clone());
                }
            }
        }
        if labels.is_empty() {
            for &g in c.global_nets() {
                if let Some(n) = conn.global_net_name(g) {
                    labels.insert(n.to_string());
                }
            }
        }
        labels.into_iter().collect::<Vec<_>>().join(",")
    }
}

impl NetExtractor for HierNetExtractor {
    fn extract_nets(
        &mut self,
        layout: &Layout,
        clusters: &HierClusters,
        conn: &Connectivity,
        netlist: &mut Netlist,
    ) -> Vec<LogEntryData> {
        let log = Vec::new();
        let device_cells = netlist.device_cells();
        let bboxes = layout.bboxes();
        let device_key = PropValue::from(DEVICE_ID_KEY);

        for ci in layout.bottom_up_order() {
            if device_cells.contains(&ci) {
                continue;
            }
            let cid = match netlist.circuit_by_cell(ci) {
                Some(c) => c,
                None => {
                    let mut c = Circuit::new(layout.cell_name(ci));
                    c.cell_index = Some(ci);
                    netlist.add_circuit(c)
                }
            };
            let cc = clusters.clusters_per_cell(ci);

            {
                let circuit = netlist.circuit_mut(cid);
                if !bboxes[ci].is_empty() {
                    circuit.boundary = Some(crate::geom::Polygon::from_rect(&bboxes[ci]));
                }
                for cl in cc.iter() {
                    let mut net = Net::new(Self::net_name(layout, clusters, conn, ci, cl.id()));
                    net.cluster_id = cl.id();
                    let name = net.name.clone();
                    let n = circuit.add_net(net);
                    if !clusters.is_root(ci, cl.id()) || !cl.global_nets().is_empty() {
                        let p = circuit.add_pin(name);
                        circuit.connect_pin(p, Some(n));
                    }
                }
            }

            for (ii, inst) in layout.cell(ci).instances().iter().enumerate() {
                if device_cells.contains(&inst.cell_index) {
                    let Some(da) = netlist.device_abstract_by_cell(inst.cell_index) else {
                        continue;
                    };
                    let Some(dev) = layout
                        .properties
                        .value(inst.prop_id, &device_key)
                        .and_then(|v| v.as_int())
                        .map(|v| v as usize)
                    else {
                        continue;
                    };
                    let tcids = netlist.device_abstract(da).terminal_cluster_ids.clone();
                    let circuit = netlist.circuit_mut(cid);
                    for (t, tc) in tcids.into_iter().enumerate() {
                        let pc = cc.find_cluster_with_connection(ii, tc);
                        let net = circuit.net_by_cluster_id(pc);
                        circuit.connect_device_terminal(dev, t, net);
                    }
                    continue;
                }

                let Some(child) = netlist.circuit_by_cell(inst.cell_index) else {
                    continue;
                };
                let mut pin_nets = Vec::new();
                {
                    let cc_child = netlist.circuit(child);
                    for p in 0..cc_child.pins().len() {
                        let child_cluster = cc_child
                            .net_for_pin(p)
                            .and_then(|n| cc_child.net(n))
                            .map(|n| n.cluster_id)
                            .unwrap_or(0);
                        let pc = cc.find_cluster_with_connection(ii, child_cluster);
                        pin_nets.push(netlist.circuit(cid).net_by_cluster_id(pc));
                    }
                }
                if !self.options.include_floating_subcircuits && pin_nets.iter().all(Option::is_none) {
                    clilog::debug!(
                        "dropping floating subcircuit of {} in {}",
                        layout.cell_name(inst.cell_index),
                        layout.cell_name(ci)
                    );
                    continue;
                }
                let circuit = netlist.circuit_mut(cid);
                let sc = circuit.add_subcircuit(SubCircuit::new(child, inst.trans));
                for (p, n) in pin_nets.into_iter().enumerate() {
                    circuit.connect_subcircuit_pin(sc, p, n);
                }
            }
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Rect, Text};
    use crate::layout::LayerInfo;

    fn registered(ly: &mut Layout, names: &[&str]) -> BTreeMap<String, u32> {
        names.iter().map(|n| (n.to_string(), ly.insert_layer(LayerInfo::named(*n)))).collect()
    }

    #[test]
    fn test_capacitor_extraction_shares_abstracts() {
        let mut ly = Layout::new(0.001);
        let top = ly.add_cell("TOP");
        let layers = registered(&mut ly, &["cap", "mt", "mb"]);
        let cap = layers["cap"];
        ly.cell_mut(top).insert(cap, Shape::new(Rect::new(0, 0, 2000, 1000)));
        ly.cell_mut(top).insert(cap, Shape::new(Rect::new(5000, 0, 7000, 1000)));
        let mut nl = Netlist::new();
        let mut ts = BTreeMap::new();
        let mut ex = PlateCapacitorExtractor {
            class_name: "MIM".into(),
            seed: "cap".into(),
            top: "mt".into(),
            bottom: "mb".into(),
            cap_per_area: 2e-15,
        };
        let log = {
            let mut ctx = DeviceExtractionContext::new(&mut ly, &mut nl, &layers, &mut ts, 1.0);
            ex.extract(&mut ctx)
        };
        assert!(log.is_empty());
        assert_eq!(nl.device_abstracts().len(), 1);
        let c = nl.circuit_by_cell(top).unwrap();
        assert_eq!(nl.circuit(c).devices().len(), 2);
        let d = &nl.circuit(c).devices()[1];
        assert!((d.params[0] - 4e-15).abs() < 1e-24);
        assert_eq!(d.trans.disp_point(), Point::new(5000, 0));
        assert_eq!(ly.cell(top).instances().len(), 2);
        assert_eq!(ts.len(), 1);
    }

    #[test]
    fn test_missing_layers_are_reported() {
        let mut ly = Layout::new(0.001);
        let layers = BTreeMap::new();
        let mut nl = Netlist::new();
        let mut ts = BTreeMap::new();
        let mut ex = PlateCapacitorExtractor {
            class_name: "MIM".into(),
            seed: "cap".into(),
            top: "mt".into(),
            bottom: "mb".into(),
            cap_per_area: 1.0,
        };
        let mut ctx = DeviceExtractionContext::new(&mut ly, &mut nl, &layers, &mut ts, 1.0);
        let log = ex.extract(&mut ctx);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].severity, Severity::Error);
    }

    #[test]
    fn test_hier_net_extraction() {
        let mut ly = Layout::new(0.001);
        let layers = registered(&mut ly, &["m1", "m2"]);
        let (m1, m2) = (layers["m1"], layers["m2"]);
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(m1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(sub).insert(m1, Shape::new(Text::new("A", Point::new(10, 10))));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(10000, 0))));
        ly.cell_mut(top).insert(m2, Shape::new(Rect::new(50, 50, 150, 60)));
        ly.cell_mut(top).insert(m2, Shape::new(Text::new("IN", Point::new(140, 55))));

        let mut conn = Connectivity::new();
        conn.connect_self(m1);
        conn.connect_self(m2);
        conn.connect(m1, m2);
        let hc = HierClusters::build(&ly, &conn, &BTreeMap::new(), 1);
        let mut nl = Netlist::new();
        let log = HierNetExtractor::default().extract_nets(&ly, &hc, &conn, &mut nl);
        assert!(log.is_empty());

        let sub_c = nl.circuit(nl.circuit_by_name("SUB").unwrap());
        assert_eq!(sub_c.num_nets(), 1);
        assert_eq!(sub_c.net(0).unwrap().name, "A");
        assert_eq!(sub_c.pins().len(), 1);

        let top_c = nl.circuit(nl.circuit_by_name("TOP").unwrap());
        assert_eq!(top_c.num_nets(), 1);
        assert_eq!(top_c.net(0).unwrap().name, "IN");
        assert!(top_c.pins().is_empty());
        // the second instance is floating and dropped
        assert_eq!(top_c.subcircuits().len(), 1);
        assert_eq!(top_c.subcircuits()[0].net_for_pin(0), Some(0));
    }

    #[test]
    fn test_floating_subcircuits_kept_on_request() {
        let mut ly = Layout::new(0.001);
        let layers = registered(&mut ly, &["m1"]);
        let m1 = layers["m1"];
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(m1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        let mut conn = Connectivity::new();
        conn.connect_self(m1);
        let hc = HierClusters::build(&ly, &conn, &BTreeMap::new(), 1);
        let mut nl = Netlist::new();
        let mut ex = HierNetExtractor::new(NetExtractionOptions { include_floating_subcircuits: true });
        ex.extract_nets(&ly, &hc, &conn, &mut nl);
        let top_c = nl.circuit(nl.circuit_by_name("TOP").unwrap());
        assert_eq!(top_c.subcircuits().len(), 1);
        assert_eq!(top_c.subcircuits()[0].net_for_pin(0), None);
    }
}
