// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Hierarchical net reconstruction.
//!
//! The builder copies the geometry of extracted nets into a target layout.
//! Depending on [`BuildMode`] the net hierarchy is flattened, cut at circuit
//! boundaries, or reproduced with one target cell per (cell, net) pair.

use crate::clusters::ClusterId;
use crate::geom::CplxTrans;
use crate::l2n::{L2nError, LayoutToNetlist, Result};
use crate::layout::{CellIndex, CellMapping, Instance, Layout, PropValue, PropertiesId, PropertySet, Shape};
use crate::netlist::{expanded_name, CircuitId, NetId, Netlist, SubCircuitId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// All geometry goes into the target cell.
    #[default]
    Flatten,
    /// Subcircuit geometry is left out. Device geometry is inlined.
    Disconnected,
    /// One target cell per contributing (cell, net) pair.
    SubcircuitCells,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetPropertyMode {
    #[default]
    None,
    NetName,
    NetProperties,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetNameFormat {
    /// The net name as a string.
    #[default]
    Name,
    /// A list of net name and circuit name.
    NameWithCircuit,
    /// An integer unique per net. See [`net_identity`].
    Identity,
}

#[derive(Debug, Clone)]
pub struct NetBuilderOptions {
    pub mode: BuildMode,
    /// Prefix of cells made for subcircuit nets. `None` inlines the geometry.
    pub circuit_cell_prefix: Option<String>,
    /// Prefix of cells made for device terminals. `None` inlines the geometry.
    pub device_cell_prefix: Option<String>,
    /// Prefix of one cell per built net. `None` builds into the mapped cell.
    pub net_cell_prefix: Option<String>,
    pub prop_mode: NetPropertyMode,
    pub netname_key: PropValue,
    pub name_format: NetNameFormat,
}

impl Default for NetBuilderOptions {
    fn default() -> Self {
        Self {
            mode: BuildMode::Flatten,
            circuit_cell_prefix: None,
            device_cell_prefix: None,
            net_cell_prefix: None,
            prop_mode: NetPropertyMode::None,
            netname_key: PropValue::from("NET"),
            name_format: NetNameFormat::Name,
        }
    }
}

/// Reuse key: (source cell, net-name property id, cluster id).
type ReuseKey = (CellIndex, PropertiesId, ClusterId);

/// Cached result for a reuse key. `None` means the pair yields no geometry.
#[derive(Debug, Clone, Copy)]
struct ReuseEntry {
    target: Option<CellIndex>,
    initialized: bool,
}

/// Identity of a circuit's own net. Always non-negative.
pub fn net_identity(circuit: CircuitId, net: NetId) -> i64 {
    ((circuit as i64) << 32) | net as i64
}

/// What the shapes of one built net are labelled with.
struct NetLabel<'n> {
    name: &'n str,
    /// Circuit named by [`NetNameFormat::NameWithCircuit`].
    circuit: CircuitId,
    identity: i64,
    /// Net whose user properties are attached.
    source: (CircuitId, NetId),
}

struct Work {
    target_cell: CellIndex,
    source_cell: CellIndex,
    cluster: ClusterId,
    trans: CplxTrans,
}

pub struct NetBuilder<'a> {
    l2n: &'a LayoutToNetlist,
    cmap: CellMapping,
    options: NetBuilderOptions,
    reuse: HashMap<ReuseKey, ReuseEntry>,
    /// Net cells by (parent cell, net identity).
    net_cells: HashMap<(CellIndex, i64), CellIndex>,
    /// Negative identities of nets emitted for open subcircuit pins,
    /// keyed by (calling circuit, subcircuit, net of the subcircuit's circuit).
    open_pin_ids: HashMap<(CircuitId, SubCircuitId, NetId), i64>,
}

impl<'a> NetBuilder<'a> {
    pub fn new(l2n: &'a LayoutToNetlist, cmap: CellMapping, options: NetBuilderOptions) -> Result<Self> {
        if !l2n.is_extracted() {
            return Err(L2nError::NotExtracted);
        }
        Ok(Self { l2n, cmap, options, reuse: HashMap::new(), net_cells: HashMap::new(), open_pin_ids: HashMap::new() })
    }

    pub fn options(&self) -> &NetBuilderOptions {
        &self.options
    }

    /// Replaces the options. Cached cells are dropped since their names depend on them.
    pub fn set_options(&mut self, options: NetBuilderOptions) {
        self.options = options;
        self.reuse.clear();
        self.net_cells.clear();
    }

    pub fn set_circuit_cell_prefix(&mut self, prefix: Option<&str>) {
        self.options.circuit_cell_prefix = prefix.map(str::to_string);
        self.reuse.clear();
    }

    pub fn set_device_cell_prefix(&mut self, prefix: Option<&str>) {
        self.options.device_cell_prefix = prefix.map(str::to_string);
        self.reuse.clear();
    }

    pub fn set_net_cell_prefix(&mut self, prefix: Option<&str>) {
        self.options.net_cell_prefix = prefix.map(str::to_string);
        self.net_cells.clear();
    }

    fn netlist(&self) -> Result<&'a Netlist> {
        self.l2n.netlist().ok_or(L2nError::NotExtracted)
    }

    /// Builds one net into `target_cell`.
    /// `lmap` maps target layers to internal layers.
    pub fn build_net(
        &mut self,
        target: &mut Layout,
        target_cell: CellIndex,
        lmap: &BTreeMap<u32, u32>,
        circuit: CircuitId,
        net: NetId,
    ) -> Result<()> {
        let nl = self.netlist()?;
        let c = nl.circuit(circuit);
        let Some(n) = c.net(net) else {
            return Ok(());
        };
        let Some(cell) = c.cell_index else {
            return Ok(());
        };
        let label = NetLabel { name: &n.name, circuit, identity: net_identity(circuit, net), source: (circuit, net) };
        let prop_id = self.net_properties(target, nl, &label);
        self.build_cluster(target, target_cell, lmap, cell, n.cluster_id, CplxTrans::identity(), prop_id)
    }

    pub fn build_all_nets(&mut self, target: &mut Layout, lmap: &BTreeMap<u32, u32>) -> Result<()> {
        self.build_nets(target, lmap, None)
    }

    /// Builds nets of all mapped circuits, or only the given subset.
    ///
    /// Without a subset, nets of non-top circuits that leave through a pin
    /// are taken from the calling circuit instead (except in disconnected
    /// mode). Pins left open by a subcircuit have their net emitted from
    /// the calling circuit under the name `<subcircuit>:<net>`.
    pub fn build_nets(
        &mut self,
        target: &mut Layout,
        lmap: &BTreeMap<u32, u32>,
        subset: Option<&[(CircuitId, NetId)]>,
    ) -> Result<()> {
        let timer = clilog::stimer!("build nets");
        let nl = self.netlist()?;
        let selected: Option<BTreeSet<(CircuitId, NetId)>> = subset.map(|s| s.iter().copied().collect());
        let hier = self.options.mode != BuildMode::Disconnected;
        let mut count = 0usize;

        for (cid, circuit) in nl.circuits() {
            let Some(target_parent) = circuit.cell_index.and_then(|ci| self.cmap.get(ci)) else {
                continue;
            };
            let Some(cell) = circuit.cell_index else {
                continue;
            };
            for (nid, net) in circuit.nets() {
                match &selected {
                    Some(s) if !s.contains(&(cid, nid)) => continue,
                    None if hier && !nl.is_top(cid) && !net.pins.is_empty() => continue,
                    _ => {}
                }
                let label = NetLabel { name: &net.name, circuit: cid, identity: net_identity(cid, nid), source: (cid, nid) };
                let prop_id = self.net_properties(target, nl, &label);
                let tc = self.net_cell(target, target_parent, label.identity, &net.name);
                if let Some(tc) = tc {
                    self.build_cluster(target, tc, lmap, cell, net.cluster_id, CplxTrans::identity(), prop_id)?;
                    count += 1;
                }
            }

            if selected.is_some() || !hier {
                continue;
            }
            for (sci, sc) in circuit.subcircuits().iter().enumerate() {
                let child = nl.circuit(sc.circuit);
                let Some(child_cell) = child.cell_index else {
                    continue;
                };
                for (nid, net) in child.nets() {
                    if net.pins.is_empty() || net.pins.iter().any(|&p| sc.net_for_pin(p).is_some()) {
                        continue;
                    }
                    let name = format!("{}:{}", expanded_name(&sc.name, sci), child.net_expanded_name(nid));
                    let label = NetLabel {
                        name: &name,
                        circuit: cid,
                        identity: self.open_pin_identity(cid, sci, nid),
                        source: (sc.circuit, nid),
                    };
                    let prop_id = self.net_properties(target, nl, &label);
                    let tc = self.net_cell(target, target_parent, label.identity, &name);
                    if let Some(tc) = tc {
                        self.build_cluster(target, tc, lmap, child_cell, net.cluster_id, sc.trans, prop_id)?;
                        count += 1;
                    }
                }
            }
        }
        clilog::info!("built {} nets", count);
        clilog::finish!(timer);
        Ok(())
    }

    /// Target cell for a net. With a net cell prefix a cell is created and
    /// placed once. Returns `None` if the net was built into its cell before.
    fn net_cell(
        &mut self,
        target: &mut Layout,
        parent: CellIndex,
        identity: i64,
        name: &str,
    ) -> Option<CellIndex> {
        let Some(prefix) = &self.options.net_cell_prefix else {
            return Some(parent);
        };
        if self.net_cells.contains_key(&(parent, identity)) {
            return None;
        }
        let nc = target.add_cell(&format!("{}{}", prefix, name));
        target.cell_mut(parent).insert_instance(Instance::new(nc, CplxTrans::identity()));
        self.net_cells.insert((parent, identity), nc);
        Some(nc)
    }

    fn open_pin_identity(&mut self, circuit: CircuitId, subcircuit: SubCircuitId, net: NetId) -> i64 {
        let next = -(self.open_pin_ids.len() as i64) - 1;
        *self.open_pin_ids.entry((circuit, subcircuit, net)).or_insert(next)
    }

    fn net_properties(&self, target: &mut Layout, nl: &Netlist, label: &NetLabel<'_>) -> PropertiesId {
        let name_prop = || {
            let value = match self.options.name_format {
                NetNameFormat::Name => PropValue::from(label.name),
                NetNameFormat::NameWithCircuit => PropValue::List(vec![
                    PropValue::from(label.name),
                    PropValue::from(nl.circuit(label.circuit).name.as_str()),
                ]),
                NetNameFormat::Identity => PropValue::Int(label.identity),
            };
            (self.options.netname_key.clone(), value)
        };
        let (sc, sn) = label.source;
        let user = || nl.circuit(sc).net(sn).map(|n| n.properties.clone()).unwrap_or_default();
        let set: PropertySet = match self.options.prop_mode {
            NetPropertyMode::None => return 0,
            NetPropertyMode::NetName => vec![name_prop()],
            NetPropertyMode::NetProperties => user(),
            NetPropertyMode::All => {
                let mut s = user();
                s.retain(|(k, _)| *k != self.options.netname_key);
                s.insert(0, name_prop());
                s
            }
        };
        target.properties.intern(set)
    }

    /// Copies a cluster and everything connected below it.
    #[allow(clippy::too_many_arguments)]
    fn build_cluster(
        &mut self,
        target: &mut Layout,
        target_cell: CellIndex,
        lmap: &BTreeMap<u32, u32>,
        cell: CellIndex,
        cluster: ClusterId,
        trans: CplxTrans,
        prop_id: PropertiesId,
    ) -> Result<()> {
        let l2n = self.l2n;
        let nl = self.netlist()?;
        let device_cells = nl.device_cells();
        let clusters = l2n.clusters();
        let layout = l2n.internal_layout()?;
        let internal_layers: Vec<u32> = lmap.values().copied().collect();

        let mut work = vec![Work { target_cell, source_cell: cell, cluster, trans }];
        while let Some(w) = work.pop() {
            let Some(cl) = clusters.clusters_per_cell(w.source_cell).cluster_by_id(w.cluster) else {
                continue;
            };
            let src = layout.cell(w.source_cell);
            for (&tl, &il) in lmap {
                for &i in cl.shapes_on(il) {
                    if let Some(s) = src.shapes(il).get(i) {
                        let g = s.geometry.transformed(&w.trans);
                        target.cell_mut(w.target_cell).insert(tl, Shape::with_props(g, prop_id));
                    }
                }
            }

            for conn in cl.connections() {
                let is_device = device_cells.contains(&conn.cell);
                let t = w.trans * conn.trans;
                let prefix = match (self.options.mode, is_device) {
                    (BuildMode::Flatten, _) => None,
                    (BuildMode::Disconnected, false) => continue,
                    (BuildMode::Disconnected, true) => None,
                    (BuildMode::SubcircuitCells, true) => self.options.device_cell_prefix.clone(),
                    (BuildMode::SubcircuitCells, false) => self.options.circuit_cell_prefix.clone(),
                };
                let Some(prefix) = prefix else {
                    work.push(Work { target_cell: w.target_cell, source_cell: conn.cell, cluster: conn.cluster_id, trans: t });
                    continue;
                };

                let key = (conn.cell, prop_id, conn.cluster_id);
                let entry = match self.reuse.get(&key) {
                    Some(e) => *e,
                    None => {
                        let e = if clusters.has_shapes_on(conn.cell, conn.cluster_id, &internal_layers) {
                            let name = self.sub_cell_name(nl, &layout, &prefix, conn.cell, conn.cluster_id);
                            ReuseEntry { target: Some(target.add_cell(&name)), initialized: false }
                        } else {
                            ReuseEntry { target: None, initialized: true }
                        };
                        self.reuse.insert(key, e);
                        e
                    }
                };
                let Some(sub) = entry.target else {
                    continue;
                };
                target.cell_mut(w.target_cell).insert_instance(Instance::new(sub, t));
                if !entry.initialized {
                    self.reuse.insert(key, ReuseEntry { target: Some(sub), initialized: true });
                    work.push(Work {
                        target_cell: sub,
                        source_cell: conn.cell,
                        cluster: conn.cluster_id,
                        trans: CplxTrans::identity(),
                    });
                }
            }
        }
        Ok(())
    }

    fn sub_cell_name(&self, nl: &Netlist, layout: &Layout, prefix: &str, cell: CellIndex, cluster: ClusterId) -> String {
        let net_name = nl.circuit_by_cell(cell).and_then(|c| {
            let c = nl.circuit(c);
            c.net_by_cluster_id(cluster).map(|n| c.net_expanded_name(n))
        });
        match net_name {
            Some(n) => format!("{}{}_{}", prefix, layout.cell_name(cell), n),
            None => format!("{}{}_{}", prefix, layout.cell_name(cell), cluster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Point, Rect, Text};
    use crate::layout::{LayerInfo, ShapeIterator};
    use crate::region::Region;
    use std::rc::Rc;

    /// TOP places SUB at the origin and at x=5000. The m2 bar touches the first SUB only.
    fn extracted() -> (LayoutToNetlist, Region, Region) {
        let mut ly = Layout::new(0.001);
        ly.insert_layer(LayerInfo::new(1, 0));
        ly.insert_layer(LayerInfo::new(2, 0));
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(0, Shape::new(Rect::new(0, 0, 1000, 100)));
        ly.cell_mut(sub).insert(0, Shape::new(Text::new("VDD", Point::new(10, 50))));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top)
            .insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(5000, 0))));
        ly.cell_mut(top).insert(1, Shape::new(Rect::new(400, 0, 500, 1000)));
        ly.cell_mut(top).insert(1, Shape::new(Text::new("OUT", Point::new(450, 900))));

        let mut l2n = LayoutToNetlist::from_iter(&ShapeIterator::new(Rc::new(ly), top)).unwrap();
        l2n.set_include_floating_subcircuits(true);
        let m1 = l2n.make_layer(0, Some("m1")).unwrap();
        let m2 = l2n.make_layer(1, Some("m2")).unwrap();
        l2n.connect(&m1).unwrap();
        l2n.connect(&m2).unwrap();
        l2n.connect2(&m1, &m2).unwrap();
        l2n.extract_netlist().unwrap();
        (l2n, m1, m2)
    }

    fn target() -> (Layout, CellIndex, u32, u32) {
        let mut t = Layout::new(0.001);
        let m1 = t.insert_layer(LayerInfo::new(1, 0));
        let m2 = t.insert_layer(LayerInfo::new(2, 0));
        let top = t.add_cell("T");
        (t, top, m1, m2)
    }

    fn top_mapping(l2n: &LayoutToNetlist, ttop: CellIndex) -> CellMapping {
        let mut cm = CellMapping::new();
        cm.insert(l2n.internal_top_cell().unwrap(), ttop);
        cm
    }

    fn lmap(l2n: &LayoutToNetlist, m1: &Region, m2: &Region, t1: u32, t2: u32) -> BTreeMap<u32, u32> {
        BTreeMap::from([(t1, l2n.layer_of(m1).unwrap()), (t2, l2n.layer_of(m2).unwrap())])
    }

    fn top_net(l2n: &LayoutToNetlist) -> (CircuitId, NetId) {
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        (top, nl.circuit(top).net_by_name("OUT").unwrap())
    }

    #[test]
    fn test_flatten_single_net() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let (c, n) = top_net(&l2n);
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let mut b = NetBuilder::new(&l2n, CellMapping::new(), NetBuilderOptions::default()).unwrap();
        b.build_net(&mut t, ttop, &lm, c, n).unwrap();
        assert_eq!(t.cell(ttop).shapes(t1).len(), 2);
        assert_eq!(t.cell(ttop).shapes(t2).len(), 2);
        assert_eq!(t.num_cells(), 1);
    }

    #[test]
    fn test_disconnected_leaves_out_subcircuits() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let (c, n) = top_net(&l2n);
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions { mode: BuildMode::Disconnected, ..Default::default() };
        let mut b = NetBuilder::new(&l2n, CellMapping::new(), opts).unwrap();
        b.build_net(&mut t, ttop, &lm, c, n).unwrap();
        assert!(t.cell(ttop).shapes(t1).is_empty());
        assert_eq!(t.cell(ttop).shapes(t2).len(), 2);
    }

    #[test]
    fn test_subcircuit_cells_are_reused() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions {
            mode: BuildMode::SubcircuitCells,
            circuit_cell_prefix: Some("C_".into()),
            ..Default::default()
        };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();
        let cells_after_first = t.num_cells();
        let sub = t.cell_by_name("C_SUB_VDD").unwrap();
        assert_eq!(t.cell(sub).shapes(t1).len(), 2);
        assert!(t.cell(ttop).instances().iter().any(|i| i.cell_index == sub));

        b.build_all_nets(&mut t, &lm).unwrap();
        assert_eq!(t.num_cells(), cells_after_first);
    }

    #[test]
    fn test_changing_prefix_clears_reuse() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions {
            mode: BuildMode::SubcircuitCells,
            circuit_cell_prefix: Some("C_".into()),
            ..Default::default()
        };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();
        b.set_circuit_cell_prefix(Some("X_"));
        b.build_all_nets(&mut t, &lm).unwrap();
        assert!(t.cell_by_name("X_SUB_VDD").is_some());
    }

    #[test]
    fn test_open_pins_are_emitted_from_caller() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions { prop_mode: NetPropertyMode::NetName, ..Default::default() };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();

        let names: BTreeSet<String> = t
            .cell(ttop)
            .shapes(t1)
            .iter()
            .filter_map(|s| t.properties.value(s.prop_id, &PropValue::from("NET")))
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        assert!(names.contains("OUT"));
        assert!(names.iter().any(|n| n.ends_with(":VDD")));
        let open = t
            .cell(ttop)
            .shapes(t1)
            .iter()
            .find(|s| {
                t.properties
                    .value(s.prop_id, &PropValue::from("NET"))
                    .and_then(|v| v.as_str())
                    .is_some_and(|v| v.ends_with(":VDD"))
            })
            .unwrap();
        assert!(open.geometry.bbox().left >= 5000);
    }

    #[test]
    fn test_net_cells_and_identity_names() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let (c, n) = top_net(&l2n);
        let opts = NetBuilderOptions {
            net_cell_prefix: Some("NET_".into()),
            prop_mode: NetPropertyMode::NetName,
            name_format: NetNameFormat::Identity,
            ..Default::default()
        };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_nets(&mut t, &lm, Some(&[(c, n)])).unwrap();
        let nc = t.cell_by_name("NET_OUT").unwrap();
        let s = &t.cell(nc).shapes(t2)[0];
        let id = t.properties.value(s.prop_id, &PropValue::from("NET")).and_then(|v| v.as_int());
        assert_eq!(id, Some(net_identity(c, n)));
        // already built: nothing is added
        b.build_nets(&mut t, &lm, Some(&[(c, n)])).unwrap();
        assert_eq!(t.cell(nc).shapes(t2).len(), 2);
    }

    fn values_at(t: &Layout, cell: CellIndex, layer: u32, key: &str, floating: bool) -> Vec<PropValue> {
        t.cell(cell)
            .shapes(layer)
            .iter()
            .filter(|s| (s.geometry.bbox().left >= 5000) == floating)
            .filter_map(|s| t.properties.value(s.prop_id, &PropValue::from(key)).cloned())
            .collect()
    }

    /// Sets `K` on SUB's VDD and on TOP's OUT.
    fn with_user_properties(l2n: &mut LayoutToNetlist) {
        let nl = l2n.netlist_mut().unwrap();
        for (circuit, net, value) in [("SUB", "VDD", "vdd"), ("TOP", "OUT", "out")] {
            let c = nl.circuit_by_name(circuit).unwrap();
            let n = nl.circuit(c).net_by_name(net).unwrap();
            let net = nl.circuit_mut(c).net_mut(n).unwrap();
            net.properties.push((PropValue::from("K"), PropValue::from(value)));
        }
    }

    #[test]
    fn test_open_pin_nets_have_own_identity() {
        let (l2n, m1, m2) = extracted();
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let (c, n) = top_net(&l2n);
        let opts = NetBuilderOptions {
            prop_mode: NetPropertyMode::NetName,
            name_format: NetNameFormat::Identity,
            ..Default::default()
        };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();

        let out: BTreeSet<i64> = values_at(&t, ttop, t2, "NET", false).iter().filter_map(|v| v.as_int()).collect();
        let open: BTreeSet<i64> = values_at(&t, ttop, t1, "NET", true).iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(out, BTreeSet::from([net_identity(c, n)]));
        assert_eq!(open.len(), 1);
        assert!(open.iter().all(|&id| id < 0));

        // stable across builds
        b.build_all_nets(&mut t, &lm).unwrap();
        let again: BTreeSet<i64> = values_at(&t, ttop, t1, "NET", true).iter().filter_map(|v| v.as_int()).collect();
        assert_eq!(again, open);
    }

    #[test]
    fn test_net_properties_come_from_the_built_net() {
        let (mut l2n, m1, m2) = extracted();
        with_user_properties(&mut l2n);
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions { prop_mode: NetPropertyMode::NetProperties, ..Default::default() };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();

        let open = values_at(&t, ttop, t1, "K", true);
        assert!(!open.is_empty());
        assert!(open.iter().all(|v| v.as_str() == Some("vdd")));
        let out = values_at(&t, ttop, t2, "K", false);
        assert!(!out.is_empty());
        assert!(out.iter().all(|v| v.as_str() == Some("out")));
        assert!(values_at(&t, ttop, t1, "NET", true).is_empty());
    }

    #[test]
    fn test_all_properties_combine_name_and_user_values() {
        let (mut l2n, m1, m2) = extracted();
        with_user_properties(&mut l2n);
        let (mut t, ttop, t1, t2) = target();
        let lm = lmap(&l2n, &m1, &m2, t1, t2);
        let opts = NetBuilderOptions { prop_mode: NetPropertyMode::All, ..Default::default() };
        let mut b = NetBuilder::new(&l2n, top_mapping(&l2n, ttop), opts).unwrap();
        b.build_all_nets(&mut t, &lm).unwrap();

        let open_names = values_at(&t, ttop, t1, "NET", true);
        assert!(!open_names.is_empty());
        assert!(open_names.iter().all(|v| v.as_str().is_some_and(|n| n.ends_with(":VDD"))));
        assert!(values_at(&t, ttop, t1, "K", true).iter().all(|v| v.as_str() == Some("vdd")));

        assert!(values_at(&t, ttop, t2, "NET", false).iter().all(|v| v.as_str() == Some("OUT")));
        assert!(values_at(&t, ttop, t2, "K", false).iter().all(|v| v.as_str() == Some("out")));
    }

    #[test]
    fn test_requires_extraction() {
        let l2n = LayoutToNetlist::flat("TOP", 0.001);
        assert!(matches!(
            NetBuilder::new(&l2n, CellMapping::new(), NetBuilderOptions::default()),
            Err(L2nError::NotExtracted)
        ));
    }
}
