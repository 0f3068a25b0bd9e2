// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Hierarchical shape clustering.
//!
//! Per cell, shapes on connected layers that touch form local clusters.
//! Clusters of child instances are attached to parent clusters when they
//! touch parent shapes, touch clusters of other instances, or share a
//! global net. The result is a graph keyed by (cell, cluster id) with
//! [`ClusterInstance`] edges pointing down the hierarchy.
//!
//! Cluster ids start at 1 within each cell; 0 means "no cluster".

use crate::connectivity::Connectivity;
use crate::geom::{CplxTrans, Geometry, Rect};
use crate::layout::{CellIndex, Layout};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub type ClusterId = usize;

/// A connection from a parent cluster down to a cluster of a child cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInstance {
    pub cell: CellIndex,
    pub trans: CplxTrans,
    /// Index of the instance in the parent cell. `None` for synthetic links.
    pub inst_index: Option<usize>,
    pub cluster_id: ClusterId,
}

#[derive(Debug, Clone, Default)]
pub struct LocalCluster {
    id: ClusterId,
    shapes: BTreeMap<u32, Vec<usize>>,
    global_nets: BTreeSet<usize>,
    connections: Vec<ClusterInstance>,
    joined: bool,
}

impl LocalCluster {
    pub fn id(&self) -> ClusterId {
        self.id
    }

    /// Shape indexes per layer, in the owning cell.
    pub fn shapes(&self) -> &BTreeMap<u32, Vec<usize>> {
        &self.shapes
    }

    pub fn shapes_on(&self, layer: u32) -> &[usize] {
        self.shapes.get(&layer).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn global_nets(&self) -> &BTreeSet<usize> {
        &self.global_nets
    }

    pub fn connections(&self) -> &[ClusterInstance] {
        &self.connections
    }

    pub fn has_local_shapes(&self) -> bool {
        self.shapes.values().any(|v| !v.is_empty())
    }

    pub fn add_shape(&mut self, layer: u32, shape_index: usize) {
        self.shapes.entry(layer).or_default().push(shape_index);
    }
}

/// The clusters of one cell.
#[derive(Debug, Clone, Default)]
pub struct ConnectedClusters {
    clusters: Vec<LocalCluster>,
    /// (instance index, child cluster) → parent cluster
    up_links: HashMap<(usize, ClusterId), ClusterId>,
}

impl ConnectedClusters {
    pub fn cluster_by_id(&self, id: ClusterId) -> Option<&LocalCluster> {
        if id == 0 {
            return None;
        }
        self.clusters.get(id - 1).filter(|c| !c.joined)
    }

    pub fn cluster_by_id_mut(&mut self, id: ClusterId) -> Option<&mut LocalCluster> {
        if id == 0 {
            return None;
        }
        self.clusters.get_mut(id - 1).filter(|c| !c.joined)
    }

    /// Live clusters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &LocalCluster> {
        self.clusters.iter().filter(|c| !c.joined)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a cluster without shapes and returns its id.
    pub fn insert_dummy(&mut self) -> ClusterId {
        let id = self.clusters.len() + 1;
        self.clusters.push(LocalCluster { id, ..Default::default() });
        id
    }

    pub fn connections_for_cluster(&self, id: ClusterId) -> &[ClusterInstance] {
        self.cluster_by_id(id).map(|c| c.connections()).unwrap_or(&[])
    }

    pub fn add_connection(&mut self, id: ClusterId, ci: ClusterInstance) {
        if let Some(inst) = ci.inst_index {
            self.up_links.insert((inst, ci.cluster_id), id);
        }
        if let Some(c) = self.cluster_by_id_mut(id) {
            if !c.connections.contains(&ci) {
                c.connections.push(ci);
            }
        }
    }

    /// Parent cluster attached to the given child cluster of an instance, or 0.
    pub fn find_cluster_with_connection(&self, inst_index: usize, child: ClusterId) -> ClusterId {
        self.up_links.get(&(inst_index, child)).copied().unwrap_or(0)
    }

    /// Moves everything of `with` into `id`. `with` ceases to exist.
    pub fn join_cluster_with(&mut self, id: ClusterId, with: ClusterId) {
        if id == with || self.cluster_by_id(id).is_none() {
            return;
        }
        let Some(other) = self.cluster_by_id_mut(with) else {
            return;
        };
        let shapes = std::mem::take(&mut other.shapes);
        let globals = std::mem::take(&mut other.global_nets);
        let conns = std::mem::take(&mut other.connections);
        other.joined = true;

        for v in self.up_links.values_mut() {
            if *v == with {
                *v = id;
            }
        }
        if let Some(target) = self.cluster_by_id_mut(id) {
            for (l, idx) in shapes {
                target.shapes.entry(l).or_default().extend(idx);
            }
            target.global_nets.extend(globals);
            for c in conns {
                if !target.connections.contains(&c) {
                    target.connections.push(c);
                }
            }
        }
    }

    fn redirect_child(&mut self, cell: CellIndex, from: ClusterId, to: ClusterId) {
        for c in self.clusters.iter_mut().filter(|c| !c.joined) {
            let mut changed = false;
            for conn in c.connections.iter_mut() {
                if conn.cell == cell && conn.cluster_id == from {
                    conn.cluster_id = to;
                    changed = true;
                }
            }
            if changed {
                let mut dedup: Vec<ClusterInstance> = Vec::with_capacity(c.connections.len());
                for conn in c.connections.drain(..) {
                    if !dedup.contains(&conn) {
                        dedup.push(conn);
                    }
                }
                c.connections = dedup;
            }
        }
        let moved: Vec<((usize, ClusterId), ClusterId)> = self
            .up_links
            .iter()
            .filter(|((_, child), _)| *child == from)
            .map(|(&k, &v)| (k, v))
            .collect();
        for ((inst, _), parent) in moved {
            if self.clusters.get(parent.wrapping_sub(1)).and_then(|c| {
                c.connections.iter().find(|x| x.inst_index == Some(inst) && x.cell == cell)
            }).is_some()
            {
                self.up_links.remove(&(inst, from));
                self.up_links.insert((inst, to), parent);
            }
        }
    }
}

/// Terminal shapes of a device-abstract cell: per terminal, (layer, shape index) pairs.
pub type TerminalShapes = Vec<Vec<(u32, usize)>>;

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Pairs of items whose boxes touch, found by a sweep over the left edges.
fn touching_pairs(boxes: &[Rect]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..boxes.len()).filter(|&i| !boxes[i].is_empty()).collect();
    order.sort_by_key(|&i| boxes[i].left);
    let mut pairs = Vec::new();
    for (k, &i) in order.iter().enumerate() {
        for &j in &order[k + 1..] {
            if boxes[j].left > boxes[i].right {
                break;
            }
            if boxes[i].touches(&boxes[j]) {
                pairs.push((i.min(j), i.max(j)));
            }
        }
    }
    pairs
}

/// Local shape groups of one cell before hierarchy integration.
struct LocalGroups {
    groups: Vec<Vec<(u32, usize)>>,
    globals: Vec<BTreeSet<usize>>,
}

fn cluster_local_shapes(layout: &Layout, ci: CellIndex, conn: &Connectivity) -> LocalGroups {
    let cell = layout.cell(ci);
    let mut nodes: Vec<(u32, usize, &Geometry)> = Vec::new();
    for l in conn.layers() {
        for (i, s) in cell.shapes(l).iter().enumerate() {
            nodes.push((l, i, &s.geometry));
        }
    }
    let boxes: Vec<Rect> = nodes.iter().map(|(_, _, g)| g.bbox()).collect();
    let mut ds = DisjointSet::new(nodes.len());
    for (a, b) in touching_pairs(&boxes) {
        let (la, _, ga) = nodes[a];
        let (lb, _, gb) = nodes[b];
        if conn.interacts(la, lb) && ga.interacts(gb) {
            ds.union(a, b);
        }
    }
    let mut first_of_global: HashMap<usize, usize> = HashMap::new();
    for (i, (l, _, _)) in nodes.iter().enumerate() {
        for g in conn.global_nets_of(*l) {
            match first_of_global.get(&g) {
                Some(&f) => ds.union(f, i),
                None => {
                    first_of_global.insert(g, i);
                }
            }
        }
    }

    let mut by_root: BTreeMap<usize, usize> = BTreeMap::new();
    let mut out = LocalGroups { groups: Vec::new(), globals: Vec::new() };
    for (i, (l, s, _)) in nodes.iter().enumerate() {
        let r = ds.find(i);
        let g = *by_root.entry(r).or_insert_with(|| {
            out.groups.push(Vec::new());
            out.globals.push(BTreeSet::new());
            out.groups.len() - 1
        });
        out.groups[g].push((*l, *s));
        out.globals[g].extend(conn.global_nets_of(*l));
    }
    out
}

/// Flattened cluster geometry in the coordinates of the cluster's cell.
#[derive(Debug, Default)]
struct FlatCluster {
    shapes: Vec<(u32, Geometry)>,
    bbox: Rect,
}

/// The cluster graph of a whole layout.
#[derive(Debug, Clone, Default)]
pub struct HierClusters {
    per_cell: HashMap<CellIndex, ConnectedClusters>,
    /// (cell, cluster) pairs referenced by some parent cluster
    non_roots: HashSet<(CellIndex, ClusterId)>,
}

impl HierClusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.per_cell.clear();
        self.non_roots.clear();
    }

    /// Builds clusters for every cell of the layout.
    ///
    /// `device_cells` lists cells whose clusters are predefined: one cluster
    /// per terminal, with ids `terminal + 1`.
    pub fn build(
        layout: &Layout,
        conn: &Connectivity,
        device_cells: &BTreeMap<CellIndex, TerminalShapes>,
        threads: usize,
    ) -> Self {
        let timer = clilog::stimer!("hierarchical clustering");
        let order = layout.bottom_up_order();
        let plain: Vec<CellIndex> = order.iter().copied().filter(|c| !device_cells.contains_key(c)).collect();

        let local = |ci: &CellIndex| (*ci, cluster_local_shapes(layout, *ci, conn));
        let mut locals: HashMap<CellIndex, LocalGroups> = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| plain.par_iter().map(local).collect()),
            Err(e) => {
                clilog::warn!("cannot build clustering thread pool ({}), running single-threaded", e);
                plain.iter().map(local).collect()
            }
        };

        let mut hc = HierClusters::new();
        let mut flat: HashMap<(CellIndex, ClusterId), FlatCluster> = HashMap::new();

        for ci in order {
            let mut cc = ConnectedClusters::default();
            if let Some(terminals) = device_cells.get(&ci) {
                for shapes in terminals {
                    let id = cc.insert_dummy();
                    if let Some(c) = cc.cluster_by_id_mut(id) {
                        for &(l, s) in shapes {
                            c.add_shape(l, s);
                        }
                    }
                }
            } else if let Some(groups) = locals.remove(&ci) {
                hc.integrate_cell(layout, conn, ci, groups, &mut cc, &flat);
            }
            for c in cc.iter() {
                let f = hc.flatten_one(layout, ci, c, &flat);
                flat.insert((ci, c.id), f);
            }
            hc.per_cell.insert(ci, cc);
        }
        hc.update_roots();
        clilog::finish!(timer);
        hc
    }

    fn flatten_one(
        &self,
        layout: &Layout,
        ci: CellIndex,
        c: &LocalCluster,
        flat: &HashMap<(CellIndex, ClusterId), FlatCluster>,
    ) -> FlatCluster {
        let cell = layout.cell(ci);
        let mut f = FlatCluster::default();
        for (&l, idx) in &c.shapes {
            for &i in idx {
                if let Some(s) = cell.shapes(l).get(i) {
                    f.bbox.add_rect(&s.geometry.bbox());
                    f.shapes.push((l, s.geometry.clone()));
                }
            }
        }
        for conn in &c.connections {
            if let Some(child) = flat.get(&(conn.cell, conn.cluster_id)) {
                for (l, g) in &child.shapes {
                    let t = g.transformed(&conn.trans);
                    f.bbox.add_rect(&t.bbox());
                    f.shapes.push((*l, t));
                }
            }
        }
        f
    }

    fn integrate_cell(
        &self,
        layout: &Layout,
        conn: &Connectivity,
        ci: CellIndex,
        local: LocalGroups,
        cc: &mut ConnectedClusters,
        flat: &HashMap<(CellIndex, ClusterId), FlatCluster>,
    ) {
        let cell = layout.cell(ci);

        // node list: local groups first, then child clusters
        struct ChildNode<'f> {
            inst: usize,
            cluster: ClusterId,
            flat: &'f FlatCluster,
            globals: BTreeSet<usize>,
        }
        let mut children: Vec<ChildNode> = Vec::new();
        for (ii, inst) in cell.instances().iter().enumerate() {
            if let Some(child_cc) = self.per_cell.get(&inst.cell_index) {
                for c in child_cc.iter() {
                    if let Some(f) = flat.get(&(inst.cell_index, c.id)) {
                        children.push(ChildNode { inst: ii, cluster: c.id, flat: f, globals: c.global_nets.clone() });
                    }
                }
            }
        }
        let n_local = local.groups.len();
        let n = n_local + children.len();

        let mut boxes: Vec<Rect> = Vec::with_capacity(n);
        for g in &local.groups {
            let mut r = Rect::empty();
            for &(l, s) in g {
                r.add_rect(&cell.shapes(l)[s].geometry.bbox());
            }
            boxes.push(r);
        }
        for c in &children {
            boxes.push(c.flat.bbox.transformed(&cell.instances()[c.inst].trans));
        }

        let node_shapes = |k: usize| -> Vec<(u32, Geometry)> {
            if k < n_local {
                local.groups[k]
                    .iter()
                    .map(|&(l, s)| (l, cell.shapes(l)[s].geometry.clone()))
                    .collect()
            } else {
                let c = &children[k - n_local];
                let t = cell.instances()[c.inst].trans;
                c.flat.shapes.iter().map(|(l, g)| (*l, g.transformed(&t))).collect()
            }
        };

        let mut ds = DisjointSet::new(n);
        for (a, b) in touching_pairs(&boxes) {
            if b < n_local {
                // local groups were already merged
                continue;
            }
            if a >= n_local && children[a - n_local].inst == children[b - n_local].inst {
                continue;
            }
            if ds.find(a) == ds.find(b) {
                continue;
            }
            let sa = node_shapes(a);
            let sb = node_shapes(b);
            let hit = sa.iter().any(|(la, ga)| {
                let ba = ga.bbox();
                sb.iter().any(|(lb, gb)| conn.interacts(*la, *lb) && ba.touches(&gb.bbox()) && ga.interacts(gb))
            });
            if hit {
                ds.union(a, b);
            }
        }

        let mut first_of_global: HashMap<usize, usize> = HashMap::new();
        for k in 0..n {
            let globals = if k < n_local { &local.globals[k] } else { &children[k - n_local].globals };
            for &g in globals {
                match first_of_global.get(&g) {
                    Some(&f) => ds.union(f, k),
                    None => {
                        first_of_global.insert(g, k);
                    }
                }
            }
        }

        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for k in 0..n {
            members.entry(ds.find(k)).or_default().push(k);
        }
        for (_, nodes) in members {
            let has_local = nodes.iter().any(|&k| k < n_local);
            let has_globals = nodes.iter().any(|&k| {
                if k < n_local { !local.globals[k].is_empty() } else { !children[k - n_local].globals.is_empty() }
            });
            if !has_local && nodes.len() < 2 && !has_globals {
                continue;
            }
            let id = cc.insert_dummy();
            for &k in &nodes {
                if k < n_local {
                    if let Some(c) = cc.cluster_by_id_mut(id) {
                        for &(l, s) in &local.groups[k] {
                            c.add_shape(l, s);
                        }
                        c.global_nets.extend(local.globals[k].iter().copied());
                    }
                } else {
                    let ch = &children[k - n_local];
                    let inst = &cell.instances()[ch.inst];
                    if let Some(c) = cc.cluster_by_id_mut(id) {
                        c.global_nets.extend(ch.globals.iter().copied());
                    }
                    cc.add_connection(
                        id,
                        ClusterInstance {
                            cell: inst.cell_index,
                            trans: inst.trans,
                            inst_index: Some(ch.inst),
                            cluster_id: ch.cluster,
                        },
                    );
                }
            }
        }
        clilog::debug!("cell {}: {} clusters", layout.cell_name(ci), cc.len());
    }

    pub fn has_cell(&self, ci: CellIndex) -> bool {
        self.per_cell.contains_key(&ci)
    }

    /// Clusters of a cell. Cells without clusters yield an empty set.
    pub fn clusters_per_cell(&self, ci: CellIndex) -> &ConnectedClusters {
        static EMPTY: std::sync::OnceLock<ConnectedClusters> = std::sync::OnceLock::new();
        self.per_cell.get(&ci).unwrap_or_else(|| EMPTY.get_or_init(ConnectedClusters::default))
    }

    pub fn clusters_per_cell_mut(&mut self, ci: CellIndex) -> &mut ConnectedClusters {
        self.per_cell.entry(ci).or_default()
    }

    /// True if no parent cluster refers to this cluster.
    pub fn is_root(&self, ci: CellIndex, id: ClusterId) -> bool {
        !self.non_roots.contains(&(ci, id))
    }

    /// Recomputes root flags from the connection edges.
    pub fn update_roots(&mut self) {
        self.non_roots.clear();
        for cc in self.per_cell.values() {
            for c in cc.iter() {
                for conn in &c.connections {
                    self.non_roots.insert((conn.cell, conn.cluster_id));
                }
            }
        }
    }

    /// Joins cluster `with` into `id` in cell `ci` and redirects parent references.
    pub fn join_cluster_with(&mut self, ci: CellIndex, id: ClusterId, with: ClusterId) {
        if id == with {
            return;
        }
        self.clusters_per_cell_mut(ci).join_cluster_with(id, with);
        for (&p, cc) in self.per_cell.iter_mut() {
            if p != ci {
                cc.redirect_child(ci, with, id);
            }
        }
        self.update_roots();
    }

    /// Adds a synthetic cluster in `parent` linked to a child cluster.
    pub fn link_to_parent(&mut self, parent: CellIndex, child: ClusterInstance) -> ClusterId {
        self.non_roots.insert((child.cell, child.cluster_id));
        let cc = self.clusters_per_cell_mut(parent);
        let id = cc.insert_dummy();
        cc.add_connection(id, child);
        id
    }

    /// Flattened shapes of a cluster, optionally restricted to one layer, in
    /// the coordinates of cell `ci` transformed by `trans`.
    pub fn cluster_shapes(
        &self,
        layout: &Layout,
        ci: CellIndex,
        id: ClusterId,
        layer: Option<u32>,
        recursive: bool,
    ) -> Vec<(u32, Geometry)> {
        let mut out = Vec::new();
        let mut stack = vec![(ci, id, CplxTrans::identity())];
        while let Some((c, cid, t)) = stack.pop() {
            let Some(cl) = self.clusters_per_cell(c).cluster_by_id(cid) else {
                continue;
            };
            let cell = layout.cell(c);
            for (&l, idx) in &cl.shapes {
                if layer.is_some_and(|x| x != l) {
                    continue;
                }
                for &i in idx {
                    if let Some(s) = cell.shapes(l).get(i) {
                        out.push((l, s.geometry.transformed(&t)));
                    }
                }
            }
            if recursive {
                for conn in &cl.connections {
                    stack.push((conn.cell, conn.cluster_id, t * conn.trans));
                }
            }
        }
        out
    }

    /// True if the cluster or any cluster below it carries shapes on one of the layers.
    pub fn has_shapes_on(&self, ci: CellIndex, id: ClusterId, layers: &[u32]) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![(ci, id)];
        while let Some((c, cid)) = stack.pop() {
            if !seen.insert((c, cid)) {
                continue;
            }
            let Some(cl) = self.clusters_per_cell(c).cluster_by_id(cid) else {
                continue;
            };
            if layers.iter().any(|l| !cl.shapes_on(*l).is_empty()) {
                return true;
            }
            stack.extend(cl.connections.iter().map(|x| (x.cell, x.cluster_id)));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Point, Rect, Text};
    use crate::layout::{Instance, LayerInfo, Shape};

    const M1: u32 = 0;
    const M2: u32 = 1;

    fn conn() -> Connectivity {
        let mut c = Connectivity::new();
        c.connect_self(M1);
        c.connect_self(M2);
        c.connect(M1, M2);
        c
    }

    fn layout_with_layers() -> Layout {
        let mut ly = Layout::new(0.001);
        ly.insert_layer(LayerInfo::named("m1"));
        ly.insert_layer(LayerInfo::named("m2"));
        ly
    }

    #[test]
    fn test_local_clusters() {
        let mut ly = layout_with_layers();
        let top = ly.add_cell("TOP");
        let c = ly.cell_mut(top);
        c.insert(M1, Shape::new(Rect::new(0, 0, 100, 100)));
        c.insert(M2, Shape::new(Rect::new(50, 50, 150, 150)));
        c.insert(M1, Shape::new(Rect::new(500, 0, 600, 100)));
        c.insert(M1, Shape::new(Text::new("A", Point::new(550, 50))));
        let hc = HierClusters::build(&ly, &conn(), &BTreeMap::new(), 2);
        let cc = hc.clusters_per_cell(top);
        assert_eq!(cc.len(), 2);
        let first = cc.cluster_by_id(1).unwrap();
        assert_eq!(first.shapes_on(M1).len(), 1);
        assert_eq!(first.shapes_on(M2).len(), 1);
        assert_eq!(cc.cluster_by_id(2).unwrap().shapes_on(M1).len(), 2);
    }

    #[test]
    fn test_child_clusters_connect_through_parent() {
        let mut ly = layout_with_layers();
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(M1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(1000, 0))));
        ly.cell_mut(top).insert(M2, Shape::new(Rect::new(50, 50, 1050, 80)));
        let hc = HierClusters::build(&ly, &conn(), &BTreeMap::new(), 1);
        let cc = hc.clusters_per_cell(top);
        assert_eq!(cc.len(), 1);
        let c = cc.cluster_by_id(1).unwrap();
        assert_eq!(c.connections().len(), 2);
        assert!(!hc.is_root(sub, 1));
        assert_eq!(cc.find_cluster_with_connection(1, 1), 1);
        assert_eq!(hc.cluster_shapes(&ly, top, 1, None, true).len(), 3);
    }

    #[test]
    fn test_lonely_child_cluster_stays_root() {
        let mut ly = layout_with_layers();
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(M1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        let hc = HierClusters::build(&ly, &conn(), &BTreeMap::new(), 1);
        assert!(hc.clusters_per_cell(top).is_empty());
        assert!(hc.is_root(sub, 1));
    }

    #[test]
    fn test_global_nets_propagate() {
        let mut ly = layout_with_layers();
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(M1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(5000, 0))));
        let mut c = conn();
        c.connect_global(M1, "VSS");
        let hc = HierClusters::build(&ly, &c, &BTreeMap::new(), 1);
        let cc = hc.clusters_per_cell(top);
        assert_eq!(cc.len(), 1);
        assert_eq!(cc.cluster_by_id(1).unwrap().connections().len(), 2);
    }

    #[test]
    fn test_join_redirects_parents() {
        let mut ly = layout_with_layers();
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        ly.cell_mut(sub).insert(M1, Shape::new(Rect::new(0, 0, 100, 100)));
        ly.cell_mut(sub).insert(M1, Shape::new(Rect::new(500, 0, 600, 100)));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        ly.cell_mut(top).insert(M2, Shape::new(Rect::new(550, 50, 700, 60)));
        let mut hc = HierClusters::build(&ly, &conn(), &BTreeMap::new(), 1);
        assert!(!hc.is_root(sub, 2));
        hc.join_cluster_with(sub, 1, 2);
        assert!(hc.clusters_per_cell(sub).cluster_by_id(2).is_none());
        assert!(!hc.is_root(sub, 1));
        let top_c = hc.clusters_per_cell(top).cluster_by_id(1).unwrap();
        assert_eq!(top_c.connections()[0].cluster_id, 1);
        assert_eq!(hc.clusters_per_cell(top).find_cluster_with_connection(0, 1), 1);
    }
}
