// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Hierarchical layout database.
//!
//! A [`Layout`] is a list of cells. Each cell owns per-layer shapes and a list
//! of child instances with complex transformations. Property sets attached to
//! shapes and instances are interned in a [`PropertiesRepository`].

use crate::geom::{CplxTrans, Geometry, Rect};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

pub type CellIndex = usize;

/// Id of an interned property set. 0 means "no properties".
pub type PropertiesId = u32;

/// A property key or value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Nil,
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, PropValue::Nil)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::String(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::String(s)
    }
}

impl From<i64> for PropValue {
    fn from(i: i64) -> Self {
        PropValue::Int(i)
    }
}

impl From<f64> for PropValue {
    fn from(f: f64) -> Self {
        PropValue::Float(f)
    }
}

/// Quotes a string unless it is a plain word of `[A-Za-z0-9_.$]`.
pub fn word_or_quoted(s: &str) -> String {
    let is_word = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$');
    if is_word {
        s.to_string()
    } else {
        let mut q = String::with_capacity(s.len() + 2);
        q.push('\'');
        for c in s.chars() {
            match c {
                '\'' | '\\' => {
                    q.push('\\');
                    q.push(c);
                }
                '\n' => q.push_str("\\n"),
                '\t' => q.push_str("\\t"),
                _ => q.push(c),
            }
        }
        q.push('\'');
        q
    }
}

impl fmt::Display for PropValue {
    /// Parsable form: `nil`, integers, floats with a decimal point or
    /// exponent, single-quoted strings and space-separated lists in parentheses.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Nil => write!(f, "nil"),
            PropValue::Int(i) => write!(f, "{}", i),
            PropValue::Float(v) => write!(f, "{:?}", v),
            PropValue::String(s) => {
                // always quoted so that numeric-looking strings stay strings
                let w = word_or_quoted(s);
                if w.starts_with('\'') {
                    write!(f, "{}", w)
                } else {
                    write!(f, "'{}'", w)
                }
            }
            PropValue::List(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
        }
    }
}

pub type PropertySet = Vec<(PropValue, PropValue)>;

/// Interns property sets to small ids.
#[derive(Debug, Clone, Default)]
pub struct PropertiesRepository {
    sets: Vec<PropertySet>,
    index: HashMap<String, PropertiesId>,
}

impl PropertiesRepository {
    /// Returns the id for the given set. The empty set is always id 0.
    pub fn intern(&mut self, set: PropertySet) -> PropertiesId {
        if set.is_empty() {
            return 0;
        }
        let key = set
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";");
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        self.sets.push(set);
        let id = self.sets.len() as PropertiesId;
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, id: PropertiesId) -> &[(PropValue, PropValue)] {
        if id == 0 {
            &[]
        } else {
            self.sets.get(id as usize - 1).map(|s| s.as_slice()).unwrap_or(&[])
        }
    }

    pub fn value(&self, id: PropertiesId, key: &PropValue) -> Option<&PropValue> {
        self.get(id).iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Source layer description: GDS layer/datatype and/or a name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LayerInfo {
    pub layer: Option<(i32, i32)>,
    pub name: String,
}

impl LayerInfo {
    pub fn new(layer: i32, datatype: i32) -> Self {
        Self { layer: Some((layer, datatype)), name: String::new() }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { layer: None, name: name.into() }
    }

    pub fn is_null(&self) -> bool {
        self.layer.is_none() && self.name.is_empty()
    }
}

impl fmt::Display for LayerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.layer, self.name.is_empty()) {
            (Some((l, d)), true) => write!(f, "{}/{}", l, d),
            (Some((l, d)), false) => write!(f, "{} ({}/{})", self.name, l, d),
            (None, _) => write!(f, "{}", self.name),
        }
    }
}

impl std::str::FromStr for LayerInfo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse_ld = |ld: &str| -> Option<(i32, i32)> {
            let (l, d) = ld.split_once('/')?;
            Some((l.trim().parse().ok()?, d.trim().parse().ok()?))
        };
        if let Some(open) = s.rfind('(') {
            if let Some(ld) = s[open + 1..].strip_suffix(')').and_then(parse_ld) {
                return Ok(LayerInfo { layer: Some(ld), name: s[..open].trim().to_string() });
            }
        }
        if let Some(ld) = parse_ld(s) {
            return Ok(LayerInfo { layer: Some(ld), name: String::new() });
        }
        Ok(LayerInfo::named(s))
    }
}

/// A shape with its properties id.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub geometry: Geometry,
    pub prop_id: PropertiesId,
}

impl Shape {
    pub fn new(geometry: impl Into<Geometry>) -> Self {
        Self { geometry: geometry.into(), prop_id: 0 }
    }

    pub fn with_props(geometry: impl Into<Geometry>, prop_id: PropertiesId) -> Self {
        Self { geometry: geometry.into(), prop_id }
    }
}

/// A placement of a child cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cell_index: CellIndex,
    pub trans: CplxTrans,
    pub prop_id: PropertiesId,
}

impl Instance {
    pub fn new(cell_index: CellIndex, trans: CplxTrans) -> Self {
        Self { cell_index, trans, prop_id: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Cell {
    name: String,
    shapes: BTreeMap<u32, Vec<Shape>>,
    instances: Vec<Instance>,
}

impl Cell {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shapes(&self, layer: u32) -> &[Shape] {
        self.shapes.get(&layer).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Inserts a shape and returns its index within the layer.
    pub fn insert(&mut self, layer: u32, shape: Shape) -> usize {
        let v = self.shapes.entry(layer).or_default();
        v.push(shape);
        v.len() - 1
    }

    pub fn clear_layer(&mut self, layer: u32) {
        self.shapes.remove(&layer);
    }

    pub fn has_shapes(&self, layer: u32) -> bool {
        !self.shapes(layer).is_empty()
    }

    /// Layers carrying at least one shape, ascending.
    pub fn layers(&self) -> impl Iterator<Item = u32> + '_ {
        self.shapes.iter().filter(|(_, v)| !v.is_empty()).map(|(&l, _)| l)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Inserts an instance and returns its index.
    pub fn insert_instance(&mut self, inst: Instance) -> usize {
        self.instances.push(inst);
        self.instances.len() - 1
    }

    pub fn is_leaf(&self) -> bool {
        self.instances.is_empty()
    }

    /// Local bounding box over all layers.
    pub fn local_bbox(&self) -> Rect {
        let mut r = Rect::empty();
        for shapes in self.shapes.values() {
            for s in shapes {
                r.add_rect(&s.geometry.bbox());
            }
        }
        r
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub dbu: f64,
    cells: Vec<Cell>,
    cell_by_name: HashMap<String, CellIndex>,
    layers: Vec<Option<LayerInfo>>,
    pub properties: PropertiesRepository,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Layout {
    pub fn new(dbu: f64) -> Self {
        Self {
            dbu,
            cells: Vec::new(),
            cell_by_name: HashMap::new(),
            layers: Vec::new(),
            properties: PropertiesRepository::default(),
        }
    }

    /// Adds a cell. A name already in use gets a `$n` suffix.
    pub fn add_cell(&mut self, name: &str) -> CellIndex {
        let mut unique = name.to_string();
        let mut n = 1;
        while self.cell_by_name.contains_key(&unique) {
            unique = format!("{}${}", name, n);
            n += 1;
        }
        let ci = self.cells.len();
        self.cells.push(Cell { name: unique.clone(), ..Default::default() });
        self.cell_by_name.insert(unique, ci);
        ci
    }

    pub fn cell_by_name(&self, name: &str) -> Option<CellIndex> {
        self.cell_by_name.get(name).copied()
    }

    pub fn is_valid_cell_index(&self, ci: CellIndex) -> bool {
        ci < self.cells.len()
    }

    pub fn cell(&self, ci: CellIndex) -> &Cell {
        &self.cells[ci]
    }

    pub fn cell_mut(&mut self, ci: CellIndex) -> &mut Cell {
        &mut self.cells[ci]
    }

    pub fn cell_name(&self, ci: CellIndex) -> &str {
        &self.cells[ci].name
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellIndex, &Cell)> {
        self.cells.iter().enumerate()
    }

    pub fn insert_layer(&mut self, info: LayerInfo) -> u32 {
        self.layers.push(Some(info));
        (self.layers.len() - 1) as u32
    }

    pub fn find_layer(&self, info: &LayerInfo) -> Option<u32> {
        self.layers
            .iter()
            .position(|l| l.as_ref() == Some(info))
            .map(|l| l as u32)
    }

    pub fn layer_info(&self, layer: u32) -> Option<&LayerInfo> {
        self.layers.get(layer as usize).and_then(|l| l.as_ref())
    }

    pub fn is_valid_layer(&self, layer: u32) -> bool {
        self.layer_info(layer).is_some()
    }

    /// Valid layer indexes, ascending.
    pub fn layer_indexes(&self) -> impl Iterator<Item = u32> + '_ {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_some())
            .map(|(i, _)| i as u32)
    }

    /// Removes the layer's shapes from all cells and frees the slot.
    pub fn delete_layer(&mut self, layer: u32) {
        for c in &mut self.cells {
            c.clear_layer(layer);
        }
        if let Some(slot) = self.layers.get_mut(layer as usize) {
            *slot = None;
        }
    }

    /// Cells that no other cell instantiates, ascending.
    pub fn top_cells(&self) -> Vec<CellIndex> {
        let mut called = vec![false; self.cells.len()];
        for c in &self.cells {
            for i in &c.instances {
                called[i.cell_index] = true;
            }
        }
        (0..self.cells.len()).filter(|&ci| !called[ci]).collect()
    }

    /// The single top cell, if there is exactly one.
    pub fn top_cell(&self) -> Option<CellIndex> {
        let tops = self.top_cells();
        (tops.len() == 1).then(|| tops[0])
    }

    /// All cells with children before their parents.
    pub fn bottom_up_order(&self) -> Vec<CellIndex> {
        let n = self.cells.len();
        let mut state = vec![0u8; n];
        let mut order = Vec::with_capacity(n);
        for root in 0..n {
            if state[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            state[root] = 1;
            while let Some((ci, k)) = stack.pop() {
                let insts = &self.cells[ci].instances;
                if k < insts.len() {
                    stack.push((ci, k + 1));
                    let child = insts[k].cell_index;
                    if state[child] == 0 {
                        state[child] = 1;
                        stack.push((child, 0));
                    }
                } else {
                    state[ci] = 2;
                    order.push(ci);
                }
            }
        }
        order
    }

    /// Parents before children.
    pub fn top_down_order(&self) -> Vec<CellIndex> {
        let mut o = self.bottom_up_order();
        o.reverse();
        o
    }

    /// All cells instantiated directly or indirectly from `ci` (excluding `ci`).
    pub fn called_cells(&self, ci: CellIndex) -> BTreeSet<CellIndex> {
        let mut seen = BTreeSet::new();
        let mut todo = vec![ci];
        while let Some(c) = todo.pop() {
            for i in &self.cells[c].instances {
                if seen.insert(i.cell_index) {
                    todo.push(i.cell_index);
                }
            }
        }
        seen.remove(&ci);
        seen
    }

    /// All cells instantiating `ci` directly or indirectly (excluding `ci`).
    pub fn caller_cells(&self, ci: CellIndex) -> BTreeSet<CellIndex> {
        let parents = self.parent_map();
        let mut seen = BTreeSet::new();
        let mut todo = vec![ci];
        while let Some(c) = todo.pop() {
            for &(p, _) in parents.get(&c).map(|v| v.as_slice()).unwrap_or(&[]) {
                if seen.insert(p) {
                    todo.push(p);
                }
            }
        }
        seen.remove(&ci);
        seen
    }

    /// Child cell → (parent cell, instance index) for every instance.
    pub fn parent_map(&self) -> HashMap<CellIndex, Vec<(CellIndex, usize)>> {
        let mut m: HashMap<CellIndex, Vec<(CellIndex, usize)>> = HashMap::new();
        for (ci, c) in self.cells.iter().enumerate() {
            for (ii, i) in c.instances.iter().enumerate() {
                m.entry(i.cell_index).or_default().push((ci, ii));
            }
        }
        m
    }

    /// Recursive bounding boxes of all cells, indexed by cell.
    pub fn bboxes(&self) -> Vec<Rect> {
        let mut bb = vec![Rect::empty(); self.cells.len()];
        for ci in self.bottom_up_order() {
            let c = &self.cells[ci];
            let mut r = c.local_bbox();
            for i in &c.instances {
                r.add_rect(&bb[i.cell_index].transformed(&i.trans));
            }
            bb[ci] = r;
        }
        bb
    }

    /// Recursive bounding box of one layer in one cell.
    pub fn layer_bbox(&self, ci: CellIndex, layer: u32) -> Rect {
        let mut memo: HashMap<CellIndex, Rect> = HashMap::new();
        let mut order: Vec<CellIndex> = self.called_cells(ci).into_iter().collect();
        order.push(ci);
        let bu = self.bottom_up_order();
        order.sort_by_key(|c| bu.iter().position(|x| x == c));
        for c in order {
            let cell = &self.cells[c];
            let mut r = Rect::empty();
            for s in cell.shapes(layer) {
                r.add_rect(&s.geometry.bbox());
            }
            for i in &cell.instances {
                if let Some(b) = memo.get(&i.cell_index) {
                    r.add_rect(&b.transformed(&i.trans));
                }
            }
            memo.insert(c, r);
        }
        memo.get(&ci).copied().unwrap_or_default()
    }

    /// Flattened shapes of one layer below `ci`, in `ci` coordinates.
    pub fn flat_shapes(&self, ci: CellIndex, layer: u32) -> Vec<Geometry> {
        let mut out = Vec::new();
        let mut stack = vec![(ci, CplxTrans::identity())];
        while let Some((c, t)) = stack.pop() {
            let cell = &self.cells[c];
            for s in cell.shapes(layer) {
                out.push(s.geometry.transformed(&t));
            }
            for i in &cell.instances {
                stack.push((i.cell_index, t * i.trans));
            }
        }
        out
    }
}

/// Maps cells of one layout to cells of another.
#[derive(Debug, Clone, Default)]
pub struct CellMapping {
    map: IndexMap<CellIndex, CellIndex>,
}

impl CellMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: CellIndex, to: CellIndex) {
        self.map.insert(from, to);
    }

    pub fn get(&self, from: CellIndex) -> Option<CellIndex> {
        self.map.get(&from).copied()
    }

    pub fn has_mapping(&self, from: CellIndex) -> bool {
        self.map.contains_key(&from)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellIndex, CellIndex)> + '_ {
        self.map.iter().map(|(&a, &b)| (a, b))
    }
}

/// Which shapes a layer derived from a source layer takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeFilter {
    All,
    Polygons,
    Texts,
}

impl ShapeFilter {
    pub fn accepts(self, g: &Geometry) -> bool {
        match self {
            ShapeFilter::All => true,
            ShapeFilter::Polygons => matches!(g, Geometry::Polygon(_)),
            ShapeFilter::Texts => matches!(g, Geometry::Text(_)),
        }
    }
}

/// Hierarchical shape source: a layout below a top cell, optionally
/// restricted to a region.
#[derive(Debug, Clone)]
pub struct ShapeIterator {
    pub layout: Rc<Layout>,
    pub top_cell: CellIndex,
    pub region: Option<Rect>,
}

impl ShapeIterator {
    pub fn new(layout: Rc<Layout>, top_cell: CellIndex) -> Self {
        Self { layout, top_cell, region: None }
    }

    pub fn with_region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn is_clipped(&self) -> bool {
        self.region.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;

    fn three_level() -> Layout {
        let mut ly = Layout::new(0.001);
        let top = ly.add_cell("TOP");
        let mid = ly.add_cell("MID");
        let leaf = ly.add_cell("LEAF");
        let l1 = ly.insert_layer(LayerInfo::new(1, 0));
        ly.cell_mut(leaf).insert(l1, Shape::new(Rect::new(0, 0, 10, 10)));
        ly.cell_mut(mid).insert_instance(Instance::new(leaf, CplxTrans::displacement(Point::new(100, 0))));
        ly.cell_mut(top).insert_instance(Instance::new(mid, CplxTrans::displacement(Point::new(0, 100))));
        ly
    }

    #[test]
    fn test_hierarchy_queries() {
        let ly = three_level();
        assert_eq!(ly.top_cells(), vec![0]);
        assert_eq!(ly.bottom_up_order(), vec![2, 1, 0]);
        assert_eq!(ly.called_cells(0).into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ly.caller_cells(2).into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(ly.bboxes()[0], Rect::new(100, 100, 110, 110));
        assert_eq!(ly.layer_bbox(1, 0), Rect::new(100, 0, 110, 10));
        assert_eq!(ly.flat_shapes(0, 0).len(), 1);
    }

    #[test]
    fn test_unique_cell_names() {
        let mut ly = Layout::default();
        let a = ly.add_cell("A");
        let b = ly.add_cell("A");
        assert_ne!(a, b);
        assert_eq!(ly.cell_name(b), "A$1");
    }

    #[test]
    fn test_properties_interning() {
        let mut repo = PropertiesRepository::default();
        let a = repo.intern(vec![(PropValue::from("NET"), PropValue::from("VDD"))]);
        let b = repo.intern(vec![(PropValue::from("NET"), PropValue::from("VDD"))]);
        let c = repo.intern(vec![(PropValue::from("NET"), PropValue::from("VSS"))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(repo.intern(Vec::new()), 0);
        assert_eq!(repo.value(c, &PropValue::from("NET")), Some(&PropValue::from("VSS")));
    }

    #[test]
    fn test_layer_info_string() {
        let li: LayerInfo = "1/0".parse().unwrap();
        assert_eq!(li, LayerInfo::new(1, 0));
        let named: LayerInfo = "metal1 (17/0)".parse().unwrap();
        assert_eq!(named.to_string(), "metal1 (17/0)");
        assert_eq!("poly".parse::<LayerInfo>().unwrap(), LayerInfo::named("poly"));
    }

    #[test]
    fn test_prop_value_display() {
        let v = PropValue::List(vec![PropValue::from("A B"), PropValue::Int(3), PropValue::Float(1.0)]);
        assert_eq!(v.to_string(), "('A B' 3 1.0)");
        assert_eq!(PropValue::from("VDD").to_string(), "'VDD'");
    }
}
