// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Shared hierarchical shape store.
//!
//! The store holds one or more internal layouts ("slices"), each mirroring
//! the cell hierarchy of a source layout. Layers inside a slice are handed
//! out as [`DeepLayer`] handles. A handle carries a liveness pin; a slice
//! whose pins are all dropped is released by [`ShapeStore::collect_garbage`].
//! Several orchestrators may share one store, each selecting its slice by
//! index.

use crate::geom::Geometry;
use crate::layout::{CellIndex, Instance, LayerInfo, Layout, Shape, ShapeFilter, ShapeIterator};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub type SharedStore = Rc<RefCell<ShapeStore>>;

#[derive(Debug)]
pub struct LayerPin {
    layout_index: usize,
    layer: u32,
}

#[derive(Debug)]
struct StoreSlice {
    layout: Layout,
    top_cell: Option<CellIndex>,
    source: Option<ShapeIterator>,
    /// source cell → internal cell
    cell_map: HashMap<CellIndex, CellIndex>,
    pins: Vec<Weak<LayerPin>>,
    released: bool,
}

/// Internal layouts plus the processing policy handed to the clustering engine.
#[derive(Debug)]
pub struct ShapeStore {
    slices: Vec<StoreSlice>,
    pub threads: usize,
    pub max_area_ratio: f64,
    pub max_vertex_count: usize,
}

impl Default for ShapeStore {
    fn default() -> Self {
        Self { slices: Vec::new(), threads: 1, max_area_ratio: 3.0, max_vertex_count: 16 }
    }
}

impl ShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Adds an empty slice with the given database unit.
    pub fn add_layout(&mut self, layout: Layout, top_cell: Option<CellIndex>) -> usize {
        self.slices.push(StoreSlice {
            layout,
            top_cell,
            source: None,
            cell_map: HashMap::new(),
            pins: Vec::new(),
            released: false,
        });
        self.slices.len() - 1
    }

    /// Adds a slice mirroring the hierarchy below the iterator's top cell.
    /// Shapes are copied per layer later by [`import_layer`].
    pub fn add_layout_from(&mut self, source: &ShapeIterator) -> usize {
        let src = &source.layout;
        let mut layout = Layout::new(src.dbu);
        let mut cell_map = HashMap::new();
        let mut cells: Vec<CellIndex> = src.called_cells(source.top_cell).into_iter().collect();
        cells.insert(0, source.top_cell);
        for &c in &cells {
            cell_map.insert(c, layout.add_cell(src.cell_name(c)));
        }
        for &c in &cells {
            let target = cell_map[&c];
            for inst in src.cell(c).instances() {
                let child = cell_map[&inst.cell_index];
                layout.cell_mut(target).insert_instance(Instance {
                    cell_index: child,
                    trans: inst.trans,
                    prop_id: 0,
                });
            }
        }
        let top = cell_map[&source.top_cell];
        let idx = self.add_layout(layout, Some(top));
        self.slices[idx].source = Some(source.clone());
        self.slices[idx].cell_map = cell_map;
        clilog::debug!("shape store: slice {} mirrors {} cells", idx, cells.len());
        idx
    }

    pub fn num_layouts(&self) -> usize {
        self.slices.len()
    }

    pub fn layout(&self, idx: usize) -> &Layout {
        &self.slices[idx].layout
    }

    pub fn layout_mut(&mut self, idx: usize) -> &mut Layout {
        &mut self.slices[idx].layout
    }

    pub fn top_cell(&self, idx: usize) -> Option<CellIndex> {
        self.slices[idx].top_cell
    }

    pub fn set_top_cell(&mut self, idx: usize, top: CellIndex) {
        self.slices[idx].top_cell = Some(top);
    }

    /// Internal cell mirroring the given source cell.
    pub fn internal_cell(&self, idx: usize, source_cell: CellIndex) -> Option<CellIndex> {
        self.slices[idx].cell_map.get(&source_cell).copied()
    }

    pub fn source(&self, idx: usize) -> Option<&ShapeIterator> {
        self.slices[idx].source.as_ref()
    }

    pub fn is_alive(&self, idx: usize) -> bool {
        let s = &self.slices[idx];
        !s.released && s.pins.iter().any(|p| p.strong_count() > 0)
    }

    pub fn is_released(&self, idx: usize) -> bool {
        self.slices[idx].released
    }

    /// Releases slices that no live layer handle refers to anymore.
    /// Returns the number of slices released.
    pub fn collect_garbage(&mut self) -> usize {
        let mut n = 0;
        for (i, s) in self.slices.iter_mut().enumerate() {
            s.pins.retain(|p| p.strong_count() > 0);
            if !s.released && s.pins.is_empty() {
                s.layout = Layout::new(s.layout.dbu);
                s.cell_map.clear();
                s.source = None;
                s.top_cell = None;
                s.released = true;
                clilog::debug!("shape store: released slice {}", i);
                n += 1;
            }
        }
        n
    }

    fn pin(&mut self, idx: usize, layer: u32) -> Rc<LayerPin> {
        let pin = Rc::new(LayerPin { layout_index: idx, layer });
        self.slices[idx].pins.push(Rc::downgrade(&pin));
        pin
    }
}

/// A layer inside a store slice.
#[derive(Debug, Clone)]
pub struct DeepLayer {
    store: SharedStore,
    pin: Rc<LayerPin>,
}

impl DeepLayer {
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn layout_index(&self) -> usize {
        self.pin.layout_index
    }

    pub fn layer(&self) -> u32 {
        self.pin.layer
    }

    /// True if both handles point to the same layer of the same store.
    pub fn same_layer(&self, other: &DeepLayer) -> bool {
        Rc::ptr_eq(&self.store, &other.store)
            && self.layout_index() == other.layout_index()
            && self.layer() == other.layer()
    }

    pub fn belongs_to(&self, store: &SharedStore, layout_index: usize) -> bool {
        Rc::ptr_eq(&self.store, store) && self.layout_index() == layout_index
    }
}

/// Creates a new, empty layer in a slice.
pub fn new_layer(store: &SharedStore, idx: usize, info: LayerInfo) -> DeepLayer {
    let mut s = store.borrow_mut();
    let layer = s.layout_mut(idx).insert_layer(info);
    let pin = s.pin(idx, layer);
    DeepLayer { store: Rc::clone(store), pin }
}

/// Wraps an existing layer of a slice into a handle.
pub fn existing_layer(store: &SharedStore, idx: usize, layer: u32) -> DeepLayer {
    let pin = store.borrow_mut().pin(idx, layer);
    DeepLayer { store: Rc::clone(store), pin }
}

/// Copies one source layer into a new internal layer, cell by cell.
pub fn import_layer(store: &SharedStore, idx: usize, source_layer: u32, filter: ShapeFilter) -> DeepLayer {
    let info = {
        let s = store.borrow();
        s.source(idx)
            .and_then(|src| src.layout.layer_info(source_layer).cloned())
            .unwrap_or_default()
    };
    let dl = new_layer(store, idx, info);
    let mut s = store.borrow_mut();
    let Some(src) = s.source(idx).cloned() else {
        return dl;
    };
    let map: Vec<(CellIndex, CellIndex)> = s.slices[idx].cell_map.iter().map(|(&a, &b)| (a, b)).collect();
    let layout = s.layout_mut(idx);
    let mut n = 0usize;
    for (from, to) in map {
        for shape in src.layout.cell(from).shapes(source_layer) {
            if filter.accepts(&shape.geometry) {
                layout.cell_mut(to).insert(dl.layer(), Shape::new(shape.geometry.clone()));
                n += 1;
            }
        }
    }
    clilog::debug!("shape store: imported {} shapes from source layer {}", n, source_layer);
    dl
}

/// Places flat shapes into the top cell of a slice on a new layer.
pub fn import_flat(store: &SharedStore, idx: usize, shapes: &[Geometry]) -> DeepLayer {
    let dl = new_layer(store, idx, LayerInfo::default());
    let mut s = store.borrow_mut();
    let top = match s.top_cell(idx) {
        Some(t) => t,
        None => {
            let t = s.layout_mut(idx).add_cell("TOP");
            s.set_top_cell(idx, t);
            t
        }
    };
    let cell = s.layout_mut(idx).cell_mut(top);
    for g in shapes {
        cell.insert(dl.layer(), Shape::new(g.clone()));
    }
    dl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{CplxTrans, Point, Rect};

    fn source() -> ShapeIterator {
        let mut ly = Layout::new(0.001);
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        let l = ly.insert_layer(LayerInfo::new(1, 0));
        ly.cell_mut(sub).insert(l, Shape::new(Rect::new(0, 0, 10, 10)));
        ly.cell_mut(top).insert(l, Shape::new(Rect::new(0, 0, 5, 5)));
        ly.cell_mut(top).insert(l, Shape::new(crate::geom::Text::new("A", Point::new(1, 1))));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::displacement(Point::new(50, 0))));
        ShapeIterator::new(Rc::new(ly), top)
    }

    #[test]
    fn test_import_mirrors_hierarchy() {
        let store = ShapeStore::shared();
        let idx = store.borrow_mut().add_layout_from(&source());
        let polys = import_layer(&store, idx, 0, ShapeFilter::Polygons);
        let texts = import_layer(&store, idx, 0, ShapeFilter::Texts);
        let s = store.borrow();
        let ly = s.layout(idx);
        let top = s.top_cell(idx).unwrap();
        assert_eq!(ly.num_cells(), 2);
        assert_eq!(ly.cell(top).shapes(polys.layer()).len(), 1);
        assert_eq!(ly.cell(top).shapes(texts.layer()).len(), 1);
        assert_eq!(ly.flat_shapes(top, polys.layer()).len(), 2);
    }

    #[test]
    fn test_garbage_collection_follows_pins() {
        let store = ShapeStore::shared();
        let idx = store.borrow_mut().add_layout(Layout::new(0.001), None);
        let layer = new_layer(&store, idx, LayerInfo::default());
        let copy = layer.clone();
        drop(layer);
        assert_eq!(store.borrow_mut().collect_garbage(), 0);
        assert!(store.borrow().is_alive(idx));
        drop(copy);
        assert_eq!(store.borrow_mut().collect_garbage(), 1);
        assert!(store.borrow().is_released(idx));
    }
}
