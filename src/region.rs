// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Shape collections handed to and returned by the orchestrator.
//!
//! A [`Region`] is either deep (a layer of the shape store) or flat (shapes
//! in top-cell coordinates). Clones share one allocation; that allocation
//! is the collection's identity for layer registration.

use crate::geom::{Geometry, Polygon, Text};
use crate::store::DeepLayer;
use std::rc::Rc;

#[derive(Debug)]
pub enum RegionData {
    Deep(DeepLayer),
    Flat(Vec<Geometry>),
}

#[derive(Debug, Clone)]
pub struct Region {
    inner: Rc<RegionData>,
}

impl Region {
    pub fn deep(layer: DeepLayer) -> Self {
        Self { inner: Rc::new(RegionData::Deep(layer)) }
    }

    pub fn flat(shapes: Vec<Geometry>) -> Self {
        Self { inner: Rc::new(RegionData::Flat(shapes)) }
    }

    pub fn from_polygons(polys: impl IntoIterator<Item = Polygon>) -> Self {
        Self::flat(polys.into_iter().map(Geometry::Polygon).collect())
    }

    pub fn from_texts(texts: impl IntoIterator<Item = Text>) -> Self {
        Self::flat(texts.into_iter().map(Geometry::Text).collect())
    }

    /// Identity key: equal for clones of the same collection only.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn is_same(&self, other: &Region) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn data(&self) -> &RegionData {
        &self.inner
    }

    pub fn deep_layer(&self) -> Option<&DeepLayer> {
        match &*self.inner {
            RegionData::Deep(d) => Some(d),
            RegionData::Flat(_) => None,
        }
    }

    pub fn is_deep(&self) -> bool {
        self.deep_layer().is_some()
    }

    /// All shapes flattened into the top cell of the collection.
    pub fn flat_shapes(&self) -> Vec<Geometry> {
        match &*self.inner {
            RegionData::Flat(v) => v.clone(),
            RegionData::Deep(d) => {
                let store = d.store().borrow();
                let shapes = match store.top_cell(d.layout_index()) {
                    Some(top) => store.layout(d.layout_index()).flat_shapes(top, d.layer()),
                    None => Vec::new(),
                };
                shapes
            }
        }
    }

    pub fn polygons(&self) -> Vec<Polygon> {
        self.flat_shapes()
            .into_iter()
            .filter_map(|g| match g {
                Geometry::Polygon(p) => Some(p),
                Geometry::Text(_) => None,
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.flat_shapes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Rect;

    #[test]
    fn test_identity_follows_clones() {
        let a = Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 1, 1))]);
        let b = a.clone();
        let c = Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 1, 1))]);
        assert!(a.is_same(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.is_same(&c));
        assert_eq!(a.polygons().len(), 1);
    }
}
