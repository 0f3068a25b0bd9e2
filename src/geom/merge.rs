// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Polygon union (merge) engine.
//!
//! The edge processor cuts the plane into vertical slabs at every vertex and
//! every edge crossing. Inside one slab no two edges cross, so the covered
//! part is a stack of trapezoids found by a nonzero-winding sweep. The
//! polygon generator joins trapezoids of neighbouring slabs that continue
//! each other. Area is exact; the perimeter is the total length of edge
//! pieces that separate covered from uncovered space.

use super::{Coord, Point, Polygon};
use std::collections::HashSet;

/// Result of a merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Union area in dbu².
    pub area: f64,
    /// Union boundary length in dbu.
    pub perimeter: f64,
    /// Non-overlapping pieces covering the union.
    pub polygons: Vec<Polygon>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    /// +1 when running towards positive x, -1 otherwise; 0 for vertical edges.
    dir: i32,
}

impl Edge {
    fn y_at(&self, x: f64) -> f64 {
        if self.x1 == self.x0 {
            self.y0
        } else {
            self.y0 + (self.y1 - self.y0) * (x - self.x0) / (self.x1 - self.x0)
        }
    }

    fn min_x(&self) -> f64 {
        self.x0.min(self.x1)
    }

    fn max_x(&self) -> f64 {
        self.x0.max(self.x1)
    }
}

/// Collects polygons and computes their union on demand.
#[derive(Debug, Default)]
pub struct PolygonMerger {
    polygons: Vec<Polygon>,
    edges: Vec<Edge>,
}

impl PolygonMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for the given number of vertices.
    pub fn reserve(&mut self, vertices: usize) {
        self.edges.reserve(vertices);
    }

    pub fn insert(&mut self, poly: &Polygon) {
        if poly.is_empty() {
            return;
        }
        for (a, b) in poly.edges() {
            if a == b {
                continue;
            }
            let dir = match b.x.cmp(&a.x) {
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
            };
            self.edges.push(Edge {
                x0: a.x as f64,
                y0: a.y as f64,
                x1: b.x as f64,
                y1: b.y as f64,
                dir,
            });
        }
        self.polygons.push(poly.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn clear(&mut self) {
        self.polygons.clear();
        self.edges.clear();
    }

    /// Computes the union.
    pub fn merge(&self) -> MergeResult {
        if self.polygons.is_empty() {
            return MergeResult::default();
        }
        let (area, polygons) = self.sweep();
        MergeResult { area, perimeter: self.boundary_length(), polygons }
    }

    fn critical_xs(&self) -> Vec<f64> {
        let mut xs: Vec<f64> = Vec::with_capacity(self.edges.len() * 2);
        for e in &self.edges {
            xs.push(e.x0);
            xs.push(e.x1);
        }
        let sloped: Vec<&Edge> = self.edges.iter().filter(|e| e.dir != 0).collect();
        for (i, a) in sloped.iter().enumerate() {
            for b in &sloped[i + 1..] {
                if let Some((x, _)) = crossing(a, b) {
                    xs.push(x);
                }
            }
        }
        xs.sort_by(|a, b| a.total_cmp(b));
        xs.dedup();
        xs
    }

    fn sweep(&self) -> (f64, Vec<Polygon>) {
        let xs = self.critical_xs();
        let mut area = 0.0;
        let mut done: Vec<Trapezoid> = Vec::new();
        let mut open: Vec<Trapezoid> = Vec::new();

        for w in xs.windows(2) {
            let (xa, xb) = (w[0], w[1]);
            let xm = 0.5 * (xa + xb);
            let mut spanning: Vec<(f64, &Edge)> = self
                .edges
                .iter()
                .filter(|e| e.dir != 0 && e.min_x() <= xa && e.max_x() >= xb)
                .map(|e| (e.y_at(xm), e))
                .collect();
            spanning.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut pieces = Vec::new();
            let mut wind = 0;
            let mut start: Option<&Edge> = None;
            for (_, e) in &spanning {
                let before = wind;
                wind += e.dir;
                if before == 0 && wind != 0 {
                    start = Some(e);
                } else if before != 0 && wind == 0 {
                    if let Some(lo) = start.take() {
                        let t = Trapezoid {
                            x0: xa,
                            x1: xb,
                            b0: lo.y_at(xa),
                            b1: lo.y_at(xb),
                            t0: e.y_at(xa),
                            t1: e.y_at(xb),
                        };
                        if t.t0 - t.b0 > 0.0 || t.t1 - t.b1 > 0.0 {
                            area += t.area();
                            pieces.push(t);
                        }
                    }
                }
            }

            // continue open pieces that line up with this slab
            let mut next_open = Vec::with_capacity(pieces.len());
            for p in pieces {
                if let Some(k) = open.iter().position(|o| o.continues_into(&p)) {
                    let mut o = open.swap_remove(k);
                    o.x1 = p.x1;
                    o.b1 = p.b1;
                    o.t1 = p.t1;
                    next_open.push(o);
                } else {
                    next_open.push(p);
                }
            }
            done.append(&mut open);
            open = next_open;
        }
        done.append(&mut open);

        let polygons = done.iter().map(Trapezoid::to_polygon).filter(|p| !p.is_empty()).collect();
        (area, polygons)
    }

    fn inside(&self, x: f64, y: f64) -> bool {
        let mut wind = 0i32;
        for e in &self.edges {
            if e.y0 <= y {
                if e.y1 > y && is_left(e, x, y) > 0.0 {
                    wind += 1;
                }
            } else if e.y1 <= y && is_left(e, x, y) < 0.0 {
                wind -= 1;
            }
        }
        wind != 0
    }

    fn boundary_length(&self) -> f64 {
        const EPS: f64 = 1e-4;
        let mut seen: HashSet<(i64, i64, i64, i64)> = HashSet::new();
        let mut length = 0.0;
        for (i, e) in self.edges.iter().enumerate() {
            let dx = e.x1 - e.x0;
            let dy = e.y1 - e.y0;
            let len = dx.hypot(dy);
            let mut ts = vec![0.0, 1.0];
            for (j, o) in self.edges.iter().enumerate() {
                if i == j {
                    continue;
                }
                for (px, py) in [(o.x0, o.y0), (o.x1, o.y1)] {
                    if let Some(t) = param_on(e, px, py) {
                        ts.push(t);
                    }
                }
                if let Some((cx, cy)) = crossing(e, o) {
                    if let Some(t) = param_on(e, cx, cy) {
                        ts.push(t);
                    }
                }
            }
            ts.sort_by(|a, b| a.total_cmp(b));
            ts.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

            let (nx, ny) = (-dy / len, dx / len);
            for w in ts.windows(2) {
                let piece = (w[1] - w[0]) * len;
                if piece <= 1e-9 {
                    continue;
                }
                let tm = 0.5 * (w[0] + w[1]);
                let (mx, my) = (e.x0 + dx * tm, e.y0 + dy * tm);
                let left = self.inside(mx + nx * EPS, my + ny * EPS);
                let right = self.inside(mx - nx * EPS, my - ny * EPS);
                if left == right {
                    continue;
                }
                let a = (e.x0 + dx * w[0], e.y0 + dy * w[0]);
                let b = (e.x0 + dx * w[1], e.y0 + dy * w[1]);
                if seen.insert(piece_key(a, b)) {
                    length += piece;
                }
            }
        }
        length
    }
}

fn piece_key(a: (f64, f64), b: (f64, f64)) -> (i64, i64, i64, i64) {
    let q = |v: f64| (v * 1e6).round() as i64;
    let (a, b) = if (a.0, a.1) <= (b.0, b.1) { (a, b) } else { (b, a) };
    (q(a.0), q(a.1), q(b.0), q(b.1))
}

fn is_left(e: &Edge, x: f64, y: f64) -> f64 {
    (e.x1 - e.x0) * (y - e.y0) - (x - e.x0) * (e.y1 - e.y0)
}

/// Parameter of the point along the edge, if it lies on the edge.
fn param_on(e: &Edge, x: f64, y: f64) -> Option<f64> {
    let dx = e.x1 - e.x0;
    let dy = e.y1 - e.y0;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return None;
    }
    let cr = dx * (y - e.y0) - dy * (x - e.x0);
    if cr.abs() > 1e-9 * len2.sqrt() {
        return None;
    }
    let t = ((x - e.x0) * dx + (y - e.y0) * dy) / len2;
    (t > 0.0 && t < 1.0).then_some(t)
}

/// Proper crossing point of two edges (interior of both).
fn crossing(a: &Edge, b: &Edge) -> Option<(f64, f64)> {
    let (rx, ry) = (a.x1 - a.x0, a.y1 - a.y0);
    let (sx, sy) = (b.x1 - b.x0, b.y1 - b.y0);
    let den = rx * sy - ry * sx;
    if den == 0.0 {
        return None;
    }
    let qpx = b.x0 - a.x0;
    let qpy = b.y0 - a.y0;
    let t = (qpx * sy - qpy * sx) / den;
    let u = (qpx * ry - qpy * rx) / den;
    if t > 0.0 && t < 1.0 && u > 0.0 && u < 1.0 {
        Some((a.x0 + t * rx, a.y0 + t * ry))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Trapezoid {
    x0: f64,
    x1: f64,
    b0: f64,
    b1: f64,
    t0: f64,
    t1: f64,
}

impl Trapezoid {
    fn area(&self) -> f64 {
        (self.x1 - self.x0) * ((self.t0 - self.b0) + (self.t1 - self.b1)) * 0.5
    }

    fn continues_into(&self, n: &Trapezoid) -> bool {
        const TOL: f64 = 1e-9;
        let slope = |y0: f64, y1: f64, x0: f64, x1: f64| (y1 - y0) / (x1 - x0);
        (self.x1 - n.x0).abs() < TOL
            && (self.b1 - n.b0).abs() < TOL
            && (self.t1 - n.t0).abs() < TOL
            && (slope(self.b0, self.b1, self.x0, self.x1) - slope(n.b0, n.b1, n.x0, n.x1)).abs() < TOL
            && (slope(self.t0, self.t1, self.x0, self.x1) - slope(n.t0, n.t1, n.x0, n.x1)).abs() < TOL
    }

    fn to_polygon(&self) -> Polygon {
        let r = |v: f64| v.round() as Coord;
        Polygon::new(vec![
            Point::new(r(self.x0), r(self.b0)),
            Point::new(r(self.x0), r(self.t0)),
            Point::new(r(self.x1), r(self.t1)),
            Point::new(r(self.x1), r(self.b1)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Rect;

    fn merged(rects: &[Rect]) -> MergeResult {
        let mut m = PolygonMerger::new();
        for r in rects {
            m.insert(&Polygon::from_rect(r));
        }
        m.merge()
    }

    #[test]
    fn test_overlapping_boxes() {
        let res = merged(&[Rect::new(0, 0, 100, 100), Rect::new(50, 50, 150, 150)]);
        assert_eq!(res.area, 17500.0);
        assert!((res.perimeter - 600.0).abs() < 1e-6);
        let sum: f64 = res.polygons.iter().map(|p| p.area()).sum();
        assert_eq!(sum, 17500.0);
    }

    #[test]
    fn test_abutting_boxes_merge_to_one() {
        let res = merged(&[Rect::new(0, 0, 100, 50), Rect::new(100, 0, 200, 50)]);
        assert_eq!(res.area, 10000.0);
        assert!((res.perimeter - 500.0).abs() < 1e-6);
        assert_eq!(res.polygons.len(), 1);
        assert_eq!(res.polygons[0].as_rect(), Some(Rect::new(0, 0, 200, 50)));
    }

    #[test]
    fn test_identical_boxes() {
        let res = merged(&[Rect::new(0, 0, 10, 10), Rect::new(0, 0, 10, 10)]);
        assert_eq!(res.area, 100.0);
        assert!((res.perimeter - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_triangle() {
        let mut m = PolygonMerger::new();
        m.insert(&Polygon::new(vec![Point::new(0, 0), Point::new(0, 100), Point::new(100, 0)]));
        let res = m.merge();
        assert!((res.area - 5000.0).abs() < 1e-6);
        assert!((res.perimeter - (200.0 + 100.0 * 2f64.sqrt())).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint() {
        let res = merged(&[Rect::new(0, 0, 10, 10), Rect::new(20, 0, 30, 10)]);
        assert_eq!(res.area, 200.0);
        assert!((res.perimeter - 80.0).abs() < 1e-6);
        assert_eq!(res.polygons.len(), 2);
    }
}
