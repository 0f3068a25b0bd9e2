// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Integer layout geometry.
//!
//! All shape coordinates are database units (dbu). Measures that can exceed
//! the coordinate range (areas, perimeters) are returned as `f64`.

use std::fmt;
use std::ops::{Add, Mul, Sub};

pub mod merge;

/// A coordinate in database units.
pub type Coord = i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, o: Point) -> Point {
        Point::new(self.x + o.x, self.y + o.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, o: Point) -> Point {
        Point::new(self.x - o.x, self.y - o.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// An axis-aligned box. `left > right` marks the empty box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: Coord,
    pub bottom: Coord,
    pub right: Coord,
    pub top: Coord,
}

impl Default for Rect {
    fn default() -> Self {
        Self::empty()
    }
}

impl Rect {
    /// Creates a normalized box from two corners.
    pub fn new(x1: Coord, y1: Coord, x2: Coord, y2: Coord) -> Self {
        Self {
            left: x1.min(x2),
            bottom: y1.min(y2),
            right: x1.max(x2),
            top: y1.max(y2),
        }
    }

    pub const fn empty() -> Self {
        Self { left: 1, bottom: 1, right: -1, top: -1 }
    }

    pub fn is_empty(&self) -> bool {
        self.left > self.right || self.bottom > self.top
    }

    pub fn width(&self) -> Coord {
        if self.is_empty() { 0 } else { self.right - self.left }
    }

    pub fn height(&self) -> Coord {
        if self.is_empty() { 0 } else { self.top - self.bottom }
    }

    pub fn lower_left(&self) -> Point {
        Point::new(self.left, self.bottom)
    }

    pub fn upper_right(&self) -> Point {
        Point::new(self.right, self.top)
    }

    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2, (self.bottom + self.top) / 2)
    }

    pub fn area(&self) -> f64 {
        self.width() as f64 * self.height() as f64
    }

    pub fn perimeter(&self) -> f64 {
        2.0 * (self.width() as f64 + self.height() as f64)
    }

    /// Extends the box to include the point.
    pub fn add_point(&mut self, p: Point) {
        if self.is_empty() {
            *self = Rect::new(p.x, p.y, p.x, p.y);
        } else {
            self.left = self.left.min(p.x);
            self.bottom = self.bottom.min(p.y);
            self.right = self.right.max(p.x);
            self.top = self.top.max(p.y);
        }
    }

    /// Extends the box to include another box.
    pub fn add_rect(&mut self, r: &Rect) {
        if !r.is_empty() {
            self.add_point(r.lower_left());
            self.add_point(r.upper_right());
        }
    }

    /// True if the boxes overlap or share an edge or corner.
    pub fn touches(&self, o: &Rect) -> bool {
        !self.is_empty()
            && !o.is_empty()
            && self.left <= o.right
            && o.left <= self.right
            && self.bottom <= o.top
            && o.bottom <= self.top
    }

    pub fn contains(&self, p: Point) -> bool {
        !self.is_empty()
            && p.x >= self.left
            && p.x <= self.right
            && p.y >= self.bottom
            && p.y <= self.top
    }

    pub fn enlarged(&self, d: Coord) -> Rect {
        if self.is_empty() {
            *self
        } else {
            Rect::new(self.left - d, self.bottom - d, self.right + d, self.top + d)
        }
    }

    /// Bounding box of the transformed box.
    pub fn transformed(&self, t: &CplxTrans) -> Rect {
        let mut r = Rect::empty();
        if self.is_empty() {
            return r;
        }
        for p in [
            self.lower_left(),
            Point::new(self.left, self.top),
            self.upper_right(),
            Point::new(self.right, self.bottom),
        ] {
            r.add_point(t.apply(p));
        }
        r
    }
}

/// A simple polygon (hull only). Boxes are polygons with four axis-aligned points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        let mut points = points;
        points.dedup();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Self { points }
    }

    pub fn from_rect(r: &Rect) -> Self {
        Self {
            points: vec![
                r.lower_left(),
                Point::new(r.left, r.top),
                r.upper_right(),
                Point::new(r.right, r.bottom),
            ],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.len() < 3
    }

    pub fn bbox(&self) -> Rect {
        let mut r = Rect::empty();
        for &p in &self.points {
            r.add_point(p);
        }
        r
    }

    /// Returns the box if this polygon is an axis-aligned rectangle.
    pub fn as_rect(&self) -> Option<Rect> {
        if self.points.len() != 4 {
            return None;
        }
        let b = self.bbox();
        let corners = [
            b.lower_left(),
            Point::new(b.left, b.top),
            b.upper_right(),
            Point::new(b.right, b.bottom),
        ];
        let all_corners = self.points.iter().all(|p| corners.contains(p));
        let distinct = corners.iter().all(|c| self.points.contains(c));
        let axis_aligned = self.edges().all(|(a, b)| a.x == b.x || a.y == b.y);
        (all_corners && distinct && axis_aligned).then_some(b)
    }

    /// Iterates the closed edge loop.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Signed doubled area (positive for counter-clockwise orientation).
    pub fn area2(&self) -> i128 {
        self.edges()
            .map(|(a, b)| a.x as i128 * b.y as i128 - b.x as i128 * a.y as i128)
            .sum()
    }

    pub fn area(&self) -> f64 {
        (self.area2().abs() as f64) * 0.5
    }

    pub fn perimeter(&self) -> f64 {
        self.edges()
            .map(|(a, b)| ((b.x - a.x) as f64).hypot((b.y - a.y) as f64))
            .sum()
    }

    pub fn transformed(&self, t: &CplxTrans) -> Polygon {
        let mut points: Vec<Point> = self.points.iter().map(|&p| t.apply(p)).collect();
        if t.mirror {
            points.reverse();
        }
        Polygon::new(points)
    }

    pub fn moved(&self, d: Point) -> Polygon {
        Polygon { points: self.points.iter().map(|&p| p + d).collect() }
    }

    /// Inclusive point test: points on the boundary are inside.
    pub fn contains_point(&self, p: Point) -> bool {
        if self.is_empty() || !self.bbox().contains(p) {
            return false;
        }
        if self.edges().any(|(a, b)| on_segment(a, b, p)) {
            return true;
        }
        let mut winding = 0i32;
        for (a, b) in self.edges() {
            if a.y <= p.y {
                if b.y > p.y && cross(a, b, p) > 0 {
                    winding += 1;
                }
            } else if b.y <= p.y && cross(a, b, p) < 0 {
                winding -= 1;
            }
        }
        winding != 0
    }

    /// True if the polygons overlap or touch (shared edge or corner counts).
    pub fn touches(&self, o: &Polygon) -> bool {
        if self.is_empty() || o.is_empty() || !self.bbox().touches(&o.bbox()) {
            return false;
        }
        for (a, b) in self.edges() {
            for (c, d) in o.edges() {
                if segments_touch(a, b, c, d) {
                    return true;
                }
            }
        }
        self.contains_point(o.points[0]) || o.contains_point(self.points[0])
    }
}

fn cross(a: Point, b: Point, p: Point) -> i128 {
    (b.x - a.x) as i128 * (p.y - a.y) as i128 - (b.y - a.y) as i128 * (p.x - a.x) as i128
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    cross(a, b, p) == 0
        && p.x >= a.x.min(b.x)
        && p.x <= a.x.max(b.x)
        && p.y >= a.y.min(b.y)
        && p.y <= a.y.max(b.y)
}

/// Inclusive segment intersection test on the integer grid.
pub(crate) fn segments_touch(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = cross(c, d, a).signum();
    let d2 = cross(c, d, b).signum();
    let d3 = cross(a, b, c).signum();
    let d4 = cross(a, b, d).signum();
    if d1 * d2 < 0 && d3 * d4 < 0 {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

/// A text label anchored at a point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Text {
    pub string: String,
    pub pos: Point,
}

impl Text {
    pub fn new(string: impl Into<String>, pos: Point) -> Self {
        Self { string: string.into(), pos }
    }

    pub fn transformed(&self, t: &CplxTrans) -> Text {
        Text { string: self.string.clone(), pos: t.apply(self.pos) }
    }
}

/// Shape geometry as stored in a layout layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Geometry {
    Polygon(Polygon),
    Text(Text),
}

impl Geometry {
    pub fn bbox(&self) -> Rect {
        match self {
            Geometry::Polygon(p) => p.bbox(),
            Geometry::Text(t) => Rect::new(t.pos.x, t.pos.y, t.pos.x, t.pos.y),
        }
    }

    pub fn transformed(&self, t: &CplxTrans) -> Geometry {
        match self {
            Geometry::Polygon(p) => Geometry::Polygon(p.transformed(t)),
            Geometry::Text(x) => Geometry::Text(x.transformed(t)),
        }
    }

    pub fn as_polygon(&self) -> Option<&Polygon> {
        match self {
            Geometry::Polygon(p) => Some(p),
            Geometry::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Geometry::Text(t) => Some(t),
            Geometry::Polygon(_) => None,
        }
    }

    /// Connectivity interaction: polygons touch polygons, texts attach to
    /// polygons containing their anchor. Texts never interact with texts.
    pub fn interacts(&self, o: &Geometry) -> bool {
        match (self, o) {
            (Geometry::Polygon(a), Geometry::Polygon(b)) => a.touches(b),
            (Geometry::Polygon(a), Geometry::Text(t)) | (Geometry::Text(t), Geometry::Polygon(a)) => {
                a.contains_point(t.pos)
            }
            (Geometry::Text(_), Geometry::Text(_)) => false,
        }
    }
}

impl From<Polygon> for Geometry {
    fn from(p: Polygon) -> Self {
        Geometry::Polygon(p)
    }
}

impl From<Rect> for Geometry {
    fn from(r: Rect) -> Self {
        Geometry::Polygon(Polygon::from_rect(&r))
    }
}

impl From<Text> for Geometry {
    fn from(t: Text) -> Self {
        Geometry::Text(t)
    }
}

/// Complex transformation: mirror at the x axis (optional), then rotate
/// counter-clockwise by `angle` degrees, then magnify, then displace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CplxTrans {
    pub angle: f64,
    pub mirror: bool,
    pub mag: f64,
    pub disp: (f64, f64),
}

impl Default for CplxTrans {
    fn default() -> Self {
        Self::identity()
    }
}

fn sin_cos(angle: f64) -> (f64, f64) {
    let a = angle.rem_euclid(360.0);
    if a == 0.0 {
        (0.0, 1.0)
    } else if a == 90.0 {
        (1.0, 0.0)
    } else if a == 180.0 {
        (0.0, -1.0)
    } else if a == 270.0 {
        (-1.0, 0.0)
    } else {
        let r = a.to_radians();
        (r.sin(), r.cos())
    }
}

impl CplxTrans {
    pub const fn identity() -> Self {
        Self { angle: 0.0, mirror: false, mag: 1.0, disp: (0.0, 0.0) }
    }

    pub fn new(angle: f64, mirror: bool, mag: f64, disp: Point) -> Self {
        Self {
            angle: angle.rem_euclid(360.0),
            mirror,
            mag,
            disp: (disp.x as f64, disp.y as f64),
        }
    }

    pub fn displacement(d: Point) -> Self {
        Self { disp: (d.x as f64, d.y as f64), ..Self::identity() }
    }

    pub fn magnification(mag: f64) -> Self {
        Self { mag, ..Self::identity() }
    }

    pub fn is_unity(&self) -> bool {
        self.angle == 0.0 && !self.mirror && self.mag == 1.0 && self.disp == (0.0, 0.0)
    }

    pub fn is_ortho(&self) -> bool {
        self.angle.rem_euclid(90.0) == 0.0
    }

    pub fn is_mag(&self) -> bool {
        self.mag != 1.0
    }

    /// The displacement rounded to the grid.
    pub fn disp_point(&self) -> Point {
        Point::new(self.disp.0.round() as Coord, self.disp.1.round() as Coord)
    }

    pub fn apply_f(&self, x: f64, y: f64) -> (f64, f64) {
        let y = if self.mirror { -y } else { y };
        let (s, c) = sin_cos(self.angle);
        let xr = c * x - s * y;
        let yr = s * x + c * y;
        (xr * self.mag + self.disp.0, yr * self.mag + self.disp.1)
    }

    pub fn apply(&self, p: Point) -> Point {
        let (x, y) = self.apply_f(p.x as f64, p.y as f64);
        Point::new(x.round() as Coord, y.round() as Coord)
    }

    pub fn inverted(&self) -> CplxTrans {
        let angle = if self.mirror { self.angle } else { -self.angle };
        let lin = CplxTrans {
            angle: angle.rem_euclid(360.0),
            mirror: self.mirror,
            mag: 1.0 / self.mag,
            disp: (0.0, 0.0),
        };
        let (dx, dy) = lin.apply_f(self.disp.0, self.disp.1);
        CplxTrans { disp: (-dx, -dy), ..lin }
    }

    /// The transformation without its magnification.
    pub fn without_mag(&self) -> CplxTrans {
        CplxTrans { mag: 1.0, ..*self }
    }
}

impl Mul for CplxTrans {
    type Output = CplxTrans;

    /// `a * b` applies `b` first, then `a`.
    fn mul(self, b: CplxTrans) -> CplxTrans {
        let angle = if self.mirror { self.angle - b.angle } else { self.angle + b.angle };
        let disp = self.apply_f(b.disp.0, b.disp.1);
        CplxTrans {
            angle: angle.rem_euclid(360.0),
            mirror: self.mirror != b.mirror,
            mag: self.mag * b.mag,
            disp,
        }
    }
}

/// A polygon in micron units, used for diagnostic geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DPolygon {
    pub points: Vec<(f64, f64)>,
}

impl DPolygon {
    pub fn from_polygon(p: &Polygon, dbu: f64) -> Self {
        Self {
            points: p.points().iter().map(|q| (q.x as f64 * dbu, q.y as f64 * dbu)).collect(),
        }
    }

    pub fn from_rect(r: &Rect, dbu: f64) -> Self {
        Self::from_polygon(&Polygon::from_rect(r), dbu)
    }

    pub fn to_polygon(&self, dbu: f64) -> Polygon {
        Polygon::new(
            self.points
                .iter()
                .map(|&(x, y)| Point::new((x / dbu).round() as Coord, (y / dbu).round() as Coord))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl fmt::Display for DPolygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, (x, y)) in self.points.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{},{}", x, y)?;
        }
        write!(f, ")")
    }
}

impl std::str::FromStr for DPolygon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .ok_or_else(|| format!("polygon string must be enclosed in parentheses: '{}'", s))?;
        let mut points = Vec::new();
        for pair in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("invalid point '{}' in polygon string", pair))?;
            let x: f64 = x.trim().parse().map_err(|_| format!("invalid coordinate '{}'", x))?;
            let y: f64 = y.trim().parse().map_err(|_| format!("invalid coordinate '{}'", y))?;
            points.push((x, y));
        }
        Ok(DPolygon { points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_touch_and_area() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(100, 50, 200, 80);
        let c = Rect::new(101, 0, 120, 10);
        assert!(a.touches(&b));
        assert!(!a.touches(&c));
        assert_eq!(a.area(), 10000.0);
        assert_eq!(a.perimeter(), 400.0);
    }

    #[test]
    fn test_polygon_as_rect() {
        let p = Polygon::from_rect(&Rect::new(0, 0, 10, 20));
        assert_eq!(p.as_rect(), Some(Rect::new(0, 0, 10, 20)));
        let l = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(0, 20),
            Point::new(10, 20),
            Point::new(10, 10),
            Point::new(20, 10),
            Point::new(20, 0),
        ]);
        assert_eq!(l.as_rect(), None);
        assert_eq!(l.area(), 300.0);
        assert!(l.contains_point(Point::new(15, 5)));
        assert!(!l.contains_point(Point::new(15, 15)));
        assert!(l.contains_point(Point::new(10, 15)));
    }

    #[test]
    fn test_polygon_touches() {
        let a = Polygon::from_rect(&Rect::new(0, 0, 10, 10));
        let b = Polygon::from_rect(&Rect::new(10, 10, 20, 20));
        let c = Polygon::from_rect(&Rect::new(2, 2, 4, 4));
        let d = Polygon::from_rect(&Rect::new(11, 0, 20, 9));
        assert!(a.touches(&b));
        assert!(a.touches(&c));
        assert!(c.touches(&a));
        assert!(!a.touches(&d));
    }

    #[test]
    fn test_trans_compose_invert() {
        let t = CplxTrans::new(90.0, true, 2.0, Point::new(10, -5));
        let u = CplxTrans::new(270.0, false, 1.0, Point::new(3, 4));
        let p = Point::new(7, 11);
        assert_eq!((t * u).apply(p), t.apply(u.apply(p)));
        assert_eq!(t.inverted().apply(t.apply(p)), p);
        assert!((t * t.inverted()).is_unity());
    }

    #[test]
    fn test_mirror_keeps_orientation() {
        let p = Polygon::from_rect(&Rect::new(0, 0, 10, 20));
        let t = CplxTrans::new(0.0, true, 1.0, Point::new(0, 0));
        let q = p.transformed(&t);
        assert_eq!(q.area2().signum(), p.area2().signum());
        assert_eq!(q.bbox(), Rect::new(0, -20, 10, 0));
    }

    #[test]
    fn test_dpolygon_string() {
        let d = DPolygon::from_rect(&Rect::new(0, 0, 1000, 500), 0.001);
        let s = d.to_string();
        assert_eq!(s, "(0,0;0,0.5;1,0.5;1,0)");
        let back: DPolygon = s.parse().unwrap();
        assert_eq!(back.to_polygon(0.001).bbox(), Rect::new(0, 0, 1000, 500));
    }
}
