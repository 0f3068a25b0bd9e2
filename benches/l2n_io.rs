// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Benchmarks for writing and reading L2N dumps of a generated hierarchy.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use netex::format::{read_l2n, write_l2n};
use netex::geom::{CplxTrans, Point, Rect, Text};
use netex::l2n::LayoutToNetlist;
use netex::layout::{Instance, LayerInfo, Layout, Shape, ShapeIterator};
use std::rc::Rc;

/// A leaf with `stripes` labelled m1 stripes, placed `n` x `n` times and
/// strapped column-wise on m2.
fn extracted(n: i64, stripes: i64) -> LayoutToNetlist {
    let mut ly = Layout::new(0.001);
    ly.insert_layer(LayerInfo::new(1, 0));
    ly.insert_layer(LayerInfo::new(2, 0));
    let top = ly.add_cell("TOP");
    let leaf = ly.add_cell("LEAF");
    for s in 0..stripes {
        let c = ly.cell_mut(leaf);
        c.insert(0, Shape::new(Rect::new(0, s * 200, 1000, s * 200 + 100)));
        c.insert(0, Shape::new(Text::new(format!("S{}", s), Point::new(10, s * 200 + 50))));
    }
    let pitch = stripes * 200 + 100;
    for i in 0..n {
        for j in 0..n {
            let t = CplxTrans::displacement(Point::new(i * 1200, j * pitch));
            ly.cell_mut(top).insert_instance(Instance::new(leaf, t));
        }
        ly.cell_mut(top).insert(1, Shape::new(Rect::new(i * 1200 + 400, 0, i * 1200 + 500, n * pitch)));
    }
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

fn bench_l2n_io(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2n_io");

    for n in [2, 4, 8] {
        let l2n = extracted(n, 8);
        let long = write_l2n(&l2n, false);
        let short = write_l2n(&l2n, true);

        group.bench_with_input(BenchmarkId::new("write_long", n), &l2n, |b, l2n| {
            b.iter(|| black_box(write_l2n(black_box(l2n), false)))
        });
        group.bench_with_input(BenchmarkId::new("write_short", n), &l2n, |b, l2n| {
            b.iter(|| black_box(write_l2n(black_box(l2n), true)))
        });
        group.bench_with_input(BenchmarkId::new("read_long", n), &long, |b, text| {
            b.iter(|| black_box(read_l2n(black_box(text), "bench").unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("read_short", n), &short, |b, text| {
            b.iter(|| black_box(read_l2n(black_box(text), "bench").unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_l2n_io);
criterion_main!(benches);
