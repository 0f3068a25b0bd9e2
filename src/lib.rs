// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! netex: hierarchical net extraction from mask-layer geometry.
//!
//! netex turns a hierarchical layout into a netlist of circuits, nets, pins,
//! devices and subcircuits, keeps the net geometry queryable, rebuilds net
//! geometry into target layouts, and persists the result in the L2N text
//! format. LVS comparison results (layout netlist, reference netlist and
//! cross-reference) persist in the LVS text format.
//!
//! # Pipeline
//!
//! ```text
//! source layout (cells, instances, shapes)
//!   → ShapeStore        (store: internal hierarchical copy, deep layers)
//!   → device extraction (extractor: device classes, abstracts, terminals)
//!   → HierClusters      (clusters: touching shapes per cell, linked across instances)
//!   → Netlist           (extractor: one circuit per cell, one net per cluster)
//!   → join rules        (l2n: net-name joins, must-connect checks)
//!   → L2N / LVS text    (format, lvs)
//! ```
//!
//! # Key modules
//!
//! - [`geom`] — points, boxes, polygons, texts, transformations and the polygon merger
//! - [`layout`] / [`store`] / [`region`] — layout data, shared shape store and shape collections
//! - [`connectivity`] / [`clusters`] — connection rules and hierarchical clustering
//! - [`netlist`] / [`extractor`] — netlist model and device/net extraction
//! - [`l2n`] — the [`l2n::LayoutToNetlist`] orchestrator
//! - [`net_builder`] — rebuilds net geometry into a target layout
//! - [`format`] — L2N reader and writer
//! - [`lvs`] — LVS database, reader, writer and file format detection
//! - [`log`] — extraction log entries

pub mod geom;

pub mod layout;

pub mod store;

pub mod region;

pub mod log;

pub mod connectivity;

pub mod clusters;

pub mod netlist;

pub mod extractor;

pub mod l2n;

pub mod net_builder;

pub mod format;

pub mod lvs;
