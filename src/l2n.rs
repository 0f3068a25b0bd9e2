// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The layout-to-netlist orchestrator.
//!
//! [`LayoutToNetlist`] owns the layer registry, the connectivity rules, the
//! cluster graph and the extracted netlist of one internal layout. Typical
//! use:
//!
//! ```text
//! let mut l2n = LayoutToNetlist::from_iter(&source)?;
//! let m1 = l2n.make_polygon_layer(1, Some("m1"))?;
//! let m2 = l2n.make_polygon_layer(2, Some("m2"))?;
//! l2n.connect(&m1)?;
//! l2n.connect(&m2)?;
//! l2n.connect2(&m1, &m2)?;
//! l2n.extract_netlist()?;
//! ```
//!
//! Layers are registered at most once. Connectivity changes drop an
//! extracted netlist. Extraction problems are collected as log entries and
//! only turned into an error by [`LayoutToNetlist::check_extraction_errors`].

use crate::clusters::{ClusterId, ClusterInstance, HierClusters, TerminalShapes};
use crate::connectivity::Connectivity;
use crate::extractor::{DeviceExtractionContext, DeviceExtractor, HierNetExtractor, NetExtractionOptions, NetExtractor};
use crate::format::FormatError;
use crate::geom::merge::PolygonMerger;
use crate::geom::{CplxTrans, DPolygon, Geometry, Point, Polygon, Rect};
use crate::layout::{CellIndex, CellMapping, Instance, LayerInfo, Layout, PropValue, Shape, ShapeFilter, ShapeIterator};
use crate::log::{LogEntryData, LogStore, Severity};
use crate::net_builder::{NetBuilder, NetBuilderOptions};
use crate::netlist::{CircuitId, NetId, Netlist, SubCircuitId};
use crate::region::{Region, RegionData};
use crate::store::{self, DeepLayer, ShapeStore, SharedStore};
use globset::{Glob, GlobMatcher};
use indexmap::IndexMap;
use std::cell::{Ref, RefMut};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

/// Maximum number of errors listed by [`LayoutToNetlist::check_extraction_errors`].
pub const MAX_LISTED_ERRORS: usize = 10;

const MUST_CONNECT_CATEGORY: &str = "must-connect";
const MUST_CONNECT_DESCRIPTION: &str = "Must-connect nets";

#[derive(Debug)]
pub enum L2nError {
    AlreadyExtracted,
    NotExtracted,
    DevicesAlreadyExtracted(String),
    LayerAlreadyRegistered(String),
    LayerNameInUse(String),
    UnknownLayer(String),
    ClippedIterator,
    NoInternalLayout,
    JoinInProgress,
    InvalidPattern(String),
    Extraction(String),
    Format(FormatError),
}

impl std::fmt::Display for L2nError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            L2nError::AlreadyExtracted => write!(f, "The netlist has already been extracted"),
            L2nError::NotExtracted => write!(f, "The netlist has not been extracted yet"),
            L2nError::DevicesAlreadyExtracted(name) => {
                write!(f, "Devices of extractor '{}' have already been extracted", name)
            }
            L2nError::LayerAlreadyRegistered(name) => {
                write!(f, "The layer is already registered under the name '{}'", name)
            }
            L2nError::LayerNameInUse(name) => write!(f, "Layer name '{}' is already used", name),
            L2nError::UnknownLayer(name) => write!(f, "Not a registered layer: {}", name),
            L2nError::ClippedIterator => {
                write!(f, "The netlist extractor cannot work on clipped layouts")
            }
            L2nError::NoInternalLayout => write!(f, "No internal layout present"),
            L2nError::JoinInProgress => write!(f, "Nets cannot be joined while joining is in progress"),
            L2nError::InvalidPattern(msg) => write!(f, "Invalid name pattern: {}", msg),
            L2nError::Extraction(msg) => write!(f, "{}", msg),
            L2nError::Format(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for L2nError {}

impl From<FormatError> for L2nError {
    fn from(e: FormatError) -> Self {
        L2nError::Format(e)
    }
}

pub type Result<T> = std::result::Result<T, L2nError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Unextracted,
    DevicesExtracted,
    NetlistExtracted,
}

/// Identity of a shape collection for registration purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CollectionKey {
    Deep(usize, usize, u32),
    Flat(usize),
}

fn collection_key(r: &Region) -> CollectionKey {
    match r.data() {
        RegionData::Deep(d) => CollectionKey::Deep(Rc::as_ptr(d.store()) as usize, d.layout_index(), d.layer()),
        RegionData::Flat(_) => CollectionKey::Flat(r.id()),
    }
}

fn deep_key(d: &DeepLayer) -> CollectionKey {
    CollectionKey::Deep(Rc::as_ptr(d.store()) as usize, d.layout_index(), d.layer())
}

/// Named internal layers plus the external collections they came from.
#[derive(Debug, Default)]
struct LayerRegistry {
    by_name: IndexMap<String, DeepLayer>,
    names: HashMap<CollectionKey, String>,
    /// Registered collections, kept alive so callers may drop their copies.
    retained: Vec<Region>,
}

impl LayerRegistry {
    fn name_of(&self, r: &Region) -> Option<&str> {
        self.names.get(&collection_key(r)).map(|s| s.as_str())
    }

    fn insert(&mut self, region: Option<Region>, name: &str, dl: DeepLayer) {
        if let Some(r) = region {
            self.names.insert(collection_key(&r), name.to_string());
            self.retained.push(r);
        }
        self.names.insert(deep_key(&dl), name.to_string());
        self.by_name.insert(name.to_string(), dl);
    }

    fn clear(&mut self) {
        self.by_name.clear();
        self.names.clear();
        self.retained.clear();
    }
}

/// Result of a net probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub circuit: CircuitId,
    pub net: NetId,
    /// Subcircuits from the top circuit down to `circuit`, as (parent circuit, subcircuit).
    pub path: Vec<(CircuitId, SubCircuitId)>,
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| L2nError::InvalidPattern(format!("'{}': {}", pattern, e)))
}

pub struct LayoutToNetlist {
    pub(crate) store: SharedStore,
    pub(crate) layout_index: Option<usize>,
    owns_store: bool,
    dummy_layer: Option<DeepLayer>,
    registry: LayerRegistry,
    pub(crate) conn: Connectivity,
    pub(crate) netlist: Option<Netlist>,
    pub(crate) clusters: HierClusters,
    pub(crate) terminal_shapes: BTreeMap<CellIndex, TerminalShapes>,
    pub(crate) log: LogStore,
    pub(crate) state: ExtractionState,
    device_extractors_run: BTreeSet<String>,
    joining: bool,

    join_net_names: Vec<String>,
    join_net_names_per_cell: Vec<(String, String)>,
    join_nets: Vec<BTreeSet<String>>,
    join_nets_per_cell: Vec<(String, BTreeSet<String>)>,

    device_scaling: f64,
    include_floating_subcircuits: bool,
    top_level_mode: bool,
    pub name: String,
    pub description: String,
    pub original_file: String,
    pub filename: String,
    pub generator: String,
}

impl std::fmt::Debug for LayoutToNetlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutToNetlist")
            .field("layout_index", &self.layout_index)
            .field("layers", &self.layer_names())
            .field("state", &self.state)
            .finish()
    }
}

impl Default for LayoutToNetlist {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutToNetlist {
    /// Lazy mode: the internal layout is created on first use.
    pub fn new() -> Self {
        Self::with_parts(ShapeStore::shared(), None, true)
    }

    fn with_parts(store: SharedStore, layout_index: Option<usize>, owns_store: bool) -> Self {
        let mut l2n = Self {
            store,
            layout_index,
            owns_store,
            dummy_layer: None,
            registry: LayerRegistry::default(),
            conn: Connectivity::new(),
            netlist: None,
            clusters: HierClusters::new(),
            terminal_shapes: BTreeMap::new(),
            log: LogStore::new(),
            state: ExtractionState::Unextracted,
            device_extractors_run: BTreeSet::new(),
            joining: false,
            join_net_names: Vec::new(),
            join_net_names_per_cell: Vec::new(),
            join_nets: Vec::new(),
            join_nets_per_cell: Vec::new(),
            device_scaling: 1.0,
            include_floating_subcircuits: false,
            top_level_mode: false,
            name: String::new(),
            description: String::new(),
            original_file: String::new(),
            filename: String::new(),
            generator: String::new(),
        };
        if let Some(idx) = layout_index {
            l2n.pin_layout(idx);
        }
        l2n
    }

    /// Extracts from a hierarchical shape source into a private store.
    pub fn from_iter(source: &ShapeIterator) -> Result<Self> {
        if source.is_clipped() {
            return Err(L2nError::ClippedIterator);
        }
        let store = ShapeStore::shared();
        let idx = store.borrow_mut().add_layout_from(source);
        Ok(Self::with_parts(store, Some(idx), true))
    }

    /// Works on an existing slice of a shared store.
    pub fn with_store(store: SharedStore, layout_index: usize) -> Self {
        Self::with_parts(store, Some(layout_index), false)
    }

    /// Flat mode: a single top cell, shapes are supplied as flat regions.
    pub fn flat(top_cell_name: &str, dbu: f64) -> Self {
        let store = ShapeStore::shared();
        let idx = {
            let mut s = store.borrow_mut();
            let mut layout = Layout::new(dbu);
            let top = layout.add_cell(top_cell_name);
            s.add_layout(layout, Some(top))
        };
        Self::with_parts(store, Some(idx), true)
    }

    fn pin_layout(&mut self, idx: usize) {
        self.dummy_layer = Some(store::new_layer(&self.store, idx, LayerInfo::named("$dummy")));
    }

    /// Creates the internal layout if there is none yet.
    pub(crate) fn ensure_layout(&mut self, dbu: f64) -> usize {
        if let Some(idx) = self.layout_index {
            return idx;
        }
        let idx = self.store.borrow_mut().add_layout(Layout::new(dbu), None);
        self.layout_index = Some(idx);
        self.pin_layout(idx);
        idx
    }

    fn layout_index(&self) -> Result<usize> {
        self.layout_index.ok_or(L2nError::NoInternalLayout)
    }

    pub fn owns_store(&self) -> bool {
        self.owns_store
    }

    pub fn shape_store(&self) -> &SharedStore {
        &self.store
    }

    pub fn internal_layout(&self) -> Result<Ref<'_, Layout>> {
        let idx = self.layout_index()?;
        Ok(Ref::map(self.store.borrow(), |s| s.layout(idx)))
    }

    pub fn internal_layout_mut(&self) -> Result<RefMut<'_, Layout>> {
        let idx = self.layout_index()?;
        Ok(RefMut::map(self.store.borrow_mut(), |s| s.layout_mut(idx)))
    }

    pub fn internal_top_cell(&self) -> Result<CellIndex> {
        let idx = self.layout_index()?;
        let s = self.store.borrow();
        s.top_cell(idx)
            .or_else(|| s.layout(idx).top_cell())
            .ok_or(L2nError::NoInternalLayout)
    }

    pub fn dbu(&self) -> f64 {
        self.internal_layout().map(|l| l.dbu).unwrap_or(0.001)
    }

    // ── configuration ──

    pub fn set_threads(&mut self, n: usize) -> &mut Self {
        self.store.borrow_mut().threads = n.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.store.borrow().threads
    }

    pub fn set_area_ratio(&mut self, r: f64) -> &mut Self {
        self.store.borrow_mut().max_area_ratio = r;
        self
    }

    pub fn area_ratio(&self) -> f64 {
        self.store.borrow().max_area_ratio
    }

    pub fn set_max_vertex_count(&mut self, n: usize) -> &mut Self {
        self.store.borrow_mut().max_vertex_count = n;
        self
    }

    pub fn max_vertex_count(&self) -> usize {
        self.store.borrow().max_vertex_count
    }

    pub fn set_device_scaling(&mut self, s: f64) -> &mut Self {
        self.device_scaling = s;
        self
    }

    pub fn device_scaling(&self) -> f64 {
        self.device_scaling
    }

    pub fn set_include_floating_subcircuits(&mut self, f: bool) -> &mut Self {
        self.include_floating_subcircuits = f;
        self
    }

    pub fn include_floating_subcircuits(&self) -> bool {
        self.include_floating_subcircuits
    }

    /// In top-level mode, must-connect problems at the top circuit are errors.
    pub fn set_top_level_mode(&mut self, f: bool) -> &mut Self {
        self.top_level_mode = f;
        self
    }

    pub fn top_level_mode(&self) -> bool {
        self.top_level_mode
    }

    // ── layer registry ──

    /// Creates a registered layer from a layer of the source layout.
    pub fn make_layer(&mut self, source_layer: u32, name: Option<&str>) -> Result<Region> {
        self.make_filtered_layer(source_layer, name, ShapeFilter::All)
    }

    pub fn make_polygon_layer(&mut self, source_layer: u32, name: Option<&str>) -> Result<Region> {
        self.make_filtered_layer(source_layer, name, ShapeFilter::Polygons)
    }

    pub fn make_text_layer(&mut self, source_layer: u32, name: Option<&str>) -> Result<Region> {
        self.make_filtered_layer(source_layer, name, ShapeFilter::Texts)
    }

    fn make_filtered_layer(&mut self, source_layer: u32, name: Option<&str>, filter: ShapeFilter) -> Result<Region> {
        let idx = self.ensure_layout(0.001);
        let name = match name {
            Some(n) => n.to_string(),
            None => self.make_new_name(),
        };
        if self.registry.by_name.contains_key(&name) {
            return Err(L2nError::LayerNameInUse(name));
        }
        let dl = store::import_layer(&self.store, idx, source_layer, filter);
        let region = Region::deep(dl.clone());
        self.registry.insert(Some(region.clone()), &name, dl);
        clilog::debug!("registered layer '{}' from source layer {}", name, source_layer);
        Ok(region)
    }

    fn make_new_name(&self) -> String {
        (1..)
            .map(|n| format!("l{}", n))
            .find(|n| !self.registry.by_name.contains_key(n))
            .unwrap_or_default()
    }

    /// Registers an external collection under a name. Flat collections are
    /// copied into the top cell of the internal layout.
    pub fn register_layer(&mut self, region: &Region, name: &str) -> Result<Region> {
        if let Some(existing) = self.registry.name_of(region) {
            return Err(L2nError::LayerAlreadyRegistered(existing.to_string()));
        }
        if self.registry.by_name.contains_key(name) {
            return Err(L2nError::LayerNameInUse(name.to_string()));
        }
        let idx = self.ensure_layout(0.001);
        let dl = match region.deep_layer() {
            Some(d) if d.belongs_to(&self.store, idx) => d.clone(),
            _ => store::import_flat(&self.store, idx, &region.flat_shapes()),
        };
        self.registry.insert(Some(region.clone()), name, dl.clone());
        Ok(Region::deep(dl))
    }

    /// Registers a fresh internal layer by name (used by readers).
    pub(crate) fn register_internal_layer(&mut self, name: &str, info: LayerInfo) -> Result<u32> {
        if self.registry.by_name.contains_key(name) {
            return Err(L2nError::LayerNameInUse(name.to_string()));
        }
        let idx = self.layout_index()?;
        let dl = store::new_layer(&self.store, idx, info);
        let layer = dl.layer();
        self.registry.insert(None, name, dl);
        Ok(layer)
    }

    fn ensure_registered(&mut self, region: &Region) -> Result<u32> {
        if let Some(name) = self.registry.name_of(region) {
            if let Some(dl) = self.registry.by_name.get(name) {
                return Ok(dl.layer());
            }
        }
        let name = self.make_new_name();
        self.register_layer(region, &name)?;
        self.layer_of(region).ok_or(L2nError::UnknownLayer(name))
    }

    pub fn layer_by_name(&self, name: &str) -> Option<Region> {
        self.registry.by_name.get(name).map(|dl| Region::deep(dl.clone()))
    }

    /// Registered layer by internal layer index.
    pub fn layer_by_index(&self, layer: u32) -> Option<Region> {
        self.registry.by_name.values().find(|d| d.layer() == layer).map(|d| Region::deep(d.clone()))
    }

    pub fn layer_name(&self, region: &Region) -> Option<String> {
        self.registry.name_of(region).map(str::to_string)
    }

    pub fn layer_name_of_index(&self, layer: u32) -> Option<&str> {
        self.registry.by_name.iter().find(|(_, d)| d.layer() == layer).map(|(n, _)| n.as_str())
    }

    /// Registered names in registration order.
    pub fn layer_names(&self) -> Vec<String> {
        self.registry.by_name.keys().cloned().collect()
    }

    /// (name, internal layer) pairs in registration order.
    pub fn layers(&self) -> Vec<(String, u32)> {
        self.registry.by_name.iter().map(|(n, d)| (n.clone(), d.layer())).collect()
    }

    pub fn is_persisted(&self, region: &Region) -> bool {
        self.registry.name_of(region).is_some()
    }

    /// Internal layer index of a registered collection.
    pub fn layer_of(&self, region: &Region) -> Option<u32> {
        let name = self.registry.name_of(region)?;
        self.registry.by_name.get(name).map(|d| d.layer())
    }

    fn require_layer(&self, region: &Region) -> Result<u32> {
        self.layer_of(region)
            .ok_or_else(|| L2nError::UnknownLayer(format!("collection with {} shapes", region.count())))
    }

    // ── connectivity ──

    /// Makes shapes of one layer connect among themselves.
    pub fn connect(&mut self, a: &Region) -> Result<()> {
        self.reset_extracted();
        let la = self.ensure_registered(a)?;
        self.conn.connect_self(la);
        Ok(())
    }

    /// Connects two layers.
    pub fn connect2(&mut self, a: &Region, b: &Region) -> Result<()> {
        self.reset_extracted();
        let la = self.ensure_registered(a)?;
        let lb = self.ensure_registered(b)?;
        self.conn.connect(la, lb);
        Ok(())
    }

    /// Binds a layer to a global net. Returns the global net id.
    pub fn connect_global(&mut self, a: &Region, net_name: &str) -> Result<usize> {
        self.reset_extracted();
        let la = self.ensure_registered(a)?;
        Ok(self.conn.connect_global(la, net_name))
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.conn
    }

    pub fn global_net_name(&self, id: usize) -> Option<&str> {
        self.conn.global_net_name(id)
    }

    pub fn global_net_id(&self, name: &str) -> Option<usize> {
        self.conn.global_net_id(name)
    }

    // ── join rules ──

    /// Joins nets of top circuits that carry the same name matching the pattern.
    pub fn join_net_names(&mut self, pattern: &str) -> Result<()> {
        compile_glob(pattern)?;
        self.join_net_names.push(pattern.to_string());
        Ok(())
    }

    /// Like [`Self::join_net_names`] for circuits whose name matches `cell_pattern`.
    pub fn join_net_names_in(&mut self, cell_pattern: &str, pattern: &str) -> Result<()> {
        compile_glob(cell_pattern)?;
        compile_glob(pattern)?;
        self.join_net_names_per_cell.push((cell_pattern.to_string(), pattern.to_string()));
        Ok(())
    }

    /// Joins the named nets of top circuits into one.
    pub fn join_nets(&mut self, names: &[&str]) {
        self.join_nets.push(names.iter().map(|s| s.to_string()).collect());
    }

    pub fn join_nets_in(&mut self, cell_pattern: &str, names: &[&str]) -> Result<()> {
        compile_glob(cell_pattern)?;
        self.join_nets_per_cell
            .push((cell_pattern.to_string(), names.iter().map(|s| s.to_string()).collect()));
        Ok(())
    }

    pub fn clear_join_net_names(&mut self) {
        self.join_net_names.clear();
        self.join_net_names_per_cell.clear();
    }

    pub fn clear_join_nets(&mut self) {
        self.join_nets.clear();
        self.join_nets_per_cell.clear();
    }

    // ── extraction ──

    pub fn state(&self) -> ExtractionState {
        self.state
    }

    pub fn is_extracted(&self) -> bool {
        self.state == ExtractionState::NetlistExtracted
    }

    /// Drops extraction results. No-op unless a netlist was extracted.
    pub fn reset_extracted(&mut self) {
        if self.state != ExtractionState::NetlistExtracted {
            return;
        }
        clilog::info!("connectivity changed, discarding extracted netlist");
        self.clusters.clear();
        self.netlist = None;
        self.terminal_shapes.clear();
        self.device_extractors_run.clear();
        self.log.clear();
        self.state = ExtractionState::Unextracted;
    }

    pub fn extract_devices(&mut self, extractor: &mut dyn DeviceExtractor) -> Result<()> {
        if self.state == ExtractionState::NetlistExtracted {
            return Err(L2nError::AlreadyExtracted);
        }
        let name = extractor.name().to_string();
        if self.device_extractors_run.contains(&name) {
            return Err(L2nError::DevicesAlreadyExtracted(name));
        }
        let idx = self.layout_index()?;
        let timer = clilog::stimer!("extract devices");
        let layers: BTreeMap<String, u32> = self.layers().into_iter().collect();
        let mut netlist = self.netlist.take().unwrap_or_default();
        let entries = {
            let mut s = self.store.borrow_mut();
            let mut ctx = DeviceExtractionContext::new(
                s.layout_mut(idx),
                &mut netlist,
                &layers,
                &mut self.terminal_shapes,
                self.device_scaling,
            );
            extractor.extract(&mut ctx)
        };
        let n: usize = netlist.circuits().map(|(_, c)| c.devices().len()).sum();
        self.netlist = Some(netlist);
        for e in entries {
            self.log.push(e);
        }
        self.device_extractors_run.insert(name.clone());
        self.state = ExtractionState::DevicesExtracted;
        clilog::info!("device extractor '{}': {} devices in total", name, n);
        clilog::finish!(timer);
        Ok(())
    }

    /// Forms nets, applies the join rules and completes extraction.
    pub fn extract_netlist(&mut self) -> Result<()> {
        if self.state == ExtractionState::NetlistExtracted {
            return Err(L2nError::AlreadyExtracted);
        }
        let idx = self.ensure_layout(0.001);
        let timer = clilog::stimer!("extract netlist");
        let mut netlist = self.netlist.take().unwrap_or_default();
        let threads = self.threads();
        let entries = {
            let s = self.store.borrow();
            let layout = s.layout(idx);
            self.clusters = HierClusters::build(layout, &self.conn, &self.terminal_shapes, threads);
            let mut ex = HierNetExtractor::new(NetExtractionOptions {
                include_floating_subcircuits: self.include_floating_subcircuits,
            });
            ex.extract_nets(layout, &self.clusters, &self.conn, &mut netlist)
        };
        for e in entries {
            self.log.push(e);
        }
        self.netlist = Some(netlist);
        self.do_join_nets()?;
        self.state = ExtractionState::NetlistExtracted;
        if let Some(nl) = &self.netlist {
            clilog::info!("extracted {} circuits with {} nets", nl.num_circuits(), nl.num_nets());
        }
        clilog::finish!(timer);
        Ok(())
    }

    pub fn netlist(&self) -> Option<&Netlist> {
        self.netlist.as_ref()
    }

    pub fn netlist_mut(&mut self) -> Option<&mut Netlist> {
        self.netlist.as_mut()
    }

    fn extracted_netlist(&self) -> Result<&Netlist> {
        match (&self.netlist, self.state) {
            (Some(nl), ExtractionState::NetlistExtracted) => Ok(nl),
            _ => Err(L2nError::NotExtracted),
        }
    }

    pub fn clusters(&self) -> &HierClusters {
        &self.clusters
    }

    // ── net joining ──

    fn do_join_nets(&mut self) -> Result<()> {
        if self.joining {
            return Err(L2nError::JoinInProgress);
        }
        self.joining = true;
        let r = self.apply_join_rules();
        self.joining = false;
        r
    }

    fn apply_join_rules(&mut self) -> Result<()> {
        let (tops, order) = match &self.netlist {
            Some(nl) => (nl.top_circuits(), nl.top_down_order()),
            None => return Ok(()),
        };
        let global_patterns: Vec<GlobMatcher> =
            self.join_net_names.iter().map(|p| compile_glob(p)).collect::<Result<_>>()?;
        let global_sets = self.join_nets.clone();
        let cell_patterns: Vec<(GlobMatcher, GlobMatcher)> = self
            .join_net_names_per_cell
            .iter()
            .map(|(c, p)| Ok((compile_glob(c)?, compile_glob(p)?)))
            .collect::<Result<_>>()?;
        let cell_sets: Vec<(GlobMatcher, BTreeSet<String>)> = self
            .join_nets_per_cell
            .iter()
            .map(|(c, s)| Ok((compile_glob(c)?, s.clone())))
            .collect::<Result<_>>()?;

        for &c in &tops {
            for m in &global_patterns {
                self.join_nets_by_pattern(c, m);
            }
        }
        for &c in &tops {
            for s in &global_sets {
                self.join_net_set(c, s);
            }
        }
        for (cm, m) in &cell_patterns {
            for &c in &order {
                if self.circuit_name_matches(c, cm) {
                    self.join_nets_by_pattern(c, m);
                }
            }
        }
        for (cm, s) in &cell_sets {
            for &c in &order {
                if self.circuit_name_matches(c, cm) {
                    self.join_net_set(c, s);
                }
            }
        }
        Ok(())
    }

    fn circuit_name_matches(&self, c: CircuitId, m: &GlobMatcher) -> bool {
        self.netlist.as_ref().is_some_and(|nl| m.is_match(&nl.circuit(c).name))
    }

    fn join_nets_by_pattern(&mut self, c: CircuitId, m: &GlobMatcher) {
        let Some(nl) = &self.netlist else {
            return;
        };
        let mut groups: IndexMap<String, Vec<NetId>> = IndexMap::new();
        for (id, n) in nl.circuit(c).nets() {
            if !n.name.is_empty() && m.is_match(&n.name) {
                groups.entry(n.name.clone()).or_default().push(id);
            }
        }
        for ids in groups.into_values().filter(|v| v.len() > 1) {
            for &other in &ids[1..] {
                self.join_two_nets(c, ids[0], other);
            }
        }
    }

    fn join_net_set(&mut self, c: CircuitId, names: &BTreeSet<String>) {
        let Some(nl) = &self.netlist else {
            return;
        };
        let ids: Vec<NetId> = nl.circuit(c).nets().filter(|(_, n)| names.contains(&n.name)).map(|(i, _)| i).collect();
        if ids.len() > 1 {
            for &other in &ids[1..] {
                self.join_two_nets(c, ids[0], other);
            }
        }
    }

    fn join_two_nets(&mut self, c: CircuitId, a: NetId, b: NetId) {
        self.check_must_connect(c, a, b);
        let Some(nl) = self.netlist.as_mut() else {
            return;
        };
        let circuit = nl.circuit(c);
        let ca = circuit.net(a).map(|n| n.cluster_id).unwrap_or(0);
        let cb = circuit.net(b).map(|n| n.cluster_id).unwrap_or(0);
        if let Some(cell) = circuit.cell_index {
            if ca != 0 && cb != 0 {
                self.clusters.join_cluster_with(cell, ca, cb);
            }
        }
        nl.join_nets(c, a, b);
    }

    /// Records diagnostics if joining `a` and `b` inside circuit `c` needs
    /// wiring that is not there. Only the first pin of each net is followed.
    fn check_must_connect(&mut self, c: CircuitId, a: NetId, b: NetId) {
        let Some(nl) = &self.netlist else {
            return;
        };
        let (dbu, bboxes) = match self.internal_layout() {
            Ok(l) => (l.dbu, l.bboxes()),
            Err(_) => (0.001, Vec::new()),
        };
        let severity_at_top = if self.top_level_mode { Severity::Error } else { Severity::Warning };
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(c, a, b)];
        while let Some((c, a, b)) = stack.pop() {
            if a == b || !seen.insert((c, a, b)) {
                continue;
            }
            let circuit = nl.circuit(c);
            let (na, nb) = (circuit.net_expanded_name(a), circuit.net_expanded_name(b));
            let parents = nl.parents(c);
            if parents.is_empty() {
                let msg = if self.top_level_mode {
                    format!("Must-connect nets {} and {} must be connected further up in the hierarchy - this is an error at chip top level", na, nb)
                } else {
                    format!("Must-connect nets {} and {} are not connected here and must be connected further up in the hierarchy", na, nb)
                };
                entries.push(
                    LogEntryData::new(severity_at_top, msg)
                        .with_cell(circuit.name.clone())
                        .with_category(MUST_CONNECT_CATEGORY, MUST_CONNECT_DESCRIPTION),
                );
                continue;
            }
            let pa = circuit.net(a).and_then(|n| n.pins.first().copied());
            let pb = circuit.net(b).and_then(|n| n.pins.first().copied());
            for (pin, name) in [(pa, &na), (pb, &nb)] {
                if pin.is_none() {
                    entries.push(
                        LogEntryData::new(
                            Severity::Error,
                            format!("Must-connect net {} is not connected to outside and cannot be joined further up", name),
                        )
                        .with_cell(circuit.name.clone())
                        .with_category(MUST_CONNECT_CATEGORY, MUST_CONNECT_DESCRIPTION),
                    );
                }
            }
            let (Some(pa), Some(pb)) = (pa, pb) else {
                continue;
            };
            for (pc, sc) in parents {
                let parent = nl.circuit(pc);
                let Some(s) = parent.subcircuit(sc) else {
                    continue;
                };
                match (s.net_for_pin(pa), s.net_for_pin(pb)) {
                    (Some(x), Some(y)) if x != y => stack.push((pc, x, y)),
                    (Some(_), None) | (None, Some(_)) => {
                        let mut e = LogEntryData::new(
                            Severity::Error,
                            format!(
                                "Must-connect nets {} and {} of circuit {} are not connected at instance {} (one of them is left open)",
                                na,
                                nb,
                                circuit.name,
                                crate::netlist::expanded_name(&s.name, sc)
                            ),
                        )
                        .with_cell(parent.name.clone())
                        .with_category(MUST_CONNECT_CATEGORY, MUST_CONNECT_DESCRIPTION);
                        if let Some(bb) = circuit.cell_index.and_then(|ci| bboxes.get(ci)) {
                            if !bb.is_empty() {
                                e = e.with_geometry(DPolygon::from_rect(&bb.transformed(&s.trans), dbu));
                            }
                        }
                        entries.push(e);
                    }
                    _ => {}
                }
            }
        }
        for e in entries {
            self.log.push(e);
        }
    }

    // ── low-level cluster edits ──

    /// Joins the cluster of `with` into the cluster of `net`. The netlist is not touched.
    pub fn link_nets(&mut self, circuit: CircuitId, net: NetId, with: NetId) -> Result<()> {
        let nl = self.extracted_netlist()?;
        let c = nl.circuit(circuit);
        let (Some(cell), Some(a), Some(b)) = (c.cell_index, c.net(net), c.net(with)) else {
            return Ok(());
        };
        let (ca, cb) = (a.cluster_id, b.cluster_id);
        self.clusters.join_cluster_with(cell, ca, cb);
        Ok(())
    }

    /// Creates a cluster in the parent cell connected to the net's cluster
    /// through `trans`. Returns the new parent cluster id.
    pub fn link_net_to_parent_circuit(
        &mut self,
        circuit: CircuitId,
        net: NetId,
        parent: CircuitId,
        trans: CplxTrans,
    ) -> Result<ClusterId> {
        let nl = self.extracted_netlist()?;
        let c = nl.circuit(circuit);
        let (Some(cell), Some(pcell), Some(n)) = (c.cell_index, nl.circuit(parent).cell_index, c.net(net)) else {
            return Err(L2nError::NoInternalLayout);
        };
        let child = ClusterInstance { cell, trans, inst_index: None, cluster_id: n.cluster_id };
        Ok(self.clusters.link_to_parent(pcell, child))
    }

    // ── queries ──

    /// Flattened polygons of a net on one layer, in the circuit's cell coordinates.
    pub fn shapes_of_net(&self, circuit: CircuitId, net: NetId, layer: &Region, recursive: bool) -> Result<Vec<Polygon>> {
        let nl = self.extracted_netlist()?;
        let l = self.require_layer(layer)?;
        let c = nl.circuit(circuit);
        let (Some(cell), Some(n)) = (c.cell_index, c.net(net)) else {
            return Ok(Vec::new());
        };
        let layout = self.internal_layout()?;
        Ok(self
            .clusters
            .cluster_shapes(&layout, cell, n.cluster_id, Some(l), recursive)
            .into_iter()
            .filter_map(|(_, g)| match g {
                Geometry::Polygon(p) => Some(p),
                Geometry::Text(_) => None,
            })
            .collect())
    }

    /// Merged area (µm²) and perimeter (µm) of a net on one layer.
    pub fn net_area_and_perimeter(&self, circuit: CircuitId, net: NetId, layer: &Region) -> Result<(f64, f64)> {
        let polys = self.shapes_of_net(circuit, net, layer, true)?;
        let dbu = self.dbu();
        let r = merge_polygons(&polys);
        Ok((r.area * dbu * dbu, r.perimeter * dbu))
    }

    /// Finds the net at a point (dbu, top cell coordinates) on a layer.
    pub fn probe_net(&self, layer: &Region, point: Point) -> Result<Option<ProbeResult>> {
        let nl = self.extracted_netlist()?;
        let l = self.require_layer(layer)?;
        let top = self.internal_top_cell()?;
        let layout = self.internal_layout()?;
        let bboxes = layout.bboxes();
        let device_cells = nl.device_cells();
        let probe = Geometry::from(Rect::new(point.x, point.y, point.x + 1, point.y + 1));

        // top-down search, first hit wins
        let mut stack: Vec<(CellIndex, CplxTrans, Vec<(CellIndex, usize)>)> = vec![(top, CplxTrans::identity(), Vec::new())];
        let mut hit: Option<(CellIndex, ClusterId, Vec<(CellIndex, usize)>)> = None;
        while let Some((ci, t, path)) = stack.pop() {
            let local_probe = probe.transformed(&t.inverted());
            let pbox = local_probe.bbox();
            let cell = layout.cell(ci);
            let found = self.clusters.clusters_per_cell(ci).iter().find(|c| {
                c.shapes().iter().any(|(&cl, idx)| {
                    self.conn.interacts(l, cl)
                        && idx.iter().any(|&i| {
                            cell.shapes(cl).get(i).is_some_and(|s| {
                                s.geometry.bbox().touches(&pbox) && s.geometry.interacts(&local_probe)
                            })
                        })
                })
            });
            if let Some(c) = found {
                hit = Some((ci, c.id(), path));
                break;
            }
            for (ii, inst) in cell.instances().iter().enumerate().rev() {
                if device_cells.contains(&inst.cell_index) {
                    continue;
                }
                if bboxes[inst.cell_index].transformed(&inst.trans).touches(&pbox) {
                    let mut p = path.clone();
                    p.push((ci, ii));
                    stack.push((inst.cell_index, t * inst.trans, p));
                }
            }
        }
        let Some((mut cell, mut cluster, path)) = hit else {
            return Ok(None);
        };

        let net_at = |cell: CellIndex, cluster: ClusterId| {
            nl.circuit_by_cell(cell).and_then(|c| nl.circuit(c).net_by_cluster_id(cluster).map(|n| (c, n)))
        };
        let mut topmost = net_at(cell, cluster).map(|r| (r, path.len()));
        for level in (0..path.len()).rev() {
            let (parent, inst) = path[level];
            let up = self.clusters.clusters_per_cell(parent).find_cluster_with_connection(inst, cluster);
            if up == 0 {
                break;
            }
            cell = parent;
            cluster = up;
            if let Some(r) = net_at(cell, cluster) {
                topmost = Some((r, level));
            }
        }
        let Some(((circuit, net), depth)) = topmost else {
            return Ok(None);
        };

        let mut sc_path = Vec::new();
        for &(parent, inst) in &path[..depth] {
            let Some(pc) = nl.circuit_by_cell(parent) else {
                break;
            };
            let i = &layout.cell(parent).instances()[inst];
            let Some(child) = nl.circuit_by_cell(i.cell_index) else {
                break;
            };
            match nl
                .circuit(pc)
                .subcircuits()
                .iter()
                .position(|s| s.circuit == child && s.trans == i.trans)
            {
                Some(sc) => sc_path.push((pc, sc)),
                None => break,
            }
        }
        Ok(Some(ProbeResult { circuit, net, path: sc_path }))
    }

    /// Probe with a point in microns.
    pub fn probe_net_um(&self, layer: &Region, x: f64, y: f64) -> Result<Option<ProbeResult>> {
        let dbu = self.dbu();
        self.probe_net(layer, Point::new((x / dbu).round() as i64, (y / dbu).round() as i64))
    }

    /// Antenna check.
    ///
    /// For every root cluster the merged gate and metal areas are computed
    /// (effective area = area * area factor + perimeter * perimeter factor,
    /// in µm units). A cluster violates if `metal / gate` exceeds `ratio`
    /// raised by `weight * diode area` for each diode layer. A diode layer with
    /// weight 0 touching the cluster suppresses the check for that cluster.
    ///
    /// Returns the merged violating metal and the merged gate geometry of
    /// violating clusters as new layers.
    #[allow(clippy::too_many_arguments)]
    pub fn antenna_check(
        &mut self,
        gate: &Region,
        gate_area_factor: f64,
        gate_perimeter_factor: f64,
        metal: &Region,
        metal_area_factor: f64,
        metal_perimeter_factor: f64,
        ratio: f64,
        diodes: &[(Region, f64)],
        values: bool,
    ) -> Result<(Region, Region)> {
        self.extracted_netlist()?;
        let gl = self.require_layer(gate)?;
        let ml = self.require_layer(metal)?;
        let dl: Vec<(u32, f64)> =
            diodes.iter().map(|(r, w)| Ok((self.require_layer(r)?, *w))).collect::<Result<_>>()?;
        let idx = self.layout_index()?;
        let timer = clilog::stimer!("antenna check");
        let out_metal = store::new_layer(&self.store, idx, LayerInfo::named("antenna"));
        let out_gate = store::new_layer(&self.store, idx, LayerInfo::named("antenna_gate"));

        let mut violations: Vec<(CellIndex, Vec<Polygon>, Vec<Polygon>, [f64; 3])> = Vec::new();
        {
            let layout = self.internal_layout()?;
            let dbu = layout.dbu;
            for ci in layout.bottom_up_order() {
                for c in self.clusters.clusters_per_cell(ci).iter() {
                    if !self.clusters.is_root(ci, c.id()) {
                        continue;
                    }
                    let polys_on = |l: u32| -> Vec<Polygon> {
                        self.clusters
                            .cluster_shapes(&layout, ci, c.id(), Some(l), true)
                            .into_iter()
                            .filter_map(|(_, g)| g.as_polygon().cloned())
                            .collect()
                    };
                    let gate_polys = polys_on(gl);
                    if gate_polys.is_empty() {
                        continue;
                    }
                    let g = merge_polygons(&gate_polys);
                    let agate = g.area * dbu * dbu * gate_area_factor + g.perimeter * dbu * gate_perimeter_factor;
                    if agate < 1e-12 {
                        continue;
                    }
                    let metal_polys = polys_on(ml);
                    let m = merge_polygons(&metal_polys);
                    let ametal = m.area * dbu * dbu * metal_area_factor + m.perimeter * dbu * metal_perimeter_factor;

                    let mut r = ratio;
                    let mut skip = false;
                    for &(l, weight) in &dl {
                        let d = merge_polygons(&polys_on(l));
                        let darea = d.area * dbu * dbu;
                        if weight == 0.0 {
                            if darea > 0.0 {
                                skip = true;
                                break;
                            }
                        } else {
                            r += weight * darea;
                        }
                    }
                    if skip {
                        continue;
                    }
                    if ametal / agate > r + 1e-10 {
                        violations.push((ci, m.polygons, g.polygons, [agate, ametal, ametal / agate]));
                    }
                }
            }
        }

        let n = violations.len();
        {
            let mut layout = self.internal_layout_mut()?;
            for (ci, metal_polys, gate_polys, v) in violations {
                let prop_id = if values {
                    layout.properties.intern(vec![
                        (PropValue::from("AGATE"), PropValue::Float(v[0])),
                        (PropValue::from("AMETAL"), PropValue::Float(v[1])),
                        (PropValue::from("RATIO"), PropValue::Float(v[2])),
                    ])
                } else {
                    0
                };
                let cell = layout.cell_mut(ci);
                for p in metal_polys {
                    cell.insert(out_metal.layer(), Shape::with_props(p, prop_id));
                }
                for p in gate_polys {
                    cell.insert(out_gate.layer(), Shape::new(p));
                }
            }
        }
        clilog::info!("antenna check: {} violating nets", n);
        clilog::finish!(timer);
        Ok((Region::deep(out_metal), Region::deep(out_gate)))
    }

    // ── cell mapping ──

    /// Internal cells needed to hold the given nets: their circuit cells and all callers.
    fn cells_for_nets(&self, layout: &Layout, nets: &[(CircuitId, NetId)]) -> Result<BTreeSet<CellIndex>> {
        let nl = self.extracted_netlist()?;
        let mut cells = BTreeSet::new();
        for &(c, _) in nets {
            if let Some(ci) = nl.circuit(c).cell_index {
                cells.insert(ci);
                cells.extend(layout.caller_cells(ci));
            }
        }
        Ok(cells)
    }

    fn selected_cells(&self, layout: &Layout, nets: Option<&[(CircuitId, NetId)]>, with_device_cells: bool) -> Result<Vec<CellIndex>> {
        let top = self.internal_top_cell()?;
        let device_cells = self.netlist.as_ref().map(|n| n.device_cells()).unwrap_or_default();
        let restrict = match nets {
            Some(n) => Some(self.cells_for_nets(layout, n)?),
            None => None,
        };
        let below: BTreeSet<CellIndex> = layout.called_cells(top);
        Ok(layout
            .top_down_order()
            .into_iter()
            .filter(|c| *c != top && below.contains(c))
            .filter(|c| with_device_cells || !device_cells.contains(c))
            .filter(|c| restrict.as_ref().map_or(true, |r| r.contains(c)))
            .collect())
    }

    /// Maps internal cells to cells of `target` by name. Missing cells are
    /// created and instantiated like in the internal layout.
    pub fn cell_mapping_into(
        &self,
        target: &mut Layout,
        target_top: CellIndex,
        nets: Option<&[(CircuitId, NetId)]>,
        with_device_cells: bool,
    ) -> Result<CellMapping> {
        let layout = self.internal_layout()?;
        let top = self.internal_top_cell()?;
        let cells = self.selected_cells(&layout, nets, with_device_cells)?;
        let mut cm = CellMapping::new();
        cm.insert(top, target_top);
        let mut created = BTreeSet::new();
        for &c in &cells {
            let name = layout.cell_name(c);
            let t = match target.cell_by_name(name) {
                Some(t) => t,
                None => {
                    created.insert(c);
                    target.add_cell(name)
                }
            };
            cm.insert(c, t);
        }
        for (from, to) in cm.iter().collect::<Vec<_>>() {
            for inst in layout.cell(from).instances() {
                if created.contains(&inst.cell_index) {
                    if let Some(child) = cm.get(inst.cell_index) {
                        target.cell_mut(to).insert_instance(Instance::new(child, inst.trans));
                    }
                }
            }
        }
        clilog::debug!("cell mapping: {} cells mapped, {} created", cm.len(), created.len());
        Ok(cm)
    }

    /// Maps internal cells to existing cells of `target` by name.
    pub fn const_cell_mapping_into(
        &self,
        target: &Layout,
        target_top: CellIndex,
        with_device_cells: bool,
    ) -> Result<CellMapping> {
        let layout = self.internal_layout()?;
        let top = self.internal_top_cell()?;
        let mut cm = CellMapping::new();
        cm.insert(top, target_top);
        for c in self.selected_cells(&layout, None, with_device_cells)? {
            if let Some(t) = target.cell_by_name(layout.cell_name(c)) {
                cm.insert(c, t);
            }
        }
        Ok(cm)
    }

    // ── net reconstruction ──

    fn internal_lmap(&self, lmap: &BTreeMap<u32, Region>) -> Result<BTreeMap<u32, u32>> {
        lmap.iter().map(|(&t, r)| Ok((t, self.require_layer(r)?))).collect()
    }

    /// Rebuilds one net into `target_cell`.
    pub fn build_net(
        &self,
        circuit: CircuitId,
        net: NetId,
        target: &mut Layout,
        target_cell: CellIndex,
        lmap: &BTreeMap<u32, Region>,
        options: &NetBuilderOptions,
    ) -> Result<()> {
        let lmap = self.internal_lmap(lmap)?;
        let mut b = NetBuilder::new(self, CellMapping::new(), options.clone())?;
        b.build_net(target, target_cell, &lmap, circuit, net)
    }

    /// Rebuilds all nets through a cell mapping.
    pub fn build_all_nets(
        &self,
        cmap: &CellMapping,
        target: &mut Layout,
        lmap: &BTreeMap<u32, Region>,
        options: &NetBuilderOptions,
    ) -> Result<()> {
        let lmap = self.internal_lmap(lmap)?;
        let mut b = NetBuilder::new(self, cmap.clone(), options.clone())?;
        b.build_all_nets(target, &lmap)
    }

    /// Rebuilds a subset of nets through a cell mapping.
    pub fn build_nets(
        &self,
        nets: &[(CircuitId, NetId)],
        cmap: &CellMapping,
        target: &mut Layout,
        lmap: &BTreeMap<u32, Region>,
        options: &NetBuilderOptions,
    ) -> Result<()> {
        let lmap = self.internal_lmap(lmap)?;
        let mut b = NetBuilder::new(self, cmap.clone(), options.clone())?;
        b.build_nets(target, &lmap, Some(nets))
    }

    // ── log ──

    pub fn log_entries(&self) -> &LogStore {
        &self.log
    }

    pub fn log_entry(&mut self, e: LogEntryData) {
        self.log.push(e);
    }

    pub fn has_errors(&self) -> bool {
        self.log.has_errors()
    }

    /// Fails with a summary if errors were logged during extraction.
    pub fn check_extraction_errors(&self) -> Result<()> {
        let errors: Vec<LogEntryData> = self.log.iter().filter(|e| e.severity == Severity::Error).collect();
        if errors.is_empty() {
            return Ok(());
        }
        let mut msg = String::from("Errors encountered during netlist extraction:");
        for e in errors.iter().take(MAX_LISTED_ERRORS) {
            msg.push_str("\n  ");
            msg.push_str(&e.to_string());
        }
        if errors.len() > MAX_LISTED_ERRORS {
            msg.push_str("\n  ...(list shortened)");
        }
        Err(L2nError::Extraction(msg))
    }

    // ── persistence ──

    /// Writes an L2N database.
    pub fn save(&self, path: impl AsRef<Path>, short: bool) -> Result<()> {
        let path = path.as_ref();
        let text = crate::format::write_l2n(self, short);
        std::fs::write(path, text).map_err(|e| FormatError::Io(format!("{}: {}", path.display(), e)))?;
        clilog::info!("wrote L2N database {}", path.display());
        Ok(())
    }

    /// Reads an L2N database.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FormatError::Io(format!("{}: {}", path.display(), e)))?;
        let mut l2n = crate::format::read_l2n(&text, &path.display().to_string())?;
        l2n.filename = path.display().to_string();
        Ok(l2n)
    }

    /// Resets everything read from a file before reading into this object.
    pub(crate) fn clear_for_reading(&mut self) {
        self.registry.clear();
        self.conn = Connectivity::new();
        self.netlist = None;
        self.clusters.clear();
        self.terminal_shapes.clear();
        self.log.clear();
        self.state = ExtractionState::Unextracted;
    }

    pub(crate) fn set_extracted(&mut self) {
        self.state = ExtractionState::NetlistExtracted;
    }
}

/// Merges polygons after reserving room for their vertices.
pub(crate) fn merge_polygons(polys: &[Polygon]) -> crate::geom::merge::MergeResult {
    let mut m = PolygonMerger::new();
    m.reserve(polys.iter().map(|p| p.num_points()).sum());
    for p in polys {
        m.insert(p);
    }
    m.merge()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PlateCapacitorExtractor;
    use crate::geom::Text;

    const M1: u32 = 0;
    const M2: u32 = 1;
    const VIA: u32 = 2;

    /// TOP places SUB twice. SUB has two separate m1 stripes labelled VDD.
    fn source_layout(bridge_both: bool) -> ShapeIterator {
        let mut ly = Layout::new(0.001);
        ly.insert_layer(LayerInfo::new(1, 0));
        ly.insert_layer(LayerInfo::new(2, 0));
        ly.insert_layer(LayerInfo::new(3, 0));
        let top = ly.add_cell("TOP");
        let sub = ly.add_cell("SUB");
        let s = ly.cell_mut(sub);
        s.insert(M1, Shape::new(Rect::new(0, 0, 1000, 100)));
        s.insert(M1, Shape::new(Text::new("VDD", Point::new(10, 50))));
        s.insert(M1, Shape::new(Rect::new(0, 900, 1000, 1000)));
        s.insert(M1, Shape::new(Text::new("VDD", Point::new(10, 950))));
        ly.cell_mut(top).insert_instance(Instance::new(sub, CplxTrans::identity()));
        let t = ly.cell_mut(top);
        if bridge_both {
            t.insert(M2, Shape::new(Rect::new(400, 0, 500, 1000)));
        } else {
            t.insert(M2, Shape::new(Rect::new(400, 0, 500, 500)));
        }
        ShapeIterator::new(Rc::new(ly), top)
    }

    fn extracted(bridge_both: bool, setup: impl FnOnce(&mut LayoutToNetlist)) -> (LayoutToNetlist, Region, Region) {
        let mut l2n = LayoutToNetlist::from_iter(&source_layout(bridge_both)).unwrap();
        let m1 = l2n.make_polygon_layer(M1, Some("m1")).unwrap();
        let m1t = l2n.make_text_layer(M1, Some("m1_lbl")).unwrap();
        let m2 = l2n.make_polygon_layer(M2, Some("m2")).unwrap();
        l2n.connect(&m1).unwrap();
        l2n.connect(&m2).unwrap();
        l2n.connect2(&m1, &m2).unwrap();
        l2n.connect2(&m1, &m1t).unwrap();
        setup(&mut l2n);
        l2n.extract_netlist().unwrap();
        (l2n, m1, m2)
    }

    #[test]
    fn test_clipped_iterator_is_rejected() {
        let it = source_layout(true).with_region(Rect::new(0, 0, 10, 10));
        assert!(matches!(LayoutToNetlist::from_iter(&it), Err(L2nError::ClippedIterator)));
    }

    #[test]
    fn test_layer_registration() {
        let mut l2n = LayoutToNetlist::from_iter(&source_layout(true)).unwrap();
        let m1 = l2n.make_polygon_layer(M1, Some("m1")).unwrap();
        assert!(matches!(l2n.register_layer(&m1, "other"), Err(L2nError::LayerAlreadyRegistered(_))));
        assert!(matches!(l2n.make_layer(M2, Some("m1")), Err(L2nError::LayerNameInUse(_))));
        let flat = Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 5, 5))]);
        assert!(!l2n.is_persisted(&flat));
        l2n.connect(&flat).unwrap();
        assert!(l2n.is_persisted(&flat));
        assert_eq!(l2n.layer_names(), vec!["m1".to_string(), "l1".to_string()]);
        assert_eq!(l2n.layer_name(&m1).as_deref(), Some("m1"));
        let again = l2n.layer_by_name("m1").unwrap();
        assert_eq!(l2n.layer_of(&again), l2n.layer_of(&m1));
    }

    #[test]
    fn test_lifecycle() {
        let (mut l2n, m1, _) = extracted(true, |_| {});
        assert!(matches!(l2n.extract_netlist(), Err(L2nError::AlreadyExtracted)));
        assert!(l2n.is_extracted());
        l2n.connect(&m1).unwrap();
        assert_eq!(l2n.state(), ExtractionState::Unextracted);
        assert!(l2n.netlist().is_none());
        l2n.extract_netlist().unwrap();
        assert!(l2n.is_extracted());
    }

    #[test]
    fn test_join_at_common_ancestor_is_silent() {
        let (l2n, _, _) = extracted(true, |l| l.join_net_names_in("SUB", "VDD").unwrap());
        let nl = l2n.netlist().unwrap();
        let sub = nl.circuit(nl.circuit_by_name("SUB").unwrap());
        assert_eq!(sub.num_nets(), 1);
        assert!(l2n.log_entries().is_empty());
        assert!(l2n.check_extraction_errors().is_ok());
    }

    #[test]
    fn test_must_connect_violation_is_reported() {
        let (l2n, _, _) = extracted(false, |l| l.join_net_names_in("SUB", "VDD").unwrap());
        let nl = l2n.netlist().unwrap();
        let sub = nl.circuit(nl.circuit_by_name("SUB").unwrap());
        // the join still happens
        assert_eq!(sub.num_nets(), 1);
        assert!(l2n.has_errors());
        let e = l2n.log_entries().iter().next().unwrap();
        assert_eq!(e.category_name, "must-connect");
        assert!(l2n.check_extraction_errors().is_err());
    }

    fn two_labelled_boxes(top_level: bool) -> LayoutToNetlist {
        let mut l2n = LayoutToNetlist::flat("TOP", 0.001);
        let m1 = Region::from_polygons([
            Polygon::from_rect(&Rect::new(0, 0, 100, 100)),
            Polygon::from_rect(&Rect::new(500, 0, 600, 100)),
        ]);
        let lbl = Region::from_texts([Text::new("A", Point::new(50, 50)), Text::new("B", Point::new(550, 50))]);
        l2n.connect(&m1).unwrap();
        l2n.connect2(&m1, &lbl).unwrap();
        l2n.join_nets(&["A", "B"]);
        l2n.set_top_level_mode(top_level);
        l2n.extract_netlist().unwrap();
        l2n
    }

    #[test]
    fn test_join_at_top_warns() {
        let l2n = two_labelled_boxes(false);
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit(nl.circuit_by_name("TOP").unwrap());
        assert_eq!(top.num_nets(), 1);
        assert_eq!(l2n.log_entries().len(), 1);
        let e = l2n.log_entries().iter().next().unwrap();
        assert_eq!(e.severity, Severity::Warning);
        assert!(e.message.contains("further up in the hierarchy"));
        assert!(!l2n.has_errors());

        let l2n = two_labelled_boxes(true);
        assert!(l2n.has_errors());
        assert!(l2n.check_extraction_errors().is_err());
    }

    #[test]
    fn test_probe_returns_topmost_net() {
        let (l2n, m1, m2) = extracted(true, |_| {});
        let r = l2n.probe_net(&m1, Point::new(100, 50)).unwrap().unwrap();
        let nl = l2n.netlist().unwrap();
        assert_eq!(nl.circuit(r.circuit).name, "TOP");
        assert!(r.path.is_empty());
        let r2 = l2n.probe_net(&m2, Point::new(450, 500)).unwrap().unwrap();
        assert_eq!((r2.circuit, r2.net), (r.circuit, r.net));
        assert!(l2n.probe_net(&m1, Point::new(5000, 5000)).unwrap().is_none());
    }

    #[test]
    fn test_probe_stops_at_unconnected_level() {
        let (l2n, m1, _) = extracted(false, |_| {});
        let r = l2n.probe_net(&m1, Point::new(100, 950)).unwrap().unwrap();
        let nl = l2n.netlist().unwrap();
        assert_eq!(nl.circuit(r.circuit).name, "SUB");
        assert_eq!(r.path.len(), 1);
    }

    #[test]
    fn test_shapes_and_area_of_net() {
        let (l2n, m1, m2) = extracted(true, |_| {});
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        let net = nl.circuit(top).nets().next().unwrap().0;
        assert_eq!(l2n.shapes_of_net(top, net, &m1, true).unwrap().len(), 2);
        assert!(l2n.shapes_of_net(top, net, &m1, false).unwrap().is_empty());
        let (a, p) = l2n.net_area_and_perimeter(top, net, &m2).unwrap();
        assert!((a - 0.1).abs() < 1e-9);
        assert!((p - 2.2).abs() < 1e-9);
    }

    fn antenna_setup() -> (LayoutToNetlist, Region, Region, Region) {
        let mut l2n = LayoutToNetlist::flat("TOP", 0.001);
        let gate = Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 1000, 1000))]);
        let metal = Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 10000, 1000))]);
        let diode = Region::from_polygons([Polygon::from_rect(&Rect::new(9000, 0, 10000, 1000))]);
        let gate = l2n.register_layer(&gate, "gate").unwrap();
        let metal = l2n.register_layer(&metal, "metal").unwrap();
        let diode = l2n.register_layer(&diode, "diode").unwrap();
        l2n.connect(&gate).unwrap();
        l2n.connect(&metal).unwrap();
        l2n.connect(&diode).unwrap();
        l2n.connect2(&gate, &metal).unwrap();
        l2n.connect2(&diode, &metal).unwrap();
        l2n.extract_netlist().unwrap();
        (l2n, gate, metal, diode)
    }

    #[test]
    fn test_antenna_ratio_is_monotonic() {
        let (mut l2n, gate, metal, _) = antenna_setup();
        let (v5, g5) = l2n.antenna_check(&gate, 1.0, 0.0, &metal, 1.0, 0.0, 5.0, &[], true).unwrap();
        assert_eq!(v5.count(), 1);
        assert_eq!(g5.count(), 1);
        let (v20, _) = l2n.antenna_check(&gate, 1.0, 0.0, &metal, 1.0, 0.0, 20.0, &[], false).unwrap();
        assert!(v20.is_empty());
        let layout = l2n.internal_layout().unwrap();
        let top = l2n.internal_top_cell().unwrap();
        let shape = &layout.cell(top).shapes(v5.deep_layer().unwrap().layer())[0];
        match layout.properties.value(shape.prop_id, &PropValue::from("RATIO")) {
            Some(PropValue::Float(r)) => assert!((r - 10.0).abs() < 1e-6),
            other => panic!("unexpected RATIO value {:?}", other),
        }
    }

    #[test]
    fn test_antenna_diodes() {
        let (mut l2n, gate, metal, diode) = antenna_setup();
        let (v, _) = l2n
            .antenna_check(&gate, 1.0, 0.0, &metal, 1.0, 0.0, 5.0, &[(diode.clone(), 0.0)], false)
            .unwrap();
        assert!(v.is_empty());
        // diode area 1 µm² with weight 10 raises the ratio to 15
        let (v, _) = l2n
            .antenna_check(&gate, 1.0, 0.0, &metal, 1.0, 0.0, 5.0, &[(diode, 10.0)], false)
            .unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn test_extraction_error_summary_is_capped() {
        let mut l2n = LayoutToNetlist::new();
        for i in 0..12 {
            l2n.log_entry(LogEntryData::new(Severity::Error, format!("problem {}", i)));
        }
        let Err(L2nError::Extraction(msg)) = l2n.check_extraction_errors() else {
            panic!("expected an extraction error");
        };
        assert_eq!(msg.lines().count(), 1 + MAX_LISTED_ERRORS + 1);
        assert!(msg.ends_with("...(list shortened)"));
    }

    #[test]
    fn test_devices_and_repeated_extractor() {
        let mut l2n = LayoutToNetlist::flat("TOP", 0.001);
        l2n.register_layer(&Region::from_polygons([Polygon::from_rect(&Rect::new(0, 0, 1000, 1000))]), "cap")
            .unwrap();
        let mt = l2n
            .register_layer(&Region::from_polygons([Polygon::from_rect(&Rect::new(-100, 0, 500, 500))]), "mt")
            .unwrap();
        let mb = l2n
            .register_layer(&Region::from_polygons([Polygon::from_rect(&Rect::new(500, 500, 1500, 1000))]), "mb")
            .unwrap();
        let mut ex = PlateCapacitorExtractor {
            class_name: "MIM".into(),
            seed: "cap".into(),
            top: "mt".into(),
            bottom: "mb".into(),
            cap_per_area: 1e-15,
        };
        l2n.extract_devices(&mut ex).unwrap();
        assert_eq!(l2n.state(), ExtractionState::DevicesExtracted);
        assert!(matches!(l2n.extract_devices(&mut ex), Err(L2nError::DevicesAlreadyExtracted(_))));
        l2n.connect(&mt).unwrap();
        l2n.connect(&mb).unwrap();
        l2n.extract_netlist().unwrap();
        let nl = l2n.netlist().unwrap();
        let top = nl.circuit(nl.circuit_by_name("TOP").unwrap());
        assert_eq!(top.devices().len(), 1);
        let d = &top.devices()[0];
        assert!(d.net_for_terminal(0).is_some());
        assert!(d.net_for_terminal(1).is_some());
        assert_ne!(d.net_for_terminal(0), d.net_for_terminal(1));
    }

    #[test]
    fn test_cell_mapping_creates_missing_cells() {
        let (l2n, _, _) = extracted(true, |_| {});
        let mut target = Layout::new(0.001);
        let ttop = target.add_cell("T");
        let cm = l2n.cell_mapping_into(&mut target, ttop, None, false).unwrap();
        assert_eq!(cm.len(), 2);
        let sub = target.cell_by_name("SUB").unwrap();
        assert_eq!(target.cell(ttop).instances()[0].cell_index, sub);
        let cm2 = l2n.const_cell_mapping_into(&target, ttop, false).unwrap();
        assert_eq!(cm2.len(), 2);
    }

    #[test]
    fn test_link_net_to_parent() {
        let (mut l2n, _, _) = extracted(false, |_| {});
        let nl = l2n.netlist().unwrap();
        let sub = nl.circuit_by_name("SUB").unwrap();
        let top = nl.circuit_by_name("TOP").unwrap();
        let floating = nl.circuit(sub).nets().find(|(_, n)| n.pins.is_empty()).unwrap().0;
        let cluster = nl.circuit(sub).net(floating).unwrap().cluster_id;
        let sub_cell = nl.circuit(sub).cell_index.unwrap();
        assert!(l2n.clusters().is_root(sub_cell, cluster));
        l2n.link_net_to_parent_circuit(sub, floating, top, CplxTrans::identity()).unwrap();
        assert!(!l2n.clusters().is_root(sub_cell, cluster));
    }
}
