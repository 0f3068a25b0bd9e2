// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! L2N writer.

use super::keys::*;
use super::{fmt_num, CircuitIds, IdMaps, Key, KeyStyle, FORMAT_VERSION, L2N_MAGIC};
use crate::clusters::HierClusters;
use crate::geom::{CplxTrans, Geometry, Point, Polygon};
use crate::l2n::LayoutToNetlist;
use crate::layout::{word_or_quoted, CellIndex, Layout, PropertySet};
use crate::log::{LogEntryData, Severity};
use crate::netlist::{Circuit, CircuitId, DeviceClass, Netlist};

/// Geometry side of a dump: the internal layout, clusters and layer names.
struct GeometrySource<'a> {
    layout: &'a Layout,
    clusters: &'a HierClusters,
    layers: Vec<(String, u32)>,
}

/// Emits L2N text in one key style.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2nWriter {
    style: KeyStyle,
}

impl L2nWriter {
    pub fn new(style: KeyStyle) -> Self {
        Self { style }
    }

    fn key(&self, k: &Key) -> &'static str {
        k.get(self.style)
    }

    fn long(&self) -> bool {
        self.style == KeyStyle::Long
    }

    /// Indentation one level deeper. Short style does not indent.
    fn deeper(&self, indent: &str) -> String {
        if self.long() {
            format!("{} ", indent)
        } else {
            String::new()
        }
    }

    fn comment(&self, out: &mut String, indent: &str, text: &str) {
        if self.long() {
            out.push_str(indent);
            out.push_str("# ");
            out.push_str(text);
            out.push('\n');
        }
    }

    fn line(&self, out: &mut String, indent: &str, text: &str) {
        out.push_str(indent);
        out.push_str(text);
        out.push('\n');
    }

    /// Writes a complete dump including the magic line.
    pub fn write_l2n(&self, out: &mut String, l2n: &LayoutToNetlist) -> IdMaps {
        let timer = clilog::stimer!("write L2N");
        out.push_str(L2N_MAGIC);
        out.push('\n');
        let ids = self.write_body(out, l2n, "");
        clilog::finish!(timer);
        ids
    }

    /// Writes header, layers, connectivity, log and netlist with geometry.
    pub fn write_body(&self, out: &mut String, l2n: &LayoutToNetlist, indent: &str) -> IdMaps {
        let layout = l2n.internal_layout().ok();
        self.line(out, indent, &format!("{}({})", self.key(&VERSION), FORMAT_VERSION));
        if !l2n.description.is_empty() {
            self.line(out, indent, &format!("{}({})", self.key(&DESCRIPTION), word_or_quoted(&l2n.description)));
        }
        if !l2n.generator.is_empty() {
            self.line(out, indent, &format!("{}({})", self.key(&GENERATOR), word_or_quoted(&l2n.generator)));
        }
        if let (Some(layout), Ok(top)) = (&layout, l2n.internal_top_cell()) {
            self.line(out, indent, &format!("{}({})", self.key(&TOP), word_or_quoted(layout.cell_name(top))));
        }
        self.line(out, indent, &format!("{}({})", self.key(&UNIT), fmt_num(l2n.dbu())));

        let layers = l2n.layers();
        if !layers.is_empty() {
            if self.long() {
                out.push('\n');
            }
            self.comment(out, indent, "Layer section");
            self.comment(out, indent, "This section lists the mask layers (drawing or derived) and their connections.");
            self.comment(out, indent, "Mask layers");
        }
        for (name, l) in &layers {
            let info = layout.as_ref().and_then(|ly| ly.layer_info(*l)).filter(|i| !i.is_null());
            match info {
                Some(info) => self.line(
                    out,
                    indent,
                    &format!("{}({} {})", self.key(&LAYER), word_or_quoted(name), word_or_quoted(&info.to_string())),
                ),
                None => self.line(out, indent, &format!("{}({})", self.key(&LAYER), word_or_quoted(name))),
            }
        }

        let conn = l2n.connectivity();
        let mut connect_lines = Vec::new();
        let mut global_lines = Vec::new();
        for (name, l) in &layers {
            let others: Vec<&str> = layers
                .iter()
                .filter(|(_, o)| conn.interacts(*l, *o))
                .map(|(n, _)| n.as_str())
                .collect();
            if !others.is_empty() {
                let list: Vec<String> = others.iter().map(|n| word_or_quoted(n)).collect();
                connect_lines.push(format!("{}({} {})", self.key(&CONNECT), word_or_quoted(name), list.join(" ")));
            }
            let globals: Vec<String> = conn
                .global_nets_of(*l)
                .filter_map(|g| conn.global_net_name(g))
                .map(word_or_quoted)
                .collect();
            if !globals.is_empty() {
                global_lines.push(format!("{}({} {})", self.key(&GLOBAL), word_or_quoted(name), globals.join(" ")));
            }
        }
        if !connect_lines.is_empty() {
            self.comment(out, indent, "Mask layer connectivity");
            for l in &connect_lines {
                self.line(out, indent, l);
            }
        }
        if !global_lines.is_empty() {
            self.comment(out, indent, "Global nets and connectivity");
            for l in &global_lines {
                self.line(out, indent, l);
            }
        }

        let log = l2n.log_entries();
        if !log.is_empty() {
            if self.long() {
                out.push('\n');
            }
            self.comment(out, indent, "Log entries");
            for e in log.iter() {
                self.write_log_entry(out, indent, &MESSAGE, &e);
            }
        }

        let geo = layout.as_ref().map(|ly| GeometrySource { layout: ly, clusters: l2n.clusters(), layers });
        match l2n.netlist() {
            Some(nl) => self.write_netlist(out, nl, geo.as_ref(), indent),
            None => IdMaps::default(),
        }
    }

    /// Writes a netlist without geometry (the reference side of LVS).
    pub fn write_netlist_body(&self, out: &mut String, netlist: &Netlist, indent: &str) -> IdMaps {
        self.line(out, indent, &format!("{}({})", self.key(&VERSION), FORMAT_VERSION));
        self.write_netlist(out, netlist, None, indent)
    }

    fn write_netlist(&self, out: &mut String, nl: &Netlist, geo: Option<&GeometrySource<'_>>, indent: &str) -> IdMaps {
        if !nl.device_classes().is_empty() {
            if self.long() {
                out.push('\n');
            }
            self.comment(out, indent, "Device class section");
            for dc in nl.device_classes() {
                self.write_class(out, indent, dc);
            }
        }

        if let Some(geo) = geo {
            if !nl.device_abstracts().is_empty() {
                if self.long() {
                    out.push('\n');
                }
                self.comment(out, indent, "Device abstracts section");
                self.comment(out, indent, "Device abstracts list the pin shapes of the devices.");
            }
            for da in nl.device_abstracts() {
                let dc = nl.device_class(da.class);
                self.line(
                    out,
                    indent,
                    &format!("{}({} {}", self.key(&DEVICE), word_or_quoted(&da.name), word_or_quoted(&dc.name)),
                );
                let i1 = self.deeper(indent);
                for (t, &cid) in da.terminal_cluster_ids.iter().enumerate() {
                    let tname = dc.terminals.get(t).map(|d| d.name.as_str()).unwrap_or("");
                    self.line(out, &i1, &format!("{}({}", self.key(&TERMINAL), word_or_quoted(tname)));
                    if let Some(ci) = da.cell_index {
                        self.write_cluster_shapes(out, &self.deeper(&i1), geo, ci, cid);
                    }
                    self.line(out, &i1, ")");
                }
                self.line(out, indent, ")");
            }
        }

        let mut ids = IdMaps::default();
        let order = nl.bottom_up_order();
        if !order.is_empty() {
            if self.long() {
                out.push('\n');
            }
            self.comment(out, indent, "Circuit section");
            self.comment(out, indent, "Circuits are the hierarchical building blocks of the netlist.");
        }
        for (i, &c) in order.iter().enumerate() {
            ids.circuits.insert(i + 1, c);
            let cids = self.write_circuit(out, nl, c, geo, indent);
            ids.per_circuit.insert(c, cids);
        }
        ids
    }

    fn write_class(&self, out: &mut String, indent: &str, dc: &DeviceClass) {
        let base = dc.template.as_deref().and_then(|t| DeviceClass::from_template(t, &dc.name));
        let mut parts = vec![word_or_quoted(&dc.name)];
        if let Some(t) = &dc.template {
            parts.push(word_or_quoted(t));
        }
        for p in &dc.parameters {
            let same = base.as_ref().is_some_and(|b| {
                b.parameters.iter().any(|bp| bp.name == p.name && bp.primary == p.primary && bp.default == p.default)
            });
            if !same {
                parts.push(format!(
                    "{}({} {} {})",
                    self.key(&PARAM),
                    word_or_quoted(&p.name),
                    if p.primary { 1 } else { 0 },
                    fmt_num(p.default)
                ));
            }
        }
        for t in &dc.terminals {
            let same = base.as_ref().is_some_and(|b| b.terminals.iter().any(|bt| bt.name == t.name));
            if !same {
                parts.push(format!("{}({})", self.key(&TERMINAL), word_or_quoted(&t.name)));
            }
        }
        self.line(out, indent, &format!("{}({})", self.key(&CLASS), parts.join(" ")));
    }

    fn write_properties(&self, out: &mut String, indent: &str, props: &PropertySet) {
        for (k, v) in props {
            self.line(out, indent, &format!("{}({} {})", self.key(&PROPERTY), k, v));
        }
    }

    fn write_trans(&self, parts: &mut Vec<String>, t: &CplxTrans, prev: &mut Point) {
        let d = t.disp_point();
        let x = if d.x == prev.x { "*".to_string() } else { d.x.to_string() };
        let y = if d.y == prev.y { "*".to_string() } else { d.y.to_string() };
        *prev = d;
        parts.push(format!("{}({} {})", self.key(&LOCATION), x, y));
        if t.angle != 0.0 {
            parts.push(format!("{}({})", self.key(&ROTATION), fmt_num(t.angle)));
        }
        if t.mirror {
            parts.push(self.key(&MIRROR).to_string());
        }
        if (t.mag - 1.0).abs() > 1e-12 {
            parts.push(format!("{}({})", self.key(&SCALE), fmt_num(t.mag)));
        }
    }

    fn write_circuit(
        &self,
        out: &mut String,
        nl: &Netlist,
        c: CircuitId,
        geo: Option<&GeometrySource<'_>>,
        indent: &str,
    ) -> CircuitIds {
        let circuit: &Circuit = nl.circuit(c);
        let mut ids = CircuitIds::default();
        self.line(out, indent, &format!("{}({}", self.key(&CIRCUIT), word_or_quoted(&circuit.name)));
        let i1 = self.deeper(indent);

        if let Some(b) = &circuit.boundary {
            self.comment(out, &i1, "Circuit boundary");
            self.write_boundary(out, &i1, b);
        }
        self.write_properties(out, &i1, &circuit.properties);

        if circuit.num_nets() > 0 {
            self.comment(out, &i1, "Nets with their geometries");
        }
        for (i, (nid, net)) in circuit.nets().enumerate() {
            let id = i + 1;
            ids.insert_net(id, nid);
            let mut head = format!("{}({}", self.key(&NET), id);
            if !net.name.is_empty() {
                head.push_str(&format!(" {}({})", self.key(&NAME), word_or_quoted(&net.name)));
            }
            let has_shapes = match (geo, circuit.cell_index) {
                (Some(g), Some(ci)) => g
                    .clusters
                    .clusters_per_cell(ci)
                    .cluster_by_id(net.cluster_id)
                    .is_some_and(|cl| cl.has_local_shapes()),
                _ => false,
            };
            if net.properties.is_empty() && !has_shapes {
                self.line(out, &i1, &format!("{})", head));
                continue;
            }
            self.line(out, &i1, &head);
            let i2 = self.deeper(&i1);
            self.write_properties(out, &i2, &net.properties);
            if let (Some(g), Some(ci), true) = (geo, circuit.cell_index, has_shapes) {
                self.write_cluster_shapes(out, &i2, g, ci, net.cluster_id);
            }
            self.line(out, &i1, ")");
        }

        if !circuit.pins().is_empty() {
            self.comment(out, &i1, "Outgoing pins and their connections to nets");
        }
        for (p, pin) in circuit.pins().iter().enumerate() {
            let mut parts = Vec::new();
            if let Some(id) = circuit.net_for_pin(p).and_then(|n| ids.net_id(n)) {
                parts.push(id.to_string());
            }
            if !pin.name.is_empty() {
                parts.push(format!("{}({})", self.key(&NAME), word_or_quoted(&pin.name)));
            }
            self.line(out, &i1, &format!("{}({})", self.key(&PIN), parts.join(" ")));
        }

        let mut prev = Point::new(0, 0);
        if !circuit.devices().is_empty() {
            self.comment(out, &i1, "Devices and their connections");
        }
        for (d, dev) in circuit.devices().iter().enumerate() {
            let id = d + 1;
            ids.insert_device(id, d);
            let dc = nl.device_class(dev.class);
            let what = match dev.abstract_id {
                Some(a) => nl.device_abstract(a).name.clone(),
                None => dc.name.clone(),
            };
            let mut parts = vec![id.to_string(), word_or_quoted(&what)];
            if !dev.name.is_empty() {
                parts.push(format!("{}({})", self.key(&NAME), word_or_quoted(&dev.name)));
            }
            self.write_trans(&mut parts, &dev.trans, &mut prev);
            for (pi, v) in dev.params.iter().enumerate() {
                if let Some(pd) = dc.parameters.get(pi) {
                    parts.push(format!("{}({} {})", self.key(&PARAM), word_or_quoted(&pd.name), fmt_num(*v)));
                }
            }
            for (t, td) in dc.terminals.iter().enumerate() {
                match dev.net_for_terminal(t).and_then(|n| ids.net_id(n)) {
                    Some(n) => parts.push(format!("{}({} {})", self.key(&TERMINAL), word_or_quoted(&td.name), n)),
                    None => parts.push(format!("{}({})", self.key(&TERMINAL), word_or_quoted(&td.name))),
                }
            }
            for (outer, inner) in &dev.reconnected_terminals {
                for (ai, it) in inner {
                    parts.push(format!("{}({} {} {})", self.key(&CONNECT), ai, outer, it));
                }
            }
            for other in &dev.other_abstracts {
                let mut sub = vec![word_or_quoted(&nl.device_abstract(other.abstract_id).name)];
                // no '*' elision inside combined devices
                let mut unset = Point::new(i64::MIN, i64::MIN);
                self.write_trans(&mut sub, &other.trans, &mut unset);
                parts.push(format!("{}({})", self.key(&DEVICE), sub.join(" ")));
            }
            self.write_wrapped(out, &i1, self.key(&DEVICE), &parts);
        }

        if !circuit.subcircuits().is_empty() {
            self.comment(out, &i1, "Subcircuits and their connections");
        }
        for (s, sc) in circuit.subcircuits().iter().enumerate() {
            let id = s + 1;
            ids.insert_subcircuit(id, s);
            let mut parts = vec![id.to_string(), word_or_quoted(&nl.circuit(sc.circuit).name)];
            if !sc.name.is_empty() {
                parts.push(format!("{}({})", self.key(&NAME), word_or_quoted(&sc.name)));
            }
            self.write_trans(&mut parts, &sc.trans, &mut prev);
            for (p, n) in sc.pin_nets.iter().enumerate() {
                if let Some(id) = n.and_then(|n| ids.net_id(n)) {
                    parts.push(format!("{}({} {})", self.key(&PIN), p, id));
                }
            }
            for (k, v) in &sc.properties {
                parts.push(format!("{}({} {})", self.key(&PROPERTY), k, v));
            }
            self.write_wrapped(out, &i1, self.key(&CIRCUIT), &parts);
        }

        self.line(out, indent, ")");
        ids
    }

    /// Long style puts each part of a device or subcircuit on its own line.
    fn write_wrapped(&self, out: &mut String, indent: &str, key: &str, parts: &[String]) {
        if self.long() && parts.len() > 3 {
            self.line(out, indent, &format!("{}({} {}", key, parts[0], parts[1]));
            let i = self.deeper(indent);
            for p in &parts[2..] {
                self.line(out, &i, p);
            }
            self.line(out, indent, ")");
        } else {
            self.line(out, indent, &format!("{}({})", key, parts.join(" ")));
        }
    }

    fn write_boundary(&self, out: &mut String, indent: &str, b: &Polygon) {
        if let Some(r) = b.as_rect() {
            self.line(
                out,
                indent,
                &format!("{}({} {} {} {})", self.key(&RECT), r.left, r.bottom, r.right, r.top),
            );
            return;
        }
        let mut coords = Vec::new();
        let mut prev: Option<Point> = None;
        for p in b.points() {
            let x = match prev {
                Some(q) if q.x == p.x => "*".to_string(),
                _ => p.x.to_string(),
            };
            let y = match prev {
                Some(q) if q.y == p.y => "*".to_string(),
                _ => p.y.to_string(),
            };
            coords.push(format!("{} {}", x, y));
            prev = Some(*p);
        }
        self.line(out, indent, &format!("{}({})", self.key(&POLYGON), coords.join(" ")));
    }

    /// Local shapes of a cluster, layer by layer, with points relative to a running reference.
    fn write_cluster_shapes(&self, out: &mut String, indent: &str, geo: &GeometrySource<'_>, ci: CellIndex, id: usize) {
        let Some(cl) = geo.clusters.clusters_per_cell(ci).cluster_by_id(id) else {
            return;
        };
        let cell = geo.layout.cell(ci);
        let mut reference = Point::new(0, 0);
        for (name, l) in &geo.layers {
            for &i in cl.shapes_on(*l) {
                let Some(s) = cell.shapes(*l).get(i) else {
                    continue;
                };
                let text = self.shape_text(name, &s.geometry, &mut reference);
                self.line(out, indent, &text);
            }
        }
    }

    fn rel(&self, p: Point, reference: &mut Point) -> String {
        let s = format!("({} {})", p.x - reference.x, p.y - reference.y);
        *reference = p;
        s
    }

    fn shape_text(&self, layer: &str, g: &Geometry, reference: &mut Point) -> String {
        let layer = word_or_quoted(layer);
        match g {
            Geometry::Polygon(p) => match p.as_rect() {
                Some(r) => {
                    let a = self.rel(r.lower_left(), reference);
                    let b = self.rel(r.upper_right(), reference);
                    format!("{}({} {} {})", self.key(&RECT), layer, a, b)
                }
                None => {
                    let pts: Vec<String> = p.points().iter().map(|q| self.rel(*q, reference)).collect();
                    format!("{}({} {})", self.key(&POLYGON), layer, pts.join(" "))
                }
            },
            Geometry::Text(t) => {
                let at = self.rel(t.pos, reference);
                format!("{}({} {} {})", self.key(&TEXT), layer, word_or_quoted(&t.string), at)
            }
        }
    }

    /// `key(severity description(..) cell(..) cat(..) polygon(..))`.
    pub(crate) fn write_log_entry(&self, out: &mut String, indent: &str, key: &Key, e: &LogEntryData) {
        let mut parts = Vec::new();
        match e.severity {
            Severity::Info => parts.push(self.key(&INFO).to_string()),
            Severity::Warning => parts.push(self.key(&WARNING).to_string()),
            Severity::Error => parts.push(self.key(&ERROR).to_string()),
            Severity::NoSeverity => {}
        }
        parts.push(format!("{}({})", self.key(&DESCRIPTION), word_or_quoted(&e.message)));
        if !e.cell_name.is_empty() {
            parts.push(format!("{}({})", self.key(&CELL), word_or_quoted(&e.cell_name)));
        }
        if !e.category_name.is_empty() {
            if e.category_description.is_empty() {
                parts.push(format!("{}({})", self.key(&CAT), word_or_quoted(&e.category_name)));
            } else {
                parts.push(format!(
                    "{}({} {})",
                    self.key(&CAT),
                    word_or_quoted(&e.category_name),
                    word_or_quoted(&e.category_description)
                ));
            }
        }
        if let Some(g) = &e.geometry {
            parts.push(format!("{}({})", self.key(&POLYGON), word_or_quoted(&g.to_string())));
        }
        self.line(out, indent, &format!("{}({})", key.get(self.style), parts.join(" ")));
    }
}
