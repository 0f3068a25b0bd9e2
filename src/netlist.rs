// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Netlist model: circuits, nets, pins, devices and subcircuits.
//!
//! Objects live in per-circuit arenas and are referenced by index. Removed
//! nets leave a hole so indexes held elsewhere stay valid.

use crate::clusters::ClusterId;
use crate::geom::{CplxTrans, Polygon};
use crate::layout::{CellIndex, PropertySet};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type CircuitId = usize;
pub type NetId = usize;
pub type PinId = usize;
pub type DeviceId = usize;
pub type SubCircuitId = usize;
pub type DeviceClassId = usize;
pub type DeviceAbstractId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalDefinition {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub default: f64,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceClass {
    pub name: String,
    pub description: String,
    /// Name of the built-in template this class was created from.
    pub template: Option<String>,
    pub terminals: Vec<TerminalDefinition>,
    pub parameters: Vec<ParameterDefinition>,
}

fn terms(names: &[&str]) -> Vec<TerminalDefinition> {
    names.iter().map(|n| TerminalDefinition { name: n.to_string(), description: String::new() }).collect()
}

fn params(defs: &[(&str, bool, f64)]) -> Vec<ParameterDefinition> {
    defs.iter()
        .map(|&(n, primary, default)| ParameterDefinition {
            name: n.to_string(),
            description: String::new(),
            default,
            primary,
        })
        .collect()
}

/// Names of the built-in device class templates.
pub const TEMPLATE_NAMES: [&str; 10] = ["RES", "RES3", "CAP", "CAP3", "IND", "DIODE", "MOS3", "MOS4", "BJT3", "BJT4"];

impl DeviceClass {
    /// A class without template, terminals or parameters.
    pub fn generic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            template: None,
            terminals: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Instantiates a built-in template under a class name.
    pub fn from_template(template: &str, name: &str) -> Option<Self> {
        let res = [("R", true, 0.0), ("L", false, 0.0), ("W", false, 0.0), ("A", false, 0.0), ("P", false, 0.0)];
        let cap = [("C", true, 0.0), ("A", false, 0.0), ("P", false, 0.0)];
        let mos = [
            ("L", true, 0.0),
            ("W", true, 0.0),
            ("AS", false, 0.0),
            ("AD", false, 0.0),
            ("PS", false, 0.0),
            ("PD", false, 0.0),
        ];
        let bjt = [
            ("AE", true, 0.0),
            ("PE", false, 0.0),
            ("AB", false, 0.0),
            ("PB", false, 0.0),
            ("AC", false, 0.0),
            ("PC", false, 0.0),
            ("NE", false, 1.0),
        ];
        let (terminals, parameters) = match template {
            "RES" => (terms(&["A", "B"]), params(&res)),
            "RES3" => (terms(&["A", "B", "W"]), params(&res)),
            "CAP" => (terms(&["A", "B"]), params(&cap)),
            "CAP3" => (terms(&["A", "B", "W"]), params(&cap)),
            "IND" => (terms(&["A", "B"]), params(&[("L", true, 0.0)])),
            "DIODE" => (terms(&["A", "C"]), params(&[("A", true, 0.0), ("P", false, 0.0)])),
            "MOS3" => (terms(&["S", "G", "D"]), params(&mos)),
            "MOS4" => (terms(&["S", "G", "D", "B"]), params(&mos)),
            "BJT3" => (terms(&["C", "B", "E"]), params(&bjt)),
            "BJT4" => (terms(&["C", "B", "E", "S"]), params(&bjt)),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            description: String::new(),
            template: Some(template.to_string()),
            terminals,
            parameters,
        })
    }

    pub fn terminal_id(&self, name: &str) -> Option<usize> {
        self.terminals.iter().position(|t| t.name == name)
    }

    pub fn parameter_id(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    /// Adds a terminal unless present. Returns its index.
    pub fn ensure_terminal(&mut self, name: &str) -> usize {
        match self.terminal_id(name) {
            Some(i) => i,
            None => {
                self.terminals.push(TerminalDefinition { name: name.to_string(), description: String::new() });
                self.terminals.len() - 1
            }
        }
    }

    /// Adds a parameter unless present. Returns its index.
    pub fn ensure_parameter(&mut self, name: &str, primary: bool, default: f64) -> usize {
        match self.parameter_id(name) {
            Some(i) => i,
            None => {
                self.parameters.push(ParameterDefinition {
                    name: name.to_string(),
                    description: String::new(),
                    default,
                    primary,
                });
                self.parameters.len() - 1
            }
        }
    }

    pub fn default_parameters(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.default).collect()
    }
}

/// Terminal geometry template of a device, backed by a cell of the internal layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAbstract {
    pub name: String,
    pub class: DeviceClassId,
    pub cell_index: Option<CellIndex>,
    /// Cluster id carrying the geometry of each terminal, in the abstract cell.
    pub terminal_cluster_ids: Vec<ClusterId>,
}

/// An additional abstract of a combined device, placed relative to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAbstractRef {
    pub abstract_id: DeviceAbstractId,
    pub trans: CplxTrans,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub class: DeviceClassId,
    pub abstract_id: Option<DeviceAbstractId>,
    pub trans: CplxTrans,
    pub params: Vec<f64>,
    pub terminals: SmallVec<[Option<NetId>; 4]>,
    pub other_abstracts: Vec<DeviceAbstractRef>,
    /// outer terminal → (abstract index, inner terminal); abstract index 0 is
    /// the main abstract, 1.. index `other_abstracts`.
    pub reconnected_terminals: BTreeMap<usize, Vec<(usize, usize)>>,
}

impl Device {
    pub fn new(class: DeviceClassId, params: Vec<f64>) -> Self {
        Self {
            name: String::new(),
            class,
            abstract_id: None,
            trans: CplxTrans::identity(),
            params,
            terminals: SmallVec::new(),
            other_abstracts: Vec::new(),
            reconnected_terminals: BTreeMap::new(),
        }
    }

    pub fn net_for_terminal(&self, t: usize) -> Option<NetId> {
        self.terminals.get(t).copied().flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pin {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Net {
    pub name: String,
    pub cluster_id: ClusterId,
    pub properties: PropertySet,
    /// (device, terminal index)
    pub terminals: Vec<(DeviceId, usize)>,
    pub pins: Vec<PinId>,
    /// (subcircuit, pin of the referenced circuit)
    pub subcircuit_pins: Vec<(SubCircuitId, PinId)>,
}

impl Net {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// True if nothing attaches to the net.
    pub fn is_floating(&self) -> bool {
        self.terminals.is_empty() && self.pins.is_empty() && self.subcircuit_pins.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubCircuit {
    pub name: String,
    pub circuit: CircuitId,
    pub trans: CplxTrans,
    pub pin_nets: Vec<Option<NetId>>,
    pub properties: PropertySet,
}

impl SubCircuit {
    pub fn new(circuit: CircuitId, trans: CplxTrans) -> Self {
        Self { name: String::new(), circuit, trans, pin_nets: Vec::new(), properties: Vec::new() }
    }

    pub fn net_for_pin(&self, pin: PinId) -> Option<NetId> {
        self.pin_nets.get(pin).copied().flatten()
    }
}

/// Name, or `$<n>` (1-based) for anonymous objects.
pub fn expanded_name(name: &str, index: usize) -> String {
    if name.is_empty() {
        format!("${}", index + 1)
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Circuit {
    pub name: String,
    pub cell_index: Option<CellIndex>,
    pub boundary: Option<Polygon>,
    pub properties: PropertySet,
    nets: Vec<Option<Net>>,
    pins: Vec<Pin>,
    pin_nets: Vec<Option<NetId>>,
    devices: Vec<Device>,
    subcircuits: Vec<SubCircuit>,
    net_by_cluster: HashMap<ClusterId, NetId>,
}

impl Circuit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn add_net(&mut self, net: Net) -> NetId {
        let id = self.nets.len();
        if net.cluster_id != 0 {
            self.net_by_cluster.insert(net.cluster_id, id);
        }
        self.nets.push(Some(net));
        id
    }

    pub fn net(&self, id: NetId) -> Option<&Net> {
        self.nets.get(id).and_then(|n| n.as_ref())
    }

    pub fn net_mut(&mut self, id: NetId) -> Option<&mut Net> {
        self.nets.get_mut(id).and_then(|n| n.as_mut())
    }

    /// Live nets in creation order.
    pub fn nets(&self) -> impl Iterator<Item = (NetId, &Net)> {
        self.nets.iter().enumerate().filter_map(|(i, n)| n.as_ref().map(|n| (i, n)))
    }

    pub fn num_nets(&self) -> usize {
        self.nets().count()
    }

    pub fn net_by_name(&self, name: &str) -> Option<NetId> {
        self.nets().find(|(_, n)| n.name == name).map(|(i, _)| i)
    }

    pub fn net_by_cluster_id(&self, cluster: ClusterId) -> Option<NetId> {
        self.net_by_cluster.get(&cluster).copied()
    }

    pub fn set_net_cluster(&mut self, id: NetId, cluster: ClusterId) {
        if let Some(n) = self.net_mut(id) {
            n.cluster_id = cluster;
            self.net_by_cluster.insert(cluster, id);
        }
    }

    pub fn net_expanded_name(&self, id: NetId) -> String {
        self.net(id).map(|n| expanded_name(&n.name, id)).unwrap_or_default()
    }

    pub fn add_pin(&mut self, name: impl Into<String>) -> PinId {
        self.pins.push(Pin { name: name.into() });
        self.pin_nets.push(None);
        self.pins.len() - 1
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn net_for_pin(&self, pin: PinId) -> Option<NetId> {
        self.pin_nets.get(pin).copied().flatten()
    }

    pub fn connect_pin(&mut self, pin: PinId, net: Option<NetId>) {
        if let Some(old) = self.net_for_pin(pin) {
            if let Some(n) = self.net_mut(old) {
                n.pins.retain(|&p| p != pin);
            }
        }
        if pin < self.pin_nets.len() {
            self.pin_nets[pin] = net;
        }
        if let Some(n) = net.and_then(|id| self.net_mut(id)) {
            n.pins.push(pin);
        }
    }

    pub fn add_device(&mut self, device: Device) -> DeviceId {
        self.devices.push(device);
        self.devices.len() - 1
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn connect_device_terminal(&mut self, device: DeviceId, terminal: usize, net: Option<NetId>) {
        let Some(d) = self.devices.get_mut(device) else {
            return;
        };
        if d.terminals.len() <= terminal {
            d.terminals.resize(terminal + 1, None);
        }
        let old = std::mem::replace(&mut d.terminals[terminal], net);
        if let Some(n) = old.and_then(|id| self.net_mut(id)) {
            n.terminals.retain(|&t| t != (device, terminal));
        }
        if let Some(n) = net.and_then(|id| self.net_mut(id)) {
            n.terminals.push((device, terminal));
        }
    }

    pub fn add_subcircuit(&mut self, sc: SubCircuit) -> SubCircuitId {
        self.subcircuits.push(sc);
        self.subcircuits.len() - 1
    }

    pub fn subcircuit(&self, id: SubCircuitId) -> Option<&SubCircuit> {
        self.subcircuits.get(id)
    }

    pub fn subcircuit_mut(&mut self, id: SubCircuitId) -> Option<&mut SubCircuit> {
        self.subcircuits.get_mut(id)
    }

    pub fn subcircuits(&self) -> &[SubCircuit] {
        &self.subcircuits
    }

    pub fn connect_subcircuit_pin(&mut self, sc: SubCircuitId, pin: PinId, net: Option<NetId>) {
        let Some(s) = self.subcircuits.get_mut(sc) else {
            return;
        };
        if s.pin_nets.len() <= pin {
            s.pin_nets.resize(pin + 1, None);
        }
        let old = std::mem::replace(&mut s.pin_nets[pin], net);
        if let Some(n) = old.and_then(|id| self.net_mut(id)) {
            n.subcircuit_pins.retain(|&p| p != (sc, pin));
        }
        if let Some(n) = net.and_then(|id| self.net_mut(id)) {
            n.subcircuit_pins.push((sc, pin));
        }
    }

    /// Moves everything attached to `with` onto `net` and removes `with`.
    pub fn join_nets(&mut self, net: NetId, with: NetId) {
        if net == with || self.net(net).is_none() {
            return;
        }
        let Some(other) = self.nets.get_mut(with).and_then(|n| n.take()) else {
            return;
        };
        for &(d, t) in &other.terminals {
            if let Some(slot) = self.devices.get_mut(d).and_then(|d| d.terminals.get_mut(t)) {
                *slot = Some(net);
            }
        }
        for &p in &other.pins {
            self.pin_nets[p] = Some(net);
        }
        for &(sc, p) in &other.subcircuit_pins {
            if let Some(slot) = self.subcircuits.get_mut(sc).and_then(|s| s.pin_nets.get_mut(p)) {
                *slot = Some(net);
            }
        }
        self.net_by_cluster.retain(|_, v| *v != with);
        if let Some(n) = self.net_mut(net) {
            n.terminals.extend(other.terminals);
            n.pins.extend(other.pins);
            n.subcircuit_pins.extend(other.subcircuit_pins);
            if n.name.is_empty() {
                n.name = other.name;
            } else if !other.name.is_empty() && other.name != n.name {
                n.name = format!("{},{}", n.name, other.name);
            }
            for p in other.properties {
                if !n.properties.iter().any(|(k, _)| *k == p.0) {
                    n.properties.push(p);
                }
            }
        }
    }

    pub fn remove_net(&mut self, id: NetId) {
        let Some(n) = self.nets.get_mut(id).and_then(|n| n.take()) else {
            return;
        };
        for (d, t) in n.terminals {
            if let Some(slot) = self.devices.get_mut(d).and_then(|d| d.terminals.get_mut(t)) {
                *slot = None;
            }
        }
        for p in n.pins {
            self.pin_nets[p] = None;
        }
        for (sc, p) in n.subcircuit_pins {
            if let Some(slot) = self.subcircuits.get_mut(sc).and_then(|s| s.pin_nets.get_mut(p)) {
                *slot = None;
            }
        }
        self.net_by_cluster.retain(|_, v| *v != id);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Netlist {
    circuits: Vec<Circuit>,
    device_classes: Vec<DeviceClass>,
    device_abstracts: Vec<DeviceAbstract>,
}

impl Netlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_circuit(&mut self, c: Circuit) -> CircuitId {
        self.circuits.push(c);
        self.circuits.len() - 1
    }

    pub fn circuit(&self, id: CircuitId) -> &Circuit {
        &self.circuits[id]
    }

    pub fn circuit_mut(&mut self, id: CircuitId) -> &mut Circuit {
        &mut self.circuits[id]
    }

    pub fn circuits(&self) -> impl Iterator<Item = (CircuitId, &Circuit)> {
        self.circuits.iter().enumerate()
    }

    pub fn num_circuits(&self) -> usize {
        self.circuits.len()
    }

    pub fn circuit_by_name(&self, name: &str) -> Option<CircuitId> {
        self.circuits.iter().position(|c| c.name == name)
    }

    pub fn circuit_by_cell(&self, ci: CellIndex) -> Option<CircuitId> {
        self.circuits.iter().position(|c| c.cell_index == Some(ci))
    }

    pub fn add_device_class(&mut self, dc: DeviceClass) -> DeviceClassId {
        self.device_classes.push(dc);
        self.device_classes.len() - 1
    }

    pub fn device_class(&self, id: DeviceClassId) -> &DeviceClass {
        &self.device_classes[id]
    }

    pub fn device_class_mut(&mut self, id: DeviceClassId) -> &mut DeviceClass {
        &mut self.device_classes[id]
    }

    pub fn device_classes(&self) -> &[DeviceClass] {
        &self.device_classes
    }

    pub fn device_class_by_name(&self, name: &str) -> Option<DeviceClassId> {
        self.device_classes.iter().position(|c| c.name == name)
    }

    pub fn add_device_abstract(&mut self, da: DeviceAbstract) -> DeviceAbstractId {
        self.device_abstracts.push(da);
        self.device_abstracts.len() - 1
    }

    pub fn device_abstract(&self, id: DeviceAbstractId) -> &DeviceAbstract {
        &self.device_abstracts[id]
    }

    pub fn device_abstracts(&self) -> &[DeviceAbstract] {
        &self.device_abstracts
    }

    pub fn device_abstract_by_name(&self, name: &str) -> Option<DeviceAbstractId> {
        self.device_abstracts.iter().position(|a| a.name == name)
    }

    pub fn device_abstract_by_cell(&self, ci: CellIndex) -> Option<DeviceAbstractId> {
        self.device_abstracts.iter().position(|a| a.cell_index == Some(ci))
    }

    /// Cells backing device abstracts.
    pub fn device_cells(&self) -> BTreeSet<CellIndex> {
        self.device_abstracts.iter().filter_map(|a| a.cell_index).collect()
    }

    /// Instantiation sites of a circuit: (parent circuit, subcircuit).
    pub fn parents(&self, id: CircuitId) -> Vec<(CircuitId, SubCircuitId)> {
        let mut out = Vec::new();
        for (pid, c) in self.circuits() {
            for (si, sc) in c.subcircuits().iter().enumerate() {
                if sc.circuit == id {
                    out.push((pid, si));
                }
            }
        }
        out
    }

    /// Circuits no subcircuit refers to, in creation order.
    pub fn top_circuits(&self) -> Vec<CircuitId> {
        let called: BTreeSet<CircuitId> =
            self.circuits.iter().flat_map(|c| c.subcircuits().iter().map(|s| s.circuit)).collect();
        (0..self.circuits.len()).filter(|c| !called.contains(c)).collect()
    }

    pub fn is_top(&self, id: CircuitId) -> bool {
        self.top_circuits().contains(&id)
    }

    /// Children before parents.
    pub fn bottom_up_order(&self) -> Vec<CircuitId> {
        let mut order = Vec::with_capacity(self.circuits.len());
        let mut state = vec![0u8; self.circuits.len()];
        for root in 0..self.circuits.len() {
            if state[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            state[root] = 1;
            while let Some((c, next)) = stack.pop() {
                let scs = self.circuits[c].subcircuits();
                if next < scs.len() {
                    stack.push((c, next + 1));
                    let child = scs[next].circuit;
                    if state[child] == 0 {
                        state[child] = 1;
                        stack.push((child, 0));
                    }
                } else {
                    state[c] = 2;
                    order.push(c);
                }
            }
        }
        order
    }

    pub fn top_down_order(&self) -> Vec<CircuitId> {
        let mut v = self.bottom_up_order();
        v.reverse();
        v
    }

    pub fn join_nets(&mut self, circuit: CircuitId, net: NetId, with: NetId) {
        self.circuits[circuit].join_nets(net, with);
    }

    /// Total number of live nets over all circuits.
    pub fn num_nets(&self) -> usize {
        self.circuits.iter().map(|c| c.num_nets()).sum()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inverter_netlist() -> (Netlist, CircuitId, CircuitId) {
        let mut nl = Netlist::new();
        let nmos = nl.add_device_class(DeviceClass::from_template("MOS4", "NMOS").unwrap());
        let mut inv = Circuit::new("INV");
        let a = inv.add_net(Net::new("A"));
        let z = inv.add_net(Net::new("Z"));
        let vss = inv.add_net(Net::new("VSS"));
        let pa = inv.add_pin("A");
        inv.connect_pin(pa, Some(a));
        let pz = inv.add_pin("Z");
        inv.connect_pin(pz, Some(z));
        let d = inv.add_device(Device::new(nmos, vec![0.15, 0.5, 0.0, 0.0, 0.0, 0.0]));
        inv.connect_device_terminal(d, 0, Some(vss));
        inv.connect_device_terminal(d, 1, Some(a));
        inv.connect_device_terminal(d, 2, Some(z));
        let inv_id = nl.add_circuit(inv);

        let mut top = Circuit::new("TOP");
        let n1 = top.add_net(Net::new("IN"));
        let n2 = top.add_net(Net::new("OUT"));
        let sc = top.add_subcircuit(SubCircuit::new(inv_id, CplxTrans::identity()));
        top.connect_subcircuit_pin(sc, 0, Some(n1));
        top.connect_subcircuit_pin(sc, 1, Some(n2));
        let top_id = nl.add_circuit(top);
        (nl, inv_id, top_id)
    }

    #[test]
    fn test_templates() {
        let mos = DeviceClass::from_template("MOS4", "PMOS").unwrap();
        assert_eq!(mos.terminal_id("B"), Some(3));
        assert_eq!(mos.parameter_id("W"), Some(1));
        let bjt = DeviceClass::from_template("BJT3", "NPN").unwrap();
        assert_eq!(bjt.default_parameters().last(), Some(&1.0));
        assert!(DeviceClass::from_template("FOO", "X").is_none());
        for t in TEMPLATE_NAMES {
            assert!(DeviceClass::from_template(t, t).is_some());
        }
    }

    #[test]
    fn test_hierarchy_queries() {
        let (nl, inv, top) = inverter_netlist();
        assert_eq!(nl.top_circuits(), vec![top]);
        assert_eq!(nl.bottom_up_order(), vec![inv, top]);
        assert_eq!(nl.top_down_order(), vec![top, inv]);
        assert_eq!(nl.parents(inv), vec![(top, 0)]);
        assert_eq!(nl.circuit(top).subcircuits()[0].net_for_pin(1), Some(1));
    }

    #[test]
    fn test_join_nets_moves_attachments() {
        let (mut nl, inv, _) = inverter_netlist();
        let c = nl.circuit_mut(inv);
        c.join_nets(0, 2);
        assert!(c.net(2).is_none());
        assert_eq!(c.net(0).unwrap().name, "A,VSS");
        assert_eq!(c.devices()[0].net_for_terminal(0), Some(0));
        assert_eq!(c.net(0).unwrap().terminals.len(), 2);
        assert_eq!(c.num_nets(), 2);
    }

    #[test]
    fn test_expanded_names() {
        let mut c = Circuit::new("C");
        let n = c.add_net(Net::default());
        assert_eq!(c.net_expanded_name(n), "$1");
        assert_eq!(expanded_name("X", 4), "X");
    }

    #[test]
    fn test_reconnect_terminal() {
        let (mut nl, inv, _) = inverter_netlist();
        let c = nl.circuit_mut(inv);
        c.connect_device_terminal(0, 2, Some(0));
        assert!(c.net(1).unwrap().terminals.is_empty());
        assert!(c.net(0).unwrap().terminals.contains(&(0, 2)));
    }
}
