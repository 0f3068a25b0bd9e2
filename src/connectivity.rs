// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Layer connectivity rules.

use std::collections::{BTreeMap, BTreeSet};

/// Symmetric connect relation over internal layer indexes plus global-net bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connectivity {
    connected: BTreeMap<u32, BTreeSet<u32>>,
    global: BTreeMap<u32, BTreeSet<usize>>,
    global_names: Vec<String>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a layer connect to itself (shapes of one layer form nets).
    pub fn connect_self(&mut self, l: u32) {
        self.connected.entry(l).or_default().insert(l);
    }

    /// Connects two layers both ways.
    pub fn connect(&mut self, a: u32, b: u32) {
        self.connected.entry(a).or_default().insert(b);
        self.connected.entry(b).or_default().insert(a);
    }

    /// Binds shapes of a layer to a named global net. Returns the global net id.
    pub fn connect_global(&mut self, l: u32, name: &str) -> usize {
        let id = self.global_net_id_or_insert(name);
        self.global.entry(l).or_default().insert(id);
        // a layer bound to a global net always takes part in clustering
        self.connected.entry(l).or_default();
        id
    }

    pub fn global_net_id_or_insert(&mut self, name: &str) -> usize {
        if let Some(id) = self.global_net_id(name) {
            return id;
        }
        self.global_names.push(name.to_string());
        self.global_names.len() - 1
    }

    pub fn global_net_id(&self, name: &str) -> Option<usize> {
        self.global_names.iter().position(|n| n == name)
    }

    pub fn global_net_name(&self, id: usize) -> Option<&str> {
        self.global_names.get(id).map(|s| s.as_str())
    }

    pub fn global_net_names(&self) -> &[String] {
        &self.global_names
    }

    pub fn interacts(&self, a: u32, b: u32) -> bool {
        self.connected.get(&a).is_some_and(|s| s.contains(&b))
    }

    /// Layers taking part in connectivity, ascending.
    pub fn layers(&self) -> impl Iterator<Item = u32> + '_ {
        self.connected.keys().copied()
    }

    pub fn has_layer(&self, l: u32) -> bool {
        self.connected.contains_key(&l)
    }

    /// Layers connected to `l` (including `l` itself if self-connected).
    pub fn connected_to(&self, l: u32) -> impl Iterator<Item = u32> + '_ {
        self.connected.get(&l).into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn global_nets_of(&self, l: u32) -> impl Iterator<Item = usize> + '_ {
        self.global.get(&l).into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.connected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_connect() {
        let mut c = Connectivity::new();
        c.connect(1, 2);
        assert!(c.interacts(1, 2));
        assert!(c.interacts(2, 1));
        assert!(!c.interacts(1, 1));
        c.connect_self(1);
        assert!(c.interacts(1, 1));
        assert_eq!(c.layers().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_global_nets() {
        let mut c = Connectivity::new();
        let vdd = c.connect_global(3, "VDD");
        let vss = c.connect_global(4, "VSS");
        assert_eq!(c.connect_global(5, "VDD"), vdd);
        assert_ne!(vdd, vss);
        assert_eq!(c.global_net_name(vss), Some("VSS"));
        assert_eq!(c.global_nets_of(3).collect::<Vec<_>>(), vec![vdd]);
        assert!(c.has_layer(5));
    }
}
