// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Diagnostic log entries with interned strings.
//!
//! Messages, cell names and categories repeat a lot across an extraction
//! run. Entries therefore keep small handles into a [`StringRepository`]
//! owned by whoever owns the [`LogStore`].

use crate::geom::DPolygon;
use compact_str::CompactString;
use std::collections::HashMap;
use std::fmt;

/// Handle of an interned string. 0 is the empty string.
pub type StrId = u32;

#[derive(Debug, Clone)]
pub struct StringRepository {
    strings: Vec<CompactString>,
    index: HashMap<CompactString, StrId>,
}

impl Default for StringRepository {
    fn default() -> Self {
        let mut index = HashMap::new();
        index.insert(CompactString::default(), 0);
        Self { strings: vec![CompactString::default()], index }
    }
}

impl StringRepository {
    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as StrId;
        let s = CompactString::from(s);
        self.strings.push(s.clone());
        self.index.insert(s, id);
        id
    }

    pub fn get(&self, id: StrId) -> &str {
        self.strings.get(id as usize).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.len() <= 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    NoSeverity,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::NoSeverity => write!(f, ""),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A log entry with plain strings, as produced by extractors and checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEntryData {
    pub severity: Severity,
    pub message: String,
    pub cell_name: String,
    pub category_name: String,
    pub category_description: String,
    pub geometry: Option<DPolygon>,
}

impl LogEntryData {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self { severity, message: message.into(), ..Default::default() }
    }

    pub fn with_cell(mut self, cell: impl Into<String>) -> Self {
        self.cell_name = cell.into();
        self
    }

    pub fn with_category(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.category_name = name.into();
        self.category_description = description.into();
        self
    }

    pub fn with_geometry(mut self, geometry: DPolygon) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

impl fmt::Display for LogEntryData {
    /// `[category] In cell X: message`, the layout used by summaries.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.category_name.is_empty() {
            write!(f, "[{}] ", self.category_name)?;
        }
        if !self.cell_name.is_empty() {
            write!(f, "In cell {}: ", self.cell_name)?;
        }
        write!(f, "{}", self.message)
    }
}

/// A stored log entry; strings live in the owning repository.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: StrId,
    pub cell_name: StrId,
    pub category_name: StrId,
    pub category_description: StrId,
    pub geometry: Option<DPolygon>,
}

/// Append-only list of log entries plus their string repository.
#[derive(Debug, Clone, Default)]
pub struct LogStore {
    strings: StringRepository,
    entries: Vec<LogEntry>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strings(&self) -> &StringRepository {
        &self.strings
    }

    /// Appends an entry and mirrors it to the process log.
    pub fn push(&mut self, data: LogEntryData) {
        match data.severity {
            Severity::Error => clilog::error!("{}", data),
            Severity::Warning => clilog::warn!("{}", data),
            Severity::Info => clilog::info!("{}", data),
            Severity::NoSeverity => clilog::debug!("{}", data),
        }
        let entry = self.intern(&data);
        self.entries.push(entry);
    }

    /// Interns the strings of an entry without storing it.
    pub fn intern(&mut self, data: &LogEntryData) -> LogEntry {
        LogEntry {
            severity: data.severity,
            message: self.strings.intern(&data.message),
            cell_name: self.strings.intern(&data.cell_name),
            category_name: self.strings.intern(&data.category_name),
            category_description: self.strings.intern(&data.category_description),
            geometry: data.geometry.clone(),
        }
    }

    pub fn resolve(&self, e: &LogEntry) -> LogEntryData {
        LogEntryData {
            severity: e.severity,
            message: self.strings.get(e.message).to_string(),
            cell_name: self.strings.get(e.cell_name).to_string(),
            category_name: self.strings.get(e.category_name).to_string(),
            category_description: self.strings.get(e.category_description).to_string(),
            geometry: e.geometry.clone(),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = LogEntryData> + '_ {
        self.entries.iter().map(|e| self.resolve(e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    /// Drops the entries. Interned strings stay valid.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let mut repo = StringRepository::default();
        let a = repo.intern("must-connect");
        let b = repo.intern("must-connect");
        assert_eq!(a, b);
        assert_eq!(repo.intern(""), 0);
        assert_eq!(repo.get(a), "must-connect");
    }

    #[test]
    fn test_store_roundtrip_and_errors() {
        let mut store = LogStore::new();
        store.push(LogEntryData::new(Severity::Warning, "floating net").with_cell("INV"));
        assert!(!store.has_errors());
        store.push(
            LogEntryData::new(Severity::Error, "short")
                .with_cell("INV")
                .with_category("short", "Shorted nets"),
        );
        assert!(store.has_errors());
        let all: Vec<_> = store.iter().collect();
        assert_eq!(all[1].category_description, "Shorted nets");
        assert_eq!(all[0].to_string(), "In cell INV: floating net");
        assert_eq!(store.entries()[0].cell_name, store.entries()[1].cell_name);
        store.clear();
        assert!(store.is_empty());
    }
}
