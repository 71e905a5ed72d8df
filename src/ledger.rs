//! Extension ledger
//!
//! Holds extension relationships whose patch source is not registered yet.
//! Entries are keyed by the awaited schema name and keep arrival order.

use std::collections::{BTreeMap, HashMap};

/// Deferred extension relationships
#[derive(Debug, Default, Clone)]
pub struct ExtensionLedger {
    pending: HashMap<String, Vec<String>>,
}

impl ExtensionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `extension` extends `awaited`, which is not registered yet.
    /// Pairs are not deduplicated; callers avoid recording one twice.
    pub fn defer(&mut self, awaited: &str, extension: &str) {
        self.pending
            .entry(awaited.to_string())
            .or_default()
            .push(extension.to_string());
    }

    /// Remove and return everything waiting on `name`, in arrival order
    pub fn drain(&mut self, name: &str) -> Vec<String> {
        self.pending.remove(name).unwrap_or_default()
    }

    /// Drop `extension` from the entry awaiting `awaited`
    pub fn withdraw(&mut self, awaited: &str, extension: &str) -> bool {
        let Some(entry) = self.pending.get_mut(awaited) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|e| e != extension);
        let removed = entry.len() != before;
        if entry.is_empty() {
            self.pending.remove(awaited);
        }
        removed
    }

    /// Extensions waiting on `name`
    pub fn pending_for(&self, name: &str) -> &[String] {
        self.pending.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Snapshot of all deferred relationships, sorted by awaited name
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.pending
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of awaited names
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
