//! Registry of transport blocks expected in the current reception episode.

use log::debug;
use std::collections::BTreeMap;

use super::types::{Rnti, TbIdentity, TbInfo};

/// Expected TBs keyed by identity.
///
/// Ordered so that decoding and feedback iterate in a deterministic order.
#[derive(Debug, Default)]
pub struct TbRegistry {
    entries: BTreeMap<TbIdentity, TbInfo>,
}

impl TbRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an expected TB, replacing any unresolved entry with the same identity.
    ///
    /// Returns the replaced entry.
    pub fn register(&mut self, identity: TbIdentity, info: TbInfo) -> Option<TbInfo> {
        let replaced = self.entries.insert(identity, info);
        if replaced.is_some() {
            debug!("Replaced expected TB {:?} (previous attempt never received)", identity);
        }
        replaced
    }

    pub fn get(&self, identity: &TbIdentity) -> Option<&TbInfo> {
        self.entries.get(identity)
    }

    pub fn get_mut(&mut self, identity: &TbIdentity) -> Option<&mut TbInfo> {
        self.entries.get_mut(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TbIdentity, &TbInfo)> {
        self.entries.iter()
    }

    /// Remove every unicast TB expected from `rnti`, on all layers.
    pub fn remove_unicast(&mut self, rnti: Rnti) -> usize {
        let before = self.entries.len();
        self.entries.retain(|identity, _| !matches!(identity, TbIdentity::Unicast { rnti: r, .. } if *r == rnti));
        before - self.entries.len()
    }

    /// Remove every unicast entry.
    pub fn clear_unicast(&mut self) {
        self.entries.retain(|identity, _| !matches!(identity, TbIdentity::Unicast { .. }));
    }

    /// Remove every sidelink and discovery entry.
    pub fn clear_sidelink(&mut self) {
        self.entries.retain(|identity, _| matches!(identity, TbIdentity::Unicast { .. }));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
