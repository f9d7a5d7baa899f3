//! A layer of bag contents.
//!
//! A bag is a mutable overlay segment on top of a stack of sealed, shared segments.
//! Within one bag, newer layers fully shadow older ones: a stored missing value hides
//! the attribute, and a list or dict stored in a newer layer replaces the whole
//! container.

use std::sync::Arc;

use ahash::AHashMap;
use kdata_types::id_hash::IdHashMap;
use kdata_types::{DataItem, ItemId};

use crate::dict::DictEntries;

pub(crate) type AttrMap = AHashMap<Arc<str>, DataItem>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Segment {
    pub(crate) attrs: IdHashMap<ItemId, AttrMap>,
    pub(crate) lists: IdHashMap<ItemId, Arc<Vec<DataItem>>>,
    pub(crate) dicts: IdHashMap<ItemId, Arc<DictEntries>>,
}

impl Segment {
    pub(crate) fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.lists.is_empty() && self.dicts.is_empty()
    }

    pub(crate) fn get_attr(&self, item: ItemId, attr: &str) -> Option<&DataItem> {
        self.attrs.get(&item).and_then(|attrs| attrs.get(attr))
    }

    pub(crate) fn set_attr(&mut self, item: ItemId, attr: &str, value: DataItem) {
        let attrs = self.attrs.entry(item).or_default();
        match attrs.get_mut(attr) {
            Some(slot) => *slot = value,
            None => {
                attrs.insert(Arc::from(attr), value);
            }
        }
    }

    /// Number of stored attribute values, list items and dict entries.
    pub(crate) fn triple_count(&self) -> usize {
        self.attrs.values().map(|a| a.len()).sum::<usize>()
            + self.lists.values().map(|l| l.len()).sum::<usize>()
            + self.dicts.values().map(|d| d.len()).sum::<usize>()
    }

    /// Applies a newer layer of the same bag on top of this one.
    pub(crate) fn absorb(&mut self, newer: &Segment) {
        for (item, attrs) in &newer.attrs {
            let target = self.attrs.entry(*item).or_default();
            for (attr, value) in attrs {
                target.insert(attr.clone(), value.clone());
            }
        }
        for (list, items) in &newer.lists {
            self.lists.insert(*list, items.clone());
        }
        for (dict, entries) in &newer.dicts {
            self.dicts.insert(*dict, entries.clone());
        }
    }

    /// Applies a higher-priority bag on top of this one, the way fallback lookups
    /// resolve: only present attribute values shadow and dicts merge per key.
    pub(crate) fn overlay(&mut self, upper: &Segment) {
        for (item, attrs) in &upper.attrs {
            let target = self.attrs.entry(*item).or_default();
            for (attr, value) in attrs.iter().filter(|(_, v)| v.is_present()) {
                target.insert(attr.clone(), value.clone());
            }
        }
        for (list, items) in &upper.lists {
            self.lists.insert(*list, items.clone());
        }
        for (dict, entries) in &upper.dicts {
            match self.dicts.get_mut(dict) {
                Some(lower) => {
                    let mut merged = (**entries).clone();
                    merged.fill_from(lower);
                    *lower = Arc::new(merged);
                }
                None => {
                    self.dicts.insert(*dict, entries.clone());
                }
            }
        }
    }

    /// Drops stored missing values; valid once no older layer remains underneath.
    pub(crate) fn prune_missing(&mut self) {
        for attrs in self.attrs.values_mut() {
            attrs.retain(|_, v| v.is_present());
        }
        self.attrs.retain(|_, attrs| !attrs.is_empty());
    }

    /// Collapses a stack of layers (oldest first) into one.
    pub(crate) fn compact<'a>(layers: impl IntoIterator<Item = &'a Segment>) -> Segment {
        let mut result = Segment::default();
        for layer in layers {
            result.absorb(layer);
        }
        result.prune_missing();
        result
    }
}
