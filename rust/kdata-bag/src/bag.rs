use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use itertools::Itertools;
use kdata_common::{Result, error::Error, verify_arg};
use kdata_types::{DataItem, ItemId};

use crate::dict::{DictEntries, validate_dict_key};
use crate::merge::{ConflictPolicy, MergeOptions};
use crate::segment::Segment;

/// Number of sealed segments a bag may accumulate before a fork collapses them.
pub const MAX_SEGMENTS: usize = 8;

static NEXT_BAG_ID: AtomicU64 = AtomicU64::new(1);

/// A store of attribute triples, lists and dicts keyed by [`ItemId`].
///
/// `DataBag` is a cheaply clonable handle; clones refer to the same bag. A bag is
/// either mutable or frozen. Forking seals the current writes into a shared segment
/// and returns an independent bag that shares every segment with its source, so a
/// fork costs O(segments) regardless of the bag size.
///
/// A bag may carry an ordered list of read-only fallbacks consulted on a lookup miss.
/// Only present values shadow across fallbacks: a value removed in the primary bag
/// lets the fallback's value through.
#[derive(Clone)]
pub struct DataBag {
    inner: Arc<BagInner>,
}

struct BagInner {
    id: u64,
    state: RwLock<BagState>,
    fallbacks: Vec<DataBag>,
}

struct BagState {
    mutable: bool,
    overlay: Segment,
    /// Sealed layers, oldest first.
    shared: Vec<Arc<Segment>>,
}

impl BagState {
    /// Layers from the newest to the oldest.
    fn layers(&self) -> impl Iterator<Item = &Segment> {
        std::iter::once(&self.overlay).chain(self.shared.iter().rev().map(|s| &**s))
    }

    fn local_attr(&self, item: ItemId, attr: &str) -> Option<&DataItem> {
        self.layers().find_map(|s| s.get_attr(item, attr))
    }

    fn local_list(&self, list: ItemId) -> Option<&Arc<Vec<DataItem>>> {
        self.layers().find_map(|s| s.lists.get(&list))
    }

    fn local_dict(&self, dict: ItemId) -> Option<&Arc<DictEntries>> {
        self.layers().find_map(|s| s.dicts.get(&dict))
    }

    fn check_mutable(&self) -> Result<()> {
        if self.mutable {
            Ok(())
        } else {
            Err(Error::immutable_bag_write())
        }
    }

    fn seal(&mut self) {
        if !self.overlay.is_empty() {
            let sealed = std::mem::take(&mut self.overlay);
            self.shared.push(Arc::new(sealed));
        }
    }

    fn compact(&self) -> Segment {
        Segment::compact(
            self.shared
                .iter()
                .map(|s| &**s)
                .chain(std::iter::once(&self.overlay)),
        )
    }
}

impl DataBag {
    /// Creates an empty mutable bag.
    pub fn new() -> DataBag {
        DataBag::from_parts(true, Segment::default(), Vec::new(), Vec::new())
    }

    /// Creates an empty frozen bag that reads through `fallbacks` in order.
    pub fn with_fallbacks(fallbacks: Vec<DataBag>) -> DataBag {
        DataBag::from_parts(false, Segment::default(), Vec::new(), fallbacks)
    }

    fn from_parts(
        mutable: bool,
        overlay: Segment,
        shared: Vec<Arc<Segment>>,
        fallbacks: Vec<DataBag>,
    ) -> DataBag {
        DataBag {
            inner: Arc::new(BagInner {
                id: NEXT_BAG_ID.fetch_add(1, Ordering::Relaxed),
                state: RwLock::new(BagState {
                    mutable,
                    overlay,
                    shared,
                }),
                fallbacks,
            }),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, BagState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BagState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique identifier of this bag, used in diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` if `self` and `other` are handles to the same bag.
    pub fn is_same(&self, other: &DataBag) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn fallbacks(&self) -> &[DataBag] {
        &self.inner.fallbacks
    }

    pub fn is_mutable(&self) -> bool {
        self.read_state().mutable
    }

    /// Makes the bag immutable. Every handle to the bag observes the change; the only
    /// way back to a writable bag is [`DataBag::fork`].
    pub fn freeze(&self) {
        let mut state = self.write_state();
        if state.mutable {
            state.mutable = false;
            log::debug!("froze bag {}", self.id());
        }
    }

    /// Returns a frozen fork, leaving this bag untouched.
    pub fn frozen(&self) -> DataBag {
        if self.is_mutable() {
            self.fork(false)
        } else {
            self.clone()
        }
    }

    /// Returns a copy-on-write clone of this bag that accepts independent writes
    /// when `mutable` is `true`.
    ///
    /// Fallbacks are shared, not copied.
    pub fn fork(&self, mutable: bool) -> DataBag {
        let shared = {
            let mut state = self.write_state();
            state.seal();
            if state.shared.len() > MAX_SEGMENTS {
                let compacted = Segment::compact(state.shared.iter().map(|s| &**s));
                log::debug!(
                    "compacted {} segments of bag {}",
                    state.shared.len(),
                    self.id()
                );
                state.shared = vec![Arc::new(compacted)];
            }
            state.shared.clone()
        };
        let forked = DataBag::from_parts(
            mutable,
            Segment::default(),
            shared,
            self.inner.fallbacks.clone(),
        );
        log::debug!(
            "forked bag {} into {} (mutable: {mutable})",
            self.id(),
            forked.id()
        );
        forked
    }

    /// Returns a frozen view reading from this bag first, then from `fallback`.
    pub fn with_fallback(&self, fallback: &DataBag) -> DataBag {
        DataBag::with_fallbacks(vec![self.clone(), fallback.clone()])
    }

    /// Combines `bags` so that the leftmost bag wins on every conflict.
    ///
    /// The result is a frozen bag that resolves lookups lazily through the inputs.
    /// Mutable inputs are read through frozen forks, so later writes to them do not
    /// show through the result.
    pub fn enriched_bag(bags: &[DataBag]) -> Result<DataBag> {
        verify_arg!(bags, bags.len() >= 2);
        Ok(DataBag::with_fallbacks(bags.iter().map(DataBag::frozen).collect()))
    }

    /// Combines `bags` so that the rightmost bag wins on every conflict.
    pub fn updated_bag(bags: &[DataBag]) -> Result<DataBag> {
        verify_arg!(bags, bags.len() >= 2);
        Ok(DataBag::with_fallbacks(bags.iter().rev().map(DataBag::frozen).collect()))
    }

    /// Materializes the bag together with all of its fallbacks into a single new
    /// mutable bag without fallbacks.
    pub fn merge_fallbacks(&self) -> DataBag {
        let merged = self.snapshot();
        log::debug!(
            "merged bag {} with {} fallbacks ({} triples)",
            self.id(),
            self.inner.fallbacks.len(),
            merged.triple_count()
        );
        DataBag::from_parts(true, merged, Vec::new(), Vec::new())
    }

    /// The resolved contents of the bag and its fallbacks as one segment.
    pub(crate) fn snapshot(&self) -> Segment {
        let mut result = Segment::default();
        for fallback in self.inner.fallbacks.iter().rev() {
            result.overlay(&fallback.snapshot());
        }
        let local = self.read_state().compact();
        result.overlay(&local);
        result
    }

    /// Approximate number of stored values across all layers and fallbacks.
    pub fn approx_triple_count(&self) -> usize {
        let local: usize = self.read_state().layers().map(Segment::triple_count).sum();
        local
            + self
                .inner
                .fallbacks
                .iter()
                .map(DataBag::approx_triple_count)
                .sum::<usize>()
    }

    // Attributes

    fn lookup_attr(&self, state: &BagState, item: ItemId, attr: &str) -> DataItem {
        if let Some(value) = state.local_attr(item, attr) {
            if value.is_present() {
                return value.clone();
            }
        }
        self.inner
            .fallbacks
            .iter()
            .map(|fb| fb.get_attr(item, attr))
            .find(DataItem::is_present)
            .unwrap_or_default()
    }

    /// Returns the value of `attr` on `item`, or a missing item if unset.
    pub fn get_attr(&self, item: ItemId, attr: &str) -> DataItem {
        let state = self.read_state();
        self.lookup_attr(&state, item, attr)
    }

    /// Element-wise [`DataBag::get_attr`]; non-ItemId items yield missing values.
    pub fn get_attr_many(&self, items: &[DataItem], attr: &str) -> Vec<DataItem> {
        let state = self.read_state();
        items
            .iter()
            .map(|item| match item.as_item_id() {
                Some(id) => self.lookup_attr(&state, id, attr),
                None => DataItem::Missing,
            })
            .collect()
    }

    /// Sorted names of the attributes with a present value on `item`.
    pub fn get_attr_names(&self, item: ItemId) -> Vec<String> {
        let mut candidates = BTreeSet::new();
        self.collect_attr_names(item, &mut candidates);
        let state = self.read_state();
        candidates
            .into_iter()
            .filter(|name| self.lookup_attr(&state, item, name).is_present())
            .collect()
    }

    fn collect_attr_names(&self, item: ItemId, names: &mut BTreeSet<String>) {
        {
            let state = self.read_state();
            for layer in state.layers() {
                if let Some(attrs) = layer.attrs.get(&item) {
                    names.extend(attrs.keys().map(|k| k.to_string()));
                }
            }
        }
        for fallback in &self.inner.fallbacks {
            fallback.collect_attr_names(item, names);
        }
    }

    pub fn set_attr(&self, item: ItemId, attr: &str, value: DataItem) -> Result<()> {
        let mut state = self.write_state();
        state.check_mutable()?;
        state.overlay.set_attr(item, attr, value);
        Ok(())
    }

    /// Element-wise [`DataBag::set_attr`]; slots whose item is not an ItemId are
    /// skipped.
    pub fn set_attr_many(&self, items: &[DataItem], attr: &str, values: &[DataItem]) -> Result<()> {
        verify_arg!(values, values.len() == items.len());
        let mut state = self.write_state();
        state.check_mutable()?;
        for (item, value) in items.iter().zip(values) {
            if let Some(id) = item.as_item_id() {
                state.overlay.set_attr(id, attr, value.clone());
            }
        }
        Ok(())
    }

    /// Removes `attr` from `item`. Values visible through fallbacks stay visible.
    pub fn del_attr(&self, item: ItemId, attr: &str) -> Result<()> {
        self.set_attr(item, attr, DataItem::Missing)
    }

    // Lists

    fn lookup_list(&self, state: &BagState, list: ItemId) -> Option<Arc<Vec<DataItem>>> {
        state
            .local_list(list)
            .cloned()
            .or_else(|| self.inner.fallbacks.iter().find_map(|fb| fb.get_list(list)))
    }

    /// Returns the items of `list`, or `None` if the list is unknown to the bag.
    pub fn get_list(&self, list: ItemId) -> Option<Arc<Vec<DataItem>>> {
        let state = self.read_state();
        self.lookup_list(&state, list)
    }

    pub fn list_size(&self, list: ItemId) -> usize {
        self.get_list(list).map_or(0, |items| items.len())
    }

    /// All items of `list` in order.
    pub fn explode(&self, list: ItemId) -> Vec<DataItem> {
        self.get_list(list)
            .map(|items| (*items).clone())
            .unwrap_or_default()
    }

    /// Returns the item at `index`; negative indices count from the end and
    /// out-of-range indices yield a missing item.
    pub fn get_from_list(&self, list: ItemId, index: i64) -> DataItem {
        self.get_list(list)
            .and_then(|items| resolve_index(index, items.len()).map(|i| items[i].clone()))
            .unwrap_or_default()
    }

    fn list_mut<'a>(&self, state: &'a mut BagState, list: ItemId) -> &'a mut Vec<DataItem> {
        if !state.overlay.lists.contains_key(&list) {
            let base = state
                .shared
                .iter()
                .rev()
                .find_map(|s| s.lists.get(&list).cloned())
                .or_else(|| self.inner.fallbacks.iter().find_map(|fb| fb.get_list(list)))
                .unwrap_or_default();
            state.overlay.lists.insert(list, base);
        }
        Arc::make_mut(state.overlay.lists.entry(list).or_default())
    }

    /// Replaces the contents of `list`.
    pub fn set_list(&self, list: ItemId, items: Vec<DataItem>) -> Result<()> {
        let mut state = self.write_state();
        state.check_mutable()?;
        state.overlay.lists.insert(list, Arc::new(items));
        Ok(())
    }

    pub fn append_to_list(
        &self,
        list: ItemId,
        values: impl IntoIterator<Item = DataItem>,
    ) -> Result<()> {
        let mut state = self.write_state();
        state.check_mutable()?;
        self.list_mut(&mut state, list).extend(values);
        Ok(())
    }

    /// Overwrites the item at `index`. Out-of-range indices are ignored.
    pub fn set_in_list(&self, list: ItemId, index: i64, value: DataItem) -> Result<()> {
        let mut state = self.write_state();
        state.check_mutable()?;
        let items = self.list_mut(&mut state, list);
        if let Some(i) = resolve_index(index, items.len()) {
            items[i] = value;
        }
        Ok(())
    }

    pub fn clear_list(&self, list: ItemId) -> Result<()> {
        self.set_list(list, Vec::new())
    }

    // Dicts

    /// Returns the entries of `dict` merged across fallbacks, or `None` if no bag in
    /// the chain knows the dict.
    pub fn get_dict(&self, dict: ItemId) -> Option<Arc<DictEntries>> {
        let local = self.read_state().local_dict(dict).cloned();
        let mut lower = self
            .inner
            .fallbacks
            .iter()
            .filter_map(|fb| fb.get_dict(dict));
        match local {
            Some(local) => {
                let mut merged: Option<DictEntries> = None;
                for entries in lower {
                    merged
                        .get_or_insert_with(|| (*local).clone())
                        .fill_from(&entries);
                }
                Some(merged.map_or(local, Arc::new))
            }
            None => {
                let first = lower.next()?;
                let mut merged: Option<DictEntries> = None;
                for entries in lower {
                    merged
                        .get_or_insert_with(|| (*first).clone())
                        .fill_from(&entries);
                }
                Some(merged.map_or(first, Arc::new))
            }
        }
    }

    pub fn dict_size(&self, dict: ItemId) -> usize {
        self.get_dict(dict).map_or(0, |entries| entries.len())
    }

    pub fn get_dict_keys(&self, dict: ItemId) -> Vec<DataItem> {
        self.get_dict(dict)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_dict_values(&self, dict: ItemId) -> Vec<DataItem> {
        self.get_dict(dict)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lookup_dict_value(&self, state: &BagState, dict: ItemId, key: &DataItem) -> DataItem {
        if let Some(value) = state.local_dict(dict).and_then(|d| d.get(key)) {
            return value.clone();
        }
        self.inner
            .fallbacks
            .iter()
            .map(|fb| fb.get_from_dict(dict, key))
            .find(DataItem::is_present)
            .unwrap_or_default()
    }

    pub fn get_from_dict(&self, dict: ItemId, key: &DataItem) -> DataItem {
        let state = self.read_state();
        self.lookup_dict_value(&state, dict, key)
    }

    fn dict_mut<'a>(state: &'a mut BagState, dict: ItemId) -> &'a mut DictEntries {
        if !state.overlay.dicts.contains_key(&dict) {
            let base = state
                .shared
                .iter()
                .rev()
                .find_map(|s| s.dicts.get(&dict).cloned())
                .unwrap_or_default();
            state.overlay.dicts.insert(dict, base);
        }
        Arc::make_mut(state.overlay.dicts.entry(dict).or_default())
    }

    /// Sets `dict[key] = value`; a missing value removes the key and a missing key
    /// is ignored.
    pub fn set_in_dict(&self, dict: ItemId, key: &DataItem, value: DataItem) -> Result<()> {
        validate_dict_key(key)?;
        let mut state = self.write_state();
        state.check_mutable()?;
        if key.is_present() {
            Self::dict_mut(&mut state, dict).insert(key.clone(), value);
        }
        Ok(())
    }

    /// Replaces the local contents of `dict`.
    pub fn set_dict(&self, dict: ItemId, entries: DictEntries) -> Result<()> {
        for key in entries.keys() {
            validate_dict_key(key)?;
        }
        let mut state = self.write_state();
        state.check_mutable()?;
        state.overlay.dicts.insert(dict, Arc::new(entries));
        Ok(())
    }

    /// Removes all local entries of `dict`. Entries visible through fallbacks stay
    /// visible.
    pub fn clear_dict(&self, dict: ItemId) -> Result<()> {
        self.set_dict(dict, DictEntries::new())
    }

    // Merging

    /// Merges every triple of `other` (including its fallbacks) into this bag.
    ///
    /// Conflicts are resolved per `options`; with [`ConflictPolicy::Raise`] the merge
    /// fails without modifying this bag.
    pub fn merge_inplace(&self, other: &DataBag, options: MergeOptions) -> Result<()> {
        if self.is_same(other) {
            return Ok(());
        }
        let incoming = other.snapshot();
        let mut state = self.write_state();
        state.check_mutable()?;

        let mut staged = Segment::default();
        for (item, attrs) in &incoming.attrs {
            let policy = options.policy_for(item.is_schema());
            for (attr, value) in attrs {
                let existing = self.lookup_attr(&state, *item, attr);
                if existing.is_missing() {
                    staged.set_attr(*item, attr, value.clone());
                } else if existing != *value {
                    match policy {
                        ConflictPolicy::Raise => {
                            return Err(Error::conflicting_merge(
                                item,
                                attr.to_string(),
                                existing,
                                value,
                            ));
                        }
                        ConflictPolicy::Overwrite => staged.set_attr(*item, attr, value.clone()),
                        ConflictPolicy::KeepOriginal => {}
                    }
                }
            }
        }

        for (list, items) in &incoming.lists {
            match self.lookup_list(&state, *list) {
                None => {
                    staged.lists.insert(*list, items.clone());
                }
                Some(existing) if existing != *items => match options.data_conflict {
                    ConflictPolicy::Raise => {
                        return Err(Error::conflicting_merge(
                            list,
                            "list items",
                            format_items(&existing),
                            format_items(items),
                        ));
                    }
                    ConflictPolicy::Overwrite => {
                        staged.lists.insert(*list, items.clone());
                    }
                    ConflictPolicy::KeepOriginal => {}
                },
                Some(_) => {}
            }
        }

        for (dict, entries) in &incoming.dicts {
            let mut merged = state
                .local_dict(*dict)
                .map(|d| (**d).clone())
                .unwrap_or_default();
            let mut changed = false;
            for (key, value) in entries.iter() {
                let existing = self.lookup_dict_value(&state, *dict, key);
                if existing.is_missing() {
                    merged.insert(key.clone(), value.clone());
                    changed = true;
                } else if existing != *value {
                    match options.data_conflict {
                        ConflictPolicy::Raise => {
                            return Err(Error::conflicting_merge(
                                dict,
                                format!("dict key {key}"),
                                existing,
                                value,
                            ));
                        }
                        ConflictPolicy::Overwrite => {
                            merged.insert(key.clone(), value.clone());
                            changed = true;
                        }
                        ConflictPolicy::KeepOriginal => {}
                    }
                }
            }
            if changed {
                staged.dicts.insert(*dict, Arc::new(merged));
            }
        }

        log::debug!(
            "merged {} triples of bag {} into bag {}",
            staged.triple_count(),
            other.id(),
            self.id()
        );
        state.overlay.absorb(&staged);
        Ok(())
    }
}

/// Maps a possibly negative index into `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn format_items(items: &[DataItem]) -> String {
    format!("[{}]", items.iter().join(", "))
}

impl Default for DataBag {
    fn default() -> Self {
        DataBag::new()
    }
}

impl fmt::Debug for DataBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataBag(${:x})", self.id())
    }
}

impl fmt::Display for DataBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contents = self.snapshot();
        let (schemas, objects): (Vec<_>, Vec<_>) =
            contents.attrs.iter().partition(|(id, _)| id.is_schema());
        let object_values: usize = objects.iter().map(|(_, attrs)| attrs.len()).sum();
        let schema_values: usize = schemas.iter().map(|(_, attrs)| attrs.len()).sum();
        let attr_names: BTreeSet<&str> = objects
            .iter()
            .flat_map(|(_, attrs)| attrs.keys().map(|k| &**k))
            .collect();
        writeln!(
            f,
            "DataBag ${:x}{}:",
            self.id(),
            if self.is_mutable() { "" } else { " (frozen)" }
        )?;
        writeln!(
            f,
            "{} Entities/Objects with {} values in {} attrs",
            objects.len(),
            object_values,
            attr_names.len()
        )?;
        writeln!(
            f,
            "{} non empty Lists with {} items",
            contents.lists.values().filter(|l| !l.is_empty()).count(),
            contents.lists.values().map(|l| l.len()).sum::<usize>()
        )?;
        writeln!(
            f,
            "{} non empty Dicts with {} key/value entries",
            contents.dicts.values().filter(|d| !d.is_empty()).count(),
            contents.dicts.values().map(|d| d.len()).sum::<usize>()
        )?;
        write!(
            f,
            "{} schemas with {} values",
            schemas.len(),
            schema_values
        )?;
        if !self.inner.fallbacks.is_empty() {
            write!(f, "\n{} fallbacks", self.inner.fallbacks.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use kdata_common::error::ErrorKind;
    use kdata_types::{ItemIdAllocator, ItemIdKind};

    use super::*;

    fn init_logging() {
        env_logger::builder().is_test(true).try_init().ok();
    }

    fn ids(kind: ItemIdKind, count: usize) -> Vec<ItemId> {
        ItemIdAllocator::with_seed(11).allocate_many(kind, count)
    }

    #[test]
    fn test_set_and_get_attr() {
        let bag = DataBag::new();
        let id = ids(ItemIdKind::Object, 1)[0];
        assert!(bag.get_attr(id, "a").is_missing());
        bag.set_attr(id, "a", 1.into()).unwrap();
        bag.set_attr(id, "b", "x".into()).unwrap();
        assert_eq!(bag.get_attr(id, "a"), DataItem::from(1));
        assert_eq!(bag.get_attr_names(id), vec!["a", "b"]);
        bag.del_attr(id, "a").unwrap();
        assert!(bag.get_attr(id, "a").is_missing());
        assert_eq!(bag.get_attr_names(id), vec!["b"]);
    }

    #[test]
    fn test_frozen_bag_rejects_writes() {
        let bag = DataBag::new();
        let id = ids(ItemIdKind::Object, 1)[0];
        bag.set_attr(id, "a", 1.into()).unwrap();
        bag.freeze();
        assert!(!bag.is_mutable());
        let err = bag.set_attr(id, "a", 2.into()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ImmutableBagWrite));
        assert!(bag.append_to_list(id, [DataItem::from(1)]).is_err());

        let fork = bag.fork(true);
        fork.set_attr(id, "a", 2.into()).unwrap();
        assert_eq!(fork.get_attr(id, "a"), DataItem::from(2));
        assert_eq!(bag.get_attr(id, "a"), DataItem::from(1));
    }

    #[test]
    fn test_fork_is_isolated_both_ways() {
        init_logging();
        let bag = DataBag::new();
        let objects = ids(ItemIdKind::Object, 2);
        let (a, b) = (objects[0], objects[1]);
        bag.set_attr(a, "x", 1.into()).unwrap();
        let fork = bag.fork(true);
        bag.set_attr(a, "x", 10.into()).unwrap();
        fork.set_attr(b, "x", 2.into()).unwrap();
        assert_eq!(fork.get_attr(a, "x"), DataItem::from(1));
        assert!(bag.get_attr(b, "x").is_missing());
        assert_eq!(bag.get_attr(a, "x"), DataItem::from(10));
    }

    #[test]
    fn test_repeated_forks_compact() {
        init_logging();
        let mut bag = DataBag::new();
        let id = ids(ItemIdKind::Object, 1)[0];
        for i in 0..(3 * MAX_SEGMENTS as i32) {
            bag.set_attr(id, &format!("a{i}"), i.into()).unwrap();
            if i % 2 == 0 {
                bag.del_attr(id, "a0").unwrap();
            }
            bag = bag.fork(true);
            assert!(bag.read_state().shared.len() <= MAX_SEGMENTS + 1);
        }
        assert!(bag.get_attr(id, "a0").is_missing());
        assert_eq!(bag.get_attr(id, "a7"), DataItem::from(7));
        assert_eq!(bag.get_attr_names(id).len(), 3 * MAX_SEGMENTS - 1);
    }

    #[test]
    fn test_fallback_precedence() {
        let objects = ids(ItemIdKind::Object, 2);
        let (a, b) = (objects[0], objects[1]);
        let primary = DataBag::new();
        primary.set_attr(a, "x", 1.into()).unwrap();
        let fallback = DataBag::new();
        fallback.set_attr(a, "x", 100.into()).unwrap();
        fallback.set_attr(a, "y", 200.into()).unwrap();
        fallback.set_attr(b, "x", 300.into()).unwrap();

        let view = primary.with_fallback(&fallback);
        assert!(!view.is_mutable());
        assert_eq!(view.get_attr(a, "x"), DataItem::from(1));
        assert_eq!(view.get_attr(a, "y"), DataItem::from(200));
        assert_eq!(view.get_attr(b, "x"), DataItem::from(300));
        assert_eq!(view.get_attr_names(a), vec!["x", "y"]);
    }

    #[test]
    fn test_missing_in_primary_does_not_shadow_fallback() {
        let a = ids(ItemIdKind::Object, 1)[0];
        let fallback = DataBag::new();
        fallback.set_attr(a, "x", 1.into()).unwrap();
        let primary = DataBag::new();
        primary.set_attr(a, "x", DataItem::Missing).unwrap();
        assert_eq!(primary.with_fallback(&fallback).get_attr(a, "x"), DataItem::from(1));
    }

    #[test]
    fn test_deep_fallback_chain() {
        let a = ids(ItemIdKind::Object, 1)[0];
        let mut chain = DataBag::new();
        chain.set_attr(a, "attr0", 0.into()).unwrap();
        for i in 1..100 {
            let bag = DataBag::new();
            bag.set_attr(a, &format!("attr{i}"), i.into()).unwrap();
            bag.set_attr(a, "attr0", DataItem::Missing).unwrap();
            chain = bag.with_fallback(&chain);
        }
        assert_eq!(chain.get_attr(a, "attr0"), DataItem::from(0));
        assert_eq!(chain.get_attr(a, "attr57"), DataItem::from(57));
        assert_eq!(chain.get_attr_names(a).len(), 100);
    }

    #[test]
    fn test_lists() {
        let bag = DataBag::new();
        let l = ids(ItemIdKind::List, 1)[0];
        bag.set_list(l, vec![1.into(), 2.into(), 3.into()]).unwrap();
        assert_eq!(bag.list_size(l), 3);
        assert_eq!(bag.get_from_list(l, -1), DataItem::from(3));
        assert!(bag.get_from_list(l, 3).is_missing());
        assert!(bag.get_from_list(l, -4).is_missing());

        let fork = bag.fork(true);
        fork.append_to_list(l, [DataItem::from(4)]).unwrap();
        fork.set_in_list(l, 0, 10.into()).unwrap();
        fork.set_in_list(l, 100, 10.into()).unwrap();
        assert_eq!(
            fork.explode(l),
            vec![DataItem::from(10), 2.into(), 3.into(), 4.into()]
        );
        assert_eq!(bag.explode(l), vec![DataItem::from(1), 2.into(), 3.into()]);
        fork.clear_list(l).unwrap();
        assert_eq!(fork.list_size(l), 0);
        assert!(fork.get_list(l).is_some());
    }

    #[test]
    fn test_dicts() {
        let bag = DataBag::new();
        let d = ids(ItemIdKind::Dict, 1)[0];
        bag.set_in_dict(d, &"b".into(), 2.into()).unwrap();
        bag.set_in_dict(d, &"a".into(), 1.into()).unwrap();
        assert_eq!(bag.get_dict_keys(d), vec![DataItem::from("b"), "a".into()]);
        assert_eq!(bag.get_from_dict(d, &"a".into()), DataItem::from(1));
        assert!(bag.get_from_dict(d, &"z".into()).is_missing());
        assert!(bag.set_in_dict(d, &1.5f32.into(), 1.into()).is_err());

        let upper = DataBag::new();
        upper.set_in_dict(d, &"a".into(), 10.into()).unwrap();
        upper.set_in_dict(d, &"c".into(), 3.into()).unwrap();
        let view = upper.with_fallback(&bag);
        assert_eq!(view.dict_size(d), 3);
        assert_eq!(view.get_from_dict(d, &"a".into()), DataItem::from(10));
        assert_eq!(view.get_from_dict(d, &"b".into()), DataItem::from(2));
        assert_eq!(
            view.get_dict_keys(d),
            vec![DataItem::from("a"), "c".into(), "b".into()]
        );

        bag.set_in_dict(d, &"a".into(), DataItem::Missing).unwrap();
        assert_eq!(bag.dict_size(d), 1);
        bag.clear_dict(d).unwrap();
        assert_eq!(bag.dict_size(d), 0);
    }

    #[test]
    fn test_merge_inplace_conflicts() {
        init_logging();
        let a = ids(ItemIdKind::Object, 1)[0];
        let left = DataBag::new();
        left.set_attr(a, "x", 1.into()).unwrap();
        let right = DataBag::new();
        right.set_attr(a, "x", 2.into()).unwrap();
        right.set_attr(a, "y", 3.into()).unwrap();

        let err = left
            .merge_inplace(&right, MergeOptions::default())
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ConflictingMerge { .. }));
        assert!(err.to_string().contains("x"));
        assert!(left.get_attr(a, "y").is_missing());

        left.merge_inplace(&right, MergeOptions::keep_original()).unwrap();
        assert_eq!(left.get_attr(a, "x"), DataItem::from(1));
        assert_eq!(left.get_attr(a, "y"), DataItem::from(3));

        left.merge_inplace(&right, MergeOptions::overwrite()).unwrap();
        assert_eq!(left.get_attr(a, "x"), DataItem::from(2));
    }

    #[test]
    fn test_merge_schema_policy_is_separate() {
        let s = ids(ItemIdKind::Schema, 1)[0];
        let left = DataBag::new();
        left.set_attr(s, "x", DataItem::DType(kdata_types::DType::Int32))
            .unwrap();
        let right = DataBag::new();
        right
            .set_attr(s, "x", DataItem::DType(kdata_types::DType::Text))
            .unwrap();
        let options = MergeOptions::default().with_schema_conflict(ConflictPolicy::Overwrite);
        left.merge_inplace(&right, options).unwrap();
        assert_eq!(
            left.get_attr(s, "x"),
            DataItem::DType(kdata_types::DType::Text)
        );
    }

    #[test]
    fn test_merge_lists_and_dicts() {
        let l = ids(ItemIdKind::List, 1)[0];
        let d = ids(ItemIdKind::Dict, 1)[0];
        let left = DataBag::new();
        left.set_list(l, vec![1.into()]).unwrap();
        left.set_in_dict(d, &"a".into(), 1.into()).unwrap();
        let right = DataBag::new();
        right.set_in_dict(d, &"b".into(), 2.into()).unwrap();
        left.merge_inplace(&right, MergeOptions::default()).unwrap();
        assert_eq!(left.dict_size(d), 2);

        right.set_list(l, vec![2.into()]).unwrap();
        assert!(left.merge_inplace(&right, MergeOptions::default()).is_err());
        assert_eq!(left.explode(l), vec![DataItem::from(1)]);
    }

    #[test]
    fn test_enriched_and_updated_bag() {
        let a = ids(ItemIdKind::Object, 1)[0];
        let first = DataBag::new();
        first.set_attr(a, "x", 1.into()).unwrap();
        let second = DataBag::new();
        second.set_attr(a, "x", 2.into()).unwrap();
        second.set_attr(a, "y", 3.into()).unwrap();

        let enriched = DataBag::enriched_bag(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(enriched.get_attr(a, "x"), DataItem::from(1));
        assert_eq!(enriched.get_attr(a, "y"), DataItem::from(3));
        let updated = DataBag::updated_bag(&[first.clone(), second.clone()]).unwrap();
        assert_eq!(updated.get_attr(a, "x"), DataItem::from(2));
        assert!(!updated.is_mutable());

        let err = DataBag::enriched_bag(&[first]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_combined_bags_ignore_later_input_writes() {
        let a = ids(ItemIdKind::Object, 1)[0];
        let first = DataBag::new();
        first.set_attr(a, "x", 1.into()).unwrap();
        let second = DataBag::new();

        let enriched = DataBag::enriched_bag(&[first.clone(), second.clone()]).unwrap();
        let updated = DataBag::updated_bag(&[first.clone(), second.clone()]).unwrap();
        first.set_attr(a, "x", 10.into()).unwrap();
        second.set_attr(a, "y", 2.into()).unwrap();

        for combined in [&enriched, &updated] {
            assert_eq!(combined.get_attr(a, "x"), DataItem::from(1));
            assert_eq!(combined.get_attr(a, "y"), DataItem::Missing);
        }
        assert!(first.is_mutable());
        assert_eq!(first.get_attr(a, "x"), DataItem::from(10));
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let a = ids(ItemIdKind::Object, 1)[0];
        let bag = DataBag::new();
        bag.set_attr(a, "x", 1.into()).unwrap();
        let poisoner = bag.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.write_state();
            panic!("poison the bag lock");
        })
        .join();
        assert!(joined.is_err());

        assert_eq!(bag.get_attr(a, "x"), DataItem::from(1));
        bag.set_attr(a, "y", 2.into()).unwrap();
        assert_eq!(bag.get_attr(a, "y"), DataItem::from(2));
    }

    #[test]
    fn test_merge_fallbacks_is_equivalent() {
        let ids = ids(ItemIdKind::Object, 20);
        let mut rng = fastrand::Rng::with_seed(42);
        let bags: Vec<DataBag> = (0..4).map(|_| DataBag::new()).collect();
        for bag in &bags {
            for _ in 0..30 {
                let id = ids[rng.usize(..ids.len())];
                let attr = ["a", "b", "c"][rng.usize(..3)];
                bag.set_attr(id, attr, rng.i32(..100).into()).unwrap();
            }
        }
        let chain = DataBag::enriched_bag(&bags).unwrap();
        let merged = chain.merge_fallbacks();
        assert!(merged.fallbacks().is_empty());
        for id in &ids {
            for attr in ["a", "b", "c"] {
                assert_eq!(chain.get_attr(*id, attr), merged.get_attr(*id, attr));
            }
        }
    }

    #[test]
    fn test_display_and_counts() {
        let bag = DataBag::new();
        let objects = ids(ItemIdKind::Object, 2);
        let (a, b) = (objects[0], objects[1]);
        let l = ids(ItemIdKind::List, 1)[0];
        bag.set_attr(a, "x", 1.into()).unwrap();
        bag.set_attr(b, "x", 2.into()).unwrap();
        bag.set_attr(b, "y", 3.into()).unwrap();
        bag.set_list(l, vec![1.into(), 2.into()]).unwrap();
        assert_eq!(bag.approx_triple_count(), 5);
        let text = bag.to_string();
        assert!(text.contains("2 Entities/Objects with 3 values in 2 attrs"));
        assert!(text.contains("1 non empty Lists with 2 items"));
    }
}
