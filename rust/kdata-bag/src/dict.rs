//! Insertion-ordered dict contents.

use ahash::AHashMap;
use kdata_common::{Result, error::Error};
use kdata_types::{DType, DataItem};

/// Key/value entries of one dict, iterated in insertion order.
///
/// Values live in a `Vec` and an index maps each key to its position, so lookups
/// are hashed while iteration order stays stable.
#[derive(Debug, Clone, Default)]
pub struct DictEntries {
    entries: Vec<(DataItem, DataItem)>,
    index: AHashMap<DataItem, usize>,
}

impl DictEntries {
    pub fn new() -> DictEntries {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &DataItem) -> Option<&DataItem> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &DataItem) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces `key`. A missing `value` removes the key.
    pub fn insert(&mut self, key: DataItem, value: DataItem) {
        if value.is_missing() {
            self.remove(&key);
            return;
        }
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &DataItem) -> Option<DataItem> {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for (_, i) in self.index.iter_mut() {
            if *i > pos {
                *i -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &DataItem> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &DataItem> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DataItem, &DataItem)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Adds the entries of `lower` whose keys are not present here.
    pub(crate) fn fill_from(&mut self, lower: &DictEntries) {
        for (key, value) in lower.iter() {
            if !self.contains_key(key) {
                self.insert(key.clone(), value.clone());
            }
        }
    }
}

impl PartialEq for DictEntries {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl FromIterator<(DataItem, DataItem)> for DictEntries {
    fn from_iter<T: IntoIterator<Item = (DataItem, DataItem)>>(iter: T) -> Self {
        let mut dict = DictEntries::new();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

/// Checks that `key` may be used as a dict key.
///
/// Floats and schemas are rejected. Missing keys are accepted here and skipped
/// by the writers.
pub fn validate_dict_key(key: &DataItem) -> Result<()> {
    match key.dtype() {
        Some(dtype @ (DType::Float32 | DType::Float64 | DType::Schema | DType::Expr)) => Err(
            Error::schema_incompatible(format!("dict keys cannot be {dtype}, got {key}")),
        ),
        _ => Ok(()),
    }
}
