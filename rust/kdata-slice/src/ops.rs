//! Slice operators: filtering, indexing, grouping and list/dict access.

use ahash::AHashMap;
use kdata_common::{Result, error::Error};
use kdata_shape::{Edge, JaggedShape};
use kdata_types::{CastingPolicy, DataItem, Schema};

use crate::casting::common_schema;
use crate::schema_ops::{ITEMS_ATTR, KEYS_ATTR, SCHEMA_ATTR, VALUES_ATTR};
use crate::slice::DataSlice;

/// Maps a possibly negative index into `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

impl DataSlice {
    /// Keeps the items where `filter` is present, compacting the last dimension.
    ///
    /// With `expand_filter` a coarser filter is first broadcast to this slice;
    /// otherwise the shapes must match.
    pub fn select(&self, filter: &DataSlice, expand_filter: bool) -> Result<DataSlice> {
        let is_mask = match filter.schema() {
            Schema::MASK => true,
            Schema::OBJECT | Schema::ANY | Schema::NONE => filter
                .items()
                .iter()
                .all(|item| item.is_missing() || matches!(item, DataItem::Present)),
            _ => false,
        };
        if !is_mask {
            return Err(Error::schema_incompatible(format!(
                "the schema of the filter DataSlice should only be MASK, got {}",
                filter.schema()
            )));
        }
        let filter = if expand_filter {
            filter.broadcast_to(self.shape())?
        } else if filter.shape() != self.shape() {
            return Err(Error::shape_incompatible(format!(
                "the shape of the filter {} must match the shape of the DataSlice {}",
                filter.shape(),
                self.shape()
            )));
        } else {
            filter.clone()
        };

        if self.is_item() {
            if filter.items()[0].is_present() {
                return Ok(self.clone());
            }
            return Ok(self.with_data(vec![DataItem::Missing].into(), self.schema()));
        }

        let last = &self.shape().edges()[self.rank() - 1];
        let mut kept = Vec::new();
        let mut sizes = Vec::with_capacity(last.parent_size());
        for range in last.ranges() {
            let before = kept.len();
            kept.extend(range.filter(|&i| filter.items()[i].is_present()));
            sizes.push(kept.len() - before);
        }
        let shape = self
            .shape()
            .remove_dims(self.rank() - 1)?
            .add_dims(&[Edge::from_sizes(&sizes)])?;
        DataSlice::new(
            shape,
            self.data().gather(&kept),
            self.schema(),
            self.bag().cloned(),
        )
    }

    /// Picks the item at `indices` within each group of the last dimension.
    ///
    /// Negative indices count from the end of the group; out-of-range and missing
    /// indices yield missing items.
    pub fn take(&self, indices: &DataSlice) -> Result<DataSlice> {
        if self.is_item() {
            return Err(Error::invalid_arg("x", "DataItem is not supported."));
        }
        let indices = match indices.schema() {
            Schema::INT32 | Schema::INT64 => indices.clone(),
            Schema::NONE | Schema::OBJECT | Schema::ANY => indices.cast_to_narrow(Schema::INT64)?,
            other => {
                return Err(Error::schema_incompatible(format!(
                    "the schema of indices must be INT32 or INT64, got {other}"
                )));
            }
        };
        let groups = self.shape().remove_dims(self.rank() - 1)?;
        let shape = JaggedShape::common_shape([&groups, indices.shape()]).ok_or_else(|| {
            Error::shape_incompatible(format!(
                "DataSlice with shape={} cannot be indexed by indices with shape={}",
                self.shape(),
                indices.shape()
            ))
        })?;
        let indices = indices.broadcast_to(&shape)?;
        let group_of = groups.expansion_indices(&shape).ok_or_else(|| {
            Error::shape_incompatible(format!(
                "shape {groups} cannot be expanded to {shape}"
            ))
        })?;
        let last = &self.shape().edges()[self.rank() - 1];
        let data = group_of
            .iter()
            .zip(indices.items())
            .map(|(&group, index)| {
                let range = last.range_at(group);
                index
                    .as_i64()
                    .and_then(|i| resolve_index(i, range.len()))
                    .map_or(DataItem::Missing, |i| self.items()[range.start + i].clone())
            })
            .collect::<Vec<_>>();
        Ok(DataSlice::from_parts(
            shape,
            data.into(),
            self.schema(),
            self.bag().cloned(),
        ))
    }

    /// Alias of [`DataSlice::take`].
    pub fn at(&self, indices: &DataSlice) -> Result<DataSlice> {
        self.take(indices)
    }

    /// Groups the last dimension by the values of `keys` (by the items themselves
    /// when `keys` is empty), adding a dimension.
    ///
    /// Groups appear in the order their first element appears; elements with a
    /// missing key are dropped.
    pub fn group_by(&self, keys: &[&DataSlice]) -> Result<DataSlice> {
        if self.is_item() {
            return Err(Error::invalid_arg(
                "x",
                "group_by is not supported for scalar data",
            ));
        }
        let keys: Vec<&DataSlice> = if keys.is_empty() { vec![self] } else { keys.to_vec() };
        if let Some(key) = keys.iter().find(|k| k.shape() != self.shape()) {
            return Err(Error::shape_incompatible(format!(
                "all arguments must have the same shape, got {} and {}",
                self.shape(),
                key.shape()
            )));
        }

        let last = &self.shape().edges()[self.rank() - 1];
        let mut order = Vec::with_capacity(self.size());
        let mut group_counts = Vec::with_capacity(last.parent_size());
        let mut group_sizes = Vec::new();
        for range in last.ranges() {
            let mut groups: AHashMap<Vec<DataItem>, usize> = AHashMap::new();
            let mut members: Vec<Vec<usize>> = Vec::new();
            for i in range {
                let key: Vec<DataItem> = keys.iter().map(|k| k.items()[i].clone()).collect();
                if key.iter().any(DataItem::is_missing) {
                    continue;
                }
                let next = members.len();
                let group = *groups.entry(key).or_insert(next);
                if group == next {
                    members.push(Vec::new());
                }
                members[group].push(i);
            }
            group_counts.push(members.len());
            for group in members {
                group_sizes.push(group.len());
                order.extend(group);
            }
        }
        let shape = self.shape().remove_dims(self.rank() - 1)?.add_dims(&[
            Edge::from_sizes(&group_counts),
            Edge::from_sizes(&group_sizes),
        ])?;
        DataSlice::new(
            shape,
            self.data().gather(&order),
            self.schema(),
            self.bag().cloned(),
        )
    }

    /// Schema of a reserved component (`__items__`, `__keys__`, `__values__`) of
    /// the list or dict schema of this slice.
    fn component_schema(&self, attr: &str, kind: &str) -> Result<Schema> {
        match self.schema() {
            Schema::Struct(id) => {
                let declared = self.require_bag(kind)?.get_attr(id, attr);
                if declared.is_missing() {
                    return Err(Error::schema_incompatible(format!(
                        "expected {kind}s, got a DataSlice with schema {id}"
                    )));
                }
                Schema::from_item(&declared)
            }
            Schema::OBJECT => {
                let bag = self.require_bag(kind)?;
                let mut schema = Schema::NONE;
                for id in self.items().iter().filter_map(DataItem::as_item_id) {
                    let own = bag.get_attr(id, SCHEMA_ATTR);
                    let Some(own) = own.as_item_id() else {
                        return Err(Error::missing_object_schema(format!(
                            "{id} has no `__schema__`"
                        )));
                    };
                    let declared = bag.get_attr(own, attr);
                    if declared.is_present() {
                        schema = common_schema(
                            schema,
                            Schema::from_item(&declared)?,
                            CastingPolicy::standard(),
                        )?;
                    }
                }
                Ok(schema)
            }
            Schema::ANY => Ok(Schema::ANY),
            Schema::NONE => Ok(Schema::NONE),
            other => Err(Error::schema_incompatible(format!(
                "expected {kind}s, got a DataSlice with schema {other}"
            ))),
        }
    }

    /// Adds a dimension holding the items of every list.
    pub fn explode(&self) -> Result<DataSlice> {
        let item_schema = self.component_schema(ITEMS_ATTR, "list")?;
        let mut sizes = Vec::with_capacity(self.size());
        let mut data = Vec::new();
        for item in self.items() {
            let items = match (item.as_item_id(), self.bag()) {
                (Some(id), Some(bag)) => bag.explode(id),
                _ => Vec::new(),
            };
            sizes.push(items.len());
            data.extend(items);
        }
        DataSlice::new(
            self.shape().add_dims(&[Edge::from_sizes(&sizes)])?,
            data,
            item_schema,
            self.bag().cloned(),
        )
    }

    /// Number of items of every list as INT64; missing for missing lists.
    pub fn list_size(&self) -> Result<DataSlice> {
        self.component_schema(ITEMS_ATTR, "list")?;
        let data = self
            .items()
            .iter()
            .map(|item| match (item.as_item_id(), self.bag()) {
                (Some(id), Some(bag)) => DataItem::Int64(bag.list_size(id) as i64),
                _ => DataItem::Missing,
            })
            .collect::<Vec<_>>();
        Ok(DataSlice::from_parts(
            self.get_shape(),
            data.into(),
            Schema::INT64,
            None,
        ))
    }

    /// The item at `index` (broadcast to this slice) of every list.
    pub fn get_from_list(&self, index: &DataSlice) -> Result<DataSlice> {
        let item_schema = self.component_schema(ITEMS_ATTR, "list")?;
        let index = index.broadcast_to(self.shape())?;
        let data = self
            .items()
            .iter()
            .zip(index.items())
            .map(|(item, index)| match (item.as_item_id(), index.as_i64(), self.bag()) {
                (Some(id), Some(i), Some(bag)) => bag.get_from_list(id, i),
                _ => DataItem::Missing,
            })
            .collect::<Vec<_>>();
        Ok(self.with_data(data.into(), item_schema))
    }

    /// Number of entries of every dict as INT64; missing for missing dicts.
    pub fn dict_size(&self) -> Result<DataSlice> {
        self.component_schema(KEYS_ATTR, "dict")?;
        let data = self
            .items()
            .iter()
            .map(|item| match (item.as_item_id(), self.bag()) {
                (Some(id), Some(bag)) => DataItem::Int64(bag.dict_size(id) as i64),
                _ => DataItem::Missing,
            })
            .collect::<Vec<_>>();
        Ok(DataSlice::from_parts(
            self.get_shape(),
            data.into(),
            Schema::INT64,
            None,
        ))
    }

    fn dict_component(&self, attr: &str, keys: bool) -> Result<DataSlice> {
        let schema = self.component_schema(attr, "dict")?;
        let mut sizes = Vec::with_capacity(self.size());
        let mut data = Vec::new();
        for item in self.items() {
            let part = match (item.as_item_id(), self.bag()) {
                (Some(id), Some(bag)) if keys => bag.get_dict_keys(id),
                (Some(id), Some(bag)) => bag.get_dict_values(id),
                _ => Vec::new(),
            };
            sizes.push(part.len());
            data.extend(part);
        }
        DataSlice::new(
            self.shape().add_dims(&[Edge::from_sizes(&sizes)])?,
            data,
            schema,
            self.bag().cloned(),
        )
    }

    /// Adds a dimension holding the keys of every dict in insertion order.
    pub fn get_keys(&self) -> Result<DataSlice> {
        self.dict_component(KEYS_ATTR, true)
    }

    /// Adds a dimension holding the values of every dict, aligned with
    /// [`DataSlice::get_keys`].
    pub fn get_values(&self) -> Result<DataSlice> {
        self.dict_component(VALUES_ATTR, false)
    }

    /// Looks up `keys` (broadcast to this slice) in every dict.
    pub fn get_from_dict(&self, keys: &DataSlice) -> Result<DataSlice> {
        let value_schema = self.component_schema(VALUES_ATTR, "dict")?;
        let keys = keys.broadcast_to(self.shape())?;
        let data = self
            .items()
            .iter()
            .zip(keys.items())
            .map(|(item, key)| match (item.as_item_id(), self.bag()) {
                (Some(id), Some(bag)) if key.is_present() => bag.get_from_dict(id, key),
                _ => DataItem::Missing,
            })
            .collect::<Vec<_>>();
        Ok(self.with_data(data.into(), value_schema))
    }
}
