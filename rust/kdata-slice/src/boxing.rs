//! Conversion of host values, already boxed by a binding layer, into slices.
//!
//! [`from_boxed`] follows object semantics: lists, dicts and records become
//! objects that carry their own schema in `__schema__`, so heterogeneous nested
//! values never need a common structured schema.
//! [`DataSlice::from_boxed_nested`] instead reads nested lists as the dimensions
//! of a primitive slice.

use std::iter;

use itertools::Itertools;
use kdata_bag::{DataBag, DictEntries};
use kdata_common::{Result, error::Error};
use kdata_shape::{Edge, JaggedShape};
use kdata_types::{CastingPolicy, DataItem, ItemId, ItemIdKind, Schema};

use crate::casting::common_schema_of;
use crate::context::Context;
use crate::schema_ops::{
    SCHEMA_ATTR, dict_schema, implicit_schema_id, is_reserved_attr, list_schema,
};
use crate::slice::{DataSlice, infer_schema, item_schema};

/// A host value in a form the core understands.
#[derive(Clone, Debug)]
pub enum BoxedValue {
    Primitive(DataItem),
    Slice(DataSlice),
    List(Vec<BoxedValue>),
    /// Entries in insertion order.
    Dict(Vec<(BoxedValue, BoxedValue)>),
    /// Named fields of a record-like value; becomes an object with one attribute
    /// per field.
    Record(Vec<(String, BoxedValue)>),
}

impl BoxedValue {
    pub fn list(values: impl IntoIterator<Item = impl Into<BoxedValue>>) -> BoxedValue {
        BoxedValue::List(values.into_iter().map(Into::into).collect())
    }

    pub fn record<S: Into<String>>(
        fields: impl IntoIterator<Item = (S, BoxedValue)>,
    ) -> BoxedValue {
        BoxedValue::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            BoxedValue::Primitive(_) => "primitive",
            BoxedValue::Slice(_) => "DataSlice",
            BoxedValue::List(_) => "list",
            BoxedValue::Dict(_) => "dict",
            BoxedValue::Record(_) => "record",
        }
    }
}

macro_rules! impl_from_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for BoxedValue {
                fn from(value: $t) -> Self {
                    BoxedValue::Primitive(value.into())
                }
            }
        )*
    };
}

impl_from_primitive!(i32, i64, f32, f64, bool, &str, String, DataItem);

impl From<DataSlice> for BoxedValue {
    fn from(value: DataSlice) -> Self {
        BoxedValue::Slice(value)
    }
}

struct Boxer<'a> {
    ctx: &'a Context,
    bag: DataBag,
}

impl Boxer<'_> {
    /// Converts `value` into a single item stored in (or referring into) the bag.
    fn convert(&self, value: &BoxedValue) -> Result<(DataItem, Schema)> {
        match value {
            BoxedValue::Primitive(item) => Ok((item.clone(), item_schema(item))),
            BoxedValue::Slice(slice) => self.embed_slice(slice),
            BoxedValue::List(values) => {
                let (items, schema) = self.convert_all(values.iter())?;
                let id = self.ctx.allocate(ItemIdKind::List);
                let list_schema = list_schema(&DataSlice::from_schema(schema))?;
                self.bind_schema(id, &list_schema)?;
                self.bag.set_list(id, items)?;
                Ok((DataItem::ItemId(id), Schema::OBJECT))
            }
            BoxedValue::Dict(entries) => {
                let (keys, key_schema) = self.convert_all(entries.iter().map(|(k, _)| k))?;
                let (values, value_schema) = self.convert_all(entries.iter().map(|(_, v)| v))?;
                let id = self.ctx.allocate(ItemIdKind::Dict);
                let dict_schema = dict_schema(
                    &DataSlice::from_schema(key_schema),
                    &DataSlice::from_schema(value_schema),
                )?;
                self.bind_schema(id, &dict_schema)?;
                let mut contents = DictEntries::new();
                for (key, value) in keys.into_iter().zip(values) {
                    if key.is_present() && value.is_present() {
                        contents.insert(key, value);
                    }
                }
                self.bag.set_dict(id, contents)?;
                Ok((DataItem::ItemId(id), Schema::OBJECT))
            }
            BoxedValue::Record(fields) => {
                let id = self.ctx.allocate(ItemIdKind::Object);
                let schema = implicit_schema_id(id);
                self.bag.set_attr(id, SCHEMA_ATTR, DataItem::ItemId(schema))?;
                for (name, field) in fields {
                    if is_reserved_attr(name) {
                        return Err(Error::invalid_arg(
                            name.clone(),
                            "reserved attribute names cannot be record fields",
                        ));
                    }
                    let (item, field_schema) = self.convert(field)?;
                    self.bag.set_attr(schema, name, field_schema.to_item())?;
                    self.bag.set_attr(id, name, item)?;
                }
                Ok((DataItem::ItemId(id), Schema::OBJECT))
            }
        }
    }

    /// Converts sibling values and picks the schema they are stored under.
    fn convert_all<'v>(
        &self,
        values: impl Iterator<Item = &'v BoxedValue>,
    ) -> Result<(Vec<DataItem>, Schema)> {
        let (items, schemas): (Vec<_>, Vec<_>) =
            values.map(|v| self.convert(v)).collect::<Result<Vec<_>>>()?.into_iter().unzip();
        let distinct = schemas
            .into_iter()
            .filter(|s| *s != Schema::NONE)
            .unique()
            .collect_vec();
        let schema = match distinct.as_slice() {
            [] => Schema::OBJECT,
            [single] => *single,
            many => common_schema_of(
                iter::once(Schema::OBJECT).chain(many.iter().copied()),
                CastingPolicy::standard(),
            )?,
        };
        Ok((items, schema))
    }

    fn bind_schema(&self, id: ItemId, schema: &DataSlice) -> Result<()> {
        schema.adopt_into(&self.bag)?;
        let schema = schema.as_item().cloned().unwrap_or_default();
        self.bag.set_attr(id, SCHEMA_ATTR, schema)
    }

    fn embed_slice(&self, slice: &DataSlice) -> Result<(DataItem, Schema)> {
        let Some(item) = slice.as_item() else {
            return Err(Error::unsupported_value(format!(
                "only DataItems can be nested in boxed values, got a DataSlice of rank {}",
                slice.rank()
            )));
        };
        if slice.bag().is_some() {
            slice.adopt_into(&self.bag)?;
        }
        match (slice.schema(), item.as_item_id()) {
            (schema @ Schema::Struct(_), Some(id)) => {
                self.bag.set_attr(id, SCHEMA_ATTR, schema.to_item())?;
                Ok((item.clone(), Schema::OBJECT))
            }
            (Schema::Struct(_), None) => Ok((DataItem::Missing, Schema::OBJECT)),
            (schema, _) => Ok((item.clone(), schema)),
        }
    }
}

/// Converts a boxed value into a DataItem.
///
/// Containers and records are written into `bag` when given (it must be mutable);
/// otherwise into a new bag that is frozen before returning. A top-level
/// [`BoxedValue::Slice`] is returned as is, adopted into `bag` when given.
pub fn from_boxed(ctx: &Context, value: &BoxedValue, bag: Option<&DataBag>) -> Result<DataSlice> {
    if bag.is_some_and(|bag| !bag.is_mutable()) {
        return Err(Error::immutable_bag_write());
    }
    if let BoxedValue::Slice(slice) = value {
        return match bag {
            Some(bag) => {
                slice.adopt_into(bag)?;
                Ok(slice.with_bag(bag.clone()))
            }
            None => Ok(slice.clone()),
        };
    }

    let target = bag.cloned().unwrap_or_default();
    let boxer = Boxer {
        ctx,
        bag: target.clone(),
    };
    let (item, schema) = boxer.convert(value)?;
    let attached = match bag {
        Some(_) => Some(target),
        None if item.as_item_id().is_some() => {
            target.freeze();
            Some(target)
        }
        None => None,
    };
    log::debug!("converted boxed {} into schema {schema}", value.kind());
    Ok(DataSlice::from_parts(
        JaggedShape::scalar(),
        vec![item].into(),
        schema,
        attached,
    ))
}

impl DataSlice {
    /// Builds a primitive slice from nested lists, one dimension per nesting level.
    ///
    /// Lists may be ragged but every leaf must sit at the same depth.
    pub fn from_boxed_nested(value: &BoxedValue) -> Result<DataSlice> {
        let mut level = vec![value];
        let mut edges = Vec::new();
        loop {
            let lists = level
                .iter()
                .filter(|v| matches!(v, BoxedValue::List(_)))
                .count();
            if lists == 0 {
                break;
            }
            if lists != level.len() {
                return Err(Error::unsupported_value(
                    "nested lists must have the same depth everywhere",
                ));
            }
            let mut sizes = Vec::with_capacity(level.len());
            let mut next = Vec::new();
            for value in &level {
                if let BoxedValue::List(children) = value {
                    sizes.push(children.len());
                    next.extend(children);
                }
            }
            edges.push(Edge::from_sizes(&sizes));
            level = next;
        }
        let items = level
            .into_iter()
            .map(|value| match value {
                BoxedValue::Primitive(item) => Ok(item.clone()),
                other => Err(Error::unsupported_value(format!(
                    "only primitives can be leaves of nested lists, got a {}",
                    other.kind()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        let schema = infer_schema(&items)?;
        DataSlice::new(JaggedShape::from_edges(edges)?, items, schema, None)
    }
}
