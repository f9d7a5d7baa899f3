//! Schema factories and schema inspection.
//!
//! Structured schemas live in bags like entities do: the schema ItemId carries one
//! attribute per declared attribute, whose value is the attribute's schema. List
//! schemas declare `__items__`, dict schemas `__keys__` and `__values__`. Objects
//! store their own schema in the `__schema__` attribute.

use std::collections::BTreeSet;

use kdata_bag::DataBag;
use kdata_common::{Result, error::Error};
use kdata_types::item_id::named_schema_id;
use kdata_types::{DType, DataItem, ItemId, ItemIdKind, Schema, UuidBuilder};

use crate::context::Context;
use crate::slice::DataSlice;

pub const SCHEMA_ATTR: &str = "__schema__";
pub const ITEMS_ATTR: &str = "__items__";
pub const KEYS_ATTR: &str = "__keys__";
pub const VALUES_ATTR: &str = "__values__";

const LIST_SCHEMA_SEED: &str = "__list_schema__";
const DICT_SCHEMA_SEED: &str = "__dict_schema__";
const IMPLICIT_SCHEMA_SEED: &str = "__implicit_schema__";

/// Returns `true` for attribute names reserved for schema bookkeeping.
pub fn is_reserved_attr(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// What a structured schema describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Entity,
    List,
    Dict,
}

pub(crate) fn struct_kind(bag: Option<&DataBag>, schema: ItemId) -> StructKind {
    let Some(bag) = bag else {
        return StructKind::Entity;
    };
    if bag.get_attr(schema, ITEMS_ATTR).is_present() {
        StructKind::List
    } else if bag.get_attr(schema, KEYS_ATTR).is_present() {
        StructKind::Dict
    } else {
        StructKind::Entity
    }
}

/// The schema owned by a single object created without an explicit schema.
pub(crate) fn implicit_schema_id(object: ItemId) -> ItemId {
    let item = DataItem::ItemId(object);
    UuidBuilder::new(ItemIdKind::Schema, IMPLICIT_SCHEMA_SEED)
        .field("self", &item)
        .build()
}

/// Extracts the schema held by a rank-0 SCHEMA slice.
pub(crate) fn schema_arg(name: &str, slice: &DataSlice) -> Result<Schema> {
    match slice.as_item() {
        Some(item) if slice.schema() == Schema::SCHEMA && item.is_present() => {
            Schema::from_item(item)
        }
        _ => Err(Error::invalid_arg(
            name.to_string(),
            format!("expected a schema DataItem, got {slice}"),
        )),
    }
}

fn build_schema(id: ItemId, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    let bag = DataBag::new();
    for (name, value) in attrs {
        let schema = schema_arg(name, value)?;
        value.adopt_into(&bag)?;
        bag.set_attr(id, name, schema.to_item())?;
    }
    bag.freeze();
    Ok(DataSlice::from_schema(Schema::Struct(id)).with_bag(bag))
}

fn uu_schema_id(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<ItemId> {
    let items = attrs
        .iter()
        .map(|(name, value)| Ok((*name, schema_arg(name, value)?.to_item())))
        .collect::<Result<Vec<(&str, DataItem)>>>()?;
    Ok(UuidBuilder::new(ItemIdKind::Schema, seed)
        .fields(items.iter().map(|(name, item)| (*name, item)))
        .build())
}

/// Creates an entity schema with a freshly allocated ItemId.
pub fn new_schema(ctx: &Context, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    build_schema(ctx.allocate(ItemIdKind::Schema), attrs)
}

/// Creates an entity schema whose ItemId is derived from `seed` and the attribute
/// schemas, so equal inputs yield the same schema in any bag.
pub fn uu_schema(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    build_schema(uu_schema_id(seed, attrs)?, attrs)
}

/// Creates an entity schema whose ItemId is derived from `name` only.
pub fn named_schema(name: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    build_schema(named_schema_id(name), attrs)
}

/// The list schema with the given item schema.
pub fn list_schema(item_schema: &DataSlice) -> Result<DataSlice> {
    let attrs = [(ITEMS_ATTR, item_schema)];
    build_schema(uu_schema_id(LIST_SCHEMA_SEED, &attrs)?, &attrs)
}

/// The dict schema with the given key and value schemas.
pub fn dict_schema(key_schema: &DataSlice, value_schema: &DataSlice) -> Result<DataSlice> {
    let key = schema_arg("key_schema", key_schema)?;
    if let Schema::DType(dtype @ (DType::Float32 | DType::Float64 | DType::Expr | DType::Schema)) =
        key
    {
        return Err(Error::schema_incompatible(format!(
            "dict keys cannot be {dtype}"
        )));
    }
    let attrs = [(KEYS_ATTR, key_schema), (VALUES_ATTR, value_schema)];
    build_schema(uu_schema_id(DICT_SCHEMA_SEED, &attrs)?, &attrs)
}

impl DataSlice {
    /// The schema of the slice as a rank-0 SCHEMA slice sharing this slice's bag.
    pub fn get_schema(&self) -> DataSlice {
        let schema = DataSlice::from_schema(self.schema());
        match self.bag() {
            Some(bag) => schema.with_bag(bag.clone()),
            None => schema,
        }
    }

    fn checked_retag(&self, schema: Schema) -> Result<DataSlice> {
        if let Some(item) = self.items().iter().find(|i| !schema.is_consistent_with(i)) {
            return Err(Error::schema_incompatible(format!(
                "item {item} is not consistent with schema {schema}"
            )));
        }
        Ok(self.with_schema_unchecked(schema))
    }

    /// Reinterprets the data under `schema` without touching any bag.
    ///
    /// A structured schema must either have no bag or live in this slice's bag.
    pub fn with_schema(&self, schema: &DataSlice) -> Result<DataSlice> {
        let target = schema_arg("schema", schema)?;
        if target.is_struct() {
            if let Some(schema_bag) = schema.bag() {
                if !self.bag().is_some_and(|bag| bag.is_same(schema_bag)) {
                    return Err(Error::invalid_arg(
                        "schema",
                        "with_schema does not accept schemas with different DataBag \
                         attached. Please use `set_schema`",
                    ));
                }
            }
        }
        self.checked_retag(target)
    }

    /// Like [`DataSlice::with_schema`], but attaches the schema's bag to the result
    /// (behind this slice's own bag) so schemas can be reused across bags.
    pub fn set_schema(&self, schema: &DataSlice) -> Result<DataSlice> {
        let target = schema_arg("schema", schema)?;
        let retagged = self.checked_retag(target)?;
        let bag = match (self.bag(), schema.bag()) {
            (Some(own), Some(other)) if !own.is_same(other) => {
                DataBag::enriched_bag(&[own.clone(), other.clone()])?
            }
            (None, Some(other)) => other.clone(),
            _ => return Ok(retagged),
        };
        Ok(retagged.with_bag(bag))
    }

    /// For OBJECT (or ANY) data, returns the per-item schemas: the stored
    /// `__schema__` of objects and the dtype of primitives.
    pub fn get_obj_schema(&self) -> Result<DataSlice> {
        if !matches!(self.schema(), Schema::DType(DType::Object | DType::Any)) {
            return Err(Error::schema_incompatible(format!(
                "DataSlice must have OBJECT schema, got {}",
                self.schema()
            )));
        }
        let schemas = self
            .items()
            .iter()
            .map(|item| match item.as_item_id() {
                Some(id) if !id.is_schema() => {
                    Ok(self.require_bag("get_obj_schema")?.get_attr(id, SCHEMA_ATTR))
                }
                _ => Ok(item.dtype().map_or(DataItem::Missing, DataItem::DType)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_data(schemas.into(), Schema::SCHEMA))
    }

    /// Converts the slice to OBJECT, recording the schema of entities in their
    /// `__schema__` attribute.
    ///
    /// The bag is written in place when mutable, otherwise a frozen fork carries the
    /// embedded schemas.
    pub fn embed_schema(&self) -> Result<DataSlice> {
        match self.schema() {
            Schema::DType(DType::Object) => Ok(self.clone()),
            Schema::DType(dtype) if dtype.is_primitive() || dtype == DType::None => {
                Ok(self.with_schema_unchecked(Schema::OBJECT))
            }
            Schema::Struct(id) => {
                let source = self.require_bag("embed_schema")?;
                let bag = if source.is_mutable() {
                    source.clone()
                } else {
                    source.fork(true)
                };
                let schema_items = vec![Schema::Struct(id).to_item(); self.size()];
                bag.set_attr_many(self.items(), SCHEMA_ATTR, &schema_items)?;
                if !source.is_mutable() {
                    bag.freeze();
                }
                Ok(self.with_bag(bag).with_schema_unchecked(Schema::OBJECT))
            }
            other => Err(Error::schema_incompatible(format!(
                "cannot embed schema {other} into objects"
            ))),
        }
    }

    /// Same as [`DataSlice::embed_schema`].
    pub fn to_object(&self) -> Result<DataSlice> {
        self.embed_schema()
    }

    fn schema_item_id(&self, operation: &str) -> Result<ItemId> {
        match schema_arg("x", self)? {
            Schema::Struct(id) => Ok(id),
            other => Err(Error::schema_incompatible(format!(
                "{operation} expects a structured schema, got {other}"
            ))),
        }
    }

    fn reserved_schema_attr(&self, attr: &str, kind: &str) -> Result<DataSlice> {
        let id = self.schema_item_id(&format!("get_{kind}_schema"))?;
        let bag = self.require_bag("schema inspection")?;
        let value = bag.get_attr(id, attr);
        if value.is_missing() {
            return Err(Error::schema_incompatible(format!(
                "expected a {kind} schema, got {id}"
            )));
        }
        Ok(DataSlice::from_schema(Schema::from_item(&value)?).with_bag(bag.clone()))
    }

    /// The item schema of a list schema.
    pub fn get_item_schema(&self) -> Result<DataSlice> {
        self.reserved_schema_attr(ITEMS_ATTR, "list")
    }

    /// The key schema of a dict schema.
    pub fn get_key_schema(&self) -> Result<DataSlice> {
        self.reserved_schema_attr(KEYS_ATTR, "dict")
    }

    /// The value schema of a dict schema.
    pub fn get_value_schema(&self) -> Result<DataSlice> {
        self.reserved_schema_attr(VALUES_ATTR, "dict")
    }

    fn kind_of_schema(&self) -> Option<StructKind> {
        self.schema().struct_id().map(|id| struct_kind(self.bag(), id))
    }

    fn all_present_ids(&self, pred: impl Fn(ItemId) -> bool) -> bool {
        self.items()
            .iter()
            .filter(|item| item.is_present())
            .all(|item| item.as_item_id().is_some_and(&pred))
    }

    fn is_dynamic(&self) -> bool {
        matches!(self.schema(), Schema::DType(DType::Object | DType::Any))
    }

    /// Returns `true` for primitive data, including OBJECT data holding only
    /// primitives.
    pub fn is_primitive(&self) -> bool {
        self.schema().is_primitive()
            || (self.is_dynamic()
                && self
                    .items()
                    .iter()
                    .filter(|item| item.is_present())
                    .all(DataItem::is_primitive))
    }

    pub fn is_entity(&self) -> bool {
        self.kind_of_schema() == Some(StructKind::Entity)
    }

    pub fn is_list(&self) -> bool {
        self.kind_of_schema() == Some(StructKind::List)
            || (self.is_dynamic() && self.all_present_ids(ItemId::is_list))
    }

    pub fn is_dict(&self) -> bool {
        self.kind_of_schema() == Some(StructKind::Dict)
            || (self.is_dynamic() && self.all_present_ids(ItemId::is_dict))
    }

    /// Returns `true` for a rank-0 SCHEMA slice holding a list schema.
    pub fn is_list_schema(&self) -> bool {
        self.schema_item_id("is_list_schema")
            .is_ok_and(|id| struct_kind(self.bag(), id) == StructKind::List)
    }

    /// Returns `true` for a rank-0 SCHEMA slice holding a dict schema.
    pub fn is_dict_schema(&self) -> bool {
        self.schema_item_id("is_dict_schema")
            .is_ok_and(|id| struct_kind(self.bag(), id) == StructKind::Dict)
    }

    /// Returns `true` for a rank-0 SCHEMA slice holding an entity schema.
    pub fn is_entity_schema(&self) -> bool {
        self.schema_item_id("is_entity_schema")
            .is_ok_and(|id| struct_kind(self.bag(), id) == StructKind::Entity)
    }

    /// Sorted names of the non-reserved attributes.
    ///
    /// For entities these are the attributes declared by the schema; for schemas,
    /// the attributes they declare; for objects, the attributes declared by the
    /// per-item schemas (all of them, or only the shared ones with `intersection`).
    pub fn get_attr_names(&self, intersection: bool) -> Result<Vec<String>> {
        let declared = |bag: &DataBag, schema: ItemId| -> BTreeSet<String> {
            bag.get_attr_names(schema)
                .into_iter()
                .filter(|name| !is_reserved_attr(name))
                .collect()
        };
        let names = match self.schema() {
            Schema::Struct(id) => declared(self.require_bag("get_attr_names")?, id),
            Schema::SCHEMA => {
                let bag = self.require_bag("get_attr_names")?;
                let mut sets = self
                    .items()
                    .iter()
                    .filter_map(|item| item.as_item_id())
                    .map(|id| declared(bag, id));
                combine_sets(&mut sets, intersection)
            }
            Schema::OBJECT => {
                let schemas = self.get_obj_schema()?;
                let bag = self.require_bag("get_attr_names")?;
                let mut sets = schemas
                    .items()
                    .iter()
                    .filter(|item| item.is_present())
                    .map(|item| match item.as_item_id() {
                        Some(id) => declared(bag, id),
                        None => BTreeSet::new(),
                    });
                combine_sets(&mut sets, intersection)
            }
            other => {
                return Err(Error::schema_incompatible(format!(
                    "cannot get attribute names of {other} data"
                )));
            }
        };
        Ok(names.into_iter().collect())
    }
}

fn combine_sets(
    sets: &mut dyn Iterator<Item = BTreeSet<String>>,
    intersection: bool,
) -> BTreeSet<String> {
    let Some(first) = sets.next() else {
        return BTreeSet::new();
    };
    sets.fold(first, |acc, set| {
        if intersection {
            acc.intersection(&set).cloned().collect()
        } else {
            acc.union(&set).cloned().collect()
        }
    })
}
