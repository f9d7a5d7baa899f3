//! Factories of entities, objects, lists and dicts.
//!
//! Every factory comes in three flavors: `*_shaped` creates one item per slot of a
//! shape, `*_like` additionally leaves the slots of missing input items missing, and
//! `*_shaped_as` borrows the shape of another slice. Results are attached to a new
//! frozen bag; use [`DataSlice::fork_bag`] to keep writing.

use kdata_bag::{DataBag, DictEntries};
use kdata_common::{Result, error::Error};
use kdata_shape::JaggedShape;
use kdata_types::id_hash::IdHashSet;
use kdata_types::{DataItem, ItemIdKind, Schema};

use crate::context::Context;
use crate::schema_ops::{
    SCHEMA_ATTR, StructKind, dict_schema, implicit_schema_id, list_schema, schema_arg,
    struct_kind,
};
use crate::slice::DataSlice;

/// Optional arguments shared by the factories.
#[derive(Clone, Default)]
pub struct FactoryOptions {
    /// Schema of the created items: an entity, list or dict schema.
    pub schema: Option<DataSlice>,
    pub item_schema: Option<DataSlice>,
    pub key_schema: Option<DataSlice>,
    pub value_schema: Option<DataSlice>,
    /// Replace attribute declarations of `schema` that do not match the values.
    pub update_schema: bool,
    /// ItemIds to use instead of allocating fresh ones.
    pub itemid: Option<DataSlice>,
}

impl FactoryOptions {
    pub fn with_schema(mut self, schema: DataSlice) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_item_schema(mut self, schema: DataSlice) -> Self {
        self.item_schema = Some(schema);
        self
    }

    pub fn with_key_schema(mut self, schema: DataSlice) -> Self {
        self.key_schema = Some(schema);
        self
    }

    pub fn with_value_schema(mut self, schema: DataSlice) -> Self {
        self.value_schema = Some(schema);
        self
    }

    pub fn with_update_schema(mut self, update_schema: bool) -> Self {
        self.update_schema = update_schema;
        self
    }

    pub fn with_itemid(mut self, itemid: DataSlice) -> Self {
        self.itemid = Some(itemid);
        self
    }
}

/// Picks the ItemId of every slot: fresh ones, or the supplied `itemid` values.
///
/// Slots where `mask` is missing stay missing.
fn assign_ids(
    ctx: &Context,
    shape: &JaggedShape,
    mask: Option<&DataSlice>,
    kind: ItemIdKind,
    itemid: Option<&DataSlice>,
) -> Result<Vec<DataItem>> {
    let present: Vec<bool> = match mask {
        Some(mask) => mask.items().iter().map(DataItem::is_present).collect(),
        None => vec![true; shape.size()],
    };
    let required = present.iter().filter(|p| **p).count();

    let Some(itemid) = itemid else {
        let mut fresh = ctx.allocate_many(kind, required).into_iter();
        return Ok(present
            .iter()
            .map(|&p| {
                if p {
                    fresh.next().map_or(DataItem::Missing, DataItem::ItemId)
                } else {
                    DataItem::Missing
                }
            })
            .collect());
    };

    if itemid.shape() != shape {
        return Err(Error::shape_incompatible(format!(
            "`itemid` with shape={} is not compatible with shape={shape}",
            itemid.shape()
        )));
    }
    let available = itemid.present_count();
    if available < required {
        return Err(Error::insufficient_item_id(format!(
            "`itemid` only has {available} present items but {required} are required"
        )));
    }
    let mut seen = IdHashSet::default();
    let mut ids = Vec::with_capacity(present.len());
    for (&p, item) in present.iter().zip(itemid.items()) {
        if !p {
            ids.push(DataItem::Missing);
            continue;
        }
        let id = match item.as_item_id() {
            Some(id) if id.kind() == kind => id,
            Some(id) => {
                return Err(Error::invalid_arg(
                    "itemid",
                    format!("expected {kind:?} ItemIds, got {id:?}"),
                ));
            }
            None if item.is_missing() => {
                return Err(Error::insufficient_item_id(
                    "`itemid` and `shape_and_mask_from` must have the same sparsity",
                ));
            }
            None => {
                return Err(Error::invalid_arg(
                    "itemid",
                    format!("expected ItemIds, got {item}"),
                ));
            }
        };
        if !seen.insert(id) {
            return Err(Error::duplicate_item_id());
        }
        ids.push(DataItem::ItemId(id));
    }
    Ok(ids)
}

/// Resolves a structured schema option, checking it describes `expected`.
fn struct_schema_option(
    schema: &DataSlice,
    expected: StructKind,
    bag: &DataBag,
) -> Result<Schema> {
    let resolved = schema_arg("schema", schema)?;
    let Schema::Struct(id) = resolved else {
        return Err(Error::invalid_arg(
            "schema",
            format!("expected a structured schema, got {resolved}"),
        ));
    };
    let kind = struct_kind(schema.bag(), id);
    if kind != expected {
        return Err(Error::invalid_arg(
            "schema",
            format!("expected a {expected:?} schema, got a {kind:?} schema {id}"),
        ));
    }
    schema.adopt_into(bag)?;
    Ok(resolved)
}

fn build_entities(
    ctx: &Context,
    shape: JaggedShape,
    mask: Option<&DataSlice>,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    let ids = assign_ids(ctx, &shape, mask, ItemIdKind::Object, options.itemid.as_ref())?;
    let bag = DataBag::new();
    let schema = match &options.schema {
        Some(schema) => struct_schema_option(schema, StructKind::Entity, &bag)?,
        None => Schema::Struct(ctx.allocate(ItemIdKind::Schema)),
    };
    let entities = DataSlice::from_parts(shape, ids.into(), schema, Some(bag.clone()));
    entities.set_attrs(attrs, options.update_schema)?;
    bag.freeze();
    Ok(entities)
}

fn build_objects(
    ctx: &Context,
    shape: JaggedShape,
    mask: Option<&DataSlice>,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    if options.schema.is_some() {
        return Err(Error::invalid_arg(
            "schema",
            "objects own their schemas, `schema` is not accepted",
        ));
    }
    let ids = assign_ids(ctx, &shape, mask, ItemIdKind::Object, options.itemid.as_ref())?;
    let schemas: Vec<DataItem> = ids
        .iter()
        .map(|item| {
            item.as_item_id()
                .map_or(DataItem::Missing, |id| DataItem::ItemId(implicit_schema_id(id)))
        })
        .collect();
    let bag = DataBag::new();
    bag.set_attr_many(&ids, SCHEMA_ATTR, &schemas)?;
    let objects = DataSlice::from_parts(shape, ids.into(), Schema::OBJECT, Some(bag.clone()));
    objects.set_attrs(attrs, true)?;
    bag.freeze();
    Ok(objects)
}

/// The schema slice for `schema`, carrying `source`'s bag when it is structured.
fn schema_slice(schema: Schema, source: Option<&DataBag>) -> DataSlice {
    let slice = DataSlice::from_schema(schema);
    match source {
        Some(bag) if schema.is_struct() => slice.with_bag(bag.clone()),
        _ => slice,
    }
}

/// Converts `values` to `schema` the way attribute writes do.
fn conform_values(values: &DataSlice, schema: Schema, what: &str) -> Result<DataSlice> {
    if values.schema() == schema {
        return Ok(values.clone());
    }
    if schema == Schema::OBJECT && values.schema().is_struct() {
        return values.embed_schema();
    }
    values.cast_to_implicit(schema).map_err(|_| {
        Error::schema_incompatible(format!(
            "the schema for {what} is incompatible: expected {schema}, assigned {}",
            values.schema()
        ))
    })
}

/// Checks that `values` adds exactly one dimension to `shape`.
fn check_nested(shape: &JaggedShape, values: &DataSlice, what: &str) -> Result<()> {
    if values.rank() != shape.rank() + 1 || values.shape().remove_dims(shape.rank())? != *shape {
        return Err(Error::shape_incompatible(format!(
            "{what} with shape={} cannot be grouped into shape={shape}",
            values.shape()
        )));
    }
    Ok(())
}

/// Resolves the schema of one component (items, keys, values) from an explicit
/// option or the provided data.
fn component_schema(
    option: Option<&DataSlice>,
    data: Option<&DataSlice>,
) -> Result<(Schema, Option<DataBag>)> {
    if let Some(option) = option {
        return Ok((schema_arg("schema", option)?, option.bag().cloned()));
    }
    match data {
        Some(data) if data.schema() != Schema::NONE => {
            Ok((data.schema(), data.bag().cloned()))
        }
        _ => Ok((Schema::OBJECT, None)),
    }
}

fn build_lists(
    ctx: &Context,
    shape: JaggedShape,
    mask: Option<&DataSlice>,
    items: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    let ids = assign_ids(ctx, &shape, mask, ItemIdKind::List, options.itemid.as_ref())?;
    let bag = DataBag::new();
    let (schema, item_schema) = match &options.schema {
        Some(schema) => {
            let resolved = struct_schema_option(schema, StructKind::List, &bag)?;
            (resolved, schema_arg("schema", &schema.get_item_schema()?)?)
        }
        None => {
            let (item_schema, source) = component_schema(options.item_schema.as_ref(), items)?;
            let list = list_schema(&schema_slice(item_schema, source.as_ref()))?;
            list.adopt_into(&bag)?;
            (schema_arg("schema", &list)?, item_schema)
        }
    };

    if let Some(items) = items {
        check_nested(&shape, items, "items")?;
        let items = conform_values(items, item_schema, "list items")?;
        items.adopt_into(&bag)?;
        let edge = &items.shape().edges()[shape.rank()];
        for (slot, id) in ids.iter().enumerate() {
            if let Some(id) = id.as_item_id() {
                bag.set_list(id, items.items()[edge.range_at(slot)].to_vec())?;
            }
        }
    } else {
        for id in ids.iter().filter_map(DataItem::as_item_id) {
            bag.set_list(id, Vec::new())?;
        }
    }
    bag.freeze();
    Ok(DataSlice::from_parts(shape, ids.into(), schema, Some(bag)))
}

fn build_dicts(
    ctx: &Context,
    shape: JaggedShape,
    mask: Option<&DataSlice>,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    if keys.is_some() != values.is_some() {
        return Err(Error::invalid_arg(
            "keys",
            "`keys` and `values` must be provided together",
        ));
    }
    let ids = assign_ids(ctx, &shape, mask, ItemIdKind::Dict, options.itemid.as_ref())?;
    let bag = DataBag::new();
    let (schema, key_schema, value_schema) = match &options.schema {
        Some(schema) => {
            let resolved = struct_schema_option(schema, StructKind::Dict, &bag)?;
            (
                resolved,
                schema_arg("schema", &schema.get_key_schema()?)?,
                schema_arg("schema", &schema.get_value_schema()?)?,
            )
        }
        None => {
            let (key_schema, key_source) = component_schema(options.key_schema.as_ref(), keys)?;
            let (value_schema, value_source) =
                component_schema(options.value_schema.as_ref(), values)?;
            let dict = dict_schema(
                &schema_slice(key_schema, key_source.as_ref()),
                &schema_slice(value_schema, value_source.as_ref()),
            )?;
            dict.adopt_into(&bag)?;
            (schema_arg("schema", &dict)?, key_schema, value_schema)
        }
    };

    match (keys, values) {
        (Some(keys), Some(values)) => {
            check_nested(&shape, keys, "keys")?;
            let values = values.broadcast_to(keys.shape())?;
            let keys = conform_values(keys, key_schema, "dict keys")?;
            let values = conform_values(&values, value_schema, "dict values")?;
            keys.adopt_into(&bag)?;
            values.adopt_into(&bag)?;
            let edge = &keys.shape().edges()[shape.rank()];
            for (slot, id) in ids.iter().enumerate() {
                let Some(id) = id.as_item_id() else {
                    continue;
                };
                let range = edge.range_at(slot);
                let entries: DictEntries = keys.items()[range.clone()]
                    .iter()
                    .zip(&values.items()[range])
                    .filter(|(k, v)| k.is_present() && v.is_present())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                bag.set_dict(id, entries)?;
            }
        }
        _ => {
            for id in ids.iter().filter_map(DataItem::as_item_id) {
                bag.set_dict(id, DictEntries::new())?;
            }
        }
    }
    bag.freeze();
    Ok(DataSlice::from_parts(shape, ids.into(), schema, Some(bag)))
}

/// Creates entities with the given attributes, one per slot of `shape`.
pub fn new_shaped(
    ctx: &Context,
    shape: JaggedShape,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_entities(ctx, shape, None, attrs, options)
}

/// Creates entities shaped like `like`, missing wherever `like` is missing.
pub fn new_like(
    ctx: &Context,
    like: &DataSlice,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_entities(ctx, like.get_shape(), Some(like), attrs, options)
}

pub fn new_shaped_as(
    ctx: &Context,
    shape_from: &DataSlice,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_entities(ctx, shape_from.get_shape(), None, attrs, options)
}

/// Creates objects: entities that each carry their own schema, so OBJECT slices
/// can mix them freely.
pub fn obj_shaped(
    ctx: &Context,
    shape: JaggedShape,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_objects(ctx, shape, None, attrs, options)
}

pub fn obj_like(
    ctx: &Context,
    like: &DataSlice,
    attrs: &[(&str, &DataSlice)],
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_objects(ctx, like.get_shape(), Some(like), attrs, options)
}

/// Creates lists, one per slot of `shape`. The last dimension of `items` (one
/// deeper than `shape`) holds the contents of each list; without `items` every
/// list is empty.
pub fn list_shaped(
    ctx: &Context,
    shape: JaggedShape,
    items: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_lists(ctx, shape, None, items, options)
}

pub fn list_like(
    ctx: &Context,
    like: &DataSlice,
    items: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_lists(ctx, like.get_shape(), Some(like), items, options)
}

/// Creates dicts, one per slot of `shape`, from keys and values one dimension
/// deeper than `shape`. Entries with a missing key or value are skipped.
pub fn dict_shaped(
    ctx: &Context,
    shape: JaggedShape,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_dicts(ctx, shape, None, keys, values, options)
}

pub fn dict_like(
    ctx: &Context,
    like: &DataSlice,
    keys: Option<&DataSlice>,
    values: Option<&DataSlice>,
    options: &FactoryOptions,
) -> Result<DataSlice> {
    build_dicts(ctx, like.get_shape(), Some(like), keys, values, options)
}
