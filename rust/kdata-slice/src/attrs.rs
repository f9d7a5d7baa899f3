//! Attribute reads and writes on entities, objects and schemas.

use ahash::AHashMap;
use kdata_bag::DataBag;
use kdata_common::{Result, error::Error};
use kdata_types::cast::{cast_item, cast_item_implicit};
use kdata_types::{CastingPolicy, DType, DataItem, ItemId, Schema};

use crate::casting::common_schema;
use crate::schema_ops::{SCHEMA_ATTR, is_reserved_attr};
use crate::slice::DataSlice;

fn incompatible_attr_schema(name: &str, expected: Schema, assigned: Schema) -> Error {
    Error::schema_incompatible(format!(
        "the schema for attribute '{name}' is incompatible.\n\n\
         Expected schema for '{name}': {expected}\n\
         Assigned schema for '{name}': {assigned}"
    ))
}

fn no_attributes(schema: Schema) -> Error {
    Error::schema_incompatible(format!(
        "cannot get or set attributes on schema: {schema}"
    ))
}

/// Converts `items` so they conform to `schema`; primitive targets convert every
/// item, other schemas accept the items as they are.
fn conform(items: Vec<DataItem>, schema: Schema) -> Result<Vec<DataItem>> {
    match schema {
        Schema::DType(dtype) if dtype.is_primitive() => items
            .iter()
            .map(|item| cast_item(item, dtype))
            .collect(),
        _ => Ok(items),
    }
}

/// An attribute write that passed every schema check: the value whose data is
/// adopted, the items to store when they differ from the value's own, and the
/// attribute declarations to record.
struct StagedWrite {
    value: DataSlice,
    stored: Option<Vec<DataItem>>,
    declarations: Vec<(ItemId, DataItem)>,
}

impl StagedWrite {
    fn plain(value: DataSlice) -> StagedWrite {
        StagedWrite {
            value,
            stored: None,
            declarations: Vec::new(),
        }
    }
}

/// Per-item view of what an attribute read found.
struct AttrRead {
    values: Vec<DataItem>,
    schema: Schema,
}

impl DataSlice {
    /// Reads attribute `name`, failing if the schema of some present item does not
    /// declare it.
    pub fn get_attr(&self, name: &str) -> Result<DataSlice> {
        self.get_attr_impl(name, None)
    }

    /// Reads attribute `name`, using `default` (broadcast to this slice) where the
    /// attribute is undeclared or missing on a present item.
    pub fn get_attr_or(&self, name: &str, default: &DataSlice) -> Result<DataSlice> {
        self.get_attr_impl(name, Some(default))
    }

    /// Reads attribute `name`, yielding missing values where it is undeclared.
    pub fn maybe(&self, name: &str) -> Result<DataSlice> {
        self.get_attr_impl(name, Some(&DataSlice::from_item(DataItem::Missing)))
    }

    fn get_attr_impl(&self, name: &str, default: Option<&DataSlice>) -> Result<DataSlice> {
        let tolerant = default.is_some();
        let read = match self.schema() {
            Schema::Struct(schema_id) => {
                let bag = self.require_bag("get_attr")?;
                self.read_entity_attr(bag, schema_id, name, tolerant)?
            }
            Schema::OBJECT => self.read_object_attr(name, tolerant)?,
            Schema::ANY => {
                let values = match self.bag() {
                    Some(bag) => bag.get_attr_many(self.items(), name),
                    None => vec![DataItem::Missing; self.size()],
                };
                AttrRead {
                    values,
                    schema: Schema::ANY,
                }
            }
            Schema::SCHEMA => self.read_schema_attr(name, tolerant)?,
            Schema::NONE => AttrRead {
                values: vec![DataItem::Missing; self.size()],
                schema: Schema::NONE,
            },
            other => return Err(no_attributes(other)),
        };

        let Some(default) = default.filter(|d| !d.is_empty()) else {
            let values = conform(read.values, read.schema)?;
            return Ok(DataSlice::from_parts(
                self.shape().clone(),
                values.into(),
                read.schema,
                self.bag().cloned(),
            ));
        };

        let default = default.broadcast_to(self.shape())?;
        let schema = common_schema(read.schema, default.schema(), CastingPolicy::standard())?;
        let values = read
            .values
            .into_iter()
            .zip(self.items())
            .zip(default.items())
            .map(|((value, item), fallback)| {
                if value.is_missing() && item.is_present() {
                    fallback.clone()
                } else {
                    value
                }
            })
            .collect();
        let values = conform(values, schema)?;
        let bag = match (self.bag(), default.bag()) {
            (Some(own), Some(other)) if !own.is_same(other) => {
                Some(DataBag::enriched_bag(&[own.clone(), other.clone()])?)
            }
            (None, Some(other)) => Some(other.clone()),
            (own, _) => own.cloned(),
        };
        Ok(DataSlice::from_parts(
            self.shape().clone(),
            values.into(),
            schema,
            bag,
        ))
    }

    fn read_entity_attr(
        &self,
        bag: &DataBag,
        schema_id: ItemId,
        name: &str,
        tolerant: bool,
    ) -> Result<AttrRead> {
        let declared = bag.get_attr(schema_id, name);
        if declared.is_missing() {
            if tolerant {
                return Ok(AttrRead {
                    values: vec![DataItem::Missing; self.size()],
                    schema: Schema::NONE,
                });
            }
            return Err(Error::missing_attribute(name, schema_id));
        }
        Ok(AttrRead {
            values: bag.get_attr_many(self.items(), name),
            schema: Schema::from_item(&declared)?,
        })
    }

    fn read_object_attr(&self, name: &str, tolerant: bool) -> Result<AttrRead> {
        let mut values = vec![DataItem::Missing; self.size()];
        let mut schema = Schema::NONE;
        let Some(bag) = self.bag() else {
            if let Some(item) = self.items().iter().find(|i| i.is_present()) {
                return Err(Error::invalid_arg(
                    "x",
                    format!("cannot get attribute '{name}' of {item} without a DataBag"),
                ));
            }
            return Ok(AttrRead { values, schema });
        };

        let mut objects = 0;
        let mut without_schema = 0;
        for (slot, item) in values.iter_mut().zip(self.items()) {
            if item.is_missing() {
                continue;
            }
            let Some(id) = item.as_item_id() else {
                return Err(Error::schema_incompatible(format!(
                    "primitives do not have attributes, got {item}"
                )));
            };
            objects += 1;
            let Ok(Schema::Struct(obj_schema)) = Schema::from_item(&bag.get_attr(id, SCHEMA_ATTR))
            else {
                without_schema += 1;
                continue;
            };
            let declared = bag.get_attr(obj_schema, name);
            if declared.is_missing() {
                if tolerant {
                    continue;
                }
                return Err(Error::missing_attribute(name, obj_schema));
            }
            let attr_schema = Schema::from_item(&declared)?;
            schema = common_schema(schema, attr_schema, CastingPolicy::standard())
                .map_err(|e| e.with_context(format!("while reading attribute '{name}'")))?;
            *slot = bag.get_attr(id, name);
        }
        if objects > 0 && objects == without_schema {
            return Err(Error::missing_object_schema(format!(
                "none of the {objects} objects has `__schema__` while reading '{name}'"
            )));
        }
        Ok(AttrRead { values, schema })
    }

    fn read_schema_attr(&self, name: &str, tolerant: bool) -> Result<AttrRead> {
        let bag = self.require_bag("get_attr")?;
        let mut values = Vec::with_capacity(self.size());
        for item in self.items() {
            let value = match item {
                DataItem::Missing => DataItem::Missing,
                DataItem::ItemId(id) => bag.get_attr(*id, name),
                other => return Err(no_attributes(Schema::from_item(other)?)),
            };
            if value.is_missing() && item.is_present() && !tolerant {
                return Err(Error::missing_attribute(name, item));
            }
            values.push(value);
        }
        Ok(AttrRead {
            values,
            schema: Schema::SCHEMA,
        })
    }

    /// Writes attribute `name`, broadcasting `value` to this slice.
    ///
    /// The value must conform to the declared attribute schema unless
    /// `update_schema` is set, in which case the declaration is replaced (for every
    /// entity sharing the schema). Undeclared attributes are declared with the
    /// value's schema. Data reachable from `value` is adopted into this bag.
    pub fn set_attr(&self, name: &str, value: &DataSlice, update_schema: bool) -> Result<()> {
        let bag = self.require_mutable_bag("set_attr")?;
        if is_reserved_attr(name) {
            return Err(Error::invalid_arg(
                "attr_name",
                format!("attribute name '{name}' is reserved"),
            ));
        }
        let value = value.broadcast_to(self.shape())?;

        // Nothing is written to `bag` until the value has been checked.
        let staged = match self.schema() {
            Schema::Struct(schema_id) => {
                self.conform_to_declared(bag, schema_id, name, value, update_schema)?
            }
            Schema::OBJECT => self.conform_object_attr(bag, name, value, update_schema)?,
            Schema::ANY => StagedWrite::plain(value),
            Schema::SCHEMA => {
                if value.schema() != Schema::SCHEMA && !value.is_empty() {
                    return Err(Error::schema_incompatible(format!(
                        "attributes of schemas must be schemas, got {}",
                        value.schema()
                    )));
                }
                StagedWrite::plain(value)
            }
            Schema::NONE => return Ok(()),
            other => return Err(no_attributes(other)),
        };

        staged.value.adopt_into(bag)?;
        for (schema_id, declared) in staged.declarations {
            bag.set_attr(schema_id, name, declared)?;
        }
        let stored = staged.stored.as_deref().unwrap_or(staged.value.items());
        bag.set_attr_many(self.items(), name, stored)
    }

    /// Checks `value` against the declaration of `name` on `schema_id` and returns
    /// the value as it should be stored.
    fn conform_to_declared(
        &self,
        bag: &DataBag,
        schema_id: ItemId,
        name: &str,
        value: DataSlice,
        update_schema: bool,
    ) -> Result<StagedWrite> {
        let declared = bag.get_attr(schema_id, name);
        let assigned = value.schema();
        if declared.is_missing() || update_schema {
            let mut staged = StagedWrite::plain(value);
            if declared != assigned.to_item() {
                staged.declarations.push((schema_id, assigned.to_item()));
            }
            return Ok(staged);
        }
        let expected = Schema::from_item(&declared)?;
        if expected == assigned {
            return Ok(StagedWrite::plain(value));
        }
        if expected == Schema::OBJECT && assigned.is_struct() {
            return Ok(StagedWrite::plain(value.embed_schema()?));
        }
        value
            .cast_to_implicit(expected)
            .map(StagedWrite::plain)
            .map_err(|_| incompatible_attr_schema(name, expected, assigned))
    }

    fn conform_object_attr(
        &self,
        bag: &DataBag,
        name: &str,
        value: DataSlice,
        update_schema: bool,
    ) -> Result<StagedWrite> {
        let policy = CastingPolicy::standard();
        let mut pending: AHashMap<ItemId, DataItem> = AHashMap::new();
        let mut stored = Vec::with_capacity(self.size());
        for (item, v) in self.items().iter().zip(value.items()) {
            if item.is_missing() {
                stored.push(DataItem::Missing);
                continue;
            }
            let Some(id) = item.as_item_id() else {
                return Err(Error::schema_incompatible(format!(
                    "primitives do not have attributes, got {item}"
                )));
            };
            let Ok(Schema::Struct(obj_schema)) = Schema::from_item(&bag.get_attr(id, SCHEMA_ATTR))
            else {
                return Err(Error::missing_object_schema(format!(
                    "{item} has no `__schema__`"
                )));
            };
            let assigned = match (value.schema(), v.dtype()) {
                (Schema::Struct(_), _) => Schema::OBJECT,
                (Schema::OBJECT, Some(DType::ItemId)) => Schema::OBJECT,
                (Schema::OBJECT | Schema::ANY, Some(dtype)) if dtype.is_primitive() => {
                    Schema::DType(dtype)
                }
                (schema, _) => schema,
            };
            let declared = match pending.get(&obj_schema) {
                Some(declared) => declared.clone(),
                None => bag.get_attr(obj_schema, name),
            };
            if declared.is_missing() || update_schema {
                pending.insert(obj_schema, assigned.to_item());
                stored.push(v.clone());
                continue;
            }
            let expected = Schema::from_item(&declared)?;
            let converted = match expected {
                _ if expected == assigned || v.is_missing() => v.clone(),
                Schema::OBJECT | Schema::ANY => v.clone(),
                Schema::DType(dtype) if dtype.is_primitive() => cast_item_implicit(v, dtype, policy)
                    .map_err(|_| incompatible_attr_schema(name, expected, assigned))?,
                _ => return Err(incompatible_attr_schema(name, expected, assigned)),
            };
            stored.push(converted);
        }
        let value = match value.schema() {
            Schema::Struct(_) => value.embed_schema()?,
            _ => value,
        };
        Ok(StagedWrite {
            value,
            stored: Some(stored),
            declarations: pending.into_iter().collect(),
        })
    }

    /// Writes several attributes; see [`DataSlice::set_attr`].
    pub fn set_attrs(&self, attrs: &[(&str, &DataSlice)], update_schema: bool) -> Result<()> {
        for (name, value) in attrs {
            self.set_attr(name, value, update_schema)?;
        }
        Ok(())
    }

    /// Returns a copy attached to a frozen fork of the bag with `attrs` written.
    pub fn with_attrs(&self, attrs: &[(&str, &DataSlice)], update_schema: bool) -> Result<DataSlice> {
        let forked = self.fork_bag();
        forked.set_attrs(attrs, update_schema)?;
        Ok(forked.freeze_bag())
    }

    /// Removes attribute `name` from every present item.
    ///
    /// On schemas this removes the declaration. Values visible through fallback
    /// bags stay visible.
    pub fn del_attr(&self, name: &str) -> Result<()> {
        let bag = self.require_mutable_bag("del_attr")?;
        match self.schema() {
            Schema::Struct(schema_id) => {
                if bag.get_attr(schema_id, name).is_missing() {
                    return Err(Error::missing_attribute(name, schema_id));
                }
            }
            Schema::OBJECT | Schema::ANY | Schema::SCHEMA | Schema::NONE => {}
            other => return Err(no_attributes(other)),
        }
        for id in self.items().iter().filter_map(DataItem::as_item_id) {
            bag.del_attr(id, name)?;
        }
        Ok(())
    }
}
