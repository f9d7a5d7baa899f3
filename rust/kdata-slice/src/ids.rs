//! ItemId allocation, content-derived ids and their text encoding.

use kdata_bag::DataBag;
use kdata_common::{Result, error::Error};
use kdata_shape::JaggedShape;
use kdata_shared_vec::SharedVec;
use kdata_types::{DType, DataItem, ItemId, ItemIdKind, Schema, UuidBuilder};

use crate::context::Context;
use crate::factories::FactoryOptions;
use crate::schema_ops::{SCHEMA_ATTR, implicit_schema_id, schema_arg, uu_schema};
use crate::slice::DataSlice;

fn allocated(ctx: &Context, shape: JaggedShape, mask: Option<&DataSlice>, kind: ItemIdKind) -> DataSlice {
    let data: Vec<DataItem> = match mask {
        None => ctx
            .allocate_many(kind, shape.size())
            .into_iter()
            .map(DataItem::ItemId)
            .collect(),
        Some(mask) => {
            let mut fresh = ctx.allocate_many(kind, mask.present_count()).into_iter();
            mask.items()
                .iter()
                .map(|item| {
                    if item.is_present() {
                        fresh.next().map_or(DataItem::Missing, DataItem::ItemId)
                    } else {
                        DataItem::Missing
                    }
                })
                .collect()
        }
    };
    DataSlice::from_parts(shape, data.into(), Schema::ITEMID, None)
}

/// Fresh object ids, one per slot of `shape`.
pub fn new_itemid_shaped(ctx: &Context, shape: JaggedShape) -> DataSlice {
    allocated(ctx, shape, None, ItemIdKind::Object)
}

/// Fresh object ids for the present items of `like`.
pub fn new_itemid_like(ctx: &Context, like: &DataSlice) -> DataSlice {
    allocated(ctx, like.get_shape(), Some(like), ItemIdKind::Object)
}

pub fn new_itemid_shaped_as(ctx: &Context, shape_from: &DataSlice) -> DataSlice {
    allocated(ctx, shape_from.get_shape(), None, ItemIdKind::Object)
}

pub fn new_listid_shaped(ctx: &Context, shape: JaggedShape) -> DataSlice {
    allocated(ctx, shape, None, ItemIdKind::List)
}

pub fn new_listid_like(ctx: &Context, like: &DataSlice) -> DataSlice {
    allocated(ctx, like.get_shape(), Some(like), ItemIdKind::List)
}

pub fn new_listid_shaped_as(ctx: &Context, shape_from: &DataSlice) -> DataSlice {
    allocated(ctx, shape_from.get_shape(), None, ItemIdKind::List)
}

pub fn new_dictid_shaped(ctx: &Context, shape: JaggedShape) -> DataSlice {
    allocated(ctx, shape, None, ItemIdKind::Dict)
}

pub fn new_dictid_like(ctx: &Context, like: &DataSlice) -> DataSlice {
    allocated(ctx, like.get_shape(), Some(like), ItemIdKind::Dict)
}

pub fn new_dictid_shaped_as(ctx: &Context, shape_from: &DataSlice) -> DataSlice {
    allocated(ctx, shape_from.get_shape(), None, ItemIdKind::Dict)
}

/// Aligns `attrs` and derives one id per slot of their common shape from `seed`
/// and the attribute values at that slot.
fn derive_ids(
    seed: &str,
    attrs: &[(&str, &DataSlice)],
    kind: ItemIdKind,
) -> Result<(JaggedShape, Vec<DataItem>, Vec<DataSlice>)> {
    let values = attrs.iter().map(|(_, v)| *v).collect::<Vec<_>>();
    let aligned = if values.is_empty() {
        Vec::new()
    } else {
        DataSlice::align(&values)?
    };
    let shape = aligned
        .first()
        .map_or_else(JaggedShape::scalar, DataSlice::get_shape);
    let ids = (0..shape.size())
        .map(|slot| {
            let fields = attrs
                .iter()
                .zip(&aligned)
                .map(|((name, _), value)| (*name, &value.items()[slot]));
            DataItem::ItemId(UuidBuilder::new(kind, seed).fields(fields).build())
        })
        .collect();
    Ok((shape, ids, aligned))
}

fn derived_id_slice(seed: &str, attrs: &[(&str, &DataSlice)], kind: ItemIdKind) -> Result<DataSlice> {
    let (shape, ids, _) = derive_ids(seed, attrs, kind)?;
    Ok(DataSlice::from_parts(shape, ids.into(), Schema::ITEMID, None))
}

/// Object ids derived from `seed` and the attribute values; equal inputs give
/// equal ids regardless of attribute order.
pub fn uuid(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    derived_id_slice(seed, attrs, ItemIdKind::Object)
}

/// List ids derived from `seed` and the attribute values.
pub fn uuid_for_list(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    derived_id_slice(seed, attrs, ItemIdKind::List)
}

/// Dict ids derived from `seed` and the attribute values.
pub fn uuid_for_dict(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    derived_id_slice(seed, attrs, ItemIdKind::Dict)
}

/// Creates entities whose ids are derived from `seed` and the attribute values.
///
/// Without an explicit schema the entity schema is derived too (from `seed` and
/// the attribute schemas), so repeated calls produce mergeable bags.
pub fn uu(seed: &str, attrs: &[(&str, &DataSlice)], options: &FactoryOptions) -> Result<DataSlice> {
    let (shape, ids, aligned) = derive_ids(seed, attrs, ItemIdKind::Object)?;
    let bag = DataBag::new();
    let schema = match &options.schema {
        Some(schema) => {
            schema.adopt_into(&bag)?;
            schema_arg("schema", schema)?
        }
        None => {
            let schema_slices = aligned.iter().map(DataSlice::get_schema).collect::<Vec<_>>();
            let named = attrs
                .iter()
                .zip(&schema_slices)
                .map(|((name, _), schema)| (*name, schema))
                .collect::<Vec<_>>();
            let schema = uu_schema(seed, &named)?;
            schema.adopt_into(&bag)?;
            schema_arg("schema", &schema)?
        }
    };
    let entities = DataSlice::from_parts(shape, SharedVec::from_vec(ids), schema, Some(bag.clone()));
    entities.set_attrs(attrs, options.update_schema)?;
    bag.freeze();
    Ok(entities)
}

/// Creates objects whose ids are derived from `seed` and the attribute values.
pub fn uuobj(seed: &str, attrs: &[(&str, &DataSlice)]) -> Result<DataSlice> {
    let (shape, ids, _) = derive_ids(seed, attrs, ItemIdKind::Object)?;
    let bag = DataBag::new();
    let schemas = ids
        .iter()
        .map(|item| {
            item.as_item_id()
                .map_or(DataItem::Missing, |id| DataItem::ItemId(implicit_schema_id(id)))
        })
        .collect::<Vec<_>>();
    bag.set_attr_many(&ids, SCHEMA_ATTR, &schemas)?;
    let objects = DataSlice::from_parts(shape, SharedVec::from_vec(ids), Schema::OBJECT, Some(bag.clone()));
    objects.set_attrs(attrs, true)?;
    bag.freeze();
    Ok(objects)
}

/// Encodes ItemIds as base62 text.
pub fn encode_itemid(ds: &DataSlice) -> Result<DataSlice> {
    if let Schema::DType(dtype) = ds.schema() {
        if !matches!(dtype, DType::ItemId | DType::Object | DType::Any | DType::None) {
            return Err(Error::invalid_arg(
                "ds",
                format!("only ObjectIds can be encoded, got {dtype}"),
            ));
        }
    }
    let data = ds
        .items()
        .iter()
        .map(|item| match item {
            DataItem::Missing => Ok(DataItem::Missing),
            DataItem::ItemId(id) => Ok(DataItem::text(id.encode())),
            other => Err(Error::invalid_arg(
                "ds",
                format!(
                    "only ObjectIds can be encoded, got {}",
                    other.dtype().map_or("NONE", DType::name)
                ),
            )),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DataSlice::from_parts(ds.get_shape(), data.into(), Schema::TEXT, None))
}

/// Decodes text produced by [`encode_itemid`].
pub fn decode_itemid(ds: &DataSlice) -> Result<DataSlice> {
    let data = ds
        .items()
        .iter()
        .map(|item| match item {
            DataItem::Missing => Ok(DataItem::Missing),
            DataItem::Text(text) => ItemId::decode(text).map(DataItem::ItemId),
            other => Err(Error::invalid_arg(
                "ds",
                format!("only TEXT can be decoded, got {other}"),
            )),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DataSlice::from_parts(ds.get_shape(), data.into(), Schema::ITEMID, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_respects_sparsity() {
        let ctx = Context::with_seed(11);
        let like = DataSlice::from_values([Some(1), None, Some(3)]).unwrap();
        let ids = new_itemid_like(&ctx, &like);
        assert_eq!(ids.schema(), Schema::ITEMID);
        assert_eq!(ids.present_count(), 2);
        assert!(ids.items()[1].is_missing());

        let lists = new_listid_shaped_as(&ctx, &like);
        assert_eq!(lists.present_count(), 3);
        assert!(lists.items().iter().all(|i| i.as_item_id().unwrap().is_list()));

        let dicts = new_dictid_shaped(&ctx, JaggedShape::flat(2));
        assert!(dicts.items().iter().all(|i| i.as_item_id().unwrap().is_dict()));
    }

    #[test]
    fn test_uuid_is_order_independent() {
        let a = DataSlice::from_item(1);
        let b = DataSlice::from_item(2);
        let ab = uuid("", &[("a", &a), ("b", &b)]).unwrap();
        let ba = uuid("", &[("b", &b), ("a", &a)]).unwrap();
        let seeded = uuid("x", &[("a", &a), ("b", &b)]).unwrap();
        assert_eq!(ab.items(), ba.items());
        assert_ne!(ab.items(), seeded.items());
        assert!(ab.items()[0].as_item_id().unwrap().is_derived());
    }

    #[test]
    fn test_uuid_broadcasts() {
        let a = DataSlice::from_values([1, 2, 1]).unwrap();
        let b = DataSlice::from_item("x");
        let ids = uuid("", &[("a", &a), ("b", &b)]).unwrap();
        assert_eq!(ids.size(), 3);
        assert_eq!(ids.items()[0], ids.items()[2]);
        assert_ne!(ids.items()[0], ids.items()[1]);
        assert!(uuid_for_list("", &[("a", &a)]).unwrap().items()[0]
            .as_item_id()
            .unwrap()
            .is_list());
        assert!(uuid_for_dict("", &[("a", &a)]).unwrap().items()[0]
            .as_item_id()
            .unwrap()
            .is_dict());
    }

    #[test]
    fn test_uu_entities() {
        let a = DataSlice::from_values([1, 2]).unwrap();
        let first = uu("seed", &[("a", &a)], &FactoryOptions::default()).unwrap();
        let second = uu("seed", &[("a", &a)], &FactoryOptions::default()).unwrap();
        assert_eq!(first.items(), second.items());
        assert_eq!(first.schema(), second.schema());
        assert_eq!(first.get_attr("a").unwrap().items(), a.items());

        let objs = uuobj("seed", &[("a", &a)]).unwrap();
        assert_eq!(objs.schema(), Schema::OBJECT);
        assert_eq!(objs.get_attr("a").unwrap().items(), a.items());
    }

    #[test]
    fn test_encode_decode() {
        let ctx = Context::with_seed(12);
        let ids = new_itemid_shaped(&ctx, JaggedShape::flat(2));
        let encoded = encode_itemid(&ids).unwrap();
        assert_eq!(encoded.schema(), Schema::TEXT);
        assert_eq!(decode_itemid(&encoded).unwrap().items(), ids.items());

        let err = encode_itemid(&DataSlice::from_item(1)).unwrap_err();
        assert!(err.to_string().contains("only ObjectIds can be encoded, got INT32"));
        assert!(decode_itemid(&DataSlice::from_item("not an id")).is_err());
    }
}
