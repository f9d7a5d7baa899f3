//! Schema-level casting: common schemas and explicit, implicit and narrowing casts.

use itertools::Itertools;
use kdata_common::{Result, error::Error};
use kdata_types::cast::{cast_item, cast_item_implicit};
use kdata_types::{CastingPolicy, DType, DataItem, Schema};

use crate::slice::DataSlice;

/// Returns the least common schema of `a` and `b` under `policy`.
///
/// Structured schemas only combine with themselves and with NONE.
pub fn common_schema(a: Schema, b: Schema, policy: &CastingPolicy) -> Result<Schema> {
    let common = match (a, b) {
        _ if a == b => Some(a),
        (Schema::DType(x), Schema::DType(y)) => policy.common_dtype(x, y).map(Schema::DType),
        (Schema::Struct(_), Schema::NONE) => Some(a),
        (Schema::NONE, Schema::Struct(_)) => Some(b),
        _ => None,
    };
    common.ok_or_else(|| Error::schema_incompatible(format!("no common schema for {a} and {b}")))
}

/// Folds [`common_schema`] over `schemas`; NONE for an empty input.
pub fn common_schema_of(
    schemas: impl IntoIterator<Item = Schema>,
    policy: &CastingPolicy,
) -> Result<Schema> {
    schemas
        .into_iter()
        .try_fold(Schema::NONE, |acc, s| common_schema(acc, s, policy))
}

impl DataSlice {
    /// Explicitly casts the slice to `schema`.
    ///
    /// Primitive targets convert every item (e.g. FLOAT32 to INT32 truncates).
    /// Structured targets reinterpret ItemIds. Casting an entity slice to OBJECT
    /// embeds the entity schema into a new version of the bag.
    pub fn cast_to(&self, schema: Schema) -> Result<DataSlice> {
        if schema == self.schema() {
            return Ok(self.clone());
        }
        match schema {
            Schema::DType(DType::Object) if self.schema().is_struct() => self.embed_schema(),
            Schema::DType(dtype) => {
                let data = self
                    .items()
                    .iter()
                    .map(|item| cast_item(item, dtype))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.with_data(data.into(), schema))
            }
            Schema::Struct(_) => {
                if let Some(item) = self.items().iter().find(|i| i.is_present() && !i.is_object_id()) {
                    return Err(Error::schema_incompatible(format!(
                        "casting from {} to {schema} is not supported: {item} is not an ItemId",
                        self.schema()
                    )));
                }
                Ok(self.with_schema_unchecked(schema))
            }
        }
    }

    /// Casts the slice to `schema` following only the promotion lattice.
    ///
    /// Fails unless `schema` is the common schema of the slice's schema and itself.
    pub fn cast_to_implicit(&self, schema: Schema) -> Result<DataSlice> {
        self.cast_to_implicit_with(schema, CastingPolicy::standard())
    }

    pub fn cast_to_implicit_with(&self, schema: Schema, policy: &CastingPolicy) -> Result<DataSlice> {
        let from = self.schema();
        if from == schema {
            return Ok(self.clone());
        }
        match common_schema(from, schema, policy) {
            Ok(common) if common == schema => {}
            _ => {
                return Err(Error::schema_incompatible(format!(
                    "unsupported implicit cast from {from} to {schema}"
                )));
            }
        }
        match schema {
            Schema::DType(dtype) if from.dtype().is_some_and(DType::is_primitive) => {
                let data = self
                    .items()
                    .iter()
                    .map(|item| cast_item(item, dtype))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.with_data(data.into(), schema))
            }
            _ => Ok(self.with_schema_unchecked(schema)),
        }
    }

    /// Casts OBJECT or ANY data down to `schema` when every present item already
    /// has (or implicitly promotes to) the target dtype; other schemas follow
    /// [`DataSlice::cast_to_implicit`].
    pub fn cast_to_narrow(&self, schema: Schema) -> Result<DataSlice> {
        let from = self.schema();
        let narrowing = matches!(from, Schema::DType(DType::Object | DType::Any));
        if !narrowing {
            return self.cast_to_implicit(schema);
        }
        let policy = CastingPolicy::standard();
        match schema {
            Schema::DType(dtype) => {
                let data = self
                    .items()
                    .iter()
                    .map(|item| {
                        cast_item_implicit(item, dtype, policy).map_err(|_| {
                            Error::schema_incompatible(format!(
                                "unsupported narrowing cast to {schema} for {item}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.with_data(data.into(), schema))
            }
            Schema::Struct(_) => self.cast_to(schema),
        }
    }

    /// Returns the primitive dtype shared by every present item, or `None` when the
    /// items are mixed, not primitive, or all missing.
    pub fn get_primitive_schema(&self) -> Option<DType> {
        if let Some(dtype) = self.schema().dtype().filter(|d| d.is_primitive()) {
            return Some(dtype);
        }
        self.items()
            .iter()
            .filter_map(DataItem::dtype)
            .unique()
            .exactly_one()
            .ok()
            .filter(|d| d.is_primitive())
    }
}

#[cfg(test)]
mod tests {
    use kdata_common::error::ErrorKind;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Schema::INT32, Schema::FLOAT32, Some(Schema::FLOAT32))]
    #[case(Schema::TEXT, Schema::BYTES, Some(Schema::OBJECT))]
    #[case(Schema::ANY, Schema::FLOAT64, Some(Schema::ANY))]
    #[case(Schema::NONE, Schema::MASK, Some(Schema::MASK))]
    #[case(Schema::ITEMID, Schema::TEXT, None)]
    fn test_common_schema(#[case] a: Schema, #[case] b: Schema, #[case] expected: Option<Schema>) {
        let policy = CastingPolicy::standard();
        assert_eq!(common_schema(a, b, policy).ok(), expected);
    }

    #[test]
    fn test_common_schema_error_names_both() {
        let err = common_schema(Schema::ITEMID, Schema::INT32, CastingPolicy::standard()).unwrap_err();
        assert_eq!(err.to_string(), "no common schema for ITEMID and INT32");
    }

    #[test]
    fn test_explicit_cast() {
        let ds = DataSlice::from_values([Some(1.7f32), None, Some(-2.2)]).unwrap();
        let ints = ds.cast_to(Schema::INT32).unwrap();
        assert_eq!(ints.schema(), Schema::INT32);
        assert_eq!(ints.items(), &[1.into(), DataItem::Missing, DataItem::from(-2)]);

        let text = DataSlice::from_values(["a"]).unwrap();
        let err = text.cast_to(Schema::MASK).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SchemaIncompatible { .. }));
    }

    #[test]
    fn test_explicit_cast_out_of_range() {
        let err = DataSlice::from_item(1i64 << 40)
            .cast_to(Schema::INT32)
            .unwrap_err();
        assert_eq!(err.to_string(), "casting from INT64 to INT32 is not supported");

        let floats = DataSlice::from_values([1.5f64, 3.0e9]).unwrap();
        assert!(floats.cast_to(Schema::INT32).is_err());
        assert_eq!(
            floats.cast_to(Schema::INT64).unwrap().items(),
            &[DataItem::from(1i64), DataItem::from(3_000_000_000i64)]
        );
    }

    #[test]
    fn test_implicit_cast() {
        let ds = DataSlice::from_values([1, 2]).unwrap();
        let floats = ds.cast_to_implicit(Schema::FLOAT32).unwrap();
        assert_eq!(floats.items(), &[DataItem::from(1.0f32), DataItem::from(2.0f32)]);
        assert_eq!(ds.cast_to_implicit(Schema::OBJECT).unwrap().items(), ds.items());
        assert!(floats.cast_to_implicit(Schema::INT32).is_err());
        assert!(DataSlice::from_values(["a"]).unwrap().cast_to_implicit(Schema::BYTES).is_err());
    }

    #[test]
    fn test_narrowing_cast() {
        let objects = DataSlice::from_values([1, 2])
            .unwrap()
            .cast_to(Schema::OBJECT)
            .unwrap();
        let narrowed = objects.cast_to_narrow(Schema::INT64).unwrap();
        assert_eq!(narrowed.items(), &[DataItem::from(1i64), DataItem::from(2i64)]);

        let mixed = DataSlice::from_items(vec![1.into(), "a".into()]).unwrap();
        let err = mixed.cast_to_narrow(Schema::INT32).unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn test_primitive_schema() {
        let objects = DataSlice::from_values([Some(1), None])
            .unwrap()
            .cast_to(Schema::OBJECT)
            .unwrap();
        assert_eq!(objects.get_primitive_schema(), Some(DType::Int32));
        let mixed = DataSlice::from_items(vec![1.into(), "a".into()]).unwrap();
        assert_eq!(mixed.get_primitive_schema(), None);
    }
}
