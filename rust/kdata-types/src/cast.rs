//! Item-level casts.
//!
//! [`cast_item`] is the permissive explicit cast, dispatched by target dtype.
//! [`cast_item_implicit`] only follows the promotion lattice and is what slices use
//! when combining operands or narrowing OBJECT/ANY data.

use kdata_common::{Result, error::Error};

use crate::data_item::DataItem;
use crate::dtype::{CastingPolicy, DType};

/// Explicitly casts `item` to `to`. Missing items stay missing.
pub fn cast_item(item: &DataItem, to: DType) -> Result<DataItem> {
    if item.is_missing() {
        return Ok(DataItem::Missing);
    }
    let cast = match to {
        DType::Int32 => to_int64(item)
            .and_then(|v| i32::try_from(v).ok())
            .map(DataItem::Int32),
        DType::Int64 => to_int64(item).map(DataItem::Int64),
        DType::Float32 => to_float64(item).map(|v| DataItem::Float32(v as f32)),
        DType::Float64 => to_float64(item).map(DataItem::Float64),
        DType::Boolean => match item {
            DataItem::Boolean(v) => Some(DataItem::Boolean(*v)),
            DataItem::Int32(v) => Some(DataItem::Boolean(*v != 0)),
            DataItem::Int64(v) => Some(DataItem::Boolean(*v != 0)),
            DataItem::Float32(v) => Some(DataItem::Boolean(*v != 0.0)),
            DataItem::Float64(v) => Some(DataItem::Boolean(*v != 0.0)),
            _ => None,
        },
        DType::Mask => match item {
            DataItem::Present => Some(DataItem::Present),
            _ => None,
        },
        DType::Bytes => match item {
            DataItem::Bytes(b) => Some(DataItem::Bytes(b.clone())),
            DataItem::Text(s) => Some(DataItem::bytes(s.as_bytes())),
            _ => None,
        },
        DType::Text => match item {
            DataItem::Text(s) => Some(DataItem::Text(s.clone())),
            DataItem::Bytes(b) => {
                let text = std::str::from_utf8(b).map_err(|_| {
                    Error::schema_incompatible(format!("invalid UTF-8 in {item}"))
                })?;
                Some(DataItem::text(text))
            }
            DataItem::Int32(v) => Some(DataItem::text(v.to_string())),
            DataItem::Int64(v) => Some(DataItem::text(v.to_string())),
            DataItem::Float32(v) => Some(DataItem::text(v.to_string())),
            DataItem::Float64(v) => Some(DataItem::text(v.to_string())),
            DataItem::Boolean(v) => Some(DataItem::text(v.to_string())),
            _ => None,
        },
        DType::ItemId => item.as_item_id().map(DataItem::ItemId),
        DType::Schema => item.is_schema().then(|| item.clone()),
        DType::Object => (item.is_primitive() || item.is_object_id()).then(|| item.clone()),
        DType::Any => Some(item.clone()),
        DType::Expr | DType::None => None,
    };
    cast.ok_or_else(|| unsupported_cast(item, to))
}

/// Casts `item` to `to` if its dtype is implicitly castable to `to` under `policy`.
pub fn cast_item_implicit(
    item: &DataItem,
    to: DType,
    policy: &CastingPolicy,
) -> Result<DataItem> {
    let Some(from) = item.dtype() else {
        return Ok(DataItem::Missing);
    };
    if !policy.can_cast_implicitly(from, to) {
        return Err(Error::schema_incompatible(format!(
            "{from} cannot be implicitly cast to {to}: {item}"
        )));
    }
    if from == to {
        return Ok(item.clone());
    }
    cast_item(item, to)
}

fn unsupported_cast(item: &DataItem, to: DType) -> Error {
    let from = item.dtype().unwrap_or(DType::None);
    Error::schema_incompatible(format!("casting from {from} to {to} is not supported"))
}

/// Integer value of `item`, truncating floats. Values outside the `i64` range
/// have no integer value.
fn to_int64(item: &DataItem) -> Option<i64> {
    match item {
        DataItem::Int32(v) => Some(*v as i64),
        DataItem::Int64(v) => Some(*v),
        DataItem::Float32(v) => truncate_float(*v as f64),
        DataItem::Float64(v) => truncate_float(*v),
        DataItem::Boolean(v) => Some(*v as i64),
        DataItem::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn truncate_float(v: f64) -> Option<i64> {
    let v = v.trunc();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    (v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64).then_some(v as i64)
}

fn to_float64(item: &DataItem) -> Option<f64> {
    match item {
        DataItem::Int32(v) => Some(*v as f64),
        DataItem::Int64(v) => Some(*v as f64),
        DataItem::Float32(v) => Some(*v as f64),
        DataItem::Float64(v) => Some(*v),
        DataItem::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
        DataItem::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::item_id::{ItemIdAllocator, ItemIdKind};

    #[rstest]
    #[case(DataItem::from(1.9f32), DType::Int32, DataItem::from(1))]
    #[case(DataItem::from(-2.5f64), DType::Int64, DataItem::from(-2i64))]
    #[case(DataItem::from(3), DType::Float32, DataItem::from(3.0f32))]
    #[case(DataItem::from(true), DType::Int32, DataItem::from(1))]
    #[case(DataItem::from(i32::MAX as i64), DType::Int32, DataItem::from(i32::MAX))]
    #[case(DataItem::from(-2147483648.9f64), DType::Int32, DataItem::from(i32::MIN))]
    #[case(DataItem::from(0), DType::Boolean, DataItem::from(false))]
    #[case(DataItem::from("12"), DType::Int64, DataItem::from(12i64))]
    #[case(DataItem::from("1.5"), DType::Float64, DataItem::from(1.5f64))]
    #[case(DataItem::from(7), DType::Text, DataItem::from("7"))]
    #[case(DataItem::bytes(b"abc"), DType::Text, DataItem::from("abc"))]
    #[case(DataItem::from("abc"), DType::Bytes, DataItem::bytes(b"abc"))]
    #[case(DataItem::from("abc"), DType::Object, DataItem::from("abc"))]
    #[case(DataItem::Missing, DType::Mask, DataItem::Missing)]
    fn test_explicit_cast(#[case] item: DataItem, #[case] to: DType, #[case] expected: DataItem) {
        assert_eq!(cast_item(&item, to).unwrap(), expected);
    }

    #[rstest]
    #[case(DataItem::from("a"), DType::Mask)]
    #[case(DataItem::from("abc"), DType::Int32)]
    #[case(DataItem::from("99999999999"), DType::Int32)]
    #[case(DataItem::from(1i64 << 40), DType::Int32)]
    #[case(DataItem::from(i32::MIN as i64 - 1), DType::Int32)]
    #[case(DataItem::from(3.0e9f64), DType::Int32)]
    #[case(DataItem::from(f32::NAN), DType::Int32)]
    #[case(DataItem::from(1.0e19f64), DType::Int64)]
    #[case(DataItem::from(f64::INFINITY), DType::Int64)]
    #[case(DataItem::from(1), DType::ItemId)]
    #[case(DataItem::from(1), DType::None)]
    #[case(DataItem::bytes([0xff, 0xfe]), DType::Text)]
    #[case(DataItem::Present, DType::Boolean)]
    fn test_explicit_cast_failures(#[case] item: DataItem, #[case] to: DType) {
        assert!(cast_item(&item, to).is_err());
    }

    #[test]
    fn test_text_to_mask_message() {
        let err = cast_item(&DataItem::from("a"), DType::Mask).unwrap_err();
        assert_eq!(err.to_string(), "casting from TEXT to MASK is not supported");
    }

    #[test]
    fn test_schema_items() {
        let alloc = ItemIdAllocator::with_seed(3);
        let schema = DataItem::ItemId(alloc.allocate(ItemIdKind::Schema));
        assert_eq!(cast_item(&schema, DType::Schema).unwrap(), schema);
        assert!(cast_item(&schema, DType::Object).is_err());
        assert!(cast_item(&DataItem::from(1), DType::Schema).is_err());
        assert_eq!(cast_item(&schema, DType::ItemId).unwrap(), schema);
    }

    #[test]
    fn test_implicit_cast() {
        let policy = CastingPolicy::standard();
        assert_eq!(
            cast_item_implicit(&DataItem::from(1), DType::Float64, policy).unwrap(),
            DataItem::from(1.0f64)
        );
        assert_eq!(
            cast_item_implicit(&DataItem::from(1), DType::Object, policy).unwrap(),
            DataItem::from(1)
        );
        assert!(cast_item_implicit(&DataItem::from(1.0f32), DType::Int32, policy).is_err());
        assert!(cast_item_implicit(&DataItem::from("a"), DType::Bytes, policy).is_err());
        assert_eq!(
            cast_item_implicit(&DataItem::Missing, DType::Text, policy).unwrap(),
            DataItem::Missing
        );
    }
}
