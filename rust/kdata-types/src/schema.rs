//! Schema values.

use std::fmt;

use kdata_common::{Result, error::Error};

use crate::data_item::DataItem;
use crate::dtype::DType;
use crate::item_id::ItemId;

/// The schema of a slice or of an attribute.
///
/// A schema is either a [`DType`] tag or the ItemId of a structured schema whose
/// attribute schemas (and, for lists and dicts, item/key/value schemas) live in a bag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Schema {
    DType(DType),
    Struct(ItemId),
}

impl Schema {
    pub const INT32: Schema = Schema::DType(DType::Int32);
    pub const INT64: Schema = Schema::DType(DType::Int64);
    pub const FLOAT32: Schema = Schema::DType(DType::Float32);
    pub const FLOAT64: Schema = Schema::DType(DType::Float64);
    pub const BOOLEAN: Schema = Schema::DType(DType::Boolean);
    pub const MASK: Schema = Schema::DType(DType::Mask);
    pub const BYTES: Schema = Schema::DType(DType::Bytes);
    pub const TEXT: Schema = Schema::DType(DType::Text);
    pub const EXPR: Schema = Schema::DType(DType::Expr);
    pub const ITEMID: Schema = Schema::DType(DType::ItemId);
    pub const SCHEMA: Schema = Schema::DType(DType::Schema);
    pub const OBJECT: Schema = Schema::DType(DType::Object);
    pub const ANY: Schema = Schema::DType(DType::Any);
    pub const NONE: Schema = Schema::DType(DType::None);

    /// Converts a present schema item (a dtype tag or a schema ItemId).
    pub fn from_item(item: &DataItem) -> Result<Schema> {
        match item {
            DataItem::DType(d) => Ok(Schema::DType(*d)),
            DataItem::ItemId(id) if id.is_schema() => Ok(Schema::Struct(*id)),
            other => Err(Error::schema_incompatible(format!(
                "expected a schema, got {other}"
            ))),
        }
    }

    pub fn to_item(self) -> DataItem {
        match self {
            Schema::DType(d) => DataItem::DType(d),
            Schema::Struct(id) => DataItem::ItemId(id),
        }
    }

    #[inline]
    pub fn dtype(self) -> Option<DType> {
        match self {
            Schema::DType(d) => Some(d),
            Schema::Struct(_) => None,
        }
    }

    #[inline]
    pub fn struct_id(self) -> Option<ItemId> {
        match self {
            Schema::Struct(id) => Some(id),
            Schema::DType(_) => None,
        }
    }

    #[inline]
    pub fn is_struct(self) -> bool {
        matches!(self, Schema::Struct(_))
    }

    #[inline]
    pub fn is_primitive(self) -> bool {
        self.dtype().is_some_and(DType::is_primitive)
    }

    #[inline]
    pub fn is_object(self) -> bool {
        self == Schema::OBJECT
    }

    #[inline]
    pub fn is_any(self) -> bool {
        self == Schema::ANY
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self == Schema::NONE
    }

    /// Returns `true` if an item is allowed in data of this schema.
    ///
    /// Missing items are consistent with every schema.
    pub fn is_consistent_with(self, item: &DataItem) -> bool {
        let Some(item_dtype) = item.dtype() else {
            return true;
        };
        match self {
            Schema::Struct(_) => item.is_object_id(),
            Schema::DType(DType::Any) => true,
            Schema::DType(DType::None) => false,
            Schema::DType(DType::Object) => item.is_primitive() || item.is_object_id(),
            Schema::DType(DType::ItemId) => item.as_item_id().is_some(),
            Schema::DType(DType::Schema) => item.is_schema(),
            Schema::DType(d) => d == item_dtype,
        }
    }
}

impl From<DType> for Schema {
    fn from(value: DType) -> Self {
        Schema::DType(value)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::DType(d) => write!(f, "{d}"),
            Schema::Struct(id) => write!(f, "{id}"),
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_id::{ItemIdAllocator, ItemIdKind};

    #[test]
    fn test_item_conversion() {
        let alloc = ItemIdAllocator::with_seed(1);
        let schema_id = alloc.allocate(ItemIdKind::Schema);
        let schema = Schema::Struct(schema_id);
        assert_eq!(Schema::from_item(&schema.to_item()).unwrap(), schema);
        assert_eq!(
            Schema::from_item(&DataItem::DType(DType::Text)).unwrap(),
            Schema::TEXT
        );
        let entity = DataItem::ItemId(alloc.allocate(ItemIdKind::Object));
        assert!(Schema::from_item(&entity).is_err());
        assert!(Schema::from_item(&DataItem::from(1)).is_err());
    }

    #[test]
    fn test_consistency() {
        let alloc = ItemIdAllocator::with_seed(2);
        let entity = DataItem::ItemId(alloc.allocate(ItemIdKind::Object));
        let schema_item = DataItem::ItemId(alloc.allocate(ItemIdKind::Schema));
        let struct_schema = Schema::Struct(alloc.allocate(ItemIdKind::Schema));

        assert!(Schema::INT32.is_consistent_with(&DataItem::from(1)));
        assert!(!Schema::INT32.is_consistent_with(&DataItem::from(1i64)));
        assert!(Schema::NONE.is_consistent_with(&DataItem::Missing));
        assert!(!Schema::NONE.is_consistent_with(&DataItem::from(1)));
        assert!(Schema::OBJECT.is_consistent_with(&entity));
        assert!(Schema::OBJECT.is_consistent_with(&DataItem::from("a")));
        assert!(!Schema::OBJECT.is_consistent_with(&schema_item));
        assert!(Schema::SCHEMA.is_consistent_with(&schema_item));
        assert!(Schema::SCHEMA.is_consistent_with(&DataItem::DType(DType::Int32)));
        assert!(Schema::ITEMID.is_consistent_with(&entity));
        assert!(struct_schema.is_consistent_with(&entity));
        assert!(!struct_schema.is_consistent_with(&DataItem::from(1)));
        assert!(Schema::ANY.is_consistent_with(&schema_item));
    }

    #[test]
    fn test_display() {
        assert_eq!(Schema::FLOAT64.to_string(), "FLOAT64");
        assert_eq!(Schema::NONE.to_string(), "NONE");
    }
}
