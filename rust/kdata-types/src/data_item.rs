//! A single value of a slice or a bag.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use xxhash_rust::xxh3::Xxh3;

use crate::dtype::DType;
use crate::item_id::ItemId;

/// A possibly-missing scalar: a primitive value, an ItemId or a schema tag.
///
/// Floats compare and hash by value with all NaNs equal, so items can be used as
/// grouping and dict keys.
#[derive(Clone, Default)]
pub enum DataItem {
    #[default]
    Missing,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    /// The present value of a MASK.
    Present,
    Bytes(Arc<[u8]>),
    Text(Arc<str>),
    ItemId(ItemId),
    /// A schema tag used as a value (items of SCHEMA slices).
    DType(DType),
}

impl DataItem {
    pub fn text(s: impl AsRef<str>) -> DataItem {
        DataItem::Text(Arc::from(s.as_ref()))
    }

    pub fn bytes(b: impl AsRef<[u8]>) -> DataItem {
        DataItem::Bytes(Arc::from(b.as_ref()))
    }

    /// `Present` for `true`, `Missing` for `false`.
    pub fn mask(present: bool) -> DataItem {
        if present {
            DataItem::Present
        } else {
            DataItem::Missing
        }
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        !matches!(self, DataItem::Missing)
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, DataItem::Missing)
    }

    /// Returns the dtype of the value as stored, or `None` for missing items.
    ///
    /// Schema ItemIds and schema tags report `SCHEMA`; other ItemIds report `ITEMID`.
    pub fn dtype(&self) -> Option<DType> {
        Some(match self {
            DataItem::Missing => return None,
            DataItem::Int32(_) => DType::Int32,
            DataItem::Int64(_) => DType::Int64,
            DataItem::Float32(_) => DType::Float32,
            DataItem::Float64(_) => DType::Float64,
            DataItem::Boolean(_) => DType::Boolean,
            DataItem::Present => DType::Mask,
            DataItem::Bytes(_) => DType::Bytes,
            DataItem::Text(_) => DType::Text,
            DataItem::ItemId(id) if id.is_schema() => DType::Schema,
            DataItem::ItemId(_) => DType::ItemId,
            DataItem::DType(_) => DType::Schema,
        })
    }

    /// Returns `true` for present primitive values.
    pub fn is_primitive(&self) -> bool {
        self.dtype().is_some_and(DType::is_primitive)
    }

    #[inline]
    pub fn as_item_id(&self) -> Option<ItemId> {
        match self {
            DataItem::ItemId(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn as_dtype(&self) -> Option<DType> {
        match self {
            DataItem::DType(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataItem::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as an i64 if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataItem::Int32(v) => Some(*v as i64),
            DataItem::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` for ItemIds that point to an entity, object, list or dict.
    pub fn is_object_id(&self) -> bool {
        matches!(self, DataItem::ItemId(id) if !id.is_schema())
    }

    /// Returns `true` for schema tags and schema ItemIds.
    pub fn is_schema(&self) -> bool {
        matches!(self, DataItem::DType(_))
            || matches!(self, DataItem::ItemId(id) if id.is_schema())
    }

    /// Feeds a stable, type-tagged encoding of the value into `hasher`.
    ///
    /// Used to derive content-based ItemIds, so the encoding must never change.
    pub fn fingerprint(&self, hasher: &mut Xxh3) {
        match self {
            DataItem::Missing => hasher.update(&[0]),
            DataItem::Int32(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_le_bytes());
            }
            DataItem::Int64(v) => {
                hasher.update(&[2]);
                hasher.update(&v.to_le_bytes());
            }
            DataItem::Float32(v) => {
                hasher.update(&[3]);
                hasher.update(&canonical_f32(*v).to_le_bytes());
            }
            DataItem::Float64(v) => {
                hasher.update(&[4]);
                hasher.update(&canonical_f64(*v).to_le_bytes());
            }
            DataItem::Boolean(v) => hasher.update(&[5, *v as u8]),
            DataItem::Present => hasher.update(&[6]),
            DataItem::Bytes(b) => {
                hasher.update(&[7]);
                hasher.update(&(b.len() as u64).to_le_bytes());
                hasher.update(b);
            }
            DataItem::Text(s) => {
                hasher.update(&[8]);
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            DataItem::ItemId(id) => {
                hasher.update(&[9]);
                hasher.update(&id.raw().to_le_bytes());
            }
            DataItem::DType(d) => hasher.update(&[10, *d as u8]),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            DataItem::Missing => 0,
            DataItem::Int32(_) => 1,
            DataItem::Int64(_) => 2,
            DataItem::Float32(_) => 3,
            DataItem::Float64(_) => 4,
            DataItem::Boolean(_) => 5,
            DataItem::Present => 6,
            DataItem::Bytes(_) => 7,
            DataItem::Text(_) => 8,
            DataItem::ItemId(_) => 9,
            DataItem::DType(_) => 10,
        }
    }
}

fn canonical_f32(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

fn canonical_f64(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

impl PartialEq for DataItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataItem::Missing, DataItem::Missing) => true,
            (DataItem::Int32(a), DataItem::Int32(b)) => a == b,
            (DataItem::Int64(a), DataItem::Int64(b)) => a == b,
            (DataItem::Float32(a), DataItem::Float32(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (DataItem::Float64(a), DataItem::Float64(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (DataItem::Boolean(a), DataItem::Boolean(b)) => a == b,
            (DataItem::Present, DataItem::Present) => true,
            (DataItem::Bytes(a), DataItem::Bytes(b)) => a == b,
            (DataItem::Text(a), DataItem::Text(b)) => a == b,
            (DataItem::ItemId(a), DataItem::ItemId(b)) => a == b,
            (DataItem::DType(a), DataItem::DType(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DataItem {}

impl Hash for DataItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            DataItem::Missing | DataItem::Present => {}
            DataItem::Int32(v) => v.hash(state),
            DataItem::Int64(v) => v.hash(state),
            DataItem::Float32(v) => OrderedFloat(*v).hash(state),
            DataItem::Float64(v) => OrderedFloat(*v).hash(state),
            DataItem::Boolean(v) => v.hash(state),
            DataItem::Bytes(v) => v.hash(state),
            DataItem::Text(v) => v.hash(state),
            DataItem::ItemId(v) => v.raw().hash(state),
            DataItem::DType(v) => v.hash(state),
        }
    }
}

impl PartialOrd for DataItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order: first by kind, then by value. Only used to produce stable output
/// (e.g. sorted attribute listings), not as a user-visible comparison.
impl Ord for DataItem {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DataItem::Int32(a), DataItem::Int32(b)) => a.cmp(b),
            (DataItem::Int64(a), DataItem::Int64(b)) => a.cmp(b),
            (DataItem::Float32(a), DataItem::Float32(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (DataItem::Float64(a), DataItem::Float64(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (DataItem::Boolean(a), DataItem::Boolean(b)) => a.cmp(b),
            (DataItem::Bytes(a), DataItem::Bytes(b)) => a.cmp(b),
            (DataItem::Text(a), DataItem::Text(b)) => a.cmp(b),
            (DataItem::ItemId(a), DataItem::ItemId(b)) => a.cmp(b),
            (DataItem::DType(a), DataItem::DType(b)) => a.cmp(b),
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Missing => f.write_str("None"),
            DataItem::Int32(v) => write!(f, "{v}"),
            DataItem::Int64(v) => write!(f, "{v}"),
            DataItem::Float32(v) => write!(f, "{v:?}"),
            DataItem::Float64(v) => write!(f, "{v:?}"),
            DataItem::Boolean(v) => f.write_str(if *v { "True" } else { "False" }),
            DataItem::Present => f.write_str("present"),
            DataItem::Bytes(b) => write!(f, "b'{}'", b.escape_ascii()),
            DataItem::Text(s) => write!(f, "'{s}'"),
            DataItem::ItemId(id) => write!(f, "{id}"),
            DataItem::DType(d) => write!(f, "{d}"),
        }
    }
}

impl fmt::Debug for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

macro_rules! impl_from_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for DataItem {
                fn from(value: $t) -> Self {
                    DataItem::$variant(value)
                }
            }
        )*
    };
}

impl_from_value!(
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Boolean,
    ItemId => ItemId,
    DType => DType,
);

impl From<&str> for DataItem {
    fn from(value: &str) -> Self {
        DataItem::text(value)
    }
}

impl From<String> for DataItem {
    fn from(value: String) -> Self {
        DataItem::Text(Arc::from(value))
    }
}

impl From<&[u8]> for DataItem {
    fn from(value: &[u8]) -> Self {
        DataItem::bytes(value)
    }
}

impl<T: Into<DataItem>> From<Option<T>> for DataItem {
    fn from(value: Option<T>) -> Self {
        value.map_or(DataItem::Missing, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::item_id::{ItemIdAllocator, ItemIdKind};

    #[test]
    fn test_dtype() {
        assert_eq!(DataItem::from(1).dtype(), Some(DType::Int32));
        assert_eq!(DataItem::from(1i64).dtype(), Some(DType::Int64));
        assert_eq!(DataItem::from("a").dtype(), Some(DType::Text));
        assert_eq!(DataItem::Present.dtype(), Some(DType::Mask));
        assert_eq!(DataItem::Missing.dtype(), None);
        assert_eq!(DataItem::from(DType::Int32).dtype(), Some(DType::Schema));
        let alloc = ItemIdAllocator::with_seed(0);
        let schema = DataItem::from(alloc.allocate(ItemIdKind::Schema));
        let entity = DataItem::from(alloc.allocate(ItemIdKind::Object));
        assert_eq!(schema.dtype(), Some(DType::Schema));
        assert_eq!(entity.dtype(), Some(DType::ItemId));
        assert!(schema.is_schema() && !schema.is_object_id());
        assert!(entity.is_object_id());
    }

    #[test]
    fn test_float_equality_and_hash() {
        let items: HashSet<DataItem> = [
            DataItem::from(f32::NAN),
            DataItem::from(f32::NAN),
            DataItem::from(0.0f32),
            DataItem::from(-0.0f32),
            DataItem::from(1.0f64),
        ]
        .into_iter()
        .collect();
        assert_eq!(items.len(), 3);
        assert_ne!(DataItem::from(1), DataItem::from(1i64));
    }

    #[test]
    fn test_fingerprint_distinguishes_types() {
        let digest = |item: &DataItem| {
            let mut hasher = Xxh3::new();
            item.fingerprint(&mut hasher);
            hasher.digest128()
        };
        assert_ne!(digest(&DataItem::from(1)), digest(&DataItem::from(1i64)));
        assert_eq!(digest(&DataItem::from(0.0)), digest(&DataItem::from(-0.0)));
        assert_ne!(digest(&DataItem::from("a")), digest(&DataItem::bytes(b"a")));
    }

    #[test]
    fn test_display() {
        assert_eq!(DataItem::from(1).to_string(), "1");
        assert_eq!(DataItem::from(1.5f32).to_string(), "1.5");
        assert_eq!(DataItem::from(2.0f64).to_string(), "2.0");
        assert_eq!(DataItem::from("ab").to_string(), "'ab'");
        assert_eq!(DataItem::bytes(b"ab").to_string(), "b'ab'");
        assert_eq!(DataItem::from(true).to_string(), "True");
        assert_eq!(DataItem::Missing.to_string(), "None");
        assert_eq!(DataItem::from(None::<i32>), DataItem::Missing);
    }
}
