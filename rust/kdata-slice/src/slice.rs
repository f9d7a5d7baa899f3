//! The `DataSlice` value type.

use std::fmt;

use itertools::Itertools;
use kdata_bag::DataBag;
use kdata_common::{Result, error::Error};
use kdata_shape::JaggedShape;
use kdata_shared_vec::SharedVec;
use kdata_types::{DType, DataItem, Schema};

/// An immutable multi-dimensional, possibly sparse, array of items.
///
/// A slice is a jagged shape, the flat columnar data (one item per leaf slot of the
/// shape), a schema every present item conforms to and an optional bag holding the
/// attributes, list items and dict entries of the ItemIds in the data. Cloning is
/// cheap: the shape and data are shared and the bag is a shared handle.
#[derive(Clone)]
pub struct DataSlice {
    shape: JaggedShape,
    data: SharedVec<DataItem>,
    schema: Schema,
    bag: Option<DataBag>,
}

impl DataSlice {
    /// Creates a slice, checking that the data matches the shape and the schema.
    pub fn new(
        shape: JaggedShape,
        data: impl Into<SharedVec<DataItem>>,
        schema: Schema,
        bag: Option<DataBag>,
    ) -> Result<DataSlice> {
        let data = data.into();
        if data.len() != shape.size() {
            return Err(Error::shape_incompatible(format!(
                "shape {shape} has {} slots, but {} items were provided",
                shape.size(),
                data.len()
            )));
        }
        if let Some(item) = data.iter().find(|item| !schema.is_consistent_with(item)) {
            return Err(Error::schema_incompatible(format!(
                "item {item} is not consistent with schema {schema}"
            )));
        }
        Ok(DataSlice::from_parts(shape, data, schema, bag))
    }

    /// Assembles a slice whose invariants are already known to hold.
    pub(crate) fn from_parts(
        shape: JaggedShape,
        data: SharedVec<DataItem>,
        schema: Schema,
        bag: Option<DataBag>,
    ) -> DataSlice {
        debug_assert_eq!(shape.size(), data.len());
        DataSlice {
            shape,
            data,
            schema,
            bag,
        }
    }

    /// Creates a rank-1 slice, inferring the schema from the items.
    pub fn from_items(items: Vec<DataItem>) -> Result<DataSlice> {
        let schema = infer_schema(&items)?;
        DataSlice::new(JaggedShape::flat(items.len()), items, schema, None)
    }

    /// Creates a rank-1 slice from anything convertible to items, e.g.
    /// `DataSlice::from_values([Some(1), None])`.
    pub fn from_values<T: Into<DataItem>>(values: impl IntoIterator<Item = T>) -> Result<DataSlice> {
        DataSlice::from_items(values.into_iter().map(Into::into).collect())
    }

    /// Creates a slice of the given shape, inferring the schema from the items.
    pub fn from_shaped_items(shape: JaggedShape, items: Vec<DataItem>) -> Result<DataSlice> {
        let schema = infer_schema(&items)?;
        DataSlice::new(shape, items, schema, None)
    }

    /// Creates a rank-0 slice, inferring the schema from the item.
    pub fn from_item(item: impl Into<DataItem>) -> DataSlice {
        let item = item.into();
        let schema = item_schema(&item);
        DataSlice::from_parts(JaggedShape::scalar(), SharedVec::from_vec(vec![item]), schema, None)
    }

    /// A rank-0 SCHEMA slice holding `schema`.
    pub fn from_schema(schema: impl Into<Schema>) -> DataSlice {
        DataSlice::from_parts(
            JaggedShape::scalar(),
            SharedVec::from_vec(vec![schema.into().to_item()]),
            Schema::SCHEMA,
            None,
        )
    }

    /// A slice of `shape` whose every slot is `item`.
    pub fn filled(
        shape: JaggedShape,
        item: DataItem,
        schema: Schema,
        bag: Option<DataBag>,
    ) -> Result<DataSlice> {
        let size = shape.size();
        DataSlice::new(shape, SharedVec::filled(item, size), schema, bag)
    }

    /// An all-missing slice of `shape`.
    pub fn missing(shape: JaggedShape, schema: Schema) -> DataSlice {
        let size = shape.size();
        DataSlice::from_parts(shape, SharedVec::filled(DataItem::Missing, size), schema, None)
    }

    #[inline]
    pub fn shape(&self) -> &JaggedShape {
        &self.shape
    }

    /// Returns the shape as an owned value.
    pub fn get_shape(&self) -> JaggedShape {
        self.shape.clone()
    }

    #[inline]
    pub fn items(&self) -> &[DataItem] {
        &self.data
    }

    #[inline]
    pub(crate) fn data(&self) -> &SharedVec<DataItem> {
        &self.data
    }

    #[inline]
    pub fn schema(&self) -> Schema {
        self.schema
    }

    #[inline]
    pub fn bag(&self) -> Option<&DataBag> {
        self.bag.as_ref()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for rank-0 slices ("data items").
    #[inline]
    pub fn is_item(&self) -> bool {
        self.shape.is_scalar()
    }

    /// Returns the single item of a rank-0 slice.
    pub fn as_item(&self) -> Option<&DataItem> {
        if self.is_item() { self.data.first() } else { None }
    }

    pub fn present_count(&self) -> usize {
        self.data.iter().filter(|item| item.is_present()).count()
    }

    /// Returns `true` if every item is missing.
    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }

    /// Returns the same data attached to `bag`.
    pub fn with_bag(&self, bag: DataBag) -> DataSlice {
        DataSlice {
            bag: Some(bag),
            ..self.clone()
        }
    }

    /// Returns the same data without a bag.
    pub fn no_bag(&self) -> DataSlice {
        DataSlice {
            bag: None,
            ..self.clone()
        }
    }

    /// Replaces the data, keeping shape, schema and bag.
    pub(crate) fn with_data(&self, data: SharedVec<DataItem>, schema: Schema) -> DataSlice {
        DataSlice::from_parts(self.shape.clone(), data, schema, self.bag.clone())
    }

    pub(crate) fn with_schema_unchecked(&self, schema: Schema) -> DataSlice {
        DataSlice {
            schema,
            ..self.clone()
        }
    }

    /// Returns the same data with a different shape of equal size.
    pub fn reshape(&self, shape: JaggedShape) -> Result<DataSlice> {
        if shape.size() != self.size() {
            return Err(Error::shape_incompatible(format!(
                "cannot reshape {} to {shape}: sizes differ",
                self.shape
            )));
        }
        Ok(DataSlice {
            shape,
            ..self.clone()
        })
    }

    /// Collapses dimensions `[from, to)` into one.
    pub fn flatten(&self, from: usize, to: usize) -> Result<DataSlice> {
        self.reshape(self.shape.flatten(from, to)?)
    }

    /// Collapses all dimensions into one.
    pub fn flatten_all(&self) -> DataSlice {
        DataSlice {
            shape: JaggedShape::flat(self.size()),
            ..self.clone()
        }
    }

    /// Returns `true` if both slices have the same shape, items, schema and bag.
    pub fn is_equivalent_to(&self, other: &DataSlice) -> bool {
        let same_bag = match (&self.bag, &other.bag) {
            (Some(a), Some(b)) => a.is_same(b),
            (None, None) => true,
            _ => false,
        };
        same_bag
            && self.schema == other.schema
            && self.shape == other.shape
            && self.data == other.data
    }

    /// Returns the bag or fails naming the operation that needs one.
    pub(crate) fn require_bag(&self, operation: &str) -> Result<&DataBag> {
        self.bag.as_ref().ok_or_else(|| {
            Error::invalid_arg(
                "x",
                format!("{operation} requires a DataSlice with a DataBag attached"),
            )
        })
    }

    /// Returns the bag if it accepts writes.
    pub(crate) fn require_mutable_bag(&self, operation: &str) -> Result<&DataBag> {
        let bag = self.require_bag(operation)?;
        if !bag.is_mutable() {
            return Err(Error::immutable_bag_write());
        }
        Ok(bag)
    }

    /// Returns a copy attached to a mutable fork of the bag (or a fresh bag).
    pub fn fork_bag(&self) -> DataSlice {
        let bag = self.bag.as_ref().map_or_else(DataBag::new, |b| b.fork(true));
        self.with_bag(bag)
    }

    /// Returns a copy attached to a frozen version of the bag.
    pub fn freeze_bag(&self) -> DataSlice {
        match &self.bag {
            Some(bag) => self.with_bag(bag.frozen()),
            None => self.clone(),
        }
    }
}

/// The schema of a single item as inferred for literals.
pub(crate) fn item_schema(item: &DataItem) -> Schema {
    match item.dtype() {
        None => Schema::NONE,
        Some(dtype) => Schema::DType(dtype),
    }
}

/// Infers the schema of literal items: the common dtype if all present items share
/// one, OBJECT for mixed primitives and ItemIds, NONE when nothing is present.
pub(crate) fn infer_schema(items: &[DataItem]) -> Result<Schema> {
    let dtypes = items.iter().filter_map(DataItem::dtype).unique().collect_vec();
    match dtypes.as_slice() {
        [] => Ok(Schema::NONE),
        [single] => Ok(Schema::DType(*single)),
        many if many.contains(&DType::Schema) => Err(Error::schema_incompatible(
            "cannot mix schemas with other items in one DataSlice",
        )),
        _ => Ok(Schema::OBJECT),
    }
}

fn format_nested(
    f: &mut fmt::Formatter<'_>,
    shape: &JaggedShape,
    data: &[DataItem],
    dim: usize,
    index: usize,
) -> fmt::Result {
    if dim == shape.rank() {
        return write!(f, "{}", data[index]);
    }
    f.write_str("[")?;
    for (i, child) in shape.edges()[dim].range_at(index).enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        format_nested(f, shape, data, dim + 1, child)?;
    }
    f.write_str("]")
}

impl fmt::Display for DataSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_item() {
            write!(f, "DataItem({}, schema: {}", self.data[0], self.schema)?;
        } else {
            f.write_str("DataSlice(")?;
            format_nested(f, &self.shape, &self.data, 0, 0)?;
            write!(f, ", schema: {}, shape: {}", self.schema, self.shape)?;
        }
        if let Some(bag) = &self.bag {
            write!(f, ", bag_id: ${:x}", bag.id())?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for DataSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use kdata_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_repr() {
        let ds = DataSlice::from_values([Some(1), Some(2), None]).unwrap();
        assert_eq!(
            ds.to_string(),
            "DataSlice([1, 2, None], schema: INT32, shape: JaggedShape(3))"
        );
        let nested = ds
            .reshape(JaggedShape::from_sizes(&[vec![2], vec![2, 1]]).unwrap())
            .unwrap();
        assert_eq!(
            nested.to_string(),
            "DataSlice([[1, 2], [None]], schema: INT32, shape: JaggedShape(2, [2, 1]))"
        );
        assert_eq!(
            DataSlice::from_item("a").to_string(),
            "DataItem('a', schema: TEXT)"
        );
    }

    #[test]
    fn test_schema_inference() {
        assert_eq!(DataSlice::from_values([1, 2]).unwrap().schema(), Schema::INT32);
        assert_eq!(
            DataSlice::from_items(vec![1.into(), "a".into()])
                .unwrap()
                .schema(),
            Schema::OBJECT
        );
        assert_eq!(
            DataSlice::from_values([None::<i32>, None]).unwrap().schema(),
            Schema::NONE
        );
        assert!(DataSlice::from_items(vec![DType::Int32.into(), 1.into()]).is_err());
    }

    #[test]
    fn test_new_validates() {
        let err = DataSlice::new(JaggedShape::flat(2), vec![DataItem::from(1)], Schema::INT32, None)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ShapeIncompatible { .. }));
        let err = DataSlice::new(
            JaggedShape::flat(1),
            vec![DataItem::from("a")],
            Schema::INT32,
            None,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::SchemaIncompatible { .. }));
    }

    #[test]
    fn test_counts_and_equivalence() {
        let ds = DataSlice::from_values([Some(1), None, Some(3)]).unwrap();
        assert_eq!(ds.present_count(), 2);
        assert!(!ds.is_empty());
        assert!(DataSlice::missing(JaggedShape::flat(2), Schema::INT32).is_empty());
        assert!(ds.is_equivalent_to(&ds.clone()));
        let bag = DataBag::new();
        assert!(!ds.is_equivalent_to(&ds.with_bag(bag.clone())));
        assert!(ds.with_bag(bag.clone()).is_equivalent_to(&ds.with_bag(bag)));
        assert!(!ds.is_equivalent_to(&ds.flatten(0, 0).unwrap()));
    }
}
