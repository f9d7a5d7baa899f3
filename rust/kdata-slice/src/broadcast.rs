//! Shape alignment: expanding slices to finer shapes.

use kdata_common::{Result, error::Error};
use kdata_shape::{Edge, JaggedShape};

use crate::slice::DataSlice;

impl DataSlice {
    /// Expands the slice to `shape`, replicating each item across the group of
    /// `shape` it corresponds to.
    ///
    /// With `ndim > 0` the last `ndim` dimensions are first imploded, the remaining
    /// shape is expanded to `shape` and the imploded dimensions are re-attached under
    /// every replicated slot.
    pub fn expand_to_shape(&self, shape: &JaggedShape, ndim: usize) -> Result<DataSlice> {
        if ndim > self.rank() {
            return Err(Error::invalid_arg(
                "ndim",
                format!("ndim must be a positive integer and <= x.ndim, got {ndim}"),
            ));
        }
        if ndim == 0 {
            if self.shape() == shape {
                return Ok(self.clone());
            }
            let indices = self.shape().expansion_indices(shape).ok_or_else(|| {
                Error::shape_incompatible(format!(
                    "DataSlice with shape={} cannot be expanded to shape={shape}",
                    self.shape()
                ))
            })?;
            return DataSlice::new(
                shape.clone(),
                self.data().gather(&indices),
                self.schema(),
                self.bag().cloned(),
            );
        }

        let outer_rank = self.rank() - ndim;
        let imploded = self.shape().remove_dims(outer_rank)?;
        let mut groups = imploded.expansion_indices(shape).ok_or_else(|| {
            Error::shape_incompatible(format!(
                "Cannot expand 'x' imploded with the last {ndim} dimension(s) to 'shape' due \
                 to incompatible shapes. Got 'x' shape: {}, imploded 'x' shape: {imploded}, \
                 'shape' to expand: {shape}",
                self.shape()
            ))
        })?;
        let mut edges = Vec::with_capacity(ndim);
        for edge in &self.shape().edges()[outer_rank..] {
            let sizes: Vec<usize> = groups.iter().map(|&g| edge.range_at(g).len()).collect();
            groups = groups.iter().flat_map(|&g| edge.range_at(g)).collect();
            edges.push(Edge::from_sizes(&sizes));
        }
        DataSlice::new(
            shape.add_dims(&edges)?,
            self.data().gather(&groups),
            self.schema(),
            self.bag().cloned(),
        )
    }

    /// Expands the slice to `shape` without imploding any dimension.
    pub fn broadcast_to(&self, shape: &JaggedShape) -> Result<DataSlice> {
        self.expand_to_shape(shape, 0)
    }

    /// Expands every slice to the most detailed shape among them.
    ///
    /// Fails unless all shapes are prefixes of a single one.
    pub fn align(slices: &[&DataSlice]) -> Result<Vec<DataSlice>> {
        let shape = JaggedShape::common_shape(slices.iter().map(|s| s.shape())).ok_or_else(|| {
            let shapes = slices
                .iter()
                .map(|s| s.shape().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Error::shape_incompatible(format!("shapes are not compatible: {shapes}"))
        })?;
        slices.iter().map(|s| s.broadcast_to(&shape)).collect()
    }
}

#[cfg(test)]
mod tests {
    use kdata_common::error::ErrorKind;
    use kdata_types::DataItem;

    use super::*;

    fn ints(values: &[i32]) -> DataSlice {
        DataSlice::from_values(values.iter().copied()).unwrap()
    }

    fn shape(levels: &[&[usize]]) -> JaggedShape {
        JaggedShape::from_sizes(levels).unwrap()
    }

    #[test]
    fn test_expand_scalar_and_prefix() {
        let item = DataSlice::from_item(7);
        let target = shape(&[&[2], &[2, 1]]);
        let expanded = item.broadcast_to(&target).unwrap();
        assert_eq!(expanded.items(), vec![DataItem::from(7); 3]);

        let rows = ints(&[1, 2]);
        let expanded = rows.broadcast_to(&target).unwrap();
        assert_eq!(expanded.items(), &[1.into(), 1.into(), DataItem::from(2)]);
        assert_eq!(expanded.shape(), &target);
    }

    #[test]
    fn test_expand_is_identity_on_own_shape() {
        let ds = ints(&[1, 2, 3])
            .reshape(shape(&[&[2], &[2, 1]]))
            .unwrap();
        let expanded = ds.expand_to_shape(ds.shape(), 0).unwrap();
        assert!(expanded.is_equivalent_to(&ds));
    }

    #[test]
    fn test_expand_incompatible() {
        let err = ints(&[1, 2]).broadcast_to(&JaggedShape::flat(3)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ShapeIncompatible { .. }));
        assert_eq!(
            err.to_string(),
            "DataSlice with shape=JaggedShape(2) cannot be expanded to shape=JaggedShape(3)"
        );
    }

    #[test]
    fn test_expand_with_ndim() {
        let ds = ints(&[1, 2, 3])
            .reshape(shape(&[&[2], &[1, 2]]))
            .unwrap();
        let expanded = ds.expand_to_shape(&shape(&[&[2], &[2, 1]]), 1).unwrap();
        assert_eq!(
            expanded.to_string(),
            "DataSlice([[[1], [1]], [[2, 3]]], schema: INT32, shape: JaggedShape(2, [2, 1], [1, 1, 2]))"
        );
    }

    #[test]
    fn test_expand_with_ndim_errors() {
        let ds = ints(&[1, 2, 3])
            .reshape(shape(&[&[2], &[2, 1]]))
            .unwrap();
        let err = ds.expand_to_shape(&JaggedShape::flat(3), 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot expand 'x' imploded with the last 1 dimension(s) to 'shape' due to \
             incompatible shapes. Got 'x' shape: JaggedShape(2, [2, 1]), imploded 'x' shape: \
             JaggedShape(2), 'shape' to expand: JaggedShape(3)"
        );
        let err = ds.expand_to_shape(&JaggedShape::flat(3), 3).unwrap_err();
        assert!(err.to_string().contains("got 3"));
    }

    #[test]
    fn test_align() {
        let a = DataSlice::from_item(1);
        let b = ints(&[1, 2, 3]);
        let aligned = DataSlice::align(&[&a, &b]).unwrap();
        assert_eq!(aligned[0].size(), 3);
        assert!(DataSlice::align(&[&ints(&[1, 2]), &b]).is_err());
    }

    #[test]
    fn test_broadcast_is_idempotent_on_random_shapes() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..50 {
            let rows = rng.usize(1..5);
            let sizes: Vec<usize> = (0..rows).map(|_| rng.usize(0..4)).collect();
            let target = shape(&[&[rows], &sizes]);
            let values: Vec<i32> = (0..rows).map(|_| rng.i32(-10..10)).collect();
            let once = ints(&values).broadcast_to(&target).unwrap();
            let twice = once.broadcast_to(&target).unwrap();
            assert!(twice.is_equivalent_to(&once));
            assert_eq!(once.size(), sizes.iter().sum::<usize>());
        }
    }
}
