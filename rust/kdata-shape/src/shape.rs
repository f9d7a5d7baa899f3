//! The jagged shape: an immutable sequence of edges.

use std::fmt;

use itertools::Itertools;
use kdata_common::{Result, error::Error, verify_arg};
use kdata_shared_vec::SharedVec;

use crate::edge::Edge;

/// An immutable description of a ragged multi-dimensional index space.
///
/// The first edge always has a single parent (the implicit root), and the parent
/// size of every following edge equals the child size of the previous one.
/// Cloning is cheap: edges are shared.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JaggedShape {
    edges: SharedVec<Edge>,
}

impl JaggedShape {
    /// The rank-0 shape with a single slot.
    pub fn scalar() -> JaggedShape {
        JaggedShape {
            edges: SharedVec::empty(),
        }
    }

    /// A rank-1 shape with `size` slots.
    pub fn flat(size: usize) -> JaggedShape {
        JaggedShape {
            edges: SharedVec::from_vec(vec![Edge::uniform(1, size)]),
        }
    }

    /// Builds a shape from edges, verifying that consecutive edges line up.
    pub fn from_edges(edges: Vec<Edge>) -> Result<JaggedShape> {
        let mut parent_size = 1;
        for (i, edge) in edges.iter().enumerate() {
            if edge.parent_size() != parent_size {
                return Err(Error::shape_incompatible(format!(
                    "incompatible dimensions - edges[{i}].parent_size != {parent_size}"
                )));
            }
            parent_size = edge.child_size();
        }
        Ok(JaggedShape {
            edges: SharedVec::from_vec(edges),
        })
    }

    /// Builds a shape from per-dimension group sizes, e.g. `[[2], [2, 1]]` describes
    /// two rows holding two and one element respectively.
    pub fn from_sizes<S: AsRef<[usize]>>(levels: &[S]) -> Result<JaggedShape> {
        JaggedShape::from_edges(
            levels
                .iter()
                .map(|sizes| Edge::from_sizes(sizes.as_ref()))
                .collect(),
        )
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.edges.len()
    }

    /// Number of leaf slots.
    #[inline]
    pub fn size(&self) -> usize {
        self.edges.last().map_or(1, Edge::child_size)
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.edges.is_empty()
    }

    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of slots at the given dimension (`0` is the root, `rank()` the leaves).
    pub fn size_at(&self, dim: usize) -> usize {
        if dim == 0 {
            1
        } else {
            self.edges[dim - 1].child_size()
        }
    }

    /// Returns `true` if `self` is a coarser partition that `other` refines, that is,
    /// `other` starts with exactly the edges of `self`.
    pub fn is_prefix_of(&self, other: &JaggedShape) -> bool {
        self.rank() <= other.rank()
            && self
                .edges
                .iter()
                .zip(other.edges.iter())
                .all(|(a, b)| a == b)
    }

    /// Keeps only the first `rank` dimensions ("implodes" the rest).
    pub fn remove_dims(&self, rank: usize) -> Result<JaggedShape> {
        verify_arg!(rank, rank <= self.rank());
        Ok(JaggedShape {
            edges: self.edges.slice(..rank),
        })
    }

    /// Appends `edges` as new trailing dimensions.
    pub fn add_dims(&self, edges: &[Edge]) -> Result<JaggedShape> {
        JaggedShape::from_edges(self.edges.iter().chain(edges).cloned().collect())
    }

    /// Collapses dimensions `[from, to)` into a single dimension. When `from == to`, a
    /// unit dimension is inserted at `from` instead. The size is unchanged.
    pub fn flatten(&self, from: usize, to: usize) -> Result<JaggedShape> {
        if from > to || to > self.rank() {
            return Err(Error::invalid_arg(
                "flatten",
                format!(
                    "invalid dimension range [{from}, {to}) for rank {}",
                    self.rank()
                ),
            ));
        }
        let mut edges = self.edges[..from].to_vec();
        if from == to {
            edges.push(Edge::uniform(self.size_at(from), 1));
        } else {
            let collapsed = self.edges[from + 1..to]
                .iter()
                .fold(self.edges[from].clone(), |acc, edge| acc.compose(edge));
            edges.push(collapsed);
        }
        edges.extend_from_slice(&self.edges[to..]);
        JaggedShape::from_edges(edges)
    }

    /// Collapses the last `ndim` dimensions into one.
    pub fn flatten_last_ndim(&self, ndim: usize) -> Result<JaggedShape> {
        if ndim > self.rank() {
            return Err(Error::invalid_arg(
                "ndim",
                format!("expected 0 <= ndim <= rank, got {ndim}"),
            ));
        }
        let rank = self.rank();
        self.flatten(rank - ndim, rank)
    }

    /// For every leaf slot of `target`, returns the leaf slot of `self` it expands from.
    ///
    /// Returns `None` if `self` is not a prefix of `target`.
    pub fn expansion_indices(&self, target: &JaggedShape) -> Option<Vec<usize>> {
        if !self.is_prefix_of(target) {
            return None;
        }
        let mut indices: Vec<usize> = (0..self.size()).collect();
        for edge in &target.edges[self.rank()..] {
            let mut next = Vec::with_capacity(edge.child_size());
            for (parent, range) in edge.ranges().enumerate() {
                next.extend(std::iter::repeat_n(indices[parent], range.len()));
            }
            indices = next;
        }
        Some(indices)
    }

    /// Returns the most detailed of `shapes` if every other shape is its prefix.
    pub fn common_shape<'a>(
        shapes: impl IntoIterator<Item = &'a JaggedShape>,
    ) -> Option<JaggedShape> {
        let shapes = shapes.into_iter().collect_vec();
        let widest = shapes.iter().max_by_key(|s| s.rank())?;
        shapes
            .iter()
            .all(|s| s.is_prefix_of(widest))
            .then(|| (*widest).clone())
    }
}

impl Default for JaggedShape {
    fn default() -> Self {
        JaggedShape::scalar()
    }
}

impl fmt::Display for JaggedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self.edges.iter().map(|edge| match edge.uniform_size() {
            Some(size) => size.to_string(),
            None => format!("[{}]", edge.sizes().iter().join(", ")),
        });
        write!(f, "JaggedShape({})", dims.format(", "))
    }
}

impl fmt::Debug for JaggedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use kdata_common::error::ErrorKind;

    use super::*;

    fn shape(levels: &[&[usize]]) -> JaggedShape {
        JaggedShape::from_sizes(levels).unwrap()
    }

    #[test]
    fn test_scalar() {
        let s = JaggedShape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.size(), 1);
        assert_eq!(s.to_string(), "JaggedShape()");
    }

    #[test]
    fn test_display() {
        assert_eq!(JaggedShape::flat(3).to_string(), "JaggedShape(3)");
        assert_eq!(shape(&[&[2], &[2, 1]]).to_string(), "JaggedShape(2, [2, 1])");
        assert_eq!(shape(&[&[2], &[2, 2]]).to_string(), "JaggedShape(2, 2)");
    }

    #[test]
    fn test_from_edges_mismatch() {
        let err = JaggedShape::from_sizes(&[&[2][..], &[1, 1, 1][..]]).unwrap_err();
        assert!(err.to_string().contains("edges[1]"));
    }

    #[test]
    fn test_prefix_and_expansion() {
        let outer = JaggedShape::flat(2);
        let inner = shape(&[&[2], &[2, 1]]);
        assert!(outer.is_prefix_of(&inner));
        assert!(!inner.is_prefix_of(&outer));
        assert_eq!(outer.expansion_indices(&inner).unwrap(), vec![0, 0, 1]);
        assert_eq!(
            JaggedShape::scalar().expansion_indices(&inner).unwrap(),
            vec![0, 0, 0]
        );
        assert!(JaggedShape::flat(3).expansion_indices(&inner).is_none());
        assert_eq!(
            inner.expansion_indices(&inner).unwrap(),
            (0..inner.size()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_flatten() {
        let s = shape(&[&[2], &[2, 1], &[1, 2, 3]]);
        let flat = s.flatten_last_ndim(2).unwrap();
        assert_eq!(flat.rank(), 2);
        assert_eq!(flat.size(), 6);
        assert_eq!(flat.edges()[1].sizes(), vec![3, 3]);

        let all = s.flatten(0, 3).unwrap();
        assert_eq!(all, JaggedShape::flat(6));

        let unit = s.flatten(1, 1).unwrap();
        assert_eq!(unit.rank(), 4);
        assert_eq!(unit.edges()[1].sizes(), vec![1, 1]);
        assert!(s.flatten_last_ndim(4).is_err());
    }

    #[test]
    fn test_common_shape() {
        let a = JaggedShape::flat(2);
        let b = shape(&[&[2], &[2, 1]]);
        let c = JaggedShape::scalar();
        assert_eq!(JaggedShape::common_shape([&a, &b, &c]), Some(b.clone()));
        assert_eq!(
            JaggedShape::common_shape([&JaggedShape::flat(3), &b]),
            None
        );
    }

    #[test]
    fn test_remove_and_add_dims() {
        let s = shape(&[&[2], &[2, 1]]);
        let imploded = s.remove_dims(1).unwrap();
        assert_eq!(imploded, JaggedShape::flat(2));
        let restored = imploded.add_dims(&s.edges()[1..]).unwrap();
        assert_eq!(restored, s);
        assert_eq!(s.remove_dims(0).unwrap(), JaggedShape::scalar());

        let err = s.remove_dims(3).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }
}
