//! A single dimension of a jagged shape.

use std::ops::Range;

use kdata_common::{Result, error::Error};
use kdata_shared_vec::SharedVec;

/// Maps each of `parent_size()` parent slots to a contiguous range of child slots.
///
/// Stores `parent_size() + 1` monotonically non-decreasing split points, the first
/// of which is always zero; the range of parent `i` is `offsets[i]..offsets[i + 1]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    offsets: SharedVec<usize>,
}

impl Edge {
    /// Creates an edge from raw split points.
    ///
    /// # Errors
    ///
    /// Fails when the split points are empty, do not start at zero, or decrease.
    pub fn from_split_points(offsets: Vec<usize>) -> Result<Edge> {
        if offsets.first() != Some(&0) {
            return Err(Error::invalid_arg(
                "split_points",
                "split points must be non-empty and start with 0",
            ));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::invalid_arg(
                "split_points",
                "split points must be sorted in non-decreasing order",
            ));
        }
        Ok(Edge {
            offsets: SharedVec::from_vec(offsets),
        })
    }

    /// Creates an edge from the number of children of every parent.
    pub fn from_sizes(sizes: &[usize]) -> Edge {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        let mut last = 0;
        for &size in sizes {
            last += size;
            offsets.push(last);
        }
        Edge {
            offsets: SharedVec::from_vec(offsets),
        }
    }

    /// Creates an edge where each of `parent_size` parents has `group_size` children.
    pub fn uniform(parent_size: usize, group_size: usize) -> Edge {
        Edge {
            offsets: SharedVec::from_fn(parent_size + 1, |i| i * group_size),
        }
    }

    /// Number of parent slots.
    #[inline]
    pub fn parent_size(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of child slots.
    #[inline]
    pub fn child_size(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    #[inline]
    pub fn split_points(&self) -> &[usize] {
        &self.offsets
    }

    /// Returns the child range of the given parent.
    #[inline]
    pub fn range_at(&self, parent: usize) -> Range<usize> {
        self.offsets[parent]..self.offsets[parent + 1]
    }

    /// Returns an iterator over the child ranges of all parents.
    pub fn ranges(&self) -> impl ExactSizeIterator<Item = Range<usize>> + '_ {
        self.offsets.windows(2).map(|w| w[0]..w[1])
    }

    /// Returns the number of children of every parent.
    pub fn sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Returns the common group size if all parents have the same number of children.
    pub fn uniform_size(&self) -> Option<usize> {
        let mut sizes = self.offsets.windows(2).map(|w| w[1] - w[0]);
        let first = sizes.next()?;
        sizes.all(|s| s == first).then_some(first)
    }

    /// For every child slot, returns the index of its parent.
    pub fn child_to_parent(&self) -> Vec<usize> {
        let mut mapping = Vec::with_capacity(self.child_size());
        for (parent, range) in self.ranges().enumerate() {
            mapping.extend(std::iter::repeat_n(parent, range.len()));
        }
        mapping
    }

    /// Composes this edge with a following `child` edge into a single edge that maps
    /// this edge's parents directly to the grandchildren.
    ///
    /// # Panics
    ///
    /// Panics if `child.parent_size() != self.child_size()`.
    pub fn compose(&self, child: &Edge) -> Edge {
        assert_eq!(child.parent_size(), self.child_size());
        Edge {
            offsets: self.offsets.map(|&offset| child.offsets[offset]),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Edge{:?}", self.split_points())
    }
}
