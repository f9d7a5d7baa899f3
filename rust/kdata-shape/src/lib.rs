//! Jagged (ragged) multi-dimensional index spaces.
//!
//! A [`JaggedShape`] is an ordered sequence of [`Edge`]s. Each edge partitions the
//! slots of the previous dimension into groups: edge `i` maps every parent slot to a
//! contiguous range of child slots, described by a non-decreasing list of split
//! points (offsets) starting at zero. The rank of a shape is the number of edges and
//! its size is the number of leaf slots; the rank-0 (scalar) shape has exactly one slot.
//!
//! Shapes never own values. Slices use them to align, broadcast and regroup their
//! flat columnar data without copying it.

pub mod edge;
pub mod shape;

pub use edge::Edge;
pub use shape::JaggedShape;
