//! An immutable, cheaply cloneable column of values.
//!
//! Slices, shapes and list contents share their backing storage through `Arc<Vec<T>>`;
//! every transformation (gather, repeat, map) produces a new column and never touches
//! the original one.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, RangeBounds};
use std::sync::Arc;

/// An immutable, cheaply cloneable view over a shared vector.
#[derive(Clone)]
pub struct SharedVec<T> {
    inner: Arc<Vec<T>>,
    offset: usize,
    len: usize,
}

impl<T> SharedVec<T> {
    /// Creates a new `SharedVec` owning `vec`.
    pub fn from_vec(vec: Vec<T>) -> Self {
        let len = vec.len();
        SharedVec {
            inner: Arc::new(vec),
            offset: 0,
            len,
        }
    }

    /// Creates a column of `len` elements produced by `f(index)`.
    pub fn from_fn(len: usize, f: impl FnMut(usize) -> T) -> Self {
        SharedVec::from_vec((0..len).map(f).collect())
    }

    /// Returns an empty `SharedVec`.
    pub fn empty() -> Self {
        SharedVec::from_vec(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        (index < self.len).then(|| &self.inner[self.offset + index])
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.inner[self.offset..self.offset + self.len]
    }

    /// Returns `true` when both columns view the same storage range.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            && self.offset == other.offset
            && self.len == other.len
    }

    /// Returns a zero-copy sub-range of this column.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn slice<R>(&self, range: R) -> Self
    where
        R: RangeBounds<usize>,
    {
        use std::ops::Bound::*;
        let start = match range.start_bound() {
            Included(&n) => n,
            Excluded(&n) => n + 1,
            Unbounded => 0,
        };
        let end = match range.end_bound() {
            Included(&n) => n + 1,
            Excluded(&n) => n,
            Unbounded => self.len,
        };
        assert!(start <= end && end <= self.len, "slice out of bounds");
        SharedVec {
            inner: self.inner.clone(),
            offset: self.offset + start,
            len: end - start,
        }
    }

    /// Builds a new column by applying `f` to every element.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> SharedVec<U> {
        SharedVec::from_vec(self.iter().map(f).collect())
    }
}

impl<T: Clone> SharedVec<T> {
    /// Creates a column holding `len` copies of `value`.
    pub fn filled(value: T, len: usize) -> Self {
        SharedVec::from_vec(vec![value; len])
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }

    /// Returns a new column with the elements at `indices`, in that order.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    pub fn gather(&self, indices: &[usize]) -> Self {
        let values = self.as_slice();
        SharedVec::from_vec(indices.iter().map(|&i| values[i].clone()).collect())
    }

    /// Returns a new column where the element at position `i` is repeated `counts[i]`
    /// times.
    ///
    /// # Panics
    ///
    /// Panics if `counts.len() != self.len()`.
    pub fn repeat_each(&self, counts: &[usize]) -> Self {
        assert_eq!(counts.len(), self.len, "repeat counts length mismatch");
        let total = counts.iter().sum();
        let mut out = Vec::with_capacity(total);
        for (value, &count) in self.iter().zip(counts) {
            out.extend(std::iter::repeat_n(value, count).cloned());
        }
        SharedVec::from_vec(out)
    }
}

impl<T> Deref for SharedVec<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: PartialEq> PartialEq for SharedVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_slice() == other.as_slice()
    }
}

impl<T: Eq> Eq for SharedVec<T> {}

impl<T: Hash> Hash for SharedVec<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state)
    }
}

impl<T> Default for SharedVec<T> {
    fn default() -> Self {
        SharedVec::empty()
    }
}

impl<'a, T> IntoIterator for &'a SharedVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<T> From<Vec<T>> for SharedVec<T> {
    fn from(vec: Vec<T>) -> Self {
        SharedVec::from_vec(vec)
    }
}

impl<T> FromIterator<T> for SharedVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        SharedVec::from_vec(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_shares_storage() {
        let shared = SharedVec::from_vec(vec![1, 2, 3, 4, 5]);
        let sub = shared.slice(1..4);
        assert_eq!(&*sub, &[2, 3, 4]);
        assert!(Arc::ptr_eq(&shared.inner, &sub.inner));
        assert_eq!(sub.get(3), None);
    }

    #[test]
    fn test_gather_and_repeat() {
        let shared: SharedVec<_> = ["a", "b", "c"].into_iter().collect();
        assert_eq!(&*shared.gather(&[2, 0, 0]), &["c", "a", "a"]);
        assert_eq!(&*shared.repeat_each(&[0, 2, 1]), &["b", "b", "c"]);
    }

    #[test]
    fn test_equality_ignores_storage() {
        let a = SharedVec::from_vec(vec![1, 2]);
        let b = SharedVec::filled(1, 1);
        assert_eq!(a.slice(..1), b);
        assert_ne!(a, b);
        assert_eq!(SharedVec::<i32>::default(), SharedVec::empty());
    }
}
