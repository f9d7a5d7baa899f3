//! # kdata: jagged slices over mergeable attribute bags
//!
//! kdata models structured and semi-structured data as columnar, possibly ragged
//! arrays ("slices") of items. Primitive items are stored inline; entities, lists
//! and dicts are ItemIds whose attributes, items and entries live in a separate
//! store (a "bag") that can be forked, frozen, merged and chained with fallbacks.
//!
//! ## Key Concepts
//!
//! * **DataSlice**: an immutable `(shape, items, schema, bag)` value. Every operator
//!   takes and returns slices.
//! * **JaggedShape**: the ragged multi-dimensional layout of a slice. Operators
//!   align their arguments by broadcasting coarser shapes to finer ones.
//! * **Schema**: a primitive dtype, OBJECT, ANY, NONE, or a structured schema
//!   (entity, list or dict) stored in a bag like any entity. Implicit conversions
//!   follow a fixed promotion lattice.
//! * **DataBag**: a copy-on-write triple store. Writing an entity from one bag
//!   into another adopts everything reachable from it.
//! * **ItemId**: a 128-bit identity, either freshly allocated or derived from
//!   content, so that equal inputs to `uu`-style operators yield equal ids.
//!
//! ## Module Organization
//!
//! * [`common`] - errors and result types
//! * [`shape`] - edges and jagged shapes
//! * [`types`] - ItemIds, dtypes, items, schemas and the casting lattice
//! * [`bag`] - the attribute store with fork, freeze, fallbacks and merges
//! * [`slice`] - `DataSlice` and its operators
//!
//! The [`support`] module re-exports the shared vector used for columnar storage.

pub use kdata_bag as bag;
pub use kdata_common as common;
pub use kdata_shape as shape;
pub use kdata_slice as slice;
pub use kdata_types as types;

pub mod support {
    pub use kdata_shared_vec as shared_vec;
}
