//! `DataBag`: the mutable, mergeable store behind slices of entities, objects,
//! lists, dicts and structured schemas.
//!
//! A bag maps `(ItemId, attribute)` pairs to values, list ItemIds to their items and
//! dict ItemIds to insertion-ordered entries. Structured schemas are stored the same
//! way as entities: a schema ItemId with one attribute per declared attribute schema.
//!
//! Bags fork cheaply (copy-on-write over shared segments), freeze in place and chain
//! read-only fallbacks that are resolved lazily on lookup.

mod bag;
mod dict;
mod merge;
mod segment;

pub use bag::{DataBag, MAX_SEGMENTS};
pub use dict::{DictEntries, validate_dict_key};
pub use merge::{ConflictPolicy, MergeOptions};
