//! Scalar building blocks of the kdata model.
//!
//! - [`ItemId`]: 128-bit identities of entities, lists, dicts and structured schemas,
//!   either freshly allocated by an [`ItemIdAllocator`] or derived from content.
//! - [`DType`]: primitive and special schema tags, together with the promotion
//!   lattice ([`CastingPolicy`]) used for implicit casting.
//! - [`DataItem`]: a single (possibly missing) value stored in slices and bags.
//! - [`Schema`]: a schema value, either a [`DType`] or a structured schema ItemId.

pub mod cast;
pub mod data_item;
pub mod dtype;
pub mod id_hash;
pub mod item_id;
pub mod schema;

pub use data_item::DataItem;
pub use dtype::{CastingPolicy, DType};
pub use item_id::{ItemId, ItemIdAllocator, ItemIdKind, UuidBuilder};
pub use schema::Schema;
