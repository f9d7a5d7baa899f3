//! `DataSlice`: a jagged array of items with a schema and an optional bag.
//!
//! Every operator works on whole slices. Arguments are first aligned by
//! broadcasting (see [`DataSlice::align`]), then converted along the casting
//! lattice, and the result is packaged with a derived schema and a bag that is
//! either reused, forked or merged from the inputs.
//!
//! Operators are grouped by concern:
//!
//! * [`broadcast`] and [`casting`] - shape alignment and schema conversion
//! * [`attrs`] - attribute reads and writes, adopting nested data on write
//! * [`schema_ops`] - schema factories (`new_schema`, `uu_schema`, `list_schema`, ...)
//!   and schema inspection
//! * [`factories`] and [`ids`] - creation of entities, objects, lists, dicts and ItemIds
//! * [`ops`] - `select`, `take`, `group_by` and list/dict access
//! * [`extract`] - extraction of reachable data and the clone family
//! * [`compose`] - attaching enriched or updated bags
//! * [`boxing`] - conversion of values boxed by a binding layer

pub mod attrs;
pub mod boxing;
pub mod broadcast;
pub mod casting;
pub mod compose;
pub mod context;
pub mod extract;
pub mod factories;
pub mod ids;
pub mod ops;
pub mod schema_ops;
pub mod slice;

pub use boxing::{BoxedValue, from_boxed};
pub use casting::{common_schema, common_schema_of};
pub use context::Context;
pub use factories::{
    FactoryOptions, dict_like, dict_shaped, list_like, list_shaped, new_like, new_shaped,
    new_shaped_as, obj_like, obj_shaped,
};
pub use ids::{
    decode_itemid, encode_itemid, new_dictid_like, new_dictid_shaped, new_dictid_shaped_as,
    new_itemid_like, new_itemid_shaped, new_itemid_shaped_as, new_listid_like,
    new_listid_shaped, new_listid_shaped_as, uu, uuid, uuid_for_dict, uuid_for_list, uuobj,
};
pub use schema_ops::{
    ITEMS_ATTR, KEYS_ATTR, SCHEMA_ATTR, StructKind, VALUES_ATTR, dict_schema, is_reserved_attr,
    list_schema, named_schema, new_schema, uu_schema,
};
pub use slice::DataSlice;
