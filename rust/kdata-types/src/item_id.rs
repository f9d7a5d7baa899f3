//! 128-bit identities.
//!
//! Layout (most significant bit first):
//!
//! | bits     | meaning                                          |
//! |----------|--------------------------------------------------|
//! | 127..126 | kind: object, list, dict or schema               |
//! | 125      | flavor: 0 allocated, 1 derived from content      |
//! | 124..0   | payload: allocator seed and counter, or a digest |
//!
//! Allocated and derived ids differ in the flavor bit and can never collide.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use kdata_common::{Result, error::Error};
use xxhash_rust::xxh3::Xxh3;

use crate::data_item::DataItem;

const KIND_SHIFT: u32 = 126;
const DERIVED_BIT: u128 = 1 << 125;
const PAYLOAD_MASK: u128 = DERIVED_BIT - 1;
const SEED_MASK: u64 = (1 << 61) - 1;

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// Number of base62 digits needed to represent 128 bits.
pub const ENCODED_LEN: usize = 22;

/// What an [`ItemId`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemIdKind {
    /// An entity or object with named attributes.
    Object = 0,
    List = 1,
    Dict = 2,
    /// A structured (entity, list or dict) schema.
    Schema = 3,
}

impl ItemIdKind {
    fn from_bits(bits: u128) -> ItemIdKind {
        match bits & 0b11 {
            0 => ItemIdKind::Object,
            1 => ItemIdKind::List,
            2 => ItemIdKind::Dict,
            _ => ItemIdKind::Schema,
        }
    }
}

/// A globally unique 128-bit identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u128);

impl ItemId {
    /// Reinterprets raw bits as an ItemId.
    #[inline]
    pub const fn from_raw(bits: u128) -> ItemId {
        ItemId(bits)
    }

    #[inline]
    pub const fn raw(self) -> u128 {
        self.0
    }

    /// Creates a content-derived id of the given kind from a 128-bit digest.
    pub fn derived(kind: ItemIdKind, digest: u128) -> ItemId {
        ItemId(((kind as u128) << KIND_SHIFT) | DERIVED_BIT | (digest & PAYLOAD_MASK))
    }

    #[inline]
    pub fn kind(self) -> ItemIdKind {
        ItemIdKind::from_bits(self.0 >> KIND_SHIFT)
    }

    /// Returns `true` for ids derived from content ("uu" or named ids).
    #[inline]
    pub fn is_derived(self) -> bool {
        self.0 & DERIVED_BIT != 0
    }

    #[inline]
    pub fn is_list(self) -> bool {
        self.kind() == ItemIdKind::List
    }

    #[inline]
    pub fn is_dict(self) -> bool {
        self.kind() == ItemIdKind::Dict
    }

    #[inline]
    pub fn is_schema(self) -> bool {
        self.kind() == ItemIdKind::Schema
    }

    #[inline]
    pub fn is_object(self) -> bool {
        self.kind() == ItemIdKind::Object
    }

    /// Returns an id with the same payload and flavor but a different kind.
    pub fn with_kind(self, kind: ItemIdKind) -> ItemId {
        ItemId((self.0 & (DERIVED_BIT | PAYLOAD_MASK)) | ((kind as u128) << KIND_SHIFT))
    }

    /// Encodes the id as a fixed-width base62 string.
    pub fn encode(self) -> String {
        let mut digits = [b'0'; ENCODED_LEN];
        let mut value = self.0;
        for digit in digits.iter_mut().rev() {
            *digit = BASE62_ALPHABET[(value % 62) as usize];
            value /= 62;
        }
        digits.iter().map(|&b| b as char).collect()
    }

    /// Decodes an id produced by [`ItemId::encode`].
    pub fn decode(text: &str) -> Result<ItemId> {
        if text.len() != ENCODED_LEN {
            return Err(Error::invalid_arg(
                "itemid",
                format!("expected {ENCODED_LEN} base62 characters, got '{text}'"),
            ));
        }
        let mut value: u128 = 0;
        for ch in text.bytes() {
            let digit = match ch {
                b'0'..=b'9' => ch - b'0',
                b'A'..=b'Z' => ch - b'A' + 10,
                b'a'..=b'z' => ch - b'a' + 36,
                _ => {
                    return Err(Error::invalid_arg(
                        "itemid",
                        format!("invalid base62 character in '{text}'"),
                    ));
                }
            };
            value = value
                .checked_mul(62)
                .and_then(|v| v.checked_add(digit as u128))
                .ok_or_else(|| {
                    Error::invalid_arg("itemid", format!("'{text}' overflows 128 bits"))
                })?;
        }
        Ok(ItemId(value))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.encode())
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({:?}, {})", self.kind(), self)
    }
}

/// Allocates fresh ItemIds.
///
/// Each allocator draws a random 61-bit seed and combines it with an atomic counter,
/// so ids from different allocators in one process are unique with overwhelming
/// probability, and ids from one allocator are unique by construction. Tests can
/// pin the seed with [`ItemIdAllocator::with_seed`].
#[derive(Debug)]
pub struct ItemIdAllocator {
    seed: u64,
    counter: AtomicU64,
}

impl ItemIdAllocator {
    /// Creates an allocator with a random seed.
    pub fn new() -> ItemIdAllocator {
        ItemIdAllocator::with_seed(rand::random::<u64>())
    }

    /// Creates an allocator with a fixed seed, producing a reproducible id sequence.
    pub fn with_seed(seed: u64) -> ItemIdAllocator {
        ItemIdAllocator {
            seed: seed & SEED_MASK,
            counter: AtomicU64::new(0),
        }
    }

    /// Allocates a single fresh id of the given kind.
    pub fn allocate(&self, kind: ItemIdKind) -> ItemId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        ItemId(((kind as u128) << KIND_SHIFT) | ((self.seed as u128) << 64) | n as u128)
    }

    /// Allocates `count` fresh ids of the given kind.
    pub fn allocate_many(&self, kind: ItemIdKind, count: usize) -> Vec<ItemId> {
        let start = self.counter.fetch_add(count as u64, Ordering::Relaxed);
        (0..count as u64)
            .map(|i| {
                ItemId(
                    ((kind as u128) << KIND_SHIFT)
                        | ((self.seed as u128) << 64)
                        | (start + i) as u128,
                )
            })
            .collect()
    }
}

impl Default for ItemIdAllocator {
    fn default() -> Self {
        ItemIdAllocator::new()
    }
}

/// Derives deterministic ItemIds from a seed and a set of named values.
///
/// Field order does not matter: fields are sorted by name before hashing, so
/// `uu(a=1, b=2)` and `uu(b=2, a=1)` yield the same id.
#[derive(Debug, Clone)]
pub struct UuidBuilder<'a> {
    kind: ItemIdKind,
    seed: &'a str,
    fields: Vec<(&'a str, &'a DataItem)>,
}

impl<'a> UuidBuilder<'a> {
    pub fn new(kind: ItemIdKind, seed: &'a str) -> UuidBuilder<'a> {
        UuidBuilder {
            kind,
            seed,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'a str, value: &'a DataItem) -> UuidBuilder<'a> {
        self.fields.push((name, value));
        self
    }

    pub fn fields(
        mut self,
        fields: impl IntoIterator<Item = (&'a str, &'a DataItem)>,
    ) -> UuidBuilder<'a> {
        self.fields.extend(fields);
        self
    }

    pub fn build(mut self) -> ItemId {
        self.fields.sort_by(|a, b| a.0.cmp(b.0));
        let mut hasher = Xxh3::new();
        hash_str(&mut hasher, self.seed);
        for (name, value) in &self.fields {
            hash_str(&mut hasher, name);
            value.fingerprint(&mut hasher);
        }
        ItemId::derived(self.kind, hasher.digest128())
    }
}

/// Returns the id of the schema named `name`; only the name participates.
pub fn named_schema_id(name: &str) -> ItemId {
    let mut hasher = Xxh3::new();
    hash_str(&mut hasher, "__named_schema__");
    hash_str(&mut hasher, name);
    ItemId::derived(ItemIdKind::Schema, hasher.digest128())
}

fn hash_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_ids_are_unique_and_typed() {
        let alloc = ItemIdAllocator::with_seed(1);
        let a = alloc.allocate(ItemIdKind::Object);
        let b = alloc.allocate(ItemIdKind::List);
        let many = alloc.allocate_many(ItemIdKind::Dict, 3);
        assert_ne!(a, b);
        assert!(a.is_object() && !a.is_derived());
        assert!(b.is_list());
        assert!(many.iter().all(|id| id.is_dict()));
        assert_eq!(many.iter().collect::<std::collections::HashSet<_>>().len(), 3);
    }

    #[test]
    fn test_seeded_allocators_are_reproducible() {
        let a = ItemIdAllocator::with_seed(5).allocate(ItemIdKind::Object);
        let b = ItemIdAllocator::with_seed(5).allocate(ItemIdKind::Object);
        assert_eq!(a, b);
    }

    #[test]
    fn test_derived_ids_never_collide_with_allocated() {
        let derived = ItemId::derived(ItemIdKind::Object, u128::MAX);
        assert!(derived.is_derived());
        let alloc = ItemIdAllocator::with_seed(u64::MAX);
        let allocated = alloc.allocate(ItemIdKind::Object);
        assert!(!allocated.is_derived());
        assert_ne!(derived, allocated);
    }

    #[test]
    fn test_uuid_is_order_independent() {
        let one = DataItem::Int32(1);
        let two = DataItem::Int32(2);
        let ab = UuidBuilder::new(ItemIdKind::Object, "")
            .field("a", &one)
            .field("b", &two)
            .build();
        let ba = UuidBuilder::new(ItemIdKind::Object, "")
            .field("b", &two)
            .field("a", &one)
            .build();
        assert_eq!(ab, ba);
        let seeded = UuidBuilder::new(ItemIdKind::Object, "x")
            .field("a", &one)
            .field("b", &two)
            .build();
        assert_ne!(ab, seeded);
        let changed = UuidBuilder::new(ItemIdKind::Object, "")
            .field("a", &one)
            .field("b", &one)
            .build();
        assert_ne!(ab, changed);
    }

    #[test]
    fn test_named_schema_id() {
        assert_eq!(named_schema_id("foo"), named_schema_id("foo"));
        assert_ne!(named_schema_id("foo"), named_schema_id("bar"));
        assert!(named_schema_id("foo").is_schema());
    }

    #[test]
    fn test_encode_decode() {
        let alloc = ItemIdAllocator::with_seed(3);
        for id in alloc.allocate_many(ItemIdKind::Schema, 10) {
            let text = id.encode();
            assert_eq!(text.len(), ENCODED_LEN);
            assert!(text.bytes().all(|b| b.is_ascii_alphanumeric()));
            assert_eq!(ItemId::decode(&text).unwrap(), id);
        }
        assert!(ItemId::decode("abc").is_err());
        assert!(ItemId::decode("zzzzzzzzzzzzzzzzzzzzzz").is_err());
        assert!(ItemId::decode("!!!!!!!!!!!!!!!!!!!!!!").is_err());
    }

    #[test]
    fn test_with_kind() {
        let id = ItemIdAllocator::with_seed(9).allocate(ItemIdKind::Object);
        let list = id.with_kind(ItemIdKind::List);
        assert!(list.is_list());
        assert_eq!(list.with_kind(ItemIdKind::Object), id);
    }
}
