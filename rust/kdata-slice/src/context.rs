use std::sync::Arc;

use kdata_types::{ItemId, ItemIdAllocator, ItemIdKind};

/// Evaluation context passed to every operation that allocates fresh ItemIds.
///
/// Cloning shares the allocator.
#[derive(Debug, Clone, Default)]
pub struct Context {
    allocator: Arc<ItemIdAllocator>,
}

impl Context {
    pub fn new(allocator: Arc<ItemIdAllocator>) -> Context {
        Context { allocator }
    }

    /// A context with a deterministic allocator.
    pub fn with_seed(seed: u64) -> Context {
        Context::new(Arc::new(ItemIdAllocator::with_seed(seed)))
    }

    pub fn allocator(&self) -> &ItemIdAllocator {
        &self.allocator
    }

    pub(crate) fn allocate(&self, kind: ItemIdKind) -> ItemId {
        self.allocator.allocate(kind)
    }

    pub(crate) fn allocate_many(&self, kind: ItemIdKind, count: usize) -> Vec<ItemId> {
        self.allocator.allocate_many(kind, count)
    }
}
