//! Options controlling how conflicting values are resolved when bags are merged.

/// What to do when both sides of a merge hold different present values for the
/// same attribute, list or dict key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail with a `ConflictingMerge` error.
    #[default]
    Raise,
    /// Take the incoming value.
    Overwrite,
    /// Keep the value already in the destination.
    KeepOriginal,
}

/// Merge configuration. Data and schema triples are resolved independently;
/// schema triples are attributes of schema ItemIds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOptions {
    pub data_conflict: ConflictPolicy,
    pub schema_conflict: ConflictPolicy,
}

impl MergeOptions {
    /// Incoming values win for both data and schemas.
    pub fn overwrite() -> MergeOptions {
        MergeOptions {
            data_conflict: ConflictPolicy::Overwrite,
            schema_conflict: ConflictPolicy::Overwrite,
        }
    }

    /// Existing values win for both data and schemas.
    pub fn keep_original() -> MergeOptions {
        MergeOptions {
            data_conflict: ConflictPolicy::KeepOriginal,
            schema_conflict: ConflictPolicy::KeepOriginal,
        }
    }

    pub fn with_data_conflict(mut self, policy: ConflictPolicy) -> MergeOptions {
        self.data_conflict = policy;
        self
    }

    pub fn with_schema_conflict(mut self, policy: ConflictPolicy) -> MergeOptions {
        self.schema_conflict = policy;
        self
    }

    pub(crate) fn policy_for(&self, is_schema: bool) -> ConflictPolicy {
        if is_schema {
            self.schema_conflict
        } else {
            self.data_conflict
        }
    }
}
