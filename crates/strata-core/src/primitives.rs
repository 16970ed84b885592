//! # Engine Primitives
//!
//! Hardcoded limits and constants for the Strata engine.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Every query and every write is bounded by one of them.

use uuid::Uuid;

/// Maximum traversal depth for graph queries.
///
/// - All queries must be computationally bounded.
/// - A traversal with `max_depth` above this is rejected, not clamped.
pub const MAX_TRAVERSAL_DEPTH: usize = 32;

/// Maximum number of start nodes in a single traversal.
pub const MAX_QUERY_START_NODES: usize = 100;

/// Hard ceiling on the `limit` of any query.
pub const MAX_QUERY_RESULTS: usize = 10_000;

/// Maximum number of items in one batch upsert.
///
/// Bounds how long a batch can hold its tenant's write section.
pub const MAX_BATCH_SIZE: usize = 1000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length in bytes of a node label or edge kind.
pub const MAX_LABEL_LENGTH: usize = 256;

/// Maximum length in bytes of a property key.
pub const MAX_PROP_KEY_LENGTH: usize = 256;

/// Maximum nesting depth of lists and maps inside a property bag.
pub const MAX_PROP_DEPTH: usize = 32;

/// Maximum length in bytes of an id alias.
pub const MAX_ALIAS_LENGTH: usize = 512;

/// Maximum length in bytes of a tenant id.
pub const MAX_TENANT_ID_LENGTH: usize = 128;

// =============================================================================
// IDENTITY & PERSISTENCE
// =============================================================================

/// Namespace for UUIDv5 node and edge ids.
///
/// Changing this changes every derived id; journals written under a
/// different namespace would replay to different ids.
pub const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x2f, 0x1c, 0x4e, 0x93, 0x5a, 0x4d, 0x07, 0xa1, 0x3c, 0x58, 0xe2, 0x0f, 0x7d, 0x91, 0xb4,
]);

/// Current journal format version.
///
/// Increment this when making breaking changes to the journal layout.
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_consistent() {
        assert!(MAX_TRAVERSAL_DEPTH > 0);
        assert!(MAX_BATCH_SIZE <= MAX_QUERY_RESULTS);
        assert!(MAX_PROP_DEPTH > 1);
        assert!(!ID_NAMESPACE.is_nil());
    }
}
