//! Property-based test generators using proptest.
//!
//! Strategies produce segment shapes that respect the ledger's invariants:
//! hard plus soft deletions never exceed `max_doc`.

use proptest::prelude::*;
use std::collections::BTreeSet;

/// The per-commit state of one generated segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentShape {
    /// Documents in the segment.
    pub max_doc: i32,
    /// Hard-deleted documents.
    pub del_count: i32,
    /// Soft-deleted documents.
    pub soft_del_count: i32,
    /// Logical size in bytes.
    pub size_in_bytes: u64,
    /// Whether a field-infos update generation is recorded.
    pub field_infos_update: bool,
    /// Fields with doc-values update files.
    pub doc_values_fields: BTreeSet<i32>,
}

impl SegmentShape {
    /// A segment of `max_doc` documents and `size_in_bytes` bytes with no
    /// deletions or updates.
    pub fn plain(max_doc: i32, size_in_bytes: u64) -> Self {
        Self {
            max_doc,
            del_count: 0,
            soft_del_count: 0,
            size_in_bytes,
            field_infos_update: false,
            doc_values_fields: BTreeSet::new(),
        }
    }

    /// Sets the hard and soft deletion counts.
    pub fn with_deletes(mut self, del_count: i32, soft_del_count: i32) -> Self {
        self.del_count = del_count;
        self.soft_del_count = soft_del_count;
        self
    }
}

/// Strategy for a single segment shape.
pub fn segment_shape_strategy() -> impl Strategy<Value = SegmentShape> {
    (
        1..100_000i32,
        0.0..0.5f64,
        0.0..0.5f64,
        1u64..(1 << 32),
        any::<bool>(),
        prop::collection::btree_set(0..16i32, 0..3),
    )
        .prop_map(|(max_doc, del_frac, soft_frac, size_in_bytes, field_infos_update, doc_values_fields)| {
            let del_count = (f64::from(max_doc) * del_frac) as i32;
            let soft_del_count = (f64::from(max_doc - del_count) * soft_frac) as i32;
            SegmentShape {
                max_doc,
                del_count,
                soft_del_count,
                size_in_bytes,
                field_infos_update,
                doc_values_fields,
            }
        })
}

/// Strategy for the segments of a ledger.
pub fn ledger_shape_strategy(max_segments: usize) -> impl Strategy<Value = Vec<SegmentShape>> {
    prop::collection::vec(segment_shape_strategy(), 0..=max_segments)
}

/// Strategy for segment sizes in MB, skewed towards small segments the way
/// flushed segments are.
pub fn segment_sizes_mb_strategy(max_segments: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(
        prop_oneof![
            4 => 0.01..2.0f64,
            2 => 2.0..64.0f64,
            1 => 64.0..2048.0f64,
        ],
        1..=max_segments,
    )
}
