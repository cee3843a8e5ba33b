//! Benchmark utilities.

use rand::Rng;
use segmerge_core::types::random_id;
use segmerge_core::{SegmentCommitInfo, SegmentInfo, SegmentInfos, Segmerge10Codec, Version};
use std::sync::Arc;

const MB: f64 = 1024.0 * 1024.0;

/// Generate `count` segment sizes in MB, mostly small with a long tail.
pub fn random_sizes_mb(count: usize) -> Vec<f64> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let roll: f64 = rng.gen();
            if roll < 0.7 {
                rng.gen_range(0.1..4.0)
            } else if roll < 0.95 {
                rng.gen_range(4.0..256.0)
            } else {
                rng.gen_range(256.0..4096.0)
            }
        })
        .collect()
}

/// Build an in-memory ledger with one segment per size. Nothing is
/// written to storage.
pub fn ledger_with_sizes(sizes_mb: &[f64], deletes_pct: f64) -> SegmentInfos {
    let mut infos = SegmentInfos::new(Version::LATEST.major);
    for size in sizes_mb {
        let name = infos.new_segment_name();
        let max_doc = ((size * 1000.0) as i32).max(1);
        let info = SegmentInfo::new(name, max_doc, Segmerge10Codec::NAME, random_id())
            .unwrap()
            .with_size_in_bytes((size * MB) as u64);
        let mut sci = SegmentCommitInfo::new(Arc::new(info));
        let deletes = (f64::from(max_doc) * deletes_pct / 100.0) as i32;
        if deletes > 0 {
            sci.advance_deletes(deletes).unwrap();
        }
        infos.add(sci);
    }
    infos
}
