//! Tiered merge policy.
//!
//! Segments are grouped into tiers of roughly equal size. The policy
//! computes how many segments the index is allowed to have given its total
//! size, and when that budget (or the deleted-document budget) is exceeded
//! picks the cheapest merges: those with low skew, small output and many
//! reclaimed deletes.
//!
//! ## Invariants
//!
//! - Segments in [`MergeContext::merging_segments`] are never selected
//! - A merge never produces a segment larger than the configured maximum,
//!   except for forced merges down to a single segment
//! - At most one maximum-sized merge is proposed per natural call

use super::policy::{MergeContext, MergePolicy};
use super::{MergeScore, MergeSpecification, MergeTrigger, OneMerge};
use crate::config::TieredMergePolicyConfig;
use crate::error::CoreResult;
use crate::ledger::SegmentInfos;
use crate::segment::SegmentCommitInfo;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Size and document counts of one segment as seen by the policy.
#[derive(Debug, Clone)]
struct SegmentSizeAndDocs<'a> {
    info: &'a SegmentCommitInfo,
    /// Size discounted by the deletes a merge would reclaim.
    size: u64,
    /// Size as reported by the context.
    raw_size: u64,
    del_count: i32,
    max_doc: i32,
}

impl SegmentSizeAndDocs<'_> {
    fn name(&self) -> &str {
        self.info.name()
    }

    fn live_docs(&self) -> i64 {
        i64::from(self.max_doc) - i64::from(self.del_count)
    }

    fn deletes_pct(&self) -> f64 {
        if self.max_doc <= 0 {
            0.0
        } else {
            100.0 * f64::from(self.del_count) / f64::from(self.max_doc)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
    Natural,
    ForcedMerge,
    ForcedDeletes,
}

/// Limits for one candidate search.
#[derive(Debug, Clone, Copy)]
struct Budget {
    max_merged_bytes: u64,
    merge_factor: usize,
    allowed_seg_count: usize,
    allowed_del_count: i64,
    allowed_doc_count: i64,
    mode: MergeMode,
    max_merge_is_running: bool,
    max_num_segments: Option<usize>,
}

/// Merges segments of approximately equal size, subject to a per-tier
/// segment budget.
///
/// ## Example
///
/// ```
/// use segmerge_core::config::TieredMergePolicyConfig;
/// use segmerge_core::merge::TieredMergePolicy;
///
/// let policy = TieredMergePolicy::new(
///     TieredMergePolicyConfig::default().segments_per_tier(5.0),
/// )
/// .unwrap();
/// assert_eq!(policy.config().merge_factor(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct TieredMergePolicy {
    config: TieredMergePolicyConfig,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        Self {
            config: TieredMergePolicyConfig::default(),
        }
    }
}

impl TieredMergePolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: TieredMergePolicyConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TieredMergePolicyConfig {
        &self.config
    }

    fn floor_size(&self, bytes: u64) -> u64 {
        bytes.max(self.config.floor_segment_bytes())
    }

    /// Returns the segments with their pro-rated sizes, largest first and
    /// ties broken by name.
    fn sorted_by_size<'a>(
        &self,
        infos: &'a SegmentInfos,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Vec<SegmentSizeAndDocs<'a>>> {
        let mut sorted = Vec::with_capacity(infos.len());
        for info in infos {
            let raw_size = ctx.size_in_bytes(info)?;
            let del_count = ctx.num_deletes_to_merge(info)?;
            let max_doc = info.info().max_doc();
            let size = if max_doc <= 0 {
                raw_size
            } else {
                let del_ratio = f64::from(del_count) / f64::from(max_doc);
                (raw_size as f64 * (1.0 - del_ratio)) as u64
            };
            sorted.push(SegmentSizeAndDocs {
                info,
                size,
                raw_size,
                del_count,
                max_doc,
            });
        }
        sorted.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name().cmp(b.name())));
        Ok(sorted)
    }

    /// Scores a candidate; lower is better.
    ///
    /// Skew measures how unbalanced the merge is (the largest input's share
    /// of the total, after flooring tiny segments). It is multiplied by a
    /// gentle preference for smaller merges and by the square of the
    /// fraction of bytes that survive, which favours reclaiming deletes.
    fn score(&self, candidate: &[&SegmentSizeAndDocs<'_>], hit_too_large: bool, merge_factor: usize) -> MergeScore {
        let mut before: u64 = 0;
        let mut after: u64 = 0;
        let mut after_floored: u64 = 0;
        for seg in candidate {
            after = after.saturating_add(seg.size);
            after_floored = after_floored.saturating_add(self.floor_size(seg.size));
            before = before.saturating_add(seg.raw_size);
        }

        let skew = if hit_too_large {
            1.0 / merge_factor as f64
        } else if after_floored == 0 {
            1.0
        } else {
            candidate.first().map_or(0, |seg| self.floor_size(seg.size)) as f64 / after_floored as f64
        };
        let non_del_ratio = if before == 0 { 1.0 } else { after as f64 / before as f64 };
        let score = skew * (after as f64).powf(0.05) * non_del_ratio.powi(2);

        MergeScore {
            score,
            explanation: format!("skew={skew:.3} nonDelRatio={non_del_ratio:.3}"),
        }
    }

    /// Greedily picks the best-scoring merges from `eligible` until the
    /// budget is met.
    fn do_find_merges(&self, mut eligible: Vec<SegmentSizeAndDocs<'_>>, budget: Budget) -> Option<MergeSpecification> {
        let floor = self.config.floor_segment_bytes();
        let mf = budget.merge_factor;
        let mut to_be_merged: HashSet<String> = HashSet::new();
        let mut spec: Option<MergeSpecification> = None;
        let mut have_one_large_merge = false;

        loop {
            eligible.retain(|seg| !to_be_merged.contains(seg.name()));
            if eligible.is_empty() {
                return spec;
            }

            let remaining_del: i64 = eligible.iter().map(|seg| i64::from(seg.del_count)).sum();
            match budget.mode {
                MergeMode::Natural => {
                    if eligible.len() <= budget.allowed_seg_count && remaining_del <= budget.allowed_del_count {
                        return spec;
                    }
                }
                MergeMode::ForcedMerge => {
                    let planned = spec.as_ref().map_or(0, MergeSpecification::len);
                    if eligible.len() + planned <= budget.allowed_seg_count && remaining_del == 0 {
                        return spec;
                    }
                }
                MergeMode::ForcedDeletes => {}
            }

            let mut best: Option<(Vec<usize>, MergeScore, bool)> = None;
            for start in 0..eligible.len() {
                let mut candidate: Vec<usize> = Vec::new();
                let mut hit_too_large = false;
                let mut bytes: u64 = 0;
                let mut docs: i64 = 0;

                let mut idx = start;
                while idx < eligible.len()
                    && (candidate.len() < mf || bytes < floor)
                    && bytes < budget.max_merged_bytes
                    && (bytes < floor || docs <= budget.allowed_doc_count)
                {
                    let seg = &eligible[idx];
                    idx += 1;
                    let too_many_bytes = bytes.saturating_add(seg.size) > budget.max_merged_bytes;
                    let too_many_docs = bytes > floor && docs + seg.live_docs() > budget.allowed_doc_count;
                    if too_many_bytes || too_many_docs {
                        // only a max-sized result makes the merge "too large"
                        hit_too_large |= too_many_bytes;
                        if !candidate.is_empty() {
                            // keep packing smaller segments
                            continue;
                        }
                    }
                    candidate.push(idx - 1);
                    bytes = bytes.saturating_add(seg.size);
                    docs += seg.live_docs();
                }

                let Some(&first) = candidate.first() else {
                    continue;
                };
                let biggest = &eligible[first];
                if !hit_too_large
                    && budget.mode == MergeMode::Natural
                    && (bytes as f64) < biggest.size as f64 * 1.5
                    && f64::from(biggest.del_count) < f64::from(biggest.max_doc) * self.config.deletes_pct_allowed / 100.0
                {
                    // would rewrite the biggest input for little gain
                    continue;
                }
                if candidate.len() == 1 && biggest.del_count == 0 {
                    continue;
                }
                if best.is_some() && !hit_too_large && candidate.len() < mf {
                    // only smaller merges remain
                    break;
                }

                let segs: Vec<&SegmentSizeAndDocs<'_>> = candidate.iter().map(|&i| &eligible[i]).collect();
                let score = self.score(&segs, hit_too_large, mf);
                let better = match &best {
                    Some((_, best_score, _)) => score.score < best_score.score,
                    None => true,
                };
                if better && (!hit_too_large || !budget.max_merge_is_running) {
                    best = Some((candidate, score, hit_too_large));
                }
            }

            let Some((best, score, best_too_large)) = best else {
                return spec;
            };

            if !have_one_large_merge || !best_too_large || budget.mode == MergeMode::ForcedDeletes {
                have_one_large_merge |= best_too_large;
                let merge = self.one_merge(best.iter().map(|&i| &eligible[i]), budget.max_num_segments);
                debug!(
                    segments = %merge.seg_string(),
                    score = score.score,
                    explanation = %score.explanation,
                    too_large = best_too_large,
                    "selected merge"
                );
                spec.get_or_insert_with(MergeSpecification::new).add(merge);
            }
            for &i in &best {
                to_be_merged.insert(eligible[i].name().to_string());
            }
        }
    }

    fn one_merge<'s, 'a: 's>(
        &self,
        segs: impl Iterator<Item = &'s SegmentSizeAndDocs<'a>>,
        max_num_segments: Option<usize>,
    ) -> OneMerge {
        let mut estimated: u64 = 0;
        let mut infos = Vec::new();
        for seg in segs {
            estimated = estimated.saturating_add(seg.size);
            infos.push(seg.info.clone());
        }
        let merge = OneMerge::new(infos).with_estimated_merge_bytes(estimated);
        match max_num_segments {
            Some(max) => merge.with_max_num_segments(max),
            None => merge,
        }
    }
}

impl MergePolicy for TieredMergePolicy {
    fn find_merges(
        &self,
        trigger: MergeTrigger,
        infos: &SegmentInfos,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        let merging = ctx.merging_segments();
        let sorted = self.sorted_by_size(infos, ctx)?;
        if sorted.is_empty() {
            return Ok(None);
        }

        let mut total_bytes: u64 = 0;
        let mut min_segment_bytes = u64::MAX;
        let mut total_del: i64 = 0;
        let mut total_max_doc: i64 = 0;
        let mut merging_bytes: u64 = 0;
        let mut eligible = Vec::with_capacity(sorted.len());
        for seg in sorted {
            min_segment_bytes = min_segment_bytes.min(seg.size);
            total_bytes = total_bytes.saturating_add(seg.size);
            if merging.contains(seg.name()) {
                merging_bytes = merging_bytes.saturating_add(seg.size);
                // its deletes are already being reclaimed
                total_max_doc += seg.live_docs();
            } else {
                total_del += i64::from(seg.del_count);
                total_max_doc += i64::from(seg.max_doc);
                eligible.push(seg);
            }
        }

        let max_merged = self.config.max_merged_segment_bytes();
        let pct = self.config.deletes_pct_allowed;
        let tsc = self.config.target_search_concurrency.max(1);
        let total_del_pct = if total_max_doc > 0 {
            100.0 * total_del as f64 / total_max_doc as f64
        } else {
            0.0
        };
        let mut allowed_del_count = (pct * total_max_doc as f64 / 100.0) as i64;

        let mut too_big_count = 0usize;
        let mut concurrency_count = 0usize;
        let mut budgeted = Vec::with_capacity(eligible.len());
        for seg in eligible {
            if seg.size > max_merged / 2 && (total_del_pct <= pct || seg.deletes_pct() <= pct) {
                too_big_count += 1;
                total_bytes = total_bytes.saturating_sub(seg.size);
                allowed_del_count -= i64::from(seg.del_count);
                continue;
            }
            if concurrency_count + too_big_count < tsc - 1 {
                concurrency_count += 1;
                total_bytes = total_bytes.saturating_sub(seg.size);
            }
            budgeted.push(seg);
        }
        let allowed_del_count = allowed_del_count.max(0);

        let mf = self.config.merge_factor();
        let spt = self.config.segments_per_tier;
        let mut level = min_segment_bytes.max(self.config.floor_segment_bytes()).max(1) as f64;
        let mut bytes_left = total_bytes as f64;
        let mut allowed_seg_count = 0.0f64;
        loop {
            let seg_count_level = bytes_left / level;
            if seg_count_level <= spt || level >= max_merged as f64 {
                allowed_seg_count += seg_count_level.ceil();
                break;
            }
            allowed_seg_count += spt;
            bytes_left -= spt * level;
            level = (level * mf as f64).min(max_merged as f64);
        }
        allowed_seg_count += concurrency_count as f64;
        allowed_seg_count = allowed_seg_count.max(spt);
        allowed_seg_count = allowed_seg_count.max(tsc.saturating_sub(too_big_count) as f64);

        let live_docs = (total_max_doc - total_del).max(0);
        let tsc_docs = i64::try_from(tsc).unwrap_or(i64::MAX);
        let allowed_doc_count = (live_docs + tsc_docs - 1) / tsc_docs;

        debug!(
            %trigger,
            segments = infos.len(),
            eligible = budgeted.len(),
            allowed_segments = allowed_seg_count,
            allowed_deletes = allowed_del_count,
            too_big = too_big_count,
            "finding merges"
        );

        Ok(self.do_find_merges(
            budgeted,
            Budget {
                max_merged_bytes: max_merged,
                merge_factor: mf,
                allowed_seg_count: allowed_seg_count as usize,
                allowed_del_count,
                allowed_doc_count,
                mode: MergeMode::Natural,
                max_merge_is_running: merging_bytes >= max_merged,
                max_num_segments: None,
            },
        ))
    }

    fn find_forced_merges(
        &self,
        infos: &SegmentInfos,
        max_segment_count: usize,
        segments_to_merge: &HashMap<String, bool>,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        let merging = ctx.merging_segments();
        let sorted = self.sorted_by_size(infos, ctx)?;

        let mut force_merge_running = false;
        let mut total_merge_bytes: u64 = 0;
        let mut candidates = Vec::with_capacity(sorted.len());
        for seg in sorted {
            if !segments_to_merge.contains_key(seg.name()) {
                continue;
            }
            if merging.contains(seg.name()) {
                force_merge_running = true;
                continue;
            }
            total_merge_bytes = total_merge_bytes.saturating_add(seg.size);
            candidates.push(seg);
        }

        let max_merged = self.config.max_merged_segment_bytes();
        let max_merge_bytes = match max_segment_count {
            1 => u64::MAX,
            usize::MAX => max_merged,
            count => {
                let per_segment = (total_merge_bytes as f64 / count as f64).max(max_merged as f64);
                // headroom so one pass usually reaches the target
                (per_segment * 1.25) as u64
            }
        };

        let mut found_deletes = false;
        candidates.retain(|seg| {
            let is_original = segments_to_merge.get(seg.name()).copied().unwrap_or(false);
            if seg.del_count != 0 {
                found_deletes |= is_original;
                return true;
            }
            if max_segment_count == usize::MAX {
                return is_original;
            }
            seg.size < max_merge_bytes
        });

        if candidates.is_empty() {
            return Ok(None);
        }
        if !found_deletes {
            let satisfied = (max_segment_count != usize::MAX
                && max_segment_count > 1
                && candidates.len() <= max_segment_count)
                || (max_segment_count == 1 && candidates.len() == 1);
            if satisfied {
                return Ok(None);
            }
        }

        let explicit = self.config.max_merge_at_once_explicit;
        let starting = candidates.len();
        let final_merge = starting < max_segment_count.saturating_add(explicit).saturating_sub(1);
        if force_merge_running && final_merge {
            debug!(segments = starting, "forced merge already running");
            return Ok(None);
        }

        if max_segment_count == 1 && starting <= explicit && total_merge_bytes < max_merge_bytes {
            let mut spec = MergeSpecification::new();
            spec.add(self.one_merge(candidates.iter(), Some(max_segment_count)));
            debug!(segments = starting, "forced merge down to one segment");
            return Ok(Some(spec));
        }

        Ok(self.do_find_merges(
            candidates,
            Budget {
                max_merged_bytes: max_merge_bytes,
                merge_factor: explicit,
                allowed_seg_count: max_segment_count,
                allowed_del_count: 0,
                allowed_doc_count: i64::MAX,
                mode: MergeMode::ForcedMerge,
                max_merge_is_running: false,
                max_num_segments: Some(max_segment_count),
            },
        ))
    }

    fn find_forced_deletes_merges(
        &self,
        infos: &SegmentInfos,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        let merging = ctx.merging_segments();
        let pct = self.config.force_merge_deletes_pct_allowed;
        let mut eligible = self.sorted_by_size(infos, ctx)?;
        eligible.retain(|seg| !merging.contains(seg.name()) && seg.deletes_pct() > pct);

        Ok(self.do_find_merges(
            eligible,
            Budget {
                max_merged_bytes: self.config.max_merged_segment_bytes(),
                merge_factor: self.config.max_merge_at_once_explicit,
                allowed_seg_count: usize::MAX,
                allowed_del_count: 0,
                allowed_doc_count: i64::MAX,
                mode: MergeMode::ForcedDeletes,
                max_merge_is_running: false,
                max_num_segments: None,
            },
        ))
    }

    fn clone_box(&self) -> Box<dyn MergePolicy> {
        Box::new(self.clone())
    }
}
