//! Index file naming.
//!
//! ```text
//! segments_<gen36>            commit point
//! pending_segments_<gen36>    commit point being prepared
//! <segment>.si                segment descriptor
//! <segment>_<gen36>.liv       live-docs generation of a segment
//! <segment>.<ext>             any other segment file
//! write.lock                  writer lock
//! ```

use crate::types::{parse_radix36, to_radix36};

/// Base name of commit point files.
pub const SEGMENTS: &str = "segments";

/// Base name of commit point files that are being prepared.
pub const PENDING_SEGMENTS: &str = "pending_segments";

/// Extension of segment descriptor files.
pub const SEGMENT_INFO_EXTENSION: &str = "si";

/// Extension of live-docs files.
pub const LIVE_DOCS_EXTENSION: &str = "liv";

/// Name of the writer lock.
pub const WRITE_LOCK_NAME: &str = "write.lock";

/// Builds `<base>_<gen36>[.<ext>]`.
#[must_use]
pub fn file_name_from_generation(base: &str, ext: &str, generation: u64) -> String {
    let mut name = format!("{base}_{}", to_radix36(generation));
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Returns the commit point file name for a generation.
#[must_use]
pub fn segments_file_name(generation: u64) -> String {
    file_name_from_generation(SEGMENTS, "", generation)
}

/// Returns the pending commit point file name for a generation.
#[must_use]
pub fn pending_segments_file_name(generation: u64) -> String {
    file_name_from_generation(PENDING_SEGMENTS, "", generation)
}

/// Builds `<segment>[_<suffix>].<ext>`.
#[must_use]
pub fn segment_file_name(segment: &str, suffix: &str, ext: &str) -> String {
    match (suffix.is_empty(), ext.is_empty()) {
        (true, true) => segment.to_string(),
        (true, false) => format!("{segment}.{ext}"),
        (false, true) => format!("{segment}_{suffix}"),
        (false, false) => format!("{segment}_{suffix}.{ext}"),
    }
}

/// Returns the generation of a `segments_N` file name, or `None` if the name
/// is not a commit point.
#[must_use]
pub fn parse_segments_generation(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SEGMENTS)?
        .strip_prefix('_')
        .and_then(parse_radix36)
}

/// Returns the highest commit generation among `files`, if any.
#[must_use]
pub fn last_commit_generation<S: AsRef<str>>(files: &[S]) -> Option<u64> {
    files
        .iter()
        .filter_map(|f| parse_segments_generation(f.as_ref()))
        .max()
}

/// Returns the segment name a file belongs to: everything before the first
/// `.` or the second `_`.
#[must_use]
pub fn parse_segment_name(file_name: &str) -> &str {
    let end = file_name
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '.' || c == '_')
        .map_or(file_name.len(), |(i, _)| i);
    &file_name[..end]
}

/// Returns the counter value encoded in a segment name (`_<radix36>`).
#[must_use]
pub fn segment_number(segment: &str) -> Option<u64> {
    segment.strip_prefix('_').and_then(parse_radix36)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_file_names() {
        assert_eq!(segments_file_name(1), "segments_1");
        assert_eq!(segments_file_name(36), "segments_10");
        assert_eq!(pending_segments_file_name(35), "pending_segments_z");
        assert_eq!(file_name_from_generation("_3", "liv", 2), "_3_2.liv");
    }

    #[test]
    fn parse_generations() {
        assert_eq!(parse_segments_generation("segments_1"), Some(1));
        assert_eq!(parse_segments_generation("segments_10"), Some(36));
        assert_eq!(parse_segments_generation("segments"), None);
        assert_eq!(parse_segments_generation("segments.gen"), None);
        assert_eq!(parse_segments_generation("pending_segments_2"), None);
        assert_eq!(
            last_commit_generation(&["_0.si", "segments_2", "segments_a", "write.lock"]),
            Some(10)
        );
        assert_eq!(last_commit_generation::<&str>(&[]), None);
    }

    #[test]
    fn segment_names_from_files() {
        assert_eq!(parse_segment_name("_a.si"), "_a");
        assert_eq!(parse_segment_name("_a_3.liv"), "_a");
        assert_eq!(parse_segment_name("_a"), "_a");
        assert_eq!(segment_file_name("_a", "", "si"), "_a.si");
        assert_eq!(segment_file_name("_a", "1", "fnm"), "_a_1.fnm");
        assert_eq!(segment_number("_z"), Some(35));
        assert_eq!(segment_number("z"), None);
    }
}
