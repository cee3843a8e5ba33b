//! Live-docs (`.liv`) format.
//!
//! ```text
//! header("LiveDocs", version, id = segment id, suffix = del gen in radix 36)
//! del_count: vint
//! footer
//! ```
//!
//! segmerge tracks deletions as counts; which documents are deleted is the
//! codec layer's business. The file records the count for the generation it
//! belongs to so that every generation referenced by a commit exists on disk.

use crate::codec::util::{as_corruption, check_footer, check_index_header, write_footer, write_index_header};
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentCommitInfo;
use crate::types::to_radix36;
use segmerge_storage::{DataInput, DataOutput, Directory};

const CODEC_NAME: &str = "LiveDocs";
const VERSION_START: i32 = 1;
const VERSION_CURRENT: i32 = VERSION_START;

/// Writes the live-docs file for `info`'s current delete generation.
///
/// # Errors
///
/// Returns `InvalidArgument` if `info` has no deletions, or the write error.
pub(crate) fn write_live_docs(dir: &dyn Directory, info: &SegmentCommitInfo) -> CoreResult<String> {
    let file_name = info
        .live_docs_file_name()
        .ok_or_else(|| CoreError::invalid_argument(format!("{} has no deletions", info.name())))?;
    let suffix = to_radix36(info.del_gen().unsigned_abs());

    let mut out = dir.create_output(&file_name)?;
    let written = (|| -> CoreResult<()> {
        write_index_header(out.as_mut(), CODEC_NAME, VERSION_CURRENT, info.info().id(), &suffix)?;
        out.write_vint(u32::try_from(info.del_count()).unwrap_or(0))?;
        write_footer(out.as_mut())
    })();
    let written = written.and_then(|()| out.close().map_err(CoreError::from));
    if let Err(e) = written {
        dir.delete_files_ignoring_errors(&[file_name.as_str()]);
        return Err(e);
    }
    Ok(file_name)
}

/// Reads the delete count recorded in `info`'s live-docs file.
///
/// # Errors
///
/// Returns `CorruptIndex` if the file is damaged or belongs to another
/// segment or generation.
pub(crate) fn read_live_docs_count(dir: &dyn Directory, info: &SegmentCommitInfo) -> CoreResult<i32> {
    let file_name = info
        .live_docs_file_name()
        .ok_or_else(|| CoreError::invalid_argument(format!("{} has no deletions", info.name())))?;
    let suffix = to_radix36(info.del_gen().unsigned_abs());
    let mut input = dir.open_checksum_input(&file_name)?;
    let read = (|| -> CoreResult<i32> {
        check_index_header(
            &mut input,
            CODEC_NAME,
            VERSION_START,
            VERSION_CURRENT,
            Some(info.info().id()),
            Some(&suffix),
        )?;
        let count = input.read_vint()?;
        check_footer(&mut input)?;
        i32::try_from(count).map_err(|_| CoreError::corrupt(&file_name, format!("invalid delete count {count}")))
    })();
    read.map_err(|e| as_corruption(e, &file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentInfo;
    use crate::types::random_id;
    use segmerge_storage::RamDirectory;
    use std::sync::Arc;

    fn with_deletes(count: i32) -> SegmentCommitInfo {
        let info = SegmentInfo::new("_3", 100, "Segmerge10", random_id()).unwrap();
        let mut sci = SegmentCommitInfo::new(Arc::new(info));
        sci.advance_deletes(count).unwrap();
        sci
    }

    #[test]
    fn write_then_read_count() {
        let dir = RamDirectory::new();
        let sci = with_deletes(7);
        let name = write_live_docs(&dir, &sci).unwrap();
        assert_eq!(name, "_3_1.liv");
        assert_eq!(read_live_docs_count(&dir, &sci).unwrap(), 7);
    }

    #[test]
    fn other_generation_is_rejected() {
        let dir = RamDirectory::new();
        let mut sci = with_deletes(7);
        write_live_docs(&dir, &sci).unwrap();
        sci.advance_deletes(9).unwrap();
        dir.rename("_3_1.liv", "_3_2.liv").unwrap();
        assert!(matches!(
            read_live_docs_count(&dir, &sci),
            Err(CoreError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn no_deletions_is_an_error() {
        let dir = RamDirectory::new();
        let info = SegmentInfo::new("_4", 10, "Segmerge10", random_id()).unwrap();
        let sci = SegmentCommitInfo::new(Arc::new(info));
        assert!(write_live_docs(&dir, &sci).is_err());
    }
}
