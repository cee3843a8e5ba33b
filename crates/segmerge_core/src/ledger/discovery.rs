//! Locating the newest commit point.

use super::SegmentInfos;
use crate::codec::CodecRegistry;
use crate::error::{CoreError, CoreResult};
use crate::segment::names::{last_commit_generation, segments_file_name};
use segmerge_storage::Directory;
use tracing::{debug, trace};

/// Runs `body` against the newest `segments_N` in `dir`.
///
/// A concurrent writer may publish a new commit, or delete an old one,
/// while this runs. The directory is listed twice and the listing retried
/// until two consecutive listings agree. If `body` fails, the listing is
/// repeated: when a newer commit has appeared it is tried next, otherwise
/// the first error is returned.
///
/// # Errors
///
/// - `IndexNotFound` if the directory contains no commit point
/// - the first error returned by `body` when no newer commit appears
pub fn find_segments_file<T, F>(dir: &dyn Directory, mut body: F) -> CoreResult<T>
where
    F: FnMut(&str) -> CoreResult<T>,
{
    let mut last_generation: Option<u64> = None;
    let mut first_error: Option<CoreError> = None;

    loop {
        let files = dir.list_all()?;
        let again = dir.list_all()?;
        if files != again {
            trace!("directory listing changed while locating commit; retrying");
            continue;
        }

        let Some(generation) = last_commit_generation(&files) else {
            return Err(CoreError::IndexNotFound { listing: files });
        };

        let progressed = match last_generation {
            Some(last) => generation > last,
            None => true,
        };
        if progressed {
            last_generation = Some(generation);
            let file_name = segments_file_name(generation);
            match body(&file_name) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(file = %file_name, error = %e, "failed to read commit point; retrying");
                    first_error.get_or_insert(e);
                }
            }
        } else {
            return Err(first_error.unwrap_or_else(|| {
                CoreError::corrupt(segments_file_name(generation), "commit point could not be read")
            }));
        }
    }
}

impl SegmentInfos {
    /// Reads the newest commit point in `dir`.
    ///
    /// # Errors
    ///
    /// See [`find_segments_file`] and [`SegmentInfos::read_commit`].
    pub fn read_latest_commit(dir: &dyn Directory, codecs: &CodecRegistry) -> CoreResult<SegmentInfos> {
        find_segments_file(dir, |file_name| SegmentInfos::read_commit(dir, file_name, codecs))
    }
}
