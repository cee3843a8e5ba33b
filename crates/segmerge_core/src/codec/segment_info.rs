//! Segment descriptor (`.si`) format.
//!
//! ```text
//! header("SegmentInfo", version, id = segment id, suffix = "")
//! version: 3 x i32
//! min version: marker byte (1 = present) [+ 3 x i32]
//! max_doc: i32
//! compound: byte (1 = yes, 0 = no)
//! size_in_bytes: i64
//! diagnostics: map of strings
//! attributes: map of strings
//! files: set of strings
//! footer
//! ```

use crate::codec::util::{as_corruption, check_footer, check_index_header, write_footer, write_index_header};
use crate::codec::SegmentInfoFormat;
use crate::error::{CoreError, CoreResult};
use crate::segment::names::{segment_file_name, SEGMENT_INFO_EXTENSION};
use crate::segment::SegmentInfo;
use crate::types::{Id, Version};
use segmerge_storage::{ChecksumIndexInput, DataInput, DataOutput, Directory, IndexOutput};

const CODEC_NAME: &str = "SegmentInfo";
const VERSION_START: i32 = 1;
const VERSION_CURRENT: i32 = VERSION_START;

/// The default `.si` format.
#[derive(Debug, Default, Clone, Copy)]
pub struct Segmerge10SegmentInfoFormat;

impl SegmentInfoFormat for Segmerge10SegmentInfoFormat {
    fn read(&self, dir: &dyn Directory, segment: &str, segment_id: &Id, codec: &str) -> CoreResult<SegmentInfo> {
        let file_name = segment_file_name(segment, "", SEGMENT_INFO_EXTENSION);
        let mut input = dir.open_checksum_input(&file_name)?;
        read_body(&mut input, segment, segment_id, codec).map_err(|e| as_corruption(e, &file_name))
    }

    fn write(&self, dir: &dyn Directory, info: &SegmentInfo) -> CoreResult<()> {
        let file_name = info.descriptor_file_name();
        let mut out = dir.create_output(&file_name)?;
        let written = match write_body(out.as_mut(), info) {
            Ok(()) => out.close().map_err(CoreError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            dir.delete_files_ignoring_errors(&[file_name.as_str()]);
            return Err(e);
        }
        Ok(())
    }
}

fn write_body(out: &mut dyn IndexOutput, info: &SegmentInfo) -> CoreResult<()> {
    write_index_header(out, CODEC_NAME, VERSION_CURRENT, info.id(), "")?;
    write_version(out, info.version())?;
    match info.min_version() {
        Some(min) => {
            out.write_byte(1)?;
            write_version(out, min)?;
        }
        None => out.write_byte(0)?,
    }
    out.write_i32(info.max_doc())?;
    out.write_byte(u8::from(info.is_compound_file()))?;
    let size = i64::try_from(info.size_in_bytes())
        .map_err(|_| CoreError::invalid_argument(format!("segment {} is too large", info.name())))?;
    out.write_i64(size)?;
    out.write_map_of_strings(info.diagnostics())?;
    out.write_map_of_strings(info.attributes())?;
    out.write_set_of_strings(info.files())?;
    write_footer(out)
}

fn read_body(input: &mut ChecksumIndexInput, segment: &str, segment_id: &Id, codec: &str) -> CoreResult<SegmentInfo> {
    let resource = input.name().to_string();
    check_index_header(input, CODEC_NAME, VERSION_START, VERSION_CURRENT, Some(segment_id), Some(""))?;

    let version = read_version(input)?;
    let min_version = match input.read_byte()? {
        0 => None,
        1 => Some(read_version(input)?),
        marker => {
            return Err(CoreError::corrupt(
                resource,
                format!("illegal min version marker: {marker}"),
            ))
        }
    };
    let max_doc = input.read_i32()?;
    if max_doc < 0 {
        return Err(CoreError::corrupt(resource, format!("invalid docCount: {max_doc}")));
    }
    let is_compound_file = match input.read_byte()? {
        0 => false,
        1 => true,
        flag => {
            return Err(CoreError::corrupt(resource, format!("invalid compound file flag: {flag}")))
        }
    };
    let size = input.read_i64()?;
    let size_in_bytes =
        u64::try_from(size).map_err(|_| CoreError::corrupt(&resource, format!("invalid size: {size}")))?;
    let diagnostics = input.read_map_of_strings()?;
    let attributes = input.read_map_of_strings()?;
    let files = input.read_set_of_strings()?;
    check_footer(input)?;

    let info = SegmentInfo::new(segment, max_doc, codec, *segment_id)
        .and_then(|info| info.with_files(files))
        .map_err(|e| CoreError::corrupt(&resource, e.to_string()))?;
    Ok(info
        .with_version(version)
        .with_min_version(min_version)
        .with_compound_file(is_compound_file)
        .with_size_in_bytes(size_in_bytes)
        .with_diagnostics(diagnostics)
        .with_attributes(attributes))
}

pub(crate) fn write_version(out: &mut dyn IndexOutput, version: Version) -> CoreResult<()> {
    out.write_i32(version.major)?;
    out.write_i32(version.minor)?;
    out.write_i32(version.bugfix)?;
    Ok(())
}

pub(crate) fn read_version(input: &mut ChecksumIndexInput) -> CoreResult<Version> {
    let major = input.read_i32()?;
    let minor = input.read_i32()?;
    let bugfix = input.read_i32()?;
    Ok(Version::new(major, minor, bugfix))
}
