//! Commit point (`segments_N`) serialization.
//!
//! ```text
//! header("segments", format, id = ledger id, suffix = gen36)
//! writer version: 3 x i32
//! index created major: vint
//! version: i64
//! counter: vlong
//! segment count: i32
//! [min segment version: 3 x i32]            when count > 0
//! per segment:
//!   name: string, id: 16 bytes, codec: string
//!   del gen: i64, del count: i32
//!   field infos gen: i64, doc values gen: i64
//!   soft del count: i32
//!   id marker: byte (1 + 16 bytes, or 0)
//!   field infos files: set of strings
//!   doc values updates: i32 count of (i32 field, set of strings)
//! user data: map of strings
//! footer
//! ```

use super::SegmentInfos;
use crate::codec::util::{as_corruption, check_footer, check_index_header, write_footer, write_index_header};
use crate::codec::{read_version, write_version, CodecRegistry};
use crate::error::{CoreError, CoreResult};
use crate::segment::names::{parse_segments_generation, segment_number, PENDING_SEGMENTS};
use crate::segment::SegmentCommitInfo;
use crate::types::{to_radix36, Id, Version, ID_LENGTH, MAX_DOCS};
use segmerge_storage::{ChecksumIndexInput, DataInput, DataOutput, Directory, IndexOutput};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const CODEC_NAME: &str = "segments";

/// Oldest commit point format this build reads.
pub const FORMAT_VERSION_START: i32 = 10;
/// Commit point format written by this build.
pub const FORMAT_VERSION_CURRENT: i32 = FORMAT_VERSION_START;

impl SegmentInfos {
    /// Serializes the ledger as generation `generation` to `out`, including
    /// the footer. The output is not closed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a segment lacks a minimum version on an
    /// index created on or after major version 7, or a write error.
    pub fn write_to(&self, out: &mut dyn IndexOutput, generation: u64) -> CoreResult<()> {
        write_index_header(out, CODEC_NAME, FORMAT_VERSION_CURRENT, &self.id, &to_radix36(generation))?;
        write_version(out, Version::LATEST)?;
        out.write_vint(created_major_to_u32(self.index_created_major)?)?;
        out.write_i64(self.version)?;
        out.write_vlong(self.counter)?;
        let count = i32::try_from(self.segments.len())
            .map_err(|_| CoreError::invalid_argument("too many segments"))?;
        out.write_i32(count)?;

        if let Some(min) = self.segments.iter().map(|s| s.info().version()).min() {
            write_version(out, min)?;
        }

        for sci in &self.segments {
            let info = sci.info();
            if self.index_created_major >= Version::MIN_SUPPORTED_MAJOR && info.min_version().is_none() {
                return Err(CoreError::invalid_argument(format!(
                    "segment {} has no min version but the index was created with major version {}",
                    info.name(),
                    self.index_created_major
                )));
            }
            out.write_string(info.name())?;
            out.write_bytes(info.id())?;
            out.write_string(info.codec())?;
            out.write_i64(sci.del_gen())?;
            out.write_i32(sci.del_count())?;
            out.write_i64(sci.field_infos_gen())?;
            out.write_i64(sci.doc_values_gen())?;
            out.write_i32(sci.soft_del_count())?;
            match sci.id() {
                Some(id) => {
                    out.write_byte(1)?;
                    out.write_bytes(id)?;
                }
                None => out.write_byte(0)?,
            }
            out.write_set_of_strings(sci.field_infos_files())?;
            let dv_updates = sci.doc_values_updates_files();
            let dv_count = i32::try_from(dv_updates.len())
                .map_err(|_| CoreError::invalid_argument("too many doc values update fields"))?;
            out.write_i32(dv_count)?;
            for (field, files) in dv_updates {
                out.write_i32(*field)?;
                out.write_set_of_strings(files)?;
            }
        }

        out.write_map_of_strings(&self.user_data)?;
        write_footer(out)
    }

    /// Reads the commit point `file_name`, resolving each segment's
    /// descriptor through `codecs`.
    ///
    /// # Errors
    ///
    /// - `CorruptIndex` if the file or a referenced descriptor is damaged
    /// - `IndexFormatTooOld` / `IndexFormatTooNew` for unsupported formats
    /// - storage errors if a file cannot be opened
    pub fn read_commit(dir: &dyn Directory, file_name: &str, codecs: &CodecRegistry) -> CoreResult<SegmentInfos> {
        let generation = commit_generation(file_name)?;
        let mut input = dir.open_checksum_input(file_name)?;
        read_body(dir, &mut input, generation, codecs).map_err(|e| as_corruption(e, file_name))
    }
}

fn commit_generation(file_name: &str) -> CoreResult<u64> {
    let name = file_name
        .strip_prefix(PENDING_SEGMENTS)
        .map_or(file_name.to_string(), |rest| format!("{CODEC_NAME}{rest}"));
    parse_segments_generation(&name)
        .ok_or_else(|| CoreError::invalid_argument(format!("not a commit point file: {file_name}")))
}

fn created_major_to_u32(major: i32) -> CoreResult<u32> {
    u32::try_from(major).map_err(|_| CoreError::invalid_argument(format!("invalid created major version {major}")))
}

fn read_body(
    dir: &dyn Directory,
    input: &mut ChecksumIndexInput,
    generation: u64,
    codecs: &CodecRegistry,
) -> CoreResult<SegmentInfos> {
    let resource = input.name().to_string();
    let header = check_index_header(
        input,
        CODEC_NAME,
        FORMAT_VERSION_START,
        FORMAT_VERSION_CURRENT,
        None,
        Some(&to_radix36(generation)),
    )?;

    let writer_version = read_version(input)?;
    let created_major = i32::try_from(input.read_vint()?)
        .map_err(|_| CoreError::corrupt(&resource, "invalid index created major version"))?;
    if created_major > writer_version.major {
        return Err(CoreError::corrupt(
            &resource,
            format!(
                "creation version [{created_major}.x] can't be greater than the version that wrote the segment infos: [{writer_version}]"
            ),
        ));
    }
    if created_major < Version::MIN_SUPPORTED_MAJOR {
        return Err(CoreError::too_old(
            &resource,
            format!(
                "index created with major version {created_major}; this build supports indexes created with version {} and later",
                Version::MIN_SUPPORTED_MAJOR
            ),
        ));
    }

    let mut infos = SegmentInfos::new(created_major);
    infos.id = header.id;
    infos.generation = generation;
    infos.last_generation = generation;
    infos.last_attempted_generation = generation;
    infos.writer_version = Some(writer_version);
    infos.version = input.read_i64()?;
    infos.counter = input.read_vlong()?;

    let num_segments = input.read_i32()?;
    if num_segments < 0 {
        return Err(CoreError::corrupt(&resource, format!("invalid segment count: {num_segments}")));
    }
    if num_segments > 0 {
        let min = read_version(input)?;
        if min.major < Version::MIN_SUPPORTED_MAJOR {
            return Err(CoreError::too_old(
                &resource,
                format!("this index contains a segment written with version {min}, which is no longer supported"),
            ));
        }
        infos.min_segment_version = Some(min);
    }

    let mut total_docs: i64 = 0;
    for _ in 0..num_segments {
        let sci = read_segment(dir, input, &infos, codecs, &resource)?;
        total_docs += i64::from(sci.info().max_doc());
        infos.segments.push(sci);
    }
    if total_docs > MAX_DOCS {
        return Err(CoreError::corrupt(
            &resource,
            format!("too many documents: an index cannot exceed {MAX_DOCS} but readers have total maxDoc={total_docs}"),
        ));
    }

    infos.user_data = input.read_map_of_strings()?;
    check_footer(input)?;
    Ok(infos)
}

fn read_segment(
    dir: &dyn Directory,
    input: &mut ChecksumIndexInput,
    infos: &SegmentInfos,
    codecs: &CodecRegistry,
    resource: &str,
) -> CoreResult<SegmentCommitInfo> {
    let name = input.read_string()?;
    let mut segment_id: Id = [0u8; ID_LENGTH];
    input.read_bytes(&mut segment_id)?;
    let codec_name = input.read_string()?;
    let codec = codecs.lookup(&codec_name, resource)?;
    let info = codec
        .segment_info_format()
        .read(dir, &name, &segment_id, &codec_name)?;

    let del_gen = input.read_i64()?;
    let del_count = input.read_i32()?;
    let field_infos_gen = input.read_i64()?;
    let doc_values_gen = input.read_i64()?;
    let soft_del_count = input.read_i32()?;
    let sci_id = match input.read_byte()? {
        0 => None,
        1 => {
            let mut id: Id = [0u8; ID_LENGTH];
            input.read_bytes(&mut id)?;
            Some(id)
        }
        marker => return Err(CoreError::corrupt(resource, format!("invalid SegmentCommitInfo ID marker: {marker}"))),
    };

    let mut sci = SegmentCommitInfo::from_parts(
        Arc::new(info),
        del_count,
        soft_del_count,
        del_gen,
        field_infos_gen,
        doc_values_gen,
        sci_id,
        resource,
    )?;
    sci.set_field_infos_files(input.read_set_of_strings()?);

    let num_dv_fields = input.read_i32()?;
    if num_dv_fields < 0 {
        return Err(CoreError::corrupt(
            resource,
            format!("invalid doc values update field count: {num_dv_fields}"),
        ));
    }
    let mut dv_updates: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
    for _ in 0..num_dv_fields {
        let field = input.read_i32()?;
        dv_updates.insert(field, input.read_set_of_strings()?);
    }
    sci.set_doc_values_updates_files(dv_updates);

    let seg_info = sci.info();
    if infos.index_created_major >= Version::MIN_SUPPORTED_MAJOR && seg_info.min_version().is_none() {
        return Err(CoreError::corrupt(
            resource,
            format!(
                "segment {name} has no min version but the index was created with major version {}",
                infos.index_created_major
            ),
        ));
    }
    if let Some(min) = infos.min_segment_version {
        if seg_info.version() < min {
            return Err(CoreError::corrupt(
                resource,
                format!(
                    "segments file recorded min segment version {min} but segment {name} has older version {}",
                    seg_info.version()
                ),
            ));
        }
    }
    match segment_number(&name) {
        Some(n) if n < infos.counter => {}
        _ => {
            return Err(CoreError::corrupt(
                resource,
                format!("illegal segment name {name}: counter is {}", infos.counter),
            ))
        }
    }
    Ok(sci)
}
