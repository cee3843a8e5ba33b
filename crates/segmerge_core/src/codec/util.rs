//! Index file header and footer utilities.
//!
//! Every index file written by segmerge starts with a header and ends with a
//! footer:
//!
//! ```text
//! header: magic(i32) codec(string) version(i32) id(16 bytes) suffix(string)
//! footer: !magic(i32) algorithm(i32 = 0) crc32(i64)
//! ```
//!
//! The CRC covers every byte of the file up to (but excluding) the checksum
//! itself.

use crate::error::{CoreError, CoreResult};
use crate::types::{id_to_hex, Id, ID_LENGTH};
use segmerge_storage::{ChecksumIndexInput, DataInput, DataOutput, Directory, IndexOutput, StorageError};

/// Magic number at the start of every index file.
pub const CODEC_MAGIC: i32 = 0x3fd7_6c17;

/// Magic number at the start of every footer.
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;

/// Length of the footer in bytes.
pub const FOOTER_LENGTH: u64 = 16;

/// The decoded fields of an index header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format version.
    pub version: i32,
    /// File identity.
    pub id: Id,
    /// Suffix (for commit files, the generation in radix 36).
    pub suffix: String,
}

/// Writes an index header.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_index_header(
    out: &mut dyn IndexOutput,
    codec: &str,
    version: i32,
    id: &Id,
    suffix: &str,
) -> CoreResult<()> {
    out.write_i32(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_i32(version)?;
    out.write_bytes(id)?;
    out.write_string(suffix)?;
    Ok(())
}

/// Reads and validates an index header.
///
/// `expected_id` and `expected_suffix` are checked when given.
///
/// # Errors
///
/// - `CorruptIndex` on a bad magic, codec name, id or suffix
/// - `IndexFormatTooOld` if the version is below `min_version`
/// - `IndexFormatTooNew` if the version is above `max_version`
pub fn check_index_header(
    input: &mut ChecksumIndexInput,
    codec: &str,
    min_version: i32,
    max_version: i32,
    expected_id: Option<&Id>,
    expected_suffix: Option<&str>,
) -> CoreResult<IndexHeader> {
    let resource = input.name().to_string();

    let magic = input.read_i32()?;
    if magic != CODEC_MAGIC {
        return Err(CoreError::corrupt(
            resource,
            format!("codec header mismatch: actual header={magic:#x} vs expected header={CODEC_MAGIC:#x}"),
        ));
    }

    let actual_codec = input.read_string()?;
    if actual_codec != codec {
        return Err(CoreError::corrupt(
            resource,
            format!("codec mismatch: actual codec={actual_codec} vs expected codec={codec}"),
        ));
    }

    let version = input.read_i32()?;
    if version < min_version {
        return Err(CoreError::too_old(
            resource,
            format!("format version {version} is below the minimum supported {min_version}"),
        ));
    }
    if version > max_version {
        return Err(CoreError::IndexFormatTooNew {
            resource,
            version,
            max: max_version,
        });
    }

    let mut id = [0u8; ID_LENGTH];
    input.read_bytes(&mut id)?;
    if let Some(expected) = expected_id {
        if &id != expected {
            return Err(CoreError::corrupt(
                resource,
                format!(
                    "file mismatch, expected id={}, got={}",
                    id_to_hex(expected),
                    id_to_hex(&id)
                ),
            ));
        }
    }

    let suffix = input.read_string()?;
    if let Some(expected) = expected_suffix {
        if suffix != expected {
            return Err(CoreError::corrupt(
                resource,
                format!("file mismatch, expected suffix={expected}, got={suffix}"),
            ));
        }
    }

    Ok(IndexHeader {
        version,
        id,
        suffix,
    })
}

/// Writes the footer. Must be the last thing written to the file.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_footer(out: &mut dyn IndexOutput) -> CoreResult<()> {
    out.write_i32(FOOTER_MAGIC)?;
    out.write_i32(0)?;
    let checksum = out.checksum();
    out.write_i64(i64::from(checksum))?;
    Ok(())
}

/// Validates the footer and returns the checksum.
///
/// The input must be positioned exactly at the start of the footer.
///
/// # Errors
///
/// Returns `CorruptIndex` if the footer is misplaced, malformed, or the
/// checksum does not match.
pub fn check_footer(input: &mut ChecksumIndexInput) -> CoreResult<u32> {
    let resource = input.name().to_string();
    let remaining = input.length().saturating_sub(input.file_pointer());
    if remaining != FOOTER_LENGTH {
        return Err(CoreError::corrupt(
            resource,
            format!(
                "misplaced codec footer (file truncated or extended?): remaining={remaining}, expected={FOOTER_LENGTH}"
            ),
        ));
    }

    let magic = input.read_i32()?;
    if magic != FOOTER_MAGIC {
        return Err(CoreError::corrupt(
            resource,
            format!("codec footer mismatch: actual footer={magic:#x} vs expected footer={FOOTER_MAGIC:#x}"),
        ));
    }

    let algorithm = input.read_i32()?;
    if algorithm != 0 {
        return Err(CoreError::corrupt(
            resource,
            format!("codec footer mismatch: unknown algorithm id {algorithm}"),
        ));
    }

    let actual = input.checksum();
    let expected = read_crc(input, &resource)?;
    if expected != actual {
        return Err(CoreError::corrupt(
            resource,
            format!("checksum failed (hardware problem?): expected={expected:#x} actual={actual:#x}"),
        ));
    }
    Ok(actual)
}

/// Recomputes the checksum of an entire file and compares it with its footer.
///
/// # Errors
///
/// - `ChecksumMismatch` if the stored checksum differs
/// - `CorruptIndex` if the file is too short or the footer is malformed
pub fn verify_checksum(dir: &dyn Directory, name: &str) -> CoreResult<u32> {
    let mut input = dir.open_checksum_input(name)?;
    let length = input.length();
    if length < FOOTER_LENGTH {
        return Err(CoreError::corrupt(
            name,
            format!("file is too short ({length} bytes) to contain a footer"),
        ));
    }

    let mut body = vec![0u8; 8192];
    let mut left = length - 8;
    while left > 0 {
        let n = usize::try_from(left.min(body.len() as u64)).unwrap_or(body.len());
        input.read_bytes(&mut body[..n])?;
        left -= n as u64;
    }
    let actual = input.checksum();
    let expected = read_crc(&mut input, name)?;
    if expected != actual {
        return Err(CoreError::ChecksumMismatch {
            resource: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

fn read_crc(input: &mut ChecksumIndexInput, resource: &str) -> CoreResult<u32> {
    let value = input.read_i64()?;
    u32::try_from(value).map_err(|_| {
        CoreError::corrupt(resource, format!("illegal CRC-32 checksum: {value:#x}"))
    })
}

/// Turns low-level decoding failures into `CorruptIndex` for `resource`.
///
/// Truncated files and malformed primitives surface from the storage layer
/// as `ReadPastEnd` or `Corrupted`; callers parsing index files report them
/// as index corruption instead.
pub(crate) fn as_corruption(err: CoreError, resource: &str) -> CoreError {
    match err {
        CoreError::Storage(StorageError::ReadPastEnd { .. }) => {
            CoreError::corrupt(resource, format!("unexpected end of file: {err}"))
        }
        CoreError::Storage(StorageError::Corrupted(message)) => CoreError::corrupt(resource, message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segmerge_storage::RamDirectory;

    const ID: Id = [7u8; ID_LENGTH];

    fn write_file(dir: &RamDirectory, name: &str, version: i32, body: &[u8]) {
        let mut out = dir.create_output(name).unwrap();
        write_index_header(out.as_mut(), "Test", version, &ID, "1a").unwrap();
        out.write_bytes(body).unwrap();
        write_footer(out.as_mut()).unwrap();
        out.close().unwrap();
    }

    fn read_file(dir: &RamDirectory, name: &str) -> CoreResult<(IndexHeader, Vec<u8>)> {
        let mut input = dir.open_checksum_input(name)?;
        let header = check_index_header(&mut input, "Test", 1, 2, Some(&ID), Some("1a"))?;
        let mut body = vec![0u8; 3];
        input.read_bytes(&mut body)?;
        check_footer(&mut input)?;
        Ok((header, body))
    }

    #[test]
    fn header_and_footer_validate() {
        let dir = RamDirectory::new();
        write_file(&dir, "f", 2, b"abc");

        let (header, body) = read_file(&dir, "f").unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.suffix, "1a");
        assert_eq!(body, b"abc");
        assert!(verify_checksum(&dir, "f").is_ok());
    }

    #[test]
    fn version_out_of_range() {
        let dir = RamDirectory::new();
        write_file(&dir, "old", 0, b"abc");
        write_file(&dir, "new", 3, b"abc");

        assert!(matches!(
            read_file(&dir, "old"),
            Err(CoreError::IndexFormatTooOld { .. })
        ));
        assert!(matches!(
            read_file(&dir, "new"),
            Err(CoreError::IndexFormatTooNew { version: 3, max: 2, .. })
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = RamDirectory::new();
        write_file(&dir, "f", 1, b"abc");
        let mut bytes = dir.file_bytes("f").unwrap();
        let body_pos = bytes.len() - FOOTER_LENGTH as usize - 2;
        bytes[body_pos] ^= 0xff;
        dir.put_file_bytes("f", bytes);

        assert!(matches!(read_file(&dir, "f"), Err(CoreError::CorruptIndex { .. })));
        assert!(matches!(
            verify_checksum(&dir, "f"),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn wrong_codec_name_is_corruption() {
        let dir = RamDirectory::new();
        write_file(&dir, "f", 1, b"abc");
        let mut input = dir.open_checksum_input("f").unwrap();
        let err = check_index_header(&mut input, "Other", 1, 2, None, None).unwrap_err();
        assert!(matches!(err, CoreError::CorruptIndex { .. }));
    }

    #[test]
    fn trailing_garbage_is_misplaced_footer() {
        let dir = RamDirectory::new();
        write_file(&dir, "f", 1, b"abc");
        let mut bytes = dir.file_bytes("f").unwrap();
        bytes.push(0);
        dir.put_file_bytes("f", bytes);
        assert!(matches!(read_file(&dir, "f"), Err(CoreError::CorruptIndex { .. })));
    }

    #[test]
    fn truncation_maps_to_corruption() {
        let dir = RamDirectory::new();
        dir.put_file_bytes("t", vec![0x17, 0x6c]);
        let err = read_file(&dir, "t").unwrap_err();
        let err = as_corruption(err, "t");
        assert!(matches!(err, CoreError::CorruptIndex { .. }));
    }
}
