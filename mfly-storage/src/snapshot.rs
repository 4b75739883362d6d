//! Boot snapshot decoding.
//!
//! The snapshot file is a length-prefixed, tag-driven binary format. It is read once at startup;
//! a missing file is an empty keyspace, while a malformed file is a startup failure.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mfly_common::error::{MflyError, MflyResult};

/// Fixed ASCII marker at the beginning of every snapshot file.
const SNAPSHOT_MAGIC: &[u8; 5] = b"REDIS";
/// Upper bound accepted for one length-prefixed payload (512 MiB).
const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

const TAG_AUX: u8 = 0xFA;
const TAG_RESIZE_HINT: u8 = 0xFB;
const TAG_EXPIRE_MS: u8 = 0xFC;
const TAG_EXPIRE_SECS: u8 = 0xFD;
const TAG_SELECT_DB: u8 = 0xFE;
const TAG_EOF: u8 = 0xFF;

/// String value type byte; the only record type this reader supports.
const VALUE_TYPE_STRING: u8 = 0;

/// A fixed valid-but-empty snapshot payload, served verbatim on full resync.
pub const EMPTY_SNAPSHOT: &[u8] = &[
    0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x31, 0x31, 0xFA, 0x09, 0x72, 0x65, 0x64, 0x69,
    0x73, 0x2D, 0x76, 0x65, 0x72, 0x05, 0x37, 0x2E, 0x32, 0x2E, 0x30, 0xFA, 0x0A, 0x72, 0x65,
    0x64, 0x69, 0x73, 0x2D, 0x62, 0x69, 0x74, 0x73, 0xC0, 0x40, 0xFA, 0x05, 0x63, 0x74, 0x69,
    0x6D, 0x65, 0xC2, 0x6D, 0x08, 0xBC, 0x65, 0xFA, 0x08, 0x75, 0x73, 0x65, 0x64, 0x2D, 0x6D,
    0x65, 0x6D, 0xC2, 0xB0, 0xC4, 0x10, 0x00, 0xFA, 0x08, 0x61, 0x6F, 0x66, 0x2D, 0x62, 0x61,
    0x73, 0x65, 0xC0, 0x00, 0xFF, 0xF0, 0x6E, 0x3B, 0xFE, 0xC0, 0xFF, 0x5A, 0xA2,
];

/// One decoded key/value record with its optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Record key.
    pub key: String,
    /// String payload; integer-encoded values decode to their decimal form.
    pub value: String,
    /// Absolute expiry instant when the record carries one.
    pub expire_at: Option<SystemTime>,
}

/// Decoded snapshot content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Records in file order.
    pub entries: Vec<SnapshotEntry>,
}

/// Reads and decodes the snapshot file at `path`.
///
/// # Errors
///
/// Returns `MflyError::Io` for filesystem failures other than a missing file, and
/// `MflyError::Snapshot` when the payload is malformed.
pub fn read_snapshot_file<P: AsRef<Path>>(path: P) -> MflyResult<Snapshot> {
    match std::fs::read(path) {
        Ok(payload) => decode_snapshot(&payload),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(error) => Err(MflyError::from_io(&error)),
    }
}

/// Decodes one snapshot payload.
///
/// # Errors
///
/// Returns `MflyError::Snapshot` when the payload is truncated or semantically invalid.
pub fn decode_snapshot(payload: &[u8]) -> MflyResult<Snapshot> {
    let mut cursor = SnapshotCursor::new(payload);

    let magic = cursor.read_slice(SNAPSHOT_MAGIC.len())?;
    if magic != SNAPSHOT_MAGIC {
        return Err(snapshot_error("invalid snapshot header"));
    }
    let version_raw = cursor.read_slice(4)?;
    let _version = std::str::from_utf8(version_raw)
        .ok()
        .and_then(|digits| digits.parse::<u32>().ok())
        .ok_or_else(|| snapshot_error("invalid snapshot version"))?;

    let mut entries = Vec::new();
    loop {
        let tag = cursor.read_u8()?;
        match tag {
            TAG_AUX => {
                let _key = read_string(&mut cursor)?;
                let _value = read_string(&mut cursor)?;
            }
            TAG_SELECT_DB => {
                // One opaque database-index byte.
                let _db = cursor.read_u8()?;
            }
            TAG_RESIZE_HINT => {
                let _hash_size = read_length(&mut cursor)?;
                let _expire_size = read_length(&mut cursor)?;
            }
            TAG_EXPIRE_MS => {
                let ms = cursor.read_u64_le()?;
                let expire_at = UNIX_EPOCH + Duration::from_millis(ms);
                entries.push(read_record(&mut cursor, Some(expire_at))?);
            }
            TAG_EXPIRE_SECS => {
                let secs = cursor.read_u32_le()?;
                let expire_at = UNIX_EPOCH + Duration::from_secs(u64::from(secs));
                entries.push(read_record(&mut cursor, Some(expire_at))?);
            }
            // Trailing checksum bytes after the terminator are not validated.
            TAG_EOF => break,
            value_type => {
                entries.push(read_typed_record(&mut cursor, value_type, None)?);
            }
        }
    }

    Ok(Snapshot { entries })
}

fn read_record(
    cursor: &mut SnapshotCursor<'_>,
    expire_at: Option<SystemTime>,
) -> MflyResult<SnapshotEntry> {
    let value_type = cursor.read_u8()?;
    read_typed_record(cursor, value_type, expire_at)
}

fn read_typed_record(
    cursor: &mut SnapshotCursor<'_>,
    value_type: u8,
    expire_at: Option<SystemTime>,
) -> MflyResult<SnapshotEntry> {
    if value_type != VALUE_TYPE_STRING {
        return Err(snapshot_error(format!(
            "unsupported value type 0x{value_type:02x}"
        )));
    }
    let key = read_string(cursor)?;
    let value = read_string(cursor)?;
    Ok(SnapshotEntry {
        key,
        value,
        expire_at,
    })
}

/// Reads one length-prefixed string, including the special integer encodings.
fn read_string(cursor: &mut SnapshotCursor<'_>) -> MflyResult<String> {
    let first = cursor.read_u8()?;
    match first >> 6 {
        0b00 => cursor.read_text(usize::from(first & 0x3F)),
        0b01 => {
            let low = cursor.read_u8()?;
            let len = (usize::from(first & 0x3F) << 8) | usize::from(low);
            cursor.read_text(len)
        }
        0b10 => {
            let len = cursor.read_u32_be()? as usize;
            if len > MAX_STRING_LEN {
                return Err(snapshot_error(format!(
                    "declared length {len} exceeds the 512 MiB limit"
                )));
            }
            cursor.read_text(len)
        }
        _ => match first & 0x3F {
            0 => Ok(i8::from_le_bytes([cursor.read_u8()?]).to_string()),
            1 => {
                let bytes = cursor.read_slice(2)?;
                Ok(i16::from_le_bytes([bytes[0], bytes[1]]).to_string())
            }
            2 => {
                let bytes = cursor.read_slice(4)?;
                Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string())
            }
            3 => Err(snapshot_error("LZF-compressed strings are not supported")),
            other => Err(snapshot_error(format!("unknown string encoding {other}"))),
        },
    }
}

/// Reads one plain length field; the special integer encodings are invalid here.
fn read_length(cursor: &mut SnapshotCursor<'_>) -> MflyResult<usize> {
    let first = cursor.read_u8()?;
    match first >> 6 {
        0b00 => Ok(usize::from(first & 0x3F)),
        0b01 => {
            let low = cursor.read_u8()?;
            Ok((usize::from(first & 0x3F) << 8) | usize::from(low))
        }
        0b10 => Ok(cursor.read_u32_be()? as usize),
        _ => Err(snapshot_error("unexpected special encoding in length field")),
    }
}

fn snapshot_error(message: impl Into<String>) -> MflyError {
    MflyError::Snapshot(message.into())
}

/// Stateful byte reader that tracks decoding position for robust error messages.
#[derive(Debug)]
struct SnapshotCursor<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> SnapshotCursor<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }

    fn read_u8(&mut self) -> MflyResult<u8> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u32_le(&mut self) -> MflyResult<u32> {
        let bytes = self.read_slice(4)?;
        let mut array = [0_u8; 4];
        array.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(array))
    }

    fn read_u32_be(&mut self) -> MflyResult<u32> {
        let bytes = self.read_slice(4)?;
        let mut array = [0_u8; 4];
        array.copy_from_slice(bytes);
        Ok(u32::from_be_bytes(array))
    }

    fn read_u64_le(&mut self) -> MflyResult<u64> {
        let bytes = self.read_slice(8)?;
        let mut array = [0_u8; 8];
        array.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(array))
    }

    fn read_text(&mut self, len: usize) -> MflyResult<String> {
        let bytes = self.read_slice(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| snapshot_error("string payload is not valid UTF-8"))
    }

    fn read_slice(&mut self, len: usize) -> MflyResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or_else(|| snapshot_error("offset overflow while decoding"))?;
        if end > self.payload.len() {
            return Err(snapshot_error(format!(
                "unexpected end of payload at byte offset {} while reading {len} bytes",
                self.offset
            )));
        }
        let bytes = &self.payload[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }
}
