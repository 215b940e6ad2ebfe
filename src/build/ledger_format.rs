//! On-disk encoding of the build ledger.
//!
//! All integers are little-endian:
//!
//! ```text
//! header : b"SNBG" | u32 version
//! record : u32 path_len | path (UTF-8) | u8 flags
//!          | i64 modified_secs | u32 modified_nanos
//!          | i64 built_secs | u32 built_nanos
//!          | u8 continuation (= 1), omitted after the last record
//! ```
//!
//! Flag bit 0 is `is_content`, bit 1 is `was_built`.

use chrono::{DateTime, Utc};

use super::ledger::BuildEntry;

/// Magic bytes at the start of a ledger file.
pub const LEDGER_MAGIC: [u8; 4] = *b"SNBG";

/// Current encoding version.
pub const LEDGER_VERSION: u32 = 1;

/// Longest path the encoding accepts, in bytes.
pub const MAX_PATH_BYTES: usize = 4096;

const FLAG_CONTENT: u8 = 0b01;
const FLAG_BUILT: u8 = 0b10;
const CONTINUATION: u8 = 1;

/// Why a ledger could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FormatError {
    #[error("not a build ledger")]
    BadMagic,
    #[error("unsupported ledger version {0} (expected {LEDGER_VERSION})")]
    UnsupportedVersion(u32),
    #[error("ledger truncated at byte {0}")]
    Truncated(usize),
    #[error("invalid record at byte {offset}: {reason}")]
    InvalidRecord { offset: usize, reason: String },
}

/// Encode `entries` into a complete ledger image.
///
/// Callers must reject paths longer than [`MAX_PATH_BYTES`] beforehand.
pub fn encode(entries: &[BuildEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 64);
    out.extend_from_slice(&LEDGER_MAGIC);
    out.extend_from_slice(&LEDGER_VERSION.to_le_bytes());

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.push(CONTINUATION);
        }
        let path = entry.path.as_bytes();
        out.extend_from_slice(&(path.len() as u32).to_le_bytes());
        out.extend_from_slice(path);

        let mut flags = 0;
        if entry.is_content {
            flags |= FLAG_CONTENT;
        }
        if entry.was_built {
            flags |= FLAG_BUILT;
        }
        out.push(flags);

        write_timestamp(&mut out, &entry.last_modified);
        write_timestamp(&mut out, &entry.last_built);
    }
    out
}

fn write_timestamp(out: &mut Vec<u8>, time: &DateTime<Utc>) {
    out.extend_from_slice(&time.timestamp().to_le_bytes());
    out.extend_from_slice(&time.timestamp_subsec_nanos().to_le_bytes());
}

/// Decode a ledger image.
pub fn decode(data: &[u8]) -> Result<Vec<BuildEntry>, FormatError> {
    let mut reader = Reader { data, pos: 0 };

    if reader.take(4)? != LEDGER_MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = reader.u32()?;
    if version != LEDGER_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let mut entries = Vec::new();
    while !reader.at_end() {
        if !entries.is_empty() {
            let offset = reader.pos;
            let marker = reader.u8()?;
            if marker != CONTINUATION {
                return Err(FormatError::InvalidRecord {
                    offset,
                    reason: format!("expected continuation byte, found {:#04x}", marker),
                });
            }
        }
        entries.push(reader.record()?);
    }
    Ok(entries)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        let end = end.ok_or(FormatError::Truncated(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        self.array().map(u32::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, FormatError> {
        self.array().map(i64::from_le_bytes)
    }

    fn timestamp(&mut self) -> Result<DateTime<Utc>, FormatError> {
        let offset = self.pos;
        let secs = self.i64()?;
        let nanos = self.u32()?;
        DateTime::from_timestamp(secs, nanos).ok_or_else(|| FormatError::InvalidRecord {
            offset,
            reason: format!("timestamp {}.{:09} out of range", secs, nanos),
        })
    }

    fn record(&mut self) -> Result<BuildEntry, FormatError> {
        let offset = self.pos;
        let len = self.u32()? as usize;
        if len == 0 || len > MAX_PATH_BYTES {
            return Err(FormatError::InvalidRecord {
                offset,
                reason: format!("path length {} outside 1..={}", len, MAX_PATH_BYTES),
            });
        }
        let path = std::str::from_utf8(self.take(len)?)
            .map_err(|e| FormatError::InvalidRecord { offset, reason: e.to_string() })?
            .to_string();

        let flags = self.u8()?;
        let last_modified = self.timestamp()?;
        let last_built = self.timestamp()?;

        Ok(BuildEntry {
            path,
            is_content: flags & FLAG_CONTENT != 0,
            was_built: flags & FLAG_BUILT != 0,
            last_modified,
            last_built,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(path: &str, built: bool) -> BuildEntry {
        BuildEntry {
            path: path.to_string(),
            is_content: true,
            was_built: built,
            last_modified: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            last_built: if built {
                Utc.timestamp_opt(1_700_000_100, 5).unwrap()
            } else {
                DateTime::<Utc>::default()
            },
        }
    }

    #[test]
    fn test_empty_ledger_is_header_only() {
        let bytes = encode(&[]);
        assert_eq!(bytes, b"SNBG\x01\x00\x00\x00");
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_record_layout() {
        let bytes = encode(&[entry("a.js", true)]);
        // header + len + path + flags + 2 * (secs + nanos)
        assert_eq!(bytes.len(), 8 + 4 + 4 + 1 + 24);
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(&bytes[12..16], b"a.js");
        assert_eq!(bytes[16], FLAG_CONTENT | FLAG_BUILT);
    }

    #[test]
    fn test_decode_preserves_entries() {
        let entries = vec![
            entry("scripts/main.js", true),
            entry("shaders/basic.vs", false),
            BuildEntry { is_content: false, ..entry("notes.txt", false) },
        ];
        let decoded = decode(&encode(&entries)).unwrap();
        assert_eq!(decoded, entries);

        // Continuation bytes only between records
        let two = encode(&entries[..2]);
        let one = encode(&entries[..1]);
        assert_eq!(two[one.len()], CONTINUATION);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        assert_eq!(decode(b"JUNK\x01\x00\x00\x00"), Err(FormatError::BadMagic));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        assert_eq!(decode(b"SNBG\x07\x00\x00\x00"), Err(FormatError::UnsupportedVersion(7)));
    }

    #[test]
    fn test_decode_rejects_truncated_record() {
        let bytes = encode(&[entry("scripts/main.js", true)]);
        for cut in [3, 10, 20, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_decode_rejects_bad_continuation() {
        let mut bytes = encode(&[entry("a.js", true), entry("b.js", true)]);
        let first_len = encode(&[entry("a.js", true)]).len();
        bytes[first_len] = 9;
        assert!(matches!(decode(&bytes), Err(FormatError::InvalidRecord { .. })));
    }

    #[test]
    fn test_decode_rejects_oversized_path_length() {
        let mut bytes = encode(&[]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(FormatError::InvalidRecord { .. })));
    }
}
