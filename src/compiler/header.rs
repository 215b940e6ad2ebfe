//! Container header shared by every compiled artifact.
//!
//! Layout (all integers little-endian):
//!
//! | offset | size | field       |
//! |--------|------|-------------|
//! | 0      | 4    | magic `SNUF`|
//! | 4      | 4    | file type   |
//! | 8      | 8    | payload size|

use super::{CompileError, FileType};

/// Magic constant at the start of every container (`b"SNUF"` on disk).
pub const MAGIC: u32 = 0x4655_4E53;

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Fixed prefix of a compiled artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Must equal [`MAGIC`]
    pub magic: u32,
    /// [`FileType::tag`] of the producing compiler
    pub file_type: u32,
    /// Uncompressed payload size in bytes
    pub size: u64,
}

impl FileHeader {
    /// Header for a payload of `size` bytes.
    pub fn new(file_type: FileType, size: u64) -> Self {
        Self { magic: MAGIC, file_type: file_type.tag(), size }
    }

    /// Encode the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        self.write_to(&mut bytes);
        bytes
    }

    /// Encode the header into the first [`HEADER_SIZE`] bytes of `out`.
    ///
    /// `out` must be at least `HEADER_SIZE` bytes long.
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.file_type.to_le_bytes());
        out[8..16].copy_from_slice(&self.size.to_le_bytes());
    }

    /// Decode and validate the header at the start of `data`.
    pub fn read(data: &[u8]) -> Result<Self, CompileError> {
        let bytes: &[u8; HEADER_SIZE] = data
            .get(..HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                CompileError::NotAContainer(format!(
                    "{} bytes is shorter than the {}-byte header",
                    data.len(),
                    HEADER_SIZE
                ))
            })?;

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(CompileError::NotAContainer(format!("bad magic {:#010x}", magic)));
        }

        Ok(Self {
            magic,
            file_type: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            size: u64::from_le_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ]),
        })
    }

    /// Decode the header and require it to carry `expected`.
    pub fn read_expecting(data: &[u8], expected: FileType) -> Result<Self, CompileError> {
        let header = Self::read(data)?;
        if header.file_type != expected.tag() {
            return Err(CompileError::WrongFileType { expected, found: header.file_type });
        }
        Ok(header)
    }

    /// The file type named by the header, if known.
    pub fn kind(&self) -> Option<FileType> {
        FileType::from_tag(self.file_type)
    }

    /// The payload of `container` as declared by this header.
    ///
    /// Trailing bytes beyond the declared size are ignored.
    pub fn payload<'a>(&self, container: &'a [u8]) -> Result<&'a [u8], CompileError> {
        let body = container.get(HEADER_SIZE..).unwrap_or(&[]);
        let declared = usize::try_from(self.size).ok().filter(|&n| n <= body.len());
        match declared {
            Some(n) => Ok(&body[..n]),
            None => Err(CompileError::Truncated { declared: self.size, actual: body.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_spells_snuf() {
        assert_eq!(&MAGIC.to_le_bytes(), b"SNUF");
    }

    #[test]
    fn test_header_layout() {
        let bytes = FileHeader::new(FileType::Shader, 0x0102).to_bytes();
        assert_eq!(&bytes[0..4], b"SNUF");
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &0x0102u64.to_le_bytes());
    }

    #[test]
    fn test_read_valid_header() {
        let mut data = FileHeader::new(FileType::Script, 3).to_bytes().to_vec();
        data.extend_from_slice(b"abc");

        let header = FileHeader::read(&data).unwrap();
        assert_eq!(header.kind(), Some(FileType::Script));
        assert_eq!(header.size, 3);
        assert_eq!(header.payload(&data).unwrap(), b"abc");
    }

    #[test]
    fn test_read_bad_magic() {
        let mut data = FileHeader::new(FileType::Script, 0).to_bytes();
        data[0] = b'X';
        assert!(matches!(FileHeader::read(&data), Err(CompileError::NotAContainer(_))));
    }

    #[test]
    fn test_read_short_input() {
        assert!(matches!(FileHeader::read(b"SNUF"), Err(CompileError::NotAContainer(_))));
        assert!(matches!(FileHeader::read(&[]), Err(CompileError::NotAContainer(_))));
    }

    #[test]
    fn test_read_expecting_wrong_type() {
        let data = FileHeader::new(FileType::Shader, 0).to_bytes();
        let err = FileHeader::read_expecting(&data, FileType::Script).unwrap_err();
        assert!(matches!(err, CompileError::WrongFileType { found: 2, .. }));
    }

    #[test]
    fn test_payload_truncated() {
        let mut data = FileHeader::new(FileType::Script, 10).to_bytes().to_vec();
        data.extend_from_slice(b"short");
        let header = FileHeader::read(&data).unwrap();
        assert!(matches!(
            header.payload(&data),
            Err(CompileError::Truncated { declared: 10, actual: 5 })
        ));
    }
}
