//! Decoder for raw `linux_dirent64` records.
//!
//! `getdents64` fills a buffer with variable-length records:
//!
//! ```text
//! offset  size  field
//!      0     8  d_ino     inode number (0 = tombstone)
//!      8     8  d_off     opaque cookie for the next record
//!     16     2  d_reclen  length of this whole record
//!     18     1  d_type    DT_* type tag
//!     19     -  d_name    NUL-terminated name, padded to 8-byte alignment
//! ```
//!
//! Integers are in native byte order. Every field is read with explicit
//! bounds checks; a malformed buffer produces a [`DirentError`] rather than
//! a panic.

use std::io;
use thiserror::Error;

use super::error::VfsError;
use super::types::FileType;

pub const DT_UNKNOWN: u8 = 0;
pub const DT_FIFO: u8 = 1;
pub const DT_CHR: u8 = 2;
pub const DT_DIR: u8 = 4;
pub const DT_BLK: u8 = 6;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;
pub const DT_SOCK: u8 = 12;
pub const DT_WHT: u8 = 14;

/// Size of the fixed part of a record, up to and including `d_type`.
pub const HEADER_LEN: usize = 19;

const RECLEN_OFFSET: usize = 16;
const TYPE_OFFSET: usize = 18;

/// Malformed record in a dirent buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirentError {
    #[error("dirent header truncated at offset {offset}: {remaining} bytes left")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("dirent at offset {offset} declares length {reclen} but only {remaining} bytes left")]
    RecordOverrun {
        offset: usize,
        reclen: usize,
        remaining: usize,
    },

    #[error("dirent at offset {offset} declares length {reclen}, shorter than its header")]
    RecordTooShort { offset: usize, reclen: usize },

    #[error("dirent name at offset {offset} is not NUL-terminated")]
    UnterminatedName { offset: usize },
}

impl From<DirentError> for VfsError {
    fn from(e: DirentError) -> Self {
        VfsError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// One decoded record, borrowing its name from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDirent<'a> {
    pub ino: u64,
    pub off: i64,
    pub reclen: u16,
    pub d_type: u8,
    pub name: &'a [u8],
}

impl RawDirent<'_> {
    /// Tombstones and the `.`/`..` self references.
    pub fn is_skippable(&self) -> bool {
        self.ino == 0 || self.name == b"." || self.name == b".."
    }

    /// Portable classification of `d_type`.
    pub fn kind(&self) -> DirentKind {
        DirentKind::from_d_type(self.d_type)
    }
}

/// What a `d_type` tag tells us about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    /// The filesystem filled in the type.
    Known(FileType),
    /// `DT_UNKNOWN`: the filesystem did not fill in the type; ask `lstat`.
    Unknown,
    /// Whiteouts and tags we do not recognise.
    Unsupported(u8),
}

impl DirentKind {
    pub fn from_d_type(d_type: u8) -> Self {
        match d_type {
            DT_REG => DirentKind::Known(FileType::File),
            DT_DIR => DirentKind::Known(FileType::Directory),
            DT_LNK => DirentKind::Known(FileType::Symlink),
            DT_BLK => DirentKind::Known(FileType::BlockDevice),
            DT_CHR => DirentKind::Known(FileType::CharDevice),
            DT_FIFO => DirentKind::Known(FileType::NamedPipe),
            DT_SOCK => DirentKind::Known(FileType::Socket),
            DT_UNKNOWN => DirentKind::Unknown,
            other => DirentKind::Unsupported(other),
        }
    }
}

/// Iterate over the records in `buf`.
///
/// The iterator stops after the first error.
pub fn parse(buf: &[u8]) -> DirentIter<'_> {
    DirentIter {
        buf,
        offset: 0,
        failed: false,
    }
}

/// Iterator returned by [`parse`].
#[derive(Debug)]
pub struct DirentIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> DirentIter<'a> {
    fn decode(&self) -> Result<RawDirent<'a>, DirentError> {
        let offset = self.offset;
        let rest = &self.buf[offset..];
        if rest.len() < HEADER_LEN {
            return Err(DirentError::TruncatedHeader {
                offset,
                remaining: rest.len(),
            });
        }

        let reclen = u16::from_ne_bytes([rest[RECLEN_OFFSET], rest[RECLEN_OFFSET + 1]]);
        let len = reclen as usize;
        if len < HEADER_LEN {
            return Err(DirentError::RecordTooShort {
                offset,
                reclen: len,
            });
        }
        if len > rest.len() {
            return Err(DirentError::RecordOverrun {
                offset,
                reclen: len,
                remaining: rest.len(),
            });
        }

        let record = &rest[..len];
        let name_field = &record[HEADER_LEN..];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .ok_or(DirentError::UnterminatedName { offset })?;

        Ok(RawDirent {
            ino: u64::from_ne_bytes(read_array(record, 0)),
            off: i64::from_ne_bytes(read_array(record, 8)),
            reclen,
            d_type: record[TYPE_OFFSET],
            name: &name_field[..name_len],
        })
    }
}

fn read_array(record: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&record[at..at + 8]);
    out
}

impl<'a> Iterator for DirentIter<'a> {
    type Item = Result<RawDirent<'a>, DirentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match self.decode() {
            Ok(record) => {
                self.offset += record.reclen as usize;
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::HEADER_LEN;

    /// Append one `linux_dirent64` record to `buf`, padded to 8 bytes.
    pub fn push_record(buf: &mut Vec<u8>, ino: u64, d_type: u8, name: &str) {
        let unpadded = HEADER_LEN + name.len() + 1;
        let reclen = unpadded.div_ceil(8) * 8;
        let next_off = (buf.len() + reclen) as i64;

        buf.extend_from_slice(&ino.to_ne_bytes());
        buf.extend_from_slice(&next_off.to_ne_bytes());
        buf.extend_from_slice(&(reclen as u16).to_ne_bytes());
        buf.push(d_type);
        buf.extend_from_slice(name.as_bytes());
        buf.resize(buf.len() + (reclen - HEADER_LEN - name.len()), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::testing::push_record;
    use super::*;

    fn names(buf: &[u8]) -> Vec<String> {
        parse(buf)
            .map(|r| r.unwrap())
            .filter(|r| !r.is_skippable())
            .map(|r| String::from_utf8_lossy(r.name).into_owned())
            .collect()
    }

    #[test]
    fn test_decodes_records_in_order() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_DIR, ".");
        push_record(&mut buf, 2, DT_DIR, "..");
        push_record(&mut buf, 10, DT_REG, "README");
        push_record(&mut buf, 11, DT_DIR, "src");
        push_record(&mut buf, 12, DT_DIR, ".git");

        assert_eq!(names(&buf), vec!["README", "src", ".git"]);

        let first = parse(&buf).nth(2).unwrap().unwrap();
        assert_eq!(first.ino, 10);
        assert_eq!(first.kind(), DirentKind::Known(FileType::File));
        assert_eq!(first.reclen as usize % 8, 0);
    }

    #[test]
    fn test_skips_tombstones() {
        let mut buf = Vec::new();
        push_record(&mut buf, 0, DT_REG, "deleted");
        push_record(&mut buf, 5, DT_REG, "kept");
        assert_eq!(names(&buf), vec!["kept"]);
    }

    #[test]
    fn test_type_classification() {
        assert_eq!(DirentKind::from_d_type(DT_UNKNOWN), DirentKind::Unknown);
        assert_eq!(
            DirentKind::from_d_type(DT_LNK),
            DirentKind::Known(FileType::Symlink)
        );
        assert_eq!(
            DirentKind::from_d_type(DT_CHR),
            DirentKind::Known(FileType::CharDevice)
        );
        assert_eq!(
            DirentKind::from_d_type(DT_WHT),
            DirentKind::Unsupported(DT_WHT)
        );
        assert_eq!(DirentKind::from_d_type(3), DirentKind::Unsupported(3));
    }

    #[test]
    fn test_truncated_header() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_REG, "a");
        let whole = buf.len();
        buf.extend_from_slice(&[0u8; 10]);

        let results: Vec<_> = parse(&buf).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1],
            Err(DirentError::TruncatedHeader {
                offset: whole,
                remaining: 10
            })
        );
    }

    #[test]
    fn test_record_overrun() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_REG, "name");
        let cut = buf.len() - 4;
        let err = parse(&buf[..cut]).next().unwrap().unwrap_err();
        assert!(matches!(err, DirentError::RecordOverrun { offset: 0, .. }));
    }

    #[test]
    fn test_record_too_short() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_REG, "name");
        buf[16..18].copy_from_slice(&8u16.to_ne_bytes());
        let err = parse(&buf).next().unwrap().unwrap_err();
        assert_eq!(err, DirentError::RecordTooShort { offset: 0, reclen: 8 });
    }

    #[test]
    fn test_unterminated_name() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_REG, "abcd");
        // "abcd" + NUL fits exactly in 24 bytes; overwrite the terminator.
        let len = buf.len();
        buf[len - 1] = b'x';
        let err = parse(&buf).next().unwrap().unwrap_err();
        assert_eq!(err, DirentError::UnterminatedName { offset: 0 });
    }

    #[test]
    fn test_iteration_stops_after_error() {
        let buf = [0xffu8; 5];
        let results: Vec<_> = parse(&buf).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
