use serde::{Deserialize, Serialize};
use sqsh_types::{stream, FileKind, InodeRef, ParseError};
use std::io::Read;

pub const DIR_HEADER_SIZE: u64 = 12;
pub const DIR_ENTRY_FIXED_SIZE: u64 = 8;
/// A directory inode's `file_size` exceeds the encoded byte length by
/// three; the bias is historical and carries no payload.
pub const DIR_SIZE_BIAS: u64 = 3;

/// Longest permitted entry name, in bytes.
pub const NAME_MAX: usize = 256;

/// One directory header, shared by up to 256 following entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirHeader {
    /// Stored as entries − 1; 0 means one entry.
    pub count: u32,
    /// Offset into the inode table of the metadata block holding the
    /// entries' inodes (the upper 48 bits of their references).
    pub start_block: u32,
    pub inode_number_base: u32,
}

impl DirHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, ParseError> {
        let count = stream::read_u32(reader, "dir_header_count")?;
        if count > 255 {
            return Err(ParseError::InvalidField {
                field: "dir_header_count",
                reason: "more than 256 entries per header",
            });
        }
        Ok(Self {
            count,
            start_block: stream::read_u32(reader, "dir_start_block")?,
            inode_number_base: stream::read_u32(reader, "dir_inode_base")?,
        })
    }

    #[must_use]
    pub fn entry_count(&self) -> u32 {
        self.count + 1
    }
}

/// One directory entry. Names are raw bytes, not required to be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Byte offset of the child's inode within its metadata block (the
    /// lower 16 bits of the child's reference).
    pub offset: u16,
    pub inode_number_delta: i16,
    pub entry_type: u16,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, ParseError> {
        let offset = stream::read_u16(reader, "dirent_offset")?;
        let inode_number_delta = stream::read_i16(reader, "dirent_inode_delta")?;
        let entry_type = stream::read_u16(reader, "dirent_type")?;
        let name_size = stream::read_u16(reader, "dirent_name_size")?;
        let name_len = usize::from(name_size) + 1;
        if name_len > NAME_MAX {
            return Err(ParseError::InvalidField {
                field: "dirent_name_size",
                reason: "name longer than 256 bytes",
            });
        }
        let name = stream::read_bytes(reader, name_len, "dirent_name")?;
        Ok(Self {
            offset,
            inode_number_delta,
            entry_type,
            name,
        })
    }

    /// Reassemble the child's inode reference from the header this entry
    /// was grouped under.
    #[must_use]
    pub fn inode_ref(&self, header: &DirHeader) -> InodeRef {
        InodeRef::new(u64::from(header.start_block), self.offset)
    }

    #[must_use]
    pub fn inode_number(&self, header: &DirHeader) -> u32 {
        header
            .inode_number_base
            .wrapping_add_signed(i32::from(self.inode_number_delta))
    }

    /// The small-form type hint. `None` for values outside 1..=7.
    #[must_use]
    pub fn file_kind(&self) -> Option<FileKind> {
        FileKind::from_dirent_type(self.entry_type)
    }

    /// Encoded size of this entry on disk.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        DIR_ENTRY_FIXED_SIZE + self.name.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_bytes(offset: u16, delta: i16, entry_type: u16, name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&delta.to_le_bytes());
        out.extend_from_slice(&entry_type.to_le_bytes());
        out.extend_from_slice(&((name.len() - 1) as u16).to_le_bytes());
        out.extend_from_slice(name);
        out
    }

    #[test]
    fn header_and_entries_round_trip() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1_u32.to_le_bytes()); // count − 1 = 1 → 2 entries
        raw.extend_from_slice(&64_u32.to_le_bytes()); // start_block
        raw.extend_from_slice(&100_u32.to_le_bytes()); // inode base
        raw.extend_from_slice(&entry_bytes(16, 0, 2, b"alpha"));
        raw.extend_from_slice(&entry_bytes(48, -2, 1, b"beta"));

        let mut cursor = raw.as_slice();
        let header = DirHeader::parse(&mut cursor).unwrap();
        assert_eq!(header.entry_count(), 2);

        let first = DirEntry::parse(&mut cursor).unwrap();
        assert_eq!(first.name, b"alpha");
        assert_eq!(first.inode_ref(&header), InodeRef::new(64, 16));
        assert_eq!(first.inode_number(&header), 100);
        assert_eq!(first.file_kind(), Some(FileKind::File));
        assert_eq!(first.encoded_len(), 13);

        let second = DirEntry::parse(&mut cursor).unwrap();
        assert_eq!(second.inode_number(&header), 98);
        assert_eq!(second.file_kind(), Some(FileKind::Dir));
    }

    #[test]
    fn rejects_oversized_headers() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&256_u32.to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());
        assert!(matches!(
            DirHeader::parse(&mut raw.as_slice()),
            Err(ParseError::InvalidField {
                field: "dir_header_count",
                ..
            })
        ));
    }

    #[test]
    fn truncated_name_is_an_error() {
        let mut raw = entry_bytes(0, 0, 2, b"abcdef");
        raw.truncate(raw.len() - 3);
        assert!(matches!(
            DirEntry::parse(&mut raw.as_slice()),
            Err(ParseError::UnexpectedEof {
                field: "dirent_name"
            })
        ));
    }
}
