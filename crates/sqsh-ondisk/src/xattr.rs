use serde::{Deserialize, Serialize};
use sqsh_types::{
    read_le_u32, read_le_u64, stream, InodeRef, ParseError, XATTR_ID_ENTRY_SIZE,
};
use std::io::Read;

/// Fixed header at `xattr_id_table_start`: the absolute start of the
/// key/value store, the number of xattr id entries, and 4 unused bytes.
/// The pointer index of the id lookup table follows immediately.
pub const XATTR_ID_TABLE_HEADER_SIZE: u64 = 16;

/// Type bit marking an out-of-line value: the value field holds a u64
/// reference into the key/value store instead of the bytes themselves.
pub const XATTR_VALUE_OOL: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XattrIdTableHeader {
    pub kv_start: u64,
    pub count: u32,
}

impl XattrIdTableHeader {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            kv_start: read_le_u64(raw, 0)?,
            count: read_le_u32(raw, 8)?,
        })
    }
}

/// One xattr id lookup entry: where an inode's attribute list lives in
/// the key/value store, how many pairs it has, and its byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XattrIdEntry {
    /// Reference into the key/value store, relative to its start.
    pub xattr_ref: InodeRef,
    pub count: u32,
    pub size: u32,
}

impl XattrIdEntry {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.len() < XATTR_ID_ENTRY_SIZE {
            return Err(ParseError::InsufficientData {
                needed: XATTR_ID_ENTRY_SIZE,
                offset: 0,
                actual: raw.len(),
            });
        }
        Ok(Self {
            xattr_ref: InodeRef(read_le_u64(raw, 0)?),
            count: read_le_u32(raw, 8)?,
            size: read_le_u32(raw, 12)?,
        })
    }
}

/// The fixed prefix of one key/value pair; the name bytes follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XattrKeyHeader {
    pub entry_type: u16,
    pub name_size: u16,
}

impl XattrKeyHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self, ParseError> {
        Ok(Self {
            entry_type: stream::read_u16(reader, "xattr_type")?,
            name_size: stream::read_u16(reader, "xattr_name_size")?,
        })
    }

    #[must_use]
    pub fn namespace(&self) -> Option<XattrNamespace> {
        XattrNamespace::from_type(self.entry_type)
    }

    #[must_use]
    pub fn value_is_out_of_line(&self) -> bool {
        self.entry_type & XATTR_VALUE_OOL != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XattrNamespace {
    User,
    Trusted,
    Security,
}

impl XattrNamespace {
    #[must_use]
    pub fn from_type(entry_type: u16) -> Option<Self> {
        match entry_type & 0xFF {
            0 => Some(Self::User),
            1 => Some(Self::Trusted),
            2 => Some(Self::Security),
            _ => None,
        }
    }

    /// Key prefix including the trailing dot.
    #[must_use]
    pub fn prefix(self) -> &'static [u8] {
        match self {
            Self::User => b"user.",
            Self::Trusted => b"trusted.",
            Self::Security => b"security.",
        }
    }
}
