use serde::{Deserialize, Serialize};
use sqsh_types::{
    read_le_u16, read_le_u32, read_le_u64, BlockSize, InodeRef, ParseError, SQUASHFS_MAGIC,
    SUPERBLOCK_SIZE, TABLE_ABSENT,
};

/// Superblock flag bits. Only informational for a reader: the per-block
/// framing headers and size words carry the authoritative compression
/// state.
pub mod flags {
    pub const INODES_UNCOMPRESSED: u16 = 0x0001;
    pub const DATA_UNCOMPRESSED: u16 = 0x0002;
    pub const FRAGMENTS_UNCOMPRESSED: u16 = 0x0008;
    pub const FRAGMENTS_UNUSED: u16 = 0x0010;
    pub const FRAGMENTS_ALWAYS: u16 = 0x0020;
    pub const DUPLICATES_REMOVED: u16 = 0x0040;
    pub const EXPORT_TABLE_PRESENT: u16 = 0x0080;
    pub const XATTRS_UNCOMPRESSED: u16 = 0x0100;
    pub const NO_XATTRS: u16 = 0x0200;
    pub const COMPRESSOR_OPTIONS: u16 = 0x0400;
    pub const ID_TABLE_UNCOMPRESSED: u16 = 0x0800;
}

/// The 96-byte header at offset 0 describing global parameters and table
/// locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: BlockSize,
    pub fragment_entry_count: u32,
    pub compression_id: u16,
    pub flags: u16,
    pub id_count: u16,
    pub root_inode_ref: InodeRef,
    pub bytes_used: u64,
    pub id_table_start: u64,
    pub xattr_id_table_start: Option<u64>,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub export_table_start: Option<u64>,
}

impl Superblock {
    /// Parse and validate a superblock region.
    ///
    /// Codec *availability* is deliberately not checked here, only that
    /// the id names one of the six known codecs. A build without the
    /// matching decoder fails at the first decode instead.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u32(region, 0)?;
        if magic != SQUASHFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: SQUASHFS_MAGIC,
                actual: magic,
            });
        }

        let version_major = read_le_u16(region, 28)?;
        let version_minor = read_le_u16(region, 30)?;
        if (version_major, version_minor) != (4, 0) {
            return Err(ParseError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        let block_size = BlockSize::new(read_le_u32(region, 12)?, read_le_u16(region, 22)?)?;

        let compression_id = read_le_u16(region, 20)?;
        if !(1..=6).contains(&compression_id) {
            return Err(ParseError::InvalidField {
                field: "compression_id",
                reason: "must be in 1..=6",
            });
        }

        let inode_table_start = read_le_u64(region, 64)?;
        let directory_table_start = read_le_u64(region, 72)?;
        if inode_table_start >= directory_table_start {
            return Err(ParseError::InvalidField {
                field: "inode_table_start",
                reason: "inode table must precede directory table",
            });
        }

        let xattr_id_table_start = match read_le_u64(region, 56)? {
            TABLE_ABSENT => None,
            start => Some(start),
        };
        let export_table_start = match read_le_u64(region, 88)? {
            TABLE_ABSENT => None,
            start => Some(start),
        };

        Ok(Self {
            inode_count: read_le_u32(region, 4)?,
            mod_time: read_le_u32(region, 8)?,
            block_size,
            fragment_entry_count: read_le_u32(region, 16)?,
            compression_id,
            flags: read_le_u16(region, 24)?,
            id_count: read_le_u16(region, 26)?,
            root_inode_ref: InodeRef(read_le_u64(region, 32)?),
            bytes_used: read_le_u64(region, 40)?,
            id_table_start: read_le_u64(region, 48)?,
            xattr_id_table_start,
            inode_table_start,
            directory_table_start,
            fragment_table_start: read_le_u64(region, 80)?,
            export_table_start,
        })
    }

    /// Exclusive upper bound on directory-table block offsets. The
    /// fragment table follows the directory table when fragments exist;
    /// otherwise the id table is the next region on disk.
    #[must_use]
    pub fn directory_table_end(&self) -> u64 {
        if self.fragment_entry_count > 0 {
            self.fragment_table_start
        } else {
            self.id_table_start
        }
    }

    #[must_use]
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}
