use serde::{Deserialize, Serialize};
use sqsh_types::{stream, FileKind, ParseError, FRAGMENT_NONE, XATTR_NONE};
use std::io::Read;
use thiserror::Error;

pub const INODE_HEADER_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum InodeParseError {
    #[error("unknown inode type {raw}")]
    UnknownType { raw: u16 },
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The 16-byte prefix shared by all ten inode variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeHeader {
    pub mode: u16,
    pub uid_idx: u16,
    pub gid_idx: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInode {
    /// Offset into the directory table of the metadata block holding this
    /// directory's entries.
    pub dir_block_start: u32,
    pub nlink: u32,
    /// Encoded directory length plus the historical 3-byte bias.
    pub file_size: u32,
    pub block_offset: u16,
    pub parent_inode: u32,
    pub xattr_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRef {
    pub index: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInode {
    /// Absolute offset of the first data block.
    pub blocks_start: u64,
    pub file_size: u64,
    pub nlink: u32,
    pub fragment: Option<FragmentRef>,
    pub xattr_index: Option<u32>,
    /// Raw size words, one per full data block, in on-disk order.
    pub block_sizes: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkInode {
    pub nlink: u32,
    pub target: Vec<u8>,
    pub xattr_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInode {
    pub nlink: u32,
    pub rdev: u32,
    pub xattr_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcInode {
    pub nlink: u32,
    pub xattr_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeKind {
    Dir(DirInode),
    File(FileInode),
    Symlink(SymlinkInode),
    BlockDevice(DeviceInode),
    CharDevice(DeviceInode),
    Fifo(IpcInode),
    Socket(IpcInode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub header: InodeHeader,
    pub kind: InodeKind,
}

/// Number of entries in a file inode's block-sizes array: files with a
/// tail fragment store only their full blocks, fragmentless files round
/// the final partial block up.
#[must_use]
pub fn block_count(file_size: u64, block_size: u32, has_fragment: bool) -> u64 {
    if has_fragment {
        file_size / u64::from(block_size)
    } else {
        file_size.div_ceil(u64::from(block_size))
    }
}

fn optional_xattr(raw: u32) -> Option<u32> {
    (raw != XATTR_NONE).then_some(raw)
}

impl Inode {
    /// Decode one inode record at the reader's position. Types 1..=7 are
    /// the basic variants, 8..=14 the extended ones, in the same order.
    pub fn parse<R: Read>(reader: &mut R, block_size: u32) -> Result<Self, InodeParseError> {
        let raw_type = stream::read_u16(reader, "inode_type")?;
        let header = InodeHeader {
            mode: stream::read_u16(reader, "mode")?,
            uid_idx: stream::read_u16(reader, "uid_idx")?,
            gid_idx: stream::read_u16(reader, "gid_idx")?,
            mtime: stream::read_u32(reader, "mtime")?,
            inode_number: stream::read_u32(reader, "inode_number")?,
        };

        let kind = match raw_type {
            1 => Self::parse_basic_dir(reader)?,
            8 => Self::parse_ext_dir(reader)?,
            2 => Self::parse_basic_file(reader, block_size)?,
            9 => Self::parse_ext_file(reader, block_size)?,
            3 | 10 => Self::parse_symlink(reader, raw_type == 10)?,
            4 | 11 => InodeKind::BlockDevice(Self::parse_device(reader, raw_type == 11)?),
            5 | 12 => InodeKind::CharDevice(Self::parse_device(reader, raw_type == 12)?),
            6 | 13 => InodeKind::Fifo(Self::parse_ipc(reader, raw_type == 13)?),
            7 | 14 => InodeKind::Socket(Self::parse_ipc(reader, raw_type == 14)?),
            raw => return Err(InodeParseError::UnknownType { raw }),
        };

        Ok(Self { header, kind })
    }

    fn parse_basic_dir<R: Read>(reader: &mut R) -> Result<InodeKind, ParseError> {
        let dir_block_start = stream::read_u32(reader, "dir_block_start")?;
        let nlink = stream::read_u32(reader, "nlink")?;
        let file_size = stream::read_u16(reader, "dir_file_size")?;
        let block_offset = stream::read_u16(reader, "dir_block_offset")?;
        let parent_inode = stream::read_u32(reader, "parent_inode")?;
        Ok(InodeKind::Dir(DirInode {
            dir_block_start,
            nlink,
            file_size: u32::from(file_size),
            block_offset,
            parent_inode,
            xattr_index: None,
        }))
    }

    fn parse_ext_dir<R: Read>(reader: &mut R) -> Result<InodeKind, ParseError> {
        let nlink = stream::read_u32(reader, "nlink")?;
        let file_size = stream::read_u32(reader, "dir_file_size")?;
        let dir_block_start = stream::read_u32(reader, "dir_block_start")?;
        let parent_inode = stream::read_u32(reader, "parent_inode")?;
        // The fast-lookup index records announced here are only an
        // optimization for random name lookups; a linear walk skips them.
        let _index_count = stream::read_u16(reader, "index_count")?;
        let block_offset = stream::read_u16(reader, "dir_block_offset")?;
        let xattr_index = optional_xattr(stream::read_u32(reader, "xattr_index")?);
        Ok(InodeKind::Dir(DirInode {
            dir_block_start,
            nlink,
            file_size,
            block_offset,
            parent_inode,
            xattr_index,
        }))
    }

    fn parse_basic_file<R: Read>(reader: &mut R, block_size: u32) -> Result<InodeKind, ParseError> {
        let blocks_start = stream::read_u32(reader, "blocks_start")?;
        let fragment_index = stream::read_u32(reader, "fragment_index")?;
        let fragment_offset = stream::read_u32(reader, "fragment_offset")?;
        let file_size = stream::read_u32(reader, "file_size")?;
        let fragment = (fragment_index != FRAGMENT_NONE).then_some(FragmentRef {
            index: fragment_index,
            offset: fragment_offset,
        });
        let block_sizes = Self::parse_block_sizes(
            reader,
            block_count(u64::from(file_size), block_size, fragment.is_some()),
        )?;
        Ok(InodeKind::File(FileInode {
            blocks_start: u64::from(blocks_start),
            file_size: u64::from(file_size),
            nlink: 1,
            fragment,
            xattr_index: None,
            block_sizes,
        }))
    }

    fn parse_ext_file<R: Read>(reader: &mut R, block_size: u32) -> Result<InodeKind, ParseError> {
        let blocks_start = stream::read_u64(reader, "blocks_start")?;
        let file_size = stream::read_u64(reader, "file_size")?;
        let _sparse_bytes = stream::read_u64(reader, "sparse_bytes")?;
        let nlink = stream::read_u32(reader, "nlink")?;
        let fragment_index = stream::read_u32(reader, "fragment_index")?;
        let fragment_offset = stream::read_u32(reader, "fragment_offset")?;
        let xattr_index = optional_xattr(stream::read_u32(reader, "xattr_index")?);
        let fragment = (fragment_index != FRAGMENT_NONE).then_some(FragmentRef {
            index: fragment_index,
            offset: fragment_offset,
        });
        let block_sizes =
            Self::parse_block_sizes(reader, block_count(file_size, block_size, fragment.is_some()))?;
        Ok(InodeKind::File(FileInode {
            blocks_start,
            file_size,
            nlink,
            fragment,
            xattr_index,
            block_sizes,
        }))
    }

    fn parse_block_sizes<R: Read>(reader: &mut R, count: u64) -> Result<Vec<u32>, ParseError> {
        // Capacity is clamped: a corrupt file_size must not translate into
        // an allocation before the stream runs dry.
        let mut sizes = Vec::with_capacity(usize::try_from(count).unwrap_or(0).min(1024));
        for _ in 0..count {
            sizes.push(stream::read_u32(reader, "block_sizes")?);
        }
        Ok(sizes)
    }

    fn parse_symlink<R: Read>(reader: &mut R, extended: bool) -> Result<InodeKind, ParseError> {
        let nlink = stream::read_u32(reader, "nlink")?;
        let target_size = stream::read_u32(reader, "target_size")?;
        if target_size > 65535 {
            return Err(ParseError::InvalidField {
                field: "target_size",
                reason: "symlink target longer than 65535 bytes",
            });
        }
        let target = stream::read_bytes(reader, target_size as usize, "target_path")?;
        let xattr_index = if extended {
            optional_xattr(stream::read_u32(reader, "xattr_index")?)
        } else {
            None
        };
        Ok(InodeKind::Symlink(SymlinkInode {
            nlink,
            target,
            xattr_index,
        }))
    }

    fn parse_device<R: Read>(reader: &mut R, extended: bool) -> Result<DeviceInode, ParseError> {
        let nlink = stream::read_u32(reader, "nlink")?;
        let rdev = stream::read_u32(reader, "rdev")?;
        let xattr_index = if extended {
            optional_xattr(stream::read_u32(reader, "xattr_index")?)
        } else {
            None
        };
        Ok(DeviceInode {
            nlink,
            rdev,
            xattr_index,
        })
    }

    fn parse_ipc<R: Read>(reader: &mut R, extended: bool) -> Result<IpcInode, ParseError> {
        let nlink = stream::read_u32(reader, "nlink")?;
        let xattr_index = if extended {
            optional_xattr(stream::read_u32(reader, "xattr_index")?)
        } else {
            None
        };
        Ok(IpcInode { nlink, xattr_index })
    }

    #[must_use]
    pub fn file_kind(&self) -> FileKind {
        match &self.kind {
            InodeKind::Dir(_) => FileKind::Dir,
            InodeKind::File(_) => FileKind::File,
            InodeKind::Symlink(_) => FileKind::Symlink,
            InodeKind::BlockDevice(_) => FileKind::BlockDevice,
            InodeKind::CharDevice(_) => FileKind::CharDevice,
            InodeKind::Fifo(_) => FileKind::Fifo,
            InodeKind::Socket(_) => FileKind::Socket,
        }
    }

    #[must_use]
    pub fn xattr_index(&self) -> Option<u32> {
        match &self.kind {
            InodeKind::Dir(d) => d.xattr_index,
            InodeKind::File(f) => f.xattr_index,
            InodeKind::Symlink(s) => s.xattr_index,
            InodeKind::BlockDevice(d) | InodeKind::CharDevice(d) => d.xattr_index,
            InodeKind::Fifo(i) | InodeKind::Socket(i) => i.xattr_index,
        }
    }
}

/// Split a device inode's `rdev` word into (major, minor).
#[must_use]
pub fn rdev_split(rdev: u32) -> (u32, u32) {
    let major = (rdev >> 8) & 0xFFF;
    let minor = (rdev & 0xFF) | ((rdev >> 12) & 0xF_FF00);
    (major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(raw_type: u16, mode: u16, inode_number: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&raw_type.to_le_bytes());
        out.extend_from_slice(&mode.to_le_bytes());
        out.extend_from_slice(&0_u16.to_le_bytes()); // uid_idx
        out.extend_from_slice(&1_u16.to_le_bytes()); // gid_idx
        out.extend_from_slice(&0x6000_0000_u32.to_le_bytes()); // mtime
        out.extend_from_slice(&inode_number.to_le_bytes());
        out
    }

    #[test]
    fn parses_a_basic_directory() {
        let mut raw = header_bytes(1, 0o755, 5);
        raw.extend_from_slice(&32_u32.to_le_bytes()); // dir_block_start
        raw.extend_from_slice(&2_u32.to_le_bytes()); // nlink
        raw.extend_from_slice(&27_u16.to_le_bytes()); // file_size
        raw.extend_from_slice(&4_u16.to_le_bytes()); // block_offset
        raw.extend_from_slice(&6_u32.to_le_bytes()); // parent

        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        assert_eq!(inode.header.mode, 0o755);
        assert_eq!(inode.header.gid_idx, 1);
        let InodeKind::Dir(dir) = &inode.kind else {
            panic!("expected a directory inode");
        };
        assert_eq!(dir.dir_block_start, 32);
        assert_eq!(dir.file_size, 27);
        assert_eq!(dir.block_offset, 4);
        assert_eq!(dir.xattr_index, None);
    }

    #[test]
    fn parses_a_basic_file_with_tail_fragment() {
        // size = block_size + 10 with a fragment: exactly one full block
        let mut raw = header_bytes(2, 0o644, 7);
        raw.extend_from_slice(&96_u32.to_le_bytes()); // blocks_start
        raw.extend_from_slice(&0_u32.to_le_bytes()); // fragment_index
        raw.extend_from_slice(&10_u32.to_le_bytes()); // fragment_offset
        raw.extend_from_slice(&4106_u32.to_le_bytes()); // file_size
        raw.extend_from_slice(&700_u32.to_le_bytes()); // one size word

        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        let InodeKind::File(file) = &inode.kind else {
            panic!("expected a file inode");
        };
        assert_eq!(file.file_size, 4106);
        assert_eq!(
            file.fragment,
            Some(FragmentRef {
                index: 0,
                offset: 10
            })
        );
        assert_eq!(file.block_sizes, vec![700]);
    }

    #[test]
    fn parses_a_fragmentless_file_rounding_up() {
        let mut raw = header_bytes(2, 0o644, 8);
        raw.extend_from_slice(&96_u32.to_le_bytes());
        raw.extend_from_slice(&FRAGMENT_NONE.to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());
        raw.extend_from_slice(&5000_u32.to_le_bytes()); // 2 blocks at 4096
        raw.extend_from_slice(&600_u32.to_le_bytes());
        raw.extend_from_slice(&300_u32.to_le_bytes());

        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        let InodeKind::File(file) = &inode.kind else {
            panic!("expected a file inode");
        };
        assert_eq!(file.fragment, None);
        assert_eq!(file.block_sizes, vec![600, 300]);
    }

    #[test]
    fn parses_an_extended_file() {
        let mut raw = header_bytes(9, 0o600, 9);
        raw.extend_from_slice(&1000_u64.to_le_bytes()); // blocks_start
        raw.extend_from_slice(&4096_u64.to_le_bytes()); // file_size
        raw.extend_from_slice(&0_u64.to_le_bytes()); // sparse
        raw.extend_from_slice(&2_u32.to_le_bytes()); // nlink
        raw.extend_from_slice(&FRAGMENT_NONE.to_le_bytes());
        raw.extend_from_slice(&0_u32.to_le_bytes());
        raw.extend_from_slice(&3_u32.to_le_bytes()); // xattr_index
        raw.extend_from_slice(&4096_u32.to_le_bytes());

        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        let InodeKind::File(file) = &inode.kind else {
            panic!("expected a file inode");
        };
        assert_eq!(file.blocks_start, 1000);
        assert_eq!(file.nlink, 2);
        assert_eq!(file.xattr_index, Some(3));
        assert_eq!(file.block_sizes.len(), 1);
    }

    #[test]
    fn parses_a_symlink() {
        let target = b"../etc/passwd";
        let mut raw = header_bytes(3, 0o777, 11);
        raw.extend_from_slice(&1_u32.to_le_bytes());
        raw.extend_from_slice(&(target.len() as u32).to_le_bytes());
        raw.extend_from_slice(target);

        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        let InodeKind::Symlink(link) = &inode.kind else {
            panic!("expected a symlink inode");
        };
        assert_eq!(link.target, target);
        assert_eq!(inode.file_kind(), FileKind::Symlink);
    }

    #[test]
    fn parses_devices_and_ipc_inodes() {
        let mut raw = header_bytes(5, 0o660, 12);
        raw.extend_from_slice(&1_u32.to_le_bytes());
        raw.extend_from_slice(&((5 << 8) | 1_u32).to_le_bytes());
        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        let InodeKind::CharDevice(dev) = &inode.kind else {
            panic!("expected a char device inode");
        };
        assert_eq!(rdev_split(dev.rdev), (5, 1));

        let mut raw = header_bytes(13, 0o644, 13);
        raw.extend_from_slice(&1_u32.to_le_bytes());
        raw.extend_from_slice(&7_u32.to_le_bytes()); // xattr_index
        let inode = Inode::parse(&mut raw.as_slice(), 4096).unwrap();
        assert_eq!(inode.xattr_index(), Some(7));
        assert_eq!(inode.file_kind(), FileKind::Fifo);
    }

    #[test]
    fn rejects_unknown_types() {
        let raw = header_bytes(15, 0, 1);
        assert!(matches!(
            Inode::parse(&mut raw.as_slice(), 4096),
            Err(InodeParseError::UnknownType { raw: 15 })
        ));
        let raw = header_bytes(0, 0, 1);
        assert!(matches!(
            Inode::parse(&mut raw.as_slice(), 4096),
            Err(InodeParseError::UnknownType { raw: 0 })
        ));
    }

    #[test]
    fn truncated_record_reports_the_missing_field() {
        let mut raw = header_bytes(2, 0o644, 7);
        raw.extend_from_slice(&96_u32.to_le_bytes());
        assert!(matches!(
            Inode::parse(&mut raw.as_slice(), 4096),
            Err(InodeParseError::Parse(ParseError::UnexpectedEof {
                field: "fragment_index"
            }))
        ));
    }

    #[test]
    fn block_count_matches_fragment_usage() {
        assert_eq!(block_count(4106, 4096, true), 1);
        assert_eq!(block_count(4106, 4096, false), 2);
        assert_eq!(block_count(8192, 4096, true), 2);
        assert_eq!(block_count(0, 4096, false), 0);
        assert_eq!(block_count(10, 4096, true), 0);
    }
}
