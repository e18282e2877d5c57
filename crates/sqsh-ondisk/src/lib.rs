#![forbid(unsafe_code)]
//! On-disk format parsing for SquashFS v4.0 structures.
//!
//! Pure parsing crate: no I/O, no side effects. The superblock and the
//! fixed-size table entries parse from byte slices; inode records,
//! directory headers/entries and xattr records parse from `io::Read`
//! because they live in a chained metadata stream and may cross block
//! boundaries.

pub mod dir;
pub mod fragment;
pub mod inode;
pub mod superblock;
pub mod xattr;

pub use dir::{DirEntry, DirHeader, DIR_HEADER_SIZE, DIR_SIZE_BIAS};
pub use fragment::FragmentEntry;
pub use inode::{
    block_count, rdev_split, DeviceInode, DirInode, FileInode, FragmentRef, Inode, InodeHeader,
    InodeKind, InodeParseError, IpcInode, SymlinkInode,
};
pub use superblock::{flags, Superblock};
pub use xattr::{XattrIdEntry, XattrIdTableHeader, XattrKeyHeader, XattrNamespace};
