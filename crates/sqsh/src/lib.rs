#![forbid(unsafe_code)]
//! Public API facade for the sqsh workspace.
//!
//! Re-exports the pieces a consumer needs to open an image, walk it and
//! extract it: the image layer, the traversal driver and sinks, the
//! on-disk types, and the error/warning vocabulary.

pub use sqsh_codec::Codec;
pub use sqsh_error::{Result, SqfsError, Warning};
pub use sqsh_extract::{EntryMeta, ExtractOptions, ExtractReport, FsSink, Sink, SpecialKind, Traversal};
pub use sqsh_image::{
    ByteDevice, CacheStats, DirRecord, DirWalker, FileByteDevice, FileReader, MemoryByteDevice,
    SquashImage, Xattr,
};
pub use sqsh_ondisk::{
    DirInode, FileInode, FragmentRef, Inode, InodeHeader, InodeKind, Superblock, SymlinkInode,
};
pub use sqsh_types::{BlockSize, FileKind, InodeRef};
