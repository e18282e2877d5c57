#![forbid(unsafe_code)]
//! Test support: an independent squashfs v4.0 packer producing real
//! images (metadata framing, chained tables, data blocks, fragments,
//! xattrs) for the decoder to consume, plus an event-recording sink.
//!
//! The packer favors simplicity over generality: each metadata stream
//! must fit one 8 KiB block when compression is on (uncompressed streams
//! may span blocks, which is enough to exercise boundary crossing), and
//! all tail fragments share a single fragment block.

mod builder;
mod sink;

pub use builder::{
    BuiltImage, DirSpec, FileSpec, ImageBuilder, NodeSpec, SymlinkSpec, XattrPairSpec,
};
pub use sink::{Event, MemorySink};
