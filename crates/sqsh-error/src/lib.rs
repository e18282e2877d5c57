#![forbid(unsafe_code)]
//! Error types for the sqsh workspace.
//!
//! Defines the fatal `SqfsError` and a `Result<T>` alias, plus the
//! non-fatal `Warning` kinds that the traversal driver forwards to the
//! sink instead of aborting.

use thiserror::Error;

/// Unified fatal error type for image decoding and extraction.
#[derive(Debug, Error)]
pub enum SqfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a squashfs image (magic {actual:#010x})")]
    BadMagic { actual: u32 },

    #[error("unsupported squashfs version {major}.{minor}, only 4.0 is supported")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("invalid superblock: {field} ({reason})")]
    SuperblockInvalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("compression codec {id} ({name}) is not available in this build")]
    UnsupportedCodec { id: u16, name: &'static str },

    #[error("image truncated at offset {offset}: {detail}")]
    Truncated { offset: u64, detail: String },

    #[error("invalid metadata block header at offset {offset}: stored length {stored_len}")]
    MetaHeaderInvalid { offset: u64, stored_len: u16 },

    #[error("decompressed block too large: {produced} bytes, limit {limit}")]
    BlockSizeOverflow { produced: usize, limit: usize },

    #[error("unknown inode type {raw}")]
    InodeTypeUnknown { raw: u16 },

    #[error("malformed directory: {detail}")]
    DirectoryMalformed { detail: String },

    #[error("file size mismatch: declared {declared} bytes, reassembled {actual}")]
    FileSizeMismatch { declared: u64, actual: u64 },

    #[error("{codec} stream is corrupt: {detail}")]
    CodecCorrupt {
        codec: &'static str,
        detail: String,
    },

    #[error("{table} table index {index} out of bounds (count {count})")]
    TableIndexOutOfBounds {
        table: &'static str,
        index: u64,
        count: u64,
    },

    #[error(
        "{table} table reference {block_offset:#x}:{byte_offset:#x} \
         falls outside the table region"
    )]
    RefOutOfBounds {
        table: &'static str,
        block_offset: u64,
        byte_offset: u16,
    },
}

/// Non-fatal anomalies. The driver reports these to the sink and keeps
/// going; the sink decides whether to surface them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("{path}: inode declares extended attributes but the image has no xattr store")]
    XattrMissing { path: String },

    #[error("{path}: sink refused to {op}: {detail}")]
    SinkRefused {
        path: String,
        op: &'static str,
        detail: String,
    },

    #[error("{path}: entry skipped: {error}")]
    EntrySkipped { path: String, error: String },
}

/// Result alias using `SqfsError`.
pub type Result<T> = std::result::Result<T, SqfsError>;
