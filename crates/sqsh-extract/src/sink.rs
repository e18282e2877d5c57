use sqsh_error::{Result, Warning};
use sqsh_image::Xattr;
use std::ffi::OsStr;
use std::path::Path;

/// Ownership, mode, timestamp and attributes of one decoded entry, with
/// the id indices already resolved through the id table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    /// Modification time, unix seconds.
    pub mtime: u32,
    pub xattrs: Vec<Xattr>,
}

/// The non-regular, non-directory inode kinds a sink may choose to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl SpecialKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BlockDevice => "block device",
            Self::CharDevice => "char device",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
        }
    }
}

/// Receives extraction events in depth-first pre-order.
///
/// Paths are image-absolute (`/`, `/etc/passwd`); names that were raw
/// bytes on disk arrive unmodified inside the `Path`. For every
/// `file_begin` there is exactly one matching `file_end`, with all of
/// that file's chunks in between.
pub trait Sink {
    fn dir(&mut self, path: &Path, meta: &EntryMeta) -> Result<()>;

    /// Called when a directory's subtree is complete.
    fn dir_end(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn file_begin(&mut self, path: &Path, size: u64, meta: &EntryMeta) -> Result<()>;

    fn file_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    fn file_end(&mut self) -> Result<()>;

    fn symlink(&mut self, path: &Path, target: &OsStr, meta: &EntryMeta) -> Result<()>;

    fn special(&mut self, path: &Path, kind: SpecialKind, rdev: u32, meta: &EntryMeta)
        -> Result<()>;

    /// Non-fatal anomaly; traversal continues after this returns.
    fn warning(&mut self, _warning: &Warning) {}
}
