use crate::device::ByteDevice;
use crate::metablock::MetaCursor;
use sqsh_error::{Result, SqfsError};
use sqsh_ondisk::{DirEntry, DirHeader};
use sqsh_types::{FileKind, InodeRef};

/// One resolved directory child, in on-disk (sorted) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    /// Raw name bytes; never empty, never `.`/`..`, never contains `/`.
    pub name: Vec<u8>,
    pub inode_ref: InodeRef,
    pub inode_number: u32,
    /// Small-form type hint from the entry. `None` if out of range; the
    /// inode itself is authoritative either way.
    pub kind_hint: Option<FileKind>,
}

/// Streaming iterator over a directory's children.
///
/// Reads headers and their entry groups until the encoded length
/// (`file_size − 3`) is consumed; the cursor's byte limit makes any
/// overrun a hard `DirectoryMalformed`.
pub struct DirWalker<'a, D: ByteDevice> {
    cursor: Option<MetaCursor<'a, D>>,
    total: u64,
    header: Option<DirHeader>,
    remaining_in_group: u32,
    done: bool,
}

impl<'a, D: ByteDevice> DirWalker<'a, D> {
    pub(crate) fn new(cursor: Option<MetaCursor<'a, D>>, total: u64) -> Self {
        Self {
            cursor,
            total,
            header: None,
            remaining_in_group: 0,
            done: false,
        }
    }

    fn validate_name(name: &[u8]) -> std::result::Result<(), &'static str> {
        if name == b"." || name == b".." {
            return Err("directory entry named . or ..");
        }
        if name.contains(&b'/') || name.contains(&0) {
            return Err("directory entry name contains / or NUL");
        }
        Ok(())
    }
}

impl<D: ByteDevice> Iterator for DirWalker<'_, D> {
    type Item = Result<DirRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let cursor = self.cursor.as_mut()?;

        if self.remaining_in_group == 0 {
            if cursor.consumed() >= self.total {
                self.done = true;
                return None;
            }
            match DirHeader::parse(cursor) {
                Ok(header) => {
                    self.remaining_in_group = header.entry_count();
                    self.header = Some(header);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(cursor.fail_directory(err)));
                }
            }
        }

        let Some(header) = self.header else {
            self.done = true;
            return Some(Err(SqfsError::DirectoryMalformed {
                detail: "entry outside any header group".to_owned(),
            }));
        };

        match DirEntry::parse(cursor) {
            Ok(entry) => {
                self.remaining_in_group -= 1;
                if let Err(reason) = Self::validate_name(&entry.name) {
                    self.done = true;
                    return Some(Err(SqfsError::DirectoryMalformed {
                        detail: reason.to_owned(),
                    }));
                }
                Some(Ok(DirRecord {
                    inode_ref: entry.inode_ref(&header),
                    inode_number: entry.inode_number(&header),
                    kind_hint: entry.file_kind(),
                    name: entry.name,
                }))
            }
            Err(err) => {
                self.done = true;
                Some(Err(cursor.fail_directory(err)))
            }
        }
    }
}
