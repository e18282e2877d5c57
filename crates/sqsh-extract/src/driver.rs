use crate::report::ExtractReport;
use crate::sink::{EntryMeta, Sink, SpecialKind};
use sqsh_error::{Result, SqfsError, Warning};
use sqsh_image::{ByteDevice, DirRecord, SquashImage};
use sqsh_ondisk::{DirInode, FileInode, Inode, InodeHeader, InodeKind};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-run configuration.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Where the filesystem sink materializes the tree.
    pub output_root: PathBuf,
    /// When false, the sink ignores mode/ownership/xattr metadata.
    pub apply_metadata: bool,
    /// Convert per-entry decode failures into warnings and keep going
    /// with the next sibling instead of aborting.
    pub lenient: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./extracted"),
            apply_metadata: true,
            lenient: false,
        }
    }
}

/// Errors the lenient mode may downgrade: per-entry decode failures.
/// Corruption of the underlying byte stream stays fatal either way.
fn convertible_in_lenient_mode(err: &SqfsError) -> bool {
    matches!(
        err,
        SqfsError::InodeTypeUnknown { .. }
            | SqfsError::DirectoryMalformed { .. }
            | SqfsError::FileSizeMismatch { .. }
    )
}

/// Depth-first pre-order walk from the root inode, emitting events to a
/// sink. Sibling order is the directory's on-disk order; for siblings A
/// before B, every event of A's subtree precedes any event of B's.
pub struct Traversal<'a, D: ByteDevice> {
    image: &'a SquashImage<D>,
    lenient: bool,
    report: ExtractReport,
    fragments_seen: BTreeSet<u32>,
}

impl<'a, D: ByteDevice> Traversal<'a, D> {
    #[must_use]
    pub fn new(image: &'a SquashImage<D>, options: &ExtractOptions) -> Self {
        Self {
            image,
            lenient: options.lenient,
            report: ExtractReport::default(),
            fragments_seen: BTreeSet::new(),
        }
    }

    pub fn run(mut self, sink: &mut dyn Sink) -> Result<ExtractReport> {
        let Inode { header, kind } = self.image.inode(self.image.root_ref())?;
        let InodeKind::Dir(root) = kind else {
            return Err(SqfsError::DirectoryMalformed {
                detail: "root inode is not a directory".to_owned(),
            });
        };
        self.walk_dir(sink, &header, &root, Path::new("/"), 0)?;
        self.report.tail_fragments = self.fragments_seen.len() as u64;
        Ok(self.report)
    }

    fn skip_entry(&mut self, sink: &mut dyn Sink, path: &Path, err: &SqfsError) {
        let warning = Warning::EntrySkipped {
            path: path.display().to_string(),
            error: err.to_string(),
        };
        warn!(target: "sqsh::extract", %warning);
        sink.warning(&warning);
        self.report.warnings += 1;
    }

    fn walk_dir(
        &mut self,
        sink: &mut dyn Sink,
        header: &InodeHeader,
        dir: &DirInode,
        path: &Path,
        depth: u64,
    ) -> Result<()> {
        self.report.max_depth = self.report.max_depth.max(depth);
        let meta = self.entry_meta(sink, header, dir.xattr_index, path)?;
        sink.dir(path, &meta)?;
        self.report.dirs += 1;
        debug!(target: "sqsh::extract", path = %path.display(), "directory");

        for item in self.image.dir_walker(dir)? {
            match item {
                Ok(record) => {
                    if let Err(err) = self.process_entry(sink, path, &record, depth) {
                        if self.lenient && convertible_in_lenient_mode(&err) {
                            let child = path.join(OsStr::from_bytes(&record.name));
                            self.skip_entry(sink, &child, &err);
                        } else {
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    // The entry stream itself is broken; there is no next
                    // sibling to resynchronize on.
                    if self.lenient && convertible_in_lenient_mode(&err) {
                        self.skip_entry(sink, path, &err);
                        break;
                    }
                    return Err(err);
                }
            }
        }

        sink.dir_end(path)?;
        Ok(())
    }

    fn process_entry(
        &mut self,
        sink: &mut dyn Sink,
        parent: &Path,
        record: &DirRecord,
        depth: u64,
    ) -> Result<()> {
        let path = parent.join(OsStr::from_bytes(&record.name));
        let Inode { header, kind } = self.image.inode(record.inode_ref)?;

        match kind {
            InodeKind::Dir(dir) => self.walk_dir(sink, &header, &dir, &path, depth + 1),
            InodeKind::File(file) => self.stream_file(sink, &header, &file, &path),
            InodeKind::Symlink(link) => {
                let meta = self.entry_meta(sink, &header, link.xattr_index, &path)?;
                sink.symlink(&path, OsStr::from_bytes(&link.target), &meta)?;
                self.report.symlinks += 1;
                Ok(())
            }
            InodeKind::BlockDevice(dev) => self.emit_special(
                sink,
                &header,
                SpecialKind::BlockDevice,
                dev.rdev,
                dev.xattr_index,
                &path,
            ),
            InodeKind::CharDevice(dev) => self.emit_special(
                sink,
                &header,
                SpecialKind::CharDevice,
                dev.rdev,
                dev.xattr_index,
                &path,
            ),
            InodeKind::Fifo(ipc) => {
                self.emit_special(sink, &header, SpecialKind::Fifo, 0, ipc.xattr_index, &path)
            }
            InodeKind::Socket(ipc) => {
                self.emit_special(sink, &header, SpecialKind::Socket, 0, ipc.xattr_index, &path)
            }
        }
    }

    fn emit_special(
        &mut self,
        sink: &mut dyn Sink,
        header: &InodeHeader,
        kind: SpecialKind,
        rdev: u32,
        xattr_index: Option<u32>,
        path: &Path,
    ) -> Result<()> {
        let meta = self.entry_meta(sink, header, xattr_index, path)?;
        sink.special(path, kind, rdev, &meta)?;
        self.report.specials += 1;
        Ok(())
    }

    fn stream_file(
        &mut self,
        sink: &mut dyn Sink,
        header: &InodeHeader,
        file: &FileInode,
        path: &Path,
    ) -> Result<()> {
        let meta = self.entry_meta(sink, header, file.xattr_index, path)?;
        sink.file_begin(path, file.file_size, &meta)?;

        let mut streamed = 0_u64;
        let mut failure = None;
        for chunk in self.image.file_reader(file) {
            match chunk {
                Ok(data) => {
                    sink.file_chunk(&data)?;
                    streamed += data.len() as u64;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            if self.lenient && convertible_in_lenient_mode(&err) {
                // The warning precedes file_end: the sink is told the
                // file is short before it is closed, never silently.
                self.skip_entry(sink, path, &err);
                sink.file_end()?;
                return Ok(());
            }
            let _ = sink.file_end();
            return Err(err);
        }

        sink.file_end()?;
        self.report.files += 1;
        self.report.bytes_written += streamed;
        if streamed > 0 {
            self.report.files_nonempty += 1;
        }
        if let Some(fragment) = file.fragment {
            self.fragments_seen.insert(fragment.index);
        }
        Ok(())
    }

    fn entry_meta(
        &mut self,
        sink: &mut dyn Sink,
        header: &InodeHeader,
        xattr_index: Option<u32>,
        path: &Path,
    ) -> Result<EntryMeta> {
        let uid = self.image.resolve_id(header.uid_idx)?;
        let gid = self.image.resolve_id(header.gid_idx)?;
        let xattrs = match xattr_index {
            None => Vec::new(),
            Some(index) => match self.image.xattrs(index)? {
                Some(pairs) => pairs,
                None => {
                    let warning = Warning::XattrMissing {
                        path: path.display().to_string(),
                    };
                    warn!(target: "sqsh::extract", %warning);
                    sink.warning(&warning);
                    self.report.warnings += 1;
                    Vec::new()
                }
            },
        };
        Ok(EntryMeta {
            mode: header.mode,
            uid,
            gid,
            mtime: header.mtime,
            xattrs,
        })
    }
}
