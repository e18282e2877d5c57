use crate::driver::ExtractOptions;
use crate::sink::{EntryMeta, Sink, SpecialKind};
use sqsh_error::{Result, Warning};
use sqsh_ondisk::rdev_split;
use std::ffi::OsStr;
use std::fmt::Display;
use std::fs::{self, File, FileTimes, Permissions};
use std::io::{self, BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{chown, fchown, lchown, symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Materializes extraction events under an output root.
///
/// Creation failures are fatal (the run cannot mean anything without its
/// files); metadata application failures degrade to `SinkRefused`
/// warnings, recorded and queryable after the run.
pub struct FsSink {
    root: PathBuf,
    apply_metadata: bool,
    current_file: Option<OpenFile>,
    dir_stack: Vec<(PathBuf, EntryMeta)>,
    refusals: Vec<Warning>,
}

struct OpenFile {
    target: PathBuf,
    writer: BufWriter<File>,
    meta: EntryMeta,
}

impl FsSink {
    #[must_use]
    pub fn new(options: &ExtractOptions) -> Self {
        Self {
            root: options.output_root.clone(),
            apply_metadata: options.apply_metadata,
            current_file: None,
            dir_stack: Vec::new(),
            refusals: Vec::new(),
        }
    }

    /// Metadata operations the host refused during the run.
    #[must_use]
    pub fn refusals(&self) -> &[Warning] {
        &self.refusals
    }

    fn target(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(path),
        }
    }

    fn refuse(&mut self, path: &Path, op: &'static str, detail: impl Display) {
        let warning = Warning::SinkRefused {
            path: path.display().to_string(),
            op,
            detail: detail.to_string(),
        };
        debug!(target: "sqsh::extract", %warning);
        self.refusals.push(warning);
    }

    /// Duplicate names are legal in the format, so an entry may land on a
    /// path where an earlier sibling left a symlink; never write through
    /// such a link.
    fn clear_stale_symlink(target: &Path) -> io::Result<()> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(target),
            _ => Ok(()),
        }
    }

    fn apply_file_metadata(&mut self, file: &File, target: &Path, meta: &EntryMeta) {
        if !self.apply_metadata {
            return;
        }
        if let Err(err) = file.set_permissions(Permissions::from_mode(u32::from(meta.mode) & 0o7777))
        {
            self.refuse(target, "set mode", err);
        }
        if let Err(err) = fchown(file, Some(meta.uid), Some(meta.gid)) {
            self.refuse(target, "set ownership", err);
        }
        self.apply_xattrs(target, meta);
        let mtime = mtime_of(meta);
        if let Err(err) = file.set_times(FileTimes::new().set_accessed(mtime).set_modified(mtime)) {
            self.refuse(target, "set mtime", err);
        }
    }

    fn apply_path_metadata(&mut self, target: &Path, meta: &EntryMeta, set_times: bool) {
        if !self.apply_metadata {
            return;
        }
        if let Err(err) =
            fs::set_permissions(target, Permissions::from_mode(u32::from(meta.mode) & 0o7777))
        {
            self.refuse(target, "set mode", err);
        }
        if let Err(err) = chown(target, Some(meta.uid), Some(meta.gid)) {
            self.refuse(target, "set ownership", err);
        }
        self.apply_xattrs(target, meta);
        if !set_times {
            return;
        }
        match File::open(target) {
            Ok(handle) => {
                let mtime = mtime_of(meta);
                if let Err(err) =
                    handle.set_times(FileTimes::new().set_accessed(mtime).set_modified(mtime))
                {
                    self.refuse(target, "set mtime", err);
                }
            }
            Err(err) => self.refuse(target, "set mtime", err),
        }
    }

    fn apply_xattrs(&mut self, target: &Path, meta: &EntryMeta) {
        for pair in &meta.xattrs {
            if let Err(err) = xattr::set(target, OsStr::from_bytes(&pair.name), &pair.value) {
                self.refuse(target, "set xattr", err);
            }
        }
    }
}

fn mtime_of(meta: &EntryMeta) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(meta.mtime))
}

impl Sink for FsSink {
    fn dir(&mut self, path: &Path, meta: &EntryMeta) -> Result<()> {
        let target = self.target(path);
        Self::clear_stale_symlink(&target)?;
        fs::create_dir_all(&target)?;
        // Metadata is applied when the subtree closes, so writing the
        // children does not clobber the directory's mtime.
        self.dir_stack.push((target, meta.clone()));
        Ok(())
    }

    fn dir_end(&mut self, _path: &Path) -> Result<()> {
        if let Some((target, meta)) = self.dir_stack.pop() {
            self.apply_path_metadata(&target, &meta, true);
        }
        Ok(())
    }

    fn file_begin(&mut self, path: &Path, _size: u64, meta: &EntryMeta) -> Result<()> {
        let target = self.target(path);
        Self::clear_stale_symlink(&target)?;
        let file = File::create(&target)?;
        self.current_file = Some(OpenFile {
            target,
            writer: BufWriter::new(file),
            meta: meta.clone(),
        });
        Ok(())
    }

    fn file_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let Some(open) = self.current_file.as_mut() else {
            return Err(io::Error::other("file chunk outside file_begin/file_end").into());
        };
        open.writer.write_all(chunk)?;
        Ok(())
    }

    fn file_end(&mut self) -> Result<()> {
        let Some(open) = self.current_file.take() else {
            return Err(io::Error::other("file_end without file_begin").into());
        };
        let file = open
            .writer
            .into_inner()
            .map_err(|err| io::Error::other(err.to_string()))?;
        self.apply_file_metadata(&file, &open.target, &open.meta);
        Ok(())
    }

    fn symlink(&mut self, path: &Path, link_target: &OsStr, meta: &EntryMeta) -> Result<()> {
        let target = self.target(path);
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target)?;
        }
        symlink(link_target, &target)?;
        if self.apply_metadata {
            if let Err(err) = lchown(&target, Some(meta.uid), Some(meta.gid)) {
                self.refuse(&target, "set ownership", err);
            }
            if !meta.xattrs.is_empty() {
                self.refuse(&target, "set xattr", "not supported on symlinks");
            }
        }
        Ok(())
    }

    fn special(&mut self, path: &Path, kind: SpecialKind, rdev: u32, meta: &EntryMeta) -> Result<()> {
        let target = self.target(path);

        let flag = match kind {
            SpecialKind::BlockDevice => nix::sys::stat::SFlag::S_IFBLK,
            SpecialKind::CharDevice => nix::sys::stat::SFlag::S_IFCHR,
            SpecialKind::Fifo => nix::sys::stat::SFlag::S_IFIFO,
            SpecialKind::Socket => {
                self.refuse(&target, "create socket", "sockets cannot be materialized");
                return Ok(());
            }
        };

        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target)?;
        }
        let (major, minor) = rdev_split(rdev);
        let mode = nix::sys::stat::Mode::from_bits_truncate(u32::from(meta.mode) & 0o7777);
        let dev = nix::sys::stat::makedev(u64::from(major), u64::from(minor));
        if let Err(err) = nix::sys::stat::mknod(&target, flag, mode, dev) {
            self.refuse(&target, "create special file", err);
            return Ok(());
        }
        if self.apply_metadata {
            // mknod's permission argument is filtered by the umask.
            if let Err(err) =
                fs::set_permissions(&target, Permissions::from_mode(u32::from(meta.mode) & 0o7777))
            {
                self.refuse(&target, "set mode", err);
            }
            if let Err(err) = chown(&target, Some(meta.uid), Some(meta.gid)) {
                self.refuse(&target, "set ownership", err);
            }
        }
        Ok(())
    }
}
