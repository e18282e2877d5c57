use sqsh::{EntryMeta, Result, Sink, SpecialKind, Warning};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Everything a sink can observe, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dir {
        path: PathBuf,
        mode: u16,
        uid: u32,
        gid: u32,
        mtime: u32,
        xattrs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    DirEnd {
        path: PathBuf,
    },
    FileBegin {
        path: PathBuf,
        size: u64,
        mode: u16,
        uid: u32,
        gid: u32,
        mtime: u32,
        xattrs: Vec<(Vec<u8>, Vec<u8>)>,
    },
    FileChunk(Vec<u8>),
    FileEnd,
    Symlink {
        path: PathBuf,
        target: OsString,
        mode: u16,
    },
    Special {
        path: PathBuf,
        kind: &'static str,
        rdev: u32,
    },
    Warning(String),
}

fn xattr_pairs(meta: &EntryMeta) -> Vec<(Vec<u8>, Vec<u8>)> {
    meta.xattrs
        .iter()
        .map(|x| (x.name.clone(), x.value.clone()))
        .collect()
}

/// Records every event; assertions read `events` directly or use the
/// `files()` reconstruction helper.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble (path, contents) for every completed file, in order.
    #[must_use]
    pub fn files(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let mut out = Vec::new();
        let mut current: Option<(PathBuf, Vec<u8>)> = None;
        for event in &self.events {
            match event {
                Event::FileBegin { path, .. } => current = Some((path.clone(), Vec::new())),
                Event::FileChunk(chunk) => {
                    if let Some((_, data)) = current.as_mut() {
                        data.extend_from_slice(chunk);
                    }
                }
                Event::FileEnd => {
                    if let Some(done) = current.take() {
                        out.push(done);
                    }
                }
                _ => {}
            }
        }
        out
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Warning(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn dir(&mut self, path: &Path, meta: &EntryMeta) -> Result<()> {
        self.events.push(Event::Dir {
            path: path.to_path_buf(),
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            mtime: meta.mtime,
            xattrs: xattr_pairs(meta),
        });
        Ok(())
    }

    fn dir_end(&mut self, path: &Path) -> Result<()> {
        self.events.push(Event::DirEnd {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn file_begin(&mut self, path: &Path, size: u64, meta: &EntryMeta) -> Result<()> {
        self.events.push(Event::FileBegin {
            path: path.to_path_buf(),
            size,
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            mtime: meta.mtime,
            xattrs: xattr_pairs(meta),
        });
        Ok(())
    }

    fn file_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.events.push(Event::FileChunk(chunk.to_vec()));
        Ok(())
    }

    fn file_end(&mut self) -> Result<()> {
        self.events.push(Event::FileEnd);
        Ok(())
    }

    fn symlink(&mut self, path: &Path, target: &OsStr, meta: &EntryMeta) -> Result<()> {
        self.events.push(Event::Symlink {
            path: path.to_path_buf(),
            target: target.to_os_string(),
            mode: meta.mode,
        });
        Ok(())
    }

    fn special(
        &mut self,
        path: &Path,
        kind: SpecialKind,
        rdev: u32,
        _meta: &EntryMeta,
    ) -> Result<()> {
        self.events.push(Event::Special {
            path: path.to_path_buf(),
            kind: kind.name(),
            rdev,
        });
        Ok(())
    }

    fn warning(&mut self, warning: &Warning) {
        self.events.push(Event::Warning(warning.to_string()));
    }
}
