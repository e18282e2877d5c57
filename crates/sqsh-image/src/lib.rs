#![forbid(unsafe_code)]
//! Image access layer: positioned reads, the metadata block chain with
//! its memoized cache, the indexed auxiliary tables, inode resolution,
//! directory walking and file reassembly.
//!
//! `SquashImage` is the facade. It owns the open device, the parsed
//! superblock and the caches; every reader below it borrows the image
//! and issues positioned reads, so no cursor state is shared between
//! operations.

mod device;
mod dir;
mod file;
mod metablock;
mod tables;

pub use device::{ByteDevice, FileByteDevice, MemoryByteDevice};
pub use dir::{DirRecord, DirWalker};
pub use file::FileReader;
pub use metablock::MetaCursor;

use metablock::MetaBlock;
use parking_lot::Mutex;
use sqsh_codec::Codec;
use sqsh_error::{Result, SqfsError};
use sqsh_ondisk::{DirInode, FileInode, Inode, InodeParseError, Superblock, XattrKeyHeader};
use sqsh_ondisk::{FragmentEntry, DIR_SIZE_BIAS};
use sqsh_types::{
    stream, InodeRef, ParseError, METADATA_BLOCK_SIZE, METADATA_SIZE_MASK, METADATA_UNCOMPRESSED,
    SUPERBLOCK_SIZE,
};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// One extended attribute. The name carries its namespace prefix
/// (`user.`, `trusted.`, `security.`); both halves are raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xattr {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

/// Hit/miss counters of the most-recent fragment block cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

enum XattrState {
    Unloaded,
    Absent,
    Loaded(Arc<tables::XattrDirectory>),
}

/// An open SquashFS v4.0 image.
pub struct SquashImage<D: ByteDevice = FileByteDevice> {
    device: D,
    superblock: Superblock,
    codec: Codec,
    meta_cache: Mutex<HashMap<u64, Arc<MetaBlock>>>,
    ids: Mutex<Option<Arc<Vec<u32>>>>,
    fragments: Mutex<Option<Arc<Vec<FragmentEntry>>>>,
    xattrs: Mutex<XattrState>,
    fragment_data: Mutex<Option<(u32, Arc<Vec<u8>>)>>,
    fragment_hits: AtomicU64,
    fragment_misses: AtomicU64,
}

impl SquashImage<FileByteDevice> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_device(FileByteDevice::open(path)?)
    }
}

impl SquashImage<MemoryByteDevice> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_device(MemoryByteDevice::new(bytes))
    }
}

impl<D: ByteDevice> SquashImage<D> {
    /// Parse and validate the superblock, and bind the image's codec.
    /// The codec's availability is checked at first decode, not here.
    pub fn from_device(device: D) -> Result<Self> {
        let mut raw = [0_u8; SUPERBLOCK_SIZE];
        device.read_exact_at(0, &mut raw)?;
        let superblock = Superblock::parse(&raw).map_err(map_superblock_error)?;

        if superblock.bytes_used > device.len_bytes() {
            return Err(SqfsError::Truncated {
                offset: device.len_bytes(),
                detail: format!(
                    "superblock claims {} bytes used, image has {}",
                    superblock.bytes_used,
                    device.len_bytes()
                ),
            });
        }

        let codec = Codec::from_id(superblock.compression_id).ok_or(
            SqfsError::SuperblockInvalid {
                field: "compression_id",
                reason: "unknown codec id",
            },
        )?;

        info!(
            target: "sqsh::image",
            block_size = superblock.block_size.get(),
            codec = codec.name(),
            inodes = superblock.inode_count,
            fragments = superblock.fragment_entry_count,
            "image opened"
        );

        Ok(Self {
            device,
            superblock,
            codec,
            meta_cache: Mutex::new(HashMap::new()),
            ids: Mutex::new(None),
            fragments: Mutex::new(None),
            xattrs: Mutex::new(XattrState::Unloaded),
            fragment_data: Mutex::new(None),
            fragment_hits: AtomicU64::new(0),
            fragment_misses: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn codec(&self) -> Codec {
        self.codec
    }

    #[must_use]
    pub fn root_ref(&self) -> InodeRef {
        self.superblock.root_inode_ref
    }

    #[must_use]
    pub fn fragment_cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.fragment_hits.load(Ordering::Relaxed),
            misses: self.fragment_misses.load(Ordering::Relaxed),
        }
    }

    // ── Positioned reads, bounded by bytes_used ─────────────────────────

    pub(crate) fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| SqfsError::Truncated {
                offset,
                detail: "read range overflows u64".to_owned(),
            })?;
        if end > self.superblock.bytes_used {
            return Err(SqfsError::Truncated {
                offset,
                detail: format!(
                    "need {} bytes, image uses {}",
                    buf.len(),
                    self.superblock.bytes_used
                ),
            });
        }
        self.device.read_exact_at(offset, buf)
    }

    pub(crate) fn read_u16_at(&self, offset: u64) -> Result<u16> {
        let mut raw = [0_u8; 2];
        self.read_exact_at(offset, &mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    pub(crate) fn read_u64_at(&self, offset: u64) -> Result<u64> {
        let mut raw = [0_u8; 8];
        self.read_exact_at(offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    // ── Metadata blocks ─────────────────────────────────────────────────

    /// Decode the metadata block at an absolute offset, memoizing the
    /// result. The memo table doubles as the offset index that makes
    /// inode reference resolution O(1) after the first visit.
    pub(crate) fn metadata_block(&self, offset: u64) -> Result<Arc<MetaBlock>> {
        if let Some(block) = self.meta_cache.lock().get(&offset) {
            return Ok(Arc::clone(block));
        }

        let header = self.read_u16_at(offset)?;
        let stored_len = header & METADATA_SIZE_MASK;
        let uncompressed = header & METADATA_UNCOMPRESSED != 0;
        if stored_len == 0 || usize::from(stored_len) > METADATA_BLOCK_SIZE {
            return Err(SqfsError::MetaHeaderInvalid { offset, stored_len });
        }

        let mut payload = vec![0_u8; usize::from(stored_len)];
        self.read_exact_at(offset + 2, &mut payload)?;
        let data = if uncompressed {
            payload
        } else {
            self.codec.decompress(&payload, METADATA_BLOCK_SIZE)?
        };
        trace!(
            target: "sqsh::image",
            offset,
            stored_len,
            uncompressed,
            out_len = data.len(),
            "metadata block decoded"
        );

        let block = Arc::new(MetaBlock {
            data,
            next_offset: offset + 2 + u64::from(stored_len),
        });
        self.meta_cache.lock().insert(offset, Arc::clone(&block));
        Ok(block)
    }

    /// Open a cursor into a metadata-backed table at a (block, byte)
    /// reference, verifying the block lies inside the table's region.
    pub(crate) fn meta_cursor(
        &self,
        table: &'static str,
        table_start: u64,
        block_offset: u64,
        byte_offset: u16,
        table_end: u64,
        limit: u64,
    ) -> Result<MetaCursor<'_, D>> {
        let out_of_bounds = || SqfsError::RefOutOfBounds {
            table,
            block_offset,
            byte_offset,
        };
        let start = table_start
            .checked_add(block_offset)
            .filter(|abs| *abs < table_end)
            .ok_or_else(out_of_bounds)?;
        let block = self.metadata_block(start)?;
        if usize::from(byte_offset) > block.data.len() {
            return Err(out_of_bounds());
        }
        Ok(MetaCursor::new(
            self,
            block,
            start,
            usize::from(byte_offset),
            limit,
            table_end,
        ))
    }

    // ── Inodes ──────────────────────────────────────────────────────────

    /// Resolve an inode reference. The containing block must lie within
    /// [inode_table_start, directory_table_start).
    pub fn inode(&self, reference: InodeRef) -> Result<Inode> {
        let sb = &self.superblock;
        let mut cursor = self.meta_cursor(
            "inode",
            sb.inode_table_start,
            reference.block_offset(),
            reference.byte_offset(),
            sb.directory_table_start,
            u64::MAX,
        )?;
        Inode::parse(&mut cursor, sb.block_size.get()).map_err(|err| match err {
            InodeParseError::UnknownType { raw } => SqfsError::InodeTypeUnknown { raw },
            InodeParseError::Parse(parse) => cursor.fail_truncated(parse),
        })
    }

    // ── Directories ─────────────────────────────────────────────────────

    pub fn dir_walker(&self, dir: &DirInode) -> Result<DirWalker<'_, D>> {
        let sb = &self.superblock;
        let size = u64::from(dir.file_size);
        if size < DIR_SIZE_BIAS {
            return Err(SqfsError::DirectoryMalformed {
                detail: format!("directory size {size} below the 3-byte bias"),
            });
        }
        let total = size - DIR_SIZE_BIAS;
        let cursor = if total == 0 {
            None
        } else {
            Some(self.meta_cursor(
                "directory",
                sb.directory_table_start,
                u64::from(dir.dir_block_start),
                dir.block_offset,
                sb.directory_table_end(),
                total,
            )?)
        };
        Ok(DirWalker::new(cursor, total))
    }

    // ── Files ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn file_reader<'a>(&'a self, file: &'a FileInode) -> FileReader<'a, D> {
        FileReader::new(self, file)
    }

    /// Fetch and decode a whole fragment block, caching the most recent
    /// one; many small files share a single fragment block.
    pub(crate) fn fragment_block(&self, index: u32) -> Result<Arc<Vec<u8>>> {
        if let Some((cached_index, data)) = self.fragment_data.lock().as_ref() {
            if *cached_index == index {
                self.fragment_hits.fetch_add(1, Ordering::Relaxed);
                trace!(target: "sqsh::image", index, "fragment cache hit");
                return Ok(Arc::clone(data));
            }
        }
        self.fragment_misses.fetch_add(1, Ordering::Relaxed);

        let entry = self.fragment_entry(index)?;
        let block_size = self.superblock.block_size.as_usize();
        let on_disk = entry.size.on_disk_size() as usize;
        if on_disk == 0 {
            return Err(SqfsError::Truncated {
                offset: entry.start,
                detail: format!("fragment {index} has zero on-disk size"),
            });
        }
        if on_disk > block_size {
            return Err(SqfsError::BlockSizeOverflow {
                produced: on_disk,
                limit: block_size,
            });
        }

        let mut raw = vec![0_u8; on_disk];
        self.read_exact_at(entry.start, &mut raw)?;
        let data = if entry.size.is_uncompressed() {
            raw
        } else {
            self.codec.decompress(&raw, block_size)?
        };
        debug!(target: "sqsh::image", index, len = data.len(), "fragment block decoded");

        let data = Arc::new(data);
        *self.fragment_data.lock() = Some((index, Arc::clone(&data)));
        Ok(data)
    }

    fn fragment_entry(&self, index: u32) -> Result<FragmentEntry> {
        let fragments = {
            let mut guard = self.fragments.lock();
            match guard.as_ref() {
                Some(fragments) => Arc::clone(fragments),
                None => {
                    let loaded = Arc::new(tables::load_fragments(self)?);
                    *guard = Some(Arc::clone(&loaded));
                    loaded
                }
            }
        };
        fragments
            .get(index as usize)
            .copied()
            .ok_or(SqfsError::TableIndexOutOfBounds {
                table: "fragment",
                index: u64::from(index),
                count: fragments.len() as u64,
            })
    }

    // ── Ids ─────────────────────────────────────────────────────────────

    /// Look up a packed uid/gid value by its 16-bit inode field.
    pub fn resolve_id(&self, index: u16) -> Result<u32> {
        let ids = {
            let mut guard = self.ids.lock();
            match guard.as_ref() {
                Some(ids) => Arc::clone(ids),
                None => {
                    let loaded = Arc::new(tables::load_ids(self)?);
                    *guard = Some(Arc::clone(&loaded));
                    loaded
                }
            }
        };
        ids.get(usize::from(index))
            .copied()
            .ok_or(SqfsError::TableIndexOutOfBounds {
                table: "id",
                index: u64::from(index),
                count: ids.len() as u64,
            })
    }

    // ── Xattrs ──────────────────────────────────────────────────────────

    /// Read the attribute list behind an inode's xattr index.
    ///
    /// `Ok(None)` means the image has no xattr store at all; the caller
    /// decides whether that deserves a warning. Indexes past the store
    /// are corruption and fail hard.
    pub fn xattrs(&self, index: u32) -> Result<Option<Vec<Xattr>>> {
        let Some(directory) = self.xattr_directory()? else {
            return Ok(None);
        };
        let entry = directory.entries.get(index as usize).copied().ok_or(
            SqfsError::TableIndexOutOfBounds {
                table: "xattr",
                index: u64::from(index),
                count: directory.entries.len() as u64,
            },
        )?;

        let mut cursor = self.meta_cursor(
            "xattr",
            directory.kv_start,
            entry.xattr_ref.block_offset(),
            entry.xattr_ref.byte_offset(),
            self.superblock.bytes_used,
            u64::from(entry.size),
        )?;

        let mut pairs = Vec::with_capacity((entry.count as usize).min(64));
        for _ in 0..entry.count {
            if let Some(pair) = self.parse_xattr_pair(&mut cursor, directory.kv_start)? {
                pairs.push(pair);
            }
        }
        Ok(Some(pairs))
    }

    fn xattr_directory(&self) -> Result<Option<Arc<tables::XattrDirectory>>> {
        {
            let guard = self.xattrs.lock();
            match &*guard {
                XattrState::Absent => return Ok(None),
                XattrState::Loaded(directory) => return Ok(Some(Arc::clone(directory))),
                XattrState::Unloaded => {}
            }
        }

        match self.superblock.xattr_id_table_start {
            None => {
                *self.xattrs.lock() = XattrState::Absent;
                Ok(None)
            }
            Some(start) => {
                let directory = Arc::new(tables::load_xattr_directory(self, start)?);
                *self.xattrs.lock() = XattrState::Loaded(Arc::clone(&directory));
                Ok(Some(directory))
            }
        }
    }

    fn parse_xattr_pair(
        &self,
        cursor: &mut MetaCursor<'_, D>,
        kv_start: u64,
    ) -> Result<Option<Xattr>> {
        let header = XattrKeyHeader::parse(cursor).map_err(|e| cursor.fail_truncated(e))?;
        let name = stream::read_bytes(cursor, usize::from(header.name_size), "xattr_name")
            .map_err(|e| cursor.fail_truncated(e))?;
        let value_size = stream::read_u32(cursor, "xattr_value_size")
            .map_err(|e| cursor.fail_truncated(e))?;

        let Some(namespace) = header.namespace() else {
            debug!(
                target: "sqsh::image",
                entry_type = header.entry_type,
                "skipping xattr pair with unknown namespace"
            );
            stream::skip(cursor, u64::from(value_size), "xattr_value")
                .map_err(|e| cursor.fail_truncated(e))?;
            return Ok(None);
        };

        let value = if header.value_is_out_of_line() {
            if value_size != 8 {
                return Err(SqfsError::Truncated {
                    offset: kv_start,
                    detail: format!("out-of-line xattr value size {value_size}, expected 8"),
                });
            }
            let reference = InodeRef(
                stream::read_u64(cursor, "xattr_value_ref").map_err(|e| cursor.fail_truncated(e))?,
            );
            self.read_ool_xattr_value(kv_start, reference)?
        } else {
            read_stream_exact(cursor, u64::from(value_size), "xattr_value")?
        };

        let mut full_name = Vec::with_capacity(namespace.prefix().len() + name.len());
        full_name.extend_from_slice(namespace.prefix());
        full_name.extend_from_slice(&name);
        Ok(Some(Xattr {
            name: full_name,
            value,
        }))
    }

    fn read_ool_xattr_value(&self, kv_start: u64, reference: InodeRef) -> Result<Vec<u8>> {
        let mut cursor = self.meta_cursor(
            "xattr",
            kv_start,
            reference.block_offset(),
            reference.byte_offset(),
            self.superblock.bytes_used,
            u64::MAX,
        )?;
        let len =
            stream::read_u32(&mut cursor, "xattr_ool_len").map_err(|e| cursor.fail_truncated(e))?;
        read_stream_exact(&mut cursor, u64::from(len), "xattr_ool_value")
    }
}

/// Drain exactly `len` bytes from a cursor without trusting `len` for
/// the allocation size.
fn read_stream_exact<D: ByteDevice>(
    cursor: &mut MetaCursor<'_, D>,
    len: u64,
    field: &'static str,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(usize::try_from(len).unwrap_or(usize::MAX).min(8192));
    let outcome = (&mut *cursor).take(len).read_to_end(&mut out);
    match outcome {
        Ok(n) if n as u64 == len => Ok(out),
        _ => Err(cursor.fail_truncated(ParseError::UnexpectedEof { field })),
    }
}

fn map_superblock_error(err: ParseError) -> SqfsError {
    match err {
        ParseError::InvalidMagic { actual, .. } => SqfsError::BadMagic { actual },
        ParseError::UnsupportedVersion { major, minor } => {
            SqfsError::UnsupportedVersion { major, minor }
        }
        ParseError::InvalidField { field, reason } => SqfsError::SuperblockInvalid { field, reason },
        ParseError::InsufficientData { .. } | ParseError::UnexpectedEof { .. } => {
            SqfsError::Truncated {
                offset: 0,
                detail: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use sqsh_types::{SQUASHFS_MAGIC, TABLE_ABSENT};
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Minimal image scaffold: superblock at 0, caller-provided bytes
    /// appended, table offsets patched in afterwards.
    struct Scaffold {
        bytes: Vec<u8>,
    }

    impl Scaffold {
        fn new() -> Self {
            let mut bytes = vec![0_u8; SUPERBLOCK_SIZE];
            bytes[0..4].copy_from_slice(&SQUASHFS_MAGIC.to_le_bytes());
            bytes[12..16].copy_from_slice(&4096_u32.to_le_bytes());
            bytes[20..22].copy_from_slice(&1_u16.to_le_bytes()); // gzip
            bytes[22..24].copy_from_slice(&12_u16.to_le_bytes());
            bytes[26..28].copy_from_slice(&1_u16.to_le_bytes());
            bytes[28..30].copy_from_slice(&4_u16.to_le_bytes());
            bytes[56..64].copy_from_slice(&TABLE_ABSENT.to_le_bytes());
            bytes[88..96].copy_from_slice(&TABLE_ABSENT.to_le_bytes());
            Self { bytes }
        }

        fn push_meta_block(&mut self, payload: &[u8], compress: bool) -> u64 {
            let offset = self.bytes.len() as u64;
            let (stored, flag) = if compress {
                (zlib(payload), 0)
            } else {
                (payload.to_vec(), METADATA_UNCOMPRESSED)
            };
            let header = (stored.len() as u16) | flag;
            self.bytes.extend_from_slice(&header.to_le_bytes());
            self.bytes.extend_from_slice(&stored);
            offset
        }

        fn finish(
            mut self,
            inode_table_start: u64,
            directory_table_start: u64,
            id_table_start: u64,
        ) -> Vec<u8> {
            let used = self.bytes.len() as u64;
            self.bytes[40..48].copy_from_slice(&used.to_le_bytes());
            self.bytes[48..56].copy_from_slice(&id_table_start.to_le_bytes());
            self.bytes[64..72].copy_from_slice(&inode_table_start.to_le_bytes());
            self.bytes[72..80].copy_from_slice(&directory_table_start.to_le_bytes());
            self.bytes[80..88].copy_from_slice(&directory_table_start.to_le_bytes());
            self.bytes
        }
    }

    #[test]
    fn decodes_stored_and_compressed_metadata_blocks() {
        let mut scaffold = Scaffold::new();
        let stored_at = scaffold.push_meta_block(b"stored payload", false);
        let packed_at = scaffold.push_meta_block(b"compressed payload", true);
        let end = scaffold.bytes.len() as u64;
        let image =
            SquashImage::from_bytes(scaffold.finish(stored_at, end, end)).unwrap();

        let block = image.metadata_block(stored_at).unwrap();
        assert_eq!(block.data, b"stored payload");
        assert_eq!(block.next_offset, stored_at + 2 + 14);

        let block = image.metadata_block(packed_at).unwrap();
        assert_eq!(block.data, b"compressed payload");

        // memoized: the same Arc comes back
        let again = image.metadata_block(packed_at).unwrap();
        assert!(Arc::ptr_eq(&block, &again));
    }

    #[test]
    fn rejects_zero_length_metadata_header() {
        let mut scaffold = Scaffold::new();
        let offset = scaffold.bytes.len() as u64;
        scaffold
            .bytes
            .extend_from_slice(&METADATA_UNCOMPRESSED.to_le_bytes());
        let end = scaffold.bytes.len() as u64;
        let image = SquashImage::from_bytes(scaffold.finish(offset, end, end)).unwrap();
        assert!(matches!(
            image.metadata_block(offset),
            Err(SqfsError::MetaHeaderInvalid { stored_len: 0, .. })
        ));
    }

    #[test]
    fn cursor_reads_across_chained_blocks() {
        let mut scaffold = Scaffold::new();
        let first = scaffold.push_meta_block(b"abcde", false);
        scaffold.push_meta_block(b"fghij", false);
        let end = scaffold.bytes.len() as u64;
        let image = SquashImage::from_bytes(scaffold.finish(first, end, end)).unwrap();

        let mut cursor = image
            .meta_cursor("inode", first, 0, 3, end, u64::MAX)
            .unwrap();
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"defghij");
        assert_eq!(cursor.consumed(), 7);
    }

    #[test]
    fn cursor_stops_at_table_end() {
        let mut scaffold = Scaffold::new();
        let first = scaffold.push_meta_block(b"abcde", false);
        let table_end = scaffold.bytes.len() as u64;
        scaffold.push_meta_block(b"fghij", false);
        let end = scaffold.bytes.len() as u64;
        let image = SquashImage::from_bytes(scaffold.finish(first, table_end, end)).unwrap();

        let mut cursor = image
            .meta_cursor("inode", first, 0, 0, table_end, u64::MAX)
            .unwrap();
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }

    #[test]
    fn rejects_references_outside_the_table() {
        let mut scaffold = Scaffold::new();
        let first = scaffold.push_meta_block(b"abcde", false);
        let table_end = scaffold.bytes.len() as u64;
        let image = SquashImage::from_bytes(scaffold.finish(first, table_end, table_end)).unwrap();

        assert!(matches!(
            image.meta_cursor("inode", first, 4096, 0, table_end, u64::MAX),
            Err(SqfsError::RefOutOfBounds { table: "inode", .. })
        ));
        assert!(matches!(
            image.meta_cursor("inode", first, 0, 100, table_end, u64::MAX),
            Err(SqfsError::RefOutOfBounds { .. })
        ));
    }

    #[test]
    fn open_rejects_bad_magic_and_version() {
        let mut bytes = Scaffold::new().finish(96, 100, 104);
        bytes[0] = b'!';
        assert!(matches!(
            SquashImage::from_bytes(bytes),
            Err(SqfsError::BadMagic { .. })
        ));

        let mut bytes = Scaffold::new().finish(96, 100, 104);
        bytes[28] = 5;
        assert!(matches!(
            SquashImage::from_bytes(bytes),
            Err(SqfsError::UnsupportedVersion { major: 5, minor: 0 })
        ));
    }

    #[test]
    fn open_rejects_bytes_used_past_the_device() {
        let mut scaffold = Scaffold::new();
        let first = scaffold.push_meta_block(b"x", false);
        let end = scaffold.bytes.len() as u64;
        let mut bytes = scaffold.finish(first, end, end);
        bytes[40..48].copy_from_slice(&(end + 50).to_le_bytes());
        assert!(matches!(
            SquashImage::from_bytes(bytes),
            Err(SqfsError::Truncated { .. })
        ));
    }

    #[cfg(not(feature = "lz4"))]
    #[test]
    fn missing_codec_fails_at_first_decode_not_at_open() {
        let mut scaffold = Scaffold::new();
        scaffold.bytes[20..22].copy_from_slice(&5_u16.to_le_bytes()); // lz4
        let offset = scaffold.bytes.len() as u64;
        // compressed-flag framing; the payload never gets that far
        scaffold.bytes.extend_from_slice(&8_u16.to_le_bytes());
        scaffold.bytes.extend_from_slice(&[0xAA; 8]);
        let end = scaffold.bytes.len() as u64;

        let image = SquashImage::from_bytes(scaffold.finish(offset, end, end)).unwrap();
        assert_eq!(image.codec().name(), "lz4");
        assert!(matches!(
            image.metadata_block(offset),
            Err(SqfsError::UnsupportedCodec { id: 5, .. })
        ));
    }
}
