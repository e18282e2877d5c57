use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;

const SUPERBLOCK_SIZE: usize = 96;
const MAGIC: u32 = 0x7371_7368;
const META_CAP: usize = 8192;
const META_UNCOMPRESSED: u16 = 0x8000;
const DATA_UNCOMPRESSED: u32 = 1 << 24;
const FRAGMENT_NONE: u32 = 0xFFFF_FFFF;
const XATTR_NONE: u32 = 0xFFFF_FFFF;
const TABLE_ABSENT: u64 = 0xFFFF_FFFF_FFFF_FFFF;

// ── Tree specification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct MetaBits {
    mode: u16,
    uid_idx: u16,
    gid_idx: u16,
    mtime: u32,
    xattr: Option<u32>,
}

impl MetaBits {
    fn new(mode: u16) -> Self {
        Self {
            mode,
            uid_idx: 0,
            gid_idx: 0,
            mtime: 1_600_000_000,
            xattr: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirSpec {
    meta: MetaBits,
    entries: Vec<(Vec<u8>, NodeSpec)>,
}

impl DirSpec {
    #[must_use]
    pub fn new(mode: u16) -> Self {
        Self {
            meta: MetaBits::new(mode),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn child(mut self, name: &str, node: impl Into<NodeSpec>) -> Self {
        self.entries.push((name.as_bytes().to_vec(), node.into()));
        self
    }

    #[must_use]
    pub fn owner(mut self, uid_idx: u16, gid_idx: u16) -> Self {
        self.meta.uid_idx = uid_idx;
        self.meta.gid_idx = gid_idx;
        self
    }

    #[must_use]
    pub fn mtime(mut self, mtime: u32) -> Self {
        self.meta.mtime = mtime;
        self
    }

    #[must_use]
    pub fn xattr_set(mut self, index: u32) -> Self {
        self.meta.xattr = Some(index);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FileSpec {
    meta: MetaBits,
    content: Vec<u8>,
    tail_in_fragment: bool,
    extended: bool,
}

impl FileSpec {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            meta: MetaBits::new(0o644),
            content: content.into(),
            tail_in_fragment: false,
            extended: false,
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: u16) -> Self {
        self.meta.mode = mode;
        self
    }

    #[must_use]
    pub fn owner(mut self, uid_idx: u16, gid_idx: u16) -> Self {
        self.meta.uid_idx = uid_idx;
        self.meta.gid_idx = gid_idx;
        self
    }

    #[must_use]
    pub fn mtime(mut self, mtime: u32) -> Self {
        self.meta.mtime = mtime;
        self
    }

    /// Pack the sub-block tail into the shared fragment block instead of
    /// a short data block.
    #[must_use]
    pub fn tail_in_fragment(mut self) -> Self {
        self.tail_in_fragment = true;
        self
    }

    /// Force the extended (type 9) record even without xattrs.
    #[must_use]
    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    #[must_use]
    pub fn xattr_set(mut self, index: u32) -> Self {
        self.meta.xattr = Some(index);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkSpec {
    meta: MetaBits,
    target: Vec<u8>,
}

impl SymlinkSpec {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            meta: MetaBits::new(0o777),
            target: target.as_bytes().to_vec(),
        }
    }

    #[must_use]
    pub fn xattr_set(mut self, index: u32) -> Self {
        self.meta.xattr = Some(index);
        self
    }
}

#[derive(Debug, Clone)]
pub enum NodeSpec {
    Dir(DirSpec),
    File(FileSpec),
    Symlink(SymlinkSpec),
    BlockDevice { mode: u16, rdev: u32 },
    CharDevice { mode: u16, rdev: u32 },
    Fifo { mode: u16 },
    Socket { mode: u16 },
}

impl From<DirSpec> for NodeSpec {
    fn from(dir: DirSpec) -> Self {
        Self::Dir(dir)
    }
}

impl From<FileSpec> for NodeSpec {
    fn from(file: FileSpec) -> Self {
        Self::File(file)
    }
}

impl From<SymlinkSpec> for NodeSpec {
    fn from(link: SymlinkSpec) -> Self {
        Self::Symlink(link)
    }
}

/// One key/value pair for the xattr store: the raw on-disk type word
/// (namespace in the low byte) plus unprefixed name bytes.
#[derive(Debug, Clone)]
pub struct XattrPairSpec {
    pub entry_type: u16,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl XattrPairSpec {
    #[must_use]
    pub fn user(name: &str, value: &[u8]) -> Self {
        Self {
            entry_type: 0,
            name: name.as_bytes().to_vec(),
            value: value.to_vec(),
        }
    }
}

// ── Flattened tree ──────────────────────────────────────────────────────────

enum Payload {
    Dir {
        meta: MetaBits,
        children: Vec<usize>,
        subdirs: u32,
        stream_start: u64,
        stream_len: u64,
    },
    File {
        meta: MetaBits,
        content: Vec<u8>,
        tail_in_fragment: bool,
        extended: bool,
        blocks_start: u64,
        words: Vec<u32>,
        fragment: Option<(u32, u32)>,
    },
    Symlink {
        meta: MetaBits,
        target: Vec<u8>,
    },
    Device {
        meta: MetaBits,
        block: bool,
        rdev: u32,
    },
    Ipc {
        meta: MetaBits,
        socket: bool,
    },
}

struct FlatNode {
    name: Vec<u8>,
    path: String,
    parent: usize,
    number: u32,
    payload: Payload,
    inode_offset: u64,
}

/// Uncompressed metadata streams lay blocks out back to back, so the
/// block holding stream offset `s` starts `s / 8192` full blocks in.
/// Compressed streams are restricted to a single block by the builder,
/// where this mapping is trivially correct too.
fn meta_position(stream_offset: u64) -> (u64, u16) {
    let block = stream_offset / META_CAP as u64;
    (
        block * (META_CAP as u64 + 2),
        (stream_offset % META_CAP as u64) as u16,
    )
}

fn small_type(payload: &Payload) -> u16 {
    match payload {
        Payload::Dir { .. } => 1,
        Payload::File { .. } => 2,
        Payload::Symlink { .. } => 3,
        Payload::Device { block: true, .. } => 4,
        Payload::Device { block: false, .. } => 5,
        Payload::Ipc { socket: false, .. } => 6,
        Payload::Ipc { socket: true, .. } => 7,
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// The finished image plus the layout facts tests need to poke at it.
pub struct BuiltImage {
    pub bytes: Vec<u8>,
    pub inode_table_start: u64,
    /// Path → record offset within the uncompressed inode stream. With
    /// `compress(false)` the record lives at
    /// `inode_table_start + 2 + offset` in the image bytes.
    pub inode_record_offsets: BTreeMap<String, u64>,
}

pub struct ImageBuilder {
    block_size: u32,
    compress: bool,
    compression_id: u16,
    ids: Vec<u32>,
    mod_time: u32,
    xattr_sets: Vec<Vec<XattrPairSpec>>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            block_size: 4096,
            compress: true,
            compression_id: 1,
            ids: vec![0],
            mod_time: 1_600_000_000,
            xattr_sets: Vec::new(),
        }
    }

    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Stamp a different codec id into the superblock. The builder still
    /// packs with zlib, which is exactly what a codec-dispatch test
    /// wants: blocks flagged compressed that only the stamped codec may
    /// decode.
    #[must_use]
    pub fn compression_id(mut self, id: u16) -> Self {
        self.compression_id = id;
        self
    }

    #[must_use]
    pub fn ids(mut self, ids: Vec<u32>) -> Self {
        self.ids = ids;
        self
    }

    /// Register an xattr list; inode specs reference the returned index.
    pub fn xattr_set(&mut self, pairs: Vec<XattrPairSpec>) -> u32 {
        self.xattr_sets.push(pairs);
        (self.xattr_sets.len() - 1) as u32
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("zlib write");
        encoder.finish().expect("zlib finish")
    }

    fn write_meta_stream(&self, out: &mut Vec<u8>, stream: &[u8]) {
        assert!(
            !self.compress || stream.len() <= META_CAP,
            "builder limitation: compressed metadata streams must fit one block"
        );
        for chunk in stream.chunks(META_CAP) {
            if self.compress {
                let packed = Self::zlib(chunk);
                if packed.len() < chunk.len() {
                    out.extend_from_slice(&(packed.len() as u16).to_le_bytes());
                    out.extend_from_slice(&packed);
                    continue;
                }
            }
            out.extend_from_slice(&((chunk.len() as u16) | META_UNCOMPRESSED).to_le_bytes());
            out.extend_from_slice(chunk);
        }
    }

    fn write_data_block(&self, out: &mut Vec<u8>, raw: &[u8]) -> u32 {
        if self.compress {
            let packed = Self::zlib(raw);
            if packed.len() < raw.len() {
                out.extend_from_slice(&packed);
                return packed.len() as u32;
            }
        }
        out.extend_from_slice(raw);
        raw.len() as u32 | DATA_UNCOMPRESSED
    }

    fn flatten_dir(
        &self,
        dir: &DirSpec,
        name: Vec<u8>,
        path: String,
        parent: usize,
        arena: &mut Vec<FlatNode>,
    ) -> usize {
        let index = arena.len();
        arena.push(FlatNode {
            name,
            path: path.clone(),
            parent,
            number: (index + 1) as u32,
            payload: Payload::Dir {
                meta: dir.meta,
                children: Vec::new(),
                subdirs: 0,
                stream_start: 0,
                stream_len: 0,
            },
            inode_offset: 0,
        });

        let mut entries: Vec<&(Vec<u8>, NodeSpec)> = dir.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut children = Vec::with_capacity(entries.len());
        let mut subdirs = 0_u32;
        for (child_name, node) in entries {
            let child_path = if path == "/" {
                format!("/{}", String::from_utf8_lossy(child_name))
            } else {
                format!("{}/{}", path, String::from_utf8_lossy(child_name))
            };
            let child_index = match node {
                NodeSpec::Dir(sub) => {
                    subdirs += 1;
                    self.flatten_dir(sub, child_name.clone(), child_path, index, arena)
                }
                other => {
                    let child_index = arena.len();
                    let payload = match other {
                        NodeSpec::File(file) => Payload::File {
                            meta: file.meta,
                            content: file.content.clone(),
                            tail_in_fragment: file.tail_in_fragment,
                            extended: file.extended,
                            blocks_start: 0,
                            words: Vec::new(),
                            fragment: None,
                        },
                        NodeSpec::Symlink(link) => Payload::Symlink {
                            meta: link.meta,
                            target: link.target.clone(),
                        },
                        NodeSpec::BlockDevice { mode, rdev } => Payload::Device {
                            meta: MetaBits::new(*mode),
                            block: true,
                            rdev: *rdev,
                        },
                        NodeSpec::CharDevice { mode, rdev } => Payload::Device {
                            meta: MetaBits::new(*mode),
                            block: false,
                            rdev: *rdev,
                        },
                        NodeSpec::Fifo { mode } => Payload::Ipc {
                            meta: MetaBits::new(*mode),
                            socket: false,
                        },
                        NodeSpec::Socket { mode } => Payload::Ipc {
                            meta: MetaBits::new(*mode),
                            socket: true,
                        },
                        NodeSpec::Dir(_) => unreachable!("handled above"),
                    };
                    arena.push(FlatNode {
                        name: child_name.clone(),
                        path: child_path,
                        parent: index,
                        number: (child_index + 1) as u32,
                        payload,
                        inode_offset: 0,
                    });
                    child_index
                }
            };
            children.push(child_index);
        }

        let Payload::Dir {
            children: slot,
            subdirs: subdir_slot,
            ..
        } = &mut arena[index].payload
        else {
            unreachable!("node {index} was just pushed as a directory");
        };
        *slot = children;
        *subdir_slot = subdirs;
        index
    }

    fn inode_size_of(payload: &Payload) -> u64 {
        let body = match payload {
            Payload::Dir { meta, .. } => {
                if meta.xattr.is_some() {
                    24
                } else {
                    16
                }
            }
            Payload::File {
                meta,
                extended,
                words,
                ..
            } => {
                let fixed = if *extended || meta.xattr.is_some() {
                    40
                } else {
                    16
                };
                fixed + 4 * words.len() as u64
            }
            Payload::Symlink { meta, target } => {
                8 + target.len() as u64 + if meta.xattr.is_some() { 4 } else { 0 }
            }
            Payload::Device { meta, .. } => 8 + if meta.xattr.is_some() { 4 } else { 0 },
            Payload::Ipc { meta, .. } => 4 + if meta.xattr.is_some() { 4 } else { 0 },
        };
        16 + body
    }

    pub fn build(&self, root: DirSpec) -> BuiltImage {
        let mut arena = Vec::new();
        self.flatten_dir(&root, Vec::new(), "/".to_string(), usize::MAX, &mut arena);
        let node_count = arena.len() as u32;

        let mut out = vec![0_u8; SUPERBLOCK_SIZE];
        let block_size = self.block_size as usize;

        // Data blocks, collecting fragment tails in tree order.
        let mut tails: Vec<(usize, Vec<u8>)> = Vec::new();
        for index in 0..arena.len() {
            let Payload::File {
                content,
                tail_in_fragment,
                ..
            } = &arena[index].payload
            else {
                continue;
            };
            let content = content.clone();
            let tail_len = if *tail_in_fragment {
                content.len() % block_size
            } else {
                0
            };
            let full_len = content.len() - tail_len;

            let blocks_start = out.len() as u64;
            let mut words = Vec::new();
            for chunk in content[..full_len].chunks(block_size) {
                if chunk.iter().all(|byte| *byte == 0) {
                    words.push(0);
                } else {
                    words.push(self.write_data_block(&mut out, chunk));
                }
            }
            if tail_len > 0 {
                tails.push((index, content[full_len..].to_vec()));
            }

            let Payload::File {
                blocks_start: start_slot,
                words: words_slot,
                ..
            } = &mut arena[index].payload
            else {
                unreachable!("checked above");
            };
            *start_slot = blocks_start;
            *words_slot = words;
        }

        // One shared fragment block for every tail.
        let mut fragment_entries: Vec<(u64, u32)> = Vec::new();
        if !tails.is_empty() {
            let mut shared = Vec::new();
            for (index, tail) in &tails {
                let offset = shared.len() as u32;
                shared.extend_from_slice(tail);
                let Payload::File { fragment, .. } = &mut arena[*index].payload else {
                    unreachable!("tail came from a file");
                };
                *fragment = Some((0, offset));
            }
            assert!(
                shared.len() <= block_size,
                "builder limitation: all tails must fit one fragment block"
            );
            let start = out.len() as u64;
            let word = self.write_data_block(&mut out, &shared);
            fragment_entries.push((start, word));
        }

        // Inode record sizes fix every stream offset before any value
        // that depends on them is serialized.
        let mut stream_offset = 0_u64;
        for node in &mut arena {
            node.inode_offset = stream_offset;
            stream_offset += Self::inode_size_of(&node.payload);
        }

        // Directory stream: headers group consecutive children sharing an
        // inode block, capped at 256 entries, deltas within i16.
        let mut dir_stream: Vec<u8> = Vec::new();
        let mut dir_layouts: Vec<(usize, u64, u64)> = Vec::new();
        for index in 0..arena.len() {
            let Payload::Dir { children, .. } = &arena[index].payload else {
                continue;
            };
            let children = children.clone();
            let start = dir_stream.len() as u64;

            let mut position = 0;
            while position < children.len() {
                let first = children[position];
                let (first_block, _) = meta_position(arena[first].inode_offset);
                let base = arena[first].number;

                let mut group = Vec::new();
                while position < children.len() {
                    let child = children[position];
                    let (child_block, child_offset) = meta_position(arena[child].inode_offset);
                    let delta = i64::from(arena[child].number) - i64::from(base);
                    if child_block != first_block
                        || group.len() >= 256
                        || i16::try_from(delta).is_err()
                    {
                        break;
                    }
                    group.push((child, child_offset, delta as i16));
                    position += 1;
                }

                dir_stream.extend_from_slice(&((group.len() as u32) - 1).to_le_bytes());
                dir_stream.extend_from_slice(&(first_block as u32).to_le_bytes());
                dir_stream.extend_from_slice(&base.to_le_bytes());
                for (child, child_offset, delta) in group {
                    dir_stream.extend_from_slice(&child_offset.to_le_bytes());
                    dir_stream.extend_from_slice(&delta.to_le_bytes());
                    dir_stream.extend_from_slice(&small_type(&arena[child].payload).to_le_bytes());
                    let name = &arena[child].name;
                    dir_stream.extend_from_slice(&((name.len() as u16) - 1).to_le_bytes());
                    dir_stream.extend_from_slice(name);
                }
            }

            dir_layouts.push((index, start, dir_stream.len() as u64 - start));
        }
        for (index, start, len) in dir_layouts {
            let Payload::Dir {
                stream_start,
                stream_len,
                ..
            } = &mut arena[index].payload
            else {
                unreachable!("dir layout recorded for a directory");
            };
            *stream_start = start;
            *stream_len = len;
        }

        // Inode stream.
        let mut inode_stream: Vec<u8> = Vec::new();
        for node in &arena {
            debug_assert_eq!(inode_stream.len() as u64, node.inode_offset);
            let parent_number = if node.parent == usize::MAX {
                node_count + 1
            } else {
                arena[node.parent].number
            };
            Self::write_inode(&mut inode_stream, node, parent_number);
        }

        let inode_table_start = out.len() as u64;
        self.write_meta_stream(&mut out, &inode_stream);

        let directory_table_start = out.len() as u64;
        self.write_meta_stream(&mut out, &dir_stream);

        let fragment_table_start = if fragment_entries.is_empty() {
            out.len() as u64
        } else {
            let mut entry_stream = Vec::new();
            for (start, word) in &fragment_entries {
                entry_stream.extend_from_slice(&start.to_le_bytes());
                entry_stream.extend_from_slice(&word.to_le_bytes());
                entry_stream.extend_from_slice(&0_u32.to_le_bytes());
            }
            let block_at = out.len() as u64;
            self.write_meta_stream(&mut out, &entry_stream);
            let index_at = out.len() as u64;
            out.extend_from_slice(&block_at.to_le_bytes());
            index_at
        };

        let id_stream: Vec<u8> = self
            .ids
            .iter()
            .flat_map(|id| id.to_le_bytes())
            .collect();
        let id_block_at = out.len() as u64;
        self.write_meta_stream(&mut out, &id_stream);
        let id_table_start = out.len() as u64;
        out.extend_from_slice(&id_block_at.to_le_bytes());

        let xattr_id_table_start = if self.xattr_sets.is_empty() {
            None
        } else {
            let mut kv = Vec::new();
            let mut id_entries = Vec::new();
            for set in &self.xattr_sets {
                let offset = kv.len() as u64;
                for pair in set {
                    kv.extend_from_slice(&pair.entry_type.to_le_bytes());
                    kv.extend_from_slice(&(pair.name.len() as u16).to_le_bytes());
                    kv.extend_from_slice(&pair.name);
                    kv.extend_from_slice(&(pair.value.len() as u32).to_le_bytes());
                    kv.extend_from_slice(&pair.value);
                }
                id_entries.push((offset, set.len() as u32, (kv.len() as u64 - offset) as u32));
            }

            let kv_start = out.len() as u64;
            self.write_meta_stream(&mut out, &kv);

            let mut entry_stream = Vec::new();
            for (offset, count, size) in id_entries {
                let (block, in_block) = meta_position(offset);
                entry_stream.extend_from_slice(&((block << 16) | u64::from(in_block)).to_le_bytes());
                entry_stream.extend_from_slice(&count.to_le_bytes());
                entry_stream.extend_from_slice(&size.to_le_bytes());
            }
            let entries_at = out.len() as u64;
            self.write_meta_stream(&mut out, &entry_stream);

            let table_start = out.len() as u64;
            out.extend_from_slice(&kv_start.to_le_bytes());
            out.extend_from_slice(&(self.xattr_sets.len() as u32).to_le_bytes());
            out.extend_from_slice(&0_u32.to_le_bytes());
            out.extend_from_slice(&entries_at.to_le_bytes());
            Some(table_start)
        };

        // Superblock.
        let bytes_used = out.len() as u64;
        let (root_block, root_offset) = meta_position(arena[0].inode_offset);
        let root_ref = (root_block << 16) | u64::from(root_offset);

        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&node_count.to_le_bytes());
        out[8..12].copy_from_slice(&self.mod_time.to_le_bytes());
        out[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        out[16..20].copy_from_slice(&(fragment_entries.len() as u32).to_le_bytes());
        out[20..22].copy_from_slice(&self.compression_id.to_le_bytes());
        out[22..24].copy_from_slice(&(self.block_size.trailing_zeros() as u16).to_le_bytes());
        out[24..26].copy_from_slice(&0_u16.to_le_bytes());
        out[26..28].copy_from_slice(&(self.ids.len() as u16).to_le_bytes());
        out[28..30].copy_from_slice(&4_u16.to_le_bytes());
        out[30..32].copy_from_slice(&0_u16.to_le_bytes());
        out[32..40].copy_from_slice(&root_ref.to_le_bytes());
        out[40..48].copy_from_slice(&bytes_used.to_le_bytes());
        out[48..56].copy_from_slice(&id_table_start.to_le_bytes());
        out[56..64].copy_from_slice(&xattr_id_table_start.unwrap_or(TABLE_ABSENT).to_le_bytes());
        out[64..72].copy_from_slice(&inode_table_start.to_le_bytes());
        out[72..80].copy_from_slice(&directory_table_start.to_le_bytes());
        out[80..88].copy_from_slice(&fragment_table_start.to_le_bytes());
        out[88..96].copy_from_slice(&TABLE_ABSENT.to_le_bytes());

        let inode_record_offsets = arena
            .iter()
            .map(|node| (node.path.clone(), node.inode_offset))
            .collect();

        BuiltImage {
            bytes: out,
            inode_table_start,
            inode_record_offsets,
        }
    }

    fn write_inode(stream: &mut Vec<u8>, node: &FlatNode, parent_number: u32) {
        fn header(stream: &mut Vec<u8>, raw_type: u16, meta: &MetaBits, number: u32) {
            stream.extend_from_slice(&raw_type.to_le_bytes());
            stream.extend_from_slice(&meta.mode.to_le_bytes());
            stream.extend_from_slice(&meta.uid_idx.to_le_bytes());
            stream.extend_from_slice(&meta.gid_idx.to_le_bytes());
            stream.extend_from_slice(&meta.mtime.to_le_bytes());
            stream.extend_from_slice(&number.to_le_bytes());
        }

        match &node.payload {
            Payload::Dir {
                meta,
                subdirs,
                stream_start,
                stream_len,
                ..
            } => {
                let (dir_block, dir_offset) = meta_position(*stream_start);
                let file_size = stream_len + 3;
                let nlink = 2 + subdirs;
                if meta.xattr.is_some() {
                    header(stream, 8, meta, node.number);
                    stream.extend_from_slice(&nlink.to_le_bytes());
                    stream.extend_from_slice(&(file_size as u32).to_le_bytes());
                    stream.extend_from_slice(&(dir_block as u32).to_le_bytes());
                    stream.extend_from_slice(&parent_number.to_le_bytes());
                    stream.extend_from_slice(&0_u16.to_le_bytes());
                    stream.extend_from_slice(&dir_offset.to_le_bytes());
                    stream.extend_from_slice(&meta.xattr.unwrap_or(XATTR_NONE).to_le_bytes());
                } else {
                    header(stream, 1, meta, node.number);
                    stream.extend_from_slice(&(dir_block as u32).to_le_bytes());
                    stream.extend_from_slice(&nlink.to_le_bytes());
                    assert!(file_size <= u64::from(u16::MAX), "basic dir size overflow");
                    stream.extend_from_slice(&(file_size as u16).to_le_bytes());
                    stream.extend_from_slice(&dir_offset.to_le_bytes());
                    stream.extend_from_slice(&parent_number.to_le_bytes());
                }
            }
            Payload::File {
                meta,
                content,
                extended,
                blocks_start,
                words,
                fragment,
                ..
            } => {
                let (frag_index, frag_offset) = fragment.unwrap_or((FRAGMENT_NONE, 0));
                let file_size = content.len() as u64;
                if *extended || meta.xattr.is_some() {
                    header(stream, 9, meta, node.number);
                    stream.extend_from_slice(&blocks_start.to_le_bytes());
                    stream.extend_from_slice(&file_size.to_le_bytes());
                    stream.extend_from_slice(&0_u64.to_le_bytes());
                    stream.extend_from_slice(&1_u32.to_le_bytes());
                    stream.extend_from_slice(&frag_index.to_le_bytes());
                    stream.extend_from_slice(&frag_offset.to_le_bytes());
                    stream.extend_from_slice(&meta.xattr.unwrap_or(XATTR_NONE).to_le_bytes());
                } else {
                    header(stream, 2, meta, node.number);
                    assert!(*blocks_start <= u64::from(u32::MAX), "basic file start overflow");
                    assert!(file_size <= u64::from(u32::MAX), "basic file size overflow");
                    stream.extend_from_slice(&(*blocks_start as u32).to_le_bytes());
                    stream.extend_from_slice(&frag_index.to_le_bytes());
                    stream.extend_from_slice(&frag_offset.to_le_bytes());
                    stream.extend_from_slice(&(file_size as u32).to_le_bytes());
                }
                for word in words {
                    stream.extend_from_slice(&word.to_le_bytes());
                }
            }
            Payload::Symlink { meta, target } => {
                let raw_type = if meta.xattr.is_some() { 10 } else { 3 };
                header(stream, raw_type, meta, node.number);
                stream.extend_from_slice(&1_u32.to_le_bytes());
                stream.extend_from_slice(&(target.len() as u32).to_le_bytes());
                stream.extend_from_slice(target);
                if let Some(xattr) = meta.xattr {
                    stream.extend_from_slice(&xattr.to_le_bytes());
                }
            }
            Payload::Device { meta, block, rdev } => {
                let raw_type = match (*block, meta.xattr.is_some()) {
                    (true, false) => 4,
                    (false, false) => 5,
                    (true, true) => 11,
                    (false, true) => 12,
                };
                header(stream, raw_type, meta, node.number);
                stream.extend_from_slice(&1_u32.to_le_bytes());
                stream.extend_from_slice(&rdev.to_le_bytes());
                if let Some(xattr) = meta.xattr {
                    stream.extend_from_slice(&xattr.to_le_bytes());
                }
            }
            Payload::Ipc { meta, socket } => {
                let raw_type = match (*socket, meta.xattr.is_some()) {
                    (false, false) => 6,
                    (true, false) => 7,
                    (false, true) => 13,
                    (true, true) => 14,
                };
                header(stream, raw_type, meta, node.number);
                stream.extend_from_slice(&1_u32.to_le_bytes());
                if let Some(xattr) = meta.xattr {
                    stream.extend_from_slice(&xattr.to_le_bytes());
                }
            }
        }
    }
}
