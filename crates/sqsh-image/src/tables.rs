use crate::device::ByteDevice;
use crate::SquashImage;
use sqsh_error::{Result, SqfsError};
use sqsh_ondisk::{FragmentEntry, XattrIdEntry, XattrIdTableHeader};
use sqsh_types::{
    FRAGMENT_ENTRY_SIZE, ID_ENTRY_SIZE, METADATA_BLOCK_SIZE, XATTR_ID_ENTRY_SIZE,
};

/// An indexed auxiliary table: a flat, uncompressed array of u64 absolute
/// block pointers at `index_start`, one per metadata block of packed
/// fixed-size entries.
pub(crate) struct LookupTable {
    table: &'static str,
    index_start: u64,
    count: u64,
    entry_size: usize,
}

impl LookupTable {
    pub(crate) fn new(table: &'static str, index_start: u64, count: u64, entry_size: usize) -> Self {
        Self {
            table,
            index_start,
            count,
            entry_size,
        }
    }

    fn index_len(&self) -> u64 {
        (self.count * self.entry_size as u64).div_ceil(METADATA_BLOCK_SIZE as u64)
    }

    /// Fetch entry `index`, crossing into the next indexed block if the
    /// entry straddles a boundary.
    pub(crate) fn entry<D: ByteDevice>(
        &self,
        image: &SquashImage<D>,
        index: u64,
    ) -> Result<Vec<u8>> {
        if index >= self.count {
            return Err(SqfsError::TableIndexOutOfBounds {
                table: self.table,
                index,
                count: self.count,
            });
        }

        let byte = index * self.entry_size as u64;
        let mut block_ix = byte / METADATA_BLOCK_SIZE as u64;
        let mut in_block = (byte % METADATA_BLOCK_SIZE as u64) as usize;
        let mut out = Vec::with_capacity(self.entry_size);

        while out.len() < self.entry_size {
            if block_ix >= self.index_len() {
                return Err(SqfsError::Truncated {
                    offset: self.index_start,
                    detail: format!("{} table index exhausted at entry {index}", self.table),
                });
            }
            let pointer = image.read_u64_at(self.index_start + 8 * block_ix)?;
            let block = image.metadata_block(pointer)?;
            if in_block >= block.data.len() {
                return Err(SqfsError::Truncated {
                    offset: pointer,
                    detail: format!("{} table entry {index} beyond block payload", self.table),
                });
            }
            let take = (self.entry_size - out.len()).min(block.data.len() - in_block);
            out.extend_from_slice(&block.data[in_block..in_block + take]);
            in_block = 0;
            block_ix += 1;
        }

        Ok(out)
    }
}

/// Load the packed uid/gid array. Inodes store 16-bit indices into it.
pub(crate) fn load_ids<D: ByteDevice>(image: &SquashImage<D>) -> Result<Vec<u32>> {
    let sb = image.superblock();
    let count = u64::from(sb.id_count);
    let table = LookupTable::new("id", sb.id_table_start, count, ID_ENTRY_SIZE);
    let mut ids = Vec::with_capacity(sb.id_count as usize);
    for index in 0..count {
        let raw = table.entry(image, index)?;
        ids.push(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
    }
    tracing::debug!(target: "sqsh::image", count = ids.len(), "id table loaded");
    Ok(ids)
}

pub(crate) fn load_fragments<D: ByteDevice>(image: &SquashImage<D>) -> Result<Vec<FragmentEntry>> {
    let sb = image.superblock();
    let count = u64::from(sb.fragment_entry_count);
    let table = LookupTable::new(
        "fragment",
        sb.fragment_table_start,
        count,
        FRAGMENT_ENTRY_SIZE,
    );
    // Capacity clamped so a corrupt entry count cannot allocate before
    // the index reads fail.
    let mut entries = Vec::with_capacity((sb.fragment_entry_count as usize).min(65536));
    for index in 0..count {
        let raw = table.entry(image, index)?;
        let entry = FragmentEntry::parse(&raw).map_err(|e| SqfsError::Truncated {
            offset: sb.fragment_table_start,
            detail: e.to_string(),
        })?;
        entries.push(entry);
    }
    tracing::debug!(target: "sqsh::image", count = entries.len(), "fragment table loaded");
    Ok(entries)
}

/// The two-level xattr store: the id lookup entries plus the absolute
/// start of the key/value metadata stream they reference.
pub(crate) struct XattrDirectory {
    pub(crate) kv_start: u64,
    pub(crate) entries: Vec<XattrIdEntry>,
}

pub(crate) fn load_xattr_directory<D: ByteDevice>(
    image: &SquashImage<D>,
    table_start: u64,
) -> Result<XattrDirectory> {
    let mut raw = [0_u8; 16];
    image.read_exact_at(table_start, &mut raw)?;
    let header = XattrIdTableHeader::parse(&raw).map_err(|e| SqfsError::Truncated {
        offset: table_start,
        detail: e.to_string(),
    })?;

    let table = LookupTable::new(
        "xattr",
        table_start + sqsh_ondisk::xattr::XATTR_ID_TABLE_HEADER_SIZE,
        u64::from(header.count),
        XATTR_ID_ENTRY_SIZE,
    );
    let mut entries = Vec::with_capacity((header.count as usize).min(65536));
    for index in 0..u64::from(header.count) {
        let raw = table.entry(image, index)?;
        let entry = XattrIdEntry::parse(&raw).map_err(|e| SqfsError::Truncated {
            offset: table_start,
            detail: e.to_string(),
        })?;
        entries.push(entry);
    }
    tracing::debug!(
        target: "sqsh::image",
        count = entries.len(),
        kv_start = header.kv_start,
        "xattr id table loaded"
    );
    Ok(XattrDirectory {
        kv_start: header.kv_start,
        entries,
    })
}
