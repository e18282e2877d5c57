use crate::device::ByteDevice;
use crate::SquashImage;
use sqsh_error::SqfsError;
use sqsh_types::ParseError;
use std::io::{self, Read};
use std::sync::Arc;

/// One decoded metadata block: its uncompressed payload and the absolute
/// offset of the next block in the on-disk chain.
#[derive(Debug)]
pub(crate) struct MetaBlock {
    pub(crate) data: Vec<u8>,
    pub(crate) next_offset: u64,
}

/// A forward-only reader over a chained metadata stream.
///
/// Starts inside one block and transparently crosses into the next block
/// of the chain, bounded by the owning table's end offset and an optional
/// byte limit. Implements `io::Read` so the ondisk record parsers can
/// consume it directly; typed failures raised while chaining are parked
/// in `pending` and recovered by the `fail_*` methods.
pub struct MetaCursor<'a, D: ByteDevice> {
    image: &'a SquashImage<D>,
    block: Arc<MetaBlock>,
    /// Absolute offset of the current block, for error reporting.
    block_start: u64,
    pos: usize,
    limit: u64,
    table_end: u64,
    consumed: u64,
    pending: Option<SqfsError>,
}

impl<'a, D: ByteDevice> MetaCursor<'a, D> {
    pub(crate) fn new(
        image: &'a SquashImage<D>,
        block: Arc<MetaBlock>,
        block_start: u64,
        pos: usize,
        limit: u64,
        table_end: u64,
    ) -> Self {
        Self {
            image,
            block,
            block_start,
            pos,
            limit,
            table_end,
            consumed: 0,
            pending: None,
        }
    }

    /// Bytes handed out so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Map a parse failure back to the typed error that caused it, or to
    /// `Truncated` when the stream itself ran dry.
    pub(crate) fn fail_truncated(&mut self, err: ParseError) -> SqfsError {
        match self.pending.take() {
            Some(typed) => typed,
            None => SqfsError::Truncated {
                offset: self.block_start,
                detail: err.to_string(),
            },
        }
    }

    /// Same recovery, but stream exhaustion means a malformed directory.
    pub(crate) fn fail_directory(&mut self, err: ParseError) -> SqfsError {
        match self.pending.take() {
            Some(typed) => typed,
            None => SqfsError::DirectoryMalformed {
                detail: err.to_string(),
            },
        }
    }
}

impl<D: ByteDevice> Read for MetaCursor<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.limit == 0 {
            return Ok(0);
        }
        while self.pos >= self.block.data.len() {
            let next = self.block.next_offset;
            if next >= self.table_end {
                return Ok(0);
            }
            match self.image.metadata_block(next) {
                Ok(block) => {
                    self.block = block;
                    self.block_start = next;
                    self.pos = 0;
                }
                Err(err) => {
                    self.pending = Some(err);
                    return Err(io::Error::other("metadata block decode failed"));
                }
            }
        }

        let available = self.block.data.len() - self.pos;
        let n = buf
            .len()
            .min(available)
            .min(usize::try_from(self.limit).unwrap_or(usize::MAX));
        buf[..n].copy_from_slice(&self.block.data[self.pos..self.pos + n]);
        self.pos += n;
        self.limit -= n as u64;
        self.consumed += n as u64;
        Ok(n)
    }
}
