use crate::device::ByteDevice;
use crate::SquashImage;
use sqsh_error::{Result, SqfsError};
use sqsh_ondisk::FileInode;
use sqsh_types::BlockSizeWord;

enum State {
    Blocks,
    Fragment,
    Finished,
}

/// Lazy chunk stream reassembling one file: its full data blocks in
/// order, then the optional tail slice from a shared fragment block.
///
/// The total number of bytes yielded always equals the inode's declared
/// size; any shortfall or overrun surfaces as `FileSizeMismatch`.
pub struct FileReader<'a, D: ByteDevice> {
    image: &'a SquashImage<D>,
    file: &'a FileInode,
    next_block_offset: u64,
    block_index: usize,
    remaining: u64,
    state: State,
}

impl<'a, D: ByteDevice> FileReader<'a, D> {
    pub(crate) fn new(image: &'a SquashImage<D>, file: &'a FileInode) -> Self {
        Self {
            image,
            file,
            next_block_offset: file.blocks_start,
            block_index: 0,
            remaining: file.file_size,
            state: State::Blocks,
        }
    }

    fn fail(&mut self, err: SqfsError) -> Option<Result<Vec<u8>>> {
        self.state = State::Finished;
        Some(Err(err))
    }

    fn mismatch(&mut self) -> Option<Result<Vec<u8>>> {
        let declared = self.file.file_size;
        let actual = declared - self.remaining;
        self.fail(SqfsError::FileSizeMismatch { declared, actual })
    }

    fn next_data_block(&mut self) -> Option<Result<Vec<u8>>> {
        let block_size = self.image.superblock().block_size.as_u64();
        let word = BlockSizeWord(self.file.block_sizes[self.block_index]);
        self.block_index += 1;

        if word.is_sparse() {
            let n = block_size.min(self.remaining);
            self.remaining -= n;
            return Some(Ok(vec![0_u8; n as usize]));
        }

        let on_disk = word.on_disk_size() as usize;
        if on_disk as u64 > block_size {
            return self.fail(SqfsError::BlockSizeOverflow {
                produced: on_disk,
                limit: block_size as usize,
            });
        }

        let mut raw = vec![0_u8; on_disk];
        if let Err(err) = self.image.read_exact_at(self.next_block_offset, &mut raw) {
            return self.fail(err);
        }
        self.next_block_offset += on_disk as u64;

        let mut data = if word.is_uncompressed() {
            raw
        } else {
            match self
                .image
                .codec()
                .decompress(&raw, block_size as usize)
            {
                Ok(data) => data,
                Err(err) => return self.fail(err),
            }
        };

        let take = (data.len() as u64).min(self.remaining);
        data.truncate(take as usize);
        self.remaining -= take;
        Some(Ok(data))
    }

    fn tail_fragment(&mut self) -> Option<Result<Vec<u8>>> {
        self.state = State::Finished;
        if self.remaining == 0 {
            return None;
        }
        let Some(fragment) = self.file.fragment else {
            return self.mismatch();
        };

        let block = match self.image.fragment_block(fragment.index) {
            Ok(block) => block,
            Err(err) => return self.fail(err),
        };

        let start = u64::from(fragment.offset);
        let end = start + self.remaining;
        if end > block.len() as u64 {
            return self.mismatch();
        }

        let chunk = block[start as usize..end as usize].to_vec();
        self.remaining = 0;
        Some(Ok(chunk))
    }
}

impl<D: ByteDevice> Iterator for FileReader<'_, D> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                State::Blocks => {
                    if self.block_index < self.file.block_sizes.len() {
                        if self.remaining == 0 {
                            // More size words than declared bytes.
                            return self.mismatch();
                        }
                        return self.next_data_block();
                    }
                    self.state = State::Fragment;
                }
                State::Fragment => return self.tail_fragment(),
                State::Finished => return None,
            }
        }
    }
}
