//! Data blocks and the per-inode block chains built out of them.
//!
//! A file's content is a singly linked chain of blocks rooted at its inode. Blocks are
//! acquired one at a time while the file grows and are only ever released as a whole chain.

use log::debug;

use super::{Bitmap, FsError, Inode, Result, BLOCK_SIZE, N_BLOCKS, N_BLOCKS_INODE};

/// one fixed-size data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub content: [u8; BLOCK_SIZE],
    /// bytes still unused at the end of `content`
    pub free_space: usize,
    /// next block of the same chain
    pub next: Option<usize>,
}

impl Default for Block {
    fn default() -> Self {
        Block {
            content: [0u8; BLOCK_SIZE],
            free_space: BLOCK_SIZE,
            next: None,
        }
    }
}

impl Block {
    /// the part of `content` holding data
    pub fn filled(&self) -> &[u8] {
        &self.content[..BLOCK_SIZE - self.free_space]
    }

    pub fn is_full(&self) -> bool {
        self.free_space == 0
    }

    /// copy as much of `data` as fits, returning the number of bytes taken
    fn fill(&mut self, data: &[u8]) -> usize {
        let start = BLOCK_SIZE - self.free_space;
        let len = self.free_space.min(data.len());
        self.content[start..start + len].copy_from_slice(&data[..len]);
        self.free_space -= len;
        len
    }
}

/// the fixed block pool and its occupancy bitmap
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStore {
    bitmap: Bitmap,
    blocks: Vec<Block>,
}

impl Default for BlockStore {
    fn default() -> Self {
        BlockStore {
            bitmap: Bitmap::new(N_BLOCKS),
            blocks: vec![Block::default(); N_BLOCKS],
        }
    }
}

impl BlockStore {
    /// rebuild a pool from a bitmap and all `N_BLOCKS` slots, free ones included
    pub fn from_parts(bitmap: Bitmap, blocks: Vec<Block>) -> Self {
        BlockStore { bitmap, blocks }
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// every slot, free ones included
    pub fn slots(&self) -> &[Block] {
        &self.blocks
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.free_count()
    }

    /// walk the chain of `inode` head to tail
    pub fn chain<'a>(&'a self, inode: &Inode) -> Chain<'a> {
        Chain {
            store: self,
            next: inode.first_block,
            remaining: inode.block_count,
        }
    }

    /// block indices of the chain of `inode`, checking each one is allocated
    pub fn chain_indices(&self, inode: &Inode) -> Result<Vec<usize>> {
        let indices: Vec<usize> = self.chain(inode).collect();
        if indices.len() != inode.block_count as usize {
            return Err(FsError::CorruptImage(format!(
                "chain holds {} blocks, inode counts {}",
                indices.len(),
                inode.block_count
            )));
        }
        if let Some(stray) = indices.iter().find(|&&i| !self.bitmap.is_occupied(i)) {
            return Err(FsError::CorruptImage(format!(
                "chain links unallocated block {stray}"
            )));
        }
        let mut seen = Bitmap::new(N_BLOCKS);
        for &index in &indices {
            if seen.is_occupied(index) {
                return Err(FsError::CorruptImage(format!("chain revisits block {index}")));
            }
            seen.mark(index);
        }
        Ok(indices)
    }

    fn allocate_block(&mut self) -> Option<usize> {
        let index = self.bitmap.allocate()?;
        self.blocks[index] = Block::default();
        Some(index)
    }

    /// Append `data` to the end of the chain of `inode`.
    ///
    /// New blocks are linked in while bytes remain, until the inode holds
    /// `N_BLOCKS_INODE` blocks or the pool runs dry; the bytes written up to
    /// that point are kept. Returns how many bytes were written, or
    /// [FsError::ResourceExhausted] when not a single byte fit.
    pub fn append_bytes(&mut self, inode: &mut Inode, data: &[u8]) -> Result<usize> {
        let mut tail = self.chain_indices(inode)?.last().copied();
        let mut written = 0;
        let mut stopped_by = None;

        while written < data.len() {
            let index = match tail {
                Some(index) if !self.blocks[index].is_full() => index,
                _ => {
                    if inode.block_count as usize >= N_BLOCKS_INODE {
                        stopped_by = Some("file reached its block limit");
                        break;
                    }
                    let Some(index) = self.allocate_block() else {
                        stopped_by = Some("block pool is full");
                        break;
                    };
                    match tail {
                        Some(last) => self.blocks[last].next = Some(index),
                        None => inode.first_block = Some(index),
                    }
                    inode.block_count += 1;
                    debug!("linked block {index}, chain now {} blocks", inode.block_count);
                    tail = Some(index);
                    index
                }
            };
            written += self.blocks[index].fill(&data[written..]);
        }

        inode.file_size += written as u64;
        match stopped_by {
            Some(reason) if written == 0 => Err(FsError::ResourceExhausted(reason)),
            Some(reason) => {
                debug!("short write of {written}/{} bytes: {reason}", data.len());
                Ok(written)
            }
            None => Ok(written),
        }
    }

    /// concatenate the filled part of every block of the chain, exactly `file_size` bytes
    pub fn read_all(&self, inode: &Inode) -> Result<Vec<u8>> {
        let chain = self.chain_indices(inode)?;
        if inode.file_size > (chain.len() * BLOCK_SIZE) as u64 {
            return Err(FsError::CorruptImage(format!(
                "inode size {} exceeds its {} blocks",
                inode.file_size,
                chain.len()
            )));
        }
        let mut content = Vec::with_capacity(inode.file_size as usize);
        for index in chain {
            content.extend_from_slice(self.blocks[index].filled());
        }
        if content.len() as u64 != inode.file_size {
            return Err(FsError::CorruptImage(format!(
                "chain holds {} bytes, inode size is {}",
                content.len(),
                inode.file_size
            )));
        }
        Ok(content)
    }

    /// zero and release every block of the chain, leaving `inode` empty
    pub fn release_chain(&mut self, inode: &mut Inode) {
        for index in self.chain(inode).collect::<Vec<_>>() {
            self.blocks[index] = Block::default();
            self.bitmap.release(index);
        }
        debug!("released chain of {} blocks", inode.block_count);
        inode.first_block = None;
        inode.block_count = 0;
        inode.file_size = 0;
    }
}

/// iterator over the block indices of one chain, bounded by the inode's block count
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    store: &'a BlockStore,
    next: Option<usize>,
    remaining: u32,
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.next.filter(|&i| i < self.store.blocks.len())?;
        self.remaining -= 1;
        self.next = self.store.blocks[index].next;
        Some(index)
    }
}
