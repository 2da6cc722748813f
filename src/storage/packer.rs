use crate::file::BlockId;

/// Accumulates encoded records for the block currently being filled
///
/// Records are never split: when one does not fit, the caller allocates a new
/// block and the finished one is handed back for writing.
#[derive(Debug)]
pub struct BlockPacker {
    block_size: usize,
    current: Option<BlockId>,
    buffer: Vec<u8>,
    /// Bytes pushed across all blocks
    total_bytes: u64,
}

impl BlockPacker {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            current: None,
            buffer: Vec::with_capacity(block_size),
            total_bytes: 0,
        }
    }

    /// Whether `len` more bytes fit in the current block
    pub fn fits(&self, len: usize) -> bool {
        self.current.is_some() && self.buffer.len() + len <= self.block_size
    }

    /// Where to look for the next block: right after the current one
    pub fn next_search_start(&self) -> BlockId {
        self.current.map_or(0, |block| block + 1)
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Switch to `block`, returning the previous block and its contents
    pub fn start_block(&mut self, block: BlockId) -> Option<(BlockId, Vec<u8>)> {
        let finished = self
            .current
            .replace(block)
            .map(|previous| (previous, std::mem::take(&mut self.buffer)));
        self.buffer.clear();
        finished
    }

    /// Append encoded record bytes to the current block
    pub fn push(&mut self, bytes: &[u8]) {
        debug_assert!(self.fits(bytes.len()));
        self.buffer.extend_from_slice(bytes);
        self.total_bytes += bytes.len() as u64;
    }

    /// The last partially filled block, if any
    pub fn finish(self) -> Option<(BlockId, Vec<u8>)> {
        self.current.map(|block| (block, self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_packer() {
        let packer = BlockPacker::new(16);

        assert!(!packer.fits(1));
        assert_eq!(packer.next_search_start(), 0);
        assert_eq!(packer.current_block(), None);
        assert_eq!(packer.finish(), None);
    }

    #[test]
    fn test_fill_and_switch() {
        let mut packer = BlockPacker::new(16);

        assert_eq!(packer.start_block(3), None);
        packer.push(b"0123456789");
        assert!(packer.fits(6));
        assert!(!packer.fits(7));
        assert_eq!(packer.next_search_start(), 4);

        let finished = packer.start_block(4);
        assert_eq!(finished, Some((3, b"0123456789".to_vec())));
        packer.push(b"abc");

        assert_eq!(packer.total_bytes(), 13);
        assert_eq!(packer.finish(), Some((4, b"abc".to_vec())));
    }
}
