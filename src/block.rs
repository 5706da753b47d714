use std::cmp;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

/// Fixed capacity of every block leased from the pool.
pub const BLOCK_CAPACITY: usize = 2048;

/// A fixed-capacity byte buffer leased from a `BlockPool`.
///
/// The populated region is `[start, end)`. A block must be `pin`ned for as long as an
/// in-flight async write references it, and `unpin`ned exactly once before being
/// returned to the pool.
pub struct Block {
    data: Box<[u8; BLOCK_CAPACITY]>,
    start: usize,
    end: usize,
    pinned: bool,
}

impl Block {
    /// The populated region of the block.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Number of populated bytes, i.e. `end - start`.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn remaining_capacity(&self) -> usize {
        BLOCK_CAPACITY - self.end
    }

    /// Copies as much of `buf` as fits into the remaining capacity, advancing `end`.
    /// Returns the number of bytes copied.
    fn fill(&mut self, buf: &[u8]) -> usize {
        let n = cmp::min(buf.len(), self.remaining_capacity());
        self.data[self.end..self.end + n].copy_from_slice(&buf[..n]);
        self.end += n;
        n
    }

    /// Marks this block as referenced by an in-flight async write.
    pub fn pin(&mut self) {
        debug_assert!(!self.pinned, "block pinned twice");
        self.pinned = true;
    }

    /// Releases the pin taken by `pin`. Must be called exactly once before the block is
    /// returned to the pool.
    pub fn unpin(&mut self) {
        debug_assert!(self.pinned, "unpin of a block that was never pinned");
        self.pinned = false;
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

/// Leases and recycles fixed-capacity `Block`s.
///
/// Safe to share across threads: producer threads lease blocks while copying into them,
/// the loop thread returns them once a write completes.
#[derive(Clone)]
pub struct BlockPool {
    free: Arc<Mutex<Vec<Box<[u8; BLOCK_CAPACITY]>>>>,
}

impl BlockPool {
    pub fn new() -> BlockPool {
        BlockPool { free: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Leases a block with at least `min_size` bytes of capacity.
    ///
    /// `min_size` must not exceed `BLOCK_CAPACITY`; every block handed out by this pool
    /// has exactly `BLOCK_CAPACITY` bytes of backing storage regardless of `min_size`.
    pub fn lease(&self, min_size: usize) -> Block {
        debug_assert!(min_size <= BLOCK_CAPACITY);
        let data = self.free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Box::new([0; BLOCK_CAPACITY]));
        Block {
            data: data,
            start: 0,
            end: 0,
            pinned: false,
        }
    }

    /// Returns a block to the pool. The block must be unpinned.
    pub fn release(&self, block: Block) {
        debug_assert!(!block.is_pinned(), "returned a pinned block to the pool");
        self.free.lock().unwrap().push(block.data);
    }

    /// Splits `buf` into `ceil(len / BLOCK_CAPACITY)` leased blocks, copying bytes in.
    ///
    /// Performed before any lock is acquired so that `SocketOutput`'s critical section
    /// does no allocation-heavy work.
    pub fn copy_into_blocks(&self, buf: &Bytes) -> VecDeque<Block> {
        let mut blocks = VecDeque::new();
        let mut remaining: &[u8] = buf.as_ref();
        while !remaining.is_empty() {
            let mut block = self.lease(cmp::min(remaining.len(), BLOCK_CAPACITY));
            let n = block.fill(remaining);
            remaining = &remaining[n..];
            blocks.push_back(block);
        }
        blocks
    }
}
