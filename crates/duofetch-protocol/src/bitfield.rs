/// Arrival tracking for sequenced datagram transfers.
///
/// One bit per chunk index, sized from the `chunk_count` carried in the first
/// frame that arrives.

/// Compact bitfield tracking which chunks of a transfer have arrived.
#[derive(Clone, Debug)]
pub struct ChunkBitfield {
    bits: Vec<u64>,
    chunk_count: u32,
    received_count: u32,
}

impl ChunkBitfield {
    /// Create a new bitfield for a transfer of `chunk_count` chunks.
    pub fn new(chunk_count: u32) -> Self {
        Self {
            bits: vec![0u64; (chunk_count as usize).div_ceil(64)],
            chunk_count,
            received_count: 0,
        }
    }

    /// Mark a chunk as received. Returns true if it was newly received (not duplicate).
    #[inline]
    pub fn set(&mut self, chunk_index: u32) -> bool {
        if chunk_index >= self.chunk_count {
            return false;
        }
        let idx = chunk_index as usize;
        let mask = 1u64 << (idx % 64);
        let word = &mut self.bits[idx / 64];
        if *word & mask != 0 {
            return false; // already set
        }
        *word |= mask;
        self.received_count += 1;
        true
    }

    /// Check if a chunk has been received.
    #[inline]
    fn get(&self, chunk_index: u32) -> bool {
        if chunk_index >= self.chunk_count {
            return false;
        }
        let idx = chunk_index as usize;
        self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// Returns true if all chunks have been received.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.received_count >= self.chunk_count
    }

    #[inline]
    pub fn received(&self) -> u32 {
        self.received_count
    }

    #[inline]
    pub fn total(&self) -> u32 {
        self.chunk_count
    }

    /// Collect indices of all missing chunks.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.chunk_count).filter(|&i| !self.get(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut bf = ChunkBitfield::new(100);
        assert!(!bf.is_complete());
        assert_eq!(bf.missing_chunks().len(), 100);

        assert!(bf.set(0));
        assert!(!bf.set(0)); // duplicate
        assert_eq!(bf.received(), 1);
        assert!(bf.get(0));
        assert!(!bf.get(1));

        for i in 1..100 {
            bf.set(i);
        }
        assert!(bf.is_complete());
        assert!(bf.missing_chunks().is_empty());
    }

    #[test]
    fn test_missing_chunks() {
        let mut bf = ChunkBitfield::new(10);
        bf.set(9);
        bf.set(0);
        bf.set(5);
        bf.set(2);
        assert_eq!(bf.missing_chunks(), vec![1, 3, 4, 6, 7, 8]);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut bf = ChunkBitfield::new(3);
        assert!(!bf.set(3));
        assert!(!bf.get(64));
        assert_eq!(bf.received(), 0);
    }

    #[test]
    fn test_word_boundaries() {
        // 84 chunks: a 5 MB file at 60 KB per chunk
        let mut bf = ChunkBitfield::new(84);
        for i in (0..84).rev() {
            assert!(bf.set(i));
        }
        assert!(bf.is_complete());
        assert_eq!(bf.total(), 84);
    }
}
