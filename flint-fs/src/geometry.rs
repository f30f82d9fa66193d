//! Flash geometry shared by the block store and the firmware.

/// littlefs block size, equal to the flash sector erase unit
pub const BLOCK_SIZE: usize = 4096;

/// Number of littlefs blocks on the volume
pub const BLOCK_COUNT: usize = 2048;

/// Program granularity, one flash page
pub const PROG_SIZE: usize = 256;

/// Read granularity presented to littlefs
pub const READ_SIZE: usize = 64;

/// Wear-leveling cycle count before littlefs relocates a block
pub const BLOCK_CYCLES: isize = 500;

/// Total volume capacity in bytes
pub const CAPACITY: usize = BLOCK_SIZE * BLOCK_COUNT;

/// Split `data` into chunks that never cross a flash page boundary.
///
/// The device wraps within a 256-byte page when a program runs past its
/// end, so every program transaction must stay inside one page. The
/// first chunk may be short when `address` is not page-aligned.
pub fn page_chunks(address: u32, data: &[u8]) -> PageChunks<'_> {
    PageChunks { address, data }
}

pub struct PageChunks<'a> {
    address: u32,
    data: &'a [u8],
}

impl<'a> Iterator for PageChunks<'a> {
    type Item = (u32, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let room = PROG_SIZE - (self.address as usize % PROG_SIZE);
        let take = room.min(self.data.len());
        let (head, tail) = self.data.split_at(take);
        let item = (self.address, head);
        self.address += take as u32;
        self.data = tail;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    extern crate std;
    use std::vec::Vec;

    #[test]
    fn aligned_write_splits_at_page_size() {
        let data = [0u8; 600];
        let chunks: Vec<_> = page_chunks(0x1000, &data).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].0, chunks[0].1.len()), (0x1000, 256));
        assert_eq!((chunks[1].0, chunks[1].1.len()), (0x1100, 256));
        assert_eq!((chunks[2].0, chunks[2].1.len()), (0x1200, 88));
    }

    #[test]
    fn unaligned_first_chunk_is_short() {
        let data = [0u8; 300];
        let chunks: Vec<_> = page_chunks(0x10F0, &data).collect();
        assert_eq!((chunks[0].0, chunks[0].1.len()), (0x10F0, 16));
        assert_eq!((chunks[1].0, chunks[1].1.len()), (0x1100, 256));
        assert_eq!((chunks[2].0, chunks[2].1.len()), (0x1200, 28));
    }

    #[test]
    fn empty_data_yields_nothing() {
        assert_eq!(page_chunks(0, &[]).count(), 0);
    }

    proptest! {
        #[test]
        fn chunks_cover_data_without_crossing_pages(
            address in 0u32..(CAPACITY as u32),
            len in 0usize..2048,
        ) {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut expected_addr = address;
            let mut reassembled = Vec::new();

            for (addr, chunk) in page_chunks(address, &data) {
                prop_assert_eq!(addr, expected_addr);
                prop_assert!(!chunk.is_empty());
                // The chunk must stay within the page it starts in.
                let page = addr as usize / PROG_SIZE;
                let last = addr as usize + chunk.len() - 1;
                prop_assert_eq!(last / PROG_SIZE, page);
                expected_addr += chunk.len() as u32;
                reassembled.extend_from_slice(chunk);
            }
            prop_assert_eq!(reassembled, data);
        }
    }
}
