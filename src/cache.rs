use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;

use lru::LruCache;

/// Fixed-arena LRU cache of fixed-size blocks in front of a seekable
/// reader. Metadata walks (inode tables, directory pages, descriptor
/// blocks) revisit the same few blocks; bulk file data should not go
/// through here.
#[derive(Debug)]
pub struct BlockCache<R: Read + Seek, const BLOCK_SIZE: usize> {
    data: Vec<u8>,
    lru: LruCache<u64, usize>,
    free_slots: Vec<usize>,
    reader: R,
}

impl<R: Read + Seek, const BLOCK_SIZE: usize> BlockCache<R, BLOCK_SIZE> {
    pub fn new(reader: R, slots: usize) -> Self {
        assert!(slots > 0);
        Self {
            data: vec![0u8; slots * BLOCK_SIZE],
            lru: LruCache::new(NonZeroUsize::new(slots).unwrap()),
            free_slots: (0..slots).collect(),
            reader,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    fn take_slot(&mut self) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            slot
        } else {
            let (_evicted, slot) = self.lru.pop_lru().unwrap();
            slot
        }
    }

    pub fn read_block(&mut self, block: u64) -> io::Result<&[u8]> {
        if let Some(&slot) = self.lru.get(&block) {
            let start = slot * BLOCK_SIZE;
            return Ok(&self.data[start..start + BLOCK_SIZE]);
        }
        let slot = self.take_slot();
        let buf = &mut self.data[slot * BLOCK_SIZE..(slot + 1) * BLOCK_SIZE];
        buf.fill(0);
        let result = (|| -> io::Result<()> {
            self.reader
                .seek(SeekFrom::Start(block * BLOCK_SIZE as u64))?;
            self.reader.read_exact(buf)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.lru.put(block, slot);
                Ok(buf)
            }
            Err(e) => {
                self.free_slots.push(slot);
                Err(e)
            }
        }
    }

    pub fn read_exact(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut read = 0usize;
        while read < buf.len() {
            let pos_this_read = pos + read as u64;
            let block = pos_this_read / BLOCK_SIZE as u64;
            let offset = (pos_this_read % BLOCK_SIZE as u64) as usize;
            let len = (buf.len() - read).min(BLOCK_SIZE - offset);
            let data = self.read_block(block)?;
            buf[read..read + len].copy_from_slice(&data[offset..offset + len]);
            read += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_exact_spans_blocks() {
        let mut data = vec![0u8; 64];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut cache: BlockCache<_, 16> = BlockCache::new(Cursor::new(data), 2);
        let mut buf = [0u8; 20];
        cache.read_exact(10, &mut buf).unwrap();
        let expected: Vec<u8> = (10u8..30).collect();
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn evicts_least_recently_used() {
        let data = vec![1u8; 16 * 8];
        let mut cache: BlockCache<_, 16> = BlockCache::new(Cursor::new(data), 2);
        for block in 0..4 {
            cache.read_block(block).unwrap();
        }
        // only two slots; the earliest blocks must have been evicted and
        // are re-read correctly
        assert_eq!(cache.read_block(0).unwrap()[0], 1);
    }

    #[test]
    fn failed_read_releases_slot() {
        let data = vec![3u8; 16];
        let mut cache: BlockCache<_, 16> = BlockCache::new(Cursor::new(data), 1);
        assert!(cache.read_block(100).is_err());
        assert_eq!(cache.read_block(0).unwrap()[0], 3);
    }
}
