use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::BlockDevice;

/// 内存盘：以一段内存模拟块设备，并记录每个块被读写的次数
#[derive(Debug)]
pub struct MemoryDisk {
    block_size: usize,
    inner: Mutex<MemoryDiskInner>,
}

#[derive(Debug)]
struct MemoryDiskInner {
    data: Vec<u8>,
    reads: Vec<usize>,
    writes: Vec<usize>,
}

impl MemoryDisk {
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            block_size,
            inner: Mutex::new(MemoryDiskInner {
                data: vec![0; block_size * blocks],
                reads: vec![0; blocks],
                writes: vec![0; blocks],
            }),
        }
    }

    #[inline]
    pub fn blocks(&self) -> usize {
        self.inner.lock().writes.len()
    }

    /// 块 `block_id` 被读取的次数
    #[inline]
    pub fn reads_of(&self, block_id: usize) -> usize {
        self.inner.lock().reads[block_id]
    }

    /// 块 `block_id` 被写入的次数
    #[inline]
    pub fn writes_of(&self, block_id: usize) -> usize {
        self.inner.lock().writes[block_id]
    }

    pub fn total_writes(&self) -> usize {
        self.inner.lock().writes.iter().sum()
    }

    /// 绕过计数器直接查看块内容
    pub fn snapshot(&self, block_id: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        let start = block_id * self.block_size;
        inner.data[start..start + self.block_size].to_vec()
    }
}

impl BlockDevice for MemoryDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let mut inner = self.inner.lock();
        let start = block_id * self.block_size;
        buf.copy_from_slice(&inner.data[start..start + self.block_size]);
        inner.reads[block_id] += 1;
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let mut inner = self.inner.lock();
        let start = block_id * self.block_size;
        inner.data[start..start + self.block_size].copy_from_slice(buf);
        inner.writes[block_id] += 1;
    }
}
