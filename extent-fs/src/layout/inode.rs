use core::mem;

use crate::{ExtentIndex, INODE_MAGIC, SECTOR_SIZE, SectorId};

/// 填满一个扇区所需的保留字数
const RESERVED_COUNT: usize =
    (SECTOR_SIZE - mem::size_of::<ExtentIndex>() - 12) / mem::size_of::<u32>();

/// 磁盘上的 inode 记录，恰好占满一个扇区
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DiskInode {
    pub index: ExtentIndex,
    /// 非0即目录
    is_dir: u8,
    _pad: [u8; 3],
    /// 父目录 inode 所在扇区
    parent: u32,
    magic: u32,
    _reserved: [u32; RESERVED_COUNT],
}

const _: () = assert!(mem::size_of::<DiskInode>() == SECTOR_SIZE);

impl DiskInode {
    pub fn new(index: ExtentIndex, is_dir: bool, parent: SectorId) -> Self {
        Self {
            index,
            is_dir: is_dir as u8,
            _pad: [0; 3],
            parent: parent.into(),
            magic: INODE_MAGIC,
            _reserved: [0; RESERVED_COUNT],
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    #[inline]
    pub fn parent(&self) -> SectorId {
        self.parent.into()
    }
}

#[cfg(test)]
mod tests {
    use super::DiskInode;
    use crate::{ExtentIndex, INODE_MAGIC, SectorId};

    #[test]
    fn fresh_record_is_valid() {
        let disk = DiskInode::new(ExtentIndex::default(), true, SectorId::new(7));
        assert!(disk.is_valid());
        assert!(disk.is_dir());
        assert_eq!(disk.parent(), SectorId::new(7));
        assert_eq!(disk.magic(), INODE_MAGIC);
        assert!(disk.index.is_empty());
    }
}
