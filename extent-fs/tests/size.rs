use std::mem;
use std::sync::Arc;

use block_dev::MemoryDisk;
use extent_fs::{
    DiskInode, ExtentIndex, FileSystem, FreeMap, INODE_MAGIC, ROOT_DIR_SECTOR, SECTOR_SIZE,
    SectorBitmap, SectorId,
};

#[test]
fn layout() {
    assert_eq!(SECTOR_SIZE, mem::size_of::<DiskInode>());
    assert_eq!(84, mem::size_of::<ExtentIndex>());
    assert_eq!(4, mem::size_of::<SectorId>());
}

#[test]
fn inode_record_on_disk() {
    let disk = Arc::new(MemoryDisk::new(SECTOR_SIZE, 128));
    let free_map = Arc::new(SectorBitmap::create(disk.clone(), 128));
    let fs = FileSystem::mount(disk.clone(), free_map.clone(), true).unwrap();

    let sector = free_map.allocate(1).unwrap();
    fs.create(sector, 1000, true).unwrap();
    fs.sync();

    let raw = disk.snapshot(sector.block());
    let word = |at: usize| u32::from_le_bytes(raw[at..at + 4].try_into().unwrap());
    // 长度与三个游标
    assert_eq!(word(0), 1000);
    assert_eq!(word(4), 0);
    assert_eq!(word(8), 0);
    assert_eq!(word(12), 0);
    // 两个数据扇区在直接索引中
    assert!(free_map.is_used(SectorId::new(word(16))));
    assert!(free_map.is_used(SectorId::new(word(20))));
    assert_eq!(word(24), 0);
    // 目录标志、父目录与魔数
    assert_eq!(raw[84], 1);
    assert_eq!(word(88), u32::from(ROOT_DIR_SECTOR));
    assert_eq!(word(92), INODE_MAGIC);
    assert!(raw[96..].iter().all(|&b| b == 0));
}
