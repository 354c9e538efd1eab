//! 单元测试共用的内存盘与日志

use alloc::sync::Arc;

use block_dev::MemoryDisk;

use crate::{FileSystem, SECTOR_SIZE, SectorBitmap};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 有 `sectors` 个扇区的全零内存盘
pub fn memory_disk(sectors: usize) -> Arc<MemoryDisk> {
    init_logger();
    Arc::new(MemoryDisk::new(SECTOR_SIZE, sectors))
}

/// 覆盖整张盘的新位图
pub fn free_map(disk: &Arc<MemoryDisk>) -> Arc<SectorBitmap> {
    Arc::new(SectorBitmap::create(disk.clone(), disk.blocks()))
}

/// 格式化好的文件系统，以及它底下的内存盘和位图
pub fn file_system(sectors: usize) -> (Arc<MemoryDisk>, Arc<SectorBitmap>, FileSystem) {
    let disk = memory_disk(sectors);
    let free_map = free_map(&disk);
    let fs = FileSystem::mount(disk.clone(), free_map.clone(), true).unwrap();
    (disk, free_map, fs)
}
