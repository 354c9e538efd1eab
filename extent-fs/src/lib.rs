#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

/* extent-fs 的整体架构，自上而下 */

// 挂载层：构造并持有整个存储引擎
mod fs;

// 索引节点层：已打开 inode 的登记表与读写
mod inode;

// 扇区索引层：文件字节偏移到扇区号的三级索引
mod extent;

// 磁盘数据结构层：inode 记录与空闲扇区位图
mod layout;

// 扇区缓存层：内存上的扇区数据缓存，时钟算法换出
mod cache;

mod error;
mod free_map;
mod sector;

pub use block_dev::BlockDevice;

pub use self::{
    cache::{CachedSector, SectorCache, Stats},
    error::{Error, Result},
    extent::ExtentIndex,
    free_map::FreeMap,
    fs::FileSystem,
    inode::OpenInode,
    layout::{DiskInode, SectorBitmap},
    sector::SectorId,
};

pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

/// 扇区缓存的容量
pub const CACHE_CAPACITY: usize = 64;
/// 后台写回的周期（毫秒）
pub const WRITE_BACK_INTERVAL_MS: u64 = 5000;

/// inode 记录的魔数
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// 根目录 inode 所在扇区
pub const ROOT_DIR_SECTOR: SectorId = SectorId::new(1);
/// 空闲扇区位图的起始扇区
pub const FREE_MAP_SECTOR: SectorId = SectorId::new(2);

/// 直接索引的槽位数
pub const DIRECT_COUNT: usize = 12;
/// 一个索引扇区能容纳的扇区号个数
pub const INDIRECT_COUNT: usize = SECTOR_SIZE / 4;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize =
    (DIRECT_COUNT + INDIRECT_COUNT + INDIRECT_COUNT * INDIRECT_COUNT) * SECTOR_SIZE;

type DataSector = [u8; SECTOR_SIZE];
/// 索引扇区
type IndirectSector = [u32; INDIRECT_COUNT];

#[cfg(test)]
mod testing;
