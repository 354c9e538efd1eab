//! # 挂载层
//!
//! [`FileSystem`] 持有扇区缓存、空闲扇区表和已打开 inode 的登记表，
//! 是所有 inode 操作的入口。

use alloc::sync::Arc;

use crate::cache::SectorCache;
use crate::inode::{InodeTable, OpenInode};
use crate::layout::DiskInode;
use crate::{BlockDevice, CACHE_CAPACITY, ExtentIndex, FreeMap, ROOT_DIR_SECTOR, Result, SectorId};

/// 根目录的目录项个数
const ROOT_DIR_ENTRIES: usize = 16;
/// 目录项的字节数
const DIR_ENTRY_SIZE: usize = 20;

pub struct FileSystem {
    cache: SectorCache,
    free_map: Arc<dyn FreeMap>,
    inodes: InodeTable,
}

impl FileSystem {
    /// 挂载设备；`format` 为真时先建立根目录
    pub fn mount(
        device: Arc<dyn BlockDevice>,
        free_map: Arc<dyn FreeMap>,
        format: bool,
    ) -> Result<Self> {
        Self::with_cache_capacity(device, free_map, CACHE_CAPACITY, format)
    }

    pub fn with_cache_capacity(
        device: Arc<dyn BlockDevice>,
        free_map: Arc<dyn FreeMap>,
        capacity: usize,
        format: bool,
    ) -> Result<Self> {
        let fs = Self {
            cache: SectorCache::new(device, capacity),
            free_map,
            inodes: InodeTable::default(),
        };

        if format {
            fs.format()?;
        }
        log::info!("file system mounted, cache capacity {capacity}");

        Ok(fs)
    }

    /// 在 [`ROOT_DIR_SECTOR`] 上建立空的根目录
    fn format(&self) -> Result<()> {
        log::info!("formatting file system");
        self.create(ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES * DIR_ENTRY_SIZE, true)
    }

    /// 在 `sector` 上建立长度为 `length` 的 inode，数据全为零。
    ///
    /// `sector` 由调用者从空闲扇区表中分配。
    /// 失败时本次已分配的数据扇区不回收。
    pub fn create(&self, sector: SectorId, length: usize, is_dir: bool) -> Result<()> {
        let index = ExtentIndex::default()
            .extend(length, &self.cache, &*self.free_map)
            .inspect_err(|err| log::warn!("inode {sector}: create failed: {err}"))?;

        let disk = DiskInode::new(index, is_dir, ROOT_DIR_SECTOR);
        self.cache
            .acquire(sector)
            .map_mut(0, |on_disk: &mut DiskInode| *on_disk = disk);
        log::debug!("inode {sector}: created with {length} bytes");

        Ok(())
    }

    /// 打开 `sector` 上的 inode；已打开则共享同一份内存 inode
    #[inline]
    pub fn open(&self, sector: SectorId) -> Result<OpenInode<'_>> {
        OpenInode::open(self, sector)
    }

    #[inline]
    pub fn open_root(&self) -> Result<OpenInode<'_>> {
        self.open(ROOT_DIR_SECTOR)
    }

    /// 写回所有脏扇区
    #[inline]
    pub fn sync(&self) {
        self.cache.flush_all();
    }

    /// 卸载前调用：写回缓存并关闭空闲扇区表
    pub fn shutdown(&self) {
        self.sync();
        self.free_map.close();
        log::info!("file system shut down, {:?}", self.cache.stats());
    }

    #[inline]
    pub fn cache(&self) -> &SectorCache {
        &self.cache
    }

    #[inline]
    pub fn free_map(&self) -> &Arc<dyn FreeMap> {
        &self.free_map
    }

    /// 当前已打开的 inode 数
    #[inline]
    pub fn open_inodes(&self) -> usize {
        self.inodes.len()
    }

    #[inline]
    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }
}
