//! # 扇区索引层
//!
//! 把文件内的字节偏移翻译成设备扇区号。索引分三级：
//! - 直接：inode 内 [`DIRECT_COUNT`] 个扇区号，直接指向数据扇区
//! - 一级：一个索引扇区，连续存储 [`INDIRECT_COUNT`] 个数据扇区号
//! - 二级：一个索引扇区，每个编号指向一个一级索引扇区
//!
//! 索引扇区里的 0 既可能是“未分配”，也可能是合法的 0 号扇区，
//! 因此每级填了多少项由游标记录，而不是靠扫描零值：
//! - `indirect_offset`：一级索引已填项数
//! - `doubly_offset_1`：二级索引下已填满的一级索引扇区数
//! - `doubly_offset_2`：正在填充的那个一级索引扇区的已填项数
//!
//! ## 块索引编码
//!
//! - 剔去直接索引和一级索引的部分后，除以 [`INDIRECT_COUNT`] 得一级索引扇区的位置，
//!   取模得其内部索引

use crate::cache::SectorCache;
use crate::error::{Error, Result};
use crate::free_map::FreeMap;
use crate::{DIRECT_COUNT, INDIRECT_COUNT, IndirectSector, MAX_FILE_SIZE, SECTOR_SIZE, SectorId};

/// 直接索引时的扇区容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的扇区容量
const INDIRECT_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;

/// 文件的长度与三级索引，也是 inode 记录的前半部分
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ExtentIndex {
    /// 不用usize是为了严控布局
    length: u32,
    indirect_offset: u32,
    doubly_offset_1: u32,
    doubly_offset_2: u32,
    direct: [u32; DIRECT_COUNT],
    /// 指向一级索引扇区
    indirect: u32,
    /// 指向二级索引扇区
    doubly_indirect: u32,
}

impl ExtentIndex {
    /// 文件字节数
    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// 已分配的数据扇区数
    #[inline]
    pub fn data_sectors(&self) -> usize {
        Self::count_data_sectors(self.len())
    }

    /// 返回字节偏移 `offset` 所在的扇区号；超出文件长度时返回空
    pub fn translate(&self, offset: usize, cache: &SectorCache) -> Option<SectorId> {
        if offset >= self.len() {
            return None;
        }

        let index = offset / SECTOR_SIZE;
        let raw = if index < DIRECT_CAP {
            self.direct[index]
        } else if index < INDIRECT_CAP {
            // 剔去直接索引的部分
            entry(cache, self.indirect, index - DIRECT_CAP)
        } else {
            // 剔去使用了一级索引的部分
            let index = index - INDIRECT_CAP;
            let level1 = entry(cache, self.doubly_indirect, index / INDIRECT_COUNT);
            entry(cache, level1, index % INDIRECT_COUNT)
        };

        Some(raw.into())
    }

    /// 返回扩展到 `new_length` 字节后的索引，新数据扇区全部写零。
    ///
    /// `self` 本身不变，调用者在成功后再发布返回值。
    /// 中途分配失败时直接返回错误，本次已分配的扇区不回收。
    pub fn extend(
        &self,
        new_length: usize,
        cache: &SectorCache,
        free_map: &dyn FreeMap,
    ) -> Result<Self> {
        if new_length <= self.len() {
            return Ok(*self);
        }
        if new_length > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        let mut grown = *self;
        let mut delta = Self::count_data_sectors(new_length) - self.data_sectors();

        /******************** 直接索引 ********************/
        let mut next = self.data_sectors();
        while delta > 0 && next < DIRECT_COUNT {
            grown.direct[next] = allocate_zeroed(cache, free_map)?.into();
            next += 1;
            delta -= 1;
        }
        /******************** END ********************/

        if delta > 0 {
            delta -= grown.grow_indirect(delta, cache, free_map)?;
        }

        if delta > 0 {
            grown.grow_doubly(delta, cache, free_map)?;
        }

        grown.length = new_length as u32;
        debug_assert_eq!(grown.data_sectors(), grown.cursor_sectors());
        log::debug!(
            "extent: grow {} -> {} bytes ({} data sectors)",
            self.length,
            grown.length,
            grown.data_sectors()
        );

        Ok(grown)
    }

    /// 回收 inode 所在扇区以及索引可达的全部扇区
    pub fn destroy(&self, inode_sector: SectorId, cache: &SectorCache, free_map: &dyn FreeMap) {
        free_map.release(inode_sector, 1);

        /******************** 直接索引 ********************/
        for &sector in &self.direct[..self.data_sectors().min(DIRECT_COUNT)] {
            free_map.release(sector.into(), 1);
        }
        /******************** END ********************/

        /******************** 一级索引 ********************/
        if self.indirect_offset > 0 {
            release_entries(cache, free_map, self.indirect, self.indirect_offset as usize);
            free_map.release(self.indirect.into(), 1);
        }
        /******************** END ********************/

        /******************** 二级索引 ********************/
        if self.has_doubly() {
            let level1: IndirectSector = table(cache, self.doubly_indirect);
            let full = self.doubly_offset_1 as usize;
            let partial = usize::from(self.doubly_offset_2 > 0);

            for (slot, &level1) in level1.iter().enumerate().take(full + partial) {
                let used = if slot < full {
                    INDIRECT_COUNT
                } else {
                    self.doubly_offset_2 as usize
                };
                release_entries(cache, free_map, level1, used);
                free_map.release(level1.into(), 1);
            }

            free_map.release(self.doubly_indirect.into(), 1);
        }
        /******************** END ********************/
    }

    /// 计算容纳指定数据量需要多少个**数据扇区**
    #[inline]
    pub fn count_data_sectors(length: usize) -> usize {
        length.div_ceil(SECTOR_SIZE)
    }

    /// 计算容纳指定数据量需要多少个 **数据扇区** 和 **索引扇区**
    pub fn count_total_sectors(length: usize) -> usize {
        let data_sectors = Self::count_data_sectors(length);
        let mut total = data_sectors;

        // 超出直接索引，使用一级索引扇区
        if data_sectors > DIRECT_CAP {
            total += 1;
        }

        // 超出一级索引，使用二级索引扇区及其下的一级索引扇区
        if data_sectors > INDIRECT_CAP {
            total += 1 + (data_sectors - INDIRECT_CAP).div_ceil(INDIRECT_COUNT);
        }

        total
    }
}

impl ExtentIndex {
    /// 从游标 `indirect_offset` 起填充一级索引，最多 `wanted` 项，返回实际填充数
    fn grow_indirect(
        &mut self,
        wanted: usize,
        cache: &SectorCache,
        free_map: &dyn FreeMap,
    ) -> Result<usize> {
        let count = wanted.min(INDIRECT_COUNT - self.indirect_offset as usize);
        if count == 0 {
            return Ok(0);
        }

        // 首次用到一级索引
        if self.indirect_offset == 0 {
            self.indirect = allocate_zeroed(cache, free_map)?.into();
        }

        for _ in 0..count {
            let sector = allocate_zeroed(cache, free_map)?;
            set_entry(cache, self.indirect, self.indirect_offset as usize, sector);
            self.indirect_offset += 1;
        }

        Ok(count)
    }

    /// 从游标 (`doubly_offset_1`, `doubly_offset_2`) 起填充二级索引
    fn grow_doubly(
        &mut self,
        mut wanted: usize,
        cache: &SectorCache,
        free_map: &dyn FreeMap,
    ) -> Result<()> {
        // 首次用到二级索引
        if !self.has_doubly() {
            self.doubly_indirect = allocate_zeroed(cache, free_map)?.into();
        }

        while wanted > 0 {
            let slot = self.doubly_offset_1 as usize;
            debug_assert!(slot < INDIRECT_COUNT);

            // 子索引为0表示进入新的一级索引扇区
            let level1 = if self.doubly_offset_2 == 0 {
                let level1 = allocate_zeroed(cache, free_map)?;
                set_entry(cache, self.doubly_indirect, slot, level1);
                level1.into()
            } else {
                entry(cache, self.doubly_indirect, slot)
            };

            let count = wanted.min(INDIRECT_COUNT - self.doubly_offset_2 as usize);
            for _ in 0..count {
                let sector = allocate_zeroed(cache, free_map)?;
                set_entry(cache, level1, self.doubly_offset_2 as usize, sector);
                self.doubly_offset_2 += 1;
            }
            wanted -= count;

            if self.doubly_offset_2 as usize == INDIRECT_COUNT {
                self.doubly_offset_1 += 1;
                self.doubly_offset_2 = 0;
            }
        }

        Ok(())
    }

    #[inline]
    fn has_doubly(&self) -> bool {
        self.doubly_offset_1 > 0 || self.doubly_offset_2 > 0
    }

    /// 游标记录的数据扇区数，应与长度一致
    fn cursor_sectors(&self) -> usize {
        self.data_sectors().min(DIRECT_COUNT)
            + self.indirect_offset as usize
            + self.doubly_offset_1 as usize * INDIRECT_COUNT
            + self.doubly_offset_2 as usize
    }
}

/// 分配一个扇区并在缓存中写零
fn allocate_zeroed(cache: &SectorCache, free_map: &dyn FreeMap) -> Result<SectorId> {
    let sector = free_map.allocate(1).ok_or(Error::NoSpace)?;
    cache.zeroize(sector);
    Ok(sector)
}

#[inline]
fn entry(cache: &SectorCache, table: u32, slot: usize) -> u32 {
    cache
        .acquire(table.into())
        .map(0, |table: &IndirectSector| table[slot])
}

#[inline]
fn set_entry(cache: &SectorCache, table: u32, slot: usize, sector: SectorId) {
    cache
        .acquire(table.into())
        .map_mut(0, |table: &mut IndirectSector| table[slot] = sector.into());
}

#[inline]
fn table(cache: &SectorCache, table: u32) -> IndirectSector {
    cache
        .acquire(table.into())
        .map(0, |table: &IndirectSector| *table)
}

/// 回收索引扇区 `table` 中前 `used` 项指向的扇区
fn release_entries(cache: &SectorCache, free_map: &dyn FreeMap, table_sector: u32, used: usize) {
    for &sector in &table(cache, table_sector)[..used] {
        free_map.release(sector.into(), 1);
    }
}
