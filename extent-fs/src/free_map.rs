//! # 空闲扇区管理
//!
//! 扇区的分配与回收由外部的空闲扇区表负责，存储引擎只通过 [`FreeMap`] 使用它。

use crate::SectorId;

pub trait FreeMap: Send + Sync {
    /// 分配连续的 `count` 个扇区，返回首个扇区号。
    /// 空间不足时返回空。
    fn allocate(&self, count: usize) -> Option<SectorId>;

    /// 回收从 `sector` 起的 `count` 个扇区
    fn release(&self, sector: SectorId, count: usize);

    /// 卸载时把空闲表落盘
    fn close(&self) {}
}
