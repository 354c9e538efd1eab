//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 读写均为同步操作，块号从 0 开始。设备出错没有可恢复的途径，
//! 驱动应直接 panic。

#![no_std]

extern crate alloc;

mod memory;

use core::any::Any;

pub use self::memory::MemoryDisk;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);

    fn handle_irq(&self) {}
}
