//! # 扇区缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟固定数量的缓冲槽，
//! 把即将操作的扇区复制到槽中。使用者对扇区的操作都经过本层，
//! 且**操作扇区时一定在缓冲区当中**。
//!
//! 使用者通过 [`SectorCache::acquire`] 得到被**钉住**的 [`CachedSector`]，
//! 钉住期间槽位不会被换出；句柄析构即释放。
//!
//! 槽位满时按时钟（第二次机会）算法换出：表针循环扫过所有槽位，
//! 最近访问过的清掉访问位放过一次，被钉住的跳过，其余的即被选中，
//! 脏则先写回，再标记为未载入以供新扇区复用。
//!
//! 一把锁保护所有槽位的簿记（扇区号、标志位、钉住计数、表针）；
//! 每个槽位的数据另有一把锁，拷贝数据时不占用簿记锁。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::{self, ManuallyDrop};

use block_dev::BlockDevice;
use enumflags2::{BitFlags, bitflags};
use spin::{Mutex, MutexGuard};

use crate::{SECTOR_SIZE, SectorId};

pub struct SectorCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    clock: Mutex<Clock>,
    /// 与 `Clock::slots` 下标一一对应
    buffers: Box<[Mutex<SectorBuffer>]>,
}

/// 被钉住的缓存扇区
pub struct CachedSector<'a> {
    cache: &'a SectorCache,
    index: usize,
    sector: SectorId,
    buffer: ManuallyDrop<MutexGuard<'a, SectorBuffer>>,
    /// 是否为脏块
    modified: bool,
}

/// 缓存的运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    /// 写回设备的次数，含换出与刷盘
    pub write_backs: usize,
}

#[derive(Debug)]
struct Clock {
    slots: Vec<Slot>,
    /// 表针，`slots` 的下标
    hand: usize,
    stats: Stats,
}

#[derive(Debug)]
struct Slot {
    sector: SectorId,
    flags: BitFlags<SlotFlag>,
    pins: usize,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFlag {
    /// 缓存内容比设备上的新
    Dirty = 0b01,
    /// 表针扫过时可再留一轮
    Accessed = 0b10,
}

/// 按 8 字节对齐，才能就地解读为索引扇区等类型
#[repr(C, align(8))]
struct SectorBuffer {
    bytes: [u8; SECTOR_SIZE],
    /// 为假时内容已过期，使用前须从设备读入
    loaded: bool,
}

impl SectorCache {
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);

        Self {
            device,
            capacity,
            clock: Mutex::new(Clock {
                slots: Vec::with_capacity(capacity),
                hand: 0,
                stats: Stats::default(),
            }),
            buffers: (0..capacity)
                .map(|_| {
                    Mutex::new(SectorBuffer {
                        bytes: [0; SECTOR_SIZE],
                        loaded: false,
                    })
                })
                .collect(),
        }
    }

    /// 钉住扇区，必要时从设备读入
    #[inline]
    pub fn acquire(&self, sector: SectorId) -> CachedSector<'_> {
        self.pin(sector, true)
    }

    /// 直接把扇区置为全零的脏块，不读设备
    pub fn zeroize(&self, sector: SectorId) {
        let mut cached = self.pin(sector, false);
        cached.buffer.bytes.fill(0);
        cached.mark_dirty();
    }

    /// 写回所有脏块
    pub fn flush_all(&self) {
        let resident = self.clock.lock().slots.len();

        for index in 0..resident {
            // 先清脏位再写：写的同时有人改动，会在其释放时重新置脏
            let sector = {
                let mut clock = self.clock.lock();
                let slot = &mut clock.slots[index];
                if !slot.flags.contains(SlotFlag::Dirty) {
                    continue;
                }
                slot.flags.remove(SlotFlag::Dirty);
                slot.pins += 1;
                slot.sector
            };

            {
                let buffer = self.buffers[index].lock();
                self.device.write_block(sector.block(), &buffer.bytes);
            }

            let mut clock = self.clock.lock();
            clock.slots[index].pins -= 1;
            clock.stats.write_backs += 1;
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前占用的槽位数
    #[inline]
    pub fn resident(&self) -> usize {
        self.clock.lock().slots.len()
    }

    pub fn contains(&self, sector: SectorId) -> bool {
        self.clock.lock().find(sector).is_some()
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        self.clock.lock().stats
    }
}

impl SectorCache {
    fn pin(&self, sector: SectorId, load: bool) -> CachedSector<'_> {
        let index = {
            let mut clock = self.clock.lock();

            let index = match clock.find(sector) {
                Some(index) => {
                    log::trace!("cache: hit sector {sector}");
                    clock.stats.hits += 1;
                    index
                }
                None if clock.slots.len() < self.capacity => {
                    clock.stats.misses += 1;
                    clock.slots.push(Slot {
                        sector,
                        flags: BitFlags::empty(),
                        pins: 0,
                    });
                    // 表针停在最新的槽位上
                    clock.hand = clock.slots.len() - 1;
                    clock.hand
                }
                None => {
                    clock.stats.misses += 1;
                    let index = clock.select_victim();
                    self.recycle(&mut clock, index, sector);
                    index
                }
            };

            let slot = &mut clock.slots[index];
            slot.pins += 1;
            slot.flags.insert(SlotFlag::Accessed);
            index
        };

        // 已钉住，不会被换出；数据锁在簿记锁之外获取
        let mut buffer = self.buffers[index].lock();
        if !buffer.loaded {
            if load {
                log::trace!("cache: load sector {sector}");
                self.device.read_block(sector.block(), &mut buffer.bytes);
            }
            buffer.loaded = true;
        }

        CachedSector {
            cache: self,
            index,
            sector,
            buffer: ManuallyDrop::new(buffer),
            modified: false,
        }
    }

    /// 让选中的槽位改存 `sector`：脏则先写回，内容标记为过期
    fn recycle(&self, clock: &mut Clock, index: usize, sector: SectorId) {
        let slot = &mut clock.slots[index];
        debug_assert_eq!(slot.pins, 0);
        let victim = slot.sector;

        // 未钉住的槽位没有人持有数据锁
        let mut buffer = self.buffers[index].lock();
        let dirty = slot.flags.contains(SlotFlag::Dirty);
        if dirty {
            self.device.write_block(victim.block(), &buffer.bytes);
        }
        buffer.loaded = false;

        slot.sector = sector;
        slot.flags = BitFlags::empty();

        clock.stats.evictions += 1;
        if dirty {
            clock.stats.write_backs += 1;
        }
        log::debug!("cache: evict sector {victim} (dirty: {dirty}) for sector {sector}");
    }

    fn unpin(&self, index: usize, modified: bool) {
        let mut clock = self.clock.lock();
        let slot = &mut clock.slots[index];
        if modified {
            slot.flags.insert(SlotFlag::Dirty);
        }
        slot.pins -= 1;
    }
}

impl Drop for SectorCache {
    fn drop(&mut self) {
        self.flush_all();
    }
}

impl Clock {
    fn find(&self, sector: SectorId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.sector == sector)
    }

    /// 时钟算法选出可换出的槽位。
    ///
    /// 两圈内必然清光所有访问位，仍找不到说明全部被钉住。
    fn select_victim(&mut self) -> usize {
        let len = self.slots.len();

        for _ in 0..2 * len {
            let index = self.hand;
            self.hand = (self.hand + 1) % len;

            let slot = &mut self.slots[index];
            if slot.flags.contains(SlotFlag::Accessed) {
                slot.flags.remove(SlotFlag::Accessed);
                continue;
            }
            if slot.pins > 0 {
                continue;
            }

            return index;
        }

        panic!("run out of sector cache: all {len} entries are pinned");
    }
}

impl CachedSector<'_> {
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    pub fn get<T: Sized>(&self, offset: usize) -> &T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        assert_eq!(0, offset % mem::align_of::<T>());
        let addr: *const u8 = &self.buffer.bytes[offset];
        unsafe { &*addr.cast() }
    }

    pub fn get_mut<T: Sized>(&mut self, offset: usize) -> &mut T {
        let type_size = mem::size_of::<T>();
        assert!(type_size + offset <= SECTOR_SIZE);
        assert_eq!(0, offset % mem::align_of::<T>());
        self.modified = true;
        let addr: *mut u8 = &mut self.buffer.bytes[offset];
        unsafe { &mut *addr.cast() }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.get(offset))
    }

    #[inline]
    pub fn map_mut<T: Sized, V>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> V) -> V {
        f(self.get_mut(offset))
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.modified = true;
    }

    /// 释放钉住，等同于析构
    #[inline]
    pub fn release(self) {}
}

impl Drop for CachedSector<'_> {
    fn drop(&mut self) {
        // 先放开数据锁再碰簿记锁，与获取时的顺序一致
        unsafe { ManuallyDrop::drop(&mut self.buffer) };
        self.cache.unpin(self.index, self.modified);
    }
}
