use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BlockDevice, FREE_MAP_SECTOR, FreeMap, SECTOR_BITS, SECTOR_SIZE, SectorId};

/// 每个位图扇区内的 bit 组数
const GROUPS_PER_SECTOR: usize = SECTOR_BITS / 64;

/// 空闲扇区位图，常驻内存，挂载时读入、关闭时写回。
///
/// 位图本身存放在 [`FREE_MAP_SECTOR`] 起的连续扇区中。
pub struct SectorBitmap {
    device: Arc<dyn BlockDevice>,
    /// 位图所指示的扇区总数
    total: usize,
    groups: Mutex<Vec<u64>>,
}

/// 扇区在位图中的位置
struct BitPos(usize);

impl SectorBitmap {
    /// 全新的位图：引导扇区、根目录 inode 以及位图自身的扇区被标为占用
    pub fn create(device: Arc<dyn BlockDevice>, total: usize) -> Self {
        let reserved = Self::reserved(total);
        assert!(reserved <= total, "device too small for the free map");

        let mut groups = vec![0; Self::bitmap_sectors(total) * GROUPS_PER_SECTOR];
        for sector in 0..reserved {
            let (group, bit) = BitPos(sector).decode();
            groups[group] |= 1 << bit;
        }

        log::info!("free map: {total} sectors, {reserved} reserved");
        Self {
            device,
            total,
            groups: Mutex::new(groups),
        }
    }

    /// 从设备读入位图
    pub fn open(device: Arc<dyn BlockDevice>, total: usize) -> Self {
        let mut groups = Vec::with_capacity(Self::bitmap_sectors(total) * GROUPS_PER_SECTOR);
        let mut buf = [0; SECTOR_SIZE];
        for i in 0..Self::bitmap_sectors(total) {
            device.read_block((FREE_MAP_SECTOR + i as u32).block(), &mut buf);
            groups.extend(
                buf.chunks_exact(8)
                    .map(|bytes| u64::from_le_bytes(bytes.try_into().unwrap_or_default())),
            );
        }

        Self {
            device,
            total,
            groups: Mutex::new(groups),
        }
    }

    /// 位图自身占用的扇区数
    #[inline]
    pub fn bitmap_sectors(total: usize) -> usize {
        total.div_ceil(SECTOR_BITS)
    }

    /// 新位图中预先占用的扇区数
    #[inline]
    pub fn reserved(total: usize) -> usize {
        FREE_MAP_SECTOR.block() + Self::bitmap_sectors(total)
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    /// 已占用的扇区数
    pub fn used(&self) -> usize {
        self.groups
            .lock()
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum()
    }

    pub fn is_used(&self, sector: SectorId) -> bool {
        let (group, bit) = BitPos(sector.block()).decode();
        self.groups.lock()[group] & (1 << bit) != 0
    }

    /// 找到 `count` 个连续的空闲扇区，返回首个扇区的位置
    fn find_run(groups: &[u64], total: usize, count: usize) -> Option<usize> {
        let mut start = 0;
        let mut pos = 0;
        while pos < total {
            let (group, bit) = BitPos(pos).decode();
            // 整组已满，跳过
            if bit == 0 && groups[group] == u64::MAX {
                pos += 64;
                start = pos;
                continue;
            }

            if groups[group] & (1 << bit) != 0 {
                start = pos + 1;
            } else if pos + 1 - start == count {
                return Some(start);
            }
            pos += 1;
        }

        None
    }
}

impl FreeMap for SectorBitmap {
    fn allocate(&self, count: usize) -> Option<SectorId> {
        if count == 0 {
            return None;
        }

        let mut groups = self.groups.lock();
        let start = Self::find_run(&groups, self.total, count)?;
        for pos in start..start + count {
            let (group, bit) = BitPos(pos).decode();
            groups[group] |= 1 << bit;
        }

        Some(BitPos(start).into())
    }

    fn release(&self, sector: SectorId, count: usize) {
        let mut groups = self.groups.lock();
        for pos in sector.block()..sector.block() + count {
            let (group, bit) = BitPos(pos).decode();
            // 编号一定得有对应的位
            assert_ne!(groups[group] & (1 << bit), 0, "releasing free sector {pos}");
            groups[group] -= 1 << bit;
        }
    }

    fn close(&self) {
        let groups = self.groups.lock();
        let mut buf = [0; SECTOR_SIZE];
        for (i, sector) in groups.chunks_exact(GROUPS_PER_SECTOR).enumerate() {
            for (bytes, bits) in buf.chunks_exact_mut(8).zip(sector) {
                bytes.copy_from_slice(&bits.to_le_bytes());
            }
            self.device.write_block((FREE_MAP_SECTOR + i as u32).block(), &buf);
        }
        log::debug!("free map: stored {} bitmap sectors", groups.len() / GROUPS_PER_SECTOR);
    }
}

impl BitPos {
    /// 组号与组内位号
    #[inline]
    fn decode(&self) -> (usize, usize) {
        (self.0 / 64, self.0 % 64)
    }
}

impl From<BitPos> for SectorId {
    #[inline]
    fn from(pos: BitPos) -> Self {
        SectorId::new(pos.0 as u32)
    }
}
