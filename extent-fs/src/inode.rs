//! # 索引节点层
//!
//! 已打开的 inode 在内存中只有一份 [`Inode`]，登记在 [`InodeTable`] 中，
//! 每个打开者持有一个 [`OpenInode`] 句柄：克隆即重新打开，析构即关闭。
//! 最后一个句柄关闭时，inode 从登记表中注销，并视删除标记回收其扇区
//! 或把元数据写回 inode 扇区。
//!
//! 锁的顺序：登记表 -> 打开计数；扩展锁 -> 索引锁。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, RwLock};

use crate::layout::DiskInode;
use crate::{DataSector, Error, ExtentIndex, FileSystem, Result, SECTOR_SIZE, SectorId};

/// 内存中的 inode
pub(crate) struct Inode {
    /// inode所在扇区
    sector: SectorId,
    openers: Mutex<Openers>,
    /// 已发布的索引；扩展在副本上进行，成功后整体替换
    index: RwLock<ExtentIndex>,
    /// 同一 inode 的扩展互斥
    extend_lock: Mutex<()>,
    is_dir: bool,
    parent: AtomicU32,
}

#[derive(Debug, Default)]
struct Openers {
    count: usize,
    /// 禁止写入的打开者数，不超过 `count`
    deny_write: usize,
    removed: bool,
}

/// 已打开 inode 的登记表，按 inode 扇区去重
#[derive(Default)]
pub(crate) struct InodeTable {
    open: Mutex<BTreeMap<SectorId, Arc<Inode>>>,
}

/// 打开 inode 的句柄
pub struct OpenInode<'fs> {
    fs: &'fs FileSystem,
    inode: Arc<Inode>,
    /// 本句柄是否计入了禁止写入
    denied: AtomicBool,
}

impl Inode {
    fn load(fs: &FileSystem, sector: SectorId) -> Result<Self> {
        let disk = fs
            .cache()
            .acquire(sector)
            .map(0, |disk: &DiskInode| *disk);
        if !disk.is_valid() {
            log::error!("inode {sector}: bad magic {:#x}", disk.magic());
            return Err(Error::BadMagic {
                sector,
                magic: disk.magic(),
            });
        }

        Ok(Self {
            sector,
            openers: Mutex::new(Openers::default()),
            index: RwLock::new(disk.index),
            extend_lock: Mutex::new(()),
            is_dir: disk.is_dir(),
            parent: AtomicU32::new(disk.parent().into()),
        })
    }

    #[inline]
    fn len(&self) -> usize {
        self.index.read().len()
    }

    /// 把文件扩展到 `new_length` 字节
    fn extend(&self, fs: &FileSystem, new_length: usize) -> Result<()> {
        let _growing = self.extend_lock.lock();

        let current = *self.index.read();
        if new_length <= current.len() {
            return Ok(());
        }
        let grown = current.extend(new_length, fs.cache(), &**fs.free_map())?;
        *self.index.write() = grown;

        Ok(())
    }

    /// 最后一个打开者离开：删除则回收全部扇区，否则写回 inode 扇区
    fn finish(&self, fs: &FileSystem, removed: bool) {
        let index = *self.index.read();
        if removed {
            log::debug!("inode {}: destroy {} bytes", self.sector, index.len());
            index.destroy(self.sector, fs.cache(), &**fs.free_map());
        } else {
            let parent = self.parent.load(Ordering::Acquire).into();
            let disk = DiskInode::new(index, self.is_dir, parent);
            fs.cache()
                .acquire(self.sector)
                .map_mut(0, |on_disk: &mut DiskInode| *on_disk = disk);
        }
    }
}

impl InodeTable {
    /// 已登记的 inode 数
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    fn open(&self, fs: &FileSystem, sector: SectorId) -> Result<Arc<Inode>> {
        let mut open = self.open.lock();

        let inode = match open.get(&sector) {
            Some(inode) => inode.clone(),
            None => {
                let inode = Arc::new(Inode::load(fs, sector)?);
                open.insert(sector, inode.clone());
                log::trace!("inode {sector}: registered");
                inode
            }
        };
        inode.openers.lock().count += 1;

        Ok(inode)
    }

    fn reopen(&self, inode: &Inode) {
        let _open = self.open.lock();
        inode.openers.lock().count += 1;
    }

    /// `denied` 为真时一并归还该打开者的禁止写入
    fn close(&self, fs: &FileSystem, inode: &Inode, denied: bool) {
        let mut open = self.open.lock();

        let removed = {
            let mut openers = inode.openers.lock();
            if denied {
                openers.deny_write -= 1;
            }
            openers.count -= 1;
            if openers.count > 0 {
                return;
            }
            openers.removed
        };

        open.remove(&inode.sector);
        inode.finish(fs, removed);
        log::trace!("inode {}: released", inode.sector);
    }
}

impl<'fs> OpenInode<'fs> {
    pub(crate) fn open(fs: &'fs FileSystem, sector: SectorId) -> Result<Self> {
        let inode = fs.inodes().open(fs, sector)?;
        Ok(Self {
            fs,
            inode,
            denied: AtomicBool::new(false),
        })
    }

    /// inode 所在扇区，即 inode 编号
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.inode.sector
    }

    /// 文件字节数
    #[inline]
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.inode.is_dir
    }

    /// 父目录 inode 所在扇区
    #[inline]
    pub fn parent(&self) -> SectorId {
        self.inode.parent.load(Ordering::Acquire).into()
    }

    /// 记录父目录，随 inode 关闭写回
    #[inline]
    pub fn set_parent(&self, parent: SectorId) {
        self.inode.parent.store(parent.into(), Ordering::Release);
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.inode.openers.lock().count
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.inode.openers.lock().removed
    }

    /// 标记删除；最后一个打开者关闭时回收扇区
    pub fn remove(&self) {
        self.inode.openers.lock().removed = true;
    }

    /// 禁止写入，直到本句柄调用 [`OpenInode::allow_write`] 或关闭。
    ///
    /// 每个句柄至多计一次。
    pub fn deny_write(&self) {
        let mut openers = self.inode.openers.lock();
        if !self.denied.swap(true, Ordering::AcqRel) {
            openers.deny_write += 1;
        }
        assert!(openers.deny_write <= openers.count);
    }

    pub fn allow_write(&self) {
        let mut openers = self.inode.openers.lock();
        assert!(
            self.denied.swap(false, Ordering::AcqRel),
            "writes were not denied through this handle"
        );
        assert!(openers.deny_write > 0);
        openers.deny_write -= 1;
    }

    /// 从 `offset` 起读到 `buf` 中，返回实际读取的字节数；不越过文件末尾
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(end) = offset.checked_add(buf.len()) else {
            return 0;
        };
        let end = end.min(self.len());
        if offset >= end {
            return 0;
        }

        let cache = self.fs.cache();
        let mut start = offset;
        let mut read_size = 0;
        loop {
            let Some(sector) = self.inode.index.read().translate(start, cache) else {
                break;
            };

            // 当前扇区的结束位置
            let sector_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let chunk = sector_end - start;
            let dest = &mut buf[read_size..read_size + chunk];
            cache.acquire(sector).map(0, |data: &DataSector| {
                let at = start % SECTOR_SIZE;
                dest.copy_from_slice(&data[at..at + chunk]);
            });
            read_size += chunk;

            if sector_end == end {
                break;
            }
            start = sector_end;
        }

        read_size
    }

    /// 把 `buf` 写到 `offset` 起，必要时扩展文件，返回实际写入的字节数。
    ///
    /// 禁止写入时返回 0；扩展失败时只写到原有的文件末尾。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if self.inode.openers.lock().deny_write > 0 {
            log::warn!("inode {}: write denied", self.inode.sector);
            return 0;
        }

        // 越过地址空间的写入也必然越过最大文件长度
        let Some(end) = offset.checked_add(buf.len()) else {
            return 0;
        };
        if end > self.len() {
            if let Err(err) = self.inode.extend(self.fs, end) {
                log::warn!("inode {}: cannot grow to {end} bytes: {err}", self.inode.sector);
            }
        }

        let end = end.min(self.len());
        if offset >= end {
            return 0;
        }

        let cache = self.fs.cache();
        let mut start = offset;
        let mut write_size = 0;
        loop {
            let Some(sector) = self.inode.index.read().translate(start, cache) else {
                break;
            };

            let sector_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let chunk = sector_end - start;
            let src = &buf[write_size..write_size + chunk];
            cache.acquire(sector).map_mut(0, |data: &mut DataSector| {
                let at = start % SECTOR_SIZE;
                data[at..at + chunk].copy_from_slice(src);
            });
            write_size += chunk;

            if sector_end == end {
                break;
            }
            start = sector_end;
        }

        write_size
    }

    /// 关闭，等同于析构
    #[inline]
    pub fn close(self) {}
}

impl Clone for OpenInode<'_> {
    fn clone(&self) -> Self {
        self.fs.inodes().reopen(&self.inode);
        Self {
            fs: self.fs,
            inode: self.inode.clone(),
            denied: AtomicBool::new(false),
        }
    }
}

impl Drop for OpenInode<'_> {
    fn drop(&mut self) {
        let denied = *self.denied.get_mut();
        self.fs.inodes().close(self.fs, &self.inode, denied);
    }
}

impl fmt::Debug for OpenInode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenInode")
            .field("sector", &self.inode.sector)
            .field("len", &self.len())
            .field("is_dir", &self.inode.is_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::testing::file_system;
    use crate::{Error, ExtentIndex, FreeMap, MAX_FILE_SIZE, SECTOR_SIZE, SectorId};

    fn byte_at(pos: usize) -> u8 {
        (pos % 251) as u8
    }

    fn pattern(start: usize, len: usize) -> Vec<u8> {
        (start..start + len).map(byte_at).collect()
    }

    #[test]
    fn opens_of_one_sector_share_the_inode() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();

        let a = fs.open(sector).unwrap();
        let b = fs.open(sector).unwrap();
        assert_eq!(a.open_count(), 2);
        assert_eq!(fs.open_inodes(), 1);

        assert_eq!(a.write_at(0, b"shared"), 6);
        let mut buf = [0; 6];
        assert_eq!(b.read_at(0, &mut buf), 6);
        assert_eq!(&buf, b"shared");

        let c = b.clone();
        assert_eq!(a.open_count(), 3);
        drop(b);
        c.close();
        assert_eq!(a.open_count(), 1);
        a.close();
        assert_eq!(fs.open_inodes(), 0);
    }

    #[test]
    fn removal_waits_for_the_last_close() {
        let (_disk, free_map, fs) = file_system(256);
        let baseline = free_map.used();
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 3000, false).unwrap();
        let used = free_map.used();

        let a = fs.open(sector).unwrap();
        let b = a.clone();
        a.remove();
        a.close();
        assert_eq!(free_map.used(), used);
        assert!(b.is_removed());

        // 删除后、最后关闭前仍能打开同一个 inode
        let c = fs.open(sector).unwrap();
        assert!(c.is_removed());
        assert_eq!(c.len(), 3000);
        drop(b);
        assert_eq!(free_map.used(), used);

        drop(c);
        assert_eq!(free_map.used(), baseline);
        assert_eq!(fs.open_inodes(), 0);
    }

    #[test]
    fn denied_writes_do_nothing() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();

        let a = fs.open(sector).unwrap();
        let b = fs.open(sector).unwrap();
        a.deny_write();
        assert_eq!(b.write_at(0, b"nope"), 0);
        assert_eq!(b.len(), 0);

        a.allow_write();
        assert_eq!(b.write_at(0, b"yes"), 3);
    }

    #[test]
    #[should_panic]
    fn allowing_without_denial_panics() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();
        fs.open(sector).unwrap().allow_write();
    }

    #[test]
    fn closing_a_handle_gives_back_its_denial() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();

        let a = fs.open(sector).unwrap();
        let b = fs.open(sector).unwrap();
        a.deny_write();
        assert_eq!(b.write_at(0, b"hi"), 0);
        drop(a);
        assert_eq!(b.write_at(0, b"hi"), 2);

        // 两个句柄都禁止写入，关掉其中一个后另一个仍能解除
        let c = b.clone();
        b.deny_write();
        c.deny_write();
        drop(b);
        assert_eq!(c.write_at(0, b"no"), 0);
        c.allow_write();
        assert_eq!(c.write_at(0, b"ok"), 2);
    }

    #[test]
    fn repeated_denial_counts_once_per_handle() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();

        let a = fs.open(sector).unwrap();
        a.deny_write();
        a.deny_write();
        a.allow_write();
        assert_eq!(a.write_at(0, b"free"), 4);
    }

    #[test]
    fn offsets_near_the_address_limit_transfer_nothing() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 100, false).unwrap();
        let file = fs.open(sector).unwrap();

        let mut buf = [0; 4];
        assert_eq!(file.read_at(usize::MAX - 1, &mut buf), 0);
        assert_eq!(file.write_at(usize::MAX - 1, b"abcd"), 0);
        assert_eq!(file.len(), 100);
    }

    #[test]
    fn reads_stop_at_end_of_file() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();
        let file = fs.open(sector).unwrap();
        file.write_at(0, &pattern(0, 700));

        let mut buf = [0; 100];
        assert_eq!(file.read_at(650, &mut buf), 50);
        assert_eq!(&buf[..50], &pattern(650, 50)[..]);
        assert_eq!(file.read_at(700, &mut buf), 0);
        assert_eq!(file.read_at(5000, &mut buf), 0);
    }

    #[test]
    fn writes_span_every_tier() {
        let (_disk, free_map, fs) = file_system(4096);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();
        let file = fs.open(sector).unwrap();

        let offset = 1000;
        let len = 300_000;
        assert_eq!(file.write_at(offset, &pattern(offset, len)), len);
        assert_eq!(file.len(), offset + len);

        // 写入位置之前的空洞读出全零
        let mut hole = vec![0xFF; offset];
        assert_eq!(file.read_at(0, &mut hole), offset);
        assert!(hole.iter().all(|&b| b == 0));

        let mut buf = vec![0; len];
        assert_eq!(file.read_at(offset, &mut buf), len);
        assert!(buf == pattern(offset, len));
    }

    #[test]
    fn failed_growth_shortens_the_write() {
        let (_disk, free_map, fs) = file_system(64);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, SECTOR_SIZE, false).unwrap();
        let file = fs.open(sector).unwrap();

        let written = file.write_at(100, &[7; 100 * SECTOR_SIZE]);
        assert_eq!(written, SECTOR_SIZE - 100);
        assert_eq!(file.len(), SECTOR_SIZE);

        assert_eq!(file.write_at(MAX_FILE_SIZE, b"x"), 0);
        assert_eq!(file.len(), SECTOR_SIZE);
    }

    #[test]
    fn sector_without_inode_is_rejected() {
        let (_disk, free_map, fs) = file_system(64);
        let sector = free_map.allocate(1).unwrap();
        let err = fs.open(sector).unwrap_err();
        assert_eq!(err, Error::BadMagic { sector, magic: 0 });
        assert_eq!(fs.open_inodes(), 0);
    }

    #[test]
    fn metadata_survives_close() {
        let (_disk, free_map, fs) = file_system(256);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, true).unwrap();

        let dir = fs.open(sector).unwrap();
        dir.write_at(0, &pattern(0, 2000));
        dir.set_parent(SectorId::new(42));
        dir.close();

        let dir = fs.open(sector).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.len(), 2000);
        assert_eq!(dir.parent(), SectorId::new(42));
        let mut buf = vec![0; 2000];
        dir.read_at(0, &mut buf);
        assert!(buf == pattern(0, 2000));
    }

    #[test]
    fn concurrent_growth_matches_a_serial_history() {
        let (_disk, free_map, fs) = file_system(2048);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();
        let baseline = free_map.used();
        let file = fs.open(sector).unwrap();

        let region = 40_000;
        std::thread::scope(|s| {
            for worker in 0..4 {
                let file = &file;
                s.spawn(move || {
                    let offset = worker * region;
                    for step in (0..region).step_by(4000) {
                        let at = offset + step;
                        assert_eq!(file.write_at(at, &pattern(at, 4000)), 4000);
                    }
                });
            }
        });

        let len = 4 * region;
        assert_eq!(file.len(), len);
        let mut buf = vec![0; len];
        assert_eq!(file.read_at(0, &mut buf), len);
        assert!(buf == pattern(0, len));
        assert_eq!(
            free_map.used() - baseline,
            ExtentIndex::count_total_sectors(len)
        );
    }

    #[test]
    fn readers_see_whole_growth_steps() {
        let (_disk, free_map, fs) = file_system(1024);
        let sector = free_map.allocate(1).unwrap();
        fs.create(sector, 0, false).unwrap();
        let file = fs.open(sector).unwrap();

        let total = 120_000;
        std::thread::scope(|s| {
            s.spawn(|| {
                for at in (0..total).step_by(3000) {
                    file.write_at(at, &pattern(at, 3000));
                }
            });
            s.spawn(|| {
                let mut buf = vec![0; total];
                while file.len() < total {
                    let read = file.read_at(0, &mut buf);
                    // 新扩展的部分要么已写入，要么仍是零
                    for (pos, &b) in buf[..read].iter().enumerate() {
                        assert!(b == byte_at(pos) || b == 0);
                    }
                }
            });
        });

        assert_eq!(file.len(), total);
    }
}
