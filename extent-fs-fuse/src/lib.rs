use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use extent_fs::{BlockDevice, FileSystem, SECTOR_SIZE};

/// 以磁盘镜像文件充当块设备
#[derive(Debug)]
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self(Mutex::new(fd))
    }

    /// 镜像所含的扇区数
    pub fn sectors(&self) -> io::Result<usize> {
        let file = self.0.lock().map_err(|_| io::Error::other("poisoned image lock"))?;
        Ok(file.metadata()?.len() as usize / SECTOR_SIZE)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(buf.len(), SECTOR_SIZE, "not a complete block!");
        file.read_exact(buf).expect("reading error");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        assert_eq!(buf.len(), SECTOR_SIZE, "not a complete block!");
        file.write_all(buf).expect("writing error");
    }
}

/// 后台写回线程：每隔一个周期把缓存中的脏扇区写回设备，析构时停止
pub struct Flusher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn spawn(fs: Arc<FileSystem>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::spawn({
            let stop = stop.clone();
            move || {
                log::debug!("write-back thread started, every {interval:?}");
                loop {
                    thread::park_timeout(interval);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    fs.sync();
                }
                log::debug!("write-back thread stopped");
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("write-back thread panicked");
            }
        }
    }
}

/// 把存储引擎的错误转成 I/O 错误
pub fn to_io_error(err: extent_fs::Error) -> io::Error {
    io::Error::other(err.to_string())
}
