use derive_more::Display;

use crate::{SectorId, MAX_FILE_SIZE};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// 空闲扇区用尽
    #[display(fmt = "no free sector left on the device")]
    NoSpace,
    /// 超出三级索引所能表示的大小
    #[display(fmt = "file would grow beyond {} bytes", MAX_FILE_SIZE)]
    FileTooLarge,
    /// 扇区上不是 inode 记录
    #[display(fmt = "sector {} holds no inode (magic {:#x})", sector, magic)]
    BadMagic { sector: SectorId, magic: u32 },
}

pub type Result<T> = core::result::Result<T, Error>;
