mod bitmap;
mod inode;

pub use self::{bitmap::SectorBitmap, inode::DiskInode};
