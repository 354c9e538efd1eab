mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use extent_fs::{ExtentIndex, FileSystem, FreeMap, SECTOR_SIZE, SectorBitmap, SectorId};
use extent_fs_fuse::{BlockFile, Flusher, to_io_error};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Format { sectors } => format(&cli.image, sectors),
        Command::Put { file, interval } => put(&cli.image, &file, interval),
        Command::Cat { sector } => cat(&cli.image, SectorId::new(sector)),
        Command::Stat { sector } => stat(&cli.image, SectorId::new(sector)),
        Command::Rm { sector } => remove(&cli.image, SectorId::new(sector)),
    }
}

fn format(image: &Path, sectors: usize) -> io::Result<()> {
    println!("image={image:?}\nsectors={sectors}");
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    fd.set_len((sectors * SECTOR_SIZE) as u64)?;

    let block_file = Arc::new(BlockFile::new(fd));
    let free_map = Arc::new(SectorBitmap::create(block_file.clone(), sectors));
    let fs = FileSystem::mount(block_file, free_map, true).map_err(to_io_error)?;
    fs.shutdown();

    Ok(())
}

fn put(image: &Path, file: &Path, interval: u64) -> io::Result<()> {
    let data = fs::read(file)?;
    let (fs, free_map) = mount(image)?;
    let fs = Arc::new(fs);
    let flusher = Flusher::spawn(fs.clone(), Duration::from_millis(interval));

    let sector = free_map
        .allocate(1)
        .ok_or_else(|| to_io_error(extent_fs::Error::NoSpace))?;
    fs.create(sector, 0, false).map_err(to_io_error)?;
    let written = fs.open(sector).map_err(to_io_error)?.write_at(0, &data);

    drop(flusher);
    fs.shutdown();

    if written < data.len() {
        return Err(io::Error::other(format!(
            "only {written} of {} bytes fit into the image",
            data.len()
        )));
    }
    println!("{sector}");

    Ok(())
}

fn cat(image: &Path, sector: SectorId) -> io::Result<()> {
    let (fs, _) = mount(image)?;
    let inode = fs.open(sector).map_err(to_io_error)?;

    let mut data = vec![0; inode.len()];
    inode.read_at(0, &mut data);
    io::stdout().write_all(&data)
}

fn stat(image: &Path, sector: SectorId) -> io::Result<()> {
    let (fs, _) = mount(image)?;
    let inode = fs.open(sector).map_err(to_io_error)?;

    println!("sector:  {}", inode.sector());
    println!("kind:    {}", if inode.is_dir() { "directory" } else { "file" });
    println!("size:    {}", inode.len());
    println!("parent:  {}", inode.parent());
    // 含 inode 扇区本身
    println!("sectors: {}", ExtentIndex::count_total_sectors(inode.len()) + 1);

    Ok(())
}

fn remove(image: &Path, sector: SectorId) -> io::Result<()> {
    let (fs, _) = mount(image)?;
    let inode = fs.open(sector).map_err(to_io_error)?;
    inode.remove();
    inode.close();
    fs.shutdown();

    Ok(())
}

fn mount(image: &Path) -> io::Result<(FileSystem, Arc<SectorBitmap>)> {
    let fd = OpenOptions::new().read(true).write(true).open(image)?;
    let block_file = Arc::new(BlockFile::new(fd));
    let sectors = block_file.sectors()?;

    let free_map = Arc::new(SectorBitmap::open(block_file.clone(), sectors));
    let fs = FileSystem::mount(block_file, free_map.clone(), false).map_err(to_io_error)?;
    Ok((fs, free_map))
}
