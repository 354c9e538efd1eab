use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    /// Disk image file
    #[arg(long, short, global = true, default_value = "fs.img")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh image with an empty root directory
    Format {
        /// Number of 512-byte sectors in the image
        #[arg(long, short, default_value_t = 16 * 2048)]
        sectors: usize,
    },
    /// Copy a host file into the image and print its inode sector
    Put {
        /// Host file to copy
        file: PathBuf,

        /// Write-back period in milliseconds while copying
        #[arg(long, default_value_t = extent_fs::WRITE_BACK_INTERVAL_MS)]
        interval: u64,
    },
    /// Write the contents of an inode to stdout
    Cat {
        #[arg(long, short)]
        sector: u32,
    },
    /// Show the metadata of an inode
    Stat {
        #[arg(long, short)]
        sector: u32,
    },
    /// Remove an inode and release its sectors
    Rm {
        #[arg(long, short)]
        sector: u32,
    },
}
