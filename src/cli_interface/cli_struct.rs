use clap::Parser;

use crate::fs::DEFAULT_IMAGE_FILE;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum ChainFsCli {
    /// create a new file system image holding only "/"
    Mkfs(MkfsArgs),
    /// register a filesystem to `FUSE` and mount it
    Mount(MountArgs),
    /// show the superblock and usage of a file system image
    Info(InfoArgs),
}

///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new file system")]
pub struct MkfsArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long, default_value = DEFAULT_IMAGE_FILE)]
    pub image_file_path: String,
    /// overwrite an existing image file
    #[clap(short, long)]
    pub force: bool,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount a file system")]
pub struct MountArgs {
    /// the path of the file system image file, created when missing
    #[clap(short = 'p', long, default_value = DEFAULT_IMAGE_FILE)]
    pub image_file_path: String,
    /// the mount point of the file system
    #[clap(short, long)]
    pub mount_point: String,
    /// unmount automatically when the process exits
    #[clap(short, long)]
    pub auto_unmount: bool,
}

/// inspect a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "show file system usage")]
pub struct InfoArgs {
    /// the path of the file system image file
    #[clap(short = 'p', long, default_value = DEFAULT_IMAGE_FILE)]
    pub image_file_path: String,
}
