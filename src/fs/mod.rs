//! our in-memory filesystem image and the operations on it
pub mod bitmap;
pub mod block;
pub mod codec;
pub mod directory;
pub mod error;
pub mod file_table;
pub mod filekind;
pub mod fs_layout;
pub mod inode;
pub mod permission;
pub mod superblock;
mod fs_api_impl;
mod operations;
pub use bitmap::*;
pub use block::*;
pub use directory::*;
pub use error::*;
pub use file_table::*;
pub use filekind::*;
pub use fs_api_impl::MountedFs;
pub use fs_layout::*;
pub use inode::*;
pub use operations::{DirEntry, FsStatistics};
pub use permission::*;
pub use superblock::*;

pub const FS_MAGIC: u32 = 123456;
/// bytes of content a single data block holds
pub const BLOCK_SIZE: usize = 256;
pub const N_BLOCKS: usize = 256;
/// capacity of the inode table, and of the file and directory tables
pub const N_INODES: usize = 64;
/// member files one directory can hold
pub const N_FILES_DIR: usize = 16;
/// blocks one file can hold, so a file is at most 4096 bytes
pub const N_BLOCKS_INODE: usize = 16;
/// a path must be strictly shorter than this
pub const FS_FILENAME_LEN: usize = 64;
pub const MAX_DEPTH_DIR: u32 = 8;
/// slot of "/" in the directory table
pub const ROOT_DIR: usize = 0;
/// `FUSE` inode number of "/"
pub const ROOT_INODE: u64 = 1;
pub const ROOT_MODE: u32 = 0o755;
pub const DEFAULT_IMAGE_FILE: &str = "filesystem.img";
