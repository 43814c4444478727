//! show what is inside an image without mounting it
use byte_unit::Byte;
use std::{fmt::Write, path::Path, time::SystemTime};

use crate::{
    fs::{codec, FsState, BLOCK_SIZE},
    utils::fs_size_calculator::image_size,
};

/// render the superblock and pool usage of `state`
pub fn describe(state: &FsState) -> anyhow::Result<String> {
    let superblock = state.superblock();
    let stats = state.statistics();
    let used_blocks = stats.total_blocks - stats.free_blocks;
    let mut out = String::new();
    writeln!(out, "magic:            {}", superblock.magic)?;
    writeln!(
        out,
        "created at:       {:?}",
        SystemTime::from(superblock.created_at)
    )?;
    writeln!(
        out,
        "last mounted at:  {:?}",
        SystemTime::from(superblock.last_mounted_at)
    )?;
    writeln!(
        out,
        "image size:       {}",
        Byte::from_bytes(image_size()? as _).get_appropriate_unit(true)
    )?;
    writeln!(
        out,
        "inodes:           {} used, {} free",
        stats.total_inodes - stats.free_inodes,
        stats.free_inodes
    )?;
    writeln!(
        out,
        "blocks:           {used_blocks} used ({}), {} free",
        Byte::from_bytes((used_blocks * BLOCK_SIZE) as _).get_appropriate_unit(true),
        stats.free_blocks
    )?;
    writeln!(
        out,
        "files:            {} live, {} slots used",
        stats.files, superblock.file_count
    )?;
    writeln!(
        out,
        "directories:      {} live, {} slots used",
        stats.directories, superblock.dir_count
    )?;
    Ok(out)
}

/// load the image at `image_file_path` and print its summary
pub fn info<P>(image_file_path: P) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let state = codec::load(image_file_path)?;
    print!("{}", describe(&state)?);
    Ok(())
}
