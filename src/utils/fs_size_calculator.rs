//! This module contains functions to calculate the size of different fs components

use crate::fs::{codec, Result, N_BLOCKS, N_INODES};

/// calculate needed bitmap size
/// # Arguments
/// - `element_count`: the number of slots the bitmap tracks
/// # Return
/// the size of the bitmap in bytes
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::bitmap_size;
/// assert_eq!(bitmap_size(100), 13);
/// assert_eq!(bitmap_size(64), 8);
/// ```
pub const fn bitmap_size(element_count: usize) -> usize {
    element_count.div_ceil(8)
}

/// calculate the size of a table holding every slot of a fixed pool
/// # Example
/// ```
/// use chainfs::utils::fs_size_calculator::table_size;
/// assert_eq!(table_size(64, 100), 6400);
/// ```
pub const fn table_size(slots: usize, record_size: usize) -> usize {
    slots * record_size
}

/// calculate the size of a whole image
/// # Return
/// the number of bytes [codec::save_to] writes, the same for every image
pub fn image_size() -> Result<usize> {
    let sizes = codec::record_sizes()?;
    Ok(sizes.superblock
        + bitmap_size(N_INODES)
        + bitmap_size(N_BLOCKS)
        + table_size(N_INODES, sizes.inode)
        + table_size(N_BLOCKS, sizes.block)
        + table_size(N_INODES, sizes.file)
        + table_size(N_INODES, sizes.directory))
}
