use serde::{Deserialize, Serialize};

use crate::utils::{
    time_util::{self, TimeDurationStruct},
    traits::{DigestInSelf, SerializeAndDigest},
};

use super::FS_MAGIC;

/// The superblock of this filesystem
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SuperBlock {
    /// magic number
    pub magic: u32,
    /// file table slots in use, live or cleared
    pub file_count: u32,
    /// directories ever created, root included; the next one is appended here
    pub dir_count: u32,
    pub created_at: TimeDurationStruct,
    pub last_mounted_at: TimeDurationStruct,
    /// to verify the integrity of this superblock
    pub digest: [u8; 32],
}

impl SuperBlock {
    pub fn new() -> Self {
        SuperBlock {
            magic: FS_MAGIC,
            created_at: time_util::now(),
            ..Default::default()
        }
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == FS_MAGIC
    }

    pub fn update_last_mounted_at(&mut self) {
        self.last_mounted_at = time_util::now();
    }
}

impl DigestInSelf for SuperBlock {
    fn digest_field(&mut self) -> &mut [u8; 32] {
        &mut self.digest
    }
}

impl SerializeAndDigest for SuperBlock {}
