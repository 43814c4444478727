use log::debug;

use crate::utils::time_util::{self, TimeDurationStruct};

use super::{Bitmap, Caller, FileKind, FsError, Result, BLOCK_SIZE, N_INODES};

/// metadata of one file or directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inode {
    /// file type bits and permission bits
    pub mode: u32,
    pub hard_links: u32,
    pub user_id: libc::uid_t,
    pub group_id: libc::gid_t,
    /// logical size in bytes
    pub file_size: u64,
    /// head of the block chain
    pub first_block: Option<usize>,
    /// blocks currently in the chain
    pub block_count: u32,
    pub created_at: TimeDurationStruct,
    pub accessed_at: TimeDurationStruct,
    pub modified_at: TimeDurationStruct,
    pub metadata_changed_at: TimeDurationStruct,
}

impl Inode {
    pub fn new(mode: u32, caller: &Caller) -> Self {
        let now = time_util::now();
        Inode {
            mode,
            hard_links: if FileKind::from_mode(mode) == FileKind::Directory {
                2
            } else {
                1
            },
            user_id: caller.uid,
            group_id: caller.gid,
            created_at: now,
            accessed_at: now,
            modified_at: now,
            metadata_changed_at: now,
            ..Inode::default()
        }
    }

    pub fn file_kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_kind() == FileKind::RegularFile
    }

    pub fn is_dir(&self) -> bool {
        self.file_kind() == FileKind::Directory
    }

    /// permission bits, without the file type
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn update_accessed_at(&mut self) {
        self.accessed_at = time_util::now();
    }

    pub fn update_modified_at(&mut self) {
        let now = time_util::now();
        self.metadata_changed_at = now;
        self.modified_at = now;
    }

    pub fn update_metadata_changed_at(&mut self) {
        let now = time_util::now();
        self.accessed_at = now;
        self.metadata_changed_at = now;
    }

    /// attributes reported to `FUSE` for inode number `ino`
    pub fn file_attr(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.file_size,
            blocks: self.block_count as u64,
            atime: self.accessed_at.into(),
            mtime: self.modified_at.into(),
            ctime: self.metadata_changed_at.into(),
            crtime: self.created_at.into(),
            kind: self.file_kind().into(),
            perm: self.permissions() as u16,
            nlink: self.hard_links,
            uid: self.user_id,
            gid: self.group_id,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }
}

/// the fixed inode table and its occupancy bitmap
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    bitmap: Bitmap,
    inodes: Vec<Inode>,
}

impl Default for InodeTable {
    fn default() -> Self {
        InodeTable {
            bitmap: Bitmap::new(N_INODES),
            inodes: vec![Inode::default(); N_INODES],
        }
    }
}

impl InodeTable {
    /// rebuild a table from a bitmap and all `N_INODES` slots, free ones included
    pub fn from_parts(bitmap: Bitmap, inodes: Vec<Inode>) -> Self {
        InodeTable { bitmap, inodes }
    }

    /// allocate the first free slot and initialize it for `caller`
    pub fn create_inode(&mut self, mode: u32, caller: &Caller) -> Result<usize> {
        let index = self
            .bitmap
            .allocate()
            .ok_or(FsError::ResourceExhausted("inode pool is full"))?;
        self.inodes[index] = Inode::new(mode, caller);
        debug!("allocated inode {index} with mode {mode:o}");
        Ok(index)
    }

    /// zero the record and release its slot, the block chain must be released before
    pub fn destroy_inode(&mut self, index: usize) {
        if let Some(inode) = self.inodes.get_mut(index) {
            *inode = Inode::default();
        }
        self.bitmap.release(index);
        debug!("released inode {index}");
    }

    pub fn get(&self, index: usize) -> Result<&Inode> {
        if !self.bitmap.is_occupied(index) {
            return Err(FsError::NotFound(format!("inode {index}")));
        }
        Ok(&self.inodes[index])
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Inode> {
        if !self.bitmap.is_occupied(index) {
            return Err(FsError::NotFound(format!("inode {index}")));
        }
        Ok(&mut self.inodes[index])
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// every slot, free ones included
    pub fn slots(&self) -> &[Inode] {
        &self.inodes
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.free_count()
    }
}
