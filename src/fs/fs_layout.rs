//! what does our filesystem look like in the memory

use log::debug;

use super::{
    BlockStore, Caller, DirectoryRecord, DirectoryTree, FileRecord, FileTable, FsError, Inode,
    InodeTable, Result, SuperBlock, ROOT_DIR, ROOT_MODE,
};

/// The whole filesystem image, owned by the mount for its lifetime.
///
/// It has the following layout, which is also the order it is persisted in:
/// - superblock
/// - inode table and its bitmap
/// - block pool and its bitmap
/// - file table
/// - directory table
#[derive(Debug, Clone, PartialEq)]
pub struct FsState {
    pub(crate) superblock: SuperBlock,
    pub(crate) inodes: InodeTable,
    pub(crate) blocks: BlockStore,
    pub(crate) files: FileTable,
    pub(crate) dirs: DirectoryTree,
}

impl FsState {
    /// a fresh image holding only the root directory, owned by `owner`
    pub fn format(owner: &Caller) -> Result<Self> {
        let mut state = FsState {
            superblock: SuperBlock::new(),
            inodes: InodeTable::default(),
            blocks: BlockStore::default(),
            files: FileTable::default(),
            dirs: DirectoryTree::default(),
        };
        state.create_root(owner)?;
        Ok(state)
    }

    /// assemble a state from tables read back from an image
    pub(crate) fn from_parts(
        superblock: SuperBlock,
        inodes: InodeTable,
        blocks: BlockStore,
        files: FileTable,
        dirs: DirectoryTree,
    ) -> Self {
        FsState {
            superblock,
            inodes,
            blocks,
            files,
            dirs,
        }
    }

    /// create root directory "/"
    fn create_root(&mut self, owner: &Caller) -> Result<()> {
        let inode = self
            .inodes
            .create_inode(libc::S_IFDIR as u32 | ROOT_MODE, owner)?;
        self.dirs.insert(ROOT_DIR, DirectoryRecord::root(inode))?;
        self.superblock.dir_count = ROOT_DIR as u32 + 1;
        debug!("created root directory on inode {inode}");
        Ok(())
    }
}

/// get the tables of this filesystem
impl FsState {
    #[inline]
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    #[inline]
    pub(crate) fn superblock_mut(&mut self) -> &mut SuperBlock {
        &mut self.superblock
    }

    #[inline]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[inline]
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    #[inline]
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    #[inline]
    pub fn dirs(&self) -> &DirectoryTree {
        &self.dirs
    }
}

/// path and slot lookups shared by the operations
impl FsState {
    /// file table slot of the file at `path`
    pub(crate) fn find_file(&self, path: &str) -> Result<usize> {
        self.files
            .find(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// directory table slot of the directory at `path`
    pub(crate) fn find_dir(&self, path: &str) -> Result<usize> {
        self.dirs
            .find(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// inode slot behind `path`, files first then directories
    pub(crate) fn inode_of(&self, path: &str) -> Result<usize> {
        if let Some(file) = self.files.find(path) {
            return Ok(self.files.get(file)?.inode);
        }
        if let Some(dir) = self.dirs.find(path) {
            return Ok(self.dirs.get(dir)?.inode);
        }
        Err(FsError::NotFound(path.to_string()))
    }

    pub(crate) fn file_record(&self, path: &str) -> Result<&FileRecord> {
        self.files.get(self.find_file(path)?)
    }

    pub(crate) fn inode(&self, index: usize) -> Result<&Inode> {
        self.inodes.get(index)
    }

    pub(crate) fn inode_mut(&mut self, index: usize) -> Result<&mut Inode> {
        self.inodes.get_mut(index)
    }

    /// keep the superblock's file count a high-water mark of the file table
    pub(crate) fn note_file_slot(&mut self, index: usize) {
        let used = index as u32 + 1;
        if used > self.superblock.file_count {
            self.superblock.file_count = used;
        }
    }

    /// the slot the next directory is appended at
    pub(crate) fn next_dir_slot(&self) -> Result<usize> {
        self.dirs.vacant(self.superblock.dir_count as usize)
    }
}
