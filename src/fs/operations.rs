//! Path based operations on the filesystem image.
//!
//! Every operation checks all of its preconditions before touching any table, so a
//! failed call leaves the image exactly as it was.

use log::{debug, warn};

use crate::utils::time_util::TimeDurationStruct;

use super::{
    leaf_name, parent_path, permission, Access, Caller, DirectoryRecord, FileKind, FileRecord,
    FsError, FsState, Inode, Result, BLOCK_SIZE, FS_FILENAME_LEN, MAX_DEPTH_DIR, N_BLOCKS_INODE,
    ROOT_DIR,
};

/// one name listed in a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
    pub inode: usize,
}

/// usage of the fixed pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStatistics {
    pub total_inodes: usize,
    pub free_inodes: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    pub files: usize,
    pub directories: usize,
}

fn check_path_len(path: &str) -> Result<()> {
    if path.len() >= FS_FILENAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

fn with_kind(mode: u32, kind: libc::mode_t) -> u32 {
    (mode & !(libc::S_IFMT as u32)) | kind as u32
}

/// `path` is `name` directly below `parent_path`
fn names_match(path: &str, name: &str, parent: &str) -> bool {
    parent_path(path) == Some(parent) && leaf_name(path) == name
}

fn blocks_for(size: u64) -> usize {
    (size as usize).div_ceil(BLOCK_SIZE)
}

/// file lifecycle
impl FsState {
    /// Create an empty regular file at `path`, returning its inode slot.
    pub fn create_file(&mut self, path: &str, mode: u32, caller: &Caller) -> Result<usize> {
        let dir = self.dirs.resolve_parent(path)?;
        let (dir_inode, has_room) = {
            let record = self.dirs.get(dir)?;
            (record.inode, record.has_free_member_slot())
        };
        permission::require(self.inode(dir_inode)?, caller, Access::Write)?;
        if self.files.find(path).is_some() || self.dirs.find(path).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        check_path_len(path)?;
        if !has_room {
            return Err(FsError::ResourceExhausted("directory member list is full"));
        }
        self.files.next_free()?;
        if self.inodes.free_count() == 0 {
            return Err(FsError::ResourceExhausted("inode pool is full"));
        }

        let inode = self
            .inodes
            .create_inode(with_kind(mode, libc::S_IFREG), caller)?;
        let slot = self.files.insert(FileRecord {
            path: path.to_string(),
            name: leaf_name(path).to_string(),
            inode,
        })?;
        self.dirs.get_mut(dir)?.add_member(slot)?;
        self.note_file_slot(slot);
        self.inode_mut(dir_inode)?.update_modified_at();
        debug!("created file {path} on inode {inode}");
        Ok(inode)
    }

    /// The whole content of the file at `path`.
    pub fn read(&mut self, path: &str, caller: &Caller) -> Result<Vec<u8>> {
        let index = self.file_record(path)?.inode;
        let inode = self.inodes.get(index)?;
        permission::require(inode, caller, Access::Read)?;
        let content = self.blocks.read_all(inode)?;
        self.inode_mut(index)?.update_accessed_at();
        Ok(content)
    }

    /// Append `data` to the file at `path`, returning the bytes written.
    ///
    /// The write lands after the current content whatever offset the caller had in
    /// mind; only [FsState::truncate] rewinds a file.
    pub fn write(&mut self, path: &str, data: &[u8], caller: &Caller) -> Result<usize> {
        let index = self.file_record(path)?.inode;
        permission::require(self.inode(index)?, caller, Access::Write)?;
        let inode = self.inodes.get_mut(index)?;
        let written = self.blocks.append_bytes(inode, data)?;
        if written > 0 {
            inode.update_modified_at();
        }
        debug!("wrote {written}/{} bytes to {path}", data.len());
        Ok(written)
    }

    /// Drop the whole content of the file at `path`.
    pub fn truncate(&mut self, path: &str) -> Result<()> {
        let index = self.file_record(path)?.inode;
        let inode = self.inodes.get_mut(index)?;
        self.blocks.release_chain(inode);
        inode.update_modified_at();
        Ok(())
    }

    /// Set the size of the file at `path` to `len`.
    ///
    /// Shrinking rewrites the kept prefix into a fresh chain, growing appends zeros.
    pub fn resize(&mut self, path: &str, len: u64) -> Result<()> {
        let index = self.file_record(path)?.inode;
        let inode = self.inodes.get(index)?;
        let size = inode.file_size;

        if len == size {
            return Ok(());
        }
        if len == 0 {
            return self.truncate(path);
        }
        if len < size {
            let kept = self.blocks.read_all(inode)?[..len as usize].to_vec();
            let inode = self.inodes.get_mut(index)?;
            self.blocks.release_chain(inode);
            self.blocks.append_bytes(inode, &kept)?;
            inode.update_modified_at();
            return Ok(());
        }

        if blocks_for(len) > N_BLOCKS_INODE {
            return Err(FsError::ResourceExhausted("file reached its block limit"));
        }
        let needed = blocks_for(len).saturating_sub(inode.block_count as usize);
        if needed > self.blocks.free_count() {
            return Err(FsError::ResourceExhausted("block pool is full"));
        }
        let inode = self.inodes.get_mut(index)?;
        self.blocks
            .append_bytes(inode, &vec![0u8; (len - size) as usize])?;
        inode.update_modified_at();
        Ok(())
    }

    /// Remove the file at `path` together with its content.
    pub fn unlink(&mut self, path: &str, caller: &Caller) -> Result<()> {
        let slot = self.find_file(path)?;
        let dir = self.dirs.resolve_parent(path)?;
        let dir_inode = self.dirs.get(dir)?.inode;
        permission::require(self.inode(dir_inode)?, caller, Access::Write)?;

        self.dirs.get_mut(dir)?.remove_member(slot);
        self.release_file(slot);
        self.inode_mut(dir_inode)?.update_modified_at();
        debug!("unlinked {path}");
        Ok(())
    }

    /// release the chain and inode of a file and clear its record
    fn release_file(&mut self, slot: usize) {
        let Some(record) = self.files.remove(slot) else {
            return;
        };
        if let Ok(inode) = self.inodes.get_mut(record.inode) {
            self.blocks.release_chain(inode);
        }
        self.inodes.destroy_inode(record.inode);
    }
}

/// directory lifecycle
impl FsState {
    /// Create a directory at `path`, returning its directory table slot.
    pub fn create_directory(&mut self, path: &str, mode: u32, caller: &Caller) -> Result<usize> {
        let parent = self.dirs.resolve_parent(path)?;
        let (parent_inode, parent_depth) = {
            let record = self.dirs.get(parent)?;
            (record.inode, record.depth)
        };
        permission::require(self.inode(parent_inode)?, caller, Access::Write)?;
        if parent_depth >= MAX_DEPTH_DIR {
            return Err(FsError::DepthExceeded);
        }
        check_path_len(path)?;
        if self.files.find(path).is_some() || self.dirs.find(path).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let index = self.next_dir_slot()?;
        if self.inodes.free_count() == 0 {
            return Err(FsError::ResourceExhausted("inode pool is full"));
        }

        let inode = self
            .inodes
            .create_inode(with_kind(mode, libc::S_IFDIR), caller)?;
        self.dirs.insert(
            index,
            DirectoryRecord::new(path, inode, Some(parent), parent_depth + 1),
        )?;
        self.superblock.dir_count += 1;
        let parent_inode = self.inode_mut(parent_inode)?;
        parent_inode.hard_links += 1;
        parent_inode.update_modified_at();
        debug!("created directory {path} at depth {}", parent_depth + 1);
        Ok(index)
    }

    /// Remove the directory at `path`, with every file and directory below it.
    pub fn remove_directory(&mut self, path: &str, caller: &Caller) -> Result<()> {
        let index = self.find_dir(path)?;
        let parent = match self.dirs.get(index)?.parent {
            Some(parent) if index != ROOT_DIR => parent,
            _ => return Err(FsError::PermissionDenied),
        };
        let parent_inode = self.dirs.get(parent)?.inode;
        permission::require(self.inode(parent_inode)?, caller, Access::Write)?;

        // children first, so no record ever points at a cleared parent
        for dir in self.dirs.subtree(index).into_iter().rev() {
            let Some(record) = self.dirs.remove(dir) else {
                continue;
            };
            for file in record.member_files() {
                self.release_file(file);
            }
            self.inodes.destroy_inode(record.inode);
        }

        let parent_inode = self.inode_mut(parent_inode)?;
        parent_inode.hard_links = parent_inode.hard_links.saturating_sub(1);
        parent_inode.update_modified_at();
        debug!("removed directory {path}");
        Ok(())
    }

    /// Member files and child directories of the directory at `path`, in table order.
    ///
    /// Both sequences are lazy and can be cloned to walk them again.
    #[allow(clippy::type_complexity)]
    pub fn list_children(
        &self,
        path: &str,
    ) -> Result<(
        impl Iterator<Item = &FileRecord> + Clone + '_,
        impl Iterator<Item = &DirectoryRecord> + Clone + '_,
    )> {
        let index = self.find_dir(path)?;
        let record = self.dirs.get(index)?;
        let files = record
            .member_files()
            .filter_map(move |slot| self.files.get(slot).ok());
        let dirs = self
            .dirs
            .child_dirs(index)
            .filter_map(move |child| self.dirs.get(child).ok());
        Ok((files, dirs))
    }

    /// names below the directory at `path`, files before directories
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let (files, dirs) = self.list_children(path)?;
        let files = files.map(|file| DirEntry {
            name: file.name.clone(),
            kind: FileKind::RegularFile,
            inode: file.inode,
        });
        let dirs = dirs.map(|dir| DirEntry {
            name: dir.name.clone(),
            kind: FileKind::Directory,
            inode: dir.inode,
        });
        Ok(files.chain(dirs).collect())
    }
}

/// metadata
impl FsState {
    /// Change the permission bits at `path`.
    ///
    /// The bits change only when `caller` owns the inode, the access and status
    /// change times are stamped either way.
    pub fn chmod(&mut self, path: &str, mode: u32, caller: &Caller) -> Result<()> {
        let index = self.inode_of(path)?;
        let inode = self.inode_mut(index)?;
        if caller.uid == inode.user_id {
            inode.mode = (inode.mode & libc::S_IFMT as u32) | (mode & 0o7777);
        } else {
            warn!(
                "chmod {path} by uid {} ignored, owner is {}",
                caller.uid, inode.user_id
            );
        }
        inode.update_metadata_changed_at();
        Ok(())
    }

    /// Change the owner and/or group at `path`, `None` leaves a field unchanged.
    pub fn chown(
        &mut self,
        path: &str,
        uid: Option<libc::uid_t>,
        gid: Option<libc::gid_t>,
    ) -> Result<()> {
        let index = self.inode_of(path)?;
        let inode = self.inode_mut(index)?;
        if let Some(uid) = uid {
            inode.user_id = uid;
        }
        if let Some(gid) = gid {
            inode.group_id = gid;
        }
        inode.update_metadata_changed_at();
        Ok(())
    }

    /// Set the access and/or modification time at `path`.
    pub fn set_times(
        &mut self,
        path: &str,
        accessed_at: Option<TimeDurationStruct>,
        modified_at: Option<TimeDurationStruct>,
    ) -> Result<()> {
        let index = self.inode_of(path)?;
        let inode = self.inode_mut(index)?;
        inode.metadata_changed_at = crate::utils::time_util::now();
        if let Some(accessed_at) = accessed_at {
            inode.accessed_at = accessed_at;
        }
        if let Some(modified_at) = modified_at {
            inode.modified_at = modified_at;
        }
        Ok(())
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.files.find(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.find(path).is_some()
    }

    /// inode slot behind `path`
    pub fn lookup(&self, path: &str) -> Result<usize> {
        self.inode_of(path)
    }

    pub fn attributes(&self, path: &str) -> Result<&Inode> {
        self.inode(self.inode_of(path)?)
    }

    /// path of the file or directory stored on inode slot `index`
    pub fn path_of_inode(&self, index: usize) -> Result<&str> {
        if let Some(file) = self.files.find_by_inode(index) {
            return Ok(&file.path);
        }
        if let Some(dir) = self.dirs.find_by_inode(index) {
            return Ok(&dir.path);
        }
        Err(FsError::NotFound(format!("inode {index}")))
    }

    pub fn check_access(&self, path: &str, caller: &Caller, access: Access) -> Result<()> {
        permission::require(self.attributes(path)?, caller, access)
    }

    pub fn statistics(&self) -> FsStatistics {
        FsStatistics {
            total_inodes: self.inodes.bitmap().len(),
            free_inodes: self.inodes.free_count(),
            total_blocks: self.blocks.bitmap().len(),
            free_blocks: self.blocks.free_count(),
            files: self.files.len(),
            directories: self.dirs.len(),
        }
    }
}

/// consistency
impl FsState {
    /// Check that every table agrees with every other one.
    ///
    /// Occupied inodes and blocks must be exactly those reachable from live records,
    /// chains must be bounded and disjoint, every file must belong to exactly one
    /// directory, and every directory must hang below a live parent one level up.
    pub fn verify(&self) -> Result<()> {
        self.verify_tables().map_err(|err| match err {
            FsError::NotFound(what) => FsError::CorruptImage(format!("dangling {what}")),
            other => other,
        })
    }

    fn verify_tables(&self) -> Result<()> {
        let corrupt = |what: String| -> Result<()> { Err(FsError::CorruptImage(what)) };

        if !self.superblock.has_valid_magic() {
            return corrupt(format!("bad magic {}", self.superblock.magic));
        }
        let root = self.dirs.root()?;
        if root.parent.is_some() || root.depth != 1 || root.path != "/" {
            return corrupt("malformed root directory".to_string());
        }

        let mut inode_refs = vec![false; self.inodes.slots().len()];
        let mut block_refs = vec![false; self.blocks.slots().len()];
        let mut claim_inode = |index: usize, owner: &str| -> Result<()> {
            match inode_refs.get_mut(index) {
                Some(seen) if !*seen => {
                    *seen = true;
                    Ok(())
                }
                _ => Err(FsError::CorruptImage(format!(
                    "{owner} claims inode {index} twice or out of range"
                ))),
            }
        };

        let mut membership = vec![0usize; self.files.slots().len()];
        let mut owner_dir = vec![ROOT_DIR; self.files.slots().len()];
        for (index, dir) in self.dirs.iter() {
            claim_inode(dir.inode, &dir.path)?;
            if dir.index != index || !self.inodes.get(dir.inode)?.is_dir() {
                return corrupt(format!("directory record {index} is inconsistent"));
            }
            if let Some(parent) = dir.parent {
                let parent = self.dirs.get(parent)?;
                if parent.depth.checked_add(1) != Some(dir.depth) || dir.depth > MAX_DEPTH_DIR {
                    return corrupt(format!("{} has depth {}", dir.path, dir.depth));
                }
                if !names_match(&dir.path, &dir.name, &parent.path) {
                    return corrupt(format!("{} does not sit below {}", dir.path, parent.path));
                }
            } else if index != ROOT_DIR {
                return corrupt(format!("{} has no parent", dir.path));
            }
            for slot in dir.member_files() {
                self.files.get(slot)?;
                membership[slot] += 1;
                owner_dir[slot] = index;
            }
        }

        for (slot, file) in self.files.iter() {
            claim_inode(file.inode, &file.path)?;
            if membership[slot] != 1 {
                return corrupt(format!(
                    "{} belongs to {} directories",
                    file.path, membership[slot]
                ));
            }
            let owner = self.dirs.get(owner_dir[slot])?;
            if !names_match(&file.path, &file.name, &owner.path) {
                return corrupt(format!("{} is listed by {}", file.path, owner.path));
            }
            let inode = self.inodes.get(file.inode)?;
            if !inode.is_regular_file() {
                return corrupt(format!("{} is not a regular file", file.path));
            }
            for block in self.blocks.chain_indices(inode)? {
                if std::mem::replace(&mut block_refs[block], true) {
                    return corrupt(format!("block {block} is shared"));
                }
            }
            self.blocks.read_all(inode)?;
        }

        let referenced_inodes = inode_refs.iter().filter(|&&seen| seen).count();
        if referenced_inodes != self.inodes.bitmap().occupied_count() {
            return corrupt(format!(
                "{} inodes allocated, {referenced_inodes} referenced",
                self.inodes.bitmap().occupied_count()
            ));
        }
        let referenced_blocks = block_refs.iter().filter(|&&seen| seen).count();
        if referenced_blocks != self.blocks.bitmap().occupied_count() {
            return corrupt(format!(
                "{} blocks allocated, {referenced_blocks} referenced",
                self.blocks.bitmap().occupied_count()
            ));
        }

        let file_high = self.files.iter().map(|(slot, _)| slot + 1).max();
        let dir_high = self.dirs.iter().map(|(slot, _)| slot + 1).max();
        if file_high.unwrap_or(0) > self.superblock.file_count as usize
            || dir_high.unwrap_or(0) > self.superblock.dir_count as usize
        {
            return corrupt("superblock counts are behind the tables".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{N_BLOCKS, N_FILES_DIR, N_INODES};

    const FILE: u32 = libc::S_IFREG as u32 | 0o644;
    const DIR: u32 = libc::S_IFDIR as u32 | 0o755;

    fn owner() -> Caller {
        Caller::new(1000, 1000)
    }

    fn fresh() -> FsState {
        FsState::format(&owner()).unwrap()
    }

    #[test]
    fn test_mkdir_create_write_read_unlink() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        let dir = fs.create_directory("/a", DIR, &me)?;
        assert_eq!(fs.dirs().get(dir)?.depth, 2);

        fs.create_file("/a/f", FILE, &me)?;
        assert!(fs.is_file("/a/f"));
        assert_eq!(fs.write("/a/f", b"hello", &me)?, 5);
        assert_eq!(fs.read("/a/f", &me)?, b"hello");
        assert_eq!(fs.attributes("/a/f")?.file_size, 5);

        fs.unlink("/a/f", &me)?;
        assert!(matches!(fs.read("/a/f", &me), Err(FsError::NotFound(_))));
        assert_eq!(fs.dirs().get(dir)?.member_files().count(), 0);
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_writes_append_regardless_of_offset() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        fs.write("/f", b"first ", &me)?;
        fs.write("/f", b"second", &me)?;
        assert_eq!(fs.read("/f", &me)?, b"first second");

        fs.truncate("/f")?;
        assert_eq!(fs.attributes("/f")?.file_size, 0);
        assert!(fs.read("/f", &me)?.is_empty());
        fs.write("/f", b"again", &me)?;
        assert_eq!(fs.read("/f", &me)?, b"again");
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_create_denied_leaves_tables_unchanged() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_directory("/locked", libc::S_IFDIR as u32 | 0o555, &me)?;
        let before = fs.clone();

        assert!(matches!(
            fs.create_file("/locked/f", FILE, &me),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.create_directory("/locked/d", DIR, &me),
            Err(FsError::PermissionDenied)
        ));
        assert_eq!(fs, before);
        Ok(())
    }

    #[test]
    fn test_depth_limit() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        let mut path = String::new();
        // depths 2..=7
        for depth in 2..MAX_DEPTH_DIR {
            path.push_str("/d");
            let index = fs.create_directory(&path, DIR, &me)?;
            assert_eq!(fs.dirs().get(index)?.depth, depth);
        }
        // under a depth 7 parent
        path.push_str("/d");
        let index = fs.create_directory(&path, DIR, &me)?;
        assert_eq!(fs.dirs().get(index)?.depth, MAX_DEPTH_DIR);

        // under a depth 8 parent
        let before = fs.clone();
        assert!(matches!(
            fs.create_directory(&format!("{path}/d"), DIR, &me),
            Err(FsError::DepthExceeded)
        ));
        assert_eq!(fs, before);
        Ok(())
    }

    #[test]
    fn test_per_file_block_cap() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/big", FILE, &me)?;
        let chunk = vec![b'x'; BLOCK_SIZE * N_BLOCKS_INODE - 10];
        assert_eq!(fs.write("/big", &chunk, &me)?, chunk.len());
        assert_eq!(fs.write("/big", &[b'y'; 100], &me)?, 10);
        assert_eq!(fs.attributes("/big")?.block_count as usize, N_BLOCKS_INODE);
        assert!(matches!(
            fs.write("/big", b"z", &me),
            Err(FsError::ResourceExhausted(_))
        ));
        assert_eq!(fs.attributes("/big")?.block_count as usize, N_BLOCKS_INODE);
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_create_errors() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        fs.create_directory("/d", DIR, &me)?;
        assert!(matches!(
            fs.create_file("/f", FILE, &me),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.create_file("/d", FILE, &me),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.create_directory("/f", DIR, &me),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.create_file("/missing/f", FILE, &me),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            fs.create_file("no-slash", FILE, &me),
            Err(FsError::NotFound(_))
        ));

        let long = format!("/{}", "n".repeat(FS_FILENAME_LEN - 1));
        assert_eq!(long.len(), FS_FILENAME_LEN);
        assert!(matches!(
            fs.create_file(&long, FILE, &me),
            Err(FsError::NameTooLong)
        ));
        assert!(matches!(
            fs.create_directory(&long, DIR, &me),
            Err(FsError::NameTooLong)
        ));
        fs.create_file(&long[..FS_FILENAME_LEN - 1], FILE, &me)?;
        Ok(())
    }

    #[test]
    fn test_directory_member_list_full() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        for i in 0..N_FILES_DIR {
            fs.create_file(&format!("/f{i}"), FILE, &me)?;
        }
        let before = fs.clone();
        assert!(matches!(
            fs.create_file("/one-more", FILE, &me),
            Err(FsError::ResourceExhausted(_))
        ));
        assert_eq!(fs, before);

        // a removed member slot is reused
        fs.unlink("/f3", &me)?;
        fs.create_file("/one-more", FILE, &me)?;
        let names: Vec<_> = fs.read_dir("/")?.into_iter().map(|e| e.name).collect();
        assert_eq!(names[3], "one-more");
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_inode_pool_exhausted() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        // the root holds one inode, each directory holds one plus its files
        let mut created = 1;
        'outer: for d in 0.. {
            let dir = format!("/d{d}");
            fs.create_directory(&dir, DIR, &me)?;
            created += 1;
            for f in 0..N_FILES_DIR {
                if created == N_INODES {
                    break 'outer;
                }
                fs.create_file(&format!("{dir}/f{f}"), FILE, &me)?;
                created += 1;
            }
        }
        assert_eq!(fs.statistics().free_inodes, 0);
        assert!(matches!(
            fs.create_directory("/late", DIR, &me),
            Err(FsError::ResourceExhausted(_))
        ));
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_block_pool_exhausted_keeps_prefix() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        let files = N_BLOCKS / N_BLOCKS_INODE;
        for i in 0..files {
            let path = format!("/f{i}");
            fs.create_file(&path, FILE, &me)?;
            let written = fs.write(&path, &vec![1u8; BLOCK_SIZE * N_BLOCKS_INODE - 1], &me)?;
            assert_eq!(written, BLOCK_SIZE * N_BLOCKS_INODE - 1);
        }
        assert_eq!(fs.statistics().free_blocks, 0);

        fs.create_file("/tail", FILE, &me)?;
        assert!(matches!(
            fs.write("/tail", b"x", &me),
            Err(FsError::ResourceExhausted(_))
        ));
        // the last free byte of an existing chain still takes one byte
        assert_eq!(fs.write("/f0", b"ab", &me)?, 1);
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_permission_checks_on_read_and_write() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        let stranger = Caller::new(2000, 2000);
        fs.create_file("/f", libc::S_IFREG as u32 | 0o600, &me)?;
        fs.write("/f", b"secret", &me)?;
        assert!(matches!(
            fs.read("/f", &stranger),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.write("/f", b"!", &stranger),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.unlink("/f", &Caller::new(0, 0)),
            Err(FsError::PermissionDenied)
        ));
        assert!(fs.check_access("/f", &me, Access::Write).is_ok());
        assert_eq!(fs.read("/f", &me)?, b"secret");
        Ok(())
    }

    #[test]
    fn test_remove_directory_is_recursive() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_directory("/a", DIR, &me)?;
        fs.create_directory("/a/b", DIR, &me)?;
        fs.create_file("/a/f", FILE, &me)?;
        fs.create_file("/a/b/g", FILE, &me)?;
        fs.write("/a/b/g", &[9u8; BLOCK_SIZE + 1], &me)?;
        fs.create_file("/keep", FILE, &me)?;
        let root_links = fs.attributes("/")?.hard_links;

        fs.remove_directory("/a", &me)?;
        assert!(!fs.is_dir("/a"));
        assert!(!fs.is_dir("/a/b"));
        assert!(!fs.is_file("/a/f"));
        assert!(!fs.is_file("/a/b/g"));
        assert!(fs.is_file("/keep"));
        assert_eq!(fs.attributes("/")?.hard_links, root_links - 1);

        let stats = fs.statistics();
        assert_eq!(stats.free_blocks, N_BLOCKS);
        assert_eq!(stats.free_inodes, N_INODES - 2);
        assert_eq!((stats.files, stats.directories), (1, 1));
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_remove_directory_errors() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        assert!(matches!(
            fs.remove_directory("/", &me),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            fs.remove_directory("/missing", &me),
            Err(FsError::NotFound(_))
        ));
        fs.create_directory("/a", DIR, &me)?;
        assert!(matches!(
            fs.remove_directory("/a", &Caller::new(2000, 2000)),
            Err(FsError::PermissionDenied)
        ));
        assert!(fs.is_dir("/a"));
        Ok(())
    }

    #[test]
    fn test_file_slots_are_reused_directories_are_appended() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/a", FILE, &me)?;
        fs.create_file("/b", FILE, &me)?;
        fs.create_directory("/d", DIR, &me)?;
        assert_eq!(fs.superblock().file_count, 2);
        assert_eq!(fs.superblock().dir_count, 2);

        fs.unlink("/a", &me)?;
        fs.remove_directory("/d", &me)?;
        assert_eq!(fs.superblock().file_count, 2);
        assert_eq!(fs.superblock().dir_count, 2);

        fs.create_file("/c", FILE, &me)?;
        assert_eq!(fs.files().find("/c"), Some(0));
        assert_eq!(fs.superblock().file_count, 2);
        assert_eq!(fs.create_directory("/e", DIR, &me)?, 2);
        assert_eq!(fs.superblock().dir_count, 3);
        assert!(fs.dirs().get(1).is_err());
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_directory_index_is_the_directory_count() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        assert_eq!(fs.create_directory("/a", DIR, &me)?, 1);
        assert_eq!(fs.create_directory("/b", DIR, &me)?, 2);
        fs.remove_directory("/a", &me)?;
        assert_eq!(fs.create_directory("/c", DIR, &me)?, 3);
        assert_eq!(fs.dirs().get(3)?.index, 3);
        assert_eq!(fs.superblock().dir_count, 4);
        Ok(())
    }

    #[test]
    fn test_directory_table_fills_up_without_reuse() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        for _ in 1..N_INODES {
            fs.create_directory("/d", DIR, &me)?;
            fs.remove_directory("/d", &me)?;
        }
        assert_eq!(fs.superblock().dir_count as usize, N_INODES);
        let before = fs.clone();
        assert!(matches!(
            fs.create_directory("/d", DIR, &me),
            Err(FsError::ResourceExhausted(_))
        ));
        assert!(fs == before);
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_list_children_in_table_order() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/x", FILE, &me)?;
        fs.create_directory("/sub", DIR, &me)?;
        fs.create_file("/y", FILE, &me)?;
        fs.create_file("/sub/z", FILE, &me)?;

        let (files, dirs) = fs.list_children("/")?;
        let names: Vec<_> = files.clone().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(files.count(), 2);
        assert_eq!(
            dirs.map(|d| d.path.as_str()).collect::<Vec<_>>(),
            vec!["/sub"]
        );

        let entries = fs.read_dir("/sub")?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "z");
        assert_eq!(entries[0].kind, FileKind::RegularFile);
        assert!(matches!(fs.read_dir("/x"), Err(FsError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_chmod_only_by_owner() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;

        let stale = TimeDurationStruct { sec: 1, nsec: 0 };
        let inode = fs.lookup("/f")?;
        fs.inode_mut(inode)?.accessed_at = stale;
        fs.inode_mut(inode)?.metadata_changed_at = stale;
        fs.chmod("/f", 0o600, &Caller::new(2000, 2000))?;
        let attrs = fs.attributes("/f")?;
        assert_eq!(attrs.permissions(), 0o644);
        assert_ne!(attrs.accessed_at, stale);
        assert_ne!(attrs.metadata_changed_at, stale);

        fs.chmod("/f", 0o600, &me)?;
        assert_eq!(fs.attributes("/f")?.permissions(), 0o600);
        assert!(fs.attributes("/f")?.is_regular_file());

        fs.chmod("/", 0o700, &me)?;
        assert_eq!(fs.attributes("/")?.permissions(), 0o700);
        assert!(fs.attributes("/")?.is_dir());
        Ok(())
    }

    #[test]
    fn test_chown_leaves_unset_fields() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        fs.chown("/f", Some(42), None)?;
        let inode = fs.attributes("/f")?;
        assert_eq!((inode.user_id, inode.group_id), (42, 1000));

        fs.chown("/f", None, Some(7))?;
        let inode = fs.attributes("/f")?;
        assert_eq!((inode.user_id, inode.group_id), (42, 7));
        assert!(matches!(
            fs.chown("/nope", Some(1), Some(1)),
            Err(FsError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_resize() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        let data: Vec<u8> = (0..BLOCK_SIZE * 3).map(|i| i as u8).collect();
        fs.write("/f", &data, &me)?;

        fs.resize("/f", 300)?;
        assert_eq!(fs.read("/f", &me)?, &data[..300]);
        assert_eq!(fs.attributes("/f")?.block_count, 2);

        fs.resize("/f", 310)?;
        let mut grown = data[..300].to_vec();
        grown.extend_from_slice(&[0u8; 10]);
        assert_eq!(fs.read("/f", &me)?, grown);

        assert!(matches!(
            fs.resize("/f", (BLOCK_SIZE * N_BLOCKS_INODE + 1) as u64),
            Err(FsError::ResourceExhausted(_))
        ));
        assert_eq!(fs.attributes("/f")?.file_size, 310);

        fs.resize("/f", 0)?;
        assert_eq!(fs.attributes("/f")?.block_count, 0);
        fs.verify()?;
        Ok(())
    }

    #[test]
    fn test_lookup_and_path_of_inode() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_directory("/d", DIR, &me)?;
        let inode = fs.create_file("/d/f", FILE, &me)?;
        assert_eq!(fs.lookup("/d/f")?, inode);
        assert_eq!(fs.path_of_inode(inode)?, "/d/f");
        assert_eq!(fs.path_of_inode(fs.lookup("/d")?)?, "/d");
        assert_eq!(fs.path_of_inode(0)?, "/");
        assert!(matches!(
            fs.path_of_inode(N_INODES - 1),
            Err(FsError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_set_times() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        let stamp = TimeDurationStruct { sec: 42, nsec: 7 };
        fs.set_times("/f", None, Some(stamp))?;
        assert_eq!(fs.attributes("/f")?.modified_at, stamp);
        assert_ne!(fs.attributes("/f")?.accessed_at, stamp);
        fs.set_times("/f", Some(stamp), None)?;
        assert_eq!(fs.attributes("/f")?.accessed_at, stamp);
        Ok(())
    }

    #[test]
    fn test_verify_detects_leaked_block() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_file("/f", FILE, &me)?;
        fs.write("/f", b"data", &me)?;
        fs.verify()?;

        // detach the chain without releasing its block
        let index = fs.lookup("/f")?;
        let inode = fs.inode_mut(index)?;
        inode.first_block = None;
        inode.block_count = 0;
        inode.file_size = 0;
        assert!(matches!(fs.verify(), Err(FsError::CorruptImage(_))));
        Ok(())
    }

    #[test]
    fn test_verify_detects_misplaced_paths() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_directory("/a", DIR, &me)?;
        fs.create_directory("/b", DIR, &me)?;
        fs.create_file("/a/f", FILE, &me)?;
        fs.verify()?;

        // a directory whose path names another parent
        let mut moved = fs.clone();
        moved.dirs.get_mut(2)?.path = "/a/b".to_string();
        assert!(matches!(moved.verify(), Err(FsError::CorruptImage(_))));

        // a file listed by a directory that is not its parent
        let mut moved = fs.clone();
        let slot = moved.find_file("/a/f")?;
        moved.dirs.get_mut(1)?.remove_member(slot);
        moved.dirs.get_mut(2)?.add_member(slot)?;
        assert!(matches!(moved.verify(), Err(FsError::CorruptImage(_))));
        Ok(())
    }

    #[test]
    fn test_verify_survives_extreme_depth() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        fs.create_directory("/a", DIR, &me)?;
        fs.create_directory("/a/b", DIR, &me)?;

        // move "/a" after its child and give it the largest depth
        let mut parent = fs.dirs.remove(1).ok_or_else(|| anyhow::anyhow!("no /a"))?;
        parent.depth = u32::MAX;
        fs.dirs.insert(3, parent)?;
        fs.dirs.get_mut(2)?.parent = Some(3);
        fs.superblock.dir_count = 4;
        assert!(matches!(fs.verify(), Err(FsError::CorruptImage(_))));
        Ok(())
    }

    #[test]
    fn test_random_create_unlink_keeps_bitmaps_in_step() -> anyhow::Result<()> {
        let mut fs = fresh();
        let me = owner();
        // a fixed pseudo random walk over create, write and unlink
        let mut seed: u32 = 12345;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let path = format!("/f{}", (seed >> 16) % 12);
            let len = ((seed >> 8) % 700) as usize;
            if fs.is_file(&path) {
                if seed % 3 == 0 {
                    fs.unlink(&path, &me)?;
                } else {
                    let _ = fs.write(&path, &vec![1u8; len], &me);
                }
            } else {
                fs.create_file(&path, FILE, &me)?;
            }
            fs.verify()?;
        }
        Ok(())
    }
}
