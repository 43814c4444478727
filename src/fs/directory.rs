//! The flat directory table.
//!
//! Directories are not nested structures: each record names its parent by slot and
//! carries its own depth, and membership of regular files is a fixed list of file
//! table slots inside the owning directory's record.

use log::debug;

use super::{FsError, Result, N_FILES_DIR, N_INODES, ROOT_DIR};

/// one directory of the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// slot of this record in the directory table
    pub index: usize,
    pub path: String,
    pub name: String,
    pub inode: usize,
    /// file table slots of member files, `None` where a member was removed
    pub members: Vec<Option<usize>>,
    /// `None` only for the root
    pub parent: Option<usize>,
    /// root is at depth 1
    pub depth: u32,
}

impl DirectoryRecord {
    pub fn new(path: &str, inode: usize, parent: Option<usize>, depth: u32) -> Self {
        DirectoryRecord {
            index: 0,
            path: path.to_string(),
            name: leaf_name(path).to_string(),
            inode,
            members: vec![None; N_FILES_DIR],
            parent,
            depth,
        }
    }

    /// the root directory "/"
    pub fn root(inode: usize) -> Self {
        DirectoryRecord {
            name: "/".to_string(),
            ..DirectoryRecord::new("/", inode, None, 1)
        }
    }

    pub fn has_free_member_slot(&self) -> bool {
        self.members.iter().any(Option::is_none)
    }

    /// record `file` as a member in the first removed or unused slot
    pub fn add_member(&mut self, file: usize) -> Result<()> {
        let slot = self
            .members
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(FsError::ResourceExhausted("directory member list is full"))?;
        *slot = Some(file);
        Ok(())
    }

    /// mark the slot holding `file` removed, returning whether it was a member
    pub fn remove_member(&mut self, file: usize) -> bool {
        match self.members.iter_mut().find(|slot| **slot == Some(file)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// live member file slots in list order
    pub fn member_files(&self) -> impl Iterator<Item = usize> + Clone + '_ {
        self.members.iter().flatten().copied()
    }
}

/// everything before the last slash, "/" for a top level entry
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/')? {
        0 => Some("/"),
        i => Some(&path[..i]),
    }
}

/// everything after the last slash
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// the directory table, root at slot [ROOT_DIR]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTree {
    slots: Vec<Option<DirectoryRecord>>,
}

impl Default for DirectoryTree {
    fn default() -> Self {
        DirectoryTree {
            slots: vec![None; N_INODES],
        }
    }
}

impl DirectoryTree {
    /// rebuild a table from all `N_INODES` slots
    pub fn from_slots(slots: Vec<Option<DirectoryRecord>>) -> Self {
        DirectoryTree { slots }
    }

    /// every slot, cleared ones included
    pub fn slots(&self) -> &[Option<DirectoryRecord>] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Result<&DirectoryRecord> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("directory record {index}")))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut DirectoryRecord> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::NotFound(format!("directory record {index}")))
    }

    pub fn root(&self) -> Result<&DirectoryRecord> {
        self.get(ROOT_DIR)
    }

    /// slot of the first live directory with exactly this path
    pub fn find(&self, path: &str) -> Option<usize> {
        self.iter()
            .find(|(_, record)| record.path == path)
            .map(|(index, _)| index)
    }

    /// the live directory referencing `inode`
    pub fn find_by_inode(&self, inode: usize) -> Option<&DirectoryRecord> {
        self.iter()
            .map(|(_, record)| record)
            .find(|record| record.inode == inode)
    }

    /// The directory that owns `path`.
    ///
    /// A path without any slash is malformed; a single slash means a top level
    /// entry owned by the root; otherwise the owner is the directory whose path is
    /// everything before the last slash.
    pub fn resolve_parent(&self, path: &str) -> Result<usize> {
        let not_found = || FsError::NotFound(format!("parent of {path}"));
        let index = match path.matches('/').count() {
            0 => return Err(not_found()),
            1 => ROOT_DIR,
            _ => {
                let parent = parent_path(path).ok_or_else(not_found)?;
                self.find(parent).ok_or_else(not_found)?
            }
        };
        self.get(index).map_err(|_| not_found())?;
        Ok(index)
    }

    /// Check that a new record can be appended at `index`.
    ///
    /// Directories are appended at the directory count; a slot cleared by rmdir is
    /// never handed out again.
    pub fn vacant(&self, index: usize) -> Result<usize> {
        match self.slots.get(index) {
            Some(None) => Ok(index),
            Some(Some(record)) => Err(FsError::CorruptImage(format!(
                "directory slot {index} past the count already holds {}",
                record.path
            ))),
            None => Err(FsError::ResourceExhausted("directory table is full")),
        }
    }

    /// store `record` at `index`, fixing up its self index
    pub fn insert(&mut self, index: usize, mut record: DirectoryRecord) -> Result<usize> {
        self.vacant(index)?;
        record.index = index;
        debug!(
            "directory record {index} -> {} at depth {}",
            record.path, record.depth
        );
        self.slots[index] = Some(record);
        Ok(index)
    }

    /// clear a slot in place, returning the record it held
    pub fn remove(&mut self, index: usize) -> Option<DirectoryRecord> {
        let record = self.slots.get_mut(index)?.take();
        if let Some(record) = &record {
            debug!("cleared directory record {index} ({})", record.path);
        }
        record
    }

    /// live records with their slots, in table order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DirectoryRecord)> + Clone + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|record| (index, record)))
    }

    /// slots of directories whose parent is `index`, in table order
    pub fn child_dirs(&self, index: usize) -> impl Iterator<Item = usize> + Clone + '_ {
        self.iter()
            .filter(move |(_, record)| record.parent == Some(index))
            .map(|(child, _)| child)
    }

    /// `index` followed by every directory below it, parents before children
    pub fn subtree(&self, index: usize) -> Vec<usize> {
        let mut found = vec![index];
        let mut cursor = 0;
        while cursor < found.len() {
            let current = found[cursor];
            found.extend(self.child_dirs(current).filter(|&child| child != current));
            cursor += 1;
            if found.len() > self.slots.len() {
                // a parent cycle, only possible in a damaged image
                break;
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
