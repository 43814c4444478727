use log::debug;

use super::{FsError, Result, N_INODES};

/// a regular file: its full path, its leaf name and the inode holding its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub inode: usize,
}

/// The flat table of file records.
///
/// Unlinked records are cleared in place, never compacted; the first cleared
/// slot is the next one handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTable {
    slots: Vec<Option<FileRecord>>,
}

impl Default for FileTable {
    fn default() -> Self {
        FileTable {
            slots: vec![None; N_INODES],
        }
    }
}

impl FileTable {
    /// rebuild a table from all `N_INODES` slots
    pub fn from_slots(slots: Vec<Option<FileRecord>>) -> Self {
        FileTable { slots }
    }

    /// every slot, cleared ones included
    pub fn slots(&self) -> &[Option<FileRecord>] {
        &self.slots
    }

    /// slot of the first live record with exactly this path
    pub fn find(&self, path: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|record| record.path == path))
    }

    pub fn get(&self, index: usize) -> Result<&FileRecord> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("file record {index}")))
    }

    /// the live record referencing `inode`
    pub fn find_by_inode(&self, inode: usize) -> Option<&FileRecord> {
        self.iter()
            .map(|(_, record)| record)
            .find(|record| record.inode == inode)
    }

    /// the slot the next [FileTable::insert] will take
    pub fn next_free(&self) -> Result<usize> {
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::ResourceExhausted("file table is full"))
    }

    /// store `record` in the first free slot, returning that slot
    pub fn insert(&mut self, record: FileRecord) -> Result<usize> {
        let index = self.next_free()?;
        debug!("file record {index} -> {}", record.path);
        self.slots[index] = Some(record);
        Ok(index)
    }

    /// clear a slot in place, returning the record it held
    pub fn remove(&mut self, index: usize) -> Option<FileRecord> {
        let record = self.slots.get_mut(index)?.take();
        if let Some(record) = &record {
            debug!("cleared file record {index} ({})", record.path);
        }
        record
    }

    /// live records with their slots, in table order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FileRecord)> + Clone + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|record| (index, record)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
