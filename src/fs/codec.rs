//! Binary image format.
//!
//! The image is, in order: the superblock, the inode bitmap, the block bitmap, then
//! every slot of the inode table, the block pool, the file table and the directory
//! table, free slots included. Every record has a constant encoded size, so the image
//! has a constant size too, see [crate::utils::fs_size_calculator::image_size].

use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Write},
    path::Path,
};

use bincode::{Decode, Encode};
use log::{debug, info, warn};
use memmap2::{Mmap, MmapMut};

use crate::utils::{
    fs_size_calculator::{bitmap_size, image_size},
    time_util::TimeDurationStruct,
    traits::SerializeAndDigest,
};

use super::{
    Bitmap, Block, BlockStore, Caller, DirectoryRecord, DirectoryTree, FileRecord, FileTable,
    FsError, FsState, Inode, InodeTable, Result, SuperBlock, BLOCK_SIZE, FS_FILENAME_LEN,
    N_BLOCKS, N_FILES_DIR, N_INODES,
};

/// marks an absent slot index on disk
const NO_INDEX: i32 = -1;

type DiskTime = (u64, u32);
type DiskName = [u8; FS_FILENAME_LEN];

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
struct DiskInode {
    mode: u32,
    hard_links: u32,
    user_id: u32,
    group_id: u32,
    file_size: u64,
    first_block: i32,
    block_count: u32,
    times: [DiskTime; 4],
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
struct DiskBlock {
    content: [u8; BLOCK_SIZE],
    free_space: u32,
    next: i32,
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
struct DiskFile {
    path: DiskName,
    name: DiskName,
    inode: i32,
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
struct DiskDirectory {
    index: i32,
    path: DiskName,
    name: DiskName,
    inode: i32,
    members: [i32; N_FILES_DIR],
    parent: i32,
    depth: u32,
}

fn config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

fn pack_time(time: TimeDurationStruct) -> DiskTime {
    (time.sec, time.nsec)
}

fn unpack_time((sec, nsec): DiskTime) -> TimeDurationStruct {
    TimeDurationStruct { sec, nsec }
}

fn pack_index(index: Option<usize>) -> i32 {
    index.map_or(NO_INDEX, |index| index as i32)
}

/// a stored index, `NO_INDEX` or below `bound`
fn unpack_index(raw: i32, bound: usize) -> Result<Option<usize>> {
    match raw {
        NO_INDEX => Ok(None),
        index if (0..bound as i32).contains(&index) => Ok(Some(index as usize)),
        index => Err(FsError::CorruptImage(format!(
            "index {index} out of range 0..{bound}"
        ))),
    }
}

/// a stored index that must be present
fn require_index(raw: i32, bound: usize) -> Result<usize> {
    unpack_index(raw, bound)?
        .ok_or_else(|| FsError::CorruptImage("missing index in live record".to_string()))
}

fn pack_name(name: &str) -> DiskName {
    let mut raw = [0u8; FS_FILENAME_LEN];
    let len = name.len().min(FS_FILENAME_LEN - 1);
    raw[..len].copy_from_slice(&name.as_bytes()[..len]);
    raw
}

fn unpack_name(raw: &DiskName) -> Result<String> {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..len].to_vec())
        .map_err(|e| FsError::CorruptImage(format!("stored name is not utf-8: {e}")))
}

impl From<&Inode> for DiskInode {
    fn from(inode: &Inode) -> Self {
        DiskInode {
            mode: inode.mode,
            hard_links: inode.hard_links,
            user_id: inode.user_id,
            group_id: inode.group_id,
            file_size: inode.file_size,
            first_block: pack_index(inode.first_block),
            block_count: inode.block_count,
            times: [
                pack_time(inode.created_at),
                pack_time(inode.accessed_at),
                pack_time(inode.modified_at),
                pack_time(inode.metadata_changed_at),
            ],
        }
    }
}

impl TryFrom<DiskInode> for Inode {
    type Error = FsError;

    fn try_from(disk: DiskInode) -> Result<Self> {
        let [created_at, accessed_at, modified_at, metadata_changed_at] = disk.times.map(unpack_time);
        Ok(Inode {
            mode: disk.mode,
            hard_links: disk.hard_links,
            user_id: disk.user_id,
            group_id: disk.group_id,
            file_size: disk.file_size,
            first_block: unpack_index(disk.first_block, N_BLOCKS)?,
            block_count: disk.block_count,
            created_at,
            accessed_at,
            modified_at,
            metadata_changed_at,
        })
    }
}

impl From<&Block> for DiskBlock {
    fn from(block: &Block) -> Self {
        DiskBlock {
            content: block.content,
            free_space: block.free_space as u32,
            next: pack_index(block.next),
        }
    }
}

impl TryFrom<DiskBlock> for Block {
    type Error = FsError;

    fn try_from(disk: DiskBlock) -> Result<Self> {
        if disk.free_space as usize > BLOCK_SIZE {
            return Err(FsError::CorruptImage(format!(
                "block claims {} free bytes",
                disk.free_space
            )));
        }
        Ok(Block {
            content: disk.content,
            free_space: disk.free_space as usize,
            next: unpack_index(disk.next, N_BLOCKS)?,
        })
    }
}

impl From<Option<&FileRecord>> for DiskFile {
    fn from(record: Option<&FileRecord>) -> Self {
        match record {
            Some(record) => DiskFile {
                path: pack_name(&record.path),
                name: pack_name(&record.name),
                inode: record.inode as i32,
            },
            None => DiskFile {
                path: [0u8; FS_FILENAME_LEN],
                name: [0u8; FS_FILENAME_LEN],
                inode: NO_INDEX,
            },
        }
    }
}

impl TryFrom<DiskFile> for Option<FileRecord> {
    type Error = FsError;

    fn try_from(disk: DiskFile) -> Result<Self> {
        if disk.inode == NO_INDEX {
            return Ok(None);
        }
        Ok(Some(FileRecord {
            path: unpack_name(&disk.path)?,
            name: unpack_name(&disk.name)?,
            inode: require_index(disk.inode, N_INODES)?,
        }))
    }
}

impl From<Option<&DirectoryRecord>> for DiskDirectory {
    fn from(record: Option<&DirectoryRecord>) -> Self {
        let Some(record) = record else {
            return DiskDirectory {
                index: NO_INDEX,
                path: [0u8; FS_FILENAME_LEN],
                name: [0u8; FS_FILENAME_LEN],
                inode: NO_INDEX,
                members: [NO_INDEX; N_FILES_DIR],
                parent: NO_INDEX,
                depth: 0,
            };
        };
        let mut members = [NO_INDEX; N_FILES_DIR];
        for (raw, member) in members.iter_mut().zip(&record.members) {
            *raw = pack_index(*member);
        }
        DiskDirectory {
            index: record.index as i32,
            path: pack_name(&record.path),
            name: pack_name(&record.name),
            inode: record.inode as i32,
            members,
            parent: pack_index(record.parent),
            depth: record.depth,
        }
    }
}

impl TryFrom<DiskDirectory> for Option<DirectoryRecord> {
    type Error = FsError;

    fn try_from(disk: DiskDirectory) -> Result<Self> {
        if disk.inode == NO_INDEX {
            return Ok(None);
        }
        let members = disk
            .members
            .iter()
            .map(|&raw| unpack_index(raw, N_INODES))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(DirectoryRecord {
            index: require_index(disk.index, N_INODES)?,
            path: unpack_name(&disk.path)?,
            name: unpack_name(&disk.name)?,
            inode: require_index(disk.inode, N_INODES)?,
            members,
            parent: unpack_index(disk.parent, N_INODES)?,
            depth: disk.depth,
        }))
    }
}

/// encoded size of every kind of record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSizes {
    pub superblock: usize,
    pub inode: usize,
    pub block: usize,
    pub file: usize,
    pub directory: usize,
}

/// measure each record kind by encoding an empty one
pub fn record_sizes() -> Result<RecordSizes> {
    let superblock = SuperBlock::default()
        .serialize()
        .map_err(|e| FsError::CorruptImage(format!("can't encode superblock: {e:#}")))?;
    Ok(RecordSizes {
        superblock: superblock.len(),
        inode: encoded_len(&DiskInode::from(&Inode::default()))?,
        block: encoded_len(&DiskBlock::from(&Block::default()))?,
        file: encoded_len(&DiskFile::from(None))?,
        directory: encoded_len(&DiskDirectory::from(None))?,
    })
}

fn encoded_len<T: Encode>(record: &T) -> Result<usize> {
    bincode::encode_to_vec(record, config())
        .map(|bytes| bytes.len())
        .map_err(encode_error)
}

fn encode_error(err: bincode::error::EncodeError) -> FsError {
    FsError::Io(std::io::Error::other(err.to_string()))
}

fn decode_error(err: bincode::error::DecodeError) -> FsError {
    FsError::CorruptImage(format!("truncated or malformed record: {err}"))
}

fn write_record<T: Encode, W: Write>(record: &T, w: &mut W) -> Result<usize> {
    bincode::encode_into_std_write(record, w, config()).map_err(encode_error)
}

fn read_record<T: Decode<()>, R: Read>(r: &mut R) -> Result<T> {
    bincode::decode_from_std_read(r, config()).map_err(decode_error)
}

fn read_bitmap<R: Read>(r: &mut R, len: usize) -> Result<Bitmap> {
    let mut raw = vec![0u8; bitmap_size(len)];
    r.read_exact(&mut raw).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => FsError::CorruptImage("truncated bitmap".to_string()),
        _ => FsError::Io(e),
    })?;
    Ok(Bitmap::from_raw(&raw, len))
}

/// Write the whole image into `w`, returning the number of bytes written.
pub fn save_to<W: Write>(state: &mut FsState, w: &mut W) -> Result<usize> {
    let mut written = state
        .superblock_mut()
        .serialize_into(w)
        .map_err(|e| FsError::Io(std::io::Error::other(format!("{e:#}"))))?;

    for bitmap in [state.inodes.bitmap(), state.blocks.bitmap()] {
        w.write_all(bitmap.as_raw_slice())?;
        written += bitmap.as_raw_slice().len();
    }
    for inode in state.inodes.slots() {
        written += write_record(&DiskInode::from(inode), w)?;
    }
    for block in state.blocks.slots() {
        written += write_record(&DiskBlock::from(block), w)?;
    }
    for file in state.files.slots() {
        written += write_record(&DiskFile::from(file.as_ref()), w)?;
    }
    for dir in state.dirs.slots() {
        written += write_record(&DiskDirectory::from(dir.as_ref()), w)?;
    }
    Ok(written)
}

/// Read back an image written by [save_to], rejecting anything inconsistent.
pub fn load_from<R: Read>(r: &mut R) -> Result<FsState> {
    let superblock = SuperBlock::deserialize_from(r)
        .map_err(|e| FsError::CorruptImage(format!("superblock: {e:#}")))?;
    if !superblock.has_valid_magic() {
        return Err(FsError::CorruptImage(format!(
            "bad magic {}",
            superblock.magic
        )));
    }

    let inode_bitmap = read_bitmap(r, N_INODES)?;
    let block_bitmap = read_bitmap(r, N_BLOCKS)?;
    let inodes = (0..N_INODES)
        .map(|_| Inode::try_from(read_record::<DiskInode, _>(r)?))
        .collect::<Result<Vec<_>>>()?;
    let blocks = (0..N_BLOCKS)
        .map(|_| Block::try_from(read_record::<DiskBlock, _>(r)?))
        .collect::<Result<Vec<_>>>()?;
    let files = (0..N_INODES)
        .map(|_| Option::<FileRecord>::try_from(read_record::<DiskFile, _>(r)?))
        .collect::<Result<Vec<_>>>()?;
    let dirs = (0..N_INODES)
        .map(|_| Option::<DirectoryRecord>::try_from(read_record::<DiskDirectory, _>(r)?))
        .collect::<Result<Vec<_>>>()?;

    let state = FsState::from_parts(
        superblock,
        InodeTable::from_parts(inode_bitmap, inodes),
        BlockStore::from_parts(block_bitmap, blocks),
        FileTable::from_slots(files),
        DirectoryTree::from_slots(dirs),
    );
    state.verify()?;
    Ok(state)
}

/// Write the whole image to the file at `image_path`, replacing its content.
pub fn save<P>(state: &mut FsState, image_path: P) -> Result<()>
where
    P: AsRef<Path>,
{
    let size = image_size()?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image_path.as_ref())?;
    file.set_len(size as u64)?;

    // Safety
    // the file was just sized by us and is not shared with other mappings
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    let mut region: &mut [u8] = &mut mmap[..];
    let written = save_to(state, &mut region)?;
    if written != size {
        return Err(FsError::CorruptImage(format!(
            "wrote {written} bytes, image is {size}"
        )));
    }
    mmap.flush()?;
    debug!("saved {size} byte image to {}", image_path.as_ref().display());
    Ok(())
}

/// Read the image stored in the file at `image_path`.
pub fn load<P>(image_path: P) -> Result<FsState>
where
    P: AsRef<Path>,
{
    let file = File::open(image_path.as_ref())?;
    let size = image_size()?;
    let len = file.metadata()?.len();
    if len < size as u64 {
        return Err(FsError::CorruptImage(format!(
            "image holds {len} bytes, needs {size}"
        )));
    }

    // Safety
    // the mapping is only read while the file stays open
    let mmap = unsafe { Mmap::map(&file)? };
    let mut region: &[u8] = &mmap[..];
    let state = load_from(&mut region)?;
    info!("loaded image {}", image_path.as_ref().display());
    Ok(state)
}

/// Load the image at `image_path`, or start over with a fresh one owned by `owner`
/// when it is missing, truncated or corrupt.
pub fn load_or_format<P>(image_path: P, owner: &Caller) -> Result<FsState>
where
    P: AsRef<Path>,
{
    match load(image_path.as_ref()) {
        Ok(state) => Ok(state),
        Err(err) => {
            warn!(
                "can't load {}: {err}, initializing a fresh image",
                image_path.as_ref().display()
            );
            FsState::format(owner)
        }
    }
}
