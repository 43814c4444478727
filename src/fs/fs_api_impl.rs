use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use fuser::{FileAttr, Filesystem, TimeOrNow};
use log::{error, info};

use crate::utils::time_util::{self, TimeDurationStruct};

use super::{
    codec, Access, Caller, FsError, FsState, Result, BLOCK_SIZE, FS_FILENAME_LEN, ROOT_INODE,
};

const TTL: Duration = Duration::new(0, 0);

/// `FUSE` passes this for "leave unchanged" in chown
const UNCHANGED_ID: u32 = u32::MAX;

/// A filesystem image mounted through `FUSE`.
///
/// `FUSE` inode numbers are inode table slots plus one, so the root directory,
/// which always sits on slot 0, is [ROOT_INODE].
#[derive(Debug)]
pub struct MountedFs {
    state: FsState,
    image_path: PathBuf,
}

impl MountedFs {
    /// load the image at `image_path`, or a fresh one owned by `owner` when it can't be loaded
    pub fn new<P>(image_path: P, owner: &Caller) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Ok(MountedFs {
            state: codec::load_or_format(image_path.as_ref(), owner)?,
            image_path: image_path.as_ref().to_path_buf(),
        })
    }

    pub fn state(&self) -> &FsState {
        &self.state
    }

    /// write the image back to its file
    pub fn save(&mut self) -> Result<()> {
        codec::save(&mut self.state, &self.image_path)
    }

    fn path_of(&self, ino: u64) -> Result<String> {
        let index = ino
            .checked_sub(ROOT_INODE)
            .ok_or_else(|| FsError::NotFound(format!("inode number {ino}")))?;
        Ok(self.state.path_of_inode(index as usize)?.to_string())
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name
            .to_str()
            .ok_or_else(|| FsError::NotFound(format!("{name:?} is not utf-8")))?;
        let parent = self.path_of(parent)?;
        if parent == "/" {
            Ok(format!("/{name}"))
        } else {
            Ok(format!("{parent}/{name}"))
        }
    }

    fn attr_of(&self, path: &str) -> Result<FileAttr> {
        let index = self.state.lookup(path)?;
        Ok(self.state.attributes(path)?.file_attr(index as u64 + ROOT_INODE))
    }

    /// `FUSE` inode number of the directory holding `path`
    fn parent_ino(&self, path: &str) -> u64 {
        self.state
            .dirs()
            .resolve_parent(path)
            .ok()
            .and_then(|dir| self.state.dirs().get(dir).ok())
            .map_or(ROOT_INODE, |dir| dir.inode as u64 + ROOT_INODE)
    }
}

fn time_or_now(time: TimeOrNow) -> Result<TimeDurationStruct> {
    match time {
        TimeOrNow::Now => Ok(time_util::now()),
        TimeOrNow::SpecificTime(time) => TimeDurationStruct::try_from(time).map_err(|e| {
            error!("{e:#}");
            FsError::Io(std::io::Error::from_raw_os_error(libc::EINVAL))
        }),
    }
}

fn unchanged_as_none(id: Option<u32>) -> Option<u32> {
    id.filter(|&id| id != UNCHANGED_ID)
}

impl Filesystem for MountedFs {
    // to init the filesystem
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        info!("init() called for image {}", self.image_path.display());
        self.state.superblock_mut().update_last_mounted_at();
        Ok(())
    }

    // to umount the filesystem
    fn destroy(&mut self) {
        info!("destroy() called, saving image {}", self.image_path.display());
        if let Err(err) = self.save() {
            error!("can't save image {}: {err}", self.image_path.display());
        }
    }

    // to show FS information
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.state.statistics();
        reply.statfs(
            stats.total_blocks as u64,
            stats.free_blocks as u64,
            stats.free_blocks as u64,
            stats.total_inodes as u64,
            stats.free_inodes as u64,
            BLOCK_SIZE as u32,
            FS_FILENAME_LEN as u32 - 1,
            BLOCK_SIZE as u32,
        )
    }

    fn getattr(&mut self, _req: &fuser::Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
        info!("getattr() called with inode number: {:?}", ino);
        match self.path_of(ino).and_then(|path| self.attr_of(&path)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to look up a file
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        info!("lookup() called with parent inode number: {parent} and name: {name:?}");
        match self
            .child_path(parent, name)
            .and_then(|path| self.attr_of(&path))
        {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn access(&mut self, req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        info!("access() called with inode number: {ino} and mask: {mask:o}");
        let caller = Caller::new(req.uid(), req.gid());
        let result = self.path_of(ino).and_then(|path| {
            if mask & libc::R_OK != 0 {
                self.state.check_access(&path, &caller, Access::Read)?;
            }
            if mask & libc::W_OK != 0 {
                self.state.check_access(&path, &caller, Access::Write)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        info!("open() called with inode number: {ino} and flags: {flags:o}");
        match self.path_of(ino) {
            Ok(_) => reply.opened(0, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to read from a file
    fn read(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        info!(
            "read() called with inode number: {:?}, fh: {:?}, offset: {:?}, size: {:?}, flags: {:?}, lock_owner: {:?}",
            ino, fh, offset, size, flags, lock_owner
        );
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = Caller::new(req.uid(), req.gid());
        let result = self
            .path_of(ino)
            .and_then(|path| self.state.read(&path, &caller));
        match result {
            Ok(content) => {
                let start = (offset as usize).min(content.len());
                let end = start.saturating_add(size as usize).min(content.len());
                reply.data(&content[start..end]);
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to write to a file, always at its end
    fn write(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        info!(
            "write() called with inode number: {:?}, fh: {:?}, offset: {:?}, size: {:?}, write_flags: {:?}, flags: {:?}, lock_owner: {:?}",
            ino, fh, offset, data.len(), write_flags, flags, lock_owner
        );
        let caller = Caller::new(req.uid(), req.gid());
        let result = self
            .path_of(ino)
            .and_then(|path| self.state.write(&path, data, &caller));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to set file attributes
    fn setattr(
        &mut self,
        req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        info!(
            "setattr() called with inode number: {:?}, mode: {:?}, uid: {:?}, gid: {:?}, size: {:?}, atime: {:?}, mtime: {:?}, fh: {:?}",
            ino, mode, uid, gid, size, atime, mtime, fh
        );
        let caller = Caller::new(req.uid(), req.gid());
        let result = self.path_of(ino).and_then(|path| {
            let accessed_at = atime.map(time_or_now).transpose()?;
            let modified_at = mtime.map(time_or_now).transpose()?;
            if let Some(size) = size {
                self.state.resize(&path, size)?;
            }
            if let Some(mode) = mode {
                self.state.chmod(&path, mode, &caller)?;
            }
            let (uid, gid) = (unchanged_as_none(uid), unchanged_as_none(gid));
            if uid.is_some() || gid.is_some() {
                self.state.chown(&path, uid, gid)?;
            }
            if accessed_at.is_some() || modified_at.is_some() {
                self.state.set_times(&path, accessed_at, modified_at)?;
            }
            self.attr_of(&path)
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to read a dir
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        info!("readdir() called with inode number: {ino}");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let entries = match self.path_of(ino).and_then(|path| {
            let mut entries = vec![
                (ino, fuser::FileType::Directory, ".".to_string()),
                (
                    self.parent_ino(&path),
                    fuser::FileType::Directory,
                    "..".to_string(),
                ),
            ];
            entries.extend(self.state.read_dir(&path)?.into_iter().map(|entry| {
                (
                    entry.inode as u64 + ROOT_INODE,
                    entry.kind.into(),
                    entry.name,
                )
            }));
            Ok(entries)
        }) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(err.to_errno());
                return;
            }
        };

        for (index, (entry_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            // the offset handed back is the one of the next entry
            if reply.add(entry_ino, index as i64 + 1, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    // to create a dir
    fn mkdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mkdir() called with parent inode number: {parent} and name: {name:?}");
        let caller = Caller::new(req.uid(), req.gid());
        let result = self.child_path(parent, name).and_then(|path| {
            self.state
                .create_directory(&path, mode & !umask, &caller)?;
            self.attr_of(&path)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to remove a dir
    fn rmdir(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("rmdir() called with parent inode number: {parent} and name: {name:?}");
        let caller = Caller::new(req.uid(), req.gid());
        let result = self
            .child_path(parent, name)
            .and_then(|path| self.state.remove_directory(&path, &caller));
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: fuser::ReplyEntry,
    ) {
        info!("mknod() called with parent inode number: {parent} and name: {name:?}");
        let kind = mode & libc::S_IFMT;
        if kind != 0 && kind != libc::S_IFREG {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = Caller::new(req.uid(), req.gid());
        let result = self.child_path(parent, name).and_then(|path| {
            self.state.create_file(&path, mode & !umask, &caller)?;
            self.attr_of(&path)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to create a new file
    fn create(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        info!("create() called with parent inode number: {parent} and name: {name:?}");
        let caller = Caller::new(req.uid(), req.gid());
        let result = self.child_path(parent, name).and_then(|path| {
            self.state.create_file(&path, mode & !umask, &caller)?;
            self.attr_of(&path)
        });
        match result {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    // to delete a file
    fn unlink(
        &mut self,
        req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        info!("unlink() called with parent inode number: {parent} and name: {name:?}");
        let caller = Caller::new(req.uid(), req.gid());
        let result = self
            .child_path(parent, name)
            .and_then(|path| self.state.unlink(&path, &caller));
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: u32 = libc::S_IFREG as u32 | 0o644;
    const DIR: u32 = libc::S_IFDIR as u32 | 0o755;

    #[test]
    fn test_inode_numbers_map_to_paths() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let me = Caller::new(1000, 1000);
        let mut fs = MountedFs::new(dir.path().join("fs.img"), &me)?;
        fs.state.create_directory("/docs", DIR, &me)?;
        let inode = fs.state.create_file("/docs/a", FILE, &me)?;

        assert_eq!(fs.path_of(ROOT_INODE)?, "/");
        assert_eq!(fs.path_of(inode as u64 + 1)?, "/docs/a");
        assert!(matches!(fs.path_of(0), Err(FsError::NotFound(_))));

        let docs = fs.state.lookup("/docs")? as u64 + 1;
        assert_eq!(fs.child_path(ROOT_INODE, OsStr::new("docs"))?, "/docs");
        assert_eq!(fs.child_path(docs, OsStr::new("a"))?, "/docs/a");
        assert_eq!(fs.parent_ino("/docs/a"), docs);
        assert_eq!(fs.parent_ino("/docs"), ROOT_INODE);

        let attr = fs.attr_of("/docs/a")?;
        assert_eq!(attr.ino, inode as u64 + 1);
        assert_eq!(attr.kind, fuser::FileType::RegularFile);
        assert_eq!(fs.attr_of("/")?.ino, ROOT_INODE);
        Ok(())
    }

    #[test]
    fn test_saved_image_is_loaded_on_next_mount() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("fs.img");
        let me = Caller::new(1000, 1000);

        let mut fs = MountedFs::new(&path, &me)?;
        fs.state.create_file("/kept", FILE, &me)?;
        fs.state.write("/kept", b"persisted", &me)?;
        fs.save()?;

        let mut reopened = MountedFs::new(&path, &me)?;
        assert_eq!(reopened.state(), fs.state());
        assert_eq!(reopened.state.read("/kept", &me)?, b"persisted");
        Ok(())
    }

    #[test]
    fn test_unchanged_id_sentinel() {
        assert_eq!(unchanged_as_none(Some(UNCHANGED_ID)), None);
        assert_eq!(unchanged_as_none(Some(7)), Some(7));
        assert_eq!(unchanged_as_none(None), None);
    }
}
