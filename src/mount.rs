//! register our filesystem to `FUSE` and mount it
use fuser::MountOption;
use log::info;
use std::path::Path;

use crate::fs::{Caller, MountedFs};

/// mount options handed to `FUSE`
pub fn mount_options(auto_unmount: bool) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("chainfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

/// Load the image at `image_path`, or format a fresh one when it is missing or
/// unreadable, and serve it at `mountpoint` until unmounted. The image is written
/// back on unmount.
pub fn mount<P, Q>(image_path: P, mountpoint: Q, auto_unmount: bool) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let fs = MountedFs::new(image_path.as_ref(), &Caller::current())?;
    info!(
        "mounting {} at {}",
        image_path.as_ref().display(),
        mountpoint.as_ref().display()
    );
    Ok(fuser::mount2(fs, mountpoint, &mount_options(auto_unmount))?)
}
