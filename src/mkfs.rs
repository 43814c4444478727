//! create our filesystem
use anyhow::anyhow;
use log::info;
use std::path::Path;

use crate::fs::{codec, Caller, FsState};

/// create a new filesystem holding only the root directory, owned by the calling user
/// # Params
/// - `image_file_path`: the path of the image file
/// - `force`: replace the image file when it already exists
///
/// # Return
/// an [anyhow::Result] type to indicate whether the operation is successful
pub fn mkfs<P>(image_file_path: P, force: bool) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let image_file_path = image_file_path.as_ref();
    if image_file_path.exists() && !force {
        return Err(anyhow!(
            "{} already exists, pass --force to overwrite it",
            image_file_path.display()
        ));
    }

    // use `users` crate to get the uid and gid of this program
    let mut state = FsState::format(&Caller::current())?;
    codec::save(&mut state, image_file_path)?;
    info!("created filesystem image {}", image_file_path.display());
    Ok(())
}
