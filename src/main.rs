use chainfs::cli_interface::ChainFsCli;
use clap::Parser;
/// a CLI interface to users to choose create our filesystem,
/// register it to `FUSE` and mount it, or inspect an image.
///
/// Mounting blocks the program until we umount our filesystem ourselves,
///
/// or specify `--auto-unmount` when mounting this fs.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = ChainFsCli::parse();
    match args {
        ChainFsCli::Mkfs(args) => {
            //create a new file system
            chainfs::mkfs::mkfs(args.image_file_path, args.force)?;
        }
        ChainFsCli::Mount(args) => {
            //register a filesystem to `FUSE` and mount it
            chainfs::mount::mount(args.image_file_path, args.mount_point, args.auto_unmount)?;
        }
        ChainFsCli::Info(args) => {
            chainfs::info::info(args.image_file_path)?;
        }
    }
    Ok(())
}
