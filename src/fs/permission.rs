//! owner/group/other permission checks against a caller identity

use super::{FsError, Inode, Result};

const OWNER_READ: u32 = 0o400;
const OWNER_WRITE: u32 = 0o200;
const GROUP_READ: u32 = 0o040;
const GROUP_WRITE: u32 = 0o020;
const OTHER_READ: u32 = 0o004;
const OTHER_WRITE: u32 = 0o002;

/// identity of the process issuing a filesystem call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

impl Caller {
    pub fn new(uid: libc::uid_t, gid: libc::gid_t) -> Self {
        Caller { uid, gid }
    }

    /// the effective identity of this process
    pub fn current() -> Self {
        Caller {
            uid: users::get_effective_uid(),
            gid: users::get_effective_gid(),
        }
    }
}

/// the kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Decide whether `caller` may access `inode`.
///
/// Exactly one class of bits is consulted: owner when the caller uid owns the inode,
/// group when the caller uid equals the inode's group id, other otherwise. The group
/// test compares the caller's *uid* with the stored gid and never looks at the caller's
/// groups. There is no superuser bypass.
pub fn permits(inode: &Inode, caller: &Caller, access: Access) -> bool {
    let bit = if caller.uid == inode.user_id {
        match access {
            Access::Read => OWNER_READ,
            Access::Write => OWNER_WRITE,
        }
    } else if caller.uid == inode.group_id {
        match access {
            Access::Read => GROUP_READ,
            Access::Write => GROUP_WRITE,
        }
    } else {
        match access {
            Access::Read => OTHER_READ,
            Access::Write => OTHER_WRITE,
        }
    };
    inode.mode & bit != 0
}

pub fn check_read(inode: &Inode, caller: &Caller) -> bool {
    permits(inode, caller, Access::Read)
}

pub fn check_write(inode: &Inode, caller: &Caller) -> bool {
    permits(inode, caller, Access::Write)
}

/// [permits], as a [Result] carrying [FsError::PermissionDenied]
pub fn require(inode: &Inode, caller: &Caller, access: Access) -> Result<()> {
    if permits(inode, caller, access) {
        Ok(())
    } else {
        Err(FsError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inode(mode: u32, uid: u32, gid: u32) -> Inode {
        Inode {
            mode: libc::S_IFREG as u32 | mode,
            user_id: uid,
            group_id: gid,
            ..Inode::default()
        }
    }

    #[test]
    fn test_owner_bits() {
        let owned = inode(0o600, 1000, 100);
        let owner = Caller::new(1000, 100);
        assert!(check_read(&owned, &owner));
        assert!(check_write(&owned, &owner));

        let read_only = inode(0o444, 1000, 100);
        assert!(check_read(&read_only, &owner));
        assert!(!check_write(&read_only, &owner));
    }

    #[test]
    fn test_owner_bits_are_not_widened_by_other_bits() {
        // other may write, owner may not: the owner class alone decides
        let inode = inode(0o402, 1000, 100);
        let owner = Caller::new(1000, 100);
        assert!(!check_write(&inode, &owner));
        assert!(check_write(&inode, &Caller::new(2000, 2000)));
    }

    #[test]
    fn test_group_class_compares_uid_with_stored_gid() {
        let inode = inode(0o060, 1000, 500);
        // caller uid equals the stored gid: group bits apply
        assert!(check_write(&inode, &Caller::new(500, 9999)));
        // caller gid equals the stored gid but uid does not: other bits apply
        assert!(!check_write(&inode, &Caller::new(9999, 500)));
        assert!(!check_read(&inode, &Caller::new(9999, 500)));
    }

    #[test]
    fn test_no_superuser_bypass() {
        let inode = inode(0o700, 1000, 1000);
        let root = Caller::new(0, 0);
        assert!(!check_read(&inode, &root));
        assert!(matches!(
            require(&inode, &root, Access::Write),
            Err(FsError::PermissionDenied)
        ));
    }
}
