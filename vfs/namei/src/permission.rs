//! Discretionary access checks.
//!
//! None of these functions mutate state or block.

use crate::context::{Capabilities, Cred};
use crate::dentry::Dentry;
use crate::node::{AclVerdict, FsNode, NodeFlags, VfsFileType, S_IRWXG, S_ISVTX, S_IXUGO};
use crate::path::PathRef;
use crate::{VfsError, VfsErrorKind, VfsResult};
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MayMask: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
        const APPEND = 8;
    }
}

impl MayMask {
    const RWX: Self = Self::READ.union(Self::WRITE).union(Self::EXEC);
}

fn denied(context: &'static str) -> VfsError {
    VfsError::new(VfsErrorKind::PermissionDenied, context)
}

/// Owner/group/other triad check, consulting the ACL hook for the group
/// class when the node carries extended permissions.
pub fn acl_permission_check(cred: &Cred, node: &dyn FsNode, mask: MayMask) -> VfsResult<()> {
    let attr = node.attr();
    let mask = mask & MayMask::RWX;
    let mut mode = attr.mode;

    if cred.uid == attr.uid {
        mode >>= 6;
    } else {
        if attr.flags.contains(NodeFlags::POSIX_ACL) && mode & S_IRWXG != 0 {
            if let Some(acl) = node.acl() {
                match acl.check_acl(cred, mask) {
                    AclVerdict::Allow => return Ok(()),
                    AclVerdict::Deny => return Err(denied("perm.acl")),
                    AclVerdict::Indeterminate => {}
                }
            }
        }
        if cred.in_group_p(attr.gid) {
            mode >>= 3;
        }
    }

    if mask.bits() & !mode & 0o7 == 0 {
        Ok(())
    } else {
        Err(denied("perm.mode"))
    }
}

/// Mode bits plus the DAC override capabilities.
pub fn generic_permission(cred: &Cred, node: &dyn FsNode, mask: MayMask) -> VfsResult<()> {
    let err = match acl_permission_check(cred, node, mask) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == VfsErrorKind::PermissionDenied => err,
        Err(err) => return Err(err),
    };

    let is_dir = node.file_type() == VfsFileType::Directory;
    let mask = mask & MayMask::RWX;

    // Execute can only be granted if somebody may execute the object.
    if !mask.contains(MayMask::EXEC) || is_dir || node.attr().mode & S_IXUGO != 0 {
        if cred.capable(Capabilities::DAC_OVERRIDE) {
            return Ok(());
        }
    }

    if (mask == MayMask::READ || (is_dir && !mask.contains(MayMask::WRITE)))
        && cred.capable(Capabilities::DAC_READ_SEARCH)
    {
        return Ok(());
    }

    Err(err)
}

/// Full check for `mask` on `node`. Writes are refused up front on a
/// read-only filesystem and on immutable objects.
pub fn inode_permission(cred: &Cred, node: &dyn FsNode, mask: MayMask, read_only: bool) -> VfsResult<()> {
    if mask.contains(MayMask::WRITE) {
        let file_type = node.file_type();
        if read_only
            && matches!(
                file_type,
                VfsFileType::RegularFile | VfsFileType::Directory | VfsFileType::Symlink
            )
        {
            return Err(VfsError::new(VfsErrorKind::ReadOnlyFs, "perm.read_only"));
        }
        if node.attr().flags.contains(NodeFlags::IMMUTABLE) {
            return Err(VfsError::new(VfsErrorKind::Immutable, "perm.immutable"));
        }
    }
    generic_permission(cred, node, mask)
}

/// [`inode_permission`] on the node behind `path`, honouring read-only mounts.
pub fn path_permission(cred: &Cred, path: &PathRef, mask: MayMask) -> VfsResult<()> {
    let node = path
        .dentry
        .node()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "perm.negative"))?;
    inode_permission(cred, node.as_ref(), mask, path.is_read_only())
}

/// Search permission on a directory being walked through.
pub fn exec_permission(cred: &Cred, node: &dyn FsNode) -> VfsResult<()> {
    match acl_permission_check(cred, node, MayMask::EXEC) {
        Ok(()) => Ok(()),
        Err(_) if cred.capable(Capabilities::DAC_OVERRIDE) || cred.capable(Capabilities::DAC_READ_SEARCH) => {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Sticky directories only let owners (of the entry or the directory)
/// remove entries. Returns `true` when the removal must be refused.
pub fn check_sticky(cred: &Cred, dir: &dyn FsNode, victim: &dyn FsNode) -> bool {
    let dir_attr = dir.attr();
    if dir_attr.mode & S_ISVTX == 0 {
        return false;
    }
    if victim.attr().uid == cred.uid || dir_attr.uid == cred.uid {
        return false;
    }
    !cred.capable(Capabilities::FOWNER)
}

/// May `child` (a negative entry) be created in `dir`?
pub fn may_create(cred: &Cred, dir: &PathRef, child: &Dentry) -> VfsResult<()> {
    if !child.is_negative() {
        return Err(VfsError::new(VfsErrorKind::AlreadyExists, "may_create.exists"));
    }
    let node = dir
        .dentry
        .node()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "may_create.dir"))?;
    if node.attr().flags.contains(NodeFlags::DEAD_DIR) {
        return Err(VfsError::new(VfsErrorKind::NotFound, "may_create.dead_dir"));
    }
    inode_permission(cred, node.as_ref(), MayMask::WRITE | MayMask::EXEC, dir.is_read_only())
}

/// May `victim` be removed from (or renamed out of) `dir`?
pub fn may_delete(cred: &Cred, dir: &PathRef, victim: &Dentry, is_dir: bool) -> VfsResult<()> {
    let victim_node = victim
        .node()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "may_delete.negative"))?;
    let dir_node = dir
        .dentry
        .node()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "may_delete.dir"))?;
    debug_assert!(victim.parent_is(&dir.dentry));

    inode_permission(cred, dir_node.as_ref(), MayMask::WRITE | MayMask::EXEC, dir.is_read_only())?;
    if dir_node.attr().flags.contains(NodeFlags::APPEND) {
        return Err(VfsError::new(VfsErrorKind::OperationNotPermitted, "may_delete.append_dir"));
    }
    let victim_flags = victim_node.attr().flags;
    if check_sticky(cred, dir_node.as_ref(), victim_node.as_ref())
        || victim_flags.intersects(NodeFlags::APPEND | NodeFlags::IMMUTABLE)
    {
        return Err(VfsError::new(VfsErrorKind::OperationNotPermitted, "may_delete.protected"));
    }

    let victim_is_dir = victim_node.file_type() == VfsFileType::Directory;
    if is_dir {
        if !victim_is_dir {
            return Err(VfsError::new(VfsErrorKind::NotDir, "may_delete.not_dir"));
        }
        if victim.is_root() {
            return Err(VfsError::new(VfsErrorKind::Busy, "may_delete.root"));
        }
    } else if victim_is_dir {
        return Err(VfsError::new(VfsErrorKind::IsDir, "may_delete.is_dir"));
    }
    if dir_node.attr().flags.contains(NodeFlags::DEAD_DIR) {
        return Err(VfsError::new(VfsErrorKind::NotFound, "may_delete.dead_dir"));
    }
    Ok(())
}
