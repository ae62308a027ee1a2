//! Filesystem node interfaces.
//!
//! The walker never inspects a concrete filesystem type. A backend hands out
//! `Arc<dyn FsNode>` objects and advertises what each one can do through the
//! capability accessors (`as_dir`, `as_symlink`, `acl`).

use crate::context::Cred;
use crate::dentry::Dentry;
use crate::flags::{LookupFlags, LookupIntent};
use crate::name::VfsName;
use crate::path::PathRef;
use crate::permission::MayMask;
use crate::{BackendInodeId, VfsError, VfsErrorKind, VfsResult};
use bitflags::bitflags;
use std::any::Any;
use std::sync::Arc;

pub type VfsUid = u32;
pub type VfsGid = u32;

pub const S_ISVTX: u32 = 0o1000;
pub const S_IRWXG: u32 = 0o070;
pub const S_IXUGO: u32 = 0o111;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VfsFileType {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u32 {
        /// Nobody may write to the object.
        const IMMUTABLE = 1 << 0;
        /// Only appends are allowed; the object cannot be removed.
        const APPEND = 1 << 1;
        /// The object carries extended permissions; consult `FsNode::acl`.
        const POSIX_ACL = 1 << 2;
        /// Directory was removed while still referenced.
        const DEAD_DIR = 1 << 3;
    }
}

/// Ownership and permission attributes of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeAttr {
    /// Permission bits plus set-id and sticky bits (no file type bits).
    pub mode: u32,
    pub uid: VfsUid,
    pub gid: VfsGid,
    pub flags: NodeFlags,
}

impl NodeAttr {
    pub fn new(mode: u32, uid: VfsUid, gid: VfsGid) -> Self {
        Self {
            mode,
            uid,
            gid,
            flags: NodeFlags::empty(),
        }
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T> AsAny for T
where
    T: Any,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait FsNode: AsAny + Send + Sync + 'static {
    fn inode(&self) -> BackendInodeId;
    fn file_type(&self) -> VfsFileType;
    fn attr(&self) -> NodeAttr;

    /// Present when the node can be searched for children.
    fn as_dir(&self) -> Option<&dyn DirectoryProvider> {
        None
    }

    /// Present when the node is a symbolic link.
    fn as_symlink(&self) -> Option<&dyn SymlinkProvider> {
        None
    }

    /// Fine-grained permission hook, consulted when `NodeFlags::POSIX_ACL` is set.
    fn acl(&self) -> Option<&dyn PermissionPolicyExtension> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateAttrs {
    pub file_type: VfsFileType,
    pub mode: u32,
    pub uid: VfsUid,
    pub gid: VfsGid,
}

pub trait DirectoryProvider: Send + Sync {
    /// Look `name` up in the backing store.
    ///
    /// `Ok(None)` means the name does not exist; the cache records that as a
    /// negative entry.
    fn lookup(&self, name: &VfsName<'_>) -> VfsResult<Option<Arc<dyn FsNode>>>;

    fn create(&self, name: &VfsName<'_>, attrs: CreateAttrs) -> VfsResult<Arc<dyn FsNode>>;

    fn rename(
        &self,
        _old_name: &VfsName<'_>,
        _new_dir: &dyn FsNode,
        _new_name: &VfsName<'_>,
    ) -> VfsResult<()> {
        Err(VfsError::new(VfsErrorKind::NotSupported, "dir.rename"))
    }
}

/// Opaque value returned by `read_link` and handed back to `release_link`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkCookie(pub u64);

pub enum LinkTarget {
    /// Link text, resolved relative to the link's directory unless absolute.
    Path(Vec<u8>),
    /// Synthetic link that jumps straight to a resolved location.
    Jump(PathRef),
}

pub struct LinkBody {
    pub target: LinkTarget,
    pub cookie: Option<LinkCookie>,
}

impl LinkBody {
    pub fn path(text: impl Into<Vec<u8>>) -> Self {
        Self {
            target: LinkTarget::Path(text.into()),
            cookie: None,
        }
    }

    pub fn jump(path: PathRef) -> Self {
        Self {
            target: LinkTarget::Jump(path),
            cookie: None,
        }
    }

    pub fn with_cookie(mut self, cookie: LinkCookie) -> Self {
        self.cookie = Some(cookie);
        self
    }
}

pub trait SymlinkProvider: Send + Sync {
    fn read_link(&self) -> VfsResult<LinkBody>;

    /// Called exactly once for every successful `read_link` that returned a cookie.
    fn release_link(&self, _cookie: LinkCookie) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AclVerdict {
    Allow,
    Deny,
    /// Fall through to the standard mode bits.
    Indeterminate,
}

pub trait PermissionPolicyExtension: Send + Sync {
    fn check_acl(&self, cred: &Cred, mask: MayMask) -> AclVerdict;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Revalidation {
    Valid,
    /// Drop the cached entry and go back to the backing store.
    Invalidate,
}

/// What the walker knows about the lookup in progress.
pub struct RevalidateCtx<'a> {
    pub flags: LookupFlags,
    pub intent: &'a LookupIntent,
}

pub trait RevalidationHook: Send + Sync {
    fn revalidate(&self, dentry: &Dentry, ctx: &RevalidateCtx<'_>) -> VfsResult<Revalidation>;
}
