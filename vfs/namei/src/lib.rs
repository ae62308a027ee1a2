//! Mount-aware pathname resolution.
//!
//! The crate turns byte paths into `(mount, dentry)` pairs. Filesystems plug
//! in through the traits in [`node`] and [`fs`]; the namespace shape comes
//! from a [`MountTableProvider`].

mod context;
pub mod dcache;
mod dentry;
mod error;
pub mod flags;
pub mod fs;
mod ids;
pub mod lexer;
pub mod mount;
pub mod name;
pub mod node;
mod path;
pub mod permission;
pub mod rename_lock;
mod symlink;
mod walker;

pub use context::{Capabilities, Cred, NameiConfig, NameiContext};
pub use dcache::DentryCache;
pub use dentry::Dentry;
pub use error::{VfsError, VfsErrorKind, VfsResult};
pub use flags::{LastType, LookupFlags, LookupIntent};
pub use fs::{Fs, FsFlags, SbFlags, SuperBlock};
pub use ids::{BackendInodeId, DentryId, MountId, SuperBlockId};
pub use mount::{Mount, MountFlags, MountTable, MountTableProvider, UnmountFlags};
pub use name::{NameHasher, Qstr, QstrBuf, VfsName, VfsNameBuf};
pub use node::{
    AclVerdict, CreateAttrs, DirectoryProvider, FsNode, LinkBody, LinkCookie, LinkTarget, NodeAttr,
    NodeFlags, PermissionPolicyExtension, RevalidateCtx, Revalidation, RevalidationHook,
    SymlinkProvider, VfsFileType, VfsGid, VfsUid,
};
pub use path::PathRef;
pub use permission::MayMask;
pub use rename_lock::{DirLockGuard, LockClass, RenameGuard, RenameLockCoordinator};
pub use walker::{CreateLookup, CreateResult, PathWalker, ResolvedPath};
