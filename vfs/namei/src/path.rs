use crate::dentry::Dentry;
use crate::mount::Mount;
use std::fmt;
use std::sync::Arc;

/// A dentry together with the mount it was reached through.
///
/// The dentry always belongs to the tree under `mnt.root()`.
#[derive(Clone)]
pub struct PathRef {
    pub mnt: Arc<Mount>,
    pub dentry: Arc<Dentry>,
}

impl PathRef {
    pub fn new(mnt: Arc<Mount>, dentry: Arc<Dentry>) -> Self {
        Self { mnt, dentry }
    }

    /// The root of `mnt`.
    pub fn mount_root(mnt: Arc<Mount>) -> Self {
        let dentry = mnt.root().clone();
        Self { mnt, dentry }
    }

    /// Both the mount and the dentry are identical.
    pub fn same(&self, other: &PathRef) -> bool {
        Arc::ptr_eq(&self.mnt, &other.mnt) && Arc::ptr_eq(&self.dentry, &other.dentry)
    }

    pub fn is_mount_root(&self) -> bool {
        Arc::ptr_eq(&self.dentry, self.mnt.root())
    }

    /// Writes are refused by either the mount or the filesystem.
    pub fn is_read_only(&self) -> bool {
        self.mnt.is_read_only() || self.dentry.sb().is_read_only()
    }
}

impl fmt::Debug for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRef")
            .field("mnt", &self.mnt.id())
            .field("dentry", &self.dentry)
            .finish()
    }
}
