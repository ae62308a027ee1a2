//! Directory entries.
//!
//! A [`Dentry`] binds one name inside one parent directory to a filesystem
//! node, or records that the name does not exist (a negative entry). Children
//! hold a strong reference to their parent; parents never hold their children.
//! The [`DentryCache`](crate::dcache::DentryCache) index is what keeps
//! unreferenced children alive.

use crate::fs::SuperBlock;
use crate::ids::DentryId;
use crate::name::{Qstr, QstrBuf};
use crate::node::{FsNode, VfsFileType};
use crate::rename_lock::{DirLockGuard, LockClass, DirLock};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub struct Dentry {
    id: DentryId,
    sb: Arc<SuperBlock>,
    name: RwLock<QstrBuf>,
    parent: RwLock<Option<Arc<Dentry>>>,
    node: RwLock<Option<Arc<dyn FsNode>>>,
    mounted: AtomicU32,
    hashed: AtomicBool,
    generation: AtomicU64,
    lock: DirLock,
}

impl Dentry {
    pub(crate) fn new_root(sb: Arc<SuperBlock>, node: Arc<dyn FsNode>) -> Arc<Self> {
        Arc::new(Self {
            id: DentryId::next(),
            sb,
            name: RwLock::new(QstrBuf::root()),
            parent: RwLock::new(None),
            node: RwLock::new(Some(node)),
            mounted: AtomicU32::new(0),
            hashed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            lock: DirLock::new(),
        })
    }

    /// Allocate a negative, unhashed child of `parent`.
    pub(crate) fn new_child(parent: &Arc<Dentry>, name: &Qstr<'_>) -> Arc<Self> {
        Arc::new(Self {
            id: DentryId::next(),
            sb: parent.sb.clone(),
            name: RwLock::new(name.to_owned_buf()),
            parent: RwLock::new(Some(parent.clone())),
            node: RwLock::new(None),
            mounted: AtomicU32::new(0),
            hashed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            lock: DirLock::new(),
        })
    }

    pub fn id(&self) -> DentryId {
        self.id
    }

    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.sb
    }

    pub fn name(&self) -> QstrBuf {
        self.name.read().clone()
    }

    pub(crate) fn with_name<R>(&self, f: impl FnOnce(&QstrBuf) -> R) -> R {
        f(&self.name.read())
    }

    /// `None` for a filesystem root.
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().clone()
    }

    pub(crate) fn parent_is(&self, parent: &Dentry) -> bool {
        self.parent
            .read()
            .as_ref()
            .is_some_and(|p| p.id == parent.id)
    }

    pub fn is_root(&self) -> bool {
        self.parent.read().is_none()
    }

    pub fn node(&self) -> Option<Arc<dyn FsNode>> {
        self.node.read().clone()
    }

    pub fn is_negative(&self) -> bool {
        self.node.read().is_none()
    }

    pub fn file_type(&self) -> Option<VfsFileType> {
        self.node.read().as_ref().map(|node| node.file_type())
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(VfsFileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        self.node
            .read()
            .as_ref()
            .is_some_and(|node| node.as_symlink().is_some())
    }

    /// The node can be searched for children.
    pub fn can_lookup(&self) -> bool {
        self.node
            .read()
            .as_ref()
            .is_some_and(|node| node.as_dir().is_some())
    }

    pub fn is_mountpoint(&self) -> bool {
        self.mounted.load(Ordering::Acquire) > 0
    }

    pub fn is_hashed(&self) -> bool {
        self.hashed.load(Ordering::Acquire)
    }

    /// Bumped whenever the entry is invalidated, instantiated or moved.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Lock this directory for modification.
    pub fn lock(self: &Arc<Self>) -> DirLockGuard {
        DirLockGuard::acquire(self, LockClass::Normal)
    }

    /// Times a caller had to wait for this directory's lock.
    pub fn lock_contention(&self) -> u64 {
        self.lock.contention()
    }

    pub(crate) fn dir_lock(&self) -> &DirLock {
        &self.lock
    }

    pub(crate) fn set_node(&self, node: Option<Arc<dyn FsNode>>) {
        *self.node.write() = node;
        self.bump_generation();
    }

    pub(crate) fn set_hashed(&self, hashed: bool) {
        self.hashed.store(hashed, Ordering::Release);
    }

    pub(crate) fn rebind(&self, parent: Arc<Dentry>, name: QstrBuf) {
        *self.parent.write() = Some(parent);
        *self.name.write() = name;
        self.bump_generation();
    }

    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mount_inc(&self) {
        self.mounted.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn mount_dec(&self) {
        let _ = self
            .mounted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry")
            .field("id", &self.id.get())
            .field("name", &self.name.read().name)
            .field("negative", &self.is_negative())
            .field("hashed", &self.is_hashed())
            .finish()
    }
}
