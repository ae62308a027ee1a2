//! Mount table.
//!
//! Readers take a [`MountTable::snapshot`] and never block writers; `mount`
//! and `unmount` copy the inner table, edit the copy and publish it.

use crate::dentry::Dentry;
use crate::path::PathRef;
use crate::{DentryId, MountId, VfsError, VfsErrorKind, VfsResult};
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        const RDONLY = 1 << 0;
        const NOSUID = 1 << 1;
        const NODEV = 1 << 2;
        const NOEXEC = 1 << 3;
        const NOATIME = 1 << 4;
        const NODIRATIME = 1 << 5;
        const RELATIME = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnmountFlags {
    None,
    /// Hide the mount now; it lives on until the last path into it is dropped.
    Detach,
}

pub struct Mount {
    id: MountId,
    root: Arc<Dentry>,
    mountpoint: Option<Arc<Dentry>>,
    parent: Weak<Mount>,
    children: Mutex<SmallVec<[MountId; 4]>>,
    flags: AtomicU32,
}

impl Mount {
    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// Where this mount is attached in its parent; `None` for the namespace root.
    pub fn mountpoint(&self) -> Option<&Arc<Dentry>> {
        self.mountpoint.as_ref()
    }

    pub fn parent(&self) -> Option<Arc<Mount>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> SmallVec<[MountId; 4]> {
        self.children.lock().clone()
    }

    pub fn flags(&self) -> MountFlags {
        MountFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: MountFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn is_read_only(&self) -> bool {
        self.flags().contains(MountFlags::RDONLY)
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("root", &self.root.id())
            .field("mountpoint", &self.mountpoint.as_ref().map(|d| d.id()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// Mount-crossing view consumed by the walker.
pub trait MountTableProvider: Send + Sync {
    /// The mount attached at `dentry` as reached through `mnt`, if any.
    fn cross_down(&self, mnt: &Arc<Mount>, dentry: &Arc<Dentry>) -> Option<Arc<Mount>>;

    /// The mount `mnt` is attached under and its mountpoint there; `None` at
    /// the namespace root or for a detached mount.
    fn cross_up(&self, mnt: &Arc<Mount>) -> Option<(Arc<Mount>, Arc<Dentry>)>;
}

#[derive(Clone)]
pub struct MountTableInner {
    pub root: MountId,
    pub mounts: Vec<Option<Arc<Mount>>>,
    pub mount_by_mountpoint: HashMap<(MountId, DentryId), MountId>,
}

impl MountTableInner {
    pub fn get(&self, id: MountId) -> Option<&Arc<Mount>> {
        self.mounts.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn contains(&self, mnt: &Arc<Mount>) -> bool {
        self.get(mnt.id).is_some_and(|m| Arc::ptr_eq(m, mnt))
    }

    pub fn enter_if_mountpoint(&self, mnt: MountId, dentry: DentryId) -> Option<&Arc<Mount>> {
        self.mount_by_mountpoint
            .get(&(mnt, dentry))
            .and_then(|id| self.get(*id))
    }

    fn alloc_slot(&self) -> usize {
        self.mounts
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.mounts.len())
    }
}

pub struct MountTable {
    inner: RwLock<Arc<MountTableInner>>,
}

impl MountTable {
    /// Create a namespace whose root mount shows the tree under `root`.
    pub fn new(root: Arc<Dentry>) -> Self {
        let id = MountId::from_index(0);
        let mount = Arc::new(Mount {
            id,
            root,
            mountpoint: None,
            parent: Weak::new(),
            children: Mutex::new(SmallVec::new()),
            flags: AtomicU32::new(0),
        });
        Self {
            inner: RwLock::new(Arc::new(MountTableInner {
                root: id,
                mounts: vec![Some(mount)],
                mount_by_mountpoint: HashMap::new(),
            })),
        }
    }

    pub fn snapshot(&self) -> Arc<MountTableInner> {
        self.inner.read().clone()
    }

    pub fn root_mount(&self) -> VfsResult<Arc<Mount>> {
        let inner = self.snapshot();
        inner
            .get(inner.root)
            .cloned()
            .ok_or_else(|| VfsError::new(VfsErrorKind::Internal, "mount.root"))
    }

    /// The root of the namespace.
    pub fn root_path(&self) -> VfsResult<PathRef> {
        self.root_mount().map(PathRef::mount_root)
    }

    pub fn get(&self, id: MountId) -> Option<Arc<Mount>> {
        self.snapshot().get(id).cloned()
    }

    /// Attach the tree under `root` at `at`.
    ///
    /// Mounting onto an occupied mountpoint stacks the new mount on top of
    /// the existing one.
    pub fn mount(&self, at: &PathRef, root: Arc<Dentry>, flags: MountFlags) -> VfsResult<Arc<Mount>> {
        if at.dentry.is_negative() {
            return Err(VfsError::new(VfsErrorKind::NotFound, "mount.target"));
        }
        if !at.dentry.is_root() && !at.dentry.is_hashed() {
            return Err(VfsError::new(VfsErrorKind::NotFound, "mount.target.unhashed"));
        }
        if at.dentry.is_dir() != root.is_dir() {
            return Err(VfsError::new(VfsErrorKind::NotDir, "mount.type_mismatch"));
        }

        let mut guard = self.inner.write();
        let mut next = MountTableInner::clone(&guard);
        if !next.contains(&at.mnt) {
            return Err(VfsError::new(VfsErrorKind::NotFound, "mount.detached"));
        }

        let mut parent = at.mnt.clone();
        let mut mountpoint = at.dentry.clone();
        while let Some(top) = next.enter_if_mountpoint(parent.id, mountpoint.id()) {
            let top = top.clone();
            mountpoint = top.root.clone();
            parent = top;
        }

        let slot = next.alloc_slot();
        let id = MountId::from_index(slot);
        let mount = Arc::new(Mount {
            id,
            root,
            mountpoint: Some(mountpoint.clone()),
            parent: Arc::downgrade(&parent),
            children: Mutex::new(SmallVec::new()),
            flags: AtomicU32::new(flags.bits()),
        });

        if slot == next.mounts.len() {
            next.mounts.push(Some(mount.clone()));
        } else {
            next.mounts[slot] = Some(mount.clone());
        }
        next.mount_by_mountpoint.insert((parent.id, mountpoint.id()), id);
        parent.children.lock().push(id);
        mountpoint.mount_inc();
        *guard = Arc::new(next);

        debug!(
            target: "vfs_namei::mount",
            mount = id.get(),
            parent = parent.id.get(),
            "mount.attached"
        );
        Ok(mount)
    }

    pub fn unmount(&self, id: MountId, flags: UnmountFlags) -> VfsResult<()> {
        let mut guard = self.inner.write();
        if id == guard.root {
            return Err(VfsError::new(VfsErrorKind::Busy, "unmount.root"));
        }
        let mount = guard
            .get(id)
            .cloned()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "unmount.not_found"))?;
        if !mount.children.lock().is_empty() {
            return Err(VfsError::new(VfsErrorKind::Busy, "unmount.has_children"));
        }
        // One reference in the table, one held right here.
        if flags == UnmountFlags::None && Arc::strong_count(&mount) > 2 {
            return Err(VfsError::new(VfsErrorKind::Busy, "unmount.busy"));
        }

        let mut next = MountTableInner::clone(&guard);
        next.mounts[id.index()] = None;
        if let Some(mountpoint) = &mount.mountpoint {
            if let Some(parent) = mount.parent.upgrade() {
                next.mount_by_mountpoint.remove(&(parent.id, mountpoint.id()));
                parent.children.lock().retain(|child| *child != id);
            }
            mountpoint.mount_dec();
        }
        *guard = Arc::new(next);

        debug!(target: "vfs_namei::mount", mount = id.get(), ?flags, "mount.detached");
        Ok(())
    }
}

impl MountTableProvider for MountTable {
    fn cross_down(&self, mnt: &Arc<Mount>, dentry: &Arc<Dentry>) -> Option<Arc<Mount>> {
        if !dentry.is_mountpoint() {
            return None;
        }
        self.snapshot()
            .enter_if_mountpoint(mnt.id, dentry.id())
            .cloned()
    }

    fn cross_up(&self, mnt: &Arc<Mount>) -> Option<(Arc<Mount>, Arc<Dentry>)> {
        if !self.snapshot().contains(mnt) {
            return None;
        }
        let parent = mnt.parent.upgrade()?;
        let mountpoint = mnt.mountpoint.clone()?;
        Some((parent, mountpoint))
    }
}
