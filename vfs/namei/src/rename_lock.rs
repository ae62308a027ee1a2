//! Directory modification locks and the two-directory lock protocol.
//!
//! Every directory dentry owns one [`DirLock`]. It is held while the
//! directory's contents change and while a cache miss consults the backing
//! store. Operations that touch two directories go through
//! [`RenameLockCoordinator::lock_rename`], which fixes the acquisition order:
//! ancestor before descendant, otherwise ascending [`DentryId`]. Guards release
//! in the reverse order of acquisition.

use crate::dentry::Dentry;
use crate::ids::DentryId;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Lock nesting class of a directory lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockClass {
    Normal,
    /// First lock of a two-directory operation.
    Parent,
    /// Second lock of a two-directory operation; requires a `Parent` lock.
    Child,
}

/// A directory's modification lock.
///
/// Guards own a reference to the mutex, so a guard can outlive the borrow of
/// the dentry it was taken from. Counts how many acquisitions had to wait,
/// which lets tests check that unrelated lookups never contend.
pub struct DirLock {
    mutex: Arc<Mutex<()>>,
    contended: AtomicU64,
}

type HeldDirLock = ArcMutexGuard<RawMutex, ()>;

impl DirLock {
    pub fn new() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            contended: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> HeldDirLock {
        if let Some(held) = self.mutex.try_lock_arc() {
            return held;
        }
        self.contended.fetch_add(1, Ordering::Relaxed);
        self.mutex.lock_arc()
    }

    #[cfg(test)]
    fn try_lock(&self) -> Option<HeldDirLock> {
        self.mutex.try_lock_arc()
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Number of acquisitions that found the lock taken.
    pub fn contention(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

impl Default for DirLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DirLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirLock")
            .field("locked", &self.is_locked())
            .field("contention", &self.contention())
            .finish()
    }
}

#[cfg(debug_assertions)]
mod held {
    use super::LockClass;
    use crate::ids::DentryId;
    use smallvec::SmallVec;
    use std::cell::RefCell;

    thread_local! {
        static HELD: RefCell<SmallVec<[(DentryId, LockClass); 4]>> = RefCell::new(SmallVec::new());
    }

    pub(super) fn acquire(id: DentryId, class: LockClass) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            debug_assert!(
                held.iter().all(|(h, _)| *h != id),
                "directory lock taken twice by one thread"
            );
            debug_assert!(
                class != LockClass::Child || held.iter().any(|(_, c)| *c == LockClass::Parent),
                "child-class lock without a parent-class lock"
            );
            held.push((id, class));
        });
    }

    pub(super) fn release(id: DentryId) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|(h, _)| *h == id) {
                held.remove(pos);
            }
        });
    }
}

/// Exclusive hold on one directory's modification lock.
pub struct DirLockGuard {
    dentry: Arc<Dentry>,
    class: LockClass,
    _held: HeldDirLock,
}

impl DirLockGuard {
    pub(crate) fn acquire(dentry: &Arc<Dentry>, class: LockClass) -> Self {
        #[cfg(debug_assertions)]
        held::acquire(dentry.id(), class);
        let lock = dentry.dir_lock().lock();
        Self {
            dentry: dentry.clone(),
            class,
            _held: lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn try_acquire(dentry: &Arc<Dentry>, class: LockClass) -> Option<Self> {
        let lock = dentry.dir_lock().try_lock()?;
        #[cfg(debug_assertions)]
        held::acquire(dentry.id(), class);
        Some(Self {
            dentry: dentry.clone(),
            class,
            _held: lock,
        })
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    pub fn class(&self) -> LockClass {
        self.class
    }

    pub fn is_held_for(&self, dentry: &Dentry) -> bool {
        self.dentry.id() == dentry.id()
    }
}

#[cfg(debug_assertions)]
impl Drop for DirLockGuard {
    fn drop(&mut self) {
        held::release(self.dentry.id());
    }
}

impl fmt::Debug for DirLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirLockGuard")
            .field("dentry", &self.dentry.id())
            .field("class", &self.class)
            .finish()
    }
}

/// If `ancestor` is a proper ancestor of `descendant`, return the child of
/// `ancestor` on the way down to `descendant`.
///
/// Parent links only change under the rename mutex, so the answer is stable
/// while a [`RenameGuard`] is held.
pub fn d_ancestor(ancestor: &Arc<Dentry>, descendant: &Arc<Dentry>) -> Option<Arc<Dentry>> {
    let mut cur = descendant.clone();
    loop {
        let parent = cur.parent()?;
        if Arc::ptr_eq(&parent, ancestor) {
            return Some(cur);
        }
        cur = parent;
    }
}

/// Serializes operations that need two directory locks.
pub struct RenameLockCoordinator {
    rename_mutex: Mutex<()>,
}

impl RenameLockCoordinator {
    pub fn new() -> Self {
        Self {
            rename_mutex: Mutex::new(()),
        }
    }

    /// Lock `p1` and `p2` without deadlocking against any other caller.
    pub fn lock_rename(&self, p1: &Arc<Dentry>, p2: &Arc<Dentry>) -> RenameGuard<'_> {
        if Arc::ptr_eq(p1, p2) {
            return RenameGuard {
                first: Some(DirLockGuard::acquire(p1, LockClass::Parent)),
                second: None,
                serial: None,
                trap: None,
            };
        }

        let serial = self.rename_mutex.lock();

        if let Some(trap) = d_ancestor(p2, p1) {
            trace!(target: "vfs_namei::rename", ancestor = p2.id().get(), "lock_rename.p2_ancestor");
            return Self::ordered(serial, p2, p1, Some(trap));
        }
        if let Some(trap) = d_ancestor(p1, p2) {
            trace!(target: "vfs_namei::rename", ancestor = p1.id().get(), "lock_rename.p1_ancestor");
            return Self::ordered(serial, p1, p2, Some(trap));
        }

        let (first, second) = if p1.id() < p2.id() { (p1, p2) } else { (p2, p1) };
        Self::ordered(serial, first, second, None)
    }

    fn ordered<'a>(
        serial: MutexGuard<'a, ()>,
        first: &Arc<Dentry>,
        second: &Arc<Dentry>,
        trap: Option<Arc<Dentry>>,
    ) -> RenameGuard<'a> {
        let first = DirLockGuard::acquire(first, LockClass::Parent);
        let second = DirLockGuard::acquire(second, LockClass::Child);
        RenameGuard {
            first: Some(first),
            second: Some(second),
            serial: Some(serial),
            trap,
        }
    }

    /// True while some two-directory operation is in progress.
    pub fn is_locked(&self) -> bool {
        self.rename_mutex.is_locked()
    }
}

impl Default for RenameLockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks held by [`RenameLockCoordinator::lock_rename`].
pub struct RenameGuard<'a> {
    first: Option<DirLockGuard>,
    second: Option<DirLockGuard>,
    serial: Option<MutexGuard<'a, ()>>,
    trap: Option<Arc<Dentry>>,
}

impl RenameGuard<'_> {
    /// When one directory is an ancestor of the other, the child of the
    /// ancestor that leads to the descendant. Renaming it (or onto it) would
    /// detach a subtree from the namespace.
    pub fn trap(&self) -> Option<&Arc<Dentry>> {
        self.trap.as_ref()
    }

    /// Directories in acquisition order.
    pub fn locked(&self) -> impl Iterator<Item = &DirLockGuard> {
        self.first.iter().chain(self.second.iter())
    }

    pub fn holds(&self, dentry: &Dentry) -> bool {
        self.locked().any(|guard| guard.is_held_for(dentry))
    }

    pub fn is_serialized(&self) -> bool {
        self.serial.is_some()
    }
}

impl Drop for RenameGuard<'_> {
    fn drop(&mut self) {
        drop(self.second.take());
        drop(self.first.take());
        drop(self.serial.take());
    }
}
