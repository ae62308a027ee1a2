use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;
use vfs_namei::{
    BackendInodeId, Dentry, Fs, FsFlags, FsNode, NameHasher, RevalidateCtx, Revalidation,
    RevalidationHook, VfsError, VfsErrorKind, VfsName, VfsResult,
};

use crate::config::RamFsConfig;
use crate::node::RamNode;

pub(crate) struct RamFsInner {
    pub(crate) config: RamFsConfig,
    next_inode: AtomicU64,
    inode_count: AtomicU64,
    lookup_calls: AtomicU64,
    outstanding_links: AtomicU64,
    next_cookie: AtomicU64,
    stale_budget: AtomicU64,
}

impl RamFsInner {
    /// The root directory does not count against `max_inodes`.
    pub(crate) fn alloc_inode(&self) -> VfsResult<BackendInodeId> {
        if let Some(max) = self.config.max_inodes {
            let claimed = self
                .inode_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1));
            if claimed.is_err() {
                return Err(VfsError::new(VfsErrorKind::NoMemory, "ramfs.alloc_inode"));
            }
        } else {
            self.inode_count.fetch_add(1, Ordering::AcqRel);
        }
        let raw = self.next_inode.fetch_add(1, Ordering::Relaxed);
        Ok(BackendInodeId::from_nonzero(NonZeroU64::MIN.saturating_add(raw)))
    }

    pub(crate) fn release_inode(&self) {
        let _ = self
            .inode_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn key(&self, name: &[u8]) -> Vec<u8> {
        if self.config.case_insensitive {
            name.to_ascii_lowercase()
        } else {
            name.to_vec()
        }
    }

    pub(crate) fn note_lookup(&self) -> VfsResult<()> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        self.take_stale("ramfs.lookup")
    }

    pub(crate) fn take_stale(&self, context: &'static str) -> VfsResult<()> {
        let hit = self
            .stale_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(VfsError::new(VfsErrorKind::Stale, context));
        }
        Ok(())
    }

    pub(crate) fn link_acquired(&self) -> u64 {
        self.outstanding_links.fetch_add(1, Ordering::AcqRel);
        self.next_cookie.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn link_released(&self) {
        let _ = self
            .outstanding_links
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// In-memory filesystem.
pub struct RamFs {
    inner: Arc<RamFsInner>,
    root: Arc<RamNode>,
}

impl RamFs {
    pub fn new() -> Arc<Self> {
        Self::with_config(RamFsConfig::default())
    }

    pub fn with_config(config: RamFsConfig) -> Arc<Self> {
        let inner = Arc::new(RamFsInner {
            config,
            next_inode: AtomicU64::new(1),
            inode_count: AtomicU64::new(0),
            lookup_calls: AtomicU64::new(0),
            outstanding_links: AtomicU64::new(0),
            next_cookie: AtomicU64::new(1),
            stale_budget: AtomicU64::new(0),
        });
        let root = RamNode::new_root(inner.clone());
        Arc::new(Self { inner, root })
    }

    pub fn root_node(&self) -> &Arc<RamNode> {
        &self.root
    }

    /// Calls that reached the backing maps through `DirectoryProvider::lookup`.
    pub fn lookup_calls(&self) -> u64 {
        self.inner.lookup_calls.load(Ordering::Relaxed)
    }

    /// `read_link` results not yet handed back through `release_link`.
    pub fn outstanding_links(&self) -> u64 {
        self.inner.outstanding_links.load(Ordering::Acquire)
    }

    /// Make the next `count` lookups or revalidations fail with `Stale`.
    pub fn inject_stale(&self, count: u64) {
        self.inner.stale_budget.store(count, Ordering::Release);
    }
}

impl Fs for RamFs {
    fn provider_name(&self) -> &'static str {
        "ramfs"
    }

    fn root(&self) -> Arc<dyn FsNode> {
        self.root.clone()
    }

    fn flags(&self) -> FsFlags {
        if self.inner.config.reval_dot {
            FsFlags::REVAL_DOT
        } else {
            FsFlags::empty()
        }
    }

    fn revalidator(&self) -> Option<&dyn RevalidationHook> {
        if self.inner.config.volatile || self.inner.config.reval_dot {
            Some(self)
        } else {
            None
        }
    }

    fn hash_name(&self, name: &VfsName<'_>) -> Option<u32> {
        if !self.inner.config.case_insensitive {
            return None;
        }
        let mut hasher = NameHasher::new();
        for &c in name.as_bytes() {
            hasher.write_u8(c.to_ascii_lowercase());
        }
        Some(hasher.finish())
    }

    fn compare_names(&self, cached: &[u8], name: &[u8]) -> bool {
        if self.inner.config.case_insensitive {
            cached.eq_ignore_ascii_case(name)
        } else {
            cached == name
        }
    }
}

impl RevalidationHook for RamFs {
    /// A cached entry is valid while its parent's map still binds its name to
    /// the same inode (or, for a negative entry, to nothing).
    fn revalidate(&self, dentry: &Dentry, _ctx: &RevalidateCtx<'_>) -> VfsResult<Revalidation> {
        self.inner.take_stale("ramfs.revalidate")?;

        let Some(parent) = dentry.parent() else {
            return Ok(Revalidation::Valid);
        };
        let Some(parent_node) = parent.node() else {
            return Ok(Revalidation::Invalidate);
        };
        let Some(dir) = parent_node.as_ref().as_any().downcast_ref::<RamNode>() else {
            return Ok(Revalidation::Valid);
        };

        let name = dentry.name();
        let current = dir.child(name.as_bytes()).map(|node| node.inode());
        let cached = dentry.node().map(|node| node.inode());
        if current == cached {
            Ok(Revalidation::Valid)
        } else {
            trace!(target: "vfs_ramfs", name = ?name.name, "revalidate.stale");
            Ok(Revalidation::Invalidate)
        }
    }
}
