//! The dentry cache.
//!
//! Entries are indexed by `(parent id, name hash)`; collisions share a bucket
//! and are told apart with the filesystem's name comparison. Probes clone the
//! matching entry out of its bucket so no shard lock outlives the call.
//!
//! Moves bump a sequence counter around the rebind. A probe that misses while
//! a move was in flight is repeated, so a concurrent rename can never make an
//! existing entry look absent.

use crate::dentry::Dentry;
use crate::ids::DentryId;
use crate::name::Qstr;
use crate::node::{FsNode, Revalidation, RevalidateCtx};
use crate::VfsResult;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

type BucketKey = (DentryId, u32);
type Bucket = SmallVec<[Arc<Dentry>; 2]>;

#[derive(Default)]
pub struct DentryCache {
    buckets: DashMap<BucketKey, Bucket>,
    rename_seq: AtomicU64,
}

impl DentryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(parent: &Dentry, hash: u32) -> BucketKey {
        (parent.id(), hash)
    }

    /// Single optimistic probe. May miss an entry that is being moved.
    pub fn lookup_fast(&self, parent: &Dentry, name: &Qstr<'_>) -> Option<Arc<Dentry>> {
        let bucket = self.buckets.get(&Self::key(parent, name.hash))?;
        let fs = parent.sb().fs();
        bucket
            .iter()
            .find(|dentry| {
                dentry.is_hashed()
                    && dentry.parent_is(parent)
                    && dentry.with_name(|cached| fs.compare_names(cached.as_bytes(), name.name.as_bytes()))
            })
            .cloned()
    }

    /// Probe, repeating a miss that raced with a move.
    pub fn lookup(&self, parent: &Dentry, name: &Qstr<'_>) -> Option<Arc<Dentry>> {
        loop {
            let seq = self.read_seqbegin();
            let found = self.lookup_fast(parent, name);
            if found.is_some() || !self.read_seqretry(seq) {
                return found;
            }
            trace!(target: "vfs_namei::dcache", "lookup.seq_retry");
        }
    }

    /// Full cache step of a component lookup: both probes, then the
    /// filesystem's revalidation hook.
    ///
    /// `Ok(None)` tells the caller to go to the backing store. Walks under
    /// [`LookupFlags::REVAL`](crate::LookupFlags::REVAL) skip this step and check the backing store
    /// first; see [`Self::d_lookup_reuse`].
    pub fn cached_lookup(
        &self,
        parent: &Dentry,
        name: &Qstr<'_>,
        ctx: &RevalidateCtx<'_>,
    ) -> VfsResult<Option<Arc<Dentry>>> {
        let dentry = match self.lookup_fast(parent, name) {
            Some(dentry) => dentry,
            None => match self.lookup(parent, name) {
                Some(dentry) => dentry,
                None => return Ok(None),
            },
        };

        self.revalidate(dentry, ctx)
    }

    /// Run the filesystem's revalidation hook on a cached entry.
    pub fn revalidate(
        &self,
        dentry: Arc<Dentry>,
        ctx: &RevalidateCtx<'_>,
    ) -> VfsResult<Option<Arc<Dentry>>> {
        let fs = dentry.sb().fs().clone();
        let Some(hook) = fs.revalidator() else {
            return Ok(Some(dentry));
        };
        match hook.revalidate(&dentry, ctx)? {
            Revalidation::Valid => Ok(Some(dentry)),
            Revalidation::Invalidate => {
                if self.invalidate(&dentry) {
                    debug!(target: "vfs_namei::dcache", dentry = dentry.id().get(), "revalidate.invalidated");
                    Ok(None)
                } else {
                    // Mountpoints and busy directories stay put.
                    Ok(Some(dentry))
                }
            }
        }
    }

    /// Allocate an unhashed negative child; publish it with [`Self::d_add`].
    pub fn d_alloc(&self, parent: &Arc<Dentry>, name: &Qstr<'_>) -> Arc<Dentry> {
        Dentry::new_child(parent, name)
    }

    /// Bind `node` (or nothing, for a negative entry) and publish the entry.
    pub fn d_add(&self, dentry: &Arc<Dentry>, node: Option<Arc<dyn FsNode>>) {
        dentry.set_node(node);
        self.hash(dentry);
    }

    /// Turn a negative entry into a positive one after a create.
    pub fn d_instantiate(&self, dentry: &Arc<Dentry>, node: Arc<dyn FsNode>) {
        dentry.set_node(Some(node));
    }

    fn hash(&self, dentry: &Arc<Dentry>) {
        let Some(parent) = dentry.parent() else {
            return;
        };
        let hash = dentry.with_name(|name| name.hash);
        let mut bucket = self.buckets.entry(Self::key(&parent, hash)).or_default();
        if !bucket.iter().any(|d| Arc::ptr_eq(d, dentry)) {
            bucket.push(dentry.clone());
        }
        dentry.set_hashed(true);
    }

    /// Remove `dentry` from the index. Holders keep their references.
    pub fn unhash(&self, dentry: &Arc<Dentry>) {
        dentry.set_hashed(false);
        let Some(parent) = dentry.parent() else {
            return;
        };
        let key = Self::key(&parent, dentry.with_name(|name| name.hash));
        self.buckets.remove_if_mut(&key, |_, bucket| {
            bucket.retain(|d| !Arc::ptr_eq(d, dentry));
            bucket.is_empty()
        });
    }

    /// Drop a stale entry.
    ///
    /// Refuses (returns `false`) for mountpoints, which must stay reachable
    /// for their mounts, and for directories still in use. A directory's
    /// unused descendants are pruned first; after that only the index and
    /// the caller may hold it.
    pub fn invalidate(&self, dentry: &Arc<Dentry>) -> bool {
        if dentry.is_mountpoint() {
            return false;
        }
        if dentry.is_dir() {
            self.prune_children(dentry);
            let index_refs = usize::from(dentry.is_hashed());
            if Arc::strong_count(dentry) > index_refs + 1 {
                debug!(target: "vfs_namei::dcache", dentry = dentry.id().get(), "invalidate.busy");
                return false;
            }
        }
        self.unhash(dentry);
        dentry.bump_generation();
        true
    }

    /// After a backing-store lookup of `name` under `parent` (directory lock
    /// held), return the cached entry if it still names `node`.
    ///
    /// A cached entry for a different object is invalidated, and `None`
    /// tells the caller to publish a fresh one. An entry that refuses
    /// invalidation is returned as is.
    pub fn d_lookup_reuse(
        &self,
        parent: &Dentry,
        name: &Qstr<'_>,
        node: Option<&Arc<dyn FsNode>>,
    ) -> Option<Arc<Dentry>> {
        let existing = self.lookup(parent, name)?;
        let same = match (existing.node(), node) {
            (None, None) => true,
            (Some(cached), Some(found)) => cached.inode() == found.inode(),
            _ => false,
        };
        if same || !self.invalidate(&existing) {
            trace!(target: "vfs_namei::dcache", dentry = existing.id().get(), same, "lookup.reuse");
            return Some(existing);
        }
        None
    }

    /// Rebind `dentry` to the parent and name of `target`, which is unhashed.
    ///
    /// Callers hold both parents' directory locks via the rename coordinator.
    pub fn d_move(&self, dentry: &Arc<Dentry>, target: &Arc<Dentry>) {
        let (Some(new_parent), new_name) = (target.parent(), target.name()) else {
            return;
        };
        self.write_seqbegin();
        self.unhash(target);
        self.unhash(dentry);
        dentry.rebind(new_parent, new_name);
        self.hash(dentry);
        self.write_seqend();
        trace!(target: "vfs_namei::dcache", dentry = dentry.id().get(), "d_move");
    }

    /// Drop every entry only the cache references, leaves first.
    pub fn shrink(&self) -> usize {
        let dropped = self.shrink_where(|_| true);
        debug!(target: "vfs_namei::dcache", dropped, "shrink");
        dropped
    }

    /// Drop the unreferenced cached descendants of `dir`, leaves first.
    pub fn prune_children(&self, dir: &Dentry) -> usize {
        let dropped = self.shrink_where(|dentry| is_descendant(dentry, dir));
        if dropped > 0 {
            trace!(target: "vfs_namei::dcache", dir = dir.id().get(), dropped, "prune_children");
        }
        dropped
    }

    fn shrink_where(&self, filter: impl Fn(&Dentry) -> bool) -> usize {
        let mut dropped = 0;
        loop {
            let before = dropped;
            self.buckets.retain(|_, bucket| {
                bucket.retain(|dentry| {
                    let unused = Arc::strong_count(dentry) == 1
                        && !dentry.is_mountpoint()
                        && filter(dentry);
                    if unused {
                        dentry.set_hashed(false);
                        dropped += 1;
                    }
                    !unused
                });
                !bucket.is_empty()
            });
            if dropped == before {
                return dropped;
            }
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn read_seqbegin(&self) -> u64 {
        loop {
            let seq = self.rename_seq.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            std::hint::spin_loop();
        }
    }

    fn read_seqretry(&self, seq: u64) -> bool {
        self.rename_seq.load(Ordering::Acquire) != seq
    }

    fn write_seqbegin(&self) {
        self.rename_seq.fetch_add(1, Ordering::AcqRel);
    }

    fn write_seqend(&self) {
        self.rename_seq.fetch_add(1, Ordering::AcqRel);
    }
}

fn is_descendant(dentry: &Dentry, ancestor: &Dentry) -> bool {
    let mut cur = dentry.parent();
    while let Some(parent) = cur {
        if parent.id() == ancestor.id() {
            return true;
        }
        cur = parent.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{Fs, SuperBlock};
    use crate::name::VfsName;
    use crate::node::{NodeAttr, VfsFileType};
    use crate::BackendInodeId;

    struct Leaf(u64);

    impl FsNode for Leaf {
        fn inode(&self) -> BackendInodeId {
            BackendInodeId::new(self.0).expect("non-zero inode")
        }

        fn file_type(&self) -> VfsFileType {
            VfsFileType::Directory
        }

        fn attr(&self) -> NodeAttr {
            NodeAttr::new(0o755, 0, 0)
        }
    }

    struct CaseFoldFs;

    impl Fs for CaseFoldFs {
        fn provider_name(&self) -> &'static str {
            "casefold"
        }

        fn root(&self) -> Arc<dyn FsNode> {
            Arc::new(Leaf(1))
        }

        fn compare_names(&self, cached: &[u8], name: &[u8]) -> bool {
            cached.eq_ignore_ascii_case(name)
        }
    }

    fn qstr(name: &'static [u8]) -> Qstr<'static> {
        Qstr::new(VfsName::new(name).expect("name"))
    }

    #[test]
    fn add_then_lookup_returns_same_entry() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let dentry = cache.d_alloc(&root, &qstr(b"etc"));
        cache.d_add(&dentry, Some(Arc::new(Leaf(2))));

        let found = cache.lookup(&root, &qstr(b"etc")).expect("hit");
        assert!(Arc::ptr_eq(&found, &dentry));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn colliding_hashes_use_name_compare() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let a = cache.d_alloc(&root, &Qstr::with_hash(VfsName::new(b"a").expect("name"), 7));
        let b = cache.d_alloc(&root, &Qstr::with_hash(VfsName::new(b"b").expect("name"), 7));
        cache.d_add(&a, None);
        cache.d_add(&b, None);

        let probe = Qstr::with_hash(VfsName::new(b"B").expect("name"), 7);
        let found = cache.lookup_fast(&root, &probe).expect("case-folded hit");
        assert!(Arc::ptr_eq(&found, &b));
    }

    #[test]
    fn invalidate_spares_mountpoints() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let mnt = cache.d_alloc(&root, &qstr(b"mnt"));
        cache.d_add(&mnt, Some(Arc::new(Leaf(3))));
        mnt.mount_inc();

        assert!(!cache.invalidate(&mnt));
        assert!(cache.lookup(&root, &qstr(b"mnt")).is_some());

        mnt.mount_dec();
        let generation = mnt.generation();
        assert!(cache.invalidate(&mnt));
        assert!(mnt.generation() > generation);
        assert!(cache.lookup(&root, &qstr(b"mnt")).is_none());
    }

    #[test]
    fn d_move_rebinds_and_unhashes_target() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let dir = cache.d_alloc(&root, &qstr(b"dir"));
        cache.d_add(&dir, Some(Arc::new(Leaf(4))));
        let file = cache.d_alloc(&root, &qstr(b"old"));
        cache.d_add(&file, Some(Arc::new(Leaf(5))));
        let target = cache.d_alloc(&dir, &qstr(b"new"));
        cache.d_add(&target, None);

        cache.d_move(&file, &target);

        assert!(cache.lookup(&root, &qstr(b"old")).is_none());
        let moved = cache.lookup(&dir, &qstr(b"new")).expect("moved entry");
        assert!(Arc::ptr_eq(&moved, &file));
        assert!(!target.is_hashed());
        assert!(Arc::ptr_eq(&file.parent().expect("parent"), &dir));
    }

    #[test]
    fn shrink_drops_unreferenced_leaves_first() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let a = cache.d_alloc(&root, &qstr(b"a"));
        cache.d_add(&a, Some(Arc::new(Leaf(6))));
        let b = cache.d_alloc(&a, &qstr(b"b"));
        cache.d_add(&b, Some(Arc::new(Leaf(7))));
        let keep = cache.d_alloc(&root, &qstr(b"keep"));
        cache.d_add(&keep, None);
        drop(a);
        drop(b);

        assert_eq!(cache.shrink(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&root, &qstr(b"keep")).is_some());
    }

    #[test]
    fn invalidate_refuses_directories_in_use() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let dir = cache.d_alloc(&root, &qstr(b"cwd"));
        cache.d_add(&dir, Some(Arc::new(Leaf(8))));
        let held = dir.clone();

        assert!(!cache.invalidate(&dir));
        assert!(dir.is_hashed());

        drop(held);
        assert!(cache.invalidate(&dir));
        assert!(!dir.is_hashed());
    }

    #[test]
    fn invalidating_a_directory_prunes_its_children() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let dir = cache.d_alloc(&root, &qstr(b"dir"));
        cache.d_add(&dir, Some(Arc::new(Leaf(9))));
        let sub = cache.d_alloc(&dir, &qstr(b"sub"));
        cache.d_add(&sub, Some(Arc::new(Leaf(10))));
        let leaf = cache.d_alloc(&sub, &qstr(b"leaf"));
        cache.d_add(&leaf, None);
        drop(sub);
        drop(leaf);
        assert_eq!(cache.len(), 3);

        assert!(cache.invalidate(&dir));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reuse_keeps_entries_naming_the_same_object() {
        let cache = DentryCache::new();
        let root = SuperBlock::new(Arc::new(CaseFoldFs)).alloc_root();
        let node: Arc<dyn FsNode> = Arc::new(Leaf(11));
        let dentry = cache.d_alloc(&root, &qstr(b"same"));
        cache.d_add(&dentry, Some(node.clone()));

        let reused = cache
            .d_lookup_reuse(&root, &qstr(b"same"), Some(&node))
            .expect("same inode");
        assert!(Arc::ptr_eq(&reused, &dentry));
        drop(reused);

        // Replaced behind the cache while someone still holds the directory.
        let other: Arc<dyn FsNode> = Arc::new(Leaf(12));
        let kept = cache
            .d_lookup_reuse(&root, &qstr(b"same"), Some(&other))
            .expect("busy directory is kept");
        assert!(Arc::ptr_eq(&kept, &dentry));
        drop(kept);

        drop(dentry);
        assert!(cache.d_lookup_reuse(&root, &qstr(b"same"), Some(&other)).is_none());
        assert!(cache.lookup(&root, &qstr(b"same")).is_none());
        assert!(cache.d_lookup_reuse(&root, &qstr(b"missing"), None).is_none());
    }
}
