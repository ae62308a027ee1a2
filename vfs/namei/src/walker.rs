//! Mount-aware path walking.
//!
//! [`PathWalker`] resolves a byte path one component at a time: search
//! permission on the current directory, a dentry cache probe with a fallback
//! to the backing store, mount crossing, then symlink following. Resolutions
//! that fail with [`VfsErrorKind::Stale`] are repeated once with
//! [`LookupFlags::REVAL`], which checks every component against the backing
//! store. Entries that still name the same object are kept, so a forced
//! revalidation never splits one directory into two dentries.

use crate::context::NameiContext;
use crate::dcache::DentryCache;
use crate::dentry::Dentry;
use crate::flags::{LastType, LookupFlags, LookupIntent};
use crate::fs::FsFlags;
use crate::lexer::{Component, ComponentKind, ComponentLexer};
use crate::mount::{Mount, MountTableProvider};
use crate::name::{Qstr, QstrBuf, VfsName};
use crate::node::{
    CreateAttrs, DirectoryProvider, FsNode, NodeFlags, RevalidateCtx, Revalidation, VfsFileType,
};
use crate::path::PathRef;
use crate::permission::{exec_permission, inode_permission, may_create, may_delete, MayMask};
use crate::rename_lock::{DirLockGuard, RenameGuard, RenameLockCoordinator};
use crate::{VfsError, VfsErrorKind, VfsResult};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of a resolution.
///
/// Without [`LookupFlags::PARENT`], `path` is the resolved object. In parent
/// mode `path` is the directory holding the final component, which is
/// described by `last` and `last_type` but not looked up.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub path: PathRef,
    /// Owned copy of the final component (parent mode).
    pub last: Option<QstrBuf>,
    pub last_type: LastType,
    /// The final component was followed by one or more slashes.
    pub trailing_slash: bool,
    pub flags: LookupFlags,
    pub intent: LookupIntent,
    pub(crate) root: PathRef,
    pub(crate) depth: u32,
    pub(crate) total_links: u32,
}

impl ResolvedPath {
    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.path.dentry
    }

    pub fn mnt(&self) -> &Arc<Mount> {
        &self.path.mnt
    }

    pub fn last_name(&self) -> Option<&[u8]> {
        self.last.as_ref().map(QstrBuf::as_bytes)
    }

    /// Symlinks followed while resolving.
    pub fn links_followed(&self) -> u32 {
        self.total_links
    }

    pub fn into_path(self) -> PathRef {
        self.path
    }
}

/// Result of [`PathWalker::resolve_create`].
#[derive(Clone, Debug)]
pub struct CreateResult {
    pub path: PathRef,
    pub created: bool,
}

/// A negative dentry found under a locked parent, ready to be created.
///
/// The parent stays locked until this value is dropped or consumed.
pub struct CreateLookup<'a> {
    dcache: &'a DentryCache,
    parent: PathRef,
    dentry: Arc<Dentry>,
    _guard: DirLockGuard,
}

impl CreateLookup<'_> {
    pub fn parent(&self) -> &PathRef {
        &self.parent
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    /// Create the object in the backing store and bind it to the dentry.
    pub fn create(self, ctx: &NameiContext, file_type: VfsFileType, mode: u32) -> VfsResult<PathRef> {
        create_in(self.dcache, ctx, &self.parent, &self.dentry, file_type, mode)?;
        Ok(PathRef::new(self.parent.mnt.clone(), self.dentry.clone()))
    }
}

fn create_in(
    dcache: &DentryCache,
    ctx: &NameiContext,
    dir: &PathRef,
    dentry: &Arc<Dentry>,
    file_type: VfsFileType,
    mode: u32,
) -> VfsResult<()> {
    may_create(&ctx.cred, dir, dentry)?;
    let dir_node = dir
        .dentry
        .node()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "create.dir"))?;
    let provider = dir_node
        .as_dir()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotDir, "create.dir"))?;
    let name = dentry.name();
    let attrs = CreateAttrs {
        file_type,
        mode,
        uid: ctx.cred.uid,
        gid: ctx.cred.gid,
    };
    let node = provider.create(&name.name.as_name(), attrs)?;
    dcache.d_instantiate(dentry, node);
    debug!(target: "vfs_namei::walk", name = ?name.name, ?file_type, "create");
    Ok(())
}

pub struct PathWalker {
    mounts: Arc<dyn MountTableProvider>,
    dcache: Arc<DentryCache>,
    renames: RenameLockCoordinator,
}

impl PathWalker {
    pub fn new(mounts: Arc<dyn MountTableProvider>) -> Self {
        Self::with_cache(mounts, Arc::new(DentryCache::new()))
    }

    pub fn with_cache(mounts: Arc<dyn MountTableProvider>, dcache: Arc<DentryCache>) -> Self {
        Self {
            mounts,
            dcache,
            renames: RenameLockCoordinator::new(),
        }
    }

    pub fn dcache(&self) -> &Arc<DentryCache> {
        &self.dcache
    }

    pub fn renames(&self) -> &RenameLockCoordinator {
        &self.renames
    }

    /// Lock two directories for a multi-entry operation.
    pub fn lock_rename(&self, p1: &Arc<Dentry>, p2: &Arc<Dentry>) -> RenameGuard<'_> {
        self.renames.lock_rename(p1, p2)
    }

    /// Resolve `path` from the context's root (absolute) or cwd (relative).
    pub fn resolve(&self, ctx: &NameiContext, path: &[u8], flags: LookupFlags) -> VfsResult<ResolvedPath> {
        self.path_walk(ctx, None, path, flags, LookupIntent::None)
    }

    pub fn resolve_with_intent(
        &self,
        ctx: &NameiContext,
        path: &[u8],
        flags: LookupFlags,
        intent: LookupIntent,
    ) -> VfsResult<ResolvedPath> {
        self.path_walk(ctx, None, path, flags, intent)
    }

    /// Resolve `path` beneath `base`, which also pins the root: neither `..`
    /// nor an absolute symlink can leave it.
    pub fn resolve_at(
        &self,
        ctx: &NameiContext,
        base: &PathRef,
        path: &[u8],
        flags: LookupFlags,
    ) -> VfsResult<ResolvedPath> {
        self.path_walk(ctx, Some(base), path, flags, LookupIntent::None)
    }

    fn path_walk(
        &self,
        ctx: &NameiContext,
        base: Option<&PathRef>,
        path: &[u8],
        flags: LookupFlags,
        intent: LookupIntent,
    ) -> VfsResult<ResolvedPath> {
        if path.is_empty() {
            return Err(VfsError::new(VfsErrorKind::NotFound, "path.empty"));
        }
        if path.len() > ctx.config.max_path_len {
            return Err(VfsError::new(VfsErrorKind::NameTooLong, "path.too_long"));
        }
        if path.contains(&0) {
            return Err(VfsError::new(VfsErrorKind::InvalidInput, "path.nul"));
        }

        match self.do_path_lookup(ctx, base, path, flags, intent) {
            Err(err) if err.is_stale() => {
                debug!(
                    target: "vfs_namei::walk",
                    path = %String::from_utf8_lossy(path),
                    context = err.context(),
                    "resolve.stale_retry"
                );
                self.do_path_lookup(ctx, base, path, flags | LookupFlags::REVAL, intent)
            }
            res => res,
        }
    }

    fn do_path_lookup(
        &self,
        ctx: &NameiContext,
        base: Option<&PathRef>,
        path: &[u8],
        flags: LookupFlags,
        intent: LookupIntent,
    ) -> VfsResult<ResolvedPath> {
        let (root, start) = match base {
            Some(base) => (base.clone(), base.clone()),
            None if path.first() == Some(&b'/') => (ctx.root.clone(), ctx.root.clone()),
            None => (ctx.root.clone(), ctx.cwd.clone()),
        };
        let mut nd = ResolvedPath {
            path: start,
            last: None,
            last_type: LastType::Root,
            trailing_slash: false,
            flags,
            intent,
            root,
            depth: 0,
            total_links: 0,
        };
        self.link_path_walk(ctx, path, &mut nd)?;
        Ok(nd)
    }

    /// Walk `name` starting at `nd.path`.
    pub(crate) fn link_path_walk(&self, ctx: &NameiContext, name: &[u8], nd: &mut ResolvedPath) -> VfsResult<()> {
        let mut lookup_flags = nd.flags;
        if nd.depth > 0 {
            lookup_flags = LookupFlags::FOLLOW | (nd.flags & LookupFlags::CONTINUE);
        }

        let mut lexer = ComponentLexer::new(name);
        let Some(mut comp) = lexer.next() else {
            return self.return_reval(nd);
        };

        loop {
            let dir = nd
                .path
                .dentry
                .node()
                .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "walk.dir"))?;
            exec_permission(&ctx.cred, dir.as_ref())?;
            if comp.len() > ctx.config.max_name_len {
                return Err(VfsError::new(VfsErrorKind::NameTooLong, "walk.name"));
            }

            if comp.is_last {
                if comp.trailing_slash {
                    lookup_flags |= LookupFlags::FOLLOW | LookupFlags::DIRECTORY;
                }
                return self.walk_last_component(ctx, nd, &comp, lookup_flags);
            }

            nd.flags |= LookupFlags::CONTINUE;
            match comp.kind {
                ComponentKind::Dot => {}
                ComponentKind::DotDot => self.follow_dotdot(nd),
                ComponentKind::Normal => {
                    let qstr = self.hashed_qstr(&nd.path.dentry, &comp)?;
                    let next = self.do_lookup(nd, &qstr, true)?;
                    if next.dentry.is_negative() {
                        return Err(VfsError::new(VfsErrorKind::NotFound, "walk.component"));
                    }
                    if next.dentry.is_symlink() {
                        self.do_follow_link(ctx, next, nd)?;
                        if nd.path.dentry.is_negative() {
                            return Err(VfsError::new(VfsErrorKind::NotFound, "walk.link_target"));
                        }
                    } else {
                        nd.path = next;
                    }
                    if !nd.path.dentry.can_lookup() {
                        return Err(VfsError::new(VfsErrorKind::NotDir, "walk.not_dir"));
                    }
                }
            }

            comp = lexer
                .next()
                .ok_or_else(|| VfsError::new(VfsErrorKind::Internal, "walk.lexer"))?;
        }
    }

    fn walk_last_component(
        &self,
        ctx: &NameiContext,
        nd: &mut ResolvedPath,
        comp: &Component<'_>,
        lookup_flags: LookupFlags,
    ) -> VfsResult<()> {
        nd.flags &= lookup_flags | !LookupFlags::CONTINUE;

        if lookup_flags.contains(LookupFlags::PARENT) {
            let qstr = self.hashed_qstr(&nd.path.dentry, comp)?;
            nd.last = Some(qstr.to_owned_buf());
            nd.trailing_slash = comp.trailing_slash;
            nd.last_type = match comp.kind {
                ComponentKind::Normal => LastType::Normal,
                ComponentKind::Dot => LastType::Dot,
                ComponentKind::DotDot => LastType::DotDot,
            };
            if nd.last_type == LastType::Normal {
                return Ok(());
            }
            return self.return_reval(nd);
        }

        match comp.kind {
            ComponentKind::Dot => return self.return_reval(nd),
            ComponentKind::DotDot => {
                self.follow_dotdot(nd);
                return self.return_reval(nd);
            }
            ComponentKind::Normal => {}
        }

        let qstr = self.hashed_qstr(&nd.path.dentry, comp)?;
        let follow = lookup_flags.contains(LookupFlags::FOLLOW);
        let next = self.do_lookup(nd, &qstr, follow)?;
        if follow && next.dentry.is_symlink() {
            self.do_follow_link(ctx, next, nd)?;
        } else {
            nd.path = next;
        }

        if nd.path.dentry.is_negative() {
            return Err(VfsError::new(VfsErrorKind::NotFound, "walk.last"));
        }
        if lookup_flags.contains(LookupFlags::DIRECTORY) && !nd.path.dentry.can_lookup() {
            return Err(VfsError::new(VfsErrorKind::NotDir, "walk.last.not_dir"));
        }
        Ok(())
    }

    fn hashed_qstr<'a>(&self, dir: &Dentry, comp: &Component<'a>) -> VfsResult<Qstr<'a>> {
        let mut qstr = comp.qstr()?;
        if let Some(hash) = dir.sb().fs().hash_name(&qstr.name) {
            qstr.hash = hash;
        }
        Ok(qstr)
    }

    /// Walks ending on `.`, `..` or a root never revalidated their final
    /// dentry; do it now for filesystems that ask for it.
    fn return_reval(&self, nd: &ResolvedPath) -> VfsResult<()> {
        let fs = nd.path.dentry.sb().fs().clone();
        if !fs.flags().contains(FsFlags::REVAL_DOT) {
            return Ok(());
        }
        let Some(hook) = fs.revalidator() else {
            return Ok(());
        };
        let rctx = RevalidateCtx {
            flags: nd.flags,
            intent: &nd.intent,
        };
        match hook.revalidate(&nd.path.dentry, &rctx)? {
            Revalidation::Valid => Ok(()),
            Revalidation::Invalidate => Err(VfsError::new(VfsErrorKind::Stale, "walk.reval_dot")),
        }
    }

    fn do_lookup(&self, nd: &ResolvedPath, name: &Qstr<'_>, cross_mounts: bool) -> VfsResult<PathRef> {
        let parent = &nd.path.dentry;
        let rctx = RevalidateCtx {
            flags: nd.flags,
            intent: &nd.intent,
        };
        let cached = if nd.flags.contains(LookupFlags::REVAL) {
            None
        } else {
            self.dcache.cached_lookup(parent, name, &rctx)?
        };
        let dentry = match cached {
            Some(dentry) => {
                trace!(target: "vfs_namei::walk", name = ?name.name, "lookup.cached");
                dentry
            }
            None => self.real_lookup(parent, name, &rctx)?,
        };

        let mut path = PathRef::new(nd.path.mnt.clone(), dentry);
        if cross_mounts {
            self.follow_mount(&mut path);
        }
        Ok(path)
    }

    /// Cache miss (or a forced revalidation): ask the backing store under the
    /// directory lock.
    fn real_lookup(&self, parent: &Arc<Dentry>, name: &Qstr<'_>, rctx: &RevalidateCtx<'_>) -> VfsResult<Arc<Dentry>> {
        let dir_node = parent
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "lookup.dir"))?;
        let dir = dir_node
            .as_dir()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotDir, "lookup.dir"))?;

        let guard = parent.lock();
        let found = if rctx.flags.contains(LookupFlags::REVAL) {
            None
        } else {
            self.dcache.lookup(parent, name)
        };
        if let Some(found) = found {
            // Another walker populated the entry while we waited.
            drop(guard);
            trace!(target: "vfs_namei::walk", name = ?name.name, "lookup.raced");
            return self
                .dcache
                .revalidate(found, rctx)?
                .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "lookup.raced"));
        }

        let dentry = self.lookup_backing(parent, dir_node.as_ref(), dir, name)?;
        drop(guard);
        Ok(dentry)
    }

    /// Consult the directory provider and cache the answer. Caller holds the
    /// directory lock.
    fn lookup_backing(
        &self,
        parent: &Arc<Dentry>,
        dir_node: &dyn FsNode,
        dir: &dyn DirectoryProvider,
        name: &Qstr<'_>,
    ) -> VfsResult<Arc<Dentry>> {
        if dir_node.attr().flags.contains(NodeFlags::DEAD_DIR) {
            return Err(VfsError::new(VfsErrorKind::NotFound, "lookup.dead_dir"));
        }
        let node = dir.lookup(&name.name)?;
        trace!(
            target: "vfs_namei::walk",
            name = ?name.name,
            negative = node.is_none(),
            "lookup.backing"
        );
        // A forced revalidation keeps the entry (and its directory lock) when
        // the backing store still names the same object.
        if let Some(existing) = self.dcache.d_lookup_reuse(parent, name, node.as_ref()) {
            return Ok(existing);
        }
        let dentry = self.dcache.d_alloc(parent, name);
        self.dcache.d_add(&dentry, node);
        Ok(dentry)
    }

    /// Cached-or-backing lookup of one component in a directory whose lock
    /// the caller already holds. Never takes a lock.
    fn lookup_hash(
        &self,
        ctx: &NameiContext,
        base: &Arc<Dentry>,
        name: &Qstr<'_>,
        flags: LookupFlags,
        intent: &LookupIntent,
    ) -> VfsResult<Arc<Dentry>> {
        let dir_node = base
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "lookup_hash.dir"))?;
        inode_permission(&ctx.cred, dir_node.as_ref(), MayMask::EXEC, false)?;
        let dir = dir_node
            .as_dir()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotDir, "lookup_hash.dir"))?;

        if !flags.contains(LookupFlags::REVAL) {
            let rctx = RevalidateCtx { flags, intent };
            if let Some(dentry) = self.dcache.cached_lookup(base, name, &rctx)? {
                return Ok(dentry);
            }
        }
        self.lookup_backing(base, dir_node.as_ref(), dir, name)
    }

    /// Cross into whatever is mounted on `path`, through every stacked
    /// mount. Returns whether anything was crossed.
    fn follow_mount(&self, path: &mut PathRef) -> bool {
        let mut crossed = false;
        while path.dentry.is_mountpoint() {
            let Some(mnt) = self.mounts.cross_down(&path.mnt, &path.dentry) else {
                break;
            };
            debug!(target: "vfs_namei::walk", mount = mnt.id().get(), "mount.cross_down");
            *path = PathRef::mount_root(mnt);
            crossed = true;
        }
        crossed
    }

    fn follow_dotdot(&self, nd: &mut ResolvedPath) {
        loop {
            if nd.path.same(&nd.root) {
                break;
            }
            if !nd.path.is_mount_root() {
                if let Some(parent) = nd.path.dentry.parent() {
                    nd.path.dentry = parent;
                }
                break;
            }
            let Some((mnt, mountpoint)) = self.mounts.cross_up(&nd.path.mnt) else {
                break;
            };
            debug!(target: "vfs_namei::walk", mount = mnt.id().get(), "mount.cross_up");
            nd.path = PathRef::new(mnt, mountpoint);
        }
        self.follow_mount(&mut nd.path);
    }

    /// Look up a single component in a directory the caller has locked. No
    /// symlinks are followed and no mounts are crossed.
    pub fn lookup_one(&self, ctx: &NameiContext, dir: &DirLockGuard, name: &[u8]) -> VfsResult<Arc<Dentry>> {
        let name = VfsName::new(name).map_err(|_| VfsError::new(VfsErrorKind::PermissionDenied, "lookup_one.name"))?;
        if name.len() > ctx.config.max_name_len {
            return Err(VfsError::new(VfsErrorKind::NameTooLong, "lookup_one.name"));
        }
        let base = dir.dentry();
        let mut qstr = Qstr::new(name);
        if let Some(hash) = base.sb().fs().hash_name(&name) {
            qstr.hash = hash;
        }
        self.lookup_hash(ctx, base, &qstr, LookupFlags::empty(), &LookupIntent::None)
    }

    /// Lock the parent found by a parent-mode resolution and look up its last
    /// component for creation. Fails with `AlreadyExists` if it exists.
    pub fn lookup_create(&self, ctx: &NameiContext, nd: &ResolvedPath, is_dir: bool) -> VfsResult<CreateLookup<'_>> {
        let guard = nd.path.dentry.lock();
        let last = match (&nd.last, nd.last_type) {
            (Some(last), LastType::Normal) => last,
            _ => return Err(VfsError::new(VfsErrorKind::AlreadyExists, "lookup_create.last_type")),
        };
        let flags = (nd.flags - LookupFlags::PARENT) | LookupFlags::CREATE | LookupFlags::EXCL;
        let intent = LookupIntent::Open {
            create: true,
            exclusive: true,
            mode: 0,
        };
        let dentry = self.lookup_hash(ctx, &nd.path.dentry, &last.as_qstr(), flags, &intent)?;
        if !dentry.is_negative() {
            return Err(VfsError::new(VfsErrorKind::AlreadyExists, "lookup_create.exists"));
        }
        if !is_dir && nd.trailing_slash {
            return Err(VfsError::new(VfsErrorKind::NotFound, "lookup_create.trailing_slash"));
        }
        Ok(CreateLookup {
            dcache: &self.dcache,
            parent: nd.path.clone(),
            dentry,
            _guard: guard,
        })
    }

    /// Open-with-create walk: resolve the parent, create the final component
    /// if it is absent, otherwise follow it (symlinks included, when
    /// [`LookupFlags::FOLLOW`] is set) to an existing non-directory.
    pub fn resolve_create(
        &self,
        ctx: &NameiContext,
        path: &[u8],
        flags: LookupFlags,
        mode: u32,
    ) -> VfsResult<CreateResult> {
        let exclusive = flags.contains(LookupFlags::EXCL);
        let follow = flags.contains(LookupFlags::FOLLOW);
        let intent = LookupIntent::Open {
            create: true,
            exclusive,
            mode,
        };
        let walk_flags = LookupFlags::PARENT | (flags & LookupFlags::REVAL);
        let mut nd = self.path_walk(ctx, None, path, walk_flags, intent)?;
        if nd.last_type != LastType::Normal || nd.trailing_slash {
            return Err(VfsError::new(VfsErrorKind::IsDir, "open.create.last_type"));
        }
        nd.flags.remove(LookupFlags::PARENT);
        nd.flags |= LookupFlags::CREATE | LookupFlags::OPEN;
        if exclusive {
            nd.flags |= LookupFlags::EXCL;
        }

        let mut follows = 0;
        loop {
            let dir = nd.path.dentry.clone();
            let guard = dir.lock();
            let last = nd
                .last
                .clone()
                .ok_or_else(|| VfsError::new(VfsErrorKind::Internal, "open.create.last"))?;
            let dentry = self.lookup_hash(ctx, &dir, &last.as_qstr(), nd.flags, &nd.intent)?;

            if dentry.is_negative() {
                create_in(&self.dcache, ctx, &nd.path, &dentry, VfsFileType::RegularFile, mode)?;
                drop(guard);
                return Ok(CreateResult {
                    path: PathRef::new(nd.path.mnt.clone(), dentry),
                    created: true,
                });
            }
            drop(guard);

            if exclusive {
                return Err(VfsError::new(VfsErrorKind::AlreadyExists, "open.create.exists"));
            }
            let mut found = PathRef::new(nd.path.mnt.clone(), dentry);
            if self.follow_mount(&mut found) && !follow {
                return Err(VfsError::new(VfsErrorKind::TooManySymlinks, "open.create.mount"));
            }
            if found.dentry.is_negative() {
                return Err(VfsError::new(VfsErrorKind::NotFound, "open.create.negative"));
            }

            if found.dentry.is_symlink() {
                if !follow {
                    return Err(VfsError::new(VfsErrorKind::TooManySymlinks, "open.create.nofollow"));
                }
                if follows >= ctx.config.max_create_follows || nd.total_links >= ctx.config.max_total_links {
                    return Err(VfsError::new(VfsErrorKind::TooManySymlinks, "open.create.follow_limit"));
                }
                follows += 1;
                nd.total_links += 1;

                nd.flags |= LookupFlags::PARENT;
                self.follow_link_body(ctx, &found, &mut nd)?;
                nd.flags.remove(LookupFlags::PARENT);

                if nd.last_type == LastType::Bind {
                    return Ok(CreateResult {
                        path: nd.path,
                        created: false,
                    });
                }
                if nd.last_type != LastType::Normal || nd.trailing_slash {
                    return Err(VfsError::new(VfsErrorKind::IsDir, "open.create.link_last_type"));
                }
                continue;
            }

            if found.dentry.is_dir() {
                return Err(VfsError::new(VfsErrorKind::IsDir, "open.create.is_dir"));
            }
            return Ok(CreateResult {
                path: found,
                created: false,
            });
        }
    }

    /// Rename `old` to `new`, both resolved from the context.
    pub fn rename(&self, ctx: &NameiContext, old: &[u8], new: &[u8]) -> VfsResult<()> {
        self.rename_at(ctx, None, old, None, new)
    }

    pub fn rename_at(
        &self,
        ctx: &NameiContext,
        old_base: Option<&PathRef>,
        old: &[u8],
        new_base: Option<&PathRef>,
        new: &[u8],
    ) -> VfsResult<()> {
        let mut old_nd = self.path_walk(ctx, old_base, old, LookupFlags::PARENT, LookupIntent::None)?;
        let mut new_nd = self.path_walk(ctx, new_base, new, LookupFlags::PARENT, LookupIntent::None)?;

        if !Arc::ptr_eq(&old_nd.path.mnt, &new_nd.path.mnt) {
            return Err(VfsError::new(VfsErrorKind::CrossDevice, "rename.xdev"));
        }
        let (Some(old_last), Some(new_last)) = (old_nd.last.clone(), new_nd.last.clone()) else {
            return Err(VfsError::new(VfsErrorKind::Busy, "rename.last_type"));
        };
        if old_nd.last_type != LastType::Normal || new_nd.last_type != LastType::Normal {
            return Err(VfsError::new(VfsErrorKind::Busy, "rename.last_type"));
        }
        old_nd.flags.remove(LookupFlags::PARENT);
        new_nd.flags.remove(LookupFlags::PARENT);
        new_nd.flags |= LookupFlags::RENAME_TARGET;

        let old_dir = old_nd.path.dentry.clone();
        let new_dir = new_nd.path.dentry.clone();
        let guard = self.renames.lock_rename(&new_dir, &old_dir);

        let old_dentry = self.lookup_hash(ctx, &old_dir, &old_last.as_qstr(), old_nd.flags, &old_nd.intent)?;
        if old_dentry.is_negative() {
            return Err(VfsError::new(VfsErrorKind::NotFound, "rename.source"));
        }
        if !old_dentry.is_dir() && (old_nd.trailing_slash || new_nd.trailing_slash) {
            return Err(VfsError::new(VfsErrorKind::NotDir, "rename.trailing_slash"));
        }
        if guard.trap().is_some_and(|trap| Arc::ptr_eq(trap, &old_dentry)) {
            return Err(VfsError::new(VfsErrorKind::InvalidInput, "rename.source_is_ancestor"));
        }

        let new_dentry = self.lookup_hash(ctx, &new_dir, &new_last.as_qstr(), new_nd.flags, &new_nd.intent)?;
        if guard.trap().is_some_and(|trap| Arc::ptr_eq(trap, &new_dentry)) {
            return Err(VfsError::new(VfsErrorKind::DirNotEmpty, "rename.target_is_ancestor"));
        }

        self.vfs_rename(ctx, &old_nd.path, &old_dentry, &new_nd.path, &new_dentry)?;
        drop(guard);
        Ok(())
    }

    fn vfs_rename(
        &self,
        ctx: &NameiContext,
        old_dir: &PathRef,
        old_dentry: &Arc<Dentry>,
        new_dir: &PathRef,
        new_dentry: &Arc<Dentry>,
    ) -> VfsResult<()> {
        let old_node = old_dentry
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "rename.source"))?;
        let is_dir = old_node.file_type() == VfsFileType::Directory;
        if let Some(new_node) = new_dentry.node() {
            if new_node.inode() == old_node.inode() {
                return Ok(());
            }
        }

        may_delete(&ctx.cred, old_dir, old_dentry, is_dir)?;
        if new_dentry.is_negative() {
            may_create(&ctx.cred, new_dir, new_dentry)?;
        } else {
            may_delete(&ctx.cred, new_dir, new_dentry, is_dir)?;
        }
        // Moving a directory rewrites its `..`.
        if is_dir && !Arc::ptr_eq(&old_dir.dentry, &new_dir.dentry) {
            inode_permission(&ctx.cred, old_node.as_ref(), MayMask::WRITE, old_dir.is_read_only())?;
        }
        if old_dentry.is_mountpoint() || new_dentry.is_mountpoint() {
            return Err(VfsError::new(VfsErrorKind::Busy, "rename.mountpoint"));
        }

        let old_dir_node = old_dir
            .dentry
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "rename.old_dir"))?;
        let new_dir_node = new_dir
            .dentry
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "rename.new_dir"))?;
        let provider = old_dir_node
            .as_dir()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotDir, "rename.old_dir"))?;

        let old_name = old_dentry.name();
        let new_name = new_dentry.name();
        provider.rename(&old_name.name.as_name(), new_dir_node.as_ref(), &new_name.name.as_name())?;
        self.dcache.d_move(old_dentry, new_dentry);

        debug!(
            target: "vfs_namei::walk",
            from = ?old_name.name,
            to = ?new_name.name,
            "rename"
        );
        Ok(())
    }
}
