#![allow(dead_code)]

use std::sync::Arc;

use vfs_namei::{
    Cred, LookupFlags, MountFlags, MountId, MountTable, NameiConfig, NameiContext, PathRef,
    PathWalker, ResolvedPath, SuperBlock, VfsResult,
};
use vfs_ramfs::{RamFs, RamFsConfig, RamNode};

/// A namespace whose root mount is a fresh ramfs.
pub struct Namespace {
    pub fs: Arc<RamFs>,
    pub sb: Arc<SuperBlock>,
    pub mounts: Arc<MountTable>,
    pub walker: PathWalker,
    pub root: PathRef,
    pub config: Arc<NameiConfig>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::with_config(RamFsConfig::default())
    }

    pub fn with_config(config: RamFsConfig) -> Self {
        let fs = RamFs::with_config(config);
        let sb = SuperBlock::new(fs.clone());
        let mounts = Arc::new(MountTable::new(sb.alloc_root()));
        let walker = PathWalker::new(mounts.clone());
        let root = mounts.root_path().expect("root path");
        Self {
            fs,
            sb,
            mounts,
            walker,
            root,
            config: Arc::new(NameiConfig::default()),
        }
    }

    /// The ramfs root directory, for populating the tree.
    pub fn top(&self) -> &Arc<RamNode> {
        self.fs.root_node()
    }

    pub fn ctx(&self, cred: Cred) -> NameiContext {
        NameiContext::new(cred, self.root.clone(), self.root.clone(), self.config.clone())
    }

    pub fn root_ctx(&self) -> NameiContext {
        self.ctx(Cred::root())
    }

    pub fn resolve(&self, path: &str, flags: LookupFlags) -> VfsResult<ResolvedPath> {
        self.walker.resolve(&self.root_ctx(), path.as_bytes(), flags)
    }

    pub fn resolve_as(&self, cred: Cred, path: &str, flags: LookupFlags) -> VfsResult<ResolvedPath> {
        self.walker.resolve(&self.ctx(cred), path.as_bytes(), flags)
    }

    /// Mount a fresh ramfs on the directory at `path`.
    pub fn mount_ramfs(&self, path: &str) -> (Arc<RamFs>, MountId) {
        let at = self
            .resolve(path, LookupFlags::FOLLOW | LookupFlags::DIRECTORY)
            .expect("mountpoint")
            .into_path();
        let fs = RamFs::new();
        let sb = SuperBlock::new(fs.clone());
        let mount = self
            .mounts
            .mount(&at, sb.alloc_root(), MountFlags::empty())
            .expect("mount");
        (fs, mount.id())
    }
}

/// Build `mkdir -p`-style chains under `dir`.
pub fn mkdir_p(dir: &Arc<RamNode>, path: &str) -> Arc<RamNode> {
    let mut cur = dir.clone();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        cur = match cur.child(part) {
            Some(existing) => existing,
            None => cur.mkdir(part, 0o755).expect("mkdir"),
        };
    }
    cur
}

/// Name of the dentry a resolution ended on.
pub fn name_of(resolved: &ResolvedPath) -> Vec<u8> {
    resolved.dentry().name().as_bytes().to_vec()
}
