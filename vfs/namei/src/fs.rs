use crate::dentry::Dentry;
use crate::ids::SuperBlockId;
use crate::name::VfsName;
use crate::node::{FsNode, RevalidationHook};
use bitflags::bitflags;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FsFlags: u32 {
        /// Walks that end on `.`, `..` or a root bypass the normal lookup
        /// path; revalidate the final entry anyway.
        const REVAL_DOT = 1 << 0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SbFlags: u32 {
        const RDONLY = 1 << 0;
    }
}

pub trait Fs: Send + Sync + 'static {
    fn provider_name(&self) -> &'static str;

    fn root(&self) -> Arc<dyn FsNode>;

    fn flags(&self) -> FsFlags {
        FsFlags::empty()
    }

    /// Present for filesystems whose cached entries can go stale behind our
    /// back (network or otherwise volatile backends).
    fn revalidator(&self) -> Option<&dyn RevalidationHook> {
        None
    }

    /// Filesystem specific name hash; `None` keeps the lexer's hash.
    fn hash_name(&self, _name: &VfsName<'_>) -> Option<u32> {
        None
    }

    fn compare_names(&self, cached: &[u8], name: &[u8]) -> bool {
        cached == name
    }
}

/// One instance of a filesystem, shared by every mount of it.
pub struct SuperBlock {
    id: SuperBlockId,
    fs: Arc<dyn Fs>,
    flags: AtomicU32,
}

impl SuperBlock {
    pub fn new(fs: Arc<dyn Fs>) -> Arc<Self> {
        Self::with_flags(fs, SbFlags::empty())
    }

    pub fn with_flags(fs: Arc<dyn Fs>, flags: SbFlags) -> Arc<Self> {
        Arc::new(Self {
            id: SuperBlockId::next(),
            fs,
            flags: AtomicU32::new(flags.bits()),
        })
    }

    pub fn id(&self) -> SuperBlockId {
        self.id
    }

    pub fn fs(&self) -> &Arc<dyn Fs> {
        &self.fs
    }

    pub fn flags(&self) -> SbFlags {
        SbFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: SbFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn is_read_only(&self) -> bool {
        self.flags().contains(SbFlags::RDONLY)
    }

    /// Allocate the (unhashed) root entry of this filesystem.
    pub fn alloc_root(self: &Arc<Self>) -> Arc<Dentry> {
        Dentry::new_root(self.clone(), self.fs.root())
    }
}

impl fmt::Debug for SuperBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperBlock")
            .field("id", &self.id)
            .field("provider", &self.fs.provider_name())
            .field("flags", &self.flags())
            .finish()
    }
}
