use crate::node::{VfsGid, VfsUid};
use crate::path::PathRef;
use bitflags::bitflags;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct NameiConfig {
    /// Symlinks followed inside another symlink's body.
    pub max_nested_links: u32,
    /// Symlinks followed over a whole resolution.
    pub max_total_links: u32,
    pub max_path_len: usize,
    pub max_name_len: usize,
    /// Trailing symlinks an open-with-create walk will chase.
    pub max_create_follows: u32,
}

impl Default for NameiConfig {
    fn default() -> Self {
        Self {
            max_nested_links: 8,
            max_total_links: 40,
            max_path_len: 4096,
            max_name_len: 255,
            max_create_follows: 32,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Bypass read, write and execute checks.
        const DAC_OVERRIDE = 1 << 0;
        /// Bypass read checks on files and search checks on directories.
        const DAC_READ_SEARCH = 1 << 1;
        /// Act as the owner of any object.
        const FOWNER = 1 << 2;
    }
}

#[derive(Clone, Debug)]
pub struct Cred {
    pub uid: VfsUid,
    pub gid: VfsGid,
    pub groups: SmallVec<[VfsGid; 8]>,
    pub caps: Capabilities,
}

impl Cred {
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: SmallVec::new(),
            caps: Capabilities::all(),
        }
    }

    pub fn user(uid: VfsUid, gid: VfsGid) -> Self {
        Self {
            uid,
            gid,
            groups: SmallVec::new(),
            caps: Capabilities::empty(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = VfsGid>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn in_group_p(&self, gid: VfsGid) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    pub fn capable(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }
}

/// Per-call context.
#[derive(Clone)]
pub struct NameiContext {
    pub cred: Cred,
    /// Boundary `..` never ascends past; absolute paths start here.
    pub root: PathRef,
    pub cwd: PathRef,
    pub config: Arc<NameiConfig>,
}

impl NameiContext {
    pub fn new(cred: Cred, root: PathRef, cwd: PathRef, config: Arc<NameiConfig>) -> Self {
        Self {
            cred,
            root,
            cwd,
            config,
        }
    }

    pub fn with_cwd(&self, cwd: PathRef) -> Self {
        Self {
            cwd,
            ..self.clone()
        }
    }
}
