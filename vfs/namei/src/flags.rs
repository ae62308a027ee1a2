use bitflags::bitflags;

bitflags! {
    /// Flags steering a single resolution.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LookupFlags: u32 {
        /// Follow a symlink in the final component.
        const FOLLOW = 0x0001;
        /// The result must be a directory.
        const DIRECTORY = 0x0002;
        /// Internal: walking the body of a symlink whose final component
        /// must be followed as well.
        const CONTINUE = 0x0004;
        /// Stop one level short and describe the last component.
        const PARENT = 0x0010;
        /// Bypass the dentry cache and go to the backing store.
        const REVAL = 0x0040;
        const NO_CACHE = Self::REVAL.bits();
        /// The walk is the prelude of an open.
        const OPEN = 0x0100;
        const CREATE = 0x0200;
        /// The final component must not exist.
        const EXCL = 0x0400;
        /// Destination side of a rename.
        const RENAME_TARGET = 0x0800;
    }
}

/// What the caller plans to do with the result, visible to revalidation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LookupIntent {
    #[default]
    None,
    Open {
        create: bool,
        exclusive: bool,
        mode: u32,
    },
}

impl LookupIntent {
    pub fn is_open(&self) -> bool {
        matches!(self, LookupIntent::Open { .. })
    }

    pub fn is_create(&self) -> bool {
        matches!(self, LookupIntent::Open { create: true, .. })
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, LookupIntent::Open { exclusive: true, .. })
    }
}

/// Classification of the last component recorded by a parent lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LastType {
    #[default]
    Normal,
    /// The path had no components (`/` or an empty link body jumped to root).
    Root,
    Dot,
    DotDot,
    /// Walk ended on a synthetic link that jumped to a resolved location.
    Bind,
}
