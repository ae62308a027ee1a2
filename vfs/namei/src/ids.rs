//! Core identifier types.

use core::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier for an attached mount.
///
/// `0` is reserved for "unset/invalid". Use [`MountId::new`] or
/// [`MountId::from_index`] to construct values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MountId(NonZeroU32);

impl MountId {
    /// Create a new mount id from a raw value (must be non-zero).
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Create a mount id from a zero-based slot index. Indices past the id
    /// space saturate to the last id.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        Self(NonZeroU32::MIN.saturating_add(index))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0.get().saturating_sub(1) as usize
    }
}

/// Backend-defined inode identity (stable for the lifetime of the filesystem).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BackendInodeId(NonZeroU64);

impl BackendInodeId {
    /// Create a new backend inode id from a raw value (must be non-zero).
    #[inline]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub const fn from_nonzero(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Identity of one cached directory entry.
///
/// Ids are never reused, so they double as the fixed lock order for
/// unrelated directories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DentryId(NonZeroU64);

impl DentryId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NonZeroU64::MIN.saturating_add(NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Identity of one filesystem instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SuperBlockId(NonZeroU64);

impl SuperBlockId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NonZeroU64::MIN.saturating_add(NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}
