//! Component names and the name hash consulted by the dentry cache.

use crate::{VfsError, VfsErrorKind, VfsResult};
use smallvec::SmallVec;
use std::fmt;

/// Incremental component hash.
///
/// Seeded with zero, folded one byte at a time and truncated to 32 bits on
/// finalization. The value is part of the cache key, so it must stay stable.
#[derive(Clone, Copy, Debug, Default)]
pub struct NameHasher(u64);

impl NameHasher {
    #[inline]
    pub const fn new() -> Self {
        Self(0)
    }

    #[inline]
    pub fn write_u8(&mut self, c: u8) {
        let c = c as u64;
        self.0 = self.0.wrapping_add(c << 4).wrapping_add(c >> 4).wrapping_mul(11);
    }

    #[inline]
    pub fn finish(self) -> u32 {
        self.0 as u32
    }

    pub fn hash(name: &[u8]) -> u32 {
        let mut hasher = Self::new();
        for &c in name {
            hasher.write_u8(c);
        }
        hasher.finish()
    }
}

/// A validated single path component: non-empty, no `/`, no NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VfsName<'a>(&'a [u8]);

impl<'a> VfsName<'a> {
    pub fn new(bytes: &'a [u8]) -> VfsResult<Self> {
        if bytes.is_empty() || bytes.iter().any(|&b| b == b'/' || b == 0) {
            return Err(VfsError::new(VfsErrorKind::InvalidInput, "name.invalid"));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_owned_buf(&self) -> VfsNameBuf {
        VfsNameBuf(SmallVec::from_slice(self.0))
    }
}

impl fmt::Debug for VfsName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.0))
    }
}

/// Owned counterpart of [`VfsName`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsNameBuf(SmallVec<[u8; 32]>);

impl VfsNameBuf {
    pub fn new(bytes: &[u8]) -> VfsResult<Self> {
        VfsName::new(bytes).map(|name| name.to_owned_buf())
    }

    /// Name carried by filesystem root entries.
    pub(crate) fn root() -> Self {
        Self(SmallVec::from_slice(b"/"))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_name(&self) -> VfsName<'_> {
        VfsName(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for VfsNameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl PartialEq<[u8]> for VfsNameBuf {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for VfsNameBuf {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

/// A component name together with its hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Qstr<'a> {
    pub name: VfsName<'a>,
    pub hash: u32,
}

impl<'a> Qstr<'a> {
    pub fn new(name: VfsName<'a>) -> Self {
        Self {
            name,
            hash: NameHasher::hash(name.as_bytes()),
        }
    }

    pub fn with_hash(name: VfsName<'a>, hash: u32) -> Self {
        Self { name, hash }
    }

    pub fn to_owned_buf(&self) -> QstrBuf {
        QstrBuf {
            name: self.name.to_owned_buf(),
            hash: self.hash,
        }
    }
}

/// Owned name + hash, as stored in a dentry or in a walk's last component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QstrBuf {
    pub name: VfsNameBuf,
    pub hash: u32,
}

impl QstrBuf {
    pub fn as_qstr(&self) -> Qstr<'_> {
        Qstr {
            name: self.name.as_name(),
            hash: self.hash,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.name.as_bytes()
    }

    pub(crate) fn root() -> Self {
        let name = VfsNameBuf::root();
        let hash = NameHasher::hash(name.as_bytes());
        Self { name, hash }
    }
}
