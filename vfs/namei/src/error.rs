//! Error types shared by every resolution routine.

use thiserror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum VfsErrorKind {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirNotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not permitted")]
    OperationNotPermitted,
    #[error("too many levels of symbolic links")]
    TooManySymlinks,
    #[error("file name too long")]
    NameTooLong,
    #[error("read-only filesystem")]
    ReadOnlyFs,
    #[error("object is immutable")]
    Immutable,
    #[error("cross-device link")]
    CrossDevice,
    /// The backing object was invalidated underneath the walker.
    #[error("stale file handle")]
    Stale,
    #[error("resource busy")]
    Busy,
    #[error("out of memory")]
    NoMemory,
    #[error("invalid input")]
    InvalidInput,
    #[error("operation not supported")]
    NotSupported,
    #[error("i/o error")]
    Io,
    #[error("internal error")]
    Internal,
}

impl VfsErrorKind {
    /// Linux errno value for this kind, for the syscall layer.
    pub fn errno(self) -> i32 {
        match self {
            VfsErrorKind::NotFound => 2,
            VfsErrorKind::NotDir => 20,
            VfsErrorKind::IsDir => 21,
            VfsErrorKind::AlreadyExists => 17,
            VfsErrorKind::DirNotEmpty => 39,
            VfsErrorKind::PermissionDenied => 13,
            VfsErrorKind::OperationNotPermitted => 1,
            VfsErrorKind::TooManySymlinks => 40,
            VfsErrorKind::NameTooLong => 36,
            VfsErrorKind::ReadOnlyFs => 30,
            // Immutable objects report EACCES like the permission path does.
            VfsErrorKind::Immutable => 13,
            VfsErrorKind::CrossDevice => 18,
            VfsErrorKind::Stale => 116,
            VfsErrorKind::Busy => 16,
            VfsErrorKind::NoMemory => 12,
            VfsErrorKind::InvalidInput => 22,
            VfsErrorKind::NotSupported => 95,
            VfsErrorKind::Io | VfsErrorKind::Internal => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("{context}: {kind}")]
pub struct VfsError {
    kind: VfsErrorKind,
    context: &'static str,
}

impl VfsError {
    pub fn new(kind: VfsErrorKind, context: &'static str) -> Self {
        Self { kind, context }
    }

    pub fn kind(&self) -> VfsErrorKind {
        self.kind
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub fn is_stale(&self) -> bool {
        self.kind == VfsErrorKind::Stale
    }
}
