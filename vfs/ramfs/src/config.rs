#[derive(Clone, Debug, Default)]
pub struct RamFsConfig {
    /// Optional max inode count allowed in this FS instance.
    pub max_inodes: Option<u64>,
    /// Names compare ASCII case-insensitively.
    pub case_insensitive: bool,
    /// Cached entries may go stale behind the cache's back (entries are
    /// revalidated against the backing maps on every cached lookup).
    pub volatile: bool,
    /// Also revalidate walks that end on `.`, `..` or a root.
    pub reval_dot: bool,
}
