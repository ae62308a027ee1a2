use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;
use vfs_namei::{
    AclVerdict, BackendInodeId, CreateAttrs, Cred, DirectoryProvider, FsNode, LinkBody,
    LinkCookie, MayMask, NodeAttr, NodeFlags, PathRef, PermissionPolicyExtension,
    SymlinkProvider, VfsError, VfsErrorKind, VfsFileType, VfsGid, VfsName, VfsResult, VfsUid,
};

use crate::fs::RamFsInner;

/// Extra access granted (or withheld) from one user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub uid: VfsUid,
    pub allow: MayMask,
}

enum LinkData {
    Text(Vec<u8>),
    Jump(PathRef),
}

enum NodeKind {
    Dir(RwLock<BTreeMap<Vec<u8>, Arc<RamNode>>>),
    File,
    Symlink(LinkData),
    Special(VfsFileType),
}

pub struct RamNode {
    fs: Arc<RamFsInner>,
    inode: BackendInodeId,
    attr: RwLock<NodeAttr>,
    acl: RwLock<Vec<AclEntry>>,
    kind: NodeKind,
}

impl RamNode {
    pub(crate) fn new_root(fs: Arc<RamFsInner>) -> Arc<Self> {
        Arc::new(Self {
            fs,
            inode: BackendInodeId::from_nonzero(NonZeroU64::MIN),
            attr: RwLock::new(NodeAttr::new(0o755, 0, 0)),
            acl: RwLock::new(Vec::new()),
            kind: NodeKind::Dir(RwLock::new(BTreeMap::new())),
        })
    }

    fn entries(&self) -> VfsResult<&RwLock<BTreeMap<Vec<u8>, Arc<RamNode>>>> {
        match &self.kind {
            NodeKind::Dir(entries) => Ok(entries),
            _ => Err(VfsError::new(VfsErrorKind::NotDir, "ramfs.entries")),
        }
    }

    fn insert(&self, name: &[u8], kind: NodeKind, mode: u32, uid: VfsUid, gid: VfsGid) -> VfsResult<Arc<RamNode>> {
        VfsName::new(name)?;
        if self.attr.read().flags.contains(NodeFlags::DEAD_DIR) {
            return Err(VfsError::new(VfsErrorKind::NotFound, "ramfs.insert.dead_dir"));
        }
        let entries = self.entries()?;
        let key = self.fs.key(name);
        let mut map = entries.write();
        if map.contains_key(&key) {
            return Err(VfsError::new(VfsErrorKind::AlreadyExists, "ramfs.insert"));
        }
        let node = Arc::new(RamNode {
            fs: self.fs.clone(),
            inode: self.fs.alloc_inode()?,
            attr: RwLock::new(NodeAttr::new(mode & 0o7777, uid, gid)),
            acl: RwLock::new(Vec::new()),
            kind,
        });
        map.insert(key, node.clone());
        Ok(node)
    }

    pub fn mkdir(&self, name: impl AsRef<[u8]>, mode: u32) -> VfsResult<Arc<RamNode>> {
        self.insert(name.as_ref(), NodeKind::Dir(RwLock::new(BTreeMap::new())), mode, 0, 0)
    }

    pub fn create_file(&self, name: impl AsRef<[u8]>, mode: u32) -> VfsResult<Arc<RamNode>> {
        self.insert(name.as_ref(), NodeKind::File, mode, 0, 0)
    }

    pub fn symlink(&self, name: impl AsRef<[u8]>, target: impl AsRef<[u8]>) -> VfsResult<Arc<RamNode>> {
        let body = LinkData::Text(target.as_ref().to_vec());
        self.insert(name.as_ref(), NodeKind::Symlink(body), 0o777, 0, 0)
    }

    /// A link that resolves straight to `target`, like `/proc/self/cwd`.
    pub fn symlink_jump(&self, name: impl AsRef<[u8]>, target: PathRef) -> VfsResult<Arc<RamNode>> {
        self.insert(name.as_ref(), NodeKind::Symlink(LinkData::Jump(target)), 0o777, 0, 0)
    }

    pub fn mknod(&self, name: impl AsRef<[u8]>, file_type: VfsFileType, mode: u32) -> VfsResult<Arc<RamNode>> {
        let kind = match file_type {
            VfsFileType::Directory => NodeKind::Dir(RwLock::new(BTreeMap::new())),
            VfsFileType::RegularFile => NodeKind::File,
            VfsFileType::Symlink => {
                return Err(VfsError::new(VfsErrorKind::NotSupported, "ramfs.mknod.symlink"));
            }
            other => NodeKind::Special(other),
        };
        self.insert(name.as_ref(), kind, mode, 0, 0)
    }

    pub fn child(&self, name: impl AsRef<[u8]>) -> Option<Arc<RamNode>> {
        let entries = self.entries().ok()?;
        entries.read().get(&self.fs.key(name.as_ref())).cloned()
    }

    /// Unlink `name` without telling any cache. A removed directory is
    /// marked dead so later lookups in it fail.
    pub fn remove(&self, name: impl AsRef<[u8]>) -> Option<Arc<RamNode>> {
        let entries = self.entries().ok()?;
        let removed = entries.write().remove(&self.fs.key(name.as_ref()))?;
        removed.retire();
        Some(removed)
    }

    fn retire(&self) {
        if matches!(self.kind, NodeKind::Dir(_)) {
            self.attr.write().flags.insert(NodeFlags::DEAD_DIR);
        }
        self.fs.release_inode();
    }

    pub fn set_mode(&self, mode: u32) {
        self.attr.write().mode = mode & 0o7777;
    }

    pub fn set_owner(&self, uid: VfsUid, gid: VfsGid) {
        let mut attr = self.attr.write();
        attr.uid = uid;
        attr.gid = gid;
    }

    pub fn set_flags(&self, flags: NodeFlags) {
        self.attr.write().flags = flags;
    }

    /// Grant `uid` the accesses in `allow`; any other access it asks for
    /// is refused outright.
    pub fn add_acl_user(&self, uid: VfsUid, allow: MayMask) {
        self.acl.write().push(AclEntry { uid, allow });
        self.attr.write().flags.insert(NodeFlags::POSIX_ACL);
    }

    pub fn acl_entries(&self) -> Vec<AclEntry> {
        self.acl.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FsNode for RamNode {
    fn inode(&self) -> BackendInodeId {
        self.inode
    }

    fn file_type(&self) -> VfsFileType {
        match &self.kind {
            NodeKind::Dir(_) => VfsFileType::Directory,
            NodeKind::File => VfsFileType::RegularFile,
            NodeKind::Symlink(_) => VfsFileType::Symlink,
            NodeKind::Special(file_type) => *file_type,
        }
    }

    fn attr(&self) -> NodeAttr {
        *self.attr.read()
    }

    fn as_dir(&self) -> Option<&dyn DirectoryProvider> {
        match self.kind {
            NodeKind::Dir(_) => Some(self),
            _ => None,
        }
    }

    fn as_symlink(&self) -> Option<&dyn SymlinkProvider> {
        match self.kind {
            NodeKind::Symlink(_) => Some(self),
            _ => None,
        }
    }

    fn acl(&self) -> Option<&dyn PermissionPolicyExtension> {
        Some(self)
    }
}

impl DirectoryProvider for RamNode {
    fn lookup(&self, name: &VfsName<'_>) -> VfsResult<Option<Arc<dyn FsNode>>> {
        self.fs.note_lookup()?;
        Ok(self.child(name.as_bytes()).map(|node| node as Arc<dyn FsNode>))
    }

    fn create(&self, name: &VfsName<'_>, attrs: CreateAttrs) -> VfsResult<Arc<dyn FsNode>> {
        let kind = match attrs.file_type {
            VfsFileType::Directory => NodeKind::Dir(RwLock::new(BTreeMap::new())),
            VfsFileType::RegularFile => NodeKind::File,
            VfsFileType::Symlink => {
                return Err(VfsError::new(VfsErrorKind::NotSupported, "ramfs.create.symlink"));
            }
            other => NodeKind::Special(other),
        };
        let node = self.insert(name.as_bytes(), kind, attrs.mode, attrs.uid, attrs.gid)?;
        trace!(target: "vfs_ramfs", inode = node.inode.get(), name = ?name, "create");
        Ok(node)
    }

    fn rename(&self, old_name: &VfsName<'_>, new_dir: &dyn FsNode, new_name: &VfsName<'_>) -> VfsResult<()> {
        let Some(new_dir) = new_dir.as_any().downcast_ref::<RamNode>() else {
            return Err(VfsError::new(VfsErrorKind::CrossDevice, "ramfs.rename.foreign"));
        };
        if !Arc::ptr_eq(&self.fs, &new_dir.fs) {
            return Err(VfsError::new(VfsErrorKind::CrossDevice, "ramfs.rename.xdev"));
        }
        let old_key = self.fs.key(old_name.as_bytes());
        let new_key = self.fs.key(new_name.as_bytes());
        let src_entries = self.entries()?;
        let dst_entries = new_dir.entries()?;

        let replaced = if self.inode == new_dir.inode {
            let mut map = src_entries.write();
            move_entry(&mut map, None, &old_key, &new_key)?
        } else if self.inode < new_dir.inode {
            let mut src = src_entries.write();
            let mut dst = dst_entries.write();
            move_entry(&mut src, Some(&mut dst), &old_key, &new_key)?
        } else {
            let mut dst = dst_entries.write();
            let mut src = src_entries.write();
            move_entry(&mut src, Some(&mut dst), &old_key, &new_key)?
        };
        if let Some(replaced) = replaced {
            replaced.retire();
        }
        trace!(target: "vfs_ramfs", from = ?old_name, to = ?new_name, "rename");
        Ok(())
    }
}

type Entries = BTreeMap<Vec<u8>, Arc<RamNode>>;

/// Move `old_key` from `src` to `new_key` in `dst` (or `src` when `dst` is
/// `None`), returning the node it displaced.
fn move_entry(
    src: &mut Entries,
    dst: Option<&mut Entries>,
    old_key: &[u8],
    new_key: &[u8],
) -> VfsResult<Option<Arc<RamNode>>> {
    let node = src
        .get(old_key)
        .cloned()
        .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "ramfs.rename.source"))?;
    let target = match &dst {
        Some(dst) => dst.get(new_key).cloned(),
        None => src.get(new_key).cloned(),
    };
    if let Some(target) = &target {
        if Arc::ptr_eq(target, &node) {
            return Ok(None);
        }
        match (node.file_type(), target.file_type()) {
            (VfsFileType::Directory, VfsFileType::Directory) if !target.is_empty() => {
                return Err(VfsError::new(VfsErrorKind::DirNotEmpty, "ramfs.rename.target"));
            }
            (VfsFileType::Directory, VfsFileType::Directory) => {}
            (VfsFileType::Directory, _) => {
                return Err(VfsError::new(VfsErrorKind::NotDir, "ramfs.rename.target"));
            }
            (_, VfsFileType::Directory) => {
                return Err(VfsError::new(VfsErrorKind::IsDir, "ramfs.rename.target"));
            }
            _ => {}
        }
    }

    src.remove(old_key);
    match dst {
        Some(dst) => dst.insert(new_key.to_vec(), node),
        None => src.insert(new_key.to_vec(), node),
    };
    Ok(target)
}

impl SymlinkProvider for RamNode {
    fn read_link(&self) -> VfsResult<LinkBody> {
        let NodeKind::Symlink(data) = &self.kind else {
            return Err(VfsError::new(VfsErrorKind::InvalidInput, "ramfs.read_link"));
        };
        let body = match data {
            LinkData::Text(text) => LinkBody::path(text.clone()),
            LinkData::Jump(target) => LinkBody::jump(target.clone()),
        };
        let cookie = self.fs.link_acquired();
        Ok(body.with_cookie(LinkCookie(cookie)))
    }

    fn release_link(&self, _cookie: LinkCookie) {
        self.fs.link_released();
    }
}

impl PermissionPolicyExtension for RamNode {
    fn check_acl(&self, cred: &Cred, mask: MayMask) -> AclVerdict {
        let acl = self.acl.read();
        match acl.iter().find(|entry| entry.uid == cred.uid) {
            Some(entry) if entry.allow.contains(mask) => AclVerdict::Allow,
            Some(_) => AclVerdict::Deny,
            None => AclVerdict::Indeterminate,
        }
    }
}
