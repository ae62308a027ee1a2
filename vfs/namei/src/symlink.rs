//! Symlink following.
//!
//! A link body is walked by re-entering the component walk with the link's
//! directory as the starting point. Nesting depth and the total number of
//! links per resolution are both capped by [`NameiConfig`].
//!
//! [`NameiConfig`]: crate::NameiConfig

use crate::flags::LastType;
use crate::node::{LinkBody, LinkCookie, LinkTarget, RevalidateCtx, Revalidation, SymlinkProvider};
use crate::walker::{PathWalker, ResolvedPath};
use crate::fs::FsFlags;
use crate::{NameiContext, PathRef, VfsError, VfsErrorKind, VfsResult};
use tracing::{debug, trace};

/// Hands the cookie from `read_link` back to the provider on every exit path.
struct LinkGuard<'a> {
    provider: &'a dyn SymlinkProvider,
    cookie: Option<LinkCookie>,
}

impl<'a> LinkGuard<'a> {
    fn new(provider: &'a dyn SymlinkProvider, cookie: Option<LinkCookie>) -> Self {
        Self { provider, cookie }
    }
}

impl Drop for LinkGuard<'_> {
    fn drop(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            self.provider.release_link(cookie);
        }
    }
}

impl PathWalker {
    /// Follow the symlink at `link` with nesting accounting; on success
    /// `nd.path` is wherever the link leads.
    pub(crate) fn do_follow_link(
        &self,
        ctx: &NameiContext,
        link: PathRef,
        nd: &mut ResolvedPath,
    ) -> VfsResult<()> {
        let config = &ctx.config;
        if nd.depth >= config.max_nested_links || nd.total_links >= config.max_total_links {
            debug!(
                target: "vfs_namei::symlink",
                depth = nd.depth,
                total = nd.total_links,
                "follow_link.limit"
            );
            return Err(VfsError::new(VfsErrorKind::TooManySymlinks, "walk.follow_link"));
        }

        nd.depth += 1;
        nd.total_links += 1;
        let res = self.follow_link_body(ctx, &link, nd);
        nd.depth -= 1;
        res
    }

    /// Read the body of `link` and walk it. Limits are the caller's business.
    pub(crate) fn follow_link_body(
        &self,
        ctx: &NameiContext,
        link: &PathRef,
        nd: &mut ResolvedPath,
    ) -> VfsResult<()> {
        let node = link
            .dentry
            .node()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, "follow_link.negative"))?;
        let provider = node
            .as_symlink()
            .ok_or_else(|| VfsError::new(VfsErrorKind::Internal, "follow_link.not_symlink"))?;

        let LinkBody { target, cookie } = provider.read_link()?;
        let _release = LinkGuard::new(provider, cookie);

        match target {
            LinkTarget::Path(text) => self.vfs_follow_link(ctx, nd, &text),
            LinkTarget::Jump(path) => {
                trace!(target: "vfs_namei::symlink", dentry = path.dentry.id().get(), "follow_link.jump");
                nd.path = path;
                nd.last = None;
                nd.last_type = LastType::Bind;
                self.force_reval_path(nd)
            }
        }
    }

    fn vfs_follow_link(&self, ctx: &NameiContext, nd: &mut ResolvedPath, text: &[u8]) -> VfsResult<()> {
        let Some(&first) = text.first() else {
            return Err(VfsError::new(VfsErrorKind::NotFound, "follow_link.empty"));
        };
        if text.len() > ctx.config.max_path_len {
            return Err(VfsError::new(VfsErrorKind::NameTooLong, "follow_link.too_long"));
        }
        if text.contains(&0) {
            return Err(VfsError::new(VfsErrorKind::InvalidInput, "follow_link.nul"));
        }

        trace!(
            target: "vfs_namei::symlink",
            body = %String::from_utf8_lossy(text),
            depth = nd.depth,
            "follow_link.walk"
        );
        nd.last = None;
        nd.last_type = LastType::Root;
        if first == b'/' {
            nd.path = nd.root.clone();
        }
        self.link_path_walk(ctx, text, nd)
    }

    /// A jump link bypassed the lookup path; make sure its target is still
    /// good on filesystems that can go stale.
    fn force_reval_path(&self, nd: &ResolvedPath) -> VfsResult<()> {
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
            Revalidation::Invalidate => {
                self.dcache().invalidate(&nd.path.dentry);
                Err(VfsError::new(VfsErrorKind::Stale, "follow_link.reval"))
            }
        }
    }
}
