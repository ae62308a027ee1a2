mod common;

use common::{Namespace, mkdir_p};
use pretty_assertions::assert_eq;
use vfs_namei::{Capabilities, Cred, LookupFlags, MayMask, NodeFlags, VfsErrorKind};

const USER: u32 = 1000;

fn user() -> Cred {
    Cred::user(USER, USER)
}

#[test]
fn unsearchable_directory_blocks_everything_below() {
    let ns = Namespace::new();
    let locked = mkdir_p(ns.top(), "locked");
    let inner = mkdir_p(&locked, "inner");
    inner.create_file("f", 0o777).expect("file");
    locked.set_mode(0o666);

    for path in ["/locked/inner", "/locked/inner/f", "/locked/inner/../inner/f", "/locked/nope"] {
        let err = ns
            .resolve_as(user(), path, LookupFlags::FOLLOW)
            .expect_err(path);
        assert_eq!(err.kind(), VfsErrorKind::PermissionDenied, "{path}");
    }

    // The directory itself is reachable; only walking through it is not.
    ns.resolve_as(user(), "/locked", LookupFlags::empty())
        .expect("the directory itself");
    let parent = ns
        .resolve_as(user(), "/locked/inner/x", LookupFlags::PARENT)
        .expect_err("parent mode too");
    assert_eq!(parent.kind(), VfsErrorKind::PermissionDenied);
}

#[test]
fn owner_and_group_bits_are_exclusive() {
    let ns = Namespace::new();
    let dir = mkdir_p(ns.top(), "d");
    dir.create_file("f", 0o644).expect("file");

    // Owner class without search, others with search: the owner is refused.
    dir.set_owner(USER, 0);
    dir.set_mode(0o601);
    let err = ns.resolve_as(user(), "/d/f", LookupFlags::empty()).expect_err("owner");
    assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
    ns.resolve_as(Cred::user(2000, 2000), "/d/f", LookupFlags::empty())
        .expect("other class");

    // Group member gets the group bits.
    dir.set_owner(0, 50);
    dir.set_mode(0o710);
    ns.resolve_as(user().with_groups([50]), "/d/f", LookupFlags::empty())
        .expect("group member");
    let err = ns.resolve_as(user(), "/d/f", LookupFlags::empty()).expect_err("not in group");
    assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
}

#[test]
fn capabilities_override_search_permission() {
    let ns = Namespace::new();
    let dir = mkdir_p(ns.top(), "vault");
    dir.create_file("f", 0o600).expect("file");
    dir.set_mode(0o000);

    ns.resolve_as(
        user().with_caps(Capabilities::DAC_READ_SEARCH),
        "/vault/f",
        LookupFlags::empty(),
    )
    .expect("read-search");
    ns.resolve_as(
        user().with_caps(Capabilities::DAC_OVERRIDE),
        "/vault/f",
        LookupFlags::empty(),
    )
    .expect("override");
    ns.resolve_as(Cred::root(), "/vault/f", LookupFlags::empty())
        .expect("root");
}

#[test]
fn acl_hook_decides_for_the_group_class() {
    let ns = Namespace::new();
    let dir = mkdir_p(ns.top(), "shared");
    dir.create_file("f", 0o644).expect("file");
    dir.set_owner(0, 0);
    dir.set_mode(0o770);
    dir.add_acl_user(USER, MayMask::EXEC | MayMask::READ);
    dir.add_acl_user(1001, MayMask::READ);
    assert_eq!(dir.acl_entries().len(), 2);

    ns.resolve_as(user(), "/shared/f", LookupFlags::empty())
        .expect("granted by acl");

    let err = ns
        .resolve_as(Cred::user(1001, 1001), "/shared/f", LookupFlags::empty())
        .expect_err("denied by acl");
    assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
    assert_eq!(err.context(), "perm.acl");

    // No entry: falls through to the mode bits, which refuse others.
    let err = ns
        .resolve_as(Cred::user(1002, 1002), "/shared/f", LookupFlags::empty())
        .expect_err("mode bits");
    assert_eq!(err.context(), "perm.mode");
}

#[test]
fn creation_needs_write_and_search_on_the_parent() {
    let ns = Namespace::new();
    let dir = mkdir_p(ns.top(), "ro");
    dir.set_mode(0o555);
    let ctx = ns.ctx(user());

    let err = ns
        .walker
        .resolve_create(&ctx, b"/ro/new", LookupFlags::empty(), 0o644)
        .expect_err("no write");
    assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);

    dir.set_mode(0o777);
    let created = ns
        .walker
        .resolve_create(&ctx, b"/ro/new", LookupFlags::empty(), 0o644)
        .expect("writable");
    assert!(created.created);
    let attr = created.path.dentry.node().expect("positive").attr();
    assert_eq!((attr.uid, attr.gid, attr.mode), (USER, USER, 0o644));
}

#[test]
fn immutable_directory_refuses_creation() {
    let ns = Namespace::new();
    let dir = mkdir_p(ns.top(), "frozen");
    dir.set_flags(NodeFlags::IMMUTABLE);

    let ctx = ns.root_ctx();
    let err = ns
        .walker
        .resolve_create(&ctx, b"/frozen/new", LookupFlags::empty(), 0o644)
        .expect_err("immutable");
    assert_eq!(err.kind(), VfsErrorKind::Immutable);
}

#[test]
fn sticky_directory_protects_other_users_entries() {
    let ns = Namespace::new();
    let tmp = mkdir_p(ns.top(), "tmp");
    tmp.set_mode(0o1777);
    let theirs = tmp.create_file("theirs", 0o666).expect("file");
    theirs.set_owner(2000, 2000);
    let mine = tmp.create_file("mine", 0o666).expect("file");
    mine.set_owner(USER, USER);

    let ctx = ns.ctx(user());
    let err = ns
        .walker
        .rename(&ctx, b"/tmp/theirs", b"/tmp/stolen")
        .expect_err("sticky");
    assert_eq!(err.kind(), VfsErrorKind::OperationNotPermitted);

    ns.walker
        .rename(&ctx, b"/tmp/mine", b"/tmp/moved")
        .expect("own entry");

    let fowner = ns.ctx(user().with_caps(Capabilities::FOWNER));
    ns.walker
        .rename(&fowner, b"/tmp/theirs", b"/tmp/taken")
        .expect("fowner");
}
