mod common;

use std::sync::Arc;

use common::{Namespace, mkdir_p, name_of};
use pretty_assertions::assert_eq;
use vfs_namei::{LastType, LookupFlags, VfsErrorKind};

/// `l0 -> l1 -> ... -> l{links-1} -> target`
fn chain(ns: &Namespace, links: usize) {
    let top = ns.top();
    top.create_file("target", 0o644).expect("target");
    for i in 0..links {
        let next = if i + 1 == links {
            "target".to_owned()
        } else {
            format!("l{}", i + 1)
        };
        top.symlink(format!("l{i}"), next).expect("symlink");
    }
}

#[test]
fn eight_nested_links_resolve() {
    let ns = Namespace::new();
    chain(&ns, 8);
    let res = ns.resolve("/l0", LookupFlags::FOLLOW).expect("8 nested links");
    assert_eq!(name_of(&res), b"target".to_vec());
    assert_eq!(res.links_followed(), 8);
    assert_eq!(ns.fs.outstanding_links(), 0);
}

#[test]
fn nine_nested_links_exceed_the_limit() {
    let ns = Namespace::new();
    chain(&ns, 9);
    let err = ns.resolve("/l0", LookupFlags::FOLLOW).expect_err("9 nested links");
    assert_eq!(err.kind(), VfsErrorKind::TooManySymlinks);
    assert_eq!(ns.fs.outstanding_links(), 0);
}

#[test]
fn self_referential_link_terminates() {
    let ns = Namespace::new();
    ns.top().symlink("loop", "loop").expect("symlink");
    let err = ns.resolve("/loop", LookupFlags::FOLLOW).expect_err("loop");
    assert_eq!(err.kind(), VfsErrorKind::TooManySymlinks);
    let err = ns.resolve("/loop/x", LookupFlags::empty()).expect_err("loop in the middle");
    assert_eq!(err.kind(), VfsErrorKind::TooManySymlinks);

    ns.top().symlink("ping", "pong").expect("ping");
    ns.top().symlink("pong", "ping").expect("pong");
    let err = ns.resolve("/ping", LookupFlags::FOLLOW).expect_err("mutual loop");
    assert_eq!(err.kind(), VfsErrorKind::TooManySymlinks);
    assert_eq!(ns.fs.outstanding_links(), 0);
}

#[test]
fn total_link_count_is_capped() {
    let ns = Namespace::new();
    ns.top().symlink("s", ".").expect("symlink");
    ns.top().create_file("f", 0o644).expect("file");

    let forty = format!("/{}f", "s/".repeat(40));
    let res = ns.resolve(&forty, LookupFlags::empty()).expect("40 links");
    assert_eq!(res.links_followed(), 40);

    let forty_one = format!("/{}f", "s/".repeat(41));
    let err = ns.resolve(&forty_one, LookupFlags::empty()).expect_err("41 links");
    assert_eq!(err.kind(), VfsErrorKind::TooManySymlinks);
}

#[test]
fn trailing_link_follows_only_with_follow() {
    let ns = Namespace::new();
    mkdir_p(ns.top(), "dir");
    ns.top().symlink("link", "dir").expect("symlink");

    let link = ns.resolve("/link", LookupFlags::empty()).expect("no follow");
    assert!(link.dentry().is_symlink());

    let dir = ns.resolve("/link", LookupFlags::FOLLOW).expect("follow");
    assert!(dir.dentry().is_dir());

    let slash = ns.resolve("/link/", LookupFlags::empty()).expect("trailing slash follows");
    assert!(Arc::ptr_eq(dir.dentry(), slash.dentry()));
}

#[test]
fn relative_links_resolve_from_their_directory() {
    let ns = Namespace::new();
    let b = mkdir_p(ns.top(), "a/b");
    b.create_file("f", 0o644).expect("file");
    let x = mkdir_p(ns.top(), "x");
    x.symlink("up", "../a/b").expect("symlink");

    let res = ns.resolve("/x/up/f", LookupFlags::empty()).expect("relative link");
    assert_eq!(name_of(&res), b"f".to_vec());
}

#[test]
fn absolute_links_restart_at_the_pinned_root() {
    let ns = Namespace::new();
    mkdir_p(ns.top(), "etc");
    let jail = mkdir_p(ns.top(), "jail");
    mkdir_p(&jail, "etc").create_file("jailed", 0o644).expect("file");
    jail.symlink("abs", "/etc").expect("symlink");

    let ctx = ns.root_ctx();
    let base = ns.resolve("/jail", LookupFlags::empty()).expect("jail").into_path();
    let res = ns
        .walker
        .resolve_at(&ctx, &base, b"abs/jailed", LookupFlags::empty())
        .expect("stays inside the jail");
    assert_eq!(name_of(&res), b"jailed".to_vec());

    let outside = ns.resolve("/jail/abs", LookupFlags::FOLLOW).expect("unpinned");
    assert!(Arc::ptr_eq(outside.dentry().parent().as_ref().expect("parent"), &ns.root.dentry));
}

#[test]
fn empty_link_body_is_not_found() {
    let ns = Namespace::new();
    ns.top().symlink("empty", "").expect("symlink");
    let err = ns.resolve("/empty", LookupFlags::FOLLOW).expect_err("empty body");
    assert_eq!(err.kind(), VfsErrorKind::NotFound);
    assert_eq!(ns.fs.outstanding_links(), 0);
}

#[test]
fn dangling_link_is_not_found() {
    let ns = Namespace::new();
    ns.top().symlink("dangling", "nowhere").expect("symlink");
    let err = ns.resolve("/dangling", LookupFlags::FOLLOW).expect_err("dangling");
    assert_eq!(err.kind(), VfsErrorKind::NotFound);
    let link = ns.resolve("/dangling", LookupFlags::empty()).expect("the link itself");
    assert!(link.dentry().is_symlink());
}

#[test]
fn jump_links_bind_to_their_target() {
    let ns = Namespace::new();
    let a = mkdir_p(ns.top(), "a");
    a.create_file("f", 0o644).expect("file");
    let target = ns.resolve("/a", LookupFlags::empty()).expect("a").into_path();
    ns.top().symlink_jump("cwd", target.clone()).expect("jump link");

    let res = ns.resolve("/cwd", LookupFlags::FOLLOW).expect("jump");
    assert!(res.path.same(&target));
    assert_eq!(res.last_type, LastType::Bind);

    let through = ns.resolve("/cwd/f", LookupFlags::empty()).expect("through jump");
    assert_eq!(name_of(&through), b"f".to_vec());
    assert_eq!(ns.fs.outstanding_links(), 0);
}

#[test]
fn link_in_parent_mode_walks_to_the_real_parent() {
    let ns = Namespace::new();
    mkdir_p(ns.top(), "real/sub");
    ns.top().symlink("alias", "real").expect("symlink");

    let res = ns.resolve("/alias/sub/new", LookupFlags::PARENT).expect("parent through link");
    assert_eq!(name_of(&res), b"sub".to_vec());
    assert_eq!(res.last_name(), Some(&b"new"[..]));
}
