mod common;

use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use common::{Namespace, mkdir_p};
use pretty_assertions::assert_eq;
use vfs_namei::LookupFlags;

const ROUNDS: usize = 500;

#[test]
fn disjoint_walks_never_contend() {
    let ns = Namespace::new();
    let subtrees = ["left", "right", "up", "down"];
    for name in subtrees {
        let leaf = mkdir_p(ns.top(), &format!("{name}/one/two/three"));
        leaf.create_file("leaf", 0o644).expect("leaf");
    }
    // Only the shared root is warmed; everything below it is cold.
    for name in subtrees {
        ns.resolve(&format!("/{name}"), LookupFlags::empty())
            .expect("warm top level");
    }

    let barrier = Barrier::new(subtrees.len());
    thread::scope(|s| {
        for name in subtrees {
            let ns = &ns;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    ns.resolve(&format!("/{name}/one/two/three/leaf"), LookupFlags::empty())
                        .expect("walk");
                }
            });
        }
    });

    assert_eq!(ns.root.dentry.lock_contention(), 0);
    for name in subtrees {
        for dir in ["", "/one", "/one/two", "/one/two/three"] {
            let path = format!("/{name}{dir}");
            let res = ns.resolve(&path, LookupFlags::empty()).expect("subtree dir");
            assert_eq!(res.dentry().lock_contention(), 0, "{path}");
        }
    }
}

#[test]
fn crossing_renames_do_not_deadlock() {
    let ns = Namespace::new();
    mkdir_p(ns.top(), "A").create_file("x", 0o644).expect("x");
    mkdir_p(ns.top(), "B").create_file("z", 0o644).expect("z");

    let barrier = Barrier::new(2);
    thread::scope(|s| {
        let ns = &ns;
        let barrier = &barrier;
        s.spawn(move || {
            let ctx = ns.root_ctx();
            barrier.wait();
            for _ in 0..ROUNDS {
                ns.walker.rename(&ctx, b"/A/x", b"/B/y").expect("A/x -> B/y");
                ns.walker.rename(&ctx, b"/B/y", b"/A/x").expect("B/y -> A/x");
            }
        });
        s.spawn(move || {
            let ctx = ns.root_ctx();
            barrier.wait();
            for _ in 0..ROUNDS {
                ns.walker.rename(&ctx, b"/B/z", b"/A/w").expect("B/z -> A/w");
                ns.walker.rename(&ctx, b"/A/w", b"/B/z").expect("A/w -> B/z");
            }
        });
    });

    ns.resolve("/A/x", LookupFlags::empty()).expect("x back home");
    ns.resolve("/B/z", LookupFlags::empty()).expect("z back home");
    assert!(!ns.walker.renames().is_locked());
}

#[test]
fn renames_between_nested_directories_do_not_deadlock() {
    let ns = Namespace::new();
    let outer = mkdir_p(ns.top(), "outer");
    mkdir_p(&outer, "inner").create_file("deep", 0o644).expect("deep");
    outer.create_file("shallow", 0o644).expect("shallow");

    let barrier = Barrier::new(3);
    thread::scope(|s| {
        let ns = &ns;
        let barrier = &barrier;
        s.spawn(move || {
            let ctx = ns.root_ctx();
            barrier.wait();
            for _ in 0..ROUNDS {
                ns.walker
                    .rename(&ctx, b"/outer/inner/deep", b"/outer/up")
                    .expect("up");
                ns.walker
                    .rename(&ctx, b"/outer/up", b"/outer/inner/deep")
                    .expect("down");
            }
        });
        s.spawn(move || {
            let ctx = ns.root_ctx();
            barrier.wait();
            for _ in 0..ROUNDS {
                ns.walker
                    .rename(&ctx, b"/outer/shallow", b"/outer/inner/sunk")
                    .expect("sink");
                ns.walker
                    .rename(&ctx, b"/outer/inner/sunk", b"/outer/shallow")
                    .expect("float");
            }
        });
        s.spawn(move || {
            barrier.wait();
            for _ in 0..ROUNDS {
                // Readers race the renames; both names may be momentarily absent.
                let _ = ns.resolve("/outer/inner/deep", LookupFlags::empty());
                let _ = ns.resolve("/outer/shallow", LookupFlags::empty());
            }
        });
    });

    ns.resolve("/outer/inner/deep", LookupFlags::empty()).expect("deep");
    ns.resolve("/outer/shallow", LookupFlags::empty()).expect("shallow");
}

#[test]
fn concurrent_cold_lookups_share_one_entry() {
    let ns = Namespace::new();
    mkdir_p(ns.top(), "shared").create_file("f", 0o644).expect("file");

    let barrier = Barrier::new(8);
    let found: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ns = &ns;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    ns.resolve("/shared/f", LookupFlags::empty()).expect("walk")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("walker thread"))
            .collect()
    });

    for res in &found[1..] {
        assert!(Arc::ptr_eq(found[0].dentry(), res.dentry()));
    }
    assert_eq!(ns.fs.lookup_calls(), 2);
}
