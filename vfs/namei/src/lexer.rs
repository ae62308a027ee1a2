//! Splits a path into hashed components.
//!
//! The lexer never allocates. Repeated separators collapse into one, and the
//! final component records whether it was followed by a run of trailing
//! slashes (which forces directory semantics on it).

use crate::name::{NameHasher, Qstr, VfsName};
use crate::VfsResult;
use std::iter::FusedIterator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    Normal,
    /// `.`
    Dot,
    /// `..`
    DotDot,
}

impl ComponentKind {
    #[inline]
    pub fn classify(name: &[u8]) -> Self {
        match name {
            [b'.'] => ComponentKind::Dot,
            [b'.', b'.'] => ComponentKind::DotDot,
            _ => ComponentKind::Normal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Component<'a> {
    pub name: &'a [u8],
    pub hash: u32,
    pub kind: ComponentKind,
    /// The component was followed by slashes and nothing else.
    pub trailing_slash: bool,
    /// No further component follows.
    pub is_last: bool,
}

impl<'a> Component<'a> {
    pub fn len(&self) -> usize {
        self.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    pub fn qstr(&self) -> VfsResult<Qstr<'a>> {
        Ok(Qstr::with_hash(VfsName::new(self.name)?, self.hash))
    }
}

#[derive(Clone, Debug)]
pub struct ComponentLexer<'a> {
    path: &'a [u8],
    pos: usize,
}

impl<'a> ComponentLexer<'a> {
    pub fn new(path: &'a [u8]) -> Self {
        Self::at(path, 0)
    }

    /// Restart lexing at a byte offset previously reported by [`Self::offset`].
    pub fn at(path: &'a [u8], offset: usize) -> Self {
        Self {
            path,
            pos: offset.min(path.len()),
        }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.path[self.pos..]
    }

    /// True when nothing but separators remains.
    pub fn is_exhausted(&self) -> bool {
        self.remaining().iter().all(|&b| b == b'/')
    }
}

impl<'a> Iterator for ComponentLexer<'a> {
    type Item = Component<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.path;
        let len = path.len();
        while self.pos < len && path[self.pos] == b'/' {
            self.pos += 1;
        }
        if self.pos == len {
            return None;
        }

        let start = self.pos;
        let mut hasher = NameHasher::new();
        while self.pos < len && path[self.pos] != b'/' {
            hasher.write_u8(path[self.pos]);
            self.pos += 1;
        }
        let name = &path[start..self.pos];

        let followed_by_slash = self.pos < len;
        while self.pos < len && path[self.pos] == b'/' {
            self.pos += 1;
        }
        let is_last = self.pos == len;

        Some(Component {
            name,
            hash: hasher.finish(),
            kind: ComponentKind::classify(name),
            trailing_slash: followed_by_slash && is_last,
            is_last,
        })
    }
}

impl FusedIterator for ComponentLexer<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(path: &'a [u8]) -> Vec<&'a [u8]> {
        ComponentLexer::new(path).map(|c| c.name).collect()
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(names(b"a/b/c"), names(b"//a///b//c"));
        assert_eq!(names(b"a//b"), vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn empty_and_slash_only_paths_yield_nothing() {
        assert!(ComponentLexer::new(b"").next().is_none());
        assert!(ComponentLexer::new(b"////").next().is_none());
        assert!(ComponentLexer::new(b"///").is_exhausted());
    }

    #[test]
    fn trailing_slash_only_on_last_component() {
        let comps: Vec<_> = ComponentLexer::new(b"a/b//").collect();
        assert_eq!(comps.len(), 2);
        assert!(!comps[0].trailing_slash);
        assert!(!comps[0].is_last);
        assert!(comps[1].trailing_slash);
        assert!(comps[1].is_last);

        let last = ComponentLexer::new(b"a/b").last().expect("component");
        assert!(last.is_last);
        assert!(!last.trailing_slash);
    }

    #[test]
    fn classifies_dot_components() {
        let kinds: Vec<_> = ComponentLexer::new(b"./../.x/..y/...").map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ComponentKind::Dot,
                ComponentKind::DotDot,
                ComponentKind::Normal,
                ComponentKind::Normal,
                ComponentKind::Normal,
            ]
        );
    }

    #[test]
    fn hash_matches_standalone_hasher() {
        let comp = ComponentLexer::new(b"/usr/lib").nth(1).expect("component");
        assert_eq!(comp.hash, NameHasher::hash(b"lib"));
    }

    #[test]
    fn restart_from_offset() {
        let path = b"one/two/three";
        let mut lexer = ComponentLexer::new(path);
        lexer.next();
        let offset = lexer.offset();
        let rest: Vec<_> = ComponentLexer::at(path, offset).map(|c| c.name).collect();
        assert_eq!(rest, vec![&b"two"[..], &b"three"[..]]);
    }
}
