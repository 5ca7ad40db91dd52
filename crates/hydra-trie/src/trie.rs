//! Leaf-only binary trie.
//!
//! Insertion descends by `key.bit_at(depth)`. When it reaches a leaf that
//! already holds a different key both keys are pushed one level down until
//! their bits diverge. Removal clears the leaf and every ancestor on the way
//! back up collapses if it is left with only leaves and at most one key.

use crate::BitKey;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Leaf(Option<BitKey>),
    Branch(Box<[Node; 2]>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Leaf(None)
    }
}

impl Node {
    fn insert(&mut self, depth: usize, key: BitKey) -> (usize, bool) {
        match self {
            Node::Branch(children) => children[key.bit_at(depth)].insert(depth + 1, key),
            Node::Leaf(slot) => {
                let existing = match slot.take() {
                    None => {
                        *slot = Some(key);
                        return (depth, true);
                    }
                    Some(existing) if existing == key => {
                        *slot = Some(existing);
                        return (depth, false);
                    }
                    Some(existing) => existing,
                };

                // Keys that never diverge cannot be separated.
                if depth >= existing.bit_len().max(key.bit_len()) {
                    *slot = Some(existing);
                    return (depth, false);
                }

                let mut children = Box::new([Node::default(), Node::default()]);
                let existing_bit = existing.bit_at(depth);
                children[existing_bit].insert(depth + 1, existing);
                let inserted = children[key.bit_at(depth)].insert(depth + 1, key);
                *self = Node::Branch(children);
                inserted
            }
        }
    }

    fn remove(&mut self, depth: usize, key: &BitKey) -> (usize, bool) {
        match self {
            Node::Branch(children) => {
                let (reached, removed) = children[key.bit_at(depth)].remove(depth + 1, key);
                if removed {
                    self.shrink();
                }
                (reached, removed)
            }
            Node::Leaf(slot) => {
                if slot.as_ref() == Some(key) {
                    *slot = None;
                    (depth, true)
                } else {
                    (depth, false)
                }
            }
        }
    }

    /// Collapse a branch whose children are both leaves holding at most one
    /// key between them. Branches with an internal child are left alone.
    fn shrink(&mut self) {
        let Node::Branch(children) = self else {
            return;
        };
        let [left, right] = &mut **children;
        let collapsed = match (left, right) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                if a.is_some() && b.is_some() {
                    return;
                }
                Node::Leaf(a.take().or_else(|| b.take()))
            }
            _ => return,
        };
        *self = collapsed;
    }

    fn depth(&self, depth: usize) -> usize {
        match self {
            Node::Leaf(_) => depth,
            Node::Branch(children) => children[0]
                .depth(depth + 1)
                .max(children[1].depth(depth + 1)),
        }
    }

    fn find(&self, depth: usize, key: &BitKey) -> Option<usize> {
        match self {
            Node::Branch(children) => children[key.bit_at(depth)].find(depth + 1, key),
            Node::Leaf(Some(held)) if held == key => Some(depth),
            Node::Leaf(_) => None,
        }
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a BitKey>) {
        match self {
            Node::Leaf(Some(key)) => out.push(key),
            Node::Leaf(None) => {}
            Node::Branch(children) => {
                children[0].collect(out);
                children[1].collect(out);
            }
        }
    }
}

/// Binary trie over [`BitKey`]s with leaf-only storage.
///
/// All keys stored in one trie are expected to have the same width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XorTrie {
    root: Node,
    len: usize,
}

impl XorTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key.
    ///
    /// Returns the depth of the leaf holding the key and whether the key was
    /// newly added. Inserting a key that is already present changes nothing.
    pub fn insert(&mut self, key: BitKey) -> (usize, bool) {
        let (depth, added) = self.root.insert(0, key);
        if added {
            self.len += 1;
        }
        (depth, added)
    }

    /// Remove a key.
    ///
    /// Returns the depth reached during the descent and whether the key was
    /// present.
    pub fn remove(&mut self, key: &BitKey) -> (usize, bool) {
        let (depth, removed) = self.root.remove(0, key);
        if removed {
            self.len -= 1;
        }
        (depth, removed)
    }

    /// Maximum leaf depth. An empty trie or a single key has depth 0.
    pub fn depth(&self) -> usize {
        self.root.depth(0)
    }

    /// Depth of the leaf holding `key`, if present.
    pub fn find(&self, key: &BitKey) -> Option<usize> {
        self.root.find(0, key)
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &BitKey) -> bool {
        self.find(key).is_some()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All keys in trie order (0-branch before 1-branch).
    pub fn keys(&self) -> Vec<&BitKey> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect(&mut out);
        out
    }
}
