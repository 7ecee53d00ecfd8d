//! Adaptive Radix Tree: recursive insert/search/delete over the four node
//! kinds in [`node`], allocating exclusively through a [`crate::RawAllocator`].

mod node;

use core::cell::Cell;
use core::ptr::NonNull;

use rust_alloc::vec::Vec;

use crate::RawAllocator;
use crate::alloc_traits;
use node::{Header, LeafNode, Node4, Node16, Node48, Node256, NodeRef, PREFIX_CAP};

/// An Adaptive Radix Tree mapping byte-slice keys to values of type `T`,
/// allocating every node and key copy from `alloc`.
///
/// Every node this tree allocates must not require alignment greater than
/// a machine word — in particular `T` itself must satisfy that bound, since
/// leaves store a `T` inline. Violating it panics at the allocation site via
/// [`alloc_traits::new`]'s contract.
///
/// Tying the tree's lifetime to a `&'a A` borrow means the allocator cannot
/// be reset (which needs `&mut`) while any `Art` still borrows it — the
/// "don't invalidate live pointers" rule becomes a compile error instead of
/// a runtime one.
pub struct Art<'a, A: RawAllocator, T> {
    alloc: &'a A,
    root: Cell<NodeRef<T>>,
    len: Cell<u64>,
}

impl<'a, A: RawAllocator, T> core::fmt::Debug for Art<'a, A, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Art").field("len", &self.len.get()).field("root", &self.root.get()).finish()
    }
}

impl<'a, A: RawAllocator, T> Art<'a, A, T> {
    pub fn new(alloc: &'a A) -> Self {
        Art { alloc, root: Cell::new(NodeRef::None), len: Cell::new(0) }
    }

    pub fn len(&self) -> u64 {
        self.len.get()
    }

    pub fn search(&self, key: &[u8]) -> Option<&T> {
        let mut cur = self.root.get();
        let mut depth = 0usize;
        loop {
            match cur {
                NodeRef::None => return None,
                NodeRef::Leaf(p) => {
                    // SAFETY: leaves are valid for as long as they are
                    // reachable from the root, which outlives this call.
                    let leaf = unsafe { p.as_ref() };
                    return if leaf.key() == key { Some(&leaf.value) } else { None };
                }
                _ => {
                    let (matched, full) = self.match_prefix(cur, key, depth);
                    if !full {
                        return None;
                    }
                    depth += matched;
                    if depth == key.len() {
                        let header = cur.header().expect("inner node");
                        return header.terminal.map(|p| unsafe { &p.as_ref().value });
                    }
                    let next = cur.find(key[depth]);
                    if next.is_none() {
                        return None;
                    }
                    cur = next;
                    depth += 1;
                }
            }
        }
    }

    pub fn minimum(&self) -> Option<(&[u8], &T)> {
        let root = self.root.get();
        if root.is_none() {
            return None;
        }
        let leaf = self.minimum_leaf(root);
        // SAFETY: leaf lives as long as it is reachable.
        let leaf = unsafe { leaf.as_ref() };
        Some((leaf.key(), &leaf.value))
    }

    pub fn maximum(&self) -> Option<(&[u8], &T)> {
        let root = self.root.get();
        if root.is_none() {
            return None;
        }
        let leaf = self.maximum_leaf(root);
        // SAFETY: leaf lives as long as it is reachable.
        let leaf = unsafe { leaf.as_ref() };
        Some((leaf.key(), &leaf.value))
    }

    /// Insert `key -> value`, replacing and returning any previous value.
    pub fn insert(&self, key: &[u8], value: T) -> Option<T> {
        let root = self.root.get();
        let (new_root, old) = self.insert_into(root, key, 0, value, true);
        self.root.set(new_root);
        if old.is_none() {
            self.len.set(self.len.get() + 1);
        }
        old
    }

    /// Insert `key -> value` only if `key` is absent; otherwise leave the
    /// tree untouched and return a clone of the existing value.
    pub fn insert_no_replace(&self, key: &[u8], value: T) -> Option<T>
    where
        T: Clone,
    {
        if let Some(existing) = self.search(key) {
            return Some(existing.clone());
        }
        let root = self.root.get();
        let (new_root, _) = self.insert_into(root, key, 0, value, false);
        self.root.set(new_root);
        self.len.set(self.len.get() + 1);
        None
    }

    pub fn delete(&self, key: &[u8]) -> Option<T> {
        let root = self.root.get();
        let (new_root, removed) = self.delete_from(root, key, 0);
        self.root.set(new_root);
        if removed.is_some() {
            self.len.set(self.len.get() - 1);
        }
        removed
    }

    /// Depth-first, terminal-slot-first traversal of every leaf in
    /// lexicographic key order. Stops (and returns `true`) as soon as `cb`
    /// returns `true`.
    pub fn visit(&self, mut cb: impl FnMut(&[u8], &T) -> bool) -> bool {
        self.visit_node(self.root.get(), &mut cb)
    }

    /// Same as [`visit`](Self::visit), restricted to keys starting with `prefix`.
    pub fn visit_prefix(&self, prefix: &[u8], mut cb: impl FnMut(&[u8], &T) -> bool) -> bool {
        let subtree = self.locate_prefix_subtree(prefix);
        self.visit_node(subtree, &mut cb)
    }

    pub fn iterate(&self) -> Iter<'_, T> {
        let root = self.root.get();
        let mut stack = Vec::new();
        if !root.is_none() {
            stack.push(root);
        }
        Iter { stack, _marker: core::marker::PhantomData }
    }

    pub fn iterate_prefix(&self, prefix: &[u8]) -> Iter<'_, T> {
        let subtree = self.locate_prefix_subtree(prefix);
        let mut stack = Vec::new();
        if !subtree.is_none() {
            stack.push(subtree);
        }
        Iter { stack, _marker: core::marker::PhantomData }
    }

    // ---- internal helpers -------------------------------------------------

    fn alloc_leaf(&self, key: &[u8], value: T) -> NonNull<LeafNode<T>> {
        let key_ptr = if key.is_empty() {
            self.alloc.alloc(0)
        } else {
            let raw = self.alloc.alloc(key.len());
            // SAFETY: `raw` is a fresh allocation of at least `key.len()` bytes.
            unsafe { core::ptr::copy_nonoverlapping(key.as_ptr(), raw.as_ptr(), key.len()) };
            raw
        };
        alloc_traits::new(self.alloc, LeafNode::new(key_ptr, key.len(), value))
            .expect("leaf value types must not require alignment greater than a machine word")
    }

    fn free_node(&self, node: NodeRef<T>) {
        match node {
            NodeRef::None => {}
            NodeRef::Leaf(p) => {
                // SAFETY: caller guarantees no other reference to this leaf
                // remains; its value has already been moved out or is being
                // dropped separately by the caller.
                let (key_ptr, key_len) = unsafe { (p.as_ref().key_ptr(), p.as_ref().key_len()) };
                if key_len > 0 {
                    self.alloc.release(key_ptr, key_len);
                }
                alloc_traits::free(self.alloc, p);
            }
            NodeRef::Node4(p) => alloc_traits::free(self.alloc, p),
            NodeRef::Node16(p) => alloc_traits::free(self.alloc, p),
            NodeRef::Node48(p) => alloc_traits::free(self.alloc, p),
            NodeRef::Node256(p) => alloc_traits::free(self.alloc, p),
        }
    }

    /// Descend to the lexicographically smallest leaf under `node`
    /// (terminal slot wins, since an empty-suffix key sorts first).
    fn minimum_leaf(&self, node: NodeRef<T>) -> NonNull<LeafNode<T>> {
        match node {
            NodeRef::Leaf(p) => p,
            NodeRef::None => unreachable!("minimum_leaf called on an empty subtree"),
            _ => {
                let header = node.header().expect("inner node");
                if let Some(t) = header.terminal {
                    return t;
                }
                let child =
                    node.lowest_child().expect("a childless, terminal-less inner node cannot exist");
                self.minimum_leaf(child)
            }
        }
    }

    /// Descend to the lexicographically largest leaf under `node`.
    fn maximum_leaf(&self, node: NodeRef<T>) -> NonNull<LeafNode<T>> {
        match node {
            NodeRef::Leaf(p) => p,
            NodeRef::None => unreachable!("maximum_leaf called on an empty subtree"),
            _ => match node.highest_child() {
                Some(child) => self.maximum_leaf(child),
                None => node
                    .header()
                    .expect("inner node")
                    .terminal
                    .expect("a childless inner node must have a terminal leaf"),
            },
        }
    }

    /// Matches `node`'s compressed prefix against `key[depth..]`. Returns
    /// `(matched, full)`: `matched` is the count of leading bytes that
    /// agreed (capped by `key.len() - depth`); `full` is whether that count
    /// equals the node's true prefix length. Prefix bytes beyond the inline
    /// `PREFIX_CAP` are recovered from the node's minimum leaf, which shares
    /// every byte of the node's accumulated path by construction.
    fn match_prefix(&self, node: NodeRef<T>, key: &[u8], depth: usize) -> (usize, bool) {
        let header = node.header().expect("match_prefix is only called on inner nodes");
        let prefix_len = header.prefix_len as usize;
        if prefix_len == 0 {
            return (0, true);
        }
        let remaining = key.len().saturating_sub(depth);
        let check_len = prefix_len.min(remaining);
        let stored = header.stored_prefix();
        let mut overflow_leaf: Option<NonNull<LeafNode<T>>> = None;
        let mut matched = 0usize;
        for (i, &want) in key[depth..depth + check_len].iter().enumerate() {
            let have = if i < stored.len() {
                stored[i]
            } else {
                let leaf = *overflow_leaf.get_or_insert_with(|| self.minimum_leaf(node));
                // SAFETY: leaf lives as long as it is reachable.
                unsafe { leaf.as_ref() }.key()[depth + i]
            };
            if have != want {
                break;
            }
            matched += 1;
        }
        (matched, matched == prefix_len)
    }

    fn locate_prefix_subtree(&self, prefix: &[u8]) -> NodeRef<T> {
        let mut cur = self.root.get();
        let mut depth = 0usize;
        loop {
            match cur {
                NodeRef::None => return NodeRef::None,
                NodeRef::Leaf(p) => {
                    // SAFETY: leaf lives as long as it is reachable.
                    let leaf = unsafe { p.as_ref() };
                    return if leaf.key().starts_with(prefix) { cur } else { NodeRef::None };
                }
                _ => {
                    let (matched, full) = self.match_prefix(cur, prefix, depth);
                    if depth + matched == prefix.len() {
                        return cur;
                    }
                    if !full {
                        return NodeRef::None;
                    }
                    depth += matched;
                    let next = cur.find(prefix[depth]);
                    if next.is_none() {
                        return NodeRef::None;
                    }
                    cur = next;
                    depth += 1;
                }
            }
        }
    }

    fn visit_node(&self, node: NodeRef<T>, cb: &mut dyn FnMut(&[u8], &T) -> bool) -> bool {
        match node {
            NodeRef::None => false,
            NodeRef::Leaf(p) => {
                // SAFETY: leaf lives as long as it is reachable.
                let leaf = unsafe { p.as_ref() };
                cb(leaf.key(), &leaf.value)
            }
            _ => {
                let header = node.header().expect("inner node");
                if let Some(t) = header.terminal {
                    // SAFETY: leaf lives as long as it is reachable.
                    let leaf = unsafe { t.as_ref() };
                    if cb(leaf.key(), &leaf.value) {
                        return true;
                    }
                }
                for (_, child) in node.children_sorted() {
                    if self.visit_node(child, cb) {
                        return true;
                    }
                }
                false
            }
        }
    }

    fn insert_into(
        &self,
        current: NodeRef<T>,
        key: &[u8],
        depth: usize,
        value: T,
        replace: bool,
    ) -> (NodeRef<T>, Option<T>) {
        match current {
            NodeRef::None => (NodeRef::Leaf(self.alloc_leaf(key, value)), None),

            NodeRef::Leaf(existing) => {
                // SAFETY: leaf lives as long as it is reachable.
                let existing_key = unsafe { existing.as_ref() }.key();
                if existing_key == key {
                    if !replace {
                        return (current, None);
                    }
                    // SAFETY: unique access; no other reference to this leaf
                    // is live during the swap.
                    let old = unsafe { core::mem::replace(&mut (*existing.as_ptr()).value, value) };
                    return (current, Some(old));
                }

                let common = common_prefix_len(existing_key, key, depth);
                let mut node4 = Node4::empty();
                node4.header.set_prefix(&key[depth..depth + common]);

                let existing_next = depth + common;
                if existing_next == existing_key.len() {
                    node4.header.terminal = Some(existing);
                } else {
                    node4.insert_sorted(existing_key[existing_next], NodeRef::Leaf(existing));
                }

                let new_leaf = self.alloc_leaf(key, value);
                let new_next = depth + common;
                if new_next == key.len() {
                    node4.header.terminal = Some(new_leaf);
                } else {
                    node4.insert_sorted(key[new_next], NodeRef::Leaf(new_leaf));
                }

                let ptr = alloc_traits::new(self.alloc, node4)
                    .expect("Node4 never exceeds the word alignment ceiling");
                (NodeRef::Node4(ptr), None)
            }

            _ => {
                let (matched, full) = self.match_prefix(current, key, depth);
                if !full {
                    (self.split_prefix(current, key, depth, matched, value), None)
                } else {
                    let depth2 = depth + matched;
                    if depth2 == key.len() {
                        let header = current.header_mut().expect("inner node");
                        match header.terminal {
                            Some(existing) if replace => {
                                // SAFETY: unique access during the swap.
                                let old = unsafe {
                                    core::mem::replace(&mut (*existing.as_ptr()).value, value)
                                };
                                (current, Some(old))
                            }
                            Some(_) => (current, None),
                            None => {
                                header.terminal = Some(self.alloc_leaf(key, value));
                                (current, None)
                            }
                        }
                    } else {
                        let byte = key[depth2];
                        let child = current.find(byte);
                        let (new_child, old) =
                            self.insert_into(child, key, depth2 + 1, value, replace);
                        if child.is_none() {
                            (self.add_child(current, byte, new_child), old)
                        } else {
                            self.overwrite_child(current, byte, new_child);
                            (current, old)
                        }
                    }
                }
            }
        }
    }

    /// Case C.1: the node's compressed prefix only partially matches `key`
    /// at offset `matched`. Splits `current` into a fresh Node4 holding the
    /// matched portion as its prefix, with `current` (prefix truncated) and
    /// a new leaf as its two children (or one in the terminal slot, if the
    /// new key ends exactly at the split point).
    fn split_prefix(
        &self,
        current: NodeRef<T>,
        key: &[u8],
        depth: usize,
        matched: usize,
        value: T,
    ) -> NodeRef<T> {
        let leaf_key = {
            // SAFETY: leaf lives as long as it is reachable.
            let leaf = unsafe { self.minimum_leaf(current).as_ref() };
            leaf.key()
        };
        let old_prefix_len = current.header().expect("inner node").prefix_len as usize;
        let old_byte = leaf_key[depth + matched];
        let remainder_start = depth + matched + 1;
        let old_new_prefix_len = old_prefix_len - matched - 1;

        let mut node4 = Node4::empty();
        node4.header.set_prefix(&key[depth..depth + matched]);

        {
            let header = current.header_mut().expect("inner node");
            header.set_prefix(&leaf_key[remainder_start..remainder_start + old_new_prefix_len]);
        }
        node4.insert_sorted(old_byte, current);

        let new_leaf = self.alloc_leaf(key, value);
        if remainder_start == key.len() {
            node4.header.terminal = Some(new_leaf);
        } else {
            node4.insert_sorted(key[remainder_start], NodeRef::Leaf(new_leaf));
        }

        let ptr =
            alloc_traits::new(self.alloc, node4).expect("Node4 never exceeds the word alignment ceiling");
        NodeRef::Node4(ptr)
    }

    /// Insert `byte -> child` into `current`, promoting to the next larger
    /// node kind (and freeing the old node) if `current` is already full.
    fn add_child(&self, current: NodeRef<T>, byte: u8, child: NodeRef<T>) -> NodeRef<T> {
        match current {
            NodeRef::Node4(mut p) => {
                // SAFETY: unique access under the tree's single-writer discipline.
                let node = unsafe { p.as_mut() };
                if !node.is_full() {
                    node.insert_sorted(byte, child);
                    return current;
                }
                let mut bigger = Node16::empty();
                bigger.header = node.header;
                for i in 0..node.count as usize {
                    bigger.insert_sorted(node.keys[i], node.children[i]);
                }
                bigger.insert_sorted(byte, child);
                let ptr = alloc_traits::new(self.alloc, bigger)
                    .expect("Node16 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node16(ptr)
            }
            NodeRef::Node16(mut p) => {
                let node = unsafe { p.as_mut() };
                if !node.is_full() {
                    node.insert_sorted(byte, child);
                    return current;
                }
                let mut bigger = Node48::empty();
                bigger.header = node.header;
                for i in 0..node.count as usize {
                    bigger.insert(node.keys[i], node.children[i]);
                }
                bigger.insert(byte, child);
                let ptr = alloc_traits::new(self.alloc, bigger)
                    .expect("Node48 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node48(ptr)
            }
            NodeRef::Node48(mut p) => {
                let node = unsafe { p.as_mut() };
                if !node.is_full() {
                    node.insert(byte, child);
                    return current;
                }
                let mut bigger = Node256::empty();
                bigger.header = node.header;
                for (b, c) in node.children_sorted() {
                    bigger.insert(b, c);
                }
                bigger.insert(byte, child);
                let ptr = alloc_traits::new(self.alloc, bigger)
                    .expect("Node256 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node256(ptr)
            }
            NodeRef::Node256(mut p) => {
                // SAFETY: Node256 is never full; every byte has a direct slot.
                let node = unsafe { p.as_mut() };
                node.insert(byte, child);
                current
            }
            _ => unreachable!("add_child called on a non-inner node"),
        }
    }

    fn overwrite_child(&self, current: NodeRef<T>, byte: u8, new_child: NodeRef<T>) {
        // SAFETY: unique access under the tree's single-writer discipline;
        // `byte` is known (by the caller) to already occupy a slot.
        unsafe {
            match current {
                NodeRef::Node4(mut p) => {
                    let n = p.as_mut();
                    if let Some(slot) = n.find_slot(byte) {
                        n.children[slot] = new_child;
                    }
                }
                NodeRef::Node16(mut p) => {
                    let n = p.as_mut();
                    if let Some(slot) = n.find_slot(byte) {
                        n.children[slot] = new_child;
                    }
                }
                NodeRef::Node48(mut p) => {
                    let n = p.as_mut();
                    let slot = n.index[byte as usize];
                    if slot != 0 {
                        n.children[slot as usize - 1] = new_child;
                    }
                }
                NodeRef::Node256(mut p) => {
                    p.as_mut().children[byte as usize] = new_child;
                }
                _ => unreachable!("overwrite_child called on a non-inner node"),
            }
        }
    }

    fn delete_from(&self, current: NodeRef<T>, key: &[u8], depth: usize) -> (NodeRef<T>, Option<T>) {
        match current {
            NodeRef::None => (NodeRef::None, None),
            NodeRef::Leaf(p) => {
                // SAFETY: leaf lives as long as it is reachable.
                if unsafe { p.as_ref() }.key() != key {
                    return (current, None);
                }
                // SAFETY: this is the sole reference; the value is moved out
                // before the leaf's storage is released.
                let value = unsafe { core::ptr::read(&p.as_ref().value) };
                self.free_node(current);
                (NodeRef::None, Some(value))
            }
            _ => {
                let (matched, full) = self.match_prefix(current, key, depth);
                if !full {
                    return (current, None);
                }
                let depth2 = depth + matched;
                if depth2 == key.len() {
                    let header = current.header_mut().expect("inner node");
                    match header.terminal.take() {
                        None => (current, None),
                        Some(leaf) => {
                            // SAFETY: sole reference to this leaf.
                            let value = unsafe { core::ptr::read(&leaf.as_ref().value) };
                            self.free_node(NodeRef::Leaf(leaf));
                            (self.collapse_if_needed(current), Some(value))
                        }
                    }
                } else {
                    let byte = key[depth2];
                    let child = current.find(byte);
                    if child.is_none() {
                        return (current, None);
                    }
                    let (new_child, removed) = self.delete_from(child, key, depth2 + 1);
                    if removed.is_none() {
                        return (current, None);
                    }
                    if new_child.is_none() {
                        (self.remove_child(current, byte), removed)
                    } else {
                        self.overwrite_child(current, byte, new_child);
                        (current, removed)
                    }
                }
            }
        }
    }

    /// Remove `byte` from `current`, demoting to a smaller node kind if its
    /// count falls to the kind's threshold, then checks for path collapse.
    fn remove_child(&self, current: NodeRef<T>, byte: u8) -> NodeRef<T> {
        let shrunk = match current {
            NodeRef::Node4(mut p) => {
                // SAFETY: unique access under the tree's single-writer discipline.
                let node = unsafe { p.as_mut() };
                if let Some(slot) = node.find_slot(byte) {
                    node.remove_at(slot);
                }
                current
            }
            NodeRef::Node16(mut p) => {
                let demote = {
                    let node = unsafe { p.as_mut() };
                    if let Some(slot) = node.find_slot(byte) {
                        node.remove_at(slot);
                    }
                    node.count as usize <= 3
                };
                if demote { self.demote(current) } else { current }
            }
            NodeRef::Node48(mut p) => {
                let demote = {
                    let node = unsafe { p.as_mut() };
                    node.remove(byte);
                    node.count as usize <= 12
                };
                if demote { self.demote(current) } else { current }
            }
            NodeRef::Node256(mut p) => {
                let demote = {
                    let node = unsafe { p.as_mut() };
                    node.remove(byte);
                    node.count as usize <= 37
                };
                if demote { self.demote(current) } else { current }
            }
            _ => unreachable!("remove_child called on a non-inner node"),
        };
        self.collapse_if_needed(shrunk)
    }

    fn demote(&self, current: NodeRef<T>) -> NodeRef<T> {
        match current {
            NodeRef::Node16(p) => {
                // SAFETY: valid pointer to a live Node16.
                let node = unsafe { p.as_ref() };
                let mut smaller = Node4::empty();
                smaller.header = node.header;
                for i in 0..node.count as usize {
                    smaller.insert_sorted(node.keys[i], node.children[i]);
                }
                let ptr = alloc_traits::new(self.alloc, smaller)
                    .expect("Node4 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node4(ptr)
            }
            NodeRef::Node48(p) => {
                let node = unsafe { p.as_ref() };
                let mut smaller = Node16::empty();
                smaller.header = node.header;
                for (b, c) in node.children_sorted() {
                    smaller.insert_sorted(b, c);
                }
                let ptr = alloc_traits::new(self.alloc, smaller)
                    .expect("Node16 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node16(ptr)
            }
            NodeRef::Node256(p) => {
                let node = unsafe { p.as_ref() };
                let mut smaller = Node48::empty();
                smaller.header = node.header;
                for (b, c) in node.children_sorted() {
                    smaller.insert(b, c);
                }
                let ptr = alloc_traits::new(self.alloc, smaller)
                    .expect("Node48 never exceeds the word alignment ceiling");
                self.free_node(current);
                NodeRef::Node48(ptr)
            }
            other => other,
        }
    }

    /// After a removal, collapse `current` if it has become structurally
    /// redundant: no children and no terminal (discard), no children but a
    /// terminal (replace with that leaf), or exactly one child and no
    /// terminal (fold the edge and the child's prefix into `current`'s
    /// prefix and replace `current` with the child directly).
    fn collapse_if_needed(&self, current: NodeRef<T>) -> NodeRef<T> {
        let header = current.header().expect("inner node");
        let count = current.count();
        let terminal = header.terminal;

        if count == 0 {
            let result = match terminal {
                Some(leaf) => NodeRef::Leaf(leaf),
                None => NodeRef::None,
            };
            self.free_node(current);
            return result;
        }

        if count == 1 && terminal.is_none() {
            let (byte, child) = current.children_sorted()[0];
            let (new_len, buf) = self.concat_prefix_bytes(current, byte, child);
            let mut merged = child;
            if let Some(child_header) = merged.header_mut() {
                child_header.prefix_len = new_len as u32;
                child_header.prefix = buf;
            }
            self.free_node(current);
            return merged;
        }

        current
    }

    /// Computes the inline prefix bytes (and true length) for `current`'s
    /// prefix, `edge_byte`, and `child`'s prefix concatenated, without
    /// needing the nodes' absolute depth in the tree.
    fn concat_prefix_bytes(
        &self,
        current: NodeRef<T>,
        edge_byte: u8,
        child: NodeRef<T>,
    ) -> (usize, [u8; PREFIX_CAP]) {
        let current_header = current.header().expect("inner node");
        let current_len = current_header.prefix_len as usize;
        let child_len = child.header().map(|h| h.prefix_len as usize).unwrap_or(0);
        let new_len = current_len + 1 + child_len;

        let mut buf = [0u8; PREFIX_CAP];
        let current_stored = current_header.stored_prefix();
        let take_current = current_stored.len().min(PREFIX_CAP);
        buf[..take_current].copy_from_slice(&current_stored[..take_current]);

        if current_len < PREFIX_CAP {
            buf[current_len] = edge_byte;
            let after = current_len + 1;
            if after < PREFIX_CAP {
                if let Some(child_header) = child.header() {
                    let child_stored = child_header.stored_prefix();
                    let want = PREFIX_CAP - after;
                    let take_child = child_stored.len().min(want);
                    buf[after..after + take_child].copy_from_slice(&child_stored[..take_child]);
                }
            }
        }
        (new_len, buf)
    }
}

impl<'a, A: RawAllocator, T> Drop for Art<'a, A, T> {
    fn drop(&mut self) {
        drop_subtree(self.alloc, self.root.get());
    }
}

fn drop_subtree<A: RawAllocator, T>(alloc: &A, node: NodeRef<T>) {
    match node {
        NodeRef::None => {}
        NodeRef::Leaf(p) => {
            // SAFETY: tree teardown; sole owner of this leaf.
            let (key_ptr, key_len) = unsafe { (p.as_ref().key_ptr(), p.as_ref().key_len()) };
            unsafe { core::ptr::drop_in_place(core::ptr::addr_of_mut!((*p.as_ptr()).value)) };
            if key_len > 0 {
                alloc.release(key_ptr, key_len);
            }
            alloc_traits::free(alloc, p);
        }
        _ => {
            let header = node.header().expect("inner node");
            if let Some(t) = header.terminal {
                drop_subtree(alloc, NodeRef::Leaf(t));
            }
            for (_, child) in node.children_sorted() {
                drop_subtree(alloc, child);
            }
            match node {
                NodeRef::Node4(p) => alloc_traits::free(alloc, p),
                NodeRef::Node16(p) => alloc_traits::free(alloc, p),
                NodeRef::Node48(p) => alloc_traits::free(alloc, p),
                NodeRef::Node256(p) => alloc_traits::free(alloc, p),
                NodeRef::None | NodeRef::Leaf(_) => unreachable!(),
            }
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < a.len() && i < b.len() && a[i] == b[i] {
        i += 1;
    }
    i - start
}

/// A lazy, restartable, in-order iterator over an [`Art`]'s leaves (or a
/// prefix-bounded subtree of them), built on an explicit pending-node stack
/// rather than recursion inside `next`.
pub struct Iter<'t, T> {
    stack: Vec<NodeRef<T>>,
    _marker: core::marker::PhantomData<&'t T>,
}

impl<'t, T> Iterator for Iter<'t, T> {
    type Item = (&'t [u8], &'t T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.stack.pop()?;
            match node {
                NodeRef::None => continue,
                NodeRef::Leaf(p) => {
                    // SAFETY: leaf lives for at least 't, bounded by the
                    // tree this iterator borrows from.
                    let leaf = unsafe { p.as_ref() };
                    return Some((leaf.key(), &leaf.value));
                }
                _ => {
                    let header = node.header().expect("inner node");
                    let terminal = header.terminal;
                    let mut children = node.children_sorted();
                    children.reverse();
                    for (_, c) in children {
                        self.stack.push(c);
                    }
                    if let Some(t) = terminal {
                        // SAFETY: see above.
                        let leaf = unsafe { t.as_ref() };
                        return Some((leaf.key(), &leaf.value));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Recycler;

    #[test]
    fn round_trip_insert_and_search() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        assert_eq!(tree.insert(b"apple", 1), None);
        assert_eq!(tree.search(b"apple"), Some(&1));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn replacement_returns_old_value() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"k", 1);
        assert_eq!(tree.insert(b"k", 2), Some(1));
        assert_eq!(tree.search(b"k"), Some(&2));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn no_replace_keeps_the_existing_value() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"k", 1);
        assert_eq!(tree.insert_no_replace(b"k", 2), Some(1));
        assert_eq!(tree.search(b"k"), Some(&1));
    }

    #[test]
    fn delete_removes_the_key() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"k", 1);
        assert_eq!(tree.delete(b"k"), Some(1));
        assert_eq!(tree.search(b"k"), None);
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn idempotent_absence() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"k", 1);
        assert_eq!(tree.delete(b"missing"), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn three_inserts_and_ordered_iteration() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"apple", 1);
        tree.insert(b"banana", 2);
        tree.insert(b"cherry", 3);

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.search(b"banana"), Some(&2));

        let collected: Vec<_> =
            tree.iterate().map(|(k, v)| (rust_alloc::vec::Vec::from(k), *v)).collect();
        assert_eq!(
            collected,
            rust_alloc::vec![
                (b"apple".to_vec(), 1),
                (b"banana".to_vec(), 2),
                (b"cherry".to_vec(), 3),
            ]
        );

        assert_eq!(tree.minimum(), Some((&b"apple"[..], &1)));
        assert_eq!(tree.maximum(), Some((&b"cherry"[..], &3)));
    }

    #[test]
    fn prefix_with_nested_keys() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"user", 1);
        tree.insert(b"user:1", 2);
        tree.insert(b"user:1:name", 3);
        tree.insert(b"user:1:email", 4);
        tree.insert(b"user:2", 5);
        tree.insert(b"config", 7);

        let keys: Vec<rust_alloc::vec::Vec<u8>> =
            tree.iterate_prefix(b"user:1").map(|(k, _)| k.to_vec()).collect();
        assert_eq!(
            keys,
            rust_alloc::vec![b"user:1".to_vec(), b"user:1:email".to_vec(), b"user:1:name".to_vec()]
        );
    }

    #[test]
    fn delete_collapses_structure() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"apple", 1);
        tree.insert(b"apricot", 2);

        assert_eq!(tree.delete(b"apple"), Some(1));
        assert_eq!(tree.search(b"apricot"), Some(&2));
        assert_eq!(tree.minimum(), Some((&b"apricot"[..], &2)));
        assert_eq!(tree.maximum(), Some((&b"apricot"[..], &2)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn ordered_iteration_over_many_keys_promotes_and_demotes_nodes() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, u16> = Art::new(&recycler);
        let mut keys: Vec<rust_alloc::vec::Vec<u8>> = Vec::new();
        for i in 0..300u16 {
            let key = rust_alloc::format!("key-{i:04}").into_bytes();
            tree.insert(&key, i);
            keys.push(key);
        }
        keys.sort();

        let visited: Vec<rust_alloc::vec::Vec<u8>> =
            tree.iterate().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(visited, keys);
        assert_eq!(tree.len(), 300);

        // Delete every other key, promoting/demoting nodes along the way.
        for i in (0..300u16).step_by(2) {
            let key = rust_alloc::format!("key-{i:04}").into_bytes();
            assert_eq!(tree.delete(&key), Some(i));
        }
        assert_eq!(tree.len(), 150);
        for i in (1..300u16).step_by(2) {
            let key = rust_alloc::format!("key-{i:04}").into_bytes();
            assert_eq!(tree.search(&key), Some(&i));
        }
    }

    #[test]
    fn empty_key_is_a_valid_key() {
        let recycler = Recycler::new();
        let tree: Art<'_, Recycler, i32> = Art::new(&recycler);
        tree.insert(b"", 1);
        tree.insert(b"a", 2);
        assert_eq!(tree.search(b""), Some(&1));
        assert_eq!(tree.minimum(), Some((&b""[..], &1)));
    }
}
