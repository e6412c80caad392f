use std::ptr;

use super::{
    alloc::SlotAllocator,
    node::{Node, Slots},
    tree::BPlusTree,
};
use crate::error::InvariantViolation;

/// Read-only views of a node
impl<K, V, const N: usize> Node<K, V, N> {
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Value stored at `slot` of a leaf.
    pub fn value(&self, slot: usize) -> Option<&V> {
        match &self.slots {
            Slots::Leaf(values) => values.get(slot).map(|value| unsafe { value.as_ref() }),
            Slots::Internal(_) => None,
        }
    }

    /// Child at `slot` of an inner node.
    pub fn child(&self, slot: usize) -> Option<&Node<K, V, N>> {
        match &self.slots {
            Slots::Internal(children) => children.get(slot).map(|child| unsafe { child.as_ref() }),
            Slots::Leaf(_) => None,
        }
    }

    /// Following leaf in key order. Always `None` for inner nodes.
    pub fn next_leaf(&self) -> Option<&Node<K, V, N>> {
        self.next.map(|next| unsafe { &*next.as_ptr() })
    }

    /// Preceding leaf in key order. Always `None` for inner nodes.
    pub fn prev_leaf(&self) -> Option<&Node<K, V, N>> {
        self.prev.map(|prev| unsafe { &*prev.as_ptr() })
    }
}

impl<K, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    pub fn root(&self) -> &Node<K, V, N> {
        unsafe { self.root.as_ref() }
    }

    /// Number of levels, 1 for a single leaf.
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = self.root();
        while let Some(child) = node.child(0) {
            node = child;
            height += 1;
        }
        height
    }

    /// Every key, walking the leaf chain forward from the minimum leaf.
    pub fn keys_ascending(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.size());
        let mut leaf = Some(unsafe { self.ctx.min_leaf.as_ref() });
        while let Some(node) = leaf {
            keys.extend(node.keys.iter());
            leaf = node.next_leaf();
        }
        keys
    }

    /// Every key, walking the leaf chain backward from the maximum leaf.
    pub fn keys_descending(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.size());
        let mut leaf = Some(unsafe { self.ctx.max_leaf.as_ref() });
        while let Some(node) = leaf {
            keys.extend(node.keys.iter().rev());
            leaf = node.prev_leaf();
        }
        keys
    }
}

struct Walk<'a, K, V, const N: usize> {
    leaves: Vec<&'a Node<K, V, N>>,
    leaf_depth: Option<usize>,
    inner: usize,
}

/// Validation
impl<K: Ord, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    /// Checks every structural invariant and reports the first violation.
    /// Walks the whole tree, so it costs O(n).
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut walk = Walk {
            leaves: Vec::new(),
            leaf_depth: None,
            inner: 0,
        };
        let entries = Self::check_node(self.root(), 0, true, &mut walk)?;

        if entries != self.size() {
            return Err(InvariantViolation::SizeMismatch {
                reported: self.size(),
                actual: entries,
            });
        }

        let stats = self.stats();
        if stats.leaves != walk.leaves.len() || stats.inner_nodes != walk.inner {
            return Err(InvariantViolation::NodeCountMismatch {
                reported_leaves: stats.leaves,
                reported_inner: stats.inner_nodes,
                leaves: walk.leaves.len(),
                inner: walk.inner,
            });
        }

        Self::check_leaf_chain(&walk.leaves)?;

        let first = walk.leaves[0];
        let last = walk.leaves[walk.leaves.len() - 1];
        if !ptr::eq(self.ctx.min_leaf.as_ptr(), first) {
            return Err(InvariantViolation::ExtremeLeafMismatch { which: "minimum" });
        }
        if !ptr::eq(self.ctx.max_leaf.as_ptr(), last) {
            return Err(InvariantViolation::ExtremeLeafMismatch { which: "maximum" });
        }

        Ok(())
    }

    fn check_node<'a>(
        node: &'a Node<K, V, N>,
        depth: usize,
        is_root: bool,
        walk: &mut Walk<'a, K, V, N>,
    ) -> Result<usize, InvariantViolation> {
        let count = node.key_count();

        if count > N {
            return Err(InvariantViolation::Overfull {
                depth,
                count,
                order: N,
            });
        }
        if !is_root && count < Node::<K, V, N>::MIN_FILL {
            return Err(InvariantViolation::Underfull {
                depth,
                count,
                min: Node::<K, V, N>::MIN_FILL,
            });
        }
        if is_root && !node.is_leaf() && count < 2 {
            return Err(InvariantViolation::DegenerateRoot { count });
        }
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(InvariantViolation::UnsortedKeys { depth });
        }

        if node.is_leaf() {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(first) if first != depth => {
                    return Err(InvariantViolation::UnevenLeafDepth { first, other: depth })
                }
                Some(_) => {}
            }
            walk.leaves.push(node);
            return Ok(count);
        }

        walk.inner += 1;
        let mut entries = 0;
        for (slot, child) in node.children().iter().enumerate() {
            let child: &'a Node<K, V, N> = unsafe { child.as_ref() };
            entries += Self::check_node(child, depth + 1, false, walk)?;

            if child.keys.first() != Some(&node.keys[slot]) {
                return Err(InvariantViolation::StaleSeparator { depth, slot });
            }
        }

        Ok(entries)
    }

    /// `leaves` is in depth-first order, which the chain must reproduce.
    fn check_leaf_chain(leaves: &[&Node<K, V, N>]) -> Result<(), InvariantViolation> {
        if leaves[0].prev.is_some() {
            return Err(InvariantViolation::BrokenLeafChain { position: 0 });
        }
        if leaves[leaves.len() - 1].next.is_some() {
            return Err(InvariantViolation::BrokenLeafChain {
                position: leaves.len() - 1,
            });
        }

        for (position, pair) in leaves.windows(2).enumerate() {
            let (left, right) = (pair[0], pair[1]);

            let forward = left.next.is_some_and(|n| ptr::eq(n.as_ptr(), right));
            let backward = right.prev.is_some_and(|p| ptr::eq(p.as_ptr(), left));
            if !forward || !backward {
                return Err(InvariantViolation::BrokenLeafChain { position });
            }

            if left.keys.last() >= right.keys.first() {
                return Err(InvariantViolation::UnsortedLeafChain { position });
            }
        }

        Ok(())
    }
}
