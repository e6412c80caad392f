use std::ptr::NonNull;

use arrayvec::ArrayVec;

use super::{
    alloc::SlotAllocator,
    tree::{Reservation, TreeContext},
};

pub(crate) type NodePtr<K, V, const N: usize> = NonNull<Node<K, V, N>>;

/// Slot payload of a node. The variant is chosen at construction and never
/// changes.
pub(crate) enum Slots<K, V, const N: usize> {
    /// `values[i]` is owned by `keys[i]`.
    Leaf(ArrayVec<NonNull<V>, N>),
    /// `children[i]` is the subtree whose minimum key is `keys[i]`.
    Internal(ArrayVec<NodePtr<K, V, N>, N>),
}

/// A node of a B+ tree of order `N`.
///
/// Nodes own their value or child slots exclusively. `next` and `prev` link
/// leaves in ascending key order; they are never set on internal nodes.
pub struct Node<K, V, const N: usize> {
    pub(crate) keys: ArrayVec<K, N>,
    pub(crate) slots: Slots<K, V, N>,
    pub(crate) next: Option<NodePtr<K, V, N>>,
    pub(crate) prev: Option<NodePtr<K, V, N>>,
}

impl<K, V, const N: usize> Node<K, V, N> {
    pub(crate) const ORDER_CHECK: () = assert!(N >= 2, "B+ tree order must be at least 2");

    /// Minimum number of keys held by every non-root node.
    pub const MIN_FILL: usize = N - N / 2;

    pub(crate) fn new_leaf() -> Self {
        Self {
            keys: ArrayVec::new(),
            slots: Slots::Leaf(ArrayVec::new()),
            next: None,
            prev: None,
        }
    }

    pub(crate) fn new_internal() -> Self {
        Self {
            keys: ArrayVec::new(),
            slots: Slots::Internal(ArrayVec::new()),
            next: None,
            prev: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.slots, Slots::Leaf(_))
    }

    #[inline]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.keys.is_full()
    }

    #[inline]
    pub(crate) fn is_underflow(&self) -> bool {
        self.keys.len() < Self::MIN_FILL
    }

    /// Never called on an empty node.
    #[inline]
    pub(crate) fn min_key(&self) -> &K {
        &self.keys[0]
    }

    #[inline]
    pub(crate) fn values(&self) -> &ArrayVec<NonNull<V>, N> {
        match &self.slots {
            Slots::Leaf(values) => values,
            Slots::Internal(_) => unreachable!("value slots requested from an internal node"),
        }
    }

    #[inline]
    pub(crate) fn values_mut(&mut self) -> &mut ArrayVec<NonNull<V>, N> {
        match &mut self.slots {
            Slots::Leaf(values) => values,
            Slots::Internal(_) => unreachable!("value slots requested from an internal node"),
        }
    }

    #[inline]
    pub(crate) fn children(&self) -> &ArrayVec<NodePtr<K, V, N>, N> {
        match &self.slots {
            Slots::Internal(children) => children,
            Slots::Leaf(_) => unreachable!("child slots requested from a leaf"),
        }
    }

    #[inline]
    pub(crate) fn children_mut(&mut self) -> &mut ArrayVec<NodePtr<K, V, N>, N> {
        match &mut self.slots {
            Slots::Internal(children) => children,
            Slots::Leaf(_) => unreachable!("child slots requested from a leaf"),
        }
    }

    fn insert_value(&mut self, at: usize, key: K, value: NonNull<V>) {
        self.keys.insert(at, key);
        self.values_mut().insert(at, value);
    }

    fn insert_child(&mut self, at: usize, key: K, child: NodePtr<K, V, N>) {
        self.keys.insert(at, key);
        self.children_mut().insert(at, child);
    }

    /// Number of entries a full node keeps when the new entry lands at `pos`.
    /// At or below the middle the new entry joins the left half, above it the
    /// right half; either way both halves end with at least `MIN_FILL`.
    #[inline]
    fn split_point(pos: usize) -> usize {
        if pos <= N / 2 {
            N / 2
        } else {
            N - N / 2
        }
    }

    /// Moves every entry from `mid` on into the empty sibling `right`.
    fn move_tail(&mut self, mid: usize, right: &mut Self) {
        debug_assert!(right.keys.is_empty());

        right.keys.extend(self.keys.drain(mid..));
        match (&mut self.slots, &mut right.slots) {
            (Slots::Leaf(left), Slots::Leaf(right)) => right.extend(left.drain(mid..)),
            (Slots::Internal(left), Slots::Internal(right)) => right.extend(left.drain(mid..)),
            _ => unreachable!("split into a sibling of the other kind"),
        }
    }
}

/// Search
impl<K: Ord, V, const N: usize> Node<K, V, N> {
    /// Index of the first key strictly greater than `key`.
    #[inline]
    pub(crate) fn upper_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// Finds the value slot owned by `key` in this subtree.
    pub(crate) fn search(&self, key: &K) -> Option<NonNull<V>> {
        let pos = self.upper_bound(key);
        if pos == 0 {
            return None;
        }

        let slot = pos - 1;
        match &self.slots {
            Slots::Leaf(values) => (self.keys[slot] == *key).then(|| values[slot]),
            Slots::Internal(children) => unsafe { children[slot].as_ref() }.search(key),
        }
    }
}

/// Insertion
impl<K: Ord + Clone, V, const N: usize> Node<K, V, N> {
    /// Inserts `key` with the value waiting in `reservation` into this
    /// subtree. The key must not be present.
    ///
    /// A full node is split before the entry is placed; the new right
    /// sibling is returned so the caller can link it into the level above.
    /// Every node a split needs is taken from `reservation`.
    pub(crate) fn insert<VA, NA>(
        &mut self,
        key: K,
        reservation: &mut Reservation<K, V, N>,
        ctx: &mut TreeContext<K, V, N, VA, NA>,
    ) -> Option<NodePtr<K, V, N>>
    where
        VA: SlotAllocator<V>,
        NA: SlotAllocator<Node<K, V, N>>,
    {
        let pos = self.upper_bound(&key);

        if self.is_leaf() {
            debug_assert!(pos == 0 || self.keys[pos - 1] != key);
            let value = reservation.take_value();

            if !self.is_full() {
                self.insert_value(pos, key, value);
                return None;
            }

            let sibling = ctx.init_node(reservation.take_node(), Node::new_leaf());
            let right = unsafe { &mut *sibling.as_ptr() };
            let mid = Self::split_point(pos);
            self.move_tail(mid, right);

            if pos <= N / 2 {
                self.insert_value(pos, key, value);
            } else {
                right.insert_value(pos - mid, key, value);
            }

            right.prev = Some(NonNull::from(&mut *self));
            right.next = self.next;
            if let Some(next) = self.next {
                unsafe { (*next.as_ptr()).prev = Some(sibling) };
            }
            self.next = Some(sibling);

            log::debug!(
                "Node::insert split leaf {:p} into {} + {} at {:p}",
                self,
                self.keys.len(),
                right.keys.len(),
                sibling
            );

            return Some(sibling);
        }

        // keys below the subtree minimum are routed to the first child
        let slot = pos.saturating_sub(1);
        let child = self.children()[slot];
        log::trace!("Node::insert descend into {:p} at slot {}", child, slot);

        let split = unsafe { (*child.as_ptr()).insert(key, reservation, ctx) };
        if pos == 0 {
            self.keys[0] = unsafe { child.as_ref() }.min_key().clone();
        }

        let new_child = split?;
        let separator = unsafe { new_child.as_ref() }.min_key().clone();
        let at = slot + 1;

        if !self.is_full() {
            self.insert_child(at, separator, new_child);
            return None;
        }

        let sibling = ctx.init_node(reservation.take_node(), Node::new_internal());
        let right = unsafe { &mut *sibling.as_ptr() };
        let mid = Self::split_point(at);
        self.move_tail(mid, right);

        if at <= N / 2 {
            self.insert_child(at, separator, new_child);
        } else {
            right.insert_child(at - mid, separator, new_child);
        }

        log::debug!(
            "Node::insert split inner {:p} into {} + {} at {:p}",
            self,
            self.keys.len(),
            right.keys.len(),
            sibling
        );

        Some(sibling)
    }
}

#[cfg(test)]
mod tests {
    use crate::bplus_base::tree::BPlusTree;

    fn tree_of<const N: usize>(keys: &[i32]) -> BPlusTree<i32, i32, N> {
        let mut tree = BPlusTree::new();
        for &k in keys {
            assert_eq!(tree.insert(k, k * 10), Ok(true));
        }
        tree
    }

    fn leaf_keys<const N: usize>(tree: &BPlusTree<i32, i32, N>, slot: usize) -> Vec<i32> {
        tree.root().child(slot).unwrap().keys().to_vec()
    }

    #[test]
    fn even_order_tie_goes_left() {
        let tree = tree_of::<4>(&[0, 10, 30, 40, 20]);
        assert_eq!(tree.root().keys(), &[0, 30]);
        assert_eq!(leaf_keys(&tree, 0), vec![0, 10, 20]);
        assert_eq!(leaf_keys(&tree, 1), vec![30, 40]);
    }

    #[test]
    fn even_order_above_middle_goes_right() {
        let tree = tree_of::<4>(&[0, 10, 30, 40, 35]);
        assert_eq!(tree.root().keys(), &[0, 30]);
        assert_eq!(leaf_keys(&tree, 0), vec![0, 10]);
        assert_eq!(leaf_keys(&tree, 1), vec![30, 35, 40]);
    }

    #[test]
    fn odd_order_split_is_balanced() {
        let above = tree_of::<5>(&[0, 10, 20, 30, 50, 40]);
        assert_eq!(leaf_keys(&above, 0), vec![0, 10, 20]);
        assert_eq!(leaf_keys(&above, 1), vec![30, 40, 50]);

        let below = tree_of::<5>(&[0, 10, 20, 30, 50, 5]);
        assert_eq!(leaf_keys(&below, 0), vec![0, 5, 10]);
        assert_eq!(leaf_keys(&below, 1), vec![20, 30, 50]);
    }

    #[test]
    fn split_links_leaf_siblings() {
        let tree = tree_of::<3>(&[1, 2, 3, 4]);
        let left = tree.root().child(0).unwrap();
        let right = tree.root().child(1).unwrap();

        assert!(std::ptr::eq(left.next_leaf().unwrap(), right));
        assert!(std::ptr::eq(right.prev_leaf().unwrap(), left));
        assert!(left.prev_leaf().is_none());
        assert!(right.next_leaf().is_none());
    }

    #[test]
    fn inner_split_grows_the_tree() {
        let tree = tree_of::<3>(&[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(tree.height(), 3);

        let root = tree.root();
        assert_eq!(root.keys(), &[0, 4]);
        assert_eq!(root.child(0).unwrap().keys(), &[0, 2]);
        assert_eq!(root.child(1).unwrap().keys(), &[4, 6]);
        assert!(root.child(1).unwrap().next_leaf().is_none());
        assert_eq!(tree.keys_ascending(), vec![&0, &1, &2, &3, &4, &5, &6, &7]);
        assert_eq!(tree.validate(), Ok(()));
    }

    #[test]
    fn new_minimum_refreshes_separators() {
        let tree = tree_of::<3>(&[10, 20, 30, 40, 50, 60, 70, 80, -5]);
        assert_eq!(tree.root().keys()[0], -5);
        assert_eq!(tree.root().child(0).unwrap().keys()[0], -5);
        assert_eq!(tree.validate(), Ok(()));
    }
}
