use bitmask_enum::bitmask;

use super::{
    alloc::SlotAllocator,
    node::{Node, Slots},
    tree::TreeContext,
};

/// Outcome of erasing a key from a subtree, reported to the level above.
///
/// `MinKeyChanged` means the parent's separator for the subtree is stale,
/// `Underflow` that the node dropped below the minimum fill.
#[bitmask(u8)]
pub enum EraseFlags {
    Ok = 0,
    NotFound = 1,
    MinKeyChanged = 2,
    Underflow = 4,
}

/// Erase
impl<K: Ord + Clone, V, const N: usize> Node<K, V, N> {
    /// Removes `key` and releases its value. Underflowing children are fixed
    /// here; an underflow of this node is only reported.
    pub(crate) fn erase<VA, NA>(
        &mut self,
        key: &K,
        ctx: &mut TreeContext<K, V, N, VA, NA>,
    ) -> EraseFlags
    where
        VA: SlotAllocator<V>,
        NA: SlotAllocator<Node<K, V, N>>,
    {
        let pos = self.upper_bound(key);
        if pos == 0 {
            log::trace!("Node::erase key below subtree minimum");
            return EraseFlags::NotFound;
        }
        let slot = pos - 1;

        let mut flags = if self.is_leaf() {
            if self.keys[slot] != *key {
                log::trace!("Node::erase key not in leaf {:p}", self);
                return EraseFlags::NotFound;
            }

            self.keys.remove(slot);
            let value = self.values_mut().remove(slot);
            unsafe { ctx.destroy_value(value) };

            if slot == 0 && !self.keys.is_empty() {
                EraseFlags::MinKeyChanged
            } else {
                EraseFlags::Ok
            }
        } else {
            let child = self.children()[slot];
            let result = unsafe { (*child.as_ptr()).erase(key, ctx) };
            if result.contains(EraseFlags::NotFound) {
                return result;
            }

            let mut flags = EraseFlags::Ok;
            if result.contains(EraseFlags::MinKeyChanged) {
                self.keys[slot] = unsafe { child.as_ref() }.min_key().clone();
                if slot == 0 {
                    flags = flags | EraseFlags::MinKeyChanged;
                }
            }
            if result.contains(EraseFlags::Underflow) {
                flags = flags | self.handle_underflow(slot, ctx);
            }
            flags
        };

        if self.is_underflow() {
            flags = flags | EraseFlags::Underflow;
        }
        flags
    }

    /// Restores the fill of the child at `index`.
    ///
    /// The child is paired with its left neighbour, or its right one when it
    /// is the first child. If the pair holds more than `N` entries one entry
    /// moves across the boundary, otherwise the higher node is folded into
    /// the lower one and released.
    pub(crate) fn handle_underflow<VA, NA>(
        &mut self,
        index: usize,
        ctx: &mut TreeContext<K, V, N, VA, NA>,
    ) -> EraseFlags
    where
        VA: SlotAllocator<V>,
        NA: SlotAllocator<Node<K, V, N>>,
    {
        if self.keys.len() == 1 {
            // only order 2 lets a non-root inner node keep a single child
            let child = self.children_mut().remove(0);
            self.keys.remove(0);
            debug_assert!(unsafe { child.as_ref() }.keys.is_empty());

            unsafe {
                if child.as_ref().is_leaf() {
                    ctx.unlink_leaf(child);
                }
                ctx.destroy_node(child);
            }

            log::debug!(
                "Node::handle_underflow removed empty only child {:p} of {:p}",
                child,
                self
            );
            return EraseFlags::Ok;
        }

        let (lo, hi) = if index > 0 {
            (index - 1, index)
        } else {
            (0, 1)
        };
        let lo_node = self.children()[lo];
        let hi_node = self.children()[hi];
        let left = unsafe { &mut *lo_node.as_ptr() };
        let right = unsafe { &mut *hi_node.as_ptr() };

        if left.keys.len() + right.keys.len() > N {
            if index == hi {
                left.lend_last(right);
            } else {
                right.lend_first(left);
            }
            self.keys[hi] = right.min_key().clone();

            log::debug!(
                "Node::handle_underflow borrowed into {:p}, sizes {} + {}",
                if index == hi { hi_node } else { lo_node },
                left.keys.len(),
                right.keys.len()
            );
        } else {
            left.absorb(right);
            if right.is_leaf() {
                unsafe { ctx.unlink_leaf(hi_node) };
            }
            self.keys.remove(hi);
            self.children_mut().remove(hi);
            unsafe { ctx.destroy_node(hi_node) };

            log::debug!(
                "Node::handle_underflow merged {:p} into {:p}, {} keys",
                hi_node,
                lo_node,
                left.keys.len()
            );
        }

        self.keys[lo] = left.min_key().clone();
        if lo == 0 {
            EraseFlags::MinKeyChanged
        } else {
            EraseFlags::Ok
        }
    }

    /// Moves this node's last entry to the front of `right`.
    fn lend_last(&mut self, right: &mut Self) {
        let key = self.keys.pop().expect("lending node holds entries");
        right.keys.insert(0, key);
        match (&mut self.slots, &mut right.slots) {
            (Slots::Leaf(from), Slots::Leaf(to)) => {
                to.insert(0, from.pop().expect("lending leaf holds values"))
            }
            (Slots::Internal(from), Slots::Internal(to)) => {
                to.insert(0, from.pop().expect("lending node holds children"))
            }
            _ => unreachable!("siblings of different kinds"),
        }
    }

    /// Moves this node's first entry to the back of `left`.
    fn lend_first(&mut self, left: &mut Self) {
        left.keys.push(self.keys.remove(0));
        match (&mut self.slots, &mut left.slots) {
            (Slots::Leaf(from), Slots::Leaf(to)) => to.push(from.remove(0)),
            (Slots::Internal(from), Slots::Internal(to)) => to.push(from.remove(0)),
            _ => unreachable!("siblings of different kinds"),
        }
    }

    /// Appends every entry of the higher sibling `right` to this node.
    fn absorb(&mut self, right: &mut Self) {
        debug_assert!(self.keys.len() + right.keys.len() <= N);

        self.keys.extend(right.keys.drain(..));
        match (&mut self.slots, &mut right.slots) {
            (Slots::Leaf(to), Slots::Leaf(from)) => to.extend(from.drain(..)),
            (Slots::Internal(to), Slots::Internal(from)) => to.extend(from.drain(..)),
            _ => unreachable!("siblings of different kinds"),
        }
    }
}

/// Teardown
impl<K, V, const N: usize> Node<K, V, N> {
    /// Releases every value (leaf) or child subtree (inner) and leaves the
    /// node empty. The node itself stays allocated.
    pub(crate) fn erase_all<VA, NA>(&mut self, ctx: &mut TreeContext<K, V, N, VA, NA>)
    where
        VA: SlotAllocator<V>,
        NA: SlotAllocator<Node<K, V, N>>,
    {
        match &mut self.slots {
            Slots::Leaf(values) => {
                for value in values.drain(..) {
                    unsafe { ctx.destroy_value(value) };
                }
            }
            Slots::Internal(children) => {
                for child in children.drain(..) {
                    unsafe {
                        (*child.as_ptr()).erase_all(ctx);
                        ctx.destroy_node(child);
                    }
                }
            }
        }
        self.keys.clear();
    }
}
