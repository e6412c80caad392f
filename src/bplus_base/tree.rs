use std::{
    alloc::{handle_alloc_error, Layout},
    fmt,
    marker::PhantomData,
    ptr::{self, NonNull},
};

use super::{
    alloc::{SlotAllocator, SystemAllocator},
    deletion::EraseFlags,
    node::{Node, NodePtr},
    tree_stats::TreeStats,
};
use crate::error::{AllocError, TreeError};

/// Slots reserved before an insertion touches the tree: one value slot and
/// one node slot per split the insertion will perform.
pub(crate) struct Reservation<K, V, const N: usize> {
    value: Option<NonNull<V>>,
    filled: bool,
    nodes: Vec<NodePtr<K, V, N>>,
}

impl<K, V, const N: usize> Reservation<K, V, N> {
    fn fill_value(&mut self, value: V) {
        let slot = self.value.expect("value slot is reserved");
        unsafe { slot.as_ptr().write(value) };
        self.filled = true;
    }

    pub(crate) fn take_value(&mut self) -> NonNull<V> {
        self.value.take().expect("value slot is reserved")
    }

    pub(crate) fn take_node(&mut self) -> NodePtr<K, V, N> {
        self.nodes
            .pop()
            .expect("insert plan reserved a node for every split")
    }

    fn is_spent(&self) -> bool {
        self.value.is_none() && self.nodes.is_empty()
    }
}

/// Everything tree-wide a node operation may need besides the node itself:
/// both allocators, the extreme leaves and the counters.
pub(crate) struct TreeContext<K, V, const N: usize, VA, NA> {
    pub(crate) value_alloc: VA,
    pub(crate) node_alloc: NA,
    pub(crate) min_leaf: NodePtr<K, V, N>,
    pub(crate) max_leaf: NodePtr<K, V, N>,
    pub(crate) stats: TreeStats<N>,
}

impl<K, V, const N: usize, VA, NA> TreeContext<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    /// Places `node` into a freshly allocated slot.
    pub(crate) fn init_node(&mut self, slot: NodePtr<K, V, N>, node: Node<K, V, N>) -> NodePtr<K, V, N> {
        if node.is_leaf() {
            self.stats.leaves += 1;
        } else {
            self.stats.inner_nodes += 1;
        }
        unsafe { slot.as_ptr().write(node) };
        slot
    }

    /// Drops a node and returns its slot. Its children and values must have
    /// been moved out or released already.
    pub(crate) unsafe fn destroy_node(&mut self, node: NodePtr<K, V, N>) {
        if node.as_ref().is_leaf() {
            self.stats.leaves -= 1;
        } else {
            self.stats.inner_nodes -= 1;
        }
        ptr::drop_in_place(node.as_ptr());
        self.node_alloc.release(node);
    }

    pub(crate) unsafe fn destroy_value(&mut self, value: NonNull<V>) {
        ptr::drop_in_place(value.as_ptr());
        self.value_alloc.release(value);
    }

    /// Takes a leaf out of the leaf chain, moving the tracked extremes to its
    /// neighbours first.
    pub(crate) unsafe fn unlink_leaf(&mut self, leaf: NodePtr<K, V, N>) {
        let node = &mut *leaf.as_ptr();

        match node.prev {
            Some(prev) => (*prev.as_ptr()).next = node.next,
            None => {
                if let Some(next) = node.next {
                    self.min_leaf = next;
                }
            }
        }
        match node.next {
            Some(next) => (*next.as_ptr()).prev = node.prev,
            None => {
                if let Some(prev) = node.prev {
                    self.max_leaf = prev;
                }
            }
        }

        node.next = None;
        node.prev = None;
    }

    unsafe fn free_subtree(&mut self, node: NodePtr<K, V, N>) {
        (*node.as_ptr()).erase_all(self);
        self.destroy_node(node);
    }

    /// Reserves a value slot and `nodes` node slots. On failure everything
    /// reserved so far is released in reverse order.
    fn reserve(&mut self, nodes: usize) -> Result<Reservation<K, V, N>, AllocError> {
        let value = self.value_alloc.allocate()?;

        let mut reserved = Vec::with_capacity(nodes);
        for _ in 0..nodes {
            match self.node_alloc.allocate() {
                Ok(slot) => reserved.push(slot),
                Err(err) => {
                    while let Some(slot) = reserved.pop() {
                        unsafe { self.node_alloc.release(slot) };
                    }
                    unsafe { self.value_alloc.release(value) };
                    return Err(err);
                }
            }
        }

        Ok(Reservation {
            value: Some(value),
            filled: false,
            nodes: reserved,
        })
    }

    /// Deep-copies `src` top-down. `prev` threads the last copied leaf
    /// through the recursion so the copied leaves are chained in order; the
    /// first copied leaf becomes the minimum leaf. A failed copy releases
    /// everything it allocated.
    fn copy_subtree(
        &mut self,
        src: &Node<K, V, N>,
        prev: &mut Option<NodePtr<K, V, N>>,
    ) -> Result<NodePtr<K, V, N>, AllocError>
    where
        K: Clone,
        V: Clone,
    {
        let slot = self.node_alloc.allocate()?;
        let copy = if src.is_leaf() {
            self.init_node(slot, Node::new_leaf())
        } else {
            self.init_node(slot, Node::new_internal())
        };
        let node = unsafe { &mut *copy.as_ptr() };

        if src.is_leaf() {
            for (key, value) in src.keys.iter().zip(src.values()) {
                let value_slot = match self.value_alloc.allocate() {
                    Ok(value_slot) => value_slot,
                    Err(err) => {
                        unsafe { self.free_subtree(copy) };
                        return Err(err);
                    }
                };
                unsafe { value_slot.as_ptr().write((*value.as_ptr()).clone()) };
                node.keys.push(key.clone());
                node.values_mut().push(value_slot);
            }

            node.prev = *prev;
            match *prev {
                Some(p) => unsafe { (*p.as_ptr()).next = Some(copy) },
                None => self.min_leaf = copy,
            }
            *prev = Some(copy);
        } else {
            for (key, child) in src.keys.iter().zip(src.children()) {
                match self.copy_subtree(unsafe { child.as_ref() }, prev) {
                    Ok(child_copy) => {
                        node.keys.push(key.clone());
                        node.children_mut().push(child_copy);
                    }
                    Err(err) => {
                        unsafe { self.free_subtree(copy) };
                        return Err(err);
                    }
                }
            }
        }

        Ok(copy)
    }
}

/// A reservation in flight. Whatever the insertion has not taken when this
/// is dropped goes back to the allocators: node slots in reverse order,
/// then the value slot.
struct PendingInsert<'a, K, V, const N: usize, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    ctx: &'a mut TreeContext<K, V, N, VA, NA>,
    reservation: Reservation<K, V, N>,
}

impl<K, V, const N: usize, VA, NA> Drop for PendingInsert<'_, K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    fn drop(&mut self) {
        if self.reservation.is_spent() {
            return;
        }

        let unused = self.reservation.nodes.len();
        while let Some(slot) = self.reservation.nodes.pop() {
            unsafe { self.ctx.node_alloc.release(slot) };
        }
        if let Some(value) = self.reservation.value.take() {
            unsafe {
                if self.reservation.filled {
                    ptr::drop_in_place(value.as_ptr());
                }
                self.ctx.value_alloc.release(value);
            }
        }

        log::debug!(
            "BPlusTree::insert abandoned, returned {} unused node slots",
            unused
        );
    }
}

enum InsertPlan<V> {
    Present(NonNull<V>),
    Absent { nodes: usize },
}

/// An ordered key-value index of order `N` whose nodes and values live in
/// slots obtained from two pluggable allocators.
///
/// The tree starts as one empty leaf. It grows by one level when the root
/// splits and shrinks when an inner root is left with a single child.
pub struct BPlusTree<K, V, const N: usize, VA = SystemAllocator, NA = SystemAllocator>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    pub(crate) root: NodePtr<K, V, N>,
    pub(crate) ctx: TreeContext<K, V, N, VA, NA>,
    _owns: PhantomData<Box<Node<K, V, N>>>,
}

// SAFETY: the tree exclusively owns every node and value reachable from its
// root; nothing is shared with other trees.
unsafe impl<K: Send, V: Send, const N: usize, VA, NA> Send for BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V> + Send,
    NA: SlotAllocator<Node<K, V, N>> + Send,
{
}

impl<K, V, const N: usize> BPlusTree<K, V, N> {
    /// An empty tree using the system allocator for nodes and values.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, const N: usize, VA, NA> Default for BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V> + Default,
    NA: SlotAllocator<Node<K, V, N>> + Default,
{
    fn default() -> Self {
        match Self::new_in(VA::default(), NA::default()) {
            Ok(tree) => tree,
            Err(_) => handle_alloc_error(Layout::new::<Node<K, V, N>>()),
        }
    }
}

/// Construction, counters and teardown
impl<K, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    /// An empty tree drawing values from `value_alloc` and nodes from
    /// `node_alloc`. Fails if the initial leaf cannot be allocated.
    pub fn new_in(value_alloc: VA, mut node_alloc: NA) -> Result<Self, TreeError> {
        #[allow(clippy::let_unit_value)]
        let () = Node::<K, V, N>::ORDER_CHECK;

        let slot = node_alloc.allocate()?;
        let mut ctx = TreeContext {
            value_alloc,
            node_alloc,
            min_leaf: slot,
            max_leaf: slot,
            stats: TreeStats::new(),
        };
        let root = ctx.init_node(slot, Node::new_leaf());

        Ok(Self {
            root,
            ctx,
            _owns: PhantomData,
        })
    }

    pub fn size(&self) -> usize {
        self.ctx.stats.size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stats(&self) -> &TreeStats<N> {
        &self.ctx.stats
    }

    pub fn value_allocator(&self) -> &VA {
        &self.ctx.value_alloc
    }

    pub fn node_allocator(&self) -> &NA {
        &self.ctx.node_alloc
    }

    /// Releases every node and value and returns to a single empty leaf.
    /// The root slot is reused, so this never allocates.
    pub fn erase_all(&mut self) {
        let root = unsafe { &mut *self.root.as_ptr() };
        root.erase_all(&mut self.ctx);

        if !root.is_leaf() {
            unsafe { ptr::drop_in_place(self.root.as_ptr()) };
            self.ctx.stats.inner_nodes -= 1;
            self.ctx.init_node(self.root, Node::new_leaf());
        }

        self.ctx.min_leaf = self.root;
        self.ctx.max_leaf = self.root;
        self.ctx.stats.size = 0;

        log::debug!("BPlusTree::erase_all reset to leaf {:p}", self.root);
    }
}

/// Lookup
impl<K: Ord, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    pub fn contains(&self, key: &K) -> bool {
        self.root().search(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.root()
            .search(key)
            .map(|value| unsafe { &*value.as_ptr() })
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.root()
            .search(key)
            .map(|value| unsafe { &mut *value.as_ptr() })
    }

    /// The value stored under `key`, or `TreeError::KeyNotFound`.
    pub fn at(&self, key: &K) -> Result<&V, TreeError> {
        self.get(key).ok_or(TreeError::KeyNotFound)
    }

    pub fn at_mut(&mut self, key: &K) -> Result<&mut V, TreeError> {
        self.get_mut(key).ok_or(TreeError::KeyNotFound)
    }

    /// Smallest key, read from the tracked minimum leaf.
    pub fn min_key(&self) -> Result<&K, TreeError> {
        unsafe { self.ctx.min_leaf.as_ref() }
            .keys
            .first()
            .ok_or(TreeError::EmptyTree)
    }

    /// Largest key, read from the tracked maximum leaf.
    pub fn max_key(&self) -> Result<&K, TreeError> {
        unsafe { self.ctx.max_leaf.as_ref() }
            .keys
            .last()
            .ok_or(TreeError::EmptyTree)
    }

    #[inline]
    fn self_verify(&self) {
        if cfg!(feature = "self-verify") {
            if let Err(violation) = self.validate() {
                panic!("BPlusTree self-verification failed: {}", violation);
            }
        }
    }
}

/// Insertion and erase
impl<K: Ord + Clone, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    /// Inserts `key` with `value`. An existing key is left untouched and
    /// `Ok(false)` is returned.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, TreeError> {
        self.insert_with(key, move || value, false)
    }

    /// Inserts a value built by `make`. If the key exists nothing happens,
    /// `make` is not called and nothing is allocated.
    pub fn emplace<F>(&mut self, key: K, make: F) -> Result<bool, TreeError>
    where
        F: FnOnce() -> V,
    {
        self.insert_with(key, make, false)
    }

    /// Inserts a value built by `make`, replacing the value of an existing
    /// key in place. Returns `Ok(true)` when a new entry was added.
    pub fn try_emplace<F>(&mut self, key: K, make: F) -> Result<bool, TreeError>
    where
        F: FnOnce() -> V,
    {
        self.insert_with(key, make, true)
    }

    /// Read-only descent locating `key`. For an absent key, counts the node
    /// slots the insertion will consume: every full node in the run ending at
    /// the leaf splits, plus a new root when that run reaches the root.
    fn plan_insert(&self, key: &K) -> InsertPlan<V> {
        let mut node = self.root();
        let mut depth = 1;
        let mut full_run = 0;

        loop {
            full_run = if node.is_full() { full_run + 1 } else { 0 };
            let pos = node.upper_bound(key);

            if node.is_leaf() {
                if pos > 0 && node.keys[pos - 1] == *key {
                    return InsertPlan::Present(node.values()[pos - 1]);
                }
                break;
            }

            node = unsafe { node.children()[pos.saturating_sub(1)].as_ref() };
            depth += 1;
        }

        InsertPlan::Absent {
            nodes: full_run + usize::from(full_run == depth),
        }
    }

    fn insert_with<F>(&mut self, key: K, make: F, overwrite: bool) -> Result<bool, TreeError>
    where
        F: FnOnce() -> V,
    {
        let nodes = match self.plan_insert(&key) {
            InsertPlan::Present(value) => {
                if overwrite {
                    unsafe { *value.as_ptr() = make() };
                    log::trace!("BPlusTree::insert overwrote value at {:p}", value);
                }
                return Ok(false);
            }
            InsertPlan::Absent { nodes } => nodes,
        };

        let reservation = self.ctx.reserve(nodes).map_err(|err| {
            log::debug!(
                "BPlusTree::insert could not reserve a value and {} nodes",
                nodes
            );
            err
        })?;
        let mut pending = PendingInsert {
            ctx: &mut self.ctx,
            reservation,
        };
        pending.reservation.fill_value(make());

        let root = unsafe { &mut *self.root.as_ptr() };
        if let Some(sibling) = root.insert(key, &mut pending.reservation, &mut *pending.ctx) {
            Self::grow_root(&mut self.root, sibling, &mut pending.reservation, &mut *pending.ctx);
        }
        debug_assert!(pending.reservation.is_spent());
        drop(pending);

        // a split of the last leaf moves the maximum one leaf to the right
        if let Some(next) = unsafe { self.ctx.max_leaf.as_ref() }.next {
            self.ctx.max_leaf = next;
        }
        self.ctx.stats.size += 1;

        self.self_verify();
        Ok(true)
    }

    /// Makes the old root and its new sibling the two children of a new root.
    fn grow_root(
        root: &mut NodePtr<K, V, N>,
        sibling: NodePtr<K, V, N>,
        reservation: &mut Reservation<K, V, N>,
        ctx: &mut TreeContext<K, V, N, VA, NA>,
    ) {
        let new_root = ctx.init_node(reservation.take_node(), Node::new_internal());
        let node = unsafe { &mut *new_root.as_ptr() };

        node.keys.push(unsafe { root.as_ref() }.min_key().clone());
        node.keys.push(unsafe { sibling.as_ref() }.min_key().clone());
        node.children_mut().push(*root);
        node.children_mut().push(sibling);

        log::debug!(
            "BPlusTree::grow_root new root {:p} over {:p} and {:p}",
            new_root,
            *root,
            sibling
        );

        *root = new_root;
    }

    /// Removes `key`. Returns `false`, leaving the size untouched, when the
    /// key is absent.
    pub fn erase(&mut self, key: &K) -> bool {
        log::trace!("BPlusTree::erase on tree of size {}", self.size());

        let root = unsafe { &mut *self.root.as_ptr() };
        let flags = root.erase(key, &mut self.ctx);
        if flags.contains(EraseFlags::NotFound) {
            return false;
        }

        self.ctx.stats.size -= 1;
        self.shrink_root();

        self.self_verify();
        true
    }

    /// Promotes the only child of an inner root until the root is a leaf or
    /// has at least two children.
    fn shrink_root(&mut self) {
        loop {
            let root = unsafe { &mut *self.root.as_ptr() };
            if root.is_leaf() || root.key_count() != 1 {
                break;
            }

            let child = root
                .children_mut()
                .pop()
                .expect("inner root holds one child");
            root.keys.clear();
            unsafe { self.ctx.destroy_node(self.root) };

            log::debug!("BPlusTree::shrink_root promoted {:p}", child);
            self.root = child;
        }
    }
}

/// Copy
impl<K: Clone, V: Clone, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    /// Deep-copies the tree into a new one drawing from the given allocators.
    /// On allocation failure everything copied so far is released.
    pub fn try_clone_in<VB, NB>(
        &self,
        value_alloc: VB,
        node_alloc: NB,
    ) -> Result<BPlusTree<K, V, N, VB, NB>, TreeError>
    where
        VB: SlotAllocator<V>,
        NB: SlotAllocator<Node<K, V, N>>,
    {
        let mut copy = BPlusTree::new_in(value_alloc, node_alloc)?;

        let mut last_leaf = None;
        let root = copy.ctx.copy_subtree(self.root(), &mut last_leaf)?;

        unsafe { copy.ctx.destroy_node(copy.root) };
        copy.root = root;
        copy.ctx.max_leaf = last_leaf.expect("a copied tree holds at least one leaf");
        copy.ctx.stats.size = self.ctx.stats.size;

        log::debug!(
            "BPlusTree::try_clone_in copied {} entries in {} nodes",
            copy.size(),
            copy.stats().nodes()
        );

        Ok(copy)
    }
}

impl<K: Clone, V: Clone, const N: usize, VA, NA> Clone for BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V> + Default,
    NA: SlotAllocator<Node<K, V, N>> + Default,
{
    fn clone(&self) -> Self {
        match self.try_clone_in(VA::default(), NA::default()) {
            Ok(tree) => tree,
            Err(_) => handle_alloc_error(Layout::new::<Node<K, V, N>>()),
        }
    }
}

impl<K, V, const N: usize, VA, NA> Drop for BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    fn drop(&mut self) {
        unsafe {
            (*self.root.as_ptr()).erase_all(&mut self.ctx);
            self.ctx.destroy_node(self.root);
        }

        debug_assert!(self.ctx.stats.nodes() == 0);
    }
}

/// Debug
impl<K: fmt::Debug, V, const N: usize, VA, NA> BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    fn print_leaves(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "leaves:")?;
        let mut n = Some(self.ctx.min_leaf);

        while let Some(leaf) = n {
            write!(f, " {:p}", leaf)?;
            n = unsafe { leaf.as_ref() }.next;
        }

        Ok(())
    }

    fn print_node(f: &mut fmt::Formatter<'_>, node: NodePtr<K, V, N>, depth: usize) -> fmt::Result {
        let n = unsafe { node.as_ref() };

        for _ in 0..depth {
            write!(f, "  ")?;
        }
        writeln!(
            f,
            "{} {:p} keys {:?}",
            if n.is_leaf() { "leaf" } else { "node" },
            node,
            n.keys.as_slice()
        )?;

        if n.is_leaf() {
            for _ in 0..depth {
                write!(f, "  ")?;
            }
            writeln!(f, "  prev {:?} next {:?}", n.prev, n.next)?;
        } else {
            for child in n.children() {
                Self::print_node(f, *child, depth + 1)?;
            }
        }

        Ok(())
    }
}

impl<K: fmt::Debug, V, const N: usize, VA, NA> fmt::Debug for BPlusTree<K, V, N, VA, NA>
where
    VA: SlotAllocator<V>,
    NA: SlotAllocator<Node<K, V, N>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Self::print_node(f, self.root, 0)?;
        writeln!(f)?;
        self.print_leaves(f)
    }
}
