/// Running counters kept by the tree.
///
/// The counters are updated as nodes are placed into and released from
/// their slots, so they also tell how many slots each allocator holds for
/// the tree: `size` value slots and `nodes()` node slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats<const N: usize> {
    pub size: usize,
    pub leaves: usize,
    pub inner_nodes: usize,
}

impl<const N: usize> TreeStats<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> usize {
        self.inner_nodes + self.leaves
    }

    /// Share of leaf slots in use, between 0 and 1.
    pub fn avgfill_leaves(&self) -> f64 {
        if self.leaves == 0 {
            return 0.0;
        }
        self.size as f64 / (self.leaves * N) as f64
    }

    /// Share of inner node slots in use. Every node but the root occupies
    /// one child slot, so no walk is needed.
    pub fn avgfill_inner(&self) -> f64 {
        if self.inner_nodes == 0 {
            return 0.0;
        }
        (self.nodes() - 1) as f64 / (self.inner_nodes * N) as f64
    }
}
