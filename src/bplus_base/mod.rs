pub mod alloc;
mod deletion;
mod inspect;
pub mod node;
pub mod pool;
pub mod tree;
pub mod tree_stats;

pub use self::{
    alloc::{SlotAllocator, SystemAllocator},
    node::Node,
    pool::PoolAllocator,
    tree::BPlusTree,
    tree_stats::TreeStats,
};

/// Order used by the aliases and the map facade.
pub const DEFAULT_ORDER: usize = 32;

pub type DefaultBPlusTree<K, V> = BPlusTree<K, V, DEFAULT_ORDER>;

/// A tree of order `N` drawing values and nodes from two pools with blocks
/// of `M` slots.
pub type PooledBPlusTree<K, V, const N: usize, const M: usize> =
    BPlusTree<K, V, N, PoolAllocator<V, M>, PoolAllocator<Node<K, V, N>, M>>;
