//! An in-memory B+ tree index.
//!
//! Leaves are linked in ascending key order and the tree tracks its minimum
//! and maximum leaf. Nodes and values are placed in slots handed out by a
//! [`SlotAllocator`]; [`PoolAllocator`] is a bitmap pool with an optional
//! capacity limit, under which an insertion either fully succeeds or leaves
//! the tree untouched.
//!
//! ```
//! use pooled_bplus::{PooledBPlusTree, PoolAllocator};
//!
//! let mut tree: PooledBPlusTree<u32, &str, 4, 16> =
//!     PooledBPlusTree::new_in(PoolAllocator::new(), PoolAllocator::new()).unwrap();
//! tree.insert(7, "seven").unwrap();
//! tree.insert(3, "three").unwrap();
//!
//! assert_eq!(tree.at(&3), Ok(&"three"));
//! assert_eq!(tree.min_key(), Ok(&3));
//! assert!(tree.erase(&7));
//! ```

pub mod bplus_base;
pub mod bplus_map;
pub mod error;

pub use crate::{
    bplus_base::{
        BPlusTree, DefaultBPlusTree, Node, PoolAllocator, PooledBPlusTree, SlotAllocator,
        SystemAllocator, TreeStats, DEFAULT_ORDER,
    },
    bplus_map::BPlusMap,
    error::{AllocError, InvariantViolation, TreeError},
};
