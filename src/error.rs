use thiserror::Error;

/// A slot allocator could not hand out another slot.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("slot allocator exhausted")]
pub struct AllocError;

/// Errors reported by tree operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    #[error("no value associated with the key was found")]
    KeyNotFound,

    #[error("the tree is empty")]
    EmptyTree,

    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),
}

impl TreeError {
    /// Both lookup failures (`at` on a missing key, extremes of an empty tree)
    /// are "not found" conditions.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TreeError::KeyNotFound | TreeError::EmptyTree)
    }
}

/// The first structural defect found by `BPlusTree::validate`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("node at depth {depth} holds {count} keys, more than the order {order}")]
    Overfull {
        depth: usize,
        count: usize,
        order: usize,
    },

    #[error("non-root node at depth {depth} holds {count} keys, minimum is {min}")]
    Underfull {
        depth: usize,
        count: usize,
        min: usize,
    },

    #[error("internal root holds {count} children, at least 2 required")]
    DegenerateRoot { count: usize },

    #[error("keys are not strictly increasing at depth {depth}")]
    UnsortedKeys { depth: usize },

    #[error("separator {slot} at depth {depth} differs from its child's minimum key")]
    StaleSeparator { depth: usize, slot: usize },

    #[error("leaves found at depths {first} and {other}")]
    UnevenLeafDepth { first: usize, other: usize },

    #[error("leaf chain broken at leaf {position}")]
    BrokenLeafChain { position: usize },

    #[error("tracked {which} leaf is not the {which} leaf of the tree")]
    ExtremeLeafMismatch { which: &'static str },

    #[error("leaf chain is not sorted at leaf {position}")]
    UnsortedLeafChain { position: usize },

    #[error("tree reports size {reported} but holds {actual} entries")]
    SizeMismatch { reported: usize, actual: usize },

    #[error("tree stats report {reported_leaves} leaves / {reported_inner} inner nodes, found {leaves} / {inner}")]
    NodeCountMismatch {
        reported_leaves: usize,
        reported_inner: usize,
        leaves: usize,
        inner: usize,
    },
}
