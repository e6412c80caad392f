use pooled_bplus::{
    AllocError, BPlusTree, Node, PoolAllocator, PooledBPlusTree, SlotAllocator, SystemAllocator,
    TreeError,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::panic::{catch_unwind, AssertUnwindSafe};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type CappedValues = BPlusTree<i32, i32, 3, PoolAllocator<i32, 4>, SystemAllocator>;
type CappedNodes = BPlusTree<i32, i32, 3, PoolAllocator<i32, 8>, PoolAllocator<Node<i32, i32, 3>, 1>>;

#[test]
fn value_pool_limit_rejects_fifth_insert() {
    init_logger();
    let mut tree = CappedValues::new_in(PoolAllocator::with_max_blocks(1), SystemAllocator).unwrap();

    for k in 0..4 {
        assert_eq!(tree.insert(k, k * 10), Ok(true));
    }
    assert_eq!(tree.value_allocator().live(), 4);

    assert_eq!(tree.insert(4, 40), Err(TreeError::Alloc(AllocError)));
    for k in 0..4 {
        assert!(tree.contains(&k));
    }
    assert!(!tree.contains(&4));
    assert_eq!(tree.size(), 4);
    assert_eq!(tree.value_allocator().live(), 4);
    assert_eq!(tree.validate(), Ok(()));

    for k in 0..4 {
        assert!(tree.erase(&k));
        assert_eq!(tree.validate(), Ok(()));
    }
    assert!(tree.is_empty());
    assert_eq!(tree.value_allocator().live(), 0);

    assert_eq!(tree.insert(4, 40), Ok(true));
}

#[test]
fn failed_emplace_does_not_build_value() {
    let mut tree = CappedValues::new_in(PoolAllocator::with_max_blocks(1), SystemAllocator).unwrap();
    for k in 0..4 {
        tree.insert(k, k).unwrap();
    }

    let mut built = false;
    let result = tree.emplace(9, || {
        built = true;
        9
    });
    assert!(result.is_err());
    assert!(!built);
}

#[test]
fn overwrite_needs_no_new_slot() {
    let mut tree = CappedValues::new_in(PoolAllocator::with_max_blocks(1), SystemAllocator).unwrap();
    for k in 0..4 {
        tree.insert(k, k).unwrap();
    }
    assert_eq!(tree.try_emplace(2, || 200), Ok(false));
    assert_eq!(tree.at(&2), Ok(&200));
    assert_eq!(tree.value_allocator().live(), 4);
}

#[test]
fn panicking_constructor_returns_reserved_slots() {
    init_logger();
    let mut tree: PooledBPlusTree<i32, i32, 3, 4> =
        PooledBPlusTree::new_in(PoolAllocator::with_max_blocks(1), PoolAllocator::new()).unwrap();
    for k in 0..3 {
        tree.insert(k, k).unwrap();
    }
    assert_eq!(tree.value_allocator().live(), 3);
    assert_eq!(tree.node_allocator().live(), 1);

    // the full root leaf needs a sibling and a new root
    let unwound = catch_unwind(AssertUnwindSafe(|| tree.emplace(3, || panic!("no value"))));
    assert!(unwound.is_err());

    assert_eq!(tree.value_allocator().live(), 3);
    assert_eq!(tree.node_allocator().live(), 1);
    assert_eq!(tree.size(), 3);
    assert!(!tree.contains(&3));
    assert_eq!(tree.validate(), Ok(()));

    assert_eq!(tree.insert(3, 30), Ok(true));
    assert_eq!(tree.value_allocator().live(), 4);
    assert_eq!(tree.node_allocator().live(), 3);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn node_pool_limit_rolls_back_value_slot() {
    init_logger();
    let mut tree = CappedNodes::new_in(PoolAllocator::new(), PoolAllocator::with_max_blocks(3)).unwrap();

    // one leaf, then a split leaf under a new root
    for k in 0..5 {
        assert_eq!(tree.insert(k, k), Ok(true));
    }
    assert_eq!(tree.node_allocator().live(), 3);
    assert_eq!(tree.value_allocator().live(), 5);

    // the right leaf is full and needs a fourth node
    assert_eq!(tree.insert(5, 5), Err(TreeError::Alloc(AllocError)));
    assert_eq!(tree.value_allocator().live(), 5);
    assert_eq!(tree.node_allocator().live(), 3);
    assert_eq!(tree.size(), 5);
    assert!(!tree.contains(&5));
    assert_eq!(tree.validate(), Ok(()));

    // a key landing in the left leaf needs no split
    assert_eq!(tree.insert(-1, -1), Ok(true));
    assert_eq!(tree.min_key(), Ok(&-1));
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn partial_node_reservation_is_released() {
    init_logger();
    let mut probe = BPlusTree::<i32, i32, 3>::new();
    for k in 0..11 {
        probe.insert(k, k).unwrap();
    }
    let nodes = probe.stats().nodes();

    // the next insert splits the last leaf and its parent, one spare slot is not enough
    let mut tree =
        CappedNodes::new_in(PoolAllocator::new(), PoolAllocator::with_max_blocks(nodes + 1)).unwrap();
    for k in 0..11 {
        tree.insert(k, k).unwrap();
    }
    assert_eq!(tree.node_allocator().live(), nodes);

    let height = tree.height();
    let before: Vec<i32> = tree.keys_ascending().into_iter().copied().collect();
    assert_eq!(tree.insert(11, 11), Err(TreeError::Alloc(AllocError)));

    let after: Vec<i32> = tree.keys_ascending().into_iter().copied().collect();
    assert_eq!(after, before);
    assert_eq!(tree.height(), height);
    assert_eq!(tree.node_allocator().live(), nodes);
    assert_eq!(tree.node_allocator().blocks(), nodes);
    assert_eq!(tree.value_allocator().live(), 11);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn pooled_tree_returns_every_slot() {
    init_logger();
    let mut tree: PooledBPlusTree<i32, String, 4, 16> =
        PooledBPlusTree::new_in(PoolAllocator::new(), PoolAllocator::new()).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i32> = (0..1000).collect();
    keys.shuffle(&mut rng);

    for &k in &keys {
        tree.insert(k, k.to_string()).unwrap();
    }
    assert_eq!(tree.value_allocator().live(), 1000);
    assert_eq!(tree.node_allocator().live(), tree.stats().nodes());
    assert_eq!(tree.validate(), Ok(()));

    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.erase(&k));
    }
    assert_eq!(tree.value_allocator().live(), 0);
    assert_eq!(tree.value_allocator().blocks(), 1);
    assert_eq!(tree.node_allocator().live(), 1);
    // the surviving leaf may sit outside the head block
    assert!(tree.node_allocator().blocks() <= 2);
}

#[test]
fn erase_all_releases_pool_slots() {
    let mut tree: PooledBPlusTree<i32, i32, 3, 8> =
        PooledBPlusTree::new_in(PoolAllocator::new(), PoolAllocator::new()).unwrap();
    for k in 0..100 {
        tree.insert(k, k).unwrap();
    }

    tree.erase_all();
    assert_eq!(tree.value_allocator().live(), 0);
    assert_eq!(tree.node_allocator().live(), 1);
    assert_eq!(tree.validate(), Ok(()));
}

#[test]
fn copy_into_pools() {
    init_logger();
    let mut source = BPlusTree::<i32, i32, 3>::new();
    for k in 0..40 {
        source.insert(k, k * k).unwrap();
    }

    let copy = source
        .try_clone_in(PoolAllocator::<i32, 8>::new(), PoolAllocator::<Node<i32, i32, 3>, 8>::new())
        .unwrap();
    assert_eq!(copy.validate(), Ok(()));
    assert_eq!(copy.value_allocator().live(), 40);
    assert_eq!(copy.node_allocator().live(), source.stats().nodes());
    assert_eq!(copy.at(&7), Ok(&49));
    assert_eq!(copy.max_key(), Ok(&39));

    source.erase_all();
    assert_eq!(copy.size(), 40);
    assert_eq!(copy.at(&39), Ok(&(39 * 39)));
}

#[test]
fn copy_into_small_pool_fails() {
    let mut source = BPlusTree::<i32, i32, 3>::new();
    for k in 0..40 {
        source.insert(k, k).unwrap();
    }

    let result = source.try_clone_in(PoolAllocator::<i32, 8>::with_max_blocks(2), SystemAllocator);
    assert_eq!(result.err(), Some(TreeError::Alloc(AllocError)));
    assert_eq!(source.size(), 40);
    assert_eq!(source.validate(), Ok(()));
}

#[test]
fn copy_into_small_node_pool_fails() {
    init_logger();
    let mut source = BPlusTree::<i32, String, 3>::new();
    for k in 0..40 {
        source.insert(k, k.to_string()).unwrap();
    }
    assert!(source.stats().nodes() > 3);

    let result = source.try_clone_in(
        PoolAllocator::<String, 8>::new(),
        PoolAllocator::<Node<i32, String, 3>, 1>::with_max_blocks(3),
    );
    assert_eq!(result.err(), Some(TreeError::Alloc(AllocError)));
    assert_eq!(source.size(), 40);
    assert_eq!(source.at(&17).map(String::as_str), Ok("17"));
    assert_eq!(source.validate(), Ok(()));
}

#[test]
fn new_in_fails_without_node_slots() {
    let result = CappedNodes::new_in(PoolAllocator::new(), PoolAllocator::with_max_blocks(0));
    assert!(matches!(result, Err(TreeError::Alloc(_))));
}

#[test]
fn allocators_are_usable_directly() {
    let mut pool = PoolAllocator::<String, 2>::with_max_blocks(1);
    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    assert!(pool.allocate().is_err());

    unsafe {
        a.as_ptr().write("a".to_string());
        std::ptr::drop_in_place(a.as_ptr());
        pool.release(a);
        pool.release(b);
    }
    assert_eq!(pool.live(), 0);
}
