use std::{
    alloc::{alloc, dealloc, Layout},
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ptr::{self, addr_of, addr_of_mut, NonNull},
};

use super::alloc::SlotAllocator;
use crate::error::AllocError;

const WORD_BITS: usize = u64::BITS as usize;

/// One pooled object. The value sits at offset 0 so a pointer to the value
/// is also a pointer to its slot, and `index` leads back to the block.
#[repr(C)]
struct Slot<T> {
    value: MaybeUninit<T>,
    index: usize,
}

#[repr(C)]
struct Block<T, const M: usize> {
    slots: [Slot<T>; M],
    occupied: Box<[u64]>,
    used: usize,
    next: NonNull<Block<T, M>>,
    prev: NonNull<Block<T, M>>,
}

impl<T, const M: usize> Block<T, M> {
    /// Allocates a block linked to itself with every slot free.
    fn create() -> Result<NonNull<Self>, AllocError> {
        let layout = Layout::new::<Self>();
        let raw = unsafe { alloc(layout) }.cast::<Self>();
        let block = NonNull::new(raw).ok_or(AllocError)?;

        unsafe {
            let slots = addr_of_mut!((*raw).slots).cast::<Slot<T>>();
            for i in 0..M {
                addr_of_mut!((*slots.add(i)).index).write(i);
            }
            addr_of_mut!((*raw).occupied)
                .write(vec![0u64; (M + WORD_BITS - 1) / WORD_BITS].into_boxed_slice());
            addr_of_mut!((*raw).used).write(0);
            addr_of_mut!((*raw).next).write(block);
            addr_of_mut!((*raw).prev).write(block);
        }

        Ok(block)
    }

    /// Frees the block memory. Values still stored in it are not dropped.
    unsafe fn destroy(block: NonNull<Self>) {
        ptr::drop_in_place(addr_of_mut!((*block.as_ptr()).occupied));
        dealloc(block.as_ptr().cast::<u8>(), Layout::new::<Self>());
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.used == M
    }

    /// Lowest free slot index. Bits past `M` in the last word stay clear, but
    /// a free index below `M` is always found first.
    fn first_free(&self) -> Option<usize> {
        for (w, word) in self.occupied.iter().enumerate() {
            let free = !*word;
            if free != 0 {
                let index = w * WORD_BITS + free.trailing_zeros() as usize;
                return (index < M).then_some(index);
            }
        }
        None
    }

    #[inline]
    fn is_set(&self, index: usize) -> bool {
        self.occupied[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    #[inline]
    fn set(&mut self, index: usize) {
        self.occupied[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    #[inline]
    fn clear(&mut self, index: usize) {
        self.occupied[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
    }
}

/// Fixed-capacity pool handing out slots of `T` from blocks of `M` slots.
///
/// Blocks form a circular doubly linked list starting at the head block.
/// The pool grows by one block when every block is full and frees a block
/// as soon as it becomes empty, unless it is the head. An optional block
/// limit caps the total number of slots.
pub struct PoolAllocator<T, const M: usize> {
    head: Option<NonNull<Block<T, M>>>,
    blocks: usize,
    live: usize,
    max_blocks: Option<usize>,
    _marker: PhantomData<T>,
}

// SAFETY: the pool exclusively owns its blocks and hands out slots only to
// the owner of `&mut self`.
unsafe impl<T: Send, const M: usize> Send for PoolAllocator<T, M> {}

impl<T, const M: usize> PoolAllocator<T, M> {
    const BLOCK_CHECK: () = assert!(M > 0, "pool blocks need at least one slot");

    /// An unlimited pool. No memory is taken until the first allocation.
    pub fn new() -> Self {
        Self {
            head: None,
            blocks: 0,
            live: 0,
            max_blocks: None,
            _marker: PhantomData,
        }
    }

    /// A pool that never holds more than `max_blocks` blocks at once.
    pub fn with_max_blocks(max_blocks: usize) -> Self {
        Self {
            max_blocks: Some(max_blocks),
            ..Self::new()
        }
    }

    /// Number of blocks currently held.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Number of slots currently handed out.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Total number of slots in the held blocks.
    pub fn capacity(&self) -> usize {
        self.blocks * M
    }

    pub fn max_blocks(&self) -> Option<usize> {
        self.max_blocks
    }

    fn grow(&mut self) -> Result<NonNull<Block<T, M>>, AllocError> {
        if self.max_blocks.is_some_and(|max| self.blocks >= max) {
            log::debug!(
                "PoolAllocator::grow refused: block limit {:?} reached",
                self.max_blocks
            );
            return Err(AllocError);
        }

        let block = Block::<T, M>::create()?;
        match self.head {
            None => self.head = Some(block),
            Some(head) => unsafe {
                let next = (*head.as_ptr()).next;
                (*block.as_ptr()).next = next;
                (*block.as_ptr()).prev = head;
                (*next.as_ptr()).prev = block;
                (*head.as_ptr()).next = block;
            },
        }
        self.blocks += 1;

        log::debug!(
            "PoolAllocator::grow new block {:p}, {} blocks",
            block,
            self.blocks
        );

        Ok(block)
    }
}

impl<T, const M: usize> Default for PoolAllocator<T, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const M: usize> SlotAllocator<T> for PoolAllocator<T, M> {
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError> {
        let () = Self::BLOCK_CHECK;

        let block = match self.head {
            None => self.grow()?,
            Some(head) => {
                let mut cur = head;
                loop {
                    if !unsafe { cur.as_ref() }.is_full() {
                        break cur;
                    }
                    cur = unsafe { cur.as_ref() }.next;
                    if cur == head {
                        break self.grow()?;
                    }
                }
            }
        };

        let raw = block.as_ptr();
        let b = unsafe { &mut *raw };
        let index = b
            .first_free()
            .expect("a block that is not full has a free slot");
        b.set(index);
        b.used += 1;
        self.live += 1;

        let slot = unsafe { addr_of_mut!((*raw).slots).cast::<Slot<T>>().add(index) };
        Ok(unsafe { NonNull::new_unchecked(slot.cast::<T>()) })
    }

    unsafe fn release(&mut self, slot: NonNull<T>) {
        let slot = slot.as_ptr().cast::<Slot<T>>();
        let index = addr_of!((*slot).index).read();
        let block = slot.sub(index).cast::<Block<T, M>>();
        let b = &mut *block;

        debug_assert!(b.is_set(index), "slot {} released twice", index);
        b.clear(index);
        b.used -= 1;
        self.live -= 1;

        if b.used == 0 && self.head != NonNull::new(block) {
            (*b.prev.as_ptr()).next = b.next;
            (*b.next.as_ptr()).prev = b.prev;
            Block::destroy(NonNull::new_unchecked(block));
            self.blocks -= 1;

            log::debug!(
                "PoolAllocator::release freed empty block {:p}, {} blocks",
                block,
                self.blocks
            );
        }
    }
}

impl<T, const M: usize> Drop for PoolAllocator<T, M> {
    fn drop(&mut self) {
        let Some(head) = self.head.take() else {
            return;
        };
        if self.live != 0 {
            log::debug!("PoolAllocator dropped with {} live slots", self.live);
        }

        unsafe {
            let mut cur = (*head.as_ptr()).next;
            while cur != head {
                let next = (*cur.as_ptr()).next;
                Block::destroy(cur);
                cur = next;
            }
            Block::destroy(head);
        }
        self.blocks = 0;
    }
}

impl<T, const M: usize> fmt::Debug for PoolAllocator<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("block_slots", &M)
            .field("blocks", &self.blocks)
            .field("live", &self.live)
            .field("max_blocks", &self.max_blocks)
            .finish()
    }
}
