use std::{
    alloc::{alloc, dealloc, Layout},
    ptr::NonNull,
};

use crate::error::AllocError;

/// Single-slot allocation capability consumed by the tree, once for values
/// and once for nodes.
pub trait SlotAllocator<T> {
    /// Hands out uninitialized storage for exactly one `T`.
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError>;

    /// Returns a slot to the allocator. Never fails.
    ///
    /// # Safety
    ///
    /// `slot` must come from `allocate` on this allocator and must not have
    /// been released yet. Any value stored in it must already be dropped.
    unsafe fn release(&mut self, slot: NonNull<T>);
}

/// Unpooled allocator forwarding every slot to the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

impl<T> SlotAllocator<T> for SystemAllocator {
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::new::<T>();
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        NonNull::new(unsafe { alloc(layout) }.cast::<T>()).ok_or(AllocError)
    }

    unsafe fn release(&mut self, slot: NonNull<T>) {
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            dealloc(slot.as_ptr().cast::<u8>(), layout);
        }
    }
}
