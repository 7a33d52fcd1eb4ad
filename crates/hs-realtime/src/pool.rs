//! Fixed-Capacity Object Pool
//!
//! Slot allocator with an index free list:
//! - All storage allocated once at construction
//! - `allocate`/`free` never touch the global allocator
//! - Per-instance ownership (no global pool)

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Pool of `capacity` slots holding values of type `T`.
///
/// Pointers handed out by [`ObjectPool::allocate`] stay valid until passed
/// back to [`ObjectPool::free`] or until the pool is dropped.
pub struct ObjectPool<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    in_use: Box<[bool]>,
    /// Stack of free slot indices
    free_list: Vec<usize>,
}

impl<T> ObjectPool<T> {
    /// Create a pool with room for `capacity` live objects
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        // Reverse so slot 0 is handed out first
        let free_list = (0..capacity).rev().collect();

        Self {
            slots,
            in_use: vec![false; capacity].into_boxed_slice(),
            free_list,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently allocated objects
    #[inline]
    pub fn live(&self) -> usize {
        self.capacity() - self.free_list.len()
    }

    /// Move `value` into a free slot.
    ///
    /// Returns `None` (dropping `value`) if the pool is exhausted.
    pub fn allocate(&mut self, value: T) -> Option<NonNull<T>> {
        let index = self.free_list.pop()?;
        self.in_use[index] = true;

        let slot = self.slots[index].get();
        // SAFETY: the slot was free, so nothing else references it.
        unsafe {
            (*slot).write(value);
        }
        NonNull::new(slot.cast::<T>())
    }

    /// Drop the object at `ptr` and return its slot to the free list.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate` on this pool, must not have
    /// been freed since, and no reference to the object may outlive this call.
    pub unsafe fn free(&mut self, ptr: NonNull<T>) {
        let Some(index) = self.slot_index(ptr) else {
            debug_assert!(false, "pointer does not belong to this pool");
            return;
        };

        self.in_use[index] = false;
        // SAFETY: slot is initialised (in_use) and the caller guarantees
        // exclusive access.
        unsafe {
            std::ptr::drop_in_place(ptr.as_ptr());
        }
        self.free_list.push(index);
    }

    fn slot_index(&self, ptr: NonNull<T>) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .position(|(i, slot)| self.in_use[i] && slot.get().cast::<T>() == ptr.as_ptr())
    }
}

impl<T> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        for (slot, in_use) in self.slots.iter().zip(self.in_use.iter()) {
            if *in_use {
                // SAFETY: we have exclusive access and the slot is initialised.
                unsafe {
                    (*slot.get()).assume_init_drop();
                }
            }
        }
    }
}

// SAFETY: the pool owns its values; moving it moves them.
unsafe impl<T: Send> Send for ObjectPool<T> {}
