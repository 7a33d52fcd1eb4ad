//! Realtime Latest Object
//!
//! Wait-free "latest value" exchange between one writer (UI / timer thread)
//! and one reader (audio thread):
//! - The writer swaps freshly built nodes into an atomic slot
//! - The reader claims the slot and keeps the node it last claimed
//! - Nodes retired by the reader go onto a "zombie" list that only the
//!   writer frees, so nothing is ever freed while the reader can touch it
//! - The writer always leaves the last zombie alive as a stub, so the reader
//!   can append without checking for an empty list
//!
//! All nodes live in a 4-slot [`ObjectPool`]; steady-state operation never
//! touches the global allocator.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use portable_atomic::{AtomicPtr, Ordering};

use crate::pool::ObjectPool;

/// Node slots per object. One for the reader's current node, one zombie stub,
/// one published node, one under construction.
const POOL_CAPACITY: usize = 4;

struct Node<T> {
    value: T,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Shared state behind a [`LatestWriter`] / [`LatestReader`] pair.
pub struct RealtimeLatestObject<T> {
    /// Written by the writer, claimed by the reader
    main_thread_object: AtomicPtr<Node<T>>,
    /// Reader-owned
    audio_thread_object: AtomicPtr<Node<T>>,
    /// Writer-owned
    zombie_list_head: AtomicPtr<Node<T>>,
    /// Advanced by the reader, observed by the writer
    zombie_list_tail: AtomicPtr<Node<T>>,
    /// Only touched by the writer (and on drop)
    pool: UnsafeCell<ObjectPool<Node<T>>>,
}

// SAFETY: the pool is only accessed from the writer half (or on drop, when
// both halves are gone); node values are only read by the reader after an
// acquire exchange that pairs with the writer's release.
unsafe impl<T: Send> Send for RealtimeLatestObject<T> {}
unsafe impl<T: Send> Sync for RealtimeLatestObject<T> {}

impl<T: Default + Send> RealtimeLatestObject<T> {
    /// Create the object with a starting value and split it into its
    /// writer and reader halves.
    ///
    /// Dropping both halves releases every node.
    pub fn new(initial: T) -> (LatestWriter<T>, LatestReader<T>) {
        let mut pool = ObjectPool::new(POOL_CAPACITY);

        let audio_object = pool.allocate(Node::new(initial));
        let stub = pool.allocate(Node::new(T::default()));
        debug_assert!(audio_object.is_some() && stub.is_some());

        let audio_object = audio_object.map_or(ptr::null_mut(), NonNull::as_ptr);
        let stub = stub.map_or(ptr::null_mut(), NonNull::as_ptr);

        let shared = Arc::new(Self {
            main_thread_object: AtomicPtr::new(ptr::null_mut()),
            audio_thread_object: AtomicPtr::new(audio_object),
            zombie_list_head: AtomicPtr::new(stub),
            zombie_list_tail: AtomicPtr::new(stub),
            pool: UnsafeCell::new(pool),
        });

        (
            LatestWriter {
                shared: shared.clone(),
            },
            LatestReader { shared },
        )
    }
}

impl<T> RealtimeLatestObject<T> {
    /// # Safety
    /// Caller must be the writer half (or have exclusive access).
    #[allow(clippy::mut_from_ref)]
    unsafe fn pool_mut(&self) -> &mut ObjectPool<Node<T>> {
        unsafe { &mut *self.pool.get() }
    }

    /// # Safety
    /// Caller must be the writer half, `node` must come from this pool and
    /// be unreachable from the reader.
    unsafe fn deallocate(&self, node: *mut Node<T>) {
        if let Some(node) = NonNull::new(node) {
            unsafe { self.pool_mut().free(node) };
        }
    }

    /// # Safety
    /// Caller must be the writer half.
    unsafe fn clear_zombie_list(&self) {
        let mut head = self.zombie_list_head.load(Ordering::Relaxed);

        while head != self.zombie_list_tail.load(Ordering::Acquire) {
            // SAFETY: every node before the tail is linked and retired
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            debug_assert!(!next.is_null(), "zombie list broken before tail");
            if next.is_null() {
                break;
            }

            unsafe { self.deallocate(head) };
            head = next;
        }

        self.zombie_list_head.store(head, Ordering::Relaxed);
    }
}

impl<T> Drop for RealtimeLatestObject<T> {
    fn drop(&mut self) {
        // Both halves are gone, so no other thread can observe any node.
        unsafe {
            self.deallocate(self.main_thread_object.swap(ptr::null_mut(), Ordering::Relaxed));
            self.deallocate(self.audio_thread_object.swap(ptr::null_mut(), Ordering::Relaxed));

            self.clear_zombie_list();
            self.deallocate(self.zombie_list_tail.swap(ptr::null_mut(), Ordering::Relaxed));
        }
        self.zombie_list_head.store(ptr::null_mut(), Ordering::Relaxed);

        debug_assert_eq!(self.pool.get_mut().live(), 0, "leaked latest-object nodes");
    }
}

/// Writer half: publishes new values. Wait-free, never blocks the reader.
pub struct LatestWriter<T> {
    shared: Arc<RealtimeLatestObject<T>>,
}

impl<T: Send> LatestWriter<T> {
    /// Publish a new value.
    ///
    /// Reclaims nodes the reader has retired, then swaps the new node into the
    /// shared slot. A previously published value the reader never claimed is
    /// freed immediately.
    pub fn write(&mut self, value: T) {
        let shared = &*self.shared;

        // SAFETY: `&mut self` makes this the only writer.
        unsafe { shared.clear_zombie_list() };

        let Some(new_node) = (unsafe { shared.pool_mut() }).allocate(Node::new(value)) else {
            log::error!("RealtimeLatestObject: node pool exhausted, dropping write");
            debug_assert!(false, "latest-object pool exhausted");
            return;
        };

        let old = shared
            .main_thread_object
            .swap(new_node.as_ptr(), Ordering::AcqRel);

        // The reader never claimed `old`, so it is ours to free.
        unsafe { shared.deallocate(old) };
    }

    /// Free outstanding retired nodes without publishing anything.
    pub fn clear_zombie_list(&mut self) {
        unsafe { self.shared.clear_zombie_list() };
    }

    /// Nodes currently allocated from the pool (reader's node and zombie stub
    /// included)
    pub fn live_nodes(&self) -> usize {
        unsafe { self.shared.pool_mut().live() }
    }
}

/// Reader half: always sees the most recently published value. Wait-free and
/// allocation-free; meant for the audio thread.
pub struct LatestReader<T> {
    shared: Arc<RealtimeLatestObject<T>>,
}

impl<T: Send> LatestReader<T> {
    /// Get the latest value.
    ///
    /// The reference stays valid until the next call to `read`.
    pub fn read(&mut self) -> &T {
        let shared = &*self.shared;

        if !shared.main_thread_object.load(Ordering::Acquire).is_null() {
            let claimed = shared
                .main_thread_object
                .swap(ptr::null_mut(), Ordering::AcqRel);

            // Only the reader nulls the slot, so the claim cannot come back empty.
            if !claimed.is_null() {
                let retired = shared.audio_thread_object.swap(claimed, Ordering::Relaxed);

                // Append the retired node behind the tail stub.
                let tail = shared.zombie_list_tail.load(Ordering::Relaxed);
                // SAFETY: the tail is never freed by the writer.
                unsafe { (*tail).next.store(retired, Ordering::Release) };
                shared.zombie_list_tail.store(retired, Ordering::Release);
            }
        }

        // SAFETY: the reader's node is never freed while the reader exists.
        unsafe { &(*shared.audio_thread_object.load(Ordering::Relaxed)).value }
    }
}
