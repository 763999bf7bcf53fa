//! `UPool`/`ULifo`: pooled-allocation primitives for recycling fixed kinds
//! of objects (spec.md §4.2).
//!
//! Grounded on the teacher crate's `AudioBufferPool`: a depth-bounded
//! `Vec` of recyclable entries, grown lazily on miss and drained on
//! shrink. The teacher's pools are single-thread-owned (the graph
//! compiler thread); `UPool` generalizes that to the multi-thread case
//! spec.md describes ("a ubuf allocated on thread A and freed on thread B
//! safely returns to the pool") by guarding the free list with a
//! `std::sync::Mutex` rather than hand-rolling a lock-free CAS stack —
//! the same choice the teacher makes elsewhere (it reaches for
//! `crossbeam-channel`, not a bespoke atomics structure, whenever it needs
//! a cross-thread handoff outside the single hottest audio path).

use crate::error::UError;
use std::sync::Mutex;

/// A bounded free-list recycler for one logical kind of object.
///
/// `depth == 0` is legal and degrades to pass-through: every `alloc` call
/// misses, and every `release` immediately returns the entry to the
/// backend's `free_inner` callback instead of holding it.
pub struct UPool<T> {
    free_list: Mutex<Vec<T>>,
    depth: usize,
    alloc_inner: Box<dyn Fn() -> Result<T, UError> + Send + Sync>,
    free_inner: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> UPool<T> {
    pub fn new<A, F>(depth: usize, alloc_inner: A, free_inner: F) -> Self
    where
        A: Fn() -> Result<T, UError> + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            free_list: Mutex::new(Vec::with_capacity(depth)),
            depth,
            alloc_inner: Box::new(alloc_inner),
            free_inner: Box::new(free_inner),
        }
    }

    /// Pop a recycled entry, or fall through to `alloc_inner` on a miss.
    pub fn alloc(&self) -> Result<T, UError> {
        if let Some(entry) = self.free_list.lock().expect("pool mutex poisoned").pop() {
            return Ok(entry);
        }
        (self.alloc_inner)()
    }

    /// Return an entry to the pool. If the pool is already at `depth`
    /// (or `depth == 0`), the entry overflows straight to `free_inner`
    /// instead of being retained.
    pub fn release(&self, entry: T) {
        let mut list = self.free_list.lock().expect("pool mutex poisoned");
        if list.len() < self.depth {
            list.push(entry);
        } else {
            drop(list);
            (self.free_inner)(entry);
        }
    }

    /// Number of entries currently held in reserve.
    pub fn len(&self) -> usize {
        self.free_list.lock().expect("pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// A LIFO stack with the same bounded-recycling contract as `UPool`, but
/// without an `alloc_inner` fallback: `pop` simply returns `None` when
/// empty. Used where the caller wants to manage the miss path itself
/// (e.g. a pump manager's free blocker-token stack).
pub struct ULifo<T> {
    stack: Mutex<Vec<T>>,
    depth: usize,
}

impl<T> ULifo<T> {
    pub fn new(depth: usize) -> Self {
        Self { stack: Mutex::new(Vec::with_capacity(depth)), depth }
    }

    pub fn push(&self, value: T) -> Result<(), T> {
        let mut stack = self.stack.lock().expect("lifo mutex poisoned");
        if self.depth != 0 && stack.len() >= self.depth {
            return Err(value);
        }
        stack.push(value);
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        self.stack.lock().expect("lifo mutex poisoned").pop()
    }

    pub fn len(&self) -> usize {
        self.stack.lock().expect("lifo mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn depth_zero_is_pass_through() {
        let misses = Arc::new(AtomicUsize::new(0));
        let frees = Arc::new(AtomicUsize::new(0));
        let m = Arc::clone(&misses);
        let f = Arc::clone(&frees);
        let pool: UPool<u32> = UPool::new(
            0,
            move || {
                m.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );

        let a = pool.alloc().unwrap();
        pool.release(a);
        let _b = pool.alloc().unwrap();

        assert_eq!(misses.load(Ordering::SeqCst), 2);
        assert_eq!(frees.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn recycles_up_to_depth_then_overflows() {
        let frees = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&frees);
        let pool: UPool<u32> = UPool::new(1, || Ok(0), move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        pool.release(1);
        pool.release(2); // overflow: depth is 1
        assert_eq!(pool.len(), 1);
        assert_eq!(frees.load(Ordering::SeqCst), 1);

        let recycled = pool.alloc().unwrap();
        assert_eq!(recycled, 1);
    }

    #[test]
    fn lifo_respects_bound() {
        let lifo = ULifo::new(2);
        assert!(lifo.push(1).is_ok());
        assert!(lifo.push(2).is_ok());
        assert_eq!(lifo.push(3), Err(3));
        assert_eq!(lifo.pop(), Some(2));
    }
}
