//! `UMem`: a typed byte-buffer abstraction over a pluggable allocator
//! backend. A `UMem` owns raw octets and nothing else — metadata always
//! lives one layer up, in a `UDict` or the buffer wrapper that holds it
//! (spec.md §2, "Owns raw octets; never owns metadata").

use crate::error::UError;
use atomic_refcell::AtomicRefCell;
use std::sync::Arc;

/// A pluggable allocation strategy for `UMem`. Mirrors the C library's
/// `umem_mgr` vtable (`alloc`/`realloc`/`free`), grounded on the teacher
/// crate's habit of threading an allocator-agnostic handle
/// (`basedrop::Handle`) through every buffer constructor rather than
/// calling the global allocator directly.
pub trait UMemBackend: Send + Sync {
    /// Allocate at least `size + align_margin` bytes.
    fn alloc(&self, size: usize, align_margin: usize) -> Result<Vec<u8>, UError>;

    /// Attempt to grow/shrink in place. The default implementation always
    /// reports failure, which callers treat as "allocate fresh and copy".
    fn realloc(&self, _buf: &mut Vec<u8>, _new_size: usize) -> Result<(), UError> {
        Err(UError::External)
    }
}

/// The system allocator backend — maps directly to `Vec<u8>`/`malloc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBackend;

impl UMemBackend for HeapBackend {
    fn alloc(&self, size: usize, align_margin: usize) -> Result<Vec<u8>, UError> {
        let total = size.checked_add(align_margin).ok_or(UError::Alloc)?;
        Ok(vec![0u8; total])
    }

    fn realloc(&self, buf: &mut Vec<u8>, new_size: usize) -> Result<(), UError> {
        buf.resize(new_size, 0);
        Ok(())
    }
}

struct ArenaState {
    offset: usize,
}

/// A bump-allocated arena backend: `size`d slabs are carved out of one big
/// preallocated block and never individually freed; the whole arena is
/// dropped at once. Useful when a pipe knows its buffers are all
/// short-lived and of bounded total size (e.g. one demux iteration).
///
/// `alloc` takes `&self` (the trait is shared behind `Arc<dyn
/// UMemBackend>` and called from every `UMem::alloc` site), so the bump
/// cursor needs interior mutability; `AtomicRefCell` gives that with a
/// runtime borrow check rather than a `Mutex`, mirroring the teacher's
/// `Shared<AtomicRefCell<_>>` pattern for cross-thread shared state that
/// is never contended enough to need a true lock.
pub struct ArenaBackend {
    capacity: usize,
    state: AtomicRefCell<ArenaState>,
}

impl ArenaBackend {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: AtomicRefCell::new(ArenaState { offset: 0 }) }
    }
}

impl UMemBackend for ArenaBackend {
    fn alloc(&self, size: usize, align_margin: usize) -> Result<Vec<u8>, UError> {
        let total = size.checked_add(align_margin).ok_or(UError::Alloc)?;
        let mut state = self.state.borrow_mut();
        let new_offset = state.offset.checked_add(total).ok_or(UError::Alloc)?;
        if new_offset > self.capacity {
            return Err(UError::Alloc);
        }
        state.offset = new_offset;
        Ok(vec![0u8; total])
    }
}

/// A typed byte buffer: `{ mgr, size, ptr }` in spec.md's data model. The
/// `mgr` (backend) is shared (`Arc`); the octets (`ptr`) are exclusively
/// owned by this `UMem` until it is dropped.
pub struct UMem {
    backend: Arc<dyn UMemBackend>,
    data: Vec<u8>,
}

impl UMem {
    pub fn alloc(backend: Arc<dyn UMemBackend>, size: usize, align_margin: usize) -> Result<Self, UError> {
        let data = backend.alloc(size, align_margin)?;
        Ok(Self { backend, data })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn resize(&mut self, new_size: usize) -> Result<(), UError> {
        self.backend.realloc(&mut self.data, new_size)
    }

    pub fn backend(&self) -> &Arc<dyn UMemBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_backend_allocates_requested_size_plus_margin() {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mem = UMem::alloc(backend, 16, 4).unwrap();
        assert_eq!(mem.size(), 20);
    }

    #[test]
    fn arena_backend_rejects_over_capacity() {
        let backend: Arc<dyn UMemBackend> = Arc::new(ArenaBackend::new(8));
        assert!(UMem::alloc(Arc::clone(&backend), 16, 0).is_err());
        assert!(UMem::alloc(backend, 8, 0).is_ok());
    }

    #[test]
    fn arena_backend_bumps_offset_across_allocations() {
        let backend = ArenaBackend::new(10);
        let a = backend.alloc(6, 0).unwrap();
        assert_eq!(a.len(), 6);
        // only 4 bytes remain; an 8-byte request must fail rather than
        // silently wrapping back to offset 0.
        assert!(backend.alloc(8, 0).is_err());
        let b = backend.alloc(4, 0).unwrap();
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn resize_grows_heap_buffer() {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mut mem = UMem::alloc(backend, 4, 0).unwrap();
        mem.resize(10).unwrap();
        assert_eq!(mem.size(), 10);
    }
}
