//! `URefcount`: the uniform destruction hook for every heap entity that
//! isn't already riding on `basedrop`'s deferred collector (see
//! `gc` and `buffer` for the entities that are).
//!
//! Pipes, probes and requests need *immediate*, same-thread release
//! semantics (spec.md invariant 2: "a urefcount destructor runs on the
//! thread performing the final release"), unlike media buffers, which are
//! reclaimed later on a garbage-collector thread via `basedrop::Collector`.
//! `URefCount<T>` provides that immediate flavor: an atomic counter plus a
//! release callback that fires exactly once, the moment the count reaches
//! zero, on whichever thread called `release()` last.

use std::sync::atomic::{AtomicUsize, Ordering};

/// An atomically reference-counted handle to a `T`, with a release
/// callback invoked exactly once when the last handle is dropped.
///
/// Unlike `Arc`, the release callback is explicit and user-supplied,
/// matching the C API's `urefcount_init(count, release_cb)` rather than
/// relying on `T: Drop`. This lets a single release callback tear down
/// state that lives alongside, but outside, the refcounted struct itself
/// (e.g. releasing a probe chain only when a pipe's refcount hits zero).
pub struct URefCount<T> {
    inner: std::sync::Arc<Inner<T>>,
}

struct Inner<T> {
    count: AtomicUsize,
    value: T,
    release: Box<dyn Fn(&T) + Send + Sync>,
}

impl<T> URefCount<T> {
    /// Initialize with `count = 1` and the given release callback.
    pub fn new<F>(value: T, release: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self { inner: std::sync::Arc::new(Inner { count: AtomicUsize::new(1), value, release: Box::new(release) }) }
    }

    /// `use`: increment the count and return a new handle aliasing the
    /// same object. Named `use_` because `use` is a Rust keyword.
    pub fn use_(&self) -> Self {
        // Acquire-release matches spec.md §4.1: all counter mutations are
        // atomic acquire-release so the eventual release callback observes
        // a happens-before relationship with every prior `use_`.
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        Self { inner: std::sync::Arc::clone(&self.inner) }
    }

    /// `single`: true when this is the only live handle.
    pub fn single(&self) -> bool {
        self.inner.count.load(Ordering::Acquire) == 1
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn get(&self) -> &T {
        &self.inner.value
    }
}

impl<T> Clone for URefCount<T> {
    fn clone(&self) -> Self {
        self.use_()
    }
}

impl<T> Drop for URefCount<T> {
    fn drop(&mut self) {
        // `fetch_sub` returns the previous value; we just released one
        // reference, so "is this now zero" means the previous value was 1.
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Debug-build double-release detection: a double free would
            // manifest as the count going negative, which `fetch_sub` on an
            // `AtomicUsize` instead wraps to `usize::MAX`. We can't recover
            // from that, but we can make it loud.
            debug_assert_ne!(
                self.inner.count.load(Ordering::Acquire),
                usize::MAX,
                "URefCount double-released"
            );
            (self.inner.release)(&self.inner.value);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for URefCount<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("URefCount")
            .field("count", &self.count())
            .field("value", self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as AU, Ordering as O};
    use std::sync::Arc;

    #[test]
    fn release_runs_exactly_once_at_zero() {
        let released = Arc::new(AU::new(0));
        let released_cb = Arc::clone(&released);
        let rc = URefCount::new(42, move |_| {
            released_cb.fetch_add(1, O::SeqCst);
        });

        let rc2 = rc.use_();
        assert!(!rc.single());
        assert_eq!(released.load(O::SeqCst), 0);

        drop(rc2);
        assert!(rc.single());
        assert_eq!(released.load(O::SeqCst), 0);

        drop(rc);
        assert_eq!(released.load(O::SeqCst), 1);
    }

    #[test]
    fn use_increments_and_aliases() {
        let rc = URefCount::new("hello", |_| {});
        let rc2 = rc.use_();
        assert_eq!(rc.count(), 2);
        assert_eq!(rc2.get(), &"hello");
    }
}
