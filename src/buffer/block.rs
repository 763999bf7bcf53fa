//! `UBufBlock`: a windowed view over one or more shared octet buffers
//! (spec.md §3 data model, "UBuf (family block)"; §4.3 block-family
//! contracts). The common case — one window over one shared buffer,
//! `{ shared, offset, size }` — is a `Segment`; `append` concatenates
//! two blocks without copying by collecting their segments into one
//! `SmallVec`, matching the Open Question decision recorded in
//! DESIGN.md to collapse `uref_block_append`/`uref_block_merge` into a
//! single segmented representation with an explicit `coalesce()` view
//! instead of the two separate C operations.

use super::PooledMem;
use crate::error::UError;
use crate::mem::UMemBackend;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone)]
struct Segment {
    shared: Arc<PooledMem>,
    offset: usize,
    size: usize,
}

impl Segment {
    fn read(&self, rel_offset: usize, len: usize) -> Vec<u8> {
        let start = self.offset + rel_offset;
        self.shared.with_slice(|data| data[start..start + len].to_vec())
    }
}

/// A block buffer: read-linear, write-linear, but internally possibly a
/// chain of segments (spec.md §4.3: "the result is read-linear,
/// write-linear but may be stored as a chain of segments").
#[derive(Clone)]
pub struct UBufBlock {
    segments: SmallVec<[Segment; 1]>,
}

impl UBufBlock {
    /// Wrap the whole of `shared` as one block's window.
    pub fn new(shared: Arc<PooledMem>) -> Self {
        let size = shared.len();
        Self { segments: SmallVec::from_buf([Segment { shared, offset: 0, size }]) }
    }

    pub fn from_window(shared: Arc<PooledMem>, offset: usize, size: usize) -> Result<Self, UError> {
        if offset.checked_add(size).ok_or(UError::Invalid)? > shared.len() {
            return Err(UError::Invalid);
        }
        Ok(Self { segments: SmallVec::from_buf([Segment { shared, offset, size }]) })
    }

    pub fn size(&self) -> usize {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// `true` once more than one segment has accumulated via `append`.
    pub fn is_segmented(&self) -> bool {
        self.segments.len() > 1
    }

    /// Produce an independent window over the same shared storage(s).
    pub fn dup(&self) -> Self {
        Self { segments: self.segments.clone() }
    }

    /// Form a new block logically concatenating `self` then `other`,
    /// without copying either's bytes (spec.md §4.3: "append(other):
    /// form a segmented ubuf logically concatenating two buffers").
    pub fn append(mut self, other: &UBufBlock) -> Self {
        self.segments.extend(other.segments.iter().cloned());
        self
    }

    /// Copy every segment into one freshly allocated contiguous buffer.
    /// A no-op allocation-wise when already a single segment covering
    /// exactly the requested range is not assumed — `coalesce` always
    /// allocates fresh, since the original may still be shared.
    pub fn coalesce(&self, backend: Arc<dyn UMemBackend>) -> Result<Self, UError> {
        let total = self.size();
        let mut mem = crate::mem::UMem::alloc(backend, total, 0)?;
        let mut pos = 0;
        for segment in &self.segments {
            let bytes = segment.read(0, segment.size);
            mem.as_mut_slice()[pos..pos + bytes.len()].copy_from_slice(&bytes);
            pos += bytes.len();
        }
        Ok(Self::new(PooledMem::new(mem, None)))
    }

    /// Shrink or shift the window. Only defined for a single-segment
    /// block (the common case); a segmented block must be coalesced
    /// first. Mirrors `ubuf_block_resize`.
    pub fn resize(&mut self, skip: isize, new_size: Option<usize>) -> Result<(), UError> {
        if self.segments.len() != 1 {
            return Err(UError::Invalid);
        }
        let segment = &mut self.segments[0];
        let new_offset = if skip >= 0 {
            segment.offset.checked_add(skip as usize).ok_or(UError::Invalid)?
        } else {
            segment.offset.checked_sub((-skip) as usize).ok_or(UError::Invalid)?
        };
        if new_offset > segment.shared.len() {
            return Err(UError::Invalid);
        }
        let max_size = segment.shared.len() - new_offset;
        let size = new_size.unwrap_or(max_size);
        if size > max_size {
            return Err(UError::Invalid);
        }
        segment.offset = new_offset;
        segment.size = size;
        Ok(())
    }

    /// Read `len` bytes starting at `offset` within the window,
    /// transparently crossing segment boundaries.
    pub fn extract(&self, offset: usize, len: usize) -> Result<Vec<u8>, UError> {
        if offset.checked_add(len).ok_or(UError::Invalid)? > self.size() {
            return Err(UError::Invalid);
        }
        let mut out = Vec::with_capacity(len);
        let mut remaining_skip = offset;
        let mut remaining_len = len;
        for segment in &self.segments {
            if remaining_len == 0 {
                break;
            }
            if remaining_skip >= segment.size {
                remaining_skip -= segment.size;
                continue;
            }
            let take = (segment.size - remaining_skip).min(remaining_len);
            out.extend_from_slice(&segment.read(remaining_skip, take));
            remaining_skip = 0;
            remaining_len -= take;
        }
        Ok(out)
    }

    /// Overwrite `len` bytes starting at `offset` within the window.
    /// Only defined for a single-segment block; a segmented block must
    /// be coalesced first (spec.md §4.3: `write` may need to copy
    /// across segments — here that copy is `coalesce`, done explicitly
    /// by the caller rather than silently inside `insert`).
    pub fn insert(&mut self, offset: usize, src: &[u8]) -> Result<(), UError> {
        if self.segments.len() != 1 {
            return Err(UError::Busy);
        }
        let segment = &self.segments[0];
        if offset.checked_add(src.len()).ok_or(UError::Invalid)? > segment.size {
            return Err(UError::Invalid);
        }
        let start = segment.offset + offset;
        segment.shared.with_mut_slice(|data| data[start..start + src.len()].copy_from_slice(src));
        Ok(())
    }

    /// Copy bytes from `src`'s window into `self`'s window. Mirrors
    /// `ubuf_block_splice` semantics: read-only access to `src`, a
    /// write into `self`.
    pub fn splice_from(&mut self, self_offset: usize, src: &UBufBlock, src_offset: usize, len: usize) -> Result<(), UError> {
        let bytes = src.extract(src_offset, len)?;
        self.insert(self_offset, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{HeapBackend, UMem, UMemBackend};

    fn make_block(bytes: &[u8]) -> UBufBlock {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mut mem = UMem::alloc(backend, bytes.len(), 0).unwrap();
        mem.as_mut_slice().copy_from_slice(bytes);
        UBufBlock::new(PooledMem::new(mem, None))
    }

    #[test]
    fn dup_shares_storage_but_windows_independently() {
        let block = make_block(b"hello world");
        let mut dup = block.dup();
        dup.resize(6, Some(5)).unwrap();
        assert_eq!(dup.extract(0, 5).unwrap(), b"world");
        assert_eq!(block.extract(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn resize_rejects_out_of_range() {
        let mut block = make_block(b"abc");
        assert!(block.resize(0, Some(10)).is_err());
        assert!(block.resize(5, None).is_err());
    }

    #[test]
    fn splice_copies_between_independent_blocks() {
        let src = make_block(b"abcdef");
        let mut dst = make_block(b"000000");
        dst.splice_from(1, &src, 2, 3).unwrap();
        assert_eq!(dst.extract(0, 6).unwrap(), b"0cde00");
    }

    #[test]
    fn insert_writes_into_shared_storage_visible_to_dup() {
        let mut block = make_block(b"xxxx");
        let dup = block.dup();
        block.insert(0, b"yy").unwrap();
        assert_eq!(dup.extract(0, 4).unwrap(), b"yyxx");
    }

    #[test]
    fn append_reads_linearly_across_segments_without_copying() {
        let a = make_block(b"abc");
        let b = make_block(b"def");
        let joined = a.append(&b);
        assert!(joined.is_segmented());
        assert_eq!(joined.size(), 6);
        assert_eq!(joined.extract(1, 4).unwrap(), b"bcde");
    }

    #[test]
    fn coalesce_produces_single_segment_with_same_bytes() {
        let a = make_block(b"abc");
        let b = make_block(b"def");
        let joined = a.append(&b);
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let flat = joined.coalesce(backend).unwrap();
        assert!(!flat.is_segmented());
        assert_eq!(flat.extract(0, 6).unwrap(), b"abcdef");
    }

    #[test]
    fn insert_on_segmented_block_is_rejected() {
        let a = make_block(b"abc");
        let b = make_block(b"def");
        let mut joined = a.append(&b);
        assert_eq!(joined.insert(0, b"x"), Err(UError::Busy));
    }
}
