//! `UBufPicture`: planar 2-D buffer with chroma subsampling and strides
//! (spec.md §3, "UBuf (family picture)"). Each [`Plane`] is addressable
//! independently but all planes share one window, expressed in luma
//! (unsubsampled) pixels and converted per-plane via `hsub`/`vsub`.

use super::PooledMem;
use crate::error::UError;
use smallvec::SmallVec;
use std::sync::Arc;

/// One chroma plane: its own backing storage, stride, subsampling
/// factors and the pixel width a macropixel covers (e.g. 2 for
/// YUYV-style packed formats).
#[derive(Clone)]
pub struct Plane {
    pub chroma: String,
    pub hsub: u8,
    pub vsub: u8,
    pub macropixel_size: u8,
    pub stride: usize,
    buffer: Arc<PooledMem>,
}

impl Plane {
    pub fn new(chroma: impl Into<String>, hsub: u8, vsub: u8, macropixel_size: u8, stride: usize, buffer: Arc<PooledMem>) -> Self {
        Self { chroma: chroma.into(), hsub, vsub, macropixel_size, stride, buffer }
    }

    fn plane_offset(&self, window: &Window) -> usize {
        let vprepend_rows = window.vprepend / self.vsub as isize;
        let row_offset = (vprepend_rows.max(0) as usize) * self.stride;
        let hprepend_bytes =
            (window.hmprepend / self.hsub as isize).max(0) as usize * self.macropixel_size as usize;
        row_offset + hprepend_bytes
    }

    /// Read one full row of this plane within the current window.
    pub fn row(&self, window: &Window, row: usize) -> Result<Vec<u8>, UError> {
        let row_bytes = (window.hmsize / self.hsub as usize) * self.macropixel_size as usize;
        let base = self.plane_offset(window) + row * self.stride;
        self.buffer.with_slice(|data| {
            data.get(base..base + row_bytes).map(|s| s.to_vec()).ok_or(UError::Invalid)
        })
    }
}

/// The active region of a picture, expressed in luma pixels/rows, plus
/// how much margin exists beyond it in each direction (so a pipe can
/// grow the window back out without reallocating, the way
/// `ubuf_pic_resize` allows negative `hskip`/`vskip`).
#[derive(Clone, Copy, Debug)]
pub struct Window {
    pub hmprepend: isize,
    pub hmappend: isize,
    pub hmsize: usize,
    pub vprepend: isize,
    pub vappend: isize,
    pub vsize: usize,
}

pub struct UBufPicture {
    planes: SmallVec<[Plane; 3]>,
    window: Window,
}

impl UBufPicture {
    pub fn new(planes: impl Into<SmallVec<[Plane; 3]>>, window: Window) -> Self {
        Self { planes: planes.into(), window }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn plane(&self, chroma: &str) -> Option<&Plane> {
        self.planes.iter().find(|p| p.chroma == chroma)
    }

    pub fn dup(&self) -> Self {
        Self { planes: self.planes.clone(), window: self.window }
    }

    /// Shift and/or shrink the window. `hskip`/`vskip` move the origin
    /// (negative grows back into existing margin); `new_hsize`/
    /// `new_vsize` of `None` keeps the current size.
    pub fn resize(
        &mut self,
        hskip: isize,
        vskip: isize,
        new_hsize: Option<usize>,
        new_vsize: Option<usize>,
    ) -> Result<(), UError> {
        let hmsize = new_hsize.unwrap_or(self.window.hmsize);
        let vsize = new_vsize.unwrap_or(self.window.vsize);

        let hmprepend = self.window.hmprepend + hskip;
        let hmappend = self.window.hmappend - hskip - (hmsize as isize - self.window.hmsize as isize);
        let vprepend = self.window.vprepend + vskip;
        let vappend = self.window.vappend - vskip - (vsize as isize - self.window.vsize as isize);

        if hmprepend < 0 || vprepend < 0 {
            return Err(UError::Invalid);
        }

        self.window = Window { hmprepend, hmappend, hmsize, vprepend, vappend, vsize };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{HeapBackend, UMem, UMemBackend};

    fn make_plane(chroma: &str, hsub: u8, vsub: u8, stride: usize, rows: usize) -> Plane {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mem = UMem::alloc(backend, stride * rows, 0).unwrap();
        Plane::new(chroma, hsub, vsub, 1, stride, PooledMem::new(mem, None))
    }

    fn full_window(hsize: usize, vsize: usize) -> Window {
        Window { hmprepend: 0, hmappend: 0, hmsize: hsize, vprepend: 0, vappend: 0, vsize }
    }

    #[test]
    fn dup_shares_plane_storage() {
        let y = make_plane("y8", 1, 1, 16, 8);
        let pic = UBufPicture::new(vec![y], full_window(16, 8));
        let dup = pic.dup();
        assert_eq!(dup.planes().len(), 1);
        assert_eq!(dup.plane("y8").unwrap().stride, 16);
    }

    #[test]
    fn resize_shrinks_window() {
        let y = make_plane("y8", 1, 1, 16, 8);
        let mut pic = UBufPicture::new(vec![y], full_window(16, 8));
        pic.resize(2, 1, Some(10), Some(6)).unwrap();
        assert_eq!(pic.window().hmsize, 10);
        assert_eq!(pic.window().vsize, 6);
        // trimming forward by 2 hands that much margin back to hmprepend.
        assert_eq!(pic.window().hmprepend, 2);
    }

    #[test]
    fn resize_rejects_growing_past_available_margin() {
        let y = make_plane("y8", 1, 1, 16, 8);
        let mut pic = UBufPicture::new(vec![y], full_window(16, 8));
        // no margin exists (hmprepend=0), so growing left by skipping -4 must fail.
        assert!(pic.resize(-4, 0, None, None).is_err());
    }

    #[test]
    fn chroma_plane_row_respects_subsampling() {
        let y = make_plane("y8", 1, 1, 16, 8);
        let cb = make_plane("u8", 2, 2, 8, 4);
        let pic = UBufPicture::new(vec![y, cb], full_window(16, 8));
        let row = pic.plane("u8").unwrap().row(&pic.window(), 0).unwrap();
        assert_eq!(row.len(), 8);
    }
}
