//! `UBufSound`: planar or interleaved audio, per-channel descriptor
//! `{ channel, buffer }` plus a sample-count window (spec.md §3, "UBuf
//! (family sound)"). `sample_size` lives on the manager in the original
//! library (every channel of one sound ubuf shares it); here it is
//! carried on the ubuf itself since there is no separate manager type.

use super::PooledMem;
use crate::error::UError;
use smallvec::SmallVec;
use std::sync::Arc;

/// One channel's backing storage. For an interleaved layout, every
/// `SoundChannel` in the ubuf aliases the *same* `PooledMem` and differs
/// only in `channel` name; for planar layouts each channel owns a
/// distinct allocation.
#[derive(Clone)]
pub struct SoundChannel {
    pub channel: String,
    buffer: Arc<PooledMem>,
}

impl SoundChannel {
    pub fn new(channel: impl Into<String>, buffer: Arc<PooledMem>) -> Self {
        Self { channel: channel.into(), buffer }
    }

    pub fn samples(&self, window: &SoundWindow, sample_size: usize, channel_stride: usize) -> Result<Vec<u8>, UError> {
        let start = window.offset * channel_stride;
        let len = window.samples * sample_size;
        self.buffer.with_slice(|data| data.get(start..start + len).map(|s| s.to_vec()).ok_or(UError::Invalid))
    }
}

/// A sample-count window into the sound buffer: `offset` samples into
/// the underlying storage, `samples` long.
#[derive(Clone, Copy, Debug)]
pub struct SoundWindow {
    pub offset: usize,
    pub samples: usize,
}

pub struct UBufSound {
    channels: SmallVec<[SoundChannel; 2]>,
    sample_size: usize,
    /// Bytes between consecutive samples on one channel: `sample_size`
    /// for planar, `sample_size * channels.len()` for interleaved.
    channel_stride: usize,
    window: SoundWindow,
}

impl UBufSound {
    pub fn new(
        channels: impl Into<SmallVec<[SoundChannel; 2]>>,
        sample_size: usize,
        channel_stride: usize,
        window: SoundWindow,
    ) -> Self {
        Self { channels: channels.into(), sample_size, channel_stride, window }
    }

    pub fn channels(&self) -> &[SoundChannel] {
        &self.channels
    }

    pub fn window(&self) -> SoundWindow {
        self.window
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn channel(&self, name: &str) -> Option<&SoundChannel> {
        self.channels.iter().find(|c| c.channel == name)
    }

    pub fn dup(&self) -> Self {
        Self {
            channels: self.channels.clone(),
            sample_size: self.sample_size,
            channel_stride: self.channel_stride,
            window: self.window,
        }
    }

    /// Shift/shrink the sample window. `skip` samples are dropped from
    /// the front (negative grows back into margin already present);
    /// `new_samples` of `None` keeps the current length.
    pub fn resize(&mut self, skip: isize, new_samples: Option<usize>) -> Result<(), UError> {
        let new_offset = if skip >= 0 {
            self.window.offset.checked_add(skip as usize).ok_or(UError::Invalid)?
        } else {
            self.window.offset.checked_sub((-skip) as usize).ok_or(UError::Invalid)?
        };
        self.window = SoundWindow { offset: new_offset, samples: new_samples.unwrap_or(self.window.samples) };
        Ok(())
    }

    pub fn extract(&self, channel: &str) -> Result<Vec<u8>, UError> {
        let ch = self.channel(channel).ok_or(UError::Invalid)?;
        ch.samples(&self.window, self.sample_size, self.channel_stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{HeapBackend, UMem, UMemBackend};

    fn make_channel(name: &str, samples: usize, sample_size: usize) -> SoundChannel {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mem = UMem::alloc(backend, samples * sample_size, 0).unwrap();
        SoundChannel::new(name, PooledMem::new(mem, None))
    }

    #[test]
    fn planar_dup_shares_storage_independent_windows() {
        let left = make_channel("L", 10, 4);
        let sound = UBufSound::new(vec![left], 4, 4, SoundWindow { offset: 0, samples: 10 });
        let mut dup = sound.dup();
        dup.resize(2, Some(4)).unwrap();
        assert_eq!(dup.window().offset, 2);
        assert_eq!(sound.window().offset, 0);
    }

    #[test]
    fn extract_respects_window() {
        let left = make_channel("L", 10, 4);
        let mut sound = UBufSound::new(vec![left], 4, 4, SoundWindow { offset: 0, samples: 10 });
        sound.resize(3, Some(2)).unwrap();
        let data = sound.extract("L").unwrap();
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn interleaved_channels_share_one_buffer() {
        let backend: Arc<dyn UMemBackend> = Arc::new(HeapBackend);
        let mem = UMem::alloc(backend, 10 * 2 * 4, 0).unwrap();
        let buffer = PooledMem::new(mem, None);
        let l = SoundChannel::new("L", Arc::clone(&buffer));
        let r = SoundChannel::new("R", buffer);
        let sound = UBufSound::new(vec![l, r], 4, 8, SoundWindow { offset: 0, samples: 10 });
        assert_eq!(sound.channels().len(), 2);
    }
}
