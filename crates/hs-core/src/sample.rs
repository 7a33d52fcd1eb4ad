//! Sample types and audio buffer definitions

use std::iter::Sum;

use realfft::FftNum;
use realfft::num_traits::{Float, NumAssign};

/// Default sample type (f64 for maximum precision)
pub type Sample = f64;

/// Numeric requirements for anything that flows through the FFT paths.
///
/// Implemented for `f32` and `f64`.
pub trait SampleType: FftNum + Float + NumAssign + Sum + Default {
    /// Lossy conversion from an `f64` constant
    #[inline]
    fn from_f64_lossy(value: f64) -> Self {
        <Self as realfft::num_traits::NumCast>::from(value).unwrap_or_else(Self::zero)
    }

    /// Lossy conversion from a sample count
    #[inline]
    fn from_usize_lossy(value: usize) -> Self {
        Self::from_f64_lossy(value as f64)
    }
}

impl<T: FftNum + Float + NumAssign + Sum + Default> SampleType for T {}

/// Channel-oriented access to a block of audio.
///
/// Implemented by [`MultiChannelBuffer`] and by plain channel slice arrays
/// (`[&mut [T]]`), so processors can run on sub-ranges of larger buffers
/// without copying.
pub trait AudioBuffer<T> {
    fn num_channels(&self) -> usize;

    /// Number of samples in every channel of this block
    fn num_samples(&self) -> usize;

    fn channel(&self, channel: usize) -> &[T];

    fn channel_mut(&mut self, channel: usize) -> &mut [T];

    fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    fn clear(&mut self)
    where
        T: Default + Copy,
    {
        for ch in 0..self.num_channels() {
            self.channel_mut(ch).fill(T::default());
        }
    }
}

impl<T> AudioBuffer<T> for [&mut [T]] {
    #[inline]
    fn num_channels(&self) -> usize {
        self.len()
    }

    #[inline]
    fn num_samples(&self) -> usize {
        self.first().map_or(0, |ch| ch.len())
    }

    #[inline]
    fn channel(&self, channel: usize) -> &[T] {
        &*self[channel]
    }

    #[inline]
    fn channel_mut(&mut self, channel: usize) -> &mut [T] {
        &mut *self[channel]
    }
}

/// Multi-channel audio buffer with a fixed allocation.
///
/// Storage is sized once (`max_samples` per channel); the current size can be
/// changed freely up to that maximum without touching the allocator.
#[derive(Debug, Clone)]
pub struct MultiChannelBuffer<T> {
    channels: Vec<Vec<T>>,
    num_samples: usize,
}

impl<T: Copy + Default> MultiChannelBuffer<T> {
    pub fn new(num_channels: usize, max_samples: usize) -> Self {
        Self {
            channels: vec![vec![T::default(); max_samples]; num_channels],
            num_samples: max_samples,
        }
    }

    /// Maximum number of samples per channel
    #[inline]
    pub fn max_samples(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Change the current size (no reallocation)
    #[inline]
    pub fn set_current_size(&mut self, num_samples: usize) {
        debug_assert!(
            num_samples <= self.max_samples(),
            "buffer size {num_samples} exceeds allocation {}",
            self.max_samples()
        );
        self.num_samples = num_samples.min(self.max_samples());
    }

    /// Copy the contents (and current size) of another block into this one
    pub fn copy_from<B: AudioBuffer<T> + ?Sized>(&mut self, other: &B) {
        let num_samples = other.num_samples();
        debug_assert!(other.num_channels() <= self.channels.len());
        self.set_current_size(num_samples);

        let n = self.num_samples;
        for (ch, dest) in self.channels.iter_mut().enumerate().take(other.num_channels()) {
            dest[..n].copy_from_slice(&other.channel(ch)[..n]);
        }
    }
}

impl<T> AudioBuffer<T> for MultiChannelBuffer<T> {
    #[inline]
    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    fn num_samples(&self) -> usize {
        self.num_samples
    }

    #[inline]
    fn channel(&self, channel: usize) -> &[T] {
        &self.channels[channel][..self.num_samples]
    }

    #[inline]
    fn channel_mut(&mut self, channel: usize) -> &mut [T] {
        &mut self.channels[channel][..self.num_samples]
    }
}
