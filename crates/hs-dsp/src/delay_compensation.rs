//! Delay Compensation
//!
//! Integer-sample delay lines used to keep a dry path time-aligned with a
//! processor that reports latency:
//! - Multichannel circular buffers sized once in `prepare`
//! - Separate write (push) and read (pop) cursors per channel, so a block
//!   can be pushed, then popped into another buffer, or skipped (tossed)

use hs_core::{ProcessSpec, Sample, SampleType};

// ============ Trait ============

/// Push/pop delay used by [`crate::BypassProcessor`].
///
/// Per channel, each `pop_sample` or `increment_read_pointer` must pair with
/// exactly one earlier `push_sample`.
pub trait CompensationDelay<T>: Send {
    /// Allocate for `spec.num_channels` and blocks of up to
    /// `spec.max_block_size` samples
    fn prepare(&mut self, spec: &ProcessSpec);

    fn push_sample(&mut self, channel: usize, sample: T);

    /// Read the sample pushed `delay()` samples ago and advance
    fn pop_sample(&mut self, channel: usize) -> T;

    /// Advance the read cursor without reading
    fn increment_read_pointer(&mut self, channel: usize);

    fn delay(&self) -> usize;

    fn set_delay(&mut self, samples: usize);

    /// Clear the buffer contents and cursors
    fn reset(&mut self);
}

// ============ Delay Line ============

/// Circular buffer delay line for compensation
#[derive(Debug, Clone)]
pub struct DelayLine<T = Sample> {
    buffers: Vec<Vec<T>>,
    write_pos: Vec<usize>,
    read_pos: Vec<usize>,
    max_delay: usize,
    delay_samples: usize,
}

impl<T: SampleType> DelayLine<T> {
    /// Create a delay line that can hold up to `max_delay` samples.
    ///
    /// No storage until [`CompensationDelay::prepare`].
    pub fn new(max_delay: usize) -> Self {
        Self {
            buffers: Vec::new(),
            write_pos: Vec::new(),
            read_pos: Vec::new(),
            max_delay,
            delay_samples: 0,
        }
    }

    #[inline]
    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buffers.first().map_or(0, Vec::len)
    }
}

impl<T: SampleType> CompensationDelay<T> for DelayLine<T> {
    fn prepare(&mut self, spec: &ProcessSpec) {
        // A whole block can be pushed before any of it is popped
        let capacity = self.max_delay + spec.max_block_size + 1;

        self.buffers = vec![vec![T::zero(); capacity]; spec.num_channels];
        self.write_pos = vec![0; spec.num_channels];
        self.read_pos = vec![0; spec.num_channels];
    }

    #[inline]
    fn push_sample(&mut self, channel: usize, sample: T) {
        let capacity = self.capacity();
        let pos = self.write_pos[channel];
        self.buffers[channel][pos] = sample;
        self.write_pos[channel] = (pos + 1) % capacity;
    }

    #[inline]
    fn pop_sample(&mut self, channel: usize) -> T {
        let capacity = self.capacity();
        let pos = self.read_pos[channel];
        let index = (pos + capacity - self.delay_samples) % capacity;
        self.read_pos[channel] = (pos + 1) % capacity;
        self.buffers[channel][index]
    }

    #[inline]
    fn increment_read_pointer(&mut self, channel: usize) {
        let capacity = self.capacity();
        self.read_pos[channel] = (self.read_pos[channel] + 1) % capacity;
    }

    #[inline]
    fn delay(&self) -> usize {
        self.delay_samples
    }

    /// Set delay amount (clamped to `max_delay`)
    fn set_delay(&mut self, samples: usize) {
        if samples > self.max_delay {
            log::warn!(
                "DelayLine: delay {} exceeds maximum {}, clamping",
                samples,
                self.max_delay
            );
        }
        self.delay_samples = samples.min(self.max_delay);
    }

    fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(T::zero());
        }
        self.write_pos.fill(0);
        self.read_pos.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(max_delay: usize, channels: usize, block: usize) -> DelayLine<f64> {
        let mut delay = DelayLine::new(max_delay);
        delay.prepare(&ProcessSpec::new(48000.0, block, channels));
        delay
    }

    #[test]
    fn test_block_push_then_pop() {
        let mut delay = prepared(8, 1, 16);
        delay.set_delay(3);

        let input: Vec<f64> = (1..=32).map(f64::from).collect();
        let mut output = Vec::new();
        for block in input.chunks(16) {
            for &x in block {
                delay.push_sample(0, x);
            }
            for _ in block {
                output.push(delay.pop_sample(0));
            }
        }

        assert_eq!(&output[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&output[3..], &input[..29]);
    }

    #[test]
    fn test_toss_keeps_alignment() {
        let mut delay = prepared(4, 2, 4);
        delay.set_delay(2);

        for block in 0..3 {
            for n in 0..4 {
                let x = f64::from(block * 4 + n);
                delay.push_sample(0, x);
                delay.push_sample(1, -x);
            }
            for _ in 0..4 {
                if block == 1 {
                    delay.increment_read_pointer(0);
                    delay.increment_read_pointer(1);
                } else {
                    delay.pop_sample(0);
                    delay.pop_sample(1);
                }
            }
        }

        delay.push_sample(0, 12.0);
        delay.push_sample(1, -12.0);
        assert_eq!(delay.pop_sample(0), 10.0);
        assert_eq!(delay.pop_sample(1), -10.0);
    }

    #[test]
    fn test_delay_is_clamped_and_reset_clears() {
        let mut delay = prepared(4, 1, 8);
        delay.set_delay(100);
        assert_eq!(delay.delay(), 4);

        for _ in 0..8 {
            delay.push_sample(0, 1.0);
        }
        delay.reset();
        delay.push_sample(0, 0.5);
        assert_eq!(delay.pop_sample(0), 0.0);
    }
}
