//! Bypass Processor
//!
//! Click-free on/off switching for a wrapped processor. The dry signal is
//! delayed to match the wrapped processor's latency, and on every toggle the
//! output crossfades between the wet block and the aligned dry block.
//!
//! ```text
//! if bypass.process_block_in(&mut block, on) {
//!     processor.process(&mut block);
//!     bypass.process_block_out(&mut block, on);
//! }
//! ```

use hs_core::{AudioBuffer, MultiChannelBuffer, ProcessSpec, Sample, SampleType};

use crate::delay_compensation::{CompensationDelay, DelayLine};

/// Maximum latency the default delay line can compensate
pub const DEFAULT_MAX_LATENCY: usize = 1 << 16;

#[derive(Clone, Copy, PartialEq, Eq)]
enum DelayOp {
    Push,
    Pop,
    Toss,
}

/// Smooth bypass with latency compensation
pub struct BypassProcessor<T: SampleType = Sample, D: CompensationDelay<T> = DelayLine<T>> {
    compensation_delay: D,
    fade_buffer: MultiChannelBuffer<T>,
    prev_on_off: bool,
    prev_delay: usize,
    /// Samples of newly reported latency still to wait out before a fade-in
    /// may start. Negative: no fade pending.
    latency_sample_count: isize,
}

impl<T: SampleType> BypassProcessor<T> {
    pub fn new() -> Self {
        Self::with_delay(DelayLine::new(DEFAULT_MAX_LATENCY))
    }

    /// Default delay line able to compensate up to `max_latency` samples
    pub fn with_max_latency(max_latency: usize) -> Self {
        Self::with_delay(DelayLine::new(max_latency))
    }
}

impl<T: SampleType> Default for BypassProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SampleType, D: CompensationDelay<T>> BypassProcessor<T, D> {
    pub fn with_delay(compensation_delay: D) -> Self {
        Self {
            compensation_delay,
            fade_buffer: MultiChannelBuffer::new(0, 0),
            prev_on_off: false,
            prev_delay: 0,
            latency_sample_count: -1,
        }
    }

    /// Allocate for `spec`, starting in the given on/off state
    pub fn prepare(&mut self, spec: &ProcessSpec, on_off: bool) {
        self.prev_on_off = on_off;
        self.fade_buffer = MultiChannelBuffer::new(spec.num_channels, spec.max_block_size);
        self.compensation_delay.prepare(spec);
        self.latency_sample_count = -1;
    }

    /// Latency of the wrapped processor, applied to the dry path
    pub fn set_latency_samples(&mut self, delay_samples: usize) {
        if delay_samples == self.prev_delay {
            return;
        }

        self.compensation_delay.set_delay(delay_samples);
        if delay_samples == 0 {
            self.compensation_delay.reset();
        }

        self.prev_delay = delay_samples;
    }

    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.prev_delay
    }

    /// Call before processing a block.
    ///
    /// Returns `false` when the wrapped processor can be skipped; the block
    /// then already holds the delay-compensated dry signal.
    pub fn process_block_in<B>(&mut self, buffer: &mut B, on_off: bool) -> bool
    where
        B: AudioBuffer<T> + ?Sized,
    {
        Self::apply_delay_op(&mut self.compensation_delay, buffer, DelayOp::Push);

        if !on_off && !self.prev_on_off {
            Self::apply_delay_op(&mut self.compensation_delay, buffer, DelayOp::Pop);
            return false;
        }

        if on_off != self.prev_on_off {
            self.fade_buffer.copy_from(&*buffer);
            Self::apply_delay_op(
                &mut self.compensation_delay,
                &mut self.fade_buffer,
                DelayOp::Pop,
            );

            if on_off && self.latency_sample_count < 0 {
                self.latency_sample_count = self.compensation_delay.delay() as isize;
            }
        } else {
            Self::apply_delay_op(&mut self.compensation_delay, buffer, DelayOp::Toss);
        }

        true
    }

    /// Call after processing a block. Crossfades wet and dry on a toggle.
    pub fn process_block_out<B>(&mut self, buffer: &mut B, on_off: bool)
    where
        B: AudioBuffer<T> + ?Sized,
    {
        if on_off == self.prev_on_off {
            self.latency_sample_count = 0;
            return;
        }

        let num_samples = buffer.num_samples();
        let start_sample = self.fade_start_sample(num_samples);

        // Fade out when switching off, in when switching on
        let start_gain = if on_off { T::zero() } else { T::one() };
        let end_gain = T::one() - start_gain;
        let increment = if start_sample < num_samples {
            (end_gain - start_gain) / T::from_usize_lossy(num_samples - start_sample)
        } else {
            T::zero()
        };

        let num_channels = buffer.num_channels().min(self.fade_buffer.num_channels());
        for ch in 0..num_channels {
            let wet = buffer.channel_mut(ch);
            let dry = self.fade_buffer.channel(ch);

            // Wet signal has not arrived yet: hold the start gain
            for (w, &d) in wet[..start_sample].iter_mut().zip(dry) {
                *w = *w * start_gain + d * (T::one() - start_gain);
            }

            let mut gain = start_gain;
            for (w, &d) in wet[start_sample..num_samples]
                .iter_mut()
                .zip(dry.iter().skip(start_sample))
            {
                *w = *w * gain + d * (T::one() - gain);
                gain += increment;
            }
        }

        if start_sample < num_samples {
            self.prev_on_off = on_off;
        }
    }

    /// First sample of the fade in a block of `num_samples`.
    ///
    /// Short latencies shift the fade start, long ones defer the fade to a
    /// later block (`num_samples` means "not this block").
    fn fade_start_sample(&mut self, num_samples: usize) -> usize {
        if self.latency_sample_count <= 0 {
            self.latency_sample_count = -1;
            return 0;
        }

        let count = self.latency_sample_count as usize;
        if count < num_samples / 4 {
            self.latency_sample_count = -1;
            count
        } else {
            self.latency_sample_count = count.saturating_sub(num_samples) as isize;
            num_samples
        }
    }

    fn apply_delay_op<B>(delay: &mut D, buffer: &mut B, op: DelayOp)
    where
        B: AudioBuffer<T> + ?Sized,
    {
        if delay.delay() == 0 {
            return;
        }

        let num_samples = buffer.num_samples();
        for ch in 0..buffer.num_channels() {
            match op {
                DelayOp::Push => {
                    for &x in buffer.channel(ch) {
                        delay.push_sample(ch, x);
                    }
                }
                DelayOp::Pop => {
                    for x in buffer.channel_mut(ch) {
                        *x = delay.pop_sample(ch);
                    }
                }
                DelayOp::Toss => {
                    for _ in 0..num_samples {
                        delay.increment_read_pointer(ch);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 64;

    fn mono_spec() -> ProcessSpec {
        ProcessSpec::new(48000.0, BLOCK, 1)
    }

    #[test]
    fn test_stable_bypass_is_passthrough() {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&mono_spec(), false);

        let mut data: Vec<f64> = (0..BLOCK).map(|i| i as f64).collect();
        let expected = data.clone();
        let block: &mut [&mut [f64]] = &mut [&mut data];

        assert!(!bypass.process_block_in(block, false));
        assert_eq!(block.channel(0), expected.as_slice());
    }

    #[test]
    fn test_stable_bypass_is_delayed() {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&mono_spec(), false);
        bypass.set_latency_samples(4);

        let mut data = vec![0.0; BLOCK];
        data[0] = 1.0;
        let block: &mut [&mut [f64]] = &mut [&mut data];

        assert!(!bypass.process_block_in(block, false));
        assert_eq!(block.channel(0)[4], 1.0);
        assert_eq!(block.channel(0)[0], 0.0);
    }

    #[test]
    fn test_active_runs_processor_and_skips_fade() {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&mono_spec(), true);

        let mut data = vec![0.5; BLOCK];
        let block: &mut [&mut [f64]] = &mut [&mut data];

        assert!(bypass.process_block_in(block, true));
        for x in block.channel_mut(0) {
            *x *= 2.0;
        }
        bypass.process_block_out(block, true);
        assert!(block.channel(0).iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_toggle_crossfades() {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&mono_spec(), false);

        let mut data = vec![1.0; BLOCK];
        let block: &mut [&mut [f64]] = &mut [&mut data];

        assert!(bypass.process_block_in(block, true));
        block.clear(); // wet = silence
        bypass.process_block_out(block, true);

        // Fades from dry (1.0) towards wet (0.0)
        let out = block.channel(0);
        assert_eq!(out[0], 1.0);
        assert!(out.windows(2).all(|w| w[1] <= w[0]));
        assert!(out[BLOCK - 1] < 0.05);
    }

    #[test]
    fn test_long_latency_defers_fade() {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&mono_spec(), false);
        bypass.set_latency_samples(BLOCK + 8);

        let mut data = vec![1.0; BLOCK];
        let block: &mut [&mut [f64]] = &mut [&mut data];

        // First block: latency not caught up, output stays dry
        assert!(bypass.process_block_in(block, true));
        bypass.process_block_out(block, true);
        assert_eq!(bypass.latency_sample_count, 8);
        assert!(!bypass.prev_on_off);

        // Second block: remaining latency small, fade starts at sample 8
        block.channel_mut(0).fill(1.0);
        assert!(bypass.process_block_in(block, true));
        bypass.process_block_out(block, true);
        assert!(bypass.prev_on_off);
        assert_eq!(bypass.latency_sample_count, -1);
    }
}
