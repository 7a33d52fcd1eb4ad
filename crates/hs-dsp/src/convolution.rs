//! Uniformly Partitioned Convolution Engine
//!
//! Overlap-add FFT convolution with equal-sized IR partitions:
//! - Block size `B` = next power of two of the host's max block size
//! - FFT size `N` = `2B`, or `4B` for small blocks (`B <= 128`)
//! - IR split into `N - B` sample segments, each transformed once
//! - Ring of past input spectra, multiply-accumulated per segment
//! - Zero-latency mode (partial-block FFTs) and block-latency mode
//!
//! Everything is sized at construction, `process_*` never allocates.
//! IR swaps on a live engine go through [`crate::IrTransfer`].

use std::sync::Arc;

use hs_core::{HsError, HsResult, Sample, SampleType};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::Processor;

// ============ Constants ============

/// Blocks at or below this size use a 4x FFT so segments stay long enough
const SMALL_BLOCK_THRESHOLD: usize = 128;

// ============ Partition Layout ============

/// FFT geometry shared by an engine and anything staging IRs for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub ir_num_samples: usize,
    pub block_size: usize,
    pub fft_size: usize,
    pub num_segments: usize,
    pub num_input_segments: usize,
}

impl PartitionLayout {
    pub fn new(ir_num_samples: usize, max_block_size: usize) -> Self {
        let block_size = max_block_size.max(1).next_power_of_two();
        let fft_size = if block_size > SMALL_BLOCK_THRESHOLD {
            2 * block_size
        } else {
            4 * block_size
        };

        let segment_size = fft_size - block_size;
        let num_segments = ir_num_samples / segment_size + 1;
        let num_input_segments = if block_size > SMALL_BLOCK_THRESHOLD {
            num_segments
        } else {
            3 * num_segments
        };

        Self {
            ir_num_samples,
            block_size,
            fft_size,
            num_segments,
            num_input_segments,
        }
    }

    /// IR samples per frequency-domain segment
    #[inline]
    pub fn segment_size(&self) -> usize {
        self.fft_size - self.block_size
    }

    /// Complex bins in a half spectrum
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2 + 1
    }
}

// ============ IR Partitioner ============

/// Splits a time-domain IR into normalized frequency-domain segments.
///
/// The `1/N` inverse-FFT normalization is folded into the IR spectra so the
/// audio path never has to scale.
pub(crate) struct IrPartitioner<T: SampleType> {
    layout: PartitionLayout,
    fft: Arc<dyn RealToComplex<T>>,
    time_buffer: Vec<T>,
    scratch: Vec<Complex<T>>,
}

impl<T: SampleType> IrPartitioner<T> {
    pub(crate) fn new(layout: PartitionLayout, planner: &mut RealFftPlanner<T>) -> Self {
        let fft = planner.plan_fft_forward(layout.fft_size);
        let scratch = fft.make_scratch_vec();
        Self {
            layout,
            time_buffer: vec![T::zero(); layout.fft_size],
            scratch,
            fft,
        }
    }

    pub(crate) fn make_segments(&self) -> Vec<Vec<Complex<T>>> {
        let zero = Complex::new(T::zero(), T::zero());
        vec![vec![zero; self.layout.num_bins()]; self.layout.num_segments]
    }

    /// Transform `ir` into `segments`. Samples past `ir_num_samples` are ignored,
    /// missing samples count as zero.
    pub(crate) fn partition(&mut self, ir: &[T], segments: &mut [Vec<Complex<T>>]) {
        debug_assert_eq!(segments.len(), self.layout.num_segments);

        let ir = &ir[..ir.len().min(self.layout.ir_num_samples)];
        let segment_size = self.layout.segment_size();
        let scale = T::one() / T::from_usize_lossy(self.layout.fft_size);

        for (i, segment) in segments.iter_mut().enumerate() {
            self.time_buffer.fill(T::zero());

            let start = (i * segment_size).min(ir.len());
            let end = (start + segment_size).min(ir.len());
            for (dest, &x) in self.time_buffer.iter_mut().zip(&ir[start..end]) {
                *dest = x * scale;
            }

            self.fft
                .process_with_scratch(&mut self.time_buffer, segment, &mut self.scratch)
                .ok();
        }
    }
}

// ============ Convolution Engine ============

/// Uniformly partitioned overlap-add convolution of one channel.
///
/// The IR length is fixed at construction; new IRs of that length can be
/// loaded any time with [`ConvolutionEngine::set_new_ir`] (not real-time safe)
/// or staged off-thread through [`crate::IrTransfer`].
pub struct ConvolutionEngine<T: SampleType = Sample> {
    layout: PartitionLayout,
    current_segment: usize,
    input_data_pos: usize,

    partitioner: IrPartitioner<T>,
    fft_forward: Arc<dyn RealToComplex<T>>,
    fft_inverse: Arc<dyn ComplexToReal<T>>,
    forward_scratch: Vec<Complex<T>>,
    inverse_scratch: Vec<Complex<T>>,

    /// Current input block, zero padded to `N`
    input_data: Vec<T>,
    /// Forward FFT input (realfft clobbers its input)
    fft_input: Vec<T>,
    /// Contribution of all but the newest input segment
    accumulator: Vec<Complex<T>>,
    output_spectrum: Vec<Complex<T>>,
    output_data: Vec<T>,
    overlap: Vec<T>,

    input_segments: Vec<Vec<Complex<T>>>,
    impulse_segments: Vec<Vec<Complex<T>>>,
}

impl<T: SampleType> ConvolutionEngine<T> {
    /// Create an engine for IRs of `ir_num_samples` samples, processing at
    /// most `max_block_size` samples per call.
    ///
    /// Zero sizes are clamped to one; use [`ConvolutionEngine::try_new`] to
    /// reject them instead.
    pub fn new(ir_num_samples: usize, max_block_size: usize, initial_ir: Option<&[T]>) -> Self {
        let layout = PartitionLayout::new(ir_num_samples.max(1), max_block_size.max(1));
        let mut planner = RealFftPlanner::<T>::new();

        let fft_forward = planner.plan_fft_forward(layout.fft_size);
        let fft_inverse = planner.plan_fft_inverse(layout.fft_size);
        let partitioner = IrPartitioner::new(layout, &mut planner);

        let zero = Complex::new(T::zero(), T::zero());
        let num_bins = layout.num_bins();

        let mut engine = Self {
            layout,
            current_segment: 0,
            input_data_pos: 0,
            forward_scratch: fft_forward.make_scratch_vec(),
            inverse_scratch: fft_inverse.make_scratch_vec(),
            fft_forward,
            fft_inverse,
            input_data: vec![T::zero(); layout.fft_size],
            fft_input: vec![T::zero(); layout.fft_size],
            accumulator: vec![zero; num_bins],
            output_spectrum: vec![zero; num_bins],
            output_data: vec![T::zero(); layout.fft_size],
            overlap: vec![T::zero(); layout.fft_size],
            input_segments: vec![vec![zero; num_bins]; layout.num_input_segments],
            impulse_segments: partitioner.make_segments(),
            partitioner,
        };

        if let Some(ir) = initial_ir {
            engine.set_new_ir(ir);
        }

        log::debug!(
            "ConvolutionEngine: ir={} block={} fft={} segments={}",
            layout.ir_num_samples,
            layout.block_size,
            layout.fft_size,
            layout.num_segments
        );

        engine
    }

    /// Like [`ConvolutionEngine::new`], but rejects zero sizes and IRs that
    /// are shorter than `ir_num_samples`
    pub fn try_new(
        ir_num_samples: usize,
        max_block_size: usize,
        initial_ir: Option<&[T]>,
    ) -> HsResult<Self> {
        if ir_num_samples == 0 {
            return Err(HsError::InvalidIrLength(ir_num_samples));
        }
        if max_block_size == 0 {
            return Err(HsError::InvalidBlockSize(max_block_size));
        }
        if let Some(ir) = initial_ir {
            if ir.len() < ir_num_samples {
                return Err(HsError::InvalidIrLength(ir.len()));
            }
        }

        Ok(Self::new(ir_num_samples, max_block_size, initial_ir))
    }

    /// Clear all signal history. The IR is kept.
    pub fn reset(&mut self) {
        let zero = Complex::new(T::zero(), T::zero());

        self.input_data.fill(T::zero());
        self.fft_input.fill(T::zero());
        self.accumulator.fill(zero);
        self.output_spectrum.fill(zero);
        self.output_data.fill(T::zero());
        self.overlap.fill(T::zero());
        for segment in &mut self.input_segments {
            segment.fill(zero);
        }

        self.current_segment = 0;
        self.input_data_pos = 0;
    }

    /// Re-partition a new IR of the configured length.
    ///
    /// Runs `num_segments` forward FFTs. Not meant for the audio thread.
    pub fn set_new_ir(&mut self, ir: &[T]) {
        debug_assert!(
            ir.len() >= self.layout.ir_num_samples,
            "IR too short: {} < {}",
            ir.len(),
            self.layout.ir_num_samples
        );
        self.partitioner.partition(ir, &mut self.impulse_segments);
    }

    // ============ Accessors ============

    #[inline]
    pub fn ir_num_samples(&self) -> usize {
        self.layout.ir_num_samples
    }

    /// Internal block size `B`
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.block_size
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.layout.fft_size
    }

    #[inline]
    pub fn num_segments(&self) -> usize {
        self.layout.num_segments
    }

    #[inline]
    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    /// Latency introduced by the `*_with_added_latency` methods
    #[inline]
    pub fn added_latency(&self) -> usize {
        self.layout.block_size
    }

    pub(crate) fn impulse_segments_mut(&mut self) -> &mut [Vec<Complex<T>>] {
        &mut self.impulse_segments
    }

    // ============ Processing ============

    /// Convolve `input` into `output` with no added latency
    pub fn process_samples(&mut self, input: &[T], output: &mut [T]) {
        debug_assert_eq!(input.len(), output.len());
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        self.process_samples_in_place(&mut output[..n]);
    }

    /// Zero-latency convolution, in place.
    ///
    /// Blocks longer than [`Self::block_size`] are split internally. Partial
    /// blocks are transformed as they arrive, so every call costs at
    /// least one forward and one inverse FFT.
    pub fn process_samples_in_place(&mut self, buffer: &mut [T]) {
        let block_size = self.layout.block_size;
        let mut processed = 0;

        while processed < buffer.len() {
            let input_was_empty = self.input_data_pos == 0;
            let pos = self.input_data_pos;
            let num_to_process = (buffer.len() - processed).min(block_size - pos);
            let chunk = &mut buffer[processed..processed + num_to_process];

            self.input_data[pos..pos + num_to_process].copy_from_slice(chunk);
            self.transform_current_input();

            // History only changes at block boundaries
            if input_was_empty {
                self.accumulate_history();
            }

            self.output_spectrum.copy_from_slice(&self.accumulator);
            multiply_accumulate(
                &self.input_segments[self.current_segment],
                &self.impulse_segments[0],
                &mut self.output_spectrum,
            );
            self.inverse_transform();

            for (i, out) in chunk.iter_mut().enumerate() {
                *out = self.output_data[pos + i] + self.overlap[pos + i];
            }

            self.input_data_pos += num_to_process;
            if self.input_data_pos == block_size {
                self.input_data.fill(T::zero());
                self.input_data_pos = 0;
                self.advance_block();
            }

            processed += num_to_process;
        }
    }

    /// Convolve `input` into `output`, delayed by [`Self::added_latency`]
    pub fn process_samples_with_added_latency(&mut self, input: &[T], output: &mut [T]) {
        debug_assert_eq!(input.len(), output.len());
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        self.process_samples_with_added_latency_in_place(&mut output[..n]);
    }

    /// Block-latency convolution, in place. One forward and one inverse FFT
    /// per completed block.
    pub fn process_samples_with_added_latency_in_place(&mut self, buffer: &mut [T]) {
        let block_size = self.layout.block_size;
        let mut processed = 0;

        while processed < buffer.len() {
            let pos = self.input_data_pos;
            let num_to_process = (buffer.len() - processed).min(block_size - pos);
            let chunk = &mut buffer[processed..processed + num_to_process];

            self.input_data[pos..pos + num_to_process].copy_from_slice(chunk);
            chunk.copy_from_slice(&self.output_data[pos..pos + num_to_process]);

            processed += num_to_process;
            self.input_data_pos += num_to_process;

            if self.input_data_pos == block_size {
                self.transform_current_input();
                self.accumulate_history();

                self.output_spectrum.copy_from_slice(&self.accumulator);
                multiply_accumulate(
                    &self.input_segments[self.current_segment],
                    &self.impulse_segments[0],
                    &mut self.output_spectrum,
                );
                self.inverse_transform();

                for (out, &tail) in self.output_data[..block_size]
                    .iter_mut()
                    .zip(&self.overlap[..block_size])
                {
                    *out += tail;
                }

                self.input_data.fill(T::zero());
                self.input_data_pos = 0;
                self.advance_block();
            }
        }
    }

    // ============ Internals ============

    fn transform_current_input(&mut self) {
        self.fft_input.copy_from_slice(&self.input_data);
        self.fft_forward
            .process_with_scratch(
                &mut self.fft_input,
                &mut self.input_segments[self.current_segment],
                &mut self.forward_scratch,
            )
            .ok();
    }

    /// Sum of older input segments times the later IR segments
    fn accumulate_history(&mut self) {
        let index_step = self.layout.num_input_segments / self.layout.num_segments;
        let num_input_segments = self.layout.num_input_segments;

        self.accumulator.fill(Complex::new(T::zero(), T::zero()));

        let mut index = self.current_segment;
        for impulse in &self.impulse_segments[1..] {
            index += index_step;
            if index >= num_input_segments {
                index -= num_input_segments;
            }
            multiply_accumulate(&self.input_segments[index], impulse, &mut self.accumulator);
        }
    }

    fn inverse_transform(&mut self) {
        // A real signal has real DC and Nyquist bins
        if let Some(dc) = self.output_spectrum.first_mut() {
            dc.im = T::zero();
        }
        if let Some(nyquist) = self.output_spectrum.last_mut() {
            nyquist.im = T::zero();
        }

        self.fft_inverse
            .process_with_scratch(
                &mut self.output_spectrum,
                &mut self.output_data,
                &mut self.inverse_scratch,
            )
            .ok();
    }

    /// Fold the finished block's tail into the overlap and step the ring
    fn advance_block(&mut self) {
        let block_size = self.layout.block_size;
        let fft_size = self.layout.fft_size;

        // With N = 4B the tail spans more than one block
        for i in block_size..fft_size - block_size {
            self.output_data[i] += self.overlap[i];
        }
        self.overlap[..fft_size - block_size].copy_from_slice(&self.output_data[block_size..]);

        self.current_segment = if self.current_segment > 0 {
            self.current_segment - 1
        } else {
            self.layout.num_input_segments - 1
        };
    }
}

impl<T: SampleType> Processor for ConvolutionEngine<T> {
    fn reset(&mut self) {
        ConvolutionEngine::reset(self);
    }
}

/// `output += input * impulse`, bin by bin
#[inline]
fn multiply_accumulate<T: SampleType>(
    input: &[Complex<T>],
    impulse: &[Complex<T>],
    output: &mut [Complex<T>],
) {
    for ((out, &x), &h) in output.iter_mut().zip(input).zip(impulse) {
        *out += x * h;
    }
}
