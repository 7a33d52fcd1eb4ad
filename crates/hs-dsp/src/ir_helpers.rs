//! Frequency-domain IR transforms
//!
//! Full complex FFT of the whole IR, a per-bin transform, inverse FFT back
//! to the real part. Buffers are planned once per IR size, so repeated
//! redesigns on the IR timer thread do not allocate.

use std::sync::Arc;

use hs_core::{Sample, SampleType};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Reusable FFT state for IRs of one length
pub struct IrFft<T: SampleType = Sample> {
    size: usize,
    forward: Arc<dyn Fft<T>>,
    inverse: Arc<dyn Fft<T>>,
    spectrum: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: SampleType> IrFft<T> {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<T>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let zero = Complex::new(T::zero(), T::zero());

        Self {
            size,
            forward,
            inverse,
            spectrum: vec![zero; size],
            scratch: vec![zero; scratch_len],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Keep the phase, take the square root of the magnitude.
    ///
    /// Filtering twice with the result gives the magnitude response of the
    /// original IR.
    pub fn make_half_magnitude(&mut self, ir: &mut [T]) {
        self.transform(ir, false, false, |_, h| {
            Complex::from_polar(h.norm().sqrt(), h.arg())
        });
    }

    /// Replace the phase with a pure delay of `N / 2` samples, keeping the
    /// magnitude. DC is removed and the RMS level restored afterwards.
    pub fn make_linear_phase(&mut self, ir: &mut [T]) {
        let size = self.size;
        let half = T::from_usize_lossy(size / 2);
        let phase_increment = T::from_f64_lossy(std::f64::consts::TAU) / T::from_usize_lossy(size);

        self.transform(ir, true, true, |n, h| {
            let phase = -half * T::from_usize_lossy(n) * phase_increment;
            Complex::from_polar(h.norm(), phase)
        });
    }

    fn transform<F>(&mut self, ir: &mut [T], remove_dc: bool, normalize_rms: bool, mut bin_fn: F)
    where
        F: FnMut(usize, Complex<T>) -> Complex<T>,
    {
        debug_assert_eq!(ir.len(), self.size, "IR FFT planned for a different size");
        if ir.len() != self.size || self.size == 0 {
            return;
        }

        let original_rms = rms(ir);

        for (bin, &x) in self.spectrum.iter_mut().zip(ir.iter()) {
            *bin = Complex::new(x, T::zero());
        }
        self.forward.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        for (n, bin) in self.spectrum.iter_mut().enumerate() {
            *bin = bin_fn(n, *bin);
        }

        self.inverse.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let scale = T::one() / T::from_usize_lossy(self.size);
        for (x, bin) in ir.iter_mut().zip(&self.spectrum) {
            *x = bin.re * scale;
        }

        if remove_dc {
            let mean = ir.iter().copied().sum::<T>() / T::from_usize_lossy(ir.len());
            for x in ir.iter_mut() {
                *x -= mean;
            }
        }

        if normalize_rms {
            let new_rms = rms(ir);
            if new_rms > T::zero() {
                let gain = original_rms / new_rms;
                for x in ir.iter_mut() {
                    *x *= gain;
                }
            }
        }
    }
}

fn rms<T: SampleType>(x: &[T]) -> T {
    if x.is_empty() {
        return T::zero();
    }
    let sum_squares: T = x.iter().map(|&v| v * v).sum();
    (sum_squares / T::from_usize_lossy(x.len())).sqrt()
}
