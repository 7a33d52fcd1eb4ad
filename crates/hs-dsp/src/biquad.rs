//! Biquad prototype filters (Transposed Direct Form II)
//!
//! Minimum-phase second-order sections used as the prototype of the
//! linear-phase EQ: the EQ runs an impulse through a [`BiquadCascade`]
//! forwards and backwards to get a symmetric FIR.

use std::f64::consts::PI;

use hs_core::{ProcessSpec, Sample};
use serde::{Deserialize, Serialize};

use crate::linear_phase::PrototypeFilter;
use crate::{MonoProcessor, Processor};

/// Biquad filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Peaking,
    LowShelf,
    HighShelf,
}

/// Biquad coefficients, normalized so `a0 == 1`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Shared RBJ cookbook terms for one frequency/Q pair
struct Warped {
    cos: f64,
    alpha: f64,
}

impl Warped {
    fn new(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        Self {
            cos: omega.cos(),
            alpha: omega.sin() / (2.0 * q),
        }
    }
}

impl BiquadCoeffs {
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let w = Warped::new(freq, q, sample_rate);
        let b = (1.0 - w.cos) / 2.0;
        Self::normalized(b, 2.0 * b, b, 1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha)
    }

    pub fn highpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let w = Warped::new(freq, q, sample_rate);
        let b = (1.0 + w.cos) / 2.0;
        Self::normalized(b, -2.0 * b, b, 1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha)
    }

    /// Peaking EQ, `gain_db` at `freq`
    pub fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w = Warped::new(freq, q, sample_rate);

        Self::normalized(
            1.0 + w.alpha * a,
            -2.0 * w.cos,
            1.0 - w.alpha * a,
            1.0 + w.alpha / a,
            -2.0 * w.cos,
            1.0 - w.alpha / a,
        )
    }

    pub fn low_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w = Warped::new(freq, q, sample_rate);
        let k = 2.0 * a.sqrt() * w.alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * w.cos + k),
            2.0 * a * ((a - 1.0) - (a + 1.0) * w.cos),
            a * ((a + 1.0) - (a - 1.0) * w.cos - k),
            (a + 1.0) + (a - 1.0) * w.cos + k,
            -2.0 * ((a - 1.0) + (a + 1.0) * w.cos),
            (a + 1.0) + (a - 1.0) * w.cos - k,
        )
    }

    pub fn high_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w = Warped::new(freq, q, sample_rate);
        let k = 2.0 * a.sqrt() * w.alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * w.cos + k),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * w.cos),
            a * ((a + 1.0) + (a - 1.0) * w.cos - k),
            (a + 1.0) - (a - 1.0) * w.cos + k,
            2.0 * ((a - 1.0) - (a + 1.0) * w.cos),
            (a + 1.0) - (a - 1.0) * w.cos - k,
        )
    }

    /// Unity gain, no filtering
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            ..Self::default()
        }
    }

    /// Magnitude response at `freq`
    pub fn magnitude(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let (c1, s1) = (omega.cos(), omega.sin());
        let (c2, s2) = ((2.0 * omega).cos(), (2.0 * omega).sin());

        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);

        (num_re.hypot(num_im)) / (den_re.hypot(den_im))
    }
}

/// Transposed Direct Form II biquad filter
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn new() -> Self {
        Self::with_coeffs(BiquadCoeffs::bypass())
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }
}

impl Default for BiquadTDF2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for BiquadTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl MonoProcessor for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

// ============ EQ Band ============

/// One band of a prototype EQ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub filter_type: FilterType,
    /// Center/corner frequency (Hz)
    pub frequency: f64,
    pub q: f64,
    /// Ignored by the cut filters
    pub gain_db: f64,
    pub enabled: bool,
}

impl EqBand {
    pub fn peaking(frequency: f64, q: f64, gain_db: f64) -> Self {
        Self {
            filter_type: FilterType::Peaking,
            frequency,
            q,
            gain_db,
            enabled: true,
        }
    }

    pub fn low_shelf(frequency: f64, q: f64, gain_db: f64) -> Self {
        Self {
            filter_type: FilterType::LowShelf,
            ..Self::peaking(frequency, q, gain_db)
        }
    }

    pub fn high_shelf(frequency: f64, q: f64, gain_db: f64) -> Self {
        Self {
            filter_type: FilterType::HighShelf,
            ..Self::peaking(frequency, q, gain_db)
        }
    }

    pub fn lowpass(frequency: f64, q: f64) -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            ..Self::peaking(frequency, q, 0.0)
        }
    }

    pub fn highpass(frequency: f64, q: f64) -> Self {
        Self {
            filter_type: FilterType::Highpass,
            ..Self::peaking(frequency, q, 0.0)
        }
    }

    /// Coefficients at `sample_rate`. Frequencies at or above Nyquist are
    /// pulled just below it.
    pub fn coeffs(&self, sample_rate: f64) -> BiquadCoeffs {
        if !self.enabled {
            return BiquadCoeffs::bypass();
        }

        let freq = self.frequency.clamp(1.0, 0.499 * sample_rate);
        let q = self.q.max(0.01);
        match self.filter_type {
            FilterType::Lowpass => BiquadCoeffs::lowpass(freq, q, sample_rate),
            FilterType::Highpass => BiquadCoeffs::highpass(freq, q, sample_rate),
            FilterType::Peaking => BiquadCoeffs::peaking(freq, q, self.gain_db, sample_rate),
            FilterType::LowShelf => BiquadCoeffs::low_shelf(freq, q, self.gain_db, sample_rate),
            FilterType::HighShelf => BiquadCoeffs::high_shelf(freq, q, self.gain_db, sample_rate),
        }
    }
}

// ============ Cascade ============

/// Series of biquads, one per [`EqBand`]
#[derive(Debug, Clone)]
pub struct BiquadCascade {
    sections: Vec<BiquadTDF2>,
    sample_rate: f64,
}

impl BiquadCascade {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            sample_rate: 48000.0,
        }
    }

    /// Recompute all sections for `bands`. Allocates if the band count grows.
    pub fn set_bands(&mut self, bands: &[EqBand]) {
        self.sections.resize_with(bands.len(), BiquadTDF2::new);
        for (section, band) in self.sections.iter_mut().zip(bands) {
            section.set_coeffs(band.coeffs(self.sample_rate));
        }
    }

    #[inline]
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    /// Combined magnitude response at `freq`
    pub fn magnitude(&self, freq: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.coeffs().magnitude(freq, self.sample_rate))
            .product()
    }
}

impl Default for BiquadCascade {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for BiquadCascade {
    fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

impl MonoProcessor for BiquadCascade {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.sections
            .iter_mut()
            .fold(input, |x, section| section.process_sample(x))
    }
}

/// Parameters of a [`BiquadCascade`] prototype
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeParams {
    pub bands: Vec<EqBand>,
}

impl PrototypeFilter for BiquadCascade {
    type Params = CascadeParams;

    fn prepare(&mut self, spec: &ProcessSpec) {
        self.sample_rate = spec.sample_rate;
        Processor::reset(self);
    }

    fn reset(&mut self) {
        Processor::reset(self);
    }

    fn process_block(&mut self, buffer: &mut [Sample]) {
        MonoProcessor::process_block(self, buffer);
    }
}

/// Default parameter hook for a [`BiquadCascade`] prototype
pub fn update_cascade(cascade: &mut BiquadCascade, params: &CascadeParams) {
    cascade.set_bands(&params.bands);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bypass() {
        let mut filter = BiquadTDF2::new();
        let output = filter.process_sample(0.5);
        assert!((output - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_lowpass_dc() {
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, 48000.0));

        // DC signal should pass through lowpass
        for _ in 0..1000 {
            filter.process_sample(1.0);
        }
        let output = filter.process_sample(1.0);
        assert!((output - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_highpass_dc() {
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::highpass(1000.0, 0.707, 48000.0));

        for _ in 0..1000 {
            filter.process_sample(1.0);
        }
        let output = filter.process_sample(1.0);
        assert!(output.abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, 48000.0));
        for _ in 0..100 {
            filter.process_sample(1.0);
        }

        Processor::reset(&mut filter);
        assert_eq!(filter.z1, 0.0);
        assert_eq!(filter.z2, 0.0);
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let coeffs = BiquadCoeffs::peaking(1000.0, 1.0, 6.0, 48000.0);
        let expected = 10.0_f64.powf(6.0 / 20.0);
        assert_relative_eq!(coeffs.magnitude(1000.0, 48000.0), expected, epsilon = 1e-9);
        assert_relative_eq!(coeffs.magnitude(20.0, 48000.0), 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_shelf_gains() {
        let low = BiquadCoeffs::low_shelf(200.0, 0.707, -12.0, 48000.0);
        let high = BiquadCoeffs::high_shelf(5000.0, 0.707, 6.0, 48000.0);

        assert_relative_eq!(low.magnitude(10.0, 48000.0), 10.0_f64.powf(-12.0 / 20.0), epsilon = 1e-2);
        assert_relative_eq!(high.magnitude(20000.0, 48000.0), 10.0_f64.powf(6.0 / 20.0), epsilon = 5e-2);
    }

    #[test]
    fn test_cascade_combines_bands() {
        let mut cascade = BiquadCascade::new();
        PrototypeFilter::prepare(&mut cascade, &ProcessSpec::new(48000.0, 256, 1));
        cascade.set_bands(&[EqBand::peaking(1000.0, 1.0, 6.0), EqBand::peaking(1000.0, 1.0, 6.0)]);

        assert_eq!(cascade.num_sections(), 2);
        assert_relative_eq!(cascade.magnitude(1000.0), 10.0_f64.powf(12.0 / 20.0), epsilon = 1e-9);

        let mut disabled = EqBand::peaking(1000.0, 1.0, 6.0);
        disabled.enabled = false;
        cascade.set_bands(&[disabled]);
        assert_relative_eq!(cascade.magnitude(1000.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_band_serde() {
        let band = EqBand::high_shelf(8000.0, 0.7, 3.0);
        let json = serde_json::to_string(&band).unwrap();
        assert!(json.contains("\"high_shelf\""));
        let back: EqBand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, band);
    }
}
