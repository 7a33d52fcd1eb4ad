//! hs-dsp: Real-time convolution and IR hot-swapping for Hotswap
//!
//! ## Modules
//! - `convolution` - Uniform partitioned FFT convolution (zero or added latency)
//! - `ir_transfer` - Staging an IR off the audio thread, swapping it in on it
//! - `bypass` - Click-free bypass with latency compensation
//! - `delay_compensation` - Push/pop delay lines for the dry path
//! - `linear_phase` - Linear-phase EQ from a minimum-phase prototype
//! - `biquad` - TDF-II biquads used as EQ prototypes
//! - `ir_helpers` - Frequency-domain IR transforms

pub mod biquad;
pub mod bypass;
pub mod convolution;
pub mod delay_compensation;
pub mod ir_helpers;
pub mod ir_transfer;
pub mod linear_phase;

pub use biquad::{BiquadCascade, BiquadCoeffs, BiquadTDF2, CascadeParams, EqBand, FilterType};
pub use bypass::BypassProcessor;
pub use convolution::{ConvolutionEngine, PartitionLayout};
pub use delay_compensation::{CompensationDelay, DelayLine};
pub use ir_helpers::IrFft;
pub use ir_transfer::{AtomicIrUpdateState, IrTransfer, IrTransferGuard, IrUpdateState};
pub use linear_phase::{EqParameterHandle, LinearPhaseEq, LinearPhaseEqConfig, PrototypeFilter};

use hs_core::Sample;

/// Trait for all DSP processors
pub trait Processor: Send + Sync {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait
pub trait MonoProcessor: Processor {
    /// Process a single sample
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process a block of samples
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}
