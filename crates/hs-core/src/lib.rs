//! hs-core: Shared types, traits, and utilities for Hotswap
//!
//! This crate provides the foundational types used across all Hotswap crates.

mod error;
mod sample;

pub use error::*;
pub use sample::*;

/// Description of the stream a processor is prepared for
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Largest block the host will ever pass to `process`
    pub max_block_size: usize,
    pub num_channels: usize,
}

impl ProcessSpec {
    pub const fn new(sample_rate: f64, max_block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            max_block_size,
            num_channels,
        }
    }

    /// Check that this describes a stream we can allocate for
    pub fn validate(&self) -> HsResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(HsError::InvalidSpec(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.max_block_size == 0 {
            return Err(HsError::InvalidBlockSize(self.max_block_size));
        }
        if self.num_channels == 0 {
            return Err(HsError::InvalidSpec("at least one channel required".into()));
        }
        Ok(())
    }
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self::new(48000.0, 512, 2)
    }
}
