//! # Hotswap Real-Time Primitives
//!
//! Lock-free building blocks shared between a control thread and the audio
//! thread:
//! - Fixed-capacity object pool (no allocation after construction)
//! - Wait-free single-writer / single-reader "latest object" exchange

pub mod latest;
pub mod pool;

pub use latest::*;
pub use pool::*;
