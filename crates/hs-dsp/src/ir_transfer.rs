//! IR Transfer
//!
//! Stages a new IR off the audio thread and hands it to live
//! [`ConvolutionEngine`]s without ever blocking the audio thread:
//! - Producer: [`IrTransfer::set_new_ir`] partitions under a blocking lock
//! - Audio thread: [`IrTransfer::try_lock`], then copy into each engine
//! - A failed try-lock just means "retry next block"

use hs_core::{Sample, SampleType};
use parking_lot::{Mutex, MutexGuard};
use portable_atomic::{AtomicU8, Ordering};
use realfft::RealFftPlanner;
use rustfft::num_complex::Complex;

use crate::convolution::{ConvolutionEngine, IrPartitioner, PartitionLayout};

// ============ Update State ============

/// Where a pending IR update is, from the point of view of its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrUpdateState {
    /// Engines run the current IR, nothing pending
    Good = 0,
    /// New parameters arrived, IR not computed yet
    Needed = 1,
    /// New IR staged, waiting for the audio thread
    Ready = 2,
}

impl IrUpdateState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Needed,
            2 => Self::Ready,
            _ => Self::Good,
        }
    }
}

/// Lock-free cell holding an [`IrUpdateState`]
#[derive(Debug)]
pub struct AtomicIrUpdateState(AtomicU8);

impl AtomicIrUpdateState {
    pub const fn new(state: IrUpdateState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> IrUpdateState {
        IrUpdateState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, state: IrUpdateState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `current -> new`, failing if another thread changed it first
    #[inline]
    pub fn transition(&self, current: IrUpdateState, new: IrUpdateState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicIrUpdateState {
    fn default() -> Self {
        Self::new(IrUpdateState::Good)
    }
}

// ============ Staging ============

struct StagedIr<T: SampleType> {
    partitioner: IrPartitioner<T>,
    segments: Vec<Vec<Complex<T>>>,
    ready: bool,
}

/// Staging area for one IR shared by any number of same-shaped engines
pub struct IrTransfer<T: SampleType = Sample> {
    layout: PartitionLayout,
    staged: Mutex<StagedIr<T>>,
}

impl<T: SampleType> IrTransfer<T> {
    /// Size the staging buffer for engines shaped like `exemplar`
    pub fn new(exemplar: &ConvolutionEngine<T>) -> Self {
        let layout = exemplar.layout();
        let mut planner = RealFftPlanner::<T>::new();
        let partitioner = IrPartitioner::new(layout, &mut planner);

        Self {
            layout,
            staged: Mutex::new(StagedIr {
                segments: partitioner.make_segments(),
                partitioner,
                ready: false,
            }),
        }
    }

    #[inline]
    pub fn layout(&self) -> PartitionLayout {
        self.layout
    }

    /// Partition `ir` into the staging buffer and mark it ready.
    ///
    /// Producer side. Blocks only while the audio thread is copying.
    pub fn set_new_ir(&self, ir: &[T]) {
        debug_assert!(ir.len() >= self.layout.ir_num_samples);

        let mut staged = self.staged.lock();
        let StagedIr {
            partitioner,
            segments,
            ready,
        } = &mut *staged;

        partitioner.partition(ir, segments);
        *ready = true;
    }

    /// Whether a staged IR is waiting to be transferred
    pub fn has_new_ir(&self) -> bool {
        self.staged.lock().ready
    }

    /// Non-blocking lock for the audio thread.
    ///
    /// Returns `None` while the producer is staging.
    #[inline]
    pub fn try_lock(&self) -> Option<IrTransferGuard<'_, T>> {
        self.staged.try_lock().map(|staged| IrTransferGuard {
            layout: self.layout,
            staged,
            transferred: false,
        })
    }

    /// Try-lock and copy into a single engine. Returns `true` if new data was
    /// copied.
    pub fn transfer_ir(&self, target: &mut ConvolutionEngine<T>) -> bool {
        self.try_lock().is_some_and(|mut guard| guard.transfer_ir(target))
    }
}

/// Held lock on the staging buffer.
///
/// Dropping the guard after at least one successful transfer consumes the
/// staged IR.
pub struct IrTransferGuard<'a, T: SampleType> {
    layout: PartitionLayout,
    staged: MutexGuard<'a, StagedIr<T>>,
    transferred: bool,
}

impl<T: SampleType> IrTransferGuard<'_, T> {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.staged.ready
    }

    /// Copy the staged segments into `target`. No-op if nothing is staged.
    pub fn transfer_ir(&mut self, target: &mut ConvolutionEngine<T>) -> bool {
        if !self.staged.ready {
            return false;
        }

        debug_assert_eq!(
            target.layout(),
            self.layout,
            "IR transfer target has a different FFT layout"
        );
        if target.layout() != self.layout {
            return false;
        }

        for (dest, src) in target
            .impulse_segments_mut()
            .iter_mut()
            .zip(&self.staged.segments)
        {
            dest.copy_from_slice(src);
        }

        self.transferred = true;
        true
    }
}

impl<T: SampleType> Drop for IrTransferGuard<'_, T> {
    fn drop(&mut self) {
        if self.transferred {
            self.staged.ready = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn delayed_impulse(len: usize, delay: usize) -> Vec<f64> {
        let mut ir = vec![0.0; len];
        ir[delay] = 1.0;
        ir
    }

    #[test]
    fn test_state_transitions() {
        let state = AtomicIrUpdateState::default();
        assert_eq!(state.load(), IrUpdateState::Good);

        assert!(state.transition(IrUpdateState::Good, IrUpdateState::Needed));
        // Second request while pending is rejected
        assert!(!state.transition(IrUpdateState::Good, IrUpdateState::Needed));

        state.store(IrUpdateState::Ready);
        assert_eq!(state.load(), IrUpdateState::Ready);
    }

    #[test]
    fn test_transfer_into_multiple_engines() {
        const IR_SIZE: usize = 256;
        let old_ir = delayed_impulse(IR_SIZE, 0);
        let new_ir = delayed_impulse(IR_SIZE, 3);

        let mut engines: Vec<_> = (0..2)
            .map(|_| ConvolutionEngine::new(IR_SIZE, 128, Some(old_ir.as_slice())))
            .collect();
        let transfer = IrTransfer::new(&engines[0]);

        // Nothing staged yet
        assert!(!transfer.has_new_ir());
        assert!(!transfer.transfer_ir(&mut engines[0]));

        transfer.set_new_ir(&new_ir);
        assert!(transfer.has_new_ir());

        {
            let mut guard = transfer.try_lock().unwrap();
            assert!(guard.is_ready());
            for engine in &mut engines {
                assert!(guard.transfer_ir(engine));
            }
        }
        assert!(!transfer.has_new_ir());

        for engine in &mut engines {
            let mut buffer = vec![0.0; 128];
            buffer[0] = 1.0;
            engine.process_samples_in_place(&mut buffer);
            assert_abs_diff_eq!(buffer[3], 1.0, epsilon = 1e-9);
            assert_abs_diff_eq!(buffer[0], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_try_lock_fails_while_staging_is_locked() {
        let engine = ConvolutionEngine::<f64>::new(64, 64, None);
        let transfer = IrTransfer::new(&engine);

        let held = transfer.try_lock();
        assert!(held.is_some());
        assert!(transfer.try_lock().is_none());
        drop(held);
        assert!(transfer.try_lock().is_some());
    }

    #[test]
    fn test_guard_without_transfer_keeps_ir_staged() {
        let engine = ConvolutionEngine::<f64>::new(64, 64, None);
        let transfer = IrTransfer::new(&engine);
        transfer.set_new_ir(&delayed_impulse(64, 1));

        drop(transfer.try_lock());
        assert!(transfer.has_new_ir());
    }
}
