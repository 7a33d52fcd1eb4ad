//! Linear Phase EQ
//!
//! Linear-phase equalization from any minimum-phase prototype filter:
//! - IR design: impulse through the prototype forwards, reversed, through
//!   again, then half magnitude (zero phase, prototype magnitude)
//! - Background timer thread redesigns the IR when parameters change
//! - Audio thread swaps the IR in with a try-lock, never blocks
//! - Latency is half the IR length
//!
//! ```text
//! set_parameters      timer thread               audio thread
//!   Good -> Needed      Needed: design, stage      Ready: try_lock, transfer
//!                       -> Ready                   -> Good
//! ```
//!
//! Parameter changes while an update is pending are dropped; callers
//! re-send them once the EQ is back to `Good`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hs_core::{AudioBuffer, HsError, HsResult, ProcessSpec, Sample, SampleType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Processor;
use crate::convolution::ConvolutionEngine;
use crate::ir_helpers::IrFft;
use crate::ir_transfer::{AtomicIrUpdateState, IrTransfer, IrUpdateState};

// ============ Constants ============

/// Sample rates above this double the FIR length (48 kHz plus some slack)
const BASE_SAMPLE_RATE_LIMIT: f64 = 48100.0;

// ============ Config ============

/// Linear phase EQ configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearPhaseEqConfig {
    /// FIR length at 48 kHz and below
    pub default_fir_length: usize,
    /// How often the IR timer checks for pending updates
    pub timer_interval_ms: u64,
}

impl Default for LinearPhaseEqConfig {
    fn default() -> Self {
        Self {
            default_fir_length: 512,
            timer_interval_ms: 5,
        }
    }
}

/// FIR length for `sample_rate`: doubled for every octave above 48 kHz
pub fn ir_size_for_sample_rate(default_fir_length: usize, mut sample_rate: f64) -> usize {
    let mut ir_size = default_fir_length;
    while sample_rate > BASE_SAMPLE_RATE_LIMIT {
        ir_size *= 2;
        sample_rate /= 2.0;
    }
    ir_size
}

// ============ Prototype ============

/// Minimum-phase filter the linear-phase IR is designed from
pub trait PrototypeFilter: Send + 'static {
    type Params: Clone + PartialEq + Send + 'static;

    fn prepare(&mut self, spec: &ProcessSpec);

    fn reset(&mut self);

    /// Filter a mono block in place
    fn process_block(&mut self, buffer: &mut [Sample]);
}

/// Pushes new parameters into the prototype before each IR design
pub type PrototypeUpdateFn<P> =
    Box<dyn Fn(&mut P, &<P as PrototypeFilter>::Params) + Send + 'static>;

// ============ IR Designer ============

struct IrDesigner<P: PrototypeFilter, T: SampleType> {
    prototype: P,
    update_prototype: PrototypeUpdateFn<P>,
    params: Option<P::Params>,
    ir: Vec<Sample>,
    ir_out: Vec<T>,
    ir_fft: IrFft<Sample>,
}

impl<P: PrototypeFilter, T: SampleType> IrDesigner<P, T> {
    fn prepare(&mut self, spec: &ProcessSpec, ir_size: usize) {
        self.prototype.prepare(spec);
        self.ir = vec![0.0; ir_size];
        self.ir_out = vec![T::zero(); ir_size];
        self.ir_fft = IrFft::new(ir_size);
    }

    /// Recompute `ir_out` from the current parameters
    fn design(&mut self) {
        if let Some(params) = &self.params {
            (self.update_prototype)(&mut self.prototype, params);
        }

        let ir_size = self.ir.len();
        if ir_size < 2 {
            return;
        }

        self.ir.fill(0.0);
        self.ir[ir_size / 2 - 1] = 1.0;

        // Forward then backward: squared magnitude, zero phase
        self.prototype.reset();
        self.prototype.process_block(&mut self.ir);
        self.ir.reverse();
        self.prototype.reset();
        self.prototype.process_block(&mut self.ir);

        self.ir_fft.make_half_magnitude(&mut self.ir);

        for (out, &x) in self.ir_out.iter_mut().zip(&self.ir) {
            *out = T::from_f64_lossy(x);
        }
    }
}

struct EqShared<P: PrototypeFilter, T: SampleType> {
    designer: Mutex<IrDesigner<P, T>>,
    state: AtomicIrUpdateState,
}

impl<P: PrototypeFilter, T: SampleType> EqShared<P, T> {
    fn set_parameters(&self, params: P::Params) -> bool {
        let mut designer = self.designer.lock();

        if designer.params.as_ref() == Some(&params) {
            return false;
        }

        // Already waiting on an update
        if self.state.load() != IrUpdateState::Good {
            return false;
        }

        designer.params = Some(params);
        self.state.store(IrUpdateState::Needed);
        true
    }

    /// One timer tick
    fn update_if_needed(&self, transfer: &IrTransfer<T>) {
        if self.state.load() != IrUpdateState::Needed {
            return;
        }

        {
            let mut designer = self.designer.lock();
            designer.design();
            transfer.set_new_ir(&designer.ir_out);
        }

        self.state.store(IrUpdateState::Ready);
        log::trace!("LinearPhaseEq: new IR staged");
    }
}

// ============ Timer ============

struct IrTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IrTimer {
    fn spawn<P: PrototypeFilter, T: SampleType>(
        shared: Arc<EqShared<P, T>>,
        transfer: Arc<IrTransfer<T>>,
        interval: Duration,
    ) -> HsResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("hs-eq-ir-timer".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    thread::park_timeout(interval);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    shared.update_if_needed(&transfer);
                }
                log::debug!("IR timer thread exiting");
            })
            .map_err(|e| HsError::Thread(format!("failed to spawn IR timer: {e}")))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for IrTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============ Parameter Handle ============

/// Cloneable handle for changing EQ parameters from a non-audio thread
pub struct EqParameterHandle<P: PrototypeFilter, T: SampleType = Sample> {
    shared: Arc<EqShared<P, T>>,
}

impl<P: PrototypeFilter, T: SampleType> Clone for EqParameterHandle<P, T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: PrototypeFilter, T: SampleType> EqParameterHandle<P, T> {
    /// See [`LinearPhaseEq::set_parameters`]
    pub fn set_parameters(&self, params: P::Params) -> bool {
        self.shared.set_parameters(params)
    }

    pub fn update_state(&self) -> IrUpdateState {
        self.shared.state.load()
    }
}

// ============ Linear Phase EQ ============

/// Linear-phase EQ built from prototype filter `P`, convolving in `T`
pub struct LinearPhaseEq<P: PrototypeFilter, T: SampleType = Sample> {
    config: LinearPhaseEqConfig,
    shared: Arc<EqShared<P, T>>,
    engines: Vec<ConvolutionEngine<T>>,
    transfer: Option<Arc<IrTransfer<T>>>,
    timer: Option<IrTimer>,
    ir_size: usize,
}

impl<P: PrototypeFilter, T: SampleType> LinearPhaseEq<P, T> {
    pub fn new<F>(prototype: P, update_prototype: F) -> Self
    where
        F: Fn(&mut P, &P::Params) + Send + 'static,
    {
        Self::with_config(prototype, update_prototype, LinearPhaseEqConfig::default())
    }

    pub fn with_config<F>(prototype: P, update_prototype: F, config: LinearPhaseEqConfig) -> Self
    where
        F: Fn(&mut P, &P::Params) + Send + 'static,
    {
        let designer = IrDesigner {
            prototype,
            update_prototype: Box::new(update_prototype),
            params: None,
            ir: Vec::new(),
            ir_out: Vec::new(),
            ir_fft: IrFft::new(0),
        };

        Self {
            config,
            shared: Arc::new(EqShared {
                designer: Mutex::new(designer),
                state: AtomicIrUpdateState::new(IrUpdateState::Good),
            }),
            engines: Vec::new(),
            transfer: None,
            timer: None,
            ir_size: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &LinearPhaseEqConfig {
        &self.config
    }

    /// Design the initial IR, build one engine per channel and start the IR
    /// timer. Stops any timer from a previous `prepare`.
    pub fn prepare(&mut self, spec: &ProcessSpec, initial_params: P::Params) -> HsResult<()> {
        spec.validate()?;
        self.stop_timer();

        let ir_size = ir_size_for_sample_rate(self.config.default_fir_length, spec.sample_rate);
        if ir_size < 2 {
            return Err(HsError::InvalidIrLength(ir_size));
        }

        {
            let mut designer = self.shared.designer.lock();
            designer.prepare(spec, ir_size);
            designer.params = Some(initial_params);
            designer.design();

            self.engines = (0..spec.num_channels)
                .map(|_| {
                    ConvolutionEngine::new(
                        ir_size,
                        spec.max_block_size,
                        Some(designer.ir_out.as_slice()),
                    )
                })
                .collect();
        }
        self.ir_size = ir_size;
        self.shared.state.store(IrUpdateState::Good);

        let transfer = Arc::new(IrTransfer::new(&self.engines[0]));
        self.transfer = Some(transfer.clone());

        let interval = Duration::from_millis(self.config.timer_interval_ms.max(1));
        self.timer = Some(IrTimer::spawn(self.shared.clone(), transfer, interval)?);

        log::info!(
            "LinearPhaseEq prepared: {} Hz, {} channels, IR {} samples, latency {}",
            spec.sample_rate,
            spec.num_channels,
            ir_size,
            self.latency_samples()
        );

        Ok(())
    }

    /// Request new parameters.
    ///
    /// Returns `false` (and drops `params`) when they equal the current ones
    /// or while a previous update is still pending.
    pub fn set_parameters(&self, params: P::Params) -> bool {
        self.shared.set_parameters(params)
    }

    /// Handle for setting parameters from another thread
    pub fn parameter_handle(&self) -> EqParameterHandle<P, T> {
        EqParameterHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn update_state(&self) -> IrUpdateState {
        self.shared.state.load()
    }

    /// Run the IR timer's work on the calling thread
    pub fn update_now(&self) {
        if let Some(transfer) = &self.transfer {
            self.shared.update_if_needed(transfer);
        }
    }

    /// Convolve every channel in place, picking up a staged IR first if the
    /// transfer lock is free.
    pub fn process_block<B>(&mut self, buffer: &mut B)
    where
        B: AudioBuffer<T> + ?Sized,
    {
        if self.shared.state.load() == IrUpdateState::Ready {
            if let Some(transfer) = &self.transfer {
                if let Some(mut guard) = transfer.try_lock() {
                    for engine in &mut self.engines {
                        guard.transfer_ir(engine);
                    }
                    self.shared.state.store(IrUpdateState::Good);
                }
            }
        }

        let num_channels = buffer.num_channels().min(self.engines.len());
        for (ch, engine) in self.engines.iter_mut().enumerate().take(num_channels) {
            engine.process_samples_in_place(buffer.channel_mut(ch));
        }
    }

    /// IR length for the prepared sample rate
    #[inline]
    pub fn ir_size(&self) -> usize {
        self.ir_size
    }

    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.ir_size / 2
    }

    pub fn reset(&mut self) {
        for engine in &mut self.engines {
            engine.reset();
        }
    }

    fn stop_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }
}

impl<P: PrototypeFilter, T: SampleType> Processor for LinearPhaseEq<P, T> {
    fn reset(&mut self) {
        LinearPhaseEq::reset(self);
    }

    fn latency(&self) -> usize {
        self.latency_samples()
    }
}

impl<P: PrototypeFilter, T: SampleType> Drop for LinearPhaseEq<P, T> {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
