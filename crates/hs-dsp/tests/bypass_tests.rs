//! Bypass integration tests
//!
//! Verifies:
//! - Toggling every block never clicks, with or without latency
//! - Dry and wet paths stay time-aligned across toggles (short latency)
//! - Long latencies defer the fade-in until the wet path is valid

use hs_core::{AudioBuffer, ProcessSpec};
use hs_dsp::{BypassProcessor, CompensationDelay, ConvolutionEngine, DelayLine};

const SAMPLE_RATE: f64 = 48000.0;

fn generate_noise(samples: usize, seed: u64) -> Vec<f64> {
    let mut state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    (0..samples)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
        })
        .collect()
}

/// Wrapped processor with a fixed integer latency
struct LatentDelay {
    line: DelayLine<f64>,
}

impl LatentDelay {
    fn new(spec: &ProcessSpec, delay: usize) -> Self {
        let mut line = DelayLine::new(delay);
        line.prepare(spec);
        line.set_delay(delay);
        Self { line }
    }

    fn process(&mut self, block: &mut [&mut [f64]]) {
        for ch in 0..block.num_channels() {
            for &x in block.channel(ch) {
                self.line.push_sample(ch, x);
            }
            for y in block.channel_mut(ch) {
                *y = self.line.pop_sample(ch);
            }
        }
    }
}

#[test]
fn test_toggling_every_block_is_click_free() {
    const BLOCK: usize = 512;
    let spec = ProcessSpec::new(SAMPLE_RATE, BLOCK, 2);

    let mut bypass = BypassProcessor::<f64>::new();
    bypass.prepare(&spec, false);

    let mut output = Vec::new();
    for i in 0..16 {
        let on_off = i % 2 == 1;
        let mut left = vec![0.25; BLOCK];
        let mut right = vec![-0.25; BLOCK];
        let block: &mut [&mut [f64]] = &mut [&mut left, &mut right];

        if bypass.process_block_in(block, on_off) {
            // Wet path: DC offset of 1.0
            for ch in 0..block.num_channels() {
                block.channel_mut(ch).iter_mut().for_each(|x| *x += 1.0);
            }
            bypass.process_block_out(block, on_off);
        }
        output.extend_from_slice(block.channel(0));
    }

    let max_delta = output
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0, f64::max);
    assert!(max_delta < 0.005, "bypass click: {max_delta}");
}

#[test]
fn test_toggling_with_latency_is_click_free() {
    const BLOCK: usize = 512;
    let spec = ProcessSpec::new(SAMPLE_RATE, BLOCK, 2);

    // Shifted fade start (< block / 4) and deferred fade
    for latency in [5, 100, 200, 600] {
        let mut bypass = BypassProcessor::<f64>::new();
        bypass.prepare(&spec, false);
        bypass.set_latency_samples(latency);
        let mut processor = LatentDelay::new(&spec, latency);

        let mut output = Vec::new();
        for i in 0..16 {
            let on_off = i % 2 == 1;
            let mut left = vec![0.25; BLOCK];
            let mut right = vec![-0.25; BLOCK];
            let block: &mut [&mut [f64]] = &mut [&mut left, &mut right];

            if bypass.process_block_in(block, on_off) {
                processor.process(block);
                for ch in 0..block.num_channels() {
                    block.channel_mut(ch).iter_mut().for_each(|x| *x += 1.0);
                }
                bypass.process_block_out(block, on_off);
            }
            output.extend_from_slice(block.channel(0));
        }

        let max_delta = output
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max);
        assert!(max_delta < 0.005, "latency {latency}: bypass click {max_delta}");
    }
}

#[test]
fn test_pulse_spacing_survives_toggles() {
    const BLOCK: usize = 256;
    const SPACING: usize = 100;
    const DELAY: usize = 5;
    const ITERATIONS: usize = 16;
    let spec = ProcessSpec::new(SAMPLE_RATE, BLOCK, 1);

    let mut bypass = BypassProcessor::<f64>::new();
    bypass.prepare(&spec, false);
    bypass.set_latency_samples(DELAY);
    let mut processor = LatentDelay::new(&spec, DELAY);

    let input: Vec<f64> = (0..BLOCK * ITERATIONS)
        .map(|n| if n % SPACING == 0 { 1.0 } else { 0.0 })
        .collect();
    let mut output = Vec::new();

    for (i, chunk) in input.chunks(BLOCK).enumerate() {
        let on_off = i % 2 == 1;
        let mut data = chunk.to_vec();
        let block: &mut [&mut [f64]] = &mut [&mut data];

        if bypass.process_block_in(block, on_off) {
            processor.process(block);
            bypass.process_block_out(block, on_off);
        }
        output.extend_from_slice(block.channel(0));
    }

    for (n, &y) in output.iter().enumerate() {
        let expected = if n >= DELAY && (n - DELAY) % SPACING == 0 { 1.0 } else { 0.0 };
        assert!((y - expected).abs() < 1e-12, "sample {n}: {y}, expected {expected}");
    }
}

#[test]
fn test_block_latency_processor_stays_aligned() {
    const BLOCK: usize = 128;
    let spec = ProcessSpec::new(SAMPLE_RATE, BLOCK, 1);

    // Delta IR: the engine is a pure delay of its block size
    let mut engine = ConvolutionEngine::new(1, BLOCK, Some(&[1.0][..]));
    let latency = engine.added_latency();

    let mut bypass = BypassProcessor::<f64>::new();
    bypass.prepare(&spec, false);
    bypass.set_latency_samples(latency);
    assert_eq!(bypass.latency_samples(), latency);

    let input = generate_noise(BLOCK * 12, 11);
    let mut output = Vec::new();

    for (i, chunk) in input.chunks(BLOCK).enumerate() {
        let on_off = (i / 3) % 2 == 1;
        let mut data = chunk.to_vec();
        let block: &mut [&mut [f64]] = &mut [&mut data];

        if bypass.process_block_in(block, on_off) {
            engine.process_samples_with_added_latency_in_place(block.channel_mut(0));
            bypass.process_block_out(block, on_off);
        }
        output.extend_from_slice(block.channel(0));
    }

    for (n, &y) in output.iter().enumerate() {
        let expected = if n >= latency { input[n - latency] } else { 0.0 };
        assert!((y - expected).abs() < 1e-9, "sample {n}: {y}, expected {expected}");
    }
}
