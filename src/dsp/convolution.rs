//! Offline convolution reverb
//!
//! The impulse response is decaying noise from a seeded ChaCha generator,
//! so the same input always renders to the same bytes. Convolution is FFT
//! overlap-add, one channel at a time.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rustfft::{num_complex::Complex, FftPlanner};

/// Length of the synthetic impulse response
pub const IMPULSE_SECONDS: f32 = 2.0;

/// Seed of channel 0; channel `n` uses `IMPULSE_SEED + n`
const IMPULSE_SEED: u64 = 0x6d69_7864_6563_6b00;

/// Decaying-noise impulse response for one channel
///
/// Envelope is `(1 - t)^2` over `seconds`. The result is scaled to unit
/// energy so the wet path keeps roughly the input level.
pub fn impulse_response(sample_rate: u32, seconds: f32, channel: usize) -> Vec<f32> {
    let len = (sample_rate as f32 * seconds) as usize;
    if len == 0 {
        return Vec::new();
    }

    let mut rng = ChaCha8Rng::seed_from_u64(IMPULSE_SEED + channel as u64);
    let mut impulse: Vec<f32> = (0..len)
        .map(|i| {
            let t = i as f32 / len as f32;
            rng.random_range(-1.0_f32..1.0) * (1.0 - t).powi(2)
        })
        .collect();

    let energy: f64 = impulse.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if energy > 0.0 {
        let scale = (1.0 / energy.sqrt()) as f32;
        impulse.iter_mut().for_each(|s| *s *= scale);
    }
    impulse
}

/// Convolve `signal` with `impulse`, keeping the first `out_len` samples
pub fn fft_convolve(signal: &[f32], impulse: &[f32], out_len: usize) -> Vec<f32> {
    let mut output = vec![0.0_f32; out_len];
    if signal.is_empty() || impulse.is_empty() || out_len == 0 {
        return output;
    }

    let fft_size = (2 * impulse.len()).next_power_of_two();
    let block_len = fft_size - impulse.len() + 1;

    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_size);
    let inverse = planner.plan_fft_inverse(fft_size);

    let mut kernel: Vec<Complex<f32>> = impulse
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_size)
        .collect();
    forward.process(&mut kernel);

    let norm = 1.0 / fft_size as f32;
    let mut scratch = vec![Complex::new(0.0, 0.0); fft_size];

    for start in (0..signal.len()).step_by(block_len) {
        if start >= out_len {
            break;
        }
        let end = (start + block_len).min(signal.len());

        scratch.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (slot, &s) in scratch.iter_mut().zip(&signal[start..end]) {
            slot.re = s;
        }

        forward.process(&mut scratch);
        for (x, h) in scratch.iter_mut().zip(&kernel) {
            *x *= *h;
        }
        inverse.process(&mut scratch);

        // Overlap-add
        for (offset, value) in scratch.iter().enumerate() {
            let Some(out) = output.get_mut(start + offset) else {
                break;
            };
            *out += value.re * norm;
        }
    }

    output
}
