//! Real-input spectral transform used by the spectrum assembler.

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::sync::Arc;
use tracing::debug;

/// Capability the assembler needs from an FFT backend.
///
/// `transform` reads `buffer.len()` real samples, zero-pads them to the next
/// power of two, and writes the magnitudes of the first `buffer.len() / 2`
/// frequency bins into the front of `buffer`. Entries past the half are
/// zeroed.
pub trait SpectralTransform: Send {
    fn transform(&mut self, buffer: &mut [f32]);
}

/// [`SpectralTransform`] backed by a cached `realfft` plan.
pub struct RealFftTransform {
    planner: RealFftPlanner<f32>,
    fft: Option<Arc<dyn RealToComplex<f32>>>,
    input: Vec<f32>,
    output: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for RealFftTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealFftTransform")
            .field("size", &self.input.len())
            .finish_non_exhaustive()
    }
}

impl Default for RealFftTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl RealFftTransform {
    pub fn new() -> Self {
        Self {
            planner: RealFftPlanner::new(),
            fft: None,
            input: Vec::new(),
            output: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn ensure_plan(&mut self, size: usize) -> Arc<dyn RealToComplex<f32>> {
        if let Some(fft) = self.fft.as_ref()
            && self.input.len() == size
        {
            return Arc::clone(fft);
        }

        let fft = self.planner.plan_fft_forward(size);
        self.input = vec![0.0; size];
        self.output = vec![Complex32::default(); size / 2 + 1];
        self.scratch = vec![Complex32::default(); fft.get_scratch_len()];
        self.fft = Some(Arc::clone(&fft));
        fft
    }
}

impl SpectralTransform for RealFftTransform {
    fn transform(&mut self, buffer: &mut [f32]) {
        let len = buffer.len();
        if len < 2 {
            buffer.fill(0.0);
            return;
        }

        let size = padded_len(len);
        let fft = self.ensure_plan(size);
        self.input[..len].copy_from_slice(buffer);
        self.input[len..].fill(0.0);

        let half = len / 2;
        if let Err(err) =
            fft.process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
        {
            debug!("[spectrum] transform of {size} samples failed: {err}");
            buffer.fill(0.0);
            return;
        }

        for (dst, bin) in buffer[..half].iter_mut().zip(self.output.iter()) {
            *dst = bin.norm();
        }
        buffer[half..].fill(0.0);
    }
}

/// FFT length used for a window of `len` samples.
#[inline]
pub fn padded_len(len: usize) -> usize {
    len.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, cycles: f32) -> Vec<f32> {
        (0..len)
            .map(|n| (core::f32::consts::TAU * cycles * n as f32 / len as f32).sin())
            .collect()
    }

    #[test]
    fn pure_tone_lands_in_its_bin() {
        let mut transform = RealFftTransform::new();
        let mut buffer = sine(64, 5.0);
        transform.transform(&mut buffer);

        let peak = buffer[..32]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap();
        assert_eq!(peak, 5);
        // unnormalized: a unit sine of N samples yields N/2 at its bin
        assert!((buffer[5] - 32.0).abs() < 1.0e-3);
        assert!(buffer[32..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn non_power_of_two_lengths_are_padded() {
        assert_eq!(padded_len(64), 64);
        assert_eq!(padded_len(100), 128);
        assert_eq!(padded_len(1), 1);

        let mut transform = RealFftTransform::new();
        let mut buffer = vec![1.0f32; 100];
        transform.transform(&mut buffer);
        // DC bin of 100 ones padded to 128
        assert!((buffer[0] - 100.0).abs() < 1.0e-3);
        assert!(buffer[50..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn replans_when_length_changes() {
        let mut transform = RealFftTransform::new();
        let mut small = vec![0.0f32; 64];
        transform.transform(&mut small);
        let mut large = sine(256, 3.0);
        transform.transform(&mut large);
        assert_eq!(transform.input.len(), 256);
        assert!(large[3] > large[10]);
    }

    #[test]
    fn degenerate_lengths_are_silent() {
        let mut transform = RealFftTransform::new();
        let mut single = [0.5f32];
        transform.transform(&mut single);
        assert_eq!(single, [0.0]);
    }
}
