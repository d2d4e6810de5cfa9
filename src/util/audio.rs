// Default sample rate (Hz) assumed for a source until the capture
// backend reports the negotiated rate.
pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;

// decibel conversion constants/utils

// Floor value (dB) below which magnitudes are clamped.
pub const DB_FLOOR: f32 = -140.0;

// Minimum power value to avoid log(0) in dB conversions.
const POWER_EPSILON: f32 = 1.0e-20;

// Natural log to decibel conversion factor: 10 / ln(10) ~= 4.342944819.
const LN_TO_DB: f32 = 4.342_944_8;

// Convert power (magnitude squared) to decibels with a custom floor.
#[inline(always)]
pub fn power_to_db(power: f32, floor: f32) -> f32 {
    if power > POWER_EPSILON {
        (power.ln() * LN_TO_DB).max(floor)
    } else {
        floor
    }
}

#[inline]
pub fn apply_window(buffer: &mut [f32], window: &[f32]) {
    debug_assert_eq!(buffer.len(), window.len());
    for (sample, coeff) in buffer.iter_mut().zip(window.iter()) {
        *sample *= *coeff;
    }
}

// Convert frequency in Hz to mel scale.
#[inline(always)]
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

// Convert mel scale to frequency in Hz.
#[inline(always)]
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

// Copy `dst.len()` samples starting at `start` out of a VecDeque, handling wraparound.
#[inline]
pub fn copy_from_deque(dst: &mut [f32], src: &std::collections::VecDeque<f32>, start: usize) {
    let len = dst.len().min(src.len().saturating_sub(start));
    let (head, tail) = src.as_slices();
    if start >= head.len() {
        let offset = start - head.len();
        dst[..len].copy_from_slice(&tail[offset..offset + len]);
    } else if start + len <= head.len() {
        dst[..len].copy_from_slice(&head[start..start + len]);
    } else {
        let split = head.len() - start;
        dst[..split].copy_from_slice(&head[start..]);
        dst[split..len].copy_from_slice(&tail[..len - split]);
    }
}

// Split little-endian interleaved f32 bytes into per-channel planes.
// Returns the number of complete frames written.
pub fn deinterleave_f32le(bytes: &[u8], planes: &mut [Vec<f32>]) -> usize {
    let channels = planes.len();
    if channels == 0 {
        return 0;
    }

    let frame_bytes = channels * std::mem::size_of::<f32>();
    let frames = bytes.len() / frame_bytes;
    for plane in planes.iter_mut() {
        plane.clear();
        plane.reserve(frames);
    }

    for frame in bytes.chunks_exact(frame_bytes) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(4)) {
            plane.push(f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]));
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn copy_from_deque_handles_wraparound() {
        let mut deque: VecDeque<f32> = VecDeque::with_capacity(4);
        deque.extend([0.0, 1.0, 2.0, 3.0]);
        deque.pop_front();
        deque.pop_front();
        deque.push_back(4.0);
        deque.push_back(5.0);

        let mut dst = [0.0; 3];
        copy_from_deque(&mut dst, &deque, 1);
        assert_eq!(dst, [3.0, 4.0, 5.0]);

        let mut all = [0.0; 4];
        copy_from_deque(&mut all, &deque, 0);
        assert_eq!(all, [2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn deinterleave_splits_frames_and_drops_partial_tail() {
        let samples = [1.0f32, -1.0, 2.0, -2.0, 3.0];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut planes = vec![Vec::new(), Vec::new()];

        let frames = deinterleave_f32le(&bytes, &mut planes);

        assert_eq!(frames, 2);
        assert_eq!(planes[0], vec![1.0, 2.0]);
        assert_eq!(planes[1], vec![-1.0, -2.0]);
    }

    #[test]
    fn mel_conversion_round_trips() {
        for hz in [20.0f32, 440.0, 1_000.0, 12_000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() / hz < 1.0e-3, "{hz} -> {back}");
        }
    }

    #[test]
    fn power_to_db_respects_floor() {
        assert_eq!(power_to_db(0.0, DB_FLOOR), DB_FLOOR);
        assert!((power_to_db(1.0, DB_FLOOR)).abs() < 1.0e-6);
        assert!((power_to_db(0.01, DB_FLOOR) + 20.0).abs() < 1.0e-3);
    }
}
