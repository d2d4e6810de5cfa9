//! Per-binding planar sample queues.
//!
//! Every channel grows and shrinks by the same amount on each operation, so a
//! window peeked from one channel is sample-aligned with the same window on
//! every other channel.

use super::{AudioBlock, MAX_AUDIO_CHANNELS};
use crate::util::audio::copy_from_deque;
use std::collections::{TryReserveError, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("failed to grow channel ring to {frames} frames")]
    Alloc {
        frames: usize,
        #[source]
        source: TryReserveError,
    },
}

#[derive(Debug, Clone)]
pub struct ChannelRing {
    channels: Vec<VecDeque<f32>>,
    max_frames: usize,
}

impl ChannelRing {
    pub fn new(channels: usize) -> Self {
        let channels = channels.clamp(1, MAX_AUDIO_CHANNELS);
        Self {
            channels: (0..channels).map(|_| VecDeque::new()).collect(),
            max_frames: 0,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Buffered samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, VecDeque::len)
    }

    /// Whether every channel holds the same number of samples.
    pub fn is_aligned(&self) -> bool {
        let len = self.len();
        self.channels.iter().all(|channel| channel.len() == len)
    }

    /// Append one capture block to every channel. Muted blocks, and channels
    /// the block has no complete plane for, receive zeros of equal length.
    pub fn push(&mut self, block: &AudioBlock<'_>) -> Result<(), RingError> {
        let frames = block.frames;
        if frames == 0 {
            return Ok(());
        }

        if frames > self.max_frames {
            self.grow(frames)?;
        }

        for (index, channel) in self.channels.iter_mut().enumerate() {
            match block.plane(index).filter(|_| !block.muted) {
                Some(plane) => channel.extend(plane.iter().copied()),
                None => channel.extend(std::iter::repeat_n(0.0, frames)),
            }
        }

        self.trim();
        debug_assert!(self.is_aligned());
        Ok(())
    }

    /// Copy the newest `count` samples of `channel` into `dest[..count]`.
    /// Writes silence and returns `false` on underrun.
    pub fn peek_channel(&self, channel: usize, count: usize, dest: &mut [f32]) -> bool {
        let dest = &mut dest[..count];
        match self.channels.get(channel) {
            Some(queue) if queue.len() >= count => {
                copy_from_deque(dest, queue, queue.len() - count);
                true
            }
            _ => {
                dest.fill(0.0);
                false
            }
        }
    }

    /// Peek `count` samples from every channel into consecutive rows of
    /// `dest`. Rows beyond the ring's channel count are zeroed.
    pub fn peek(&self, count: usize, dest: &mut [f32]) -> bool {
        if count == 0 {
            return false;
        }
        let available = self.len() >= count;
        for (channel, row) in dest.chunks_exact_mut(count).enumerate() {
            if available {
                self.peek_channel(channel, count, row);
            } else {
                row.fill(0.0);
            }
        }
        available
    }

    /// Make sure trimming keeps at least `count` samples of history.
    pub fn note_window(&mut self, count: usize) {
        self.max_frames = self.max_frames.max(count);
    }

    /// Drop the oldest samples beyond twice the largest frame count seen.
    /// Returns the number of samples dropped per channel.
    pub fn trim(&mut self) -> usize {
        let limit = self.max_frames.saturating_mul(2);
        let excess = self.len().saturating_sub(limit);
        if excess > 0 {
            for channel in &mut self.channels {
                channel.drain(..excess);
            }
        }
        excess
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }

    // Reserve room for two retained captures plus one incoming; never shrinks.
    fn grow(&mut self, frames: usize) -> Result<(), RingError> {
        let target = frames.saturating_mul(3);
        for channel in &mut self.channels {
            let additional = target.saturating_sub(channel.len());
            channel
                .try_reserve(additional)
                .map_err(|source| RingError::Alloc { frames, source })?;
        }
        self.max_frames = frames;
        Ok(())
    }
}

#[cfg(test)]
impl ChannelRing {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}
