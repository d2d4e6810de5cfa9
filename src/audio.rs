//! Audio capture plumbing: sources, per-binding ring buffers and the
//! PipeWire backend that feeds them.

pub mod pw_capture;
pub mod ring_buffer;
pub mod sidechain;
pub mod source;

/// Upper bound on channels tracked per binding.
pub const MAX_AUDIO_CHANNELS: usize = 8;

/// One planar capture event: `frames` samples per plane.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    pub planes: &'a [&'a [f32]],
    pub frames: usize,
    pub muted: bool,
}

impl<'a> AudioBlock<'a> {
    pub fn new(planes: &'a [&'a [f32]], frames: usize, muted: bool) -> Self {
        Self {
            planes,
            frames,
            muted,
        }
    }

    /// Samples for `channel`, if the block carries a complete plane for it.
    pub fn plane(&self, channel: usize) -> Option<&'a [f32]> {
        self.planes
            .get(channel)
            .filter(|plane| plane.len() >= self.frames)
            .map(|plane| &plane[..self.frames])
    }
}
