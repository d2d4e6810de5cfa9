//! Live association between one audio parameter and the source feeding it.

use super::ring_buffer::ChannelRing;
use super::source::{AudioSource, CaptureSink, SourceId, SourceResolver, SubscriptionId};
use super::AudioBlock;
use crate::util::audio::DEFAULT_SAMPLE_RATE;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

struct RingState {
    ring: ChannelRing,
    /// Source whose captures are accepted; anything else is a stale callback.
    active: Option<SourceId>,
    failed: bool,
}

struct BindingShared {
    state: Mutex<RingState>,
    generation: AtomicU64,
}

impl BindingShared {
    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl CaptureSink for BindingShared {
    fn on_audio(&self, source: &AudioSource, block: &AudioBlock<'_>) {
        let mut state = self.state.lock();
        if state.failed || state.active != Some(source.id()) {
            return;
        }

        match state.ring.push(block) {
            Ok(()) => self.bump(),
            Err(err) => {
                let channels = state.ring.channel_count();
                state.ring = ChannelRing::new(channels);
                state.failed = true;
                self.bump();
                error!(
                    "[sidechain] {err}; audio from '{}' disabled for this binding",
                    source.name()
                );
            }
        }
    }
}

#[derive(Default)]
struct SourceSlot {
    name: Option<String>,
    source: Option<Weak<AudioSource>>,
    subscription: Option<SubscriptionId>,
}

impl SourceSlot {
    fn release(&mut self) {
        let subscription = self.subscription.take();
        let source = self.source.take().and_then(|weak| weak.upgrade());
        if let (Some(source), Some(id)) = (source, subscription) {
            source.unsubscribe(id);
        }
    }
}

pub struct SidechainBinding {
    shared: Arc<BindingShared>,
    resolver: Arc<dyn SourceResolver>,
    // Serializes source swaps; never taken by the capture path.
    slot: Mutex<SourceSlot>,
}

impl std::fmt::Debug for SidechainBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidechainBinding")
            .field("source", &self.source_name())
            .field("channels", &self.channels())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl SidechainBinding {
    pub fn new(channels: usize, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            shared: Arc::new(BindingShared {
                state: Mutex::new(RingState {
                    ring: ChannelRing::new(channels),
                    active: None,
                    failed: false,
                }),
                generation: AtomicU64::new(0),
            }),
            resolver,
            slot: Mutex::new(SourceSlot::default()),
        }
    }

    pub fn channels(&self) -> usize {
        self.shared.state.lock().ring.channel_count()
    }

    /// Name last passed to [`rebind`](Self::rebind).
    pub fn source_name(&self) -> Option<String> {
        self.slot.lock().name.clone()
    }

    /// Whether a live source is currently subscribed.
    pub fn is_bound(&self) -> bool {
        self.slot
            .lock()
            .source
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Rate last published by the bound source, or the default when unbound.
    pub fn sample_rate(&self) -> f32 {
        self.slot
            .lock()
            .source
            .as_ref()
            .and_then(Weak::upgrade)
            .map_or(DEFAULT_SAMPLE_RATE, |source| source.sample_rate())
    }

    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failed
    }

    /// Counter bumped by every accepted capture and every clear.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Switch to the source called `name`. Returns `false` when the name is
    /// unchanged. An unresolvable name leaves the binding silent.
    pub fn rebind(&self, name: &str) -> bool {
        let mut slot = self.slot.lock();
        if slot.name.as_deref() == Some(name) {
            return false;
        }

        slot.release();
        let next = self.resolver.resolve(name);
        {
            let mut state = self.shared.state.lock();
            state.ring.clear();
            state.active = next.as_ref().map(|source| source.id());
            self.shared.bump();
        }

        match next {
            Some(source) => {
                let sink: Weak<dyn CaptureSink> =
                    Arc::downgrade(&self.shared) as Weak<dyn CaptureSink>;
                slot.subscription = Some(source.subscribe(sink));
                slot.source = Some(Arc::downgrade(&source));
                info!("[sidechain] bound to audio source '{name}'");
            }
            None if name.is_empty() => info!("[sidechain] audio source cleared"),
            None => warn!("[sidechain] audio source '{name}' not found; binding is silent"),
        }

        slot.name = Some(name.to_string());
        true
    }

    /// Copy the newest `window_length` samples of every channel into
    /// consecutive rows of `dest`, or silence if not enough are buffered.
    /// Returns the generation the copy corresponds to.
    pub fn snapshot(&self, window_length: usize, dest: &mut [f32]) -> u64 {
        let mut state = self.shared.state.lock();
        state.ring.note_window(window_length);
        state.ring.peek(window_length, dest);
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Unsubscribe and free buffered audio. Safe to call repeatedly.
    pub fn detach(&self) {
        let mut slot = self.slot.lock();
        slot.release();
        slot.name = None;

        let mut state = self.shared.state.lock();
        let channels = state.ring.channel_count();
        state.ring = ChannelRing::new(channels);
        state.active = None;
    }
}

impl Drop for SidechainBinding {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
impl SidechainBinding {
    fn with_ring<R>(&self, f: impl FnOnce(&ChannelRing) -> R) -> R {
        f(&self.shared.state.lock().ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::SourceRegistry;

    fn registry_with(names: &[&str]) -> Arc<SourceRegistry> {
        let registry = Arc::new(SourceRegistry::new());
        for name in names {
            registry.register(name, 2);
        }
        registry
    }

    fn deliver(source: &AudioSource, value: f32, frames: usize, muted: bool) {
        let plane = vec![value; frames];
        let planes = [plane.as_slice(), plane.as_slice()];
        source.deliver(&AudioBlock::new(&planes, frames, muted));
    }

    #[test]
    fn rebinding_the_same_name_is_a_no_op() {
        let registry = registry_with(&["music"]);
        let binding = SidechainBinding::new(2, registry.clone());

        assert!(binding.rebind("music"));
        let generation = binding.generation();
        assert!(!binding.rebind("music"));
        assert_eq!(binding.generation(), generation);
        assert_eq!(registry.resolve("music").unwrap().subscriber_count(), 1);
    }

    #[test]
    fn captured_audio_reaches_the_snapshot() {
        let registry = registry_with(&["music"]);
        let binding = SidechainBinding::new(2, registry.clone());
        binding.rebind("music");
        let source = registry.resolve("music").unwrap();

        deliver(&source, 0.5, 64, false);

        let mut dest = vec![0.0; 128];
        binding.snapshot(64, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.5));
    }

    #[test]
    fn unknown_source_is_silent() {
        let registry = registry_with(&["music"]);
        let binding = SidechainBinding::new(2, registry);
        assert!(binding.rebind("does-not-exist"));
        assert!(!binding.is_bound());

        let mut dest = vec![1.0; 128];
        binding.snapshot(64, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rebind_clears_old_timeline_and_ignores_stale_callbacks() {
        let registry = registry_with(&["music", "voice"]);
        let binding = SidechainBinding::new(2, registry.clone());
        let music = registry.resolve("music").unwrap();
        let voice = registry.resolve("voice").unwrap();

        binding.rebind("music");
        deliver(&music, 1.0, 64, false);
        binding.rebind("voice");
        assert_eq!(binding.with_ring(|ring| ring.len()), 0);
        assert_eq!(music.subscriber_count(), 0);

        // a callback already in flight from the old source
        let stale = [1.0f32; 64];
        let planes = [stale.as_slice(), stale.as_slice()];
        binding
            .shared
            .on_audio(&music, &AudioBlock::new(&planes, 64, false));
        assert_eq!(binding.with_ring(|ring| ring.len()), 0);

        deliver(&voice, 0.25, 64, false);
        let mut dest = vec![0.0; 128];
        binding.snapshot(64, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.25));
    }

    #[test]
    fn muted_capture_is_silent_but_advances() {
        let registry = registry_with(&["music"]);
        let binding = SidechainBinding::new(2, registry.clone());
        binding.rebind("music");
        let source = registry.resolve("music").unwrap();

        deliver(&source, 1.0, 32, true);
        assert_eq!(binding.with_ring(|ring| ring.len()), 32);
        let mut dest = vec![9.0; 64];
        binding.snapshot(32, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn dropping_the_binding_unsubscribes() {
        let registry = registry_with(&["music"]);
        let source = registry.resolve("music").unwrap();
        {
            let binding = SidechainBinding::new(2, registry.clone());
            binding.rebind("music");
            assert_eq!(source.subscriber_count(), 1);
            binding.detach();
            binding.detach();
            assert_eq!(source.subscriber_count(), 0);
            binding.rebind("music");
        }
        assert_eq!(source.subscriber_count(), 0);
        deliver(&source, 1.0, 16, false);
    }

    #[test]
    fn allocation_failure_only_disables_that_binding() {
        let registry = registry_with(&["music"]);
        let broken = SidechainBinding::new(2, registry.clone());
        let healthy = SidechainBinding::new(2, registry.clone());
        broken.rebind("music");
        healthy.rebind("music");
        let source = registry.resolve("music").unwrap();

        let huge = AudioBlock::new(&[], usize::MAX / 2, false);
        broken.shared.on_audio(&source, &huge);
        assert!(broken.is_failed());

        deliver(&source, 0.5, 64, false);
        let mut dest = vec![9.0; 128];
        broken.snapshot(64, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.0));

        healthy.snapshot(64, &mut dest);
        assert!(dest.iter().all(|v| *v == 0.5));
        assert!(!healthy.is_failed());
    }

    #[test]
    fn concurrent_pushes_never_tear_frames() {
        const WRITERS: usize = 8;
        const PUSHES_PER_WRITER: usize = 125;
        const CHANNELS: usize = 4;
        const WINDOW: usize = 64;

        let registry = Arc::new(SourceRegistry::new());
        let source = registry.register("music", CHANNELS);
        let binding = SidechainBinding::new(CHANNELS, registry.clone());
        binding.rebind("music");

        std::thread::scope(|scope| {
            for writer in 0..WRITERS {
                let source = &source;
                let binding = &binding;
                scope.spawn(move || {
                    for push in 0..PUSHES_PER_WRITER {
                        let frames = 16 + (push % 4) * 16;
                        let plane: Vec<f32> = (0..frames)
                            .map(|n| (writer * 10_000 + push * 100 + n) as f32)
                            .collect();
                        let planes = [plane.as_slice(); CHANNELS];
                        source.deliver(&AudioBlock::new(&planes, frames, push % 7 == 0));
                        assert!(binding.with_ring(ChannelRing::is_aligned));
                    }
                });
            }

            let binding = &binding;
            scope.spawn(move || {
                let mut dest = vec![0.0f32; CHANNELS * WINDOW];
                for _ in 0..1_000 {
                    binding.snapshot(WINDOW, &mut dest);
                    let (first, rest) = dest.split_at(WINDOW);
                    for row in rest.chunks_exact(WINDOW) {
                        assert_eq!(row, first, "channels diverged within one window");
                    }
                    assert!(binding.with_ring(ChannelRing::is_aligned));
                }
            });
        });

        assert!(binding.with_ring(ChannelRing::is_aligned));
        assert!(binding.generation() >= (WRITERS * PUSHES_PER_WRITER) as u64);
    }
}
