//! Named audio sources and the registry used to resolve them.
//!
//! A source fans each capture block out to its subscribers. Subscribers are
//! held weakly: a source never keeps a binding alive, and a binding that has
//! been dropped is pruned on the next delivery.

use super::AudioBlock;
use crate::util::audio::DEFAULT_SAMPLE_RATE;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiver of capture blocks. Called on the audio-delivery thread.
pub trait CaptureSink: Send + Sync {
    fn on_audio(&self, source: &AudioSource, block: &AudioBlock<'_>);
}

/// Maps a user-selected name onto a live source.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<AudioSource>>;
}

struct Subscriber {
    id: SubscriptionId,
    sink: Weak<dyn CaptureSink>,
}

pub struct AudioSource {
    id: SourceId,
    name: String,
    channels: AtomicUsize,
    sample_rate: AtomicU32,
    next_subscription: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channels", &self.channels())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl AudioSource {
    pub fn new(name: impl Into<String>, channels: usize) -> Self {
        Self {
            id: SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            channels: AtomicUsize::new(channels),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE as u32),
            next_subscription: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate.load(Ordering::Relaxed) as f32
    }

    /// Publish the format negotiated by the capture backend.
    pub fn set_format(&self, channels: usize, sample_rate: u32) {
        self.channels.store(channels.max(1), Ordering::Relaxed);
        self.sample_rate.store(sample_rate.max(1), Ordering::Relaxed);
    }

    pub fn subscribe(&self, sink: Weak<dyn CaptureSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber { id, sink });
        debug!("[source] '{}' gained subscriber {}", self.name, id.0);
        id
    }

    /// Remove a subscription. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        before != subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Hand one capture block to every live subscriber.
    pub fn deliver(&self, block: &AudioBlock<'_>) {
        if block.frames == 0 {
            return;
        }

        // Sinks run without the subscriber lock held so (un)subscribing never
        // waits on a binding's ring lock.
        let sinks: Vec<Arc<dyn CaptureSink>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|subscriber| subscriber.sink.strong_count() > 0);
            subscribers
                .iter()
                .filter_map(|subscriber| subscriber.sink.upgrade())
                .collect()
        };

        for sink in sinks {
            sink.on_audio(self, block);
        }
    }
}

/// Name-indexed set of capturable sources.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, Arc<AudioSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return the source already registered under it.
    pub fn register(&self, name: &str, channels: usize) -> Arc<AudioSource> {
        let mut sources = self.sources.write();
        Arc::clone(
            sources
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AudioSource::new(name, channels))),
        )
    }

    /// Selectable source names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.sources.read().keys().cloned().collect()
    }
}

impl SourceResolver for SourceRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<AudioSource>> {
        if name.is_empty() {
            return None;
        }
        self.sources.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicUsize,
    }

    impl CaptureSink for CountingSink {
        fn on_audio(&self, _source: &AudioSource, block: &AudioBlock<'_>) {
            self.frames.fetch_add(block.frames, Ordering::Relaxed);
        }
    }

    fn deliver_frames(source: &AudioSource, frames: usize) {
        let plane = vec![0.25f32; frames];
        let planes = [plane.as_slice()];
        source.deliver(&AudioBlock::new(&planes, frames, false));
    }

    #[test]
    fn delivers_to_live_subscribers() {
        let source = AudioSource::new("mic", 1);
        let sink = Arc::new(CountingSink::default());
        let weak: Weak<dyn CaptureSink> = Arc::downgrade(&sink) as Weak<dyn CaptureSink>;
        source.subscribe(weak);

        deliver_frames(&source, 32);
        deliver_frames(&source, 16);
        assert_eq!(sink.frames.load(Ordering::Relaxed), 48);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let source = AudioSource::new("mic", 1);
        let sink = Arc::new(CountingSink::default());
        let weak: Weak<dyn CaptureSink> = Arc::downgrade(&sink) as Weak<dyn CaptureSink>;
        let id = source.subscribe(weak);

        assert!(source.unsubscribe(id));
        assert!(!source.unsubscribe(id));
        deliver_frames(&source, 8);
        assert_eq!(sink.frames.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let source = AudioSource::new("mic", 1);
        let sink = Arc::new(CountingSink::default());
        let weak: Weak<dyn CaptureSink> = Arc::downgrade(&sink) as Weak<dyn CaptureSink>;
        source.subscribe(weak);
        drop(sink);

        deliver_frames(&source, 8);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn registry_resolves_registered_names_only() {
        let registry = SourceRegistry::new();
        let first = registry.register("music", 2);
        let again = registry.register("music", 6);
        registry.register("desktop", 2);

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.channels(), 2);
        assert!(registry.resolve("music").is_some());
        assert!(registry.resolve("Music").is_none());
        assert!(registry.resolve("").is_none());
        assert_eq!(registry.names(), vec!["desktop".to_string(), "music".to_string()]);
    }

    #[test]
    fn format_updates_are_clamped() {
        let source = AudioSource::new("mic", 2);
        source.set_format(0, 44_100);
        assert_eq!(source.channels(), 1);
        assert_eq!(source.sample_rate(), 44_100.0);
    }
}
